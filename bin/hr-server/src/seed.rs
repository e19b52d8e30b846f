//! Seed data for the in-memory store

use std::path::Path;

use anyhow::{Context, Result};
use hr_platform::{Endpoint, InMemoryStore, Project, Subscription};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub projects: Vec<Project>,
    pub endpoints: Vec<Endpoint>,
    pub subscriptions: Vec<Subscription>,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading seed file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
    }

    pub fn apply(self, store: &InMemoryStore) -> (usize, usize, usize) {
        let counts = (self.projects.len(), self.endpoints.len(), self.subscriptions.len());
        for project in self.projects {
            store.insert_project(project);
        }
        for endpoint in self.endpoints {
            store.insert_endpoint(endpoint);
        }
        for subscription in self.subscriptions {
            store.insert_subscription(subscription);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hr_platform::Repositories;
    use std::io::Write;

    #[tokio::test]
    async fn test_seed_round_trip_into_store() {
        let project = Project::new("p1", "org1", "Project 1");
        let endpoint = Endpoint::new("p1", "billing", "https://example.com/hook").with_id("e1");
        let subscription = Subscription::new("p1", "e1", "all");
        let doc = serde_json::json!({
            "projects": [project],
            "endpoints": [endpoint],
            "subscriptions": [subscription],
        });

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", doc).unwrap();

        let (repos, store) = Repositories::in_memory();
        let counts = Seed::load(file.path()).unwrap().apply(&store);

        assert_eq!(counts, (1, 1, 1));
        assert!(repos.endpoints.find_endpoint("p1", "e1").await.unwrap().is_some());
    }

    #[test]
    fn test_missing_seed_file_errors() {
        let err = Seed::load(Path::new("/nonexistent/seed.json")).unwrap_err();
        assert!(err.to_string().contains("seed.json"));
    }
}
