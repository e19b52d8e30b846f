/// Sentinel accepting every event type
pub const WILDCARD: &str = "*";

/// Whether a subscription's event-type list accepts `event_type`.
///
/// The wildcard matches any non-empty type; otherwise membership is exact.
/// An empty list accepts nothing.
pub fn type_matches(subscription_types: &[String], event_type: &str) -> bool {
    if event_type.is_empty() {
        return false;
    }
    subscription_types
        .iter()
        .any(|t| t == WILDCARD || t == event_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_wildcard_matches_any_non_empty_type() {
        let subs = types(&["*"]);
        for t in ["invoice.created", "a", "user.deleted.v2", "*"] {
            assert!(type_matches(&subs, t), "{t}");
        }
        assert!(!type_matches(&subs, ""));
    }

    #[test]
    fn test_exact_membership_only() {
        let subs = types(&["invoice.created", "invoice.paid"]);
        assert!(type_matches(&subs, "invoice.paid"));
        assert!(!type_matches(&subs, "invoice.*"));
        assert!(!type_matches(&subs, "invoice"));
        assert!(!type_matches(&subs, "Invoice.paid"));
    }

    #[test]
    fn test_no_glob_semantics() {
        let subs = types(&["invoice.*"]);
        assert!(!type_matches(&subs, "invoice.created"));
        assert!(type_matches(&subs, "invoice.*"));
    }

    #[test]
    fn test_empty_list_matches_nothing() {
        assert!(!type_matches(&[], "invoice.created"));
    }
}
