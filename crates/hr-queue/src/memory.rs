//! In-memory task queue
//!
//! Single-process backend for development and tests. Same dedup semantics
//! as the Redis backend.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use hr_common::QueueName;
use parking_lot::Mutex;
use tracing::debug;

use crate::job::{DeadJob, EnqueueOutcome, Job, QueueStats};
use crate::{QueueError, Result, TaskQueue};

const DEFAULT_DEAD_CAPACITY: usize = 10_000;
const PURGE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
enum JobState {
    Pending,
    InFlight,
    Finished(Instant),
}

#[derive(Default)]
struct State {
    ready: HashMap<QueueName, VecDeque<Job>>,
    /// Keyed by (process_at millis, sequence) so equal times keep insertion order
    scheduled: BTreeMap<(i64, u64), Job>,
    in_flight: HashMap<String, Job>,
    ids: HashMap<String, JobState>,
    dead: VecDeque<DeadJob>,
    seq: u64,
}

impl State {
    fn schedule(&mut self, job: Job) {
        let at = job.process_at.map(|t| t.timestamp_millis()).unwrap_or(0);
        self.seq += 1;
        self.scheduled.insert((at, self.seq), job);
    }

    fn promote_due(&mut self) {
        let now = Utc::now().timestamp_millis();
        let due: Vec<(i64, u64)> = self.scheduled.range(..=(now, u64::MAX)).map(|(k, _)| *k).collect();
        for key in due {
            if let Some(job) = self.scheduled.remove(&key) {
                self.ready.entry(job.queue).or_default().push_back(job);
            }
        }
    }

    fn purge_finished(&mut self, retention: Duration) {
        self.ids.retain(|_, state| match state {
            JobState::Finished(at) => at.elapsed() < retention,
            _ => true,
        });
    }
}

pub struct MemoryTaskQueue {
    state: Mutex<State>,
    retention: Duration,
    dead_capacity: usize,
}

impl MemoryTaskQueue {
    pub fn new(retention: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            retention,
            dead_capacity: DEFAULT_DEAD_CAPACITY,
        }
    }

    pub fn with_dead_capacity(mut self, capacity: usize) -> Self {
        self.dead_capacity = capacity.max(1);
        self
    }

    /// Total ready + scheduled + in-flight jobs
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.ready.values().map(|q| q.len()).sum::<usize>() + state.scheduled.len() + state.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of ready jobs in `queue`, oldest first
    pub fn ready_ids(&self, queue: QueueName) -> Vec<String> {
        self.state
            .lock()
            .ready
            .get(&queue)
            .map(|q| q.iter().map(|j| j.id.clone()).collect())
            .unwrap_or_default()
    }

    fn take_in_flight(state: &mut State, id: &str) -> Result<Job> {
        state.in_flight.remove(id).ok_or_else(|| QueueError::NotInFlight(id.to_string()))
    }
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    fn identifier(&self) -> &str {
        "memory"
    }

    async fn enqueue(&self, job: Job) -> Result<EnqueueOutcome> {
        let mut state = self.state.lock();
        if state.ids.len() > PURGE_THRESHOLD {
            state.purge_finished(self.retention);
        }

        let known = match state.ids.get(&job.id) {
            Some(JobState::Pending) | Some(JobState::InFlight) => true,
            Some(JobState::Finished(at)) => at.elapsed() < self.retention,
            None => false,
        };
        if known {
            debug!(job_id = %job.id, "Duplicate enqueue ignored");
            return Ok(EnqueueOutcome::Duplicate);
        }

        state.ids.insert(job.id.clone(), JobState::Pending);
        if job.is_delayed(Utc::now()) {
            state.schedule(job);
        } else {
            state.ready.entry(job.queue).or_default().push_back(job);
        }
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn dequeue(&self, queue: QueueName) -> Result<Option<Job>> {
        let mut state = self.state.lock();
        state.promote_due();

        let Some(job) = state.ready.get_mut(&queue).and_then(|q| q.pop_front()) else {
            return Ok(None);
        };
        state.ids.insert(job.id.clone(), JobState::InFlight);
        state.in_flight.insert(job.id.clone(), job.clone());
        Ok(Some(job))
    }

    async fn complete(&self, job: &Job) -> Result<()> {
        let mut state = self.state.lock();
        Self::take_in_flight(&mut state, &job.id)?;
        state.ids.insert(job.id.clone(), JobState::Finished(Instant::now()));
        Ok(())
    }

    async fn retry(&self, job: Job, delay: Duration) -> Result<()> {
        let mut state = self.state.lock();
        Self::take_in_flight(&mut state, &job.id)?;
        let at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        state.ids.insert(job.id.clone(), JobState::Pending);
        state.schedule(job.process_at(at));
        Ok(())
    }

    async fn kill(&self, job: Job, error: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::take_in_flight(&mut state, &job.id)?;
        state.ids.insert(job.id.clone(), JobState::Finished(Instant::now()));
        state.dead.push_front(DeadJob { job, error: error.to_string(), died_at: Utc::now() });
        while state.dead.len() > self.dead_capacity {
            state.dead.pop_back();
        }
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock();
        let pending = QueueName::ALL
            .iter()
            .map(|q| (q.as_str().to_string(), state.ready.get(q).map(|r| r.len() as u64).unwrap_or(0)))
            .collect();
        Ok(QueueStats {
            pending,
            scheduled: state.scheduled.len() as u64,
            in_flight: state.in_flight.len() as u64,
            dead: state.dead.len() as u64,
        })
    }

    async fn dead_jobs(&self, limit: usize) -> Result<Vec<DeadJob>> {
        Ok(self.state.lock().dead.iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::job_id;
    use hr_common::{DispatchMode, ProcessorType};

    fn job(id: &str) -> Job {
        Job::new(id, ProcessorType::CreateEvent, QueueName::CreateEvent, "p1", serde_json::json!({"n": 1}))
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_collapses() {
        let queue = MemoryTaskQueue::default();
        let id = job_id(DispatchMode::Single, "p1", "ev1");

        assert_eq!(queue.enqueue(job(&id)).await.unwrap(), EnqueueOutcome::Enqueued);
        assert_eq!(queue.enqueue(job(&id)).await.unwrap(), EnqueueOutcome::Duplicate);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_while_in_flight_and_after_completion() {
        let queue = MemoryTaskQueue::default();
        queue.enqueue(job("a")).await.unwrap();

        let taken = queue.dequeue(QueueName::CreateEvent).await.unwrap().unwrap();
        assert_eq!(queue.enqueue(job("a")).await.unwrap(), EnqueueOutcome::Duplicate);

        queue.complete(&taken).await.unwrap();
        assert_eq!(queue.enqueue(job("a")).await.unwrap(), EnqueueOutcome::Duplicate);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dedup_window_expires() {
        let queue = MemoryTaskQueue::new(Duration::from_millis(20));
        queue.enqueue(job("a")).await.unwrap();
        let taken = queue.dequeue(QueueName::CreateEvent).await.unwrap().unwrap();
        queue.complete(&taken).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(queue.enqueue(job("a")).await.unwrap(), EnqueueOutcome::Enqueued);
    }

    #[tokio::test]
    async fn test_fifo_per_queue() {
        let queue = MemoryTaskQueue::default();
        for id in ["1", "2", "3"] {
            queue.enqueue(job(id)).await.unwrap();
        }
        assert_eq!(queue.ready_ids(QueueName::CreateEvent), vec!["1", "2", "3"]);
        assert_eq!(queue.dequeue(QueueName::CreateEvent).await.unwrap().unwrap().id, "1");
        assert!(queue.dequeue(QueueName::Event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delayed_job_not_ready_until_due() {
        let queue = MemoryTaskQueue::default();
        let later = job("later").process_at(Utc::now() + chrono::Duration::milliseconds(50));
        queue.enqueue(later).await.unwrap();

        assert!(queue.dequeue(QueueName::CreateEvent).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(queue.dequeue(QueueName::CreateEvent).await.unwrap().unwrap().id, "later");
    }

    #[tokio::test]
    async fn test_retry_reschedules_same_id() {
        let queue = MemoryTaskQueue::default();
        queue.enqueue(job("r")).await.unwrap();
        let mut taken = queue.dequeue(QueueName::CreateEvent).await.unwrap().unwrap();
        taken.retried += 1;

        queue.retry(taken, Duration::ZERO).await.unwrap();
        assert_eq!(queue.enqueue(job("r")).await.unwrap(), EnqueueOutcome::Duplicate);

        let again = queue.dequeue(QueueName::CreateEvent).await.unwrap().unwrap();
        assert_eq!(again.retried, 1);
    }

    #[tokio::test]
    async fn test_kill_moves_to_dead_set() {
        let queue = MemoryTaskQueue::default().with_dead_capacity(1);
        for id in ["x", "y"] {
            queue.enqueue(job(id)).await.unwrap();
            let taken = queue.dequeue(QueueName::CreateEvent).await.unwrap().unwrap();
            queue.kill(taken, "boom").await.unwrap();
        }

        let dead = queue.dead_jobs(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.id, "y");
        assert_eq!(queue.stats().await.unwrap().dead, 1);
    }

    #[tokio::test]
    async fn test_complete_unknown_job_errors() {
        let queue = MemoryTaskQueue::default();
        assert!(matches!(queue.complete(&job("nope")).await, Err(QueueError::NotInFlight(_))));
    }
}
