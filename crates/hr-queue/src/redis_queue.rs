//! Redis task queue
//!
//! Key layout under `<prefix>`:
//! - `unique:<id>`   dedup marker, `SET NX PX <retention>`, refreshed on completion
//! - `queue:<name>`  ready list per queue (LPUSH / RPOP)
//! - `scheduled`     sorted set of delayed jobs scored by due time in millis
//! - `inflight`      hash of job id to job
//! - `deadlines`     sorted set of in-flight job ids scored by visibility deadline in millis
//! - `dead`          capped list of dead jobs, newest first
//!
//! A job still in flight past its deadline (worker crashed, drain timed out)
//! is moved back to the head of its ready list by the next dequeue.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hr_common::QueueName;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use crate::job::{DeadJob, EnqueueOutcome, Job, QueueStats};
use crate::{Result, TaskQueue};

const PROMOTE_BATCH: usize = 100;
const RECLAIM_BATCH: usize = 100;
const DEAD_CAPACITY: isize = 10_000;
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Moves due jobs from the scheduled set onto their ready lists
const PROMOTE_SCRIPT: &str = r#"
local jobs = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, payload in ipairs(jobs) do
  redis.call('ZREM', KEYS[1], payload)
  local queue = cjson.decode(payload)['queue']
  redis.call('LPUSH', ARGV[3] .. queue, payload)
end
return #jobs
"#;

/// Pops one ready job and records it in flight with a visibility deadline
const DEQUEUE_SCRIPT: &str = r#"
local payload = redis.call('RPOP', KEYS[1])
if payload then
  local id = cjson.decode(payload)['id']
  redis.call('HSET', KEYS[2], id, payload)
  redis.call('ZADD', KEYS[3], tonumber(ARGV[1]), id)
end
return payload
"#;

/// Returns in-flight jobs whose deadline has passed to their ready lists
const RECLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  local payload = redis.call('HGET', KEYS[2], id)
  if payload then
    redis.call('HDEL', KEYS[2], id)
    local queue = cjson.decode(payload)['queue']
    redis.call('RPUSH', ARGV[3] .. queue, payload)
  end
end
return #ids
"#;

pub struct RedisTaskQueue {
    conn: ConnectionManager,
    prefix: String,
    retention: Duration,
    visibility_timeout: Duration,
    promote: Script,
    dequeue: Script,
    reclaim: Script,
}

impl RedisTaskQueue {
    pub async fn connect(url: &str, prefix: impl Into<String>, retention: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        let prefix = prefix.into();
        info!(prefix = %prefix, "Connected Redis task queue");
        Ok(Self {
            conn,
            prefix,
            retention,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            promote: Script::new(PROMOTE_SCRIPT),
            dequeue: Script::new(DEQUEUE_SCRIPT),
            reclaim: Script::new(RECLAIM_SCRIPT),
        })
    }

    /// How long a dequeued job may stay in flight before another dequeue takes it back
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Move in-flight jobs past their visibility deadline back to ready
    pub async fn reclaim_expired(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let reclaimed: u64 = self
            .reclaim
            .key(self.deadlines_key())
            .key(self.inflight_key())
            .arg(Utc::now().timestamp_millis())
            .arg(RECLAIM_BATCH)
            .arg(self.queue_key_prefix())
            .invoke_async(&mut conn)
            .await?;
        if reclaimed > 0 {
            warn!(reclaimed, "Reclaimed in-flight jobs past their visibility deadline");
        }
        Ok(reclaimed)
    }

    /// Drop the in-flight record and deadline of `id`
    async fn release(&self, conn: &mut ConnectionManager, id: &str) -> Result<()> {
        let _: () = redis::pipe()
            .atomic()
            .hdel(self.inflight_key(), id)
            .ignore()
            .zrem(self.deadlines_key(), id)
            .ignore()
            .query_async(conn)
            .await?;
        Ok(())
    }

    fn unique_key(&self, id: &str) -> String {
        format!("{}:unique:{}", self.prefix, id)
    }

    fn queue_key(&self, queue: QueueName) -> String {
        format!("{}:queue:{}", self.prefix, queue.as_str())
    }

    fn queue_key_prefix(&self) -> String {
        format!("{}:queue:", self.prefix)
    }

    fn scheduled_key(&self) -> String {
        format!("{}:scheduled", self.prefix)
    }

    fn inflight_key(&self) -> String {
        format!("{}:inflight", self.prefix)
    }

    fn deadlines_key(&self) -> String {
        format!("{}:deadlines", self.prefix)
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.prefix)
    }

    fn retention_ms(&self) -> u64 {
        self.retention.as_millis().min(u64::MAX as u128) as u64
    }

    async fn place(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(job)?;
        match job.process_at.filter(|_| job.is_delayed(Utc::now())) {
            Some(at) => {
                let _: () = conn.zadd(self.scheduled_key(), payload, at.timestamp_millis()).await?;
            }
            None => {
                let _: () = conn.lpush(self.queue_key(job.queue), payload).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    fn identifier(&self) -> &str {
        "redis"
    }

    async fn enqueue(&self, job: Job) -> Result<EnqueueOutcome> {
        let mut conn = self.conn.clone();
        let claimed: Option<String> = redis::cmd("SET")
            .arg(self.unique_key(&job.id))
            .arg(job.queue.as_str())
            .arg("NX")
            .arg("PX")
            .arg(self.retention_ms())
            .query_async(&mut conn)
            .await?;

        if claimed.is_none() {
            debug!(job_id = %job.id, "Duplicate enqueue ignored");
            return Ok(EnqueueOutcome::Duplicate);
        }

        self.place(&job).await?;
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn dequeue(&self, queue: QueueName) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let promoted: i64 = self
            .promote
            .key(self.scheduled_key())
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .arg(self.queue_key_prefix())
            .invoke_async(&mut conn)
            .await?;
        if promoted > 0 {
            debug!(promoted, "Promoted scheduled jobs");
        }
        self.reclaim_expired().await?;

        let deadline = Utc::now().timestamp_millis() + self.visibility_timeout.as_millis().min(i64::MAX as u128) as i64;
        let payload: Option<String> = self
            .dequeue
            .key(self.queue_key(queue))
            .key(self.inflight_key())
            .key(self.deadlines_key())
            .arg(deadline)
            .invoke_async(&mut conn)
            .await?;

        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    async fn complete(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.clone();
        self.release(&mut conn, &job.id).await?;
        let _: () = redis::cmd("SET")
            .arg(self.unique_key(&job.id))
            .arg(job.queue.as_str())
            .arg("PX")
            .arg(self.retention_ms())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn retry(&self, job: Job, delay: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        self.release(&mut conn, &job.id).await?;
        let at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let payload = serde_json::to_string(&job.process_at(at))?;
        let _: () = conn.zadd(self.scheduled_key(), payload, at.timestamp_millis()).await?;
        Ok(())
    }

    async fn kill(&self, job: Job, error: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.release(&mut conn, &job.id).await?;
        let dead = DeadJob { job, error: error.to_string(), died_at: Utc::now() };
        let _: () = conn.lpush(self.dead_key(), serde_json::to_string(&dead)?).await?;
        let _: () = conn.ltrim(self.dead_key(), 0, DEAD_CAPACITY - 1).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.conn.clone();
        let mut stats = QueueStats::default();
        for queue in QueueName::ALL {
            let len: u64 = conn.llen(self.queue_key(queue)).await?;
            stats.pending.insert(queue.as_str().to_string(), len);
        }
        stats.scheduled = conn.zcard(self.scheduled_key()).await?;
        stats.in_flight = conn.hlen(self.inflight_key()).await?;
        stats.dead = conn.llen(self.dead_key()).await?;
        Ok(stats)
    }

    async fn dead_jobs(&self, limit: usize) -> Result<Vec<DeadJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(self.dead_key(), 0, limit as isize - 1).await?;
        Ok(raw.iter().filter_map(|p| serde_json::from_str(p).ok()).collect())
    }
}
