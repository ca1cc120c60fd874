//! Redis job store implementation.

use super::RedisKeys;
use crate::config::RedisConfig;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobKey, JobRequest};
use crate::store::{JobStore, QueueStats};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use deadpool_redis::Pool;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

/// Pops the head of the pending list and records it as in flight.
///
/// Returns nil when empty, `{1, job}` on success and `{0, raw}` when the
/// head entry is not a decodable job (it is dropped so the queue keeps
/// moving). Nothing after the `LPOP` may raise: Redis keeps the pop.
const DEQUEUE_SCRIPT: &str = r#"
local raw = redis.call('LPOP', KEYS[1])
if not raw then
    return nil
end
local ok, job = pcall(cjson.decode, raw)
if not ok or type(job) ~= 'table' or type(job.key) ~= 'table'
    or type(job.key.record_id) ~= 'string'
    or type(job.key.secondary_id) ~= 'string' then
    return {0, raw}
end
job.status = 'processing'
job.started_at = ARGV[1]
local encoded = cjson.encode(job)
redis.call('HSET', KEYS[2], job.key.record_id .. ':' .. job.key.secondary_id, encoded)
return {1, encoded}
"#;

/// Moves every in-flight job to the tail of the pending list, oldest start
/// first. Returns `{restored, dropped}`: the restored jobs and the raw
/// entries that could not be decoded (they are deleted with the map).
const RESTORE_SCRIPT: &str = r#"
local raws = redis.call('HVALS', KEYS[1])
local jobs = {}
local dropped = {}
for _, raw in ipairs(raws) do
    local ok, job = pcall(cjson.decode, raw)
    if ok and type(job) == 'table' then
        table.insert(jobs, job)
    else
        table.insert(dropped, raw)
    end
end
table.sort(jobs, function(a, b)
    local sa = type(a.started_at) == 'string' and a.started_at or ''
    local sb = type(b.started_at) == 'string' and b.started_at or ''
    return sa < sb
end)
local restored = {}
for _, job in ipairs(jobs) do
    job.status = 'pending'
    job.restored_at = ARGV[1]
    local encoded = cjson.encode(job)
    redis.call('RPUSH', KEYS[2], encoded)
    table.insert(restored, encoded)
end
redis.call('DEL', KEYS[1])
return {restored, dropped}
"#;

/// Increments the failure count of one key and clears it once it reaches
/// the threshold. Returns the count reached.
const COUNT_FAILURE_SCRIPT: &str = r#"
local count = redis.call('HINCRBY', KEYS[1], ARGV[1], 1)
if count >= tonumber(ARGV[2]) then
    redis.call('HDEL', KEYS[1], ARGV[1])
end
return count
"#;

/// Moves one in-flight job back to the tail of the pending list. Returns 0
/// when the job was not in flight.
const REQUEUE_SCRIPT: &str = r#"
if redis.call('HDEL', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('RPUSH', KEYS[2], ARGV[2])
return 1
"#;

/// Redis-backed job store.
pub struct RedisJobStore {
    pool: Pool,
    keys: RedisKeys,
    dequeue_script: Script,
    restore_script: Script,
    requeue_script: Script,
    count_failure_script: Script,
}

impl RedisJobStore {
    /// Create a new Redis job store.
    pub fn new(pool: Pool, config: &RedisConfig) -> Self {
        Self::with_keys(pool, RedisKeys::new(&config.key_prefix))
    }

    /// Create a store using explicit keys.
    pub fn with_keys(pool: Pool, keys: RedisKeys) -> Self {
        Self {
            pool,
            keys,
            dequeue_script: Script::new(DEQUEUE_SCRIPT),
            restore_script: Script::new(RESTORE_SCRIPT),
            requeue_script: Script::new(REQUEUE_SCRIPT),
            count_failure_script: Script::new(COUNT_FAILURE_SCRIPT),
        }
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    fn timestamp() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn decode_all(entries: Vec<String>, collection: &str) -> Vec<Job> {
        entries
            .into_iter()
            .filter_map(|json| match Job::from_json(&json) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(collection, error = %e, "Skipping undecodable job entry");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(&self, request: JobRequest) -> JobResult<Job> {
        let job = Job::new(request)?;
        let json = job.to_json()?;

        let mut conn = self.conn().await?;
        let len: u64 = conn.rpush(self.keys.pending(), json).await?;

        debug!(key = %job.key, pending = len, "Job enqueued");
        Ok(job)
    }

    async fn dequeue_next(&self) -> JobResult<Option<Job>> {
        let mut conn = self.conn().await?;

        loop {
            let popped: Option<(i64, String)> = self
                .dequeue_script
                .key(self.keys.pending())
                .key(self.keys.inflight())
                .arg(Self::timestamp())
                .invoke_async(&mut *conn)
                .await?;

            match popped {
                None => return Ok(None),
                Some((1, json)) => return Ok(Some(Job::from_json(&json)?)),
                Some((_, raw)) => {
                    warn!(entry = %raw, "Dropped undecodable entry from the pending queue");
                }
            }
        }
    }

    async fn mark_done(&self, job: &Job, success: bool) -> JobResult<Job> {
        let mut done = job.clone();
        done.mark_finished(success, Utc::now());
        let field = done.key.field();
        let json = done.to_json()?;

        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .hdel(self.keys.inflight(), &field)
            .ignore()
            .hset(self.keys.completed(), &field, json)
            .ignore()
            .query_async(&mut *conn)
            .await?;

        debug!(key = %done.key, success, "Job marked done");
        Ok(done)
    }

    async fn requeue(&self, job: &Job) -> JobResult<()> {
        let mut queued = job.clone();
        queued.mark_requeued();
        let field = queued.key.field();
        let json = queued.to_json()?;

        let mut conn = self.conn().await?;
        let moved: i64 = self
            .requeue_script
            .key(self.keys.inflight())
            .key(self.keys.pending())
            .arg(&field)
            .arg(json)
            .invoke_async(&mut *conn)
            .await?;

        if moved == 0 {
            return Err(JobError::NotFound(field));
        }
        debug!(key = %queued.key, "Job requeued");
        Ok(())
    }

    async fn restore_interrupted(&self) -> JobResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let (restored, dropped): (Vec<String>, Vec<String>) = self
            .restore_script
            .key(self.keys.inflight())
            .key(self.keys.pending())
            .arg(Self::timestamp())
            .invoke_async(&mut *conn)
            .await?;

        for raw in &dropped {
            warn!(entry = %raw, "Dropped undecodable entry from the in-flight map");
        }
        if !restored.is_empty() {
            info!(count = restored.len(), "Restored interrupted jobs to the pending queue");
        }
        Ok(Self::decode_all(restored, "pending"))
    }

    async fn stats(&self) -> JobResult<QueueStats> {
        let mut conn = self.conn().await?;
        let (pending, inflight, completed, failures): (u64, u64, u64, u64) = redis::pipe()
            .llen(self.keys.pending())
            .hlen(self.keys.inflight())
            .hlen(self.keys.completed())
            .hlen(self.keys.failures())
            .query_async(&mut *conn)
            .await?;

        Ok(QueueStats {
            pending,
            inflight,
            completed,
            failures,
        })
    }

    async fn list_pending(&self) -> JobResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let entries: Vec<String> = conn.lrange(self.keys.pending(), 0, -1).await?;
        Ok(Self::decode_all(entries, "pending"))
    }

    async fn list_inflight(&self) -> JobResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let entries: Vec<String> = conn.hvals(self.keys.inflight()).await?;
        Ok(Self::decode_all(entries, "inflight"))
    }

    async fn list_completed(&self) -> JobResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let entries: Vec<String> = conn.hvals(self.keys.completed()).await?;
        Ok(Self::decode_all(entries, "completed"))
    }

    async fn failure_count(&self, key: &JobKey) -> JobResult<u32> {
        let mut conn = self.conn().await?;
        let count: Option<u32> = conn.hget(self.keys.failures(), key.field()).await?;
        Ok(count.unwrap_or(0))
    }

    async fn count_failure(&self, key: &JobKey, threshold: u32) -> JobResult<u32> {
        let mut conn = self.conn().await?;
        let count: u32 = self
            .count_failure_script
            .key(self.keys.failures())
            .arg(key.field())
            .arg(threshold)
            .invoke_async(&mut *conn)
            .await?;
        Ok(count)
    }

    async fn reset_failures(&self, key: &JobKey) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: u64 = conn.hdel(self.keys.failures(), key.field()).await?;
        Ok(())
    }

    async fn clear_pending(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let (dropped, _): (u64, u64) = redis::pipe()
            .atomic()
            .llen(self.keys.pending())
            .del(self.keys.pending())
            .query_async(&mut *conn)
            .await?;

        info!(count = dropped, "Cleared pending queue");
        Ok(dropped)
    }

    async fn clear_all(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: u64 = conn
            .del(vec![
                self.keys.pending(),
                self.keys.inflight(),
                self.keys.completed(),
                self.keys.failures(),
            ])
            .await?;

        info!("Cleared all queue collections");
        Ok(())
    }

    async fn health_check(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok(())
    }
}
