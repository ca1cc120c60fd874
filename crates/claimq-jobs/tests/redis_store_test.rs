//! Integration tests for RedisJobStore.
//!
//! These tests run against a real Redis server using testcontainers.
//! Requires Docker; run with `cargo test -- --ignored`.

mod common;

use claimq_jobs::{
    create_pool, Job, JobError, JobKey, JobRequest, JobStatus, JobStore, QueueStats, RedisKeys,
};
use common::TestRedis;
use redis::AsyncCommands;

#[tokio::test]
#[ignore = "requires docker"]
async fn test_fifo_and_dequeue_moves_state() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;

    for record in ["1", "2", "3"] {
        store.enqueue(JobRequest::new(record, "V")).await.unwrap();
    }

    let first = store.dequeue_next().await.unwrap().unwrap();
    assert_eq!(first.key.record_id, "1");
    assert_eq!(first.status, JobStatus::Processing);
    assert!(first.started_at.is_some());

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.inflight, 1);

    let inflight = store.list_inflight().await.unwrap();
    assert_eq!(inflight[0].key, first.key);

    assert_eq!(store.dequeue_next().await.unwrap().unwrap().key.record_id, "2");
    assert_eq!(store.dequeue_next().await.unwrap().unwrap().key.record_id, "3");
    assert!(store.dequeue_next().await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_reference_scenario() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;

    store.enqueue(JobRequest::new("100", "ABC")).await.unwrap();
    let job = store.dequeue_next().await.unwrap().unwrap();
    let done = store.mark_done(&job, true).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(
        store.stats().await.unwrap(),
        QueueStats {
            pending: 0,
            inflight: 0,
            completed: 1,
            failures: 0,
        }
    );

    let completed = store.list_completed().await.unwrap();
    assert_eq!(completed[0].key, JobKey::new("100", "ABC"));
    assert_eq!(completed[0].success, Some(true));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_restore_interrupted() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;

    for i in 0..3 {
        store
            .enqueue(JobRequest::new(i.to_string(), "V").credentials("agent", "s3cret"))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        store.dequeue_next().await.unwrap().unwrap();
    }

    let restored = store.restore_interrupted().await.unwrap();
    assert_eq!(restored.len(), 3);
    assert!(restored.iter().all(|job| job.status == JobStatus::Pending));
    assert!(restored.iter().all(|job| job.restored_at.is_some()));
    assert_eq!(
        restored[0].payload.credentials.as_ref().unwrap().password,
        "s3cret"
    );

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.pending, 3);
    assert_eq!(stats.inflight, 0);

    assert!(store.restore_interrupted().await.unwrap().is_empty());
    assert_eq!(store.stats().await.unwrap().pending, 3);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_requeue() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;

    store.enqueue(JobRequest::new("1", "A")).await.unwrap();
    store.enqueue(JobRequest::new("2", "B")).await.unwrap();
    let first = store.dequeue_next().await.unwrap().unwrap();

    store.requeue(&first).await.unwrap();

    let pending = store.list_pending().await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[1].key, first.key);
    assert_eq!(pending[1].status, JobStatus::Pending);

    let err = store.requeue(&first).await.unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_failure_counter_reset_removes_field() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;
    let key = JobKey::new("100", "ABC");

    for expected in 1..=9 {
        assert_eq!(store.count_failure(&key, 10).await.unwrap(), expected);
    }
    assert_eq!(store.failure_count(&key).await.unwrap(), 9);
    assert_eq!(store.stats().await.unwrap().failures, 1);

    store.reset_failures(&key).await.unwrap();
    assert_eq!(store.failure_count(&key).await.unwrap(), 0);

    let pool = create_pool(redis.config()).await.unwrap();
    let mut conn = pool.get().await.unwrap();
    let keys = RedisKeys::new(&redis.config().key_prefix);
    let exists: bool = conn.hexists(keys.failures(), key.field()).await.unwrap();
    assert!(!exists);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_failure_counter_clears_at_threshold() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;
    let key = JobKey::new("100", "ABC");

    assert_eq!(store.count_failure(&key, 2).await.unwrap(), 1);
    assert_eq!(store.count_failure(&key, 2).await.unwrap(), 2);
    assert_eq!(store.failure_count(&key).await.unwrap(), 0);
    assert_eq!(store.stats().await.unwrap().failures, 0);
    assert_eq!(store.count_failure(&key, 2).await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_undecodable_head_is_skipped() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;

    let pool = create_pool(redis.config()).await.unwrap();
    let mut conn = pool.get().await.unwrap();
    let keys = RedisKeys::new(&redis.config().key_prefix);
    let _: u64 = conn.rpush(keys.pending(), "not json").await.unwrap();
    store.enqueue(JobRequest::new("1", "A")).await.unwrap();

    let job = store.dequeue_next().await.unwrap().unwrap();
    assert_eq!(job.key.record_id, "1");
    assert_eq!(store.stats().await.unwrap().pending, 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_head_with_non_string_id_is_skipped() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;

    let pool = create_pool(redis.config()).await.unwrap();
    let mut conn = pool.get().await.unwrap();
    let keys = RedisKeys::new(&redis.config().key_prefix);
    let _: u64 = conn
        .rpush(keys.pending(), r#"{"key":{"record_id":true,"secondary_id":"A"}}"#)
        .await
        .unwrap();
    store.enqueue(JobRequest::new("1", "A")).await.unwrap();

    let job = store.dequeue_next().await.unwrap().unwrap();
    assert_eq!(job.key.record_id, "1");
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.inflight, 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_restore_drops_undecodable_inflight_entries() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;

    store.enqueue(JobRequest::new("1", "A")).await.unwrap();
    store.dequeue_next().await.unwrap().unwrap();

    let pool = create_pool(redis.config()).await.unwrap();
    let mut conn = pool.get().await.unwrap();
    let keys = RedisKeys::new(&redis.config().key_prefix);
    let _: u64 = conn.hset(keys.inflight(), "9:Z", "not json").await.unwrap();

    let restored = store.restore_interrupted().await.unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].key.record_id, "1");
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.inflight, 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_clear_pending_and_clear_all() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;

    store.enqueue(JobRequest::new("1", "A")).await.unwrap();
    let job = store.dequeue_next().await.unwrap().unwrap();
    store.mark_done(&job, false).await.unwrap();
    store.enqueue(JobRequest::new("2", "B")).await.unwrap();
    store.enqueue(JobRequest::new("3", "C")).await.unwrap();
    store.dequeue_next().await.unwrap().unwrap();
    store.enqueue(JobRequest::new("4", "D")).await.unwrap();
    store.count_failure(&job.key, 10).await.unwrap();

    assert_eq!(store.clear_pending().await.unwrap(), 1);
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.inflight, 1);
    assert_eq!(stats.completed, 1);

    store.clear_all().await.unwrap();
    assert_eq!(store.stats().await.unwrap(), QueueStats::default());
    store.health_check().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_stored_job_is_readable_json() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;

    store
        .enqueue(JobRequest::new("100", "ABC").collect_diagrams(false))
        .await
        .unwrap();

    let pool = create_pool(redis.config()).await.unwrap();
    let mut conn = pool.get().await.unwrap();
    let keys = RedisKeys::new(&redis.config().key_prefix);
    let raw: Vec<String> = conn.lrange(keys.pending(), 0, -1).await.unwrap();
    let job = Job::from_json(&raw[0]).unwrap();

    assert_eq!(job.key.field(), "100:ABC");
    assert!(!job.payload.collect_diagrams);
}
