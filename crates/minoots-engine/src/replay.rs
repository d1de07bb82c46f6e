//! Replay Queue and `Replay`.

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::lifecycle::create_timer;
use crate::store::{
    DurableStore, ReplayHistoryEntry, ReplayQueueEntry, ReplayQueueStatus,
};
use crate::timer::{merge_json, Timer, TimerConfig};

/// Default replay queue drain batch size.
pub const DEFAULT_REPLAY_SWEEP_BATCH: usize = 25;
/// Default replay queue retention before purge.
pub const DEFAULT_REPLAY_RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1000;
/// Default per-run cleanup cap.
pub const DEFAULT_REPLAY_CLEANUP_BATCH: usize = 200;

/// Enqueues a replay entry for a failed timer. Deduplicates: returns
/// `Ok(None)` without writing anything if a `pending` entry for this timer
/// already exists — a replay loop already in flight is not an error.
pub async fn enqueue_replay(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    timer: &Timer,
    reason: String,
    attempts: i64,
    failure: Option<String>,
    triggered_by: Option<String>,
) -> Result<Option<ReplayQueueEntry>> {
    if store.get_pending_replay_entry(&timer.id).await?.is_some() {
        return Ok(None);
    }

    let entry = ReplayQueueEntry {
        id: Uuid::new_v4().to_string(),
        timer_id: timer.id.clone(),
        team_id: timer.team_id.clone(),
        status: ReplayQueueStatus::Pending,
        reason,
        attempts,
        payload: timer.clone(),
        enqueued_at_ms: clock.now_ms(),
        last_attempt_at_ms: None,
        processed_at_ms: None,
        replay_timer_id: None,
        last_error: failure,
        error_count: 0,
    };
    let _ = triggered_by; // carried through the payload snapshot, not a separate column

    store.put_replay_entry(entry.clone()).await?;
    Ok(Some(entry))
}

/// Options for [`replay_timer`].
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    pub reason: String,
    pub payload: Option<Timer>,
    pub requested_by: Option<String>,
    pub queue_entry_id: Option<String>,
    pub metadata_overrides: Option<Value>,
    pub context_overrides: Option<Value>,
    /// Defaults to `true` when unset via `Default`; callers typically
    /// leave this alone. See [`ReplayOptions::with_defaults`].
    pub include_replay_metadata: bool,
}

impl ReplayOptions {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            include_replay_metadata: true,
..Default::default()
        }
    }
}

/// `ReplayTimer`: builds a fresh, unblocked timer from a prior
/// timer's snapshot and links the two via replay history.
pub async fn replay_timer(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    worker_count: i64,
    timer_id: &str,
    options: ReplayOptions,
) -> Result<Timer> {
    let source = match &options.payload {
        Some(snapshot) => snapshot.clone(),
        None => store
.get_timer(timer_id)
.await?
.ok_or_else(|| EngineError::NotFound(timer_id.to_string()))?,
    };

    if source.duration_ms < 0 {
        return Err(EngineError::MissingDuration);
    }

    let mut metadata = merge_json(
        &source.metadata,
        options.metadata_overrides.as_ref().unwrap_or(&Value::Null),
    );
    let context = merge_json(
        &source.context,
        options.context_overrides.as_ref().unwrap_or(&Value::Null),
    );

    if options.include_replay_metadata {
        let mut map = metadata.as_object().cloned().unwrap_or_default();
        map.insert("replayOf".to_string(), Value::String(source.id.clone()));
        map.insert("replayReason".to_string(), Value::String(options.reason.clone()));
        metadata = Value::Object(map);
    }

    let config = TimerConfig {
        name: Some(
            source
.name
.clone()
.unwrap_or_else(|| format!("replay_{}", source.id)),
        ),
        owner_agent_id: source.owner_agent_id.clone(),
        team_id: source.team_id.clone(),
        created_by: options.requested_by.clone(),
        duration: Some(Value::from(source.duration_ms)),
        dependencies: Vec::new(),
        conditions: Value::Array(Vec::new()),
        context,
        metadata,
        events: Some(source.events.clone()),
        retry_policy: source.retry_policy.clone(),
        chain_id: source.chain_id.clone(),
        template_id: source.template_id.clone(),
        scenario: source.scenario.clone(),
        load_balancing_key: source.load_balancing_key.clone(),
    };

    let replay = create_timer(store, clock, worker_count, config).await?;

    store
.append_replay_history(ReplayHistoryEntry {
            id: 0,
            source_timer_id: source.id.clone(),
            replay_timer_id: replay.id.clone(),
            reason: options.reason.clone(),
            requested_by: options.requested_by.clone(),
            queue_entry_id: options.queue_entry_id.clone(),
            team_id: source.team_id.clone(),
            created_at_ms: clock.now_ms(),
        })
.await?;

    info!(source_timer_id = %source.id, replay_timer_id = %replay.id, "timer replayed");
    Ok(replay)
}

/// `ProcessReplayQueue`: drains up to `limit` pending
/// entries, oldest first. Per-item failures mark the entry `error` and do
/// not requeue within the same tick.
pub async fn process_replay_queue(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    worker_count: i64,
    limit: usize,
) -> Result<Vec<(String, String)>> {
    let due = store.due_replay_entries(limit).await?;
    let mut results = Vec::new();

    for mut entry in due {
        entry.status = ReplayQueueStatus::Processing;
        entry.last_attempt_at_ms = Some(clock.now_ms());
        store.put_replay_entry(entry.clone()).await?;

        let options = ReplayOptions {
            reason: entry.reason.clone(),
            payload: Some(entry.payload.clone()),
            requested_by: None,
            queue_entry_id: Some(entry.id.clone()),
            metadata_overrides: None,
            context_overrides: None,
            include_replay_metadata: true,
        };

        match replay_timer(store, clock, worker_count, &entry.timer_id, options).await {
            Ok(new_timer) => {
                entry.status = ReplayQueueStatus::Processed;
                entry.replay_timer_id = Some(new_timer.id.clone());
                entry.processed_at_ms = Some(clock.now_ms());
                store.put_replay_entry(entry.clone()).await?;
                results.push((entry.id.clone(), new_timer.id));
            }
            Err(e) => {
                warn!(queue_entry_id = %entry.id, error = %e, "replay drain failed");
                entry.status = ReplayQueueStatus::Error;
                entry.last_error = Some(e.to_string());
                entry.error_count += 1;
                store.put_replay_entry(entry.clone()).await?;
            }
        }
    }

    Ok(results)
}

/// `CleanupReplayQueue`: purges `processed`/`error`
/// rows past retention, up to `max_batch_size`.
pub async fn cleanup_replay_queue(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    retention_ms: i64,
    max_batch_size: usize,
) -> Result<usize> {
    let older_than_ms = clock.now_ms() - retention_ms;
    let purgeable = store
.purgeable_replay_entries(older_than_ms, max_batch_size)
.await?;
    let count = purgeable.len();
    for entry in purgeable {
        store.delete_replay_entry(&entry.id).await?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::lifecycle::create_timer;
    use crate::store::InMemoryStore;
    use crate::timer::TimerConfig;
    use serde_json::json;

    async fn sample_timer(store: &InMemoryStore, clock: &TestClock) -> Timer {
        create_timer(
            store,
            clock,
            5,
            TimerConfig {
                duration: Some(json!("10ms")),
                team_id: Some("team-A".to_string()),
..Default::default()
            },
        )
.await
.unwrap()
    }

    #[tokio::test]
    async fn enqueue_deduplicates() {
        let store = InMemoryStore::new();
        let clock = TestClock::new(0);
        let timer = sample_timer(&store, &clock).await;

        let first = enqueue_replay(&store, &clock, &timer, "webhook_failed".into(), 1, None, None)
.await
.unwrap();
        assert!(first.is_some());

        let second = enqueue_replay(&store, &clock, &timer, "webhook_failed".into(), 1, None, None)
.await
.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn replay_links_lineage_and_resets_dependencies() {
        let store = InMemoryStore::new();
        let clock = TestClock::new(0);
        let mut timer = sample_timer(&store, &clock).await;
        timer.dependencies.insert("some-other-dep".into());
        store.put_timer(timer.clone()).await.unwrap();

        let replayed = replay_timer(&store, &clock, 5, &timer.id, ReplayOptions::new("manual"))
.await
.unwrap();

        assert!(replayed.dependencies.is_empty());
        assert_eq!(replayed.metadata["replayOf"], json!(timer.id));
        assert_eq!(replayed.metadata["replayReason"], json!("manual"));

        let history = store.replay_history_for(&timer.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].replay_timer_id, replayed.id);
    }

    #[tokio::test]
    async fn replay_lineage_is_not_transitive() {
        let store = InMemoryStore::new();
        let clock = TestClock::new(0);
        let timer = sample_timer(&store, &clock).await;

        let first_replay = replay_timer(&store, &clock, 5, &timer.id, ReplayOptions::new("one"))
.await
.unwrap();
        let second_replay = replay_timer(
            &store,
            &clock,
            5,
            &first_replay.id,
            ReplayOptions::new("two"),
        )
.await
.unwrap();

        assert_eq!(second_replay.metadata["replayOf"], json!(first_replay.id));
        assert_ne!(second_replay.metadata["replayOf"], json!(timer.id));
    }

    #[tokio::test]
    async fn drain_processes_pending_entries_and_links_replay_timer() {
        let store = InMemoryStore::new();
        let clock = TestClock::new(0);
        let timer = sample_timer(&store, &clock).await;
        enqueue_replay(&store, &clock, &timer, "webhook_failed".into(), 1, None, None)
.await
.unwrap();

        let results = process_replay_queue(&store, &clock, 5, 25).await.unwrap();
        assert_eq!(results.len(), 1);

        let pending = store.get_pending_replay_entry(&timer.id).await.unwrap();
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn cleanup_purges_only_past_retention() {
        let store = InMemoryStore::new();
        let clock = TestClock::new(0);
        let timer = sample_timer(&store, &clock).await;
        let entry = enqueue_replay(&store, &clock, &timer, "webhook_failed".into(), 1, None, None)
.await
.unwrap()
.unwrap();

        // Mark processed at t=0.
        let mut processed = entry.clone();
        processed.status = ReplayQueueStatus::Processed;
        processed.processed_at_ms = Some(0);
        store.put_replay_entry(processed).await.unwrap();

        clock.set(1000);
        let purged = cleanup_replay_queue(&store, &clock, 2000, 200).await.unwrap();
        assert_eq!(purged, 0);

        clock.set(3000);
        let purged = cleanup_replay_queue(&store, &clock, 2000, 200).await.unwrap();
        assert_eq!(purged, 1);
    }
}
