//! The durable store interface and an in-memory reference implementation.
//!
//! Modeled on a `MachineStore`/`InMemoryStore` pattern: a single async trait
//! collapses every storage concern the engine needs (timers, expiration
//! records, event log, team metrics, replay queue, replay history,
//! schedules, templates) so a real deployment can swap in Postgres,
//! Firestore, or anything else without the engine's logic changing. This
//! crate ships exactly one implementation, built on `dashmap`, which is
//! both the test double and a legitimate single-process deployment target.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::schedule::CronSchedule;
use crate::timer::{Timer, TimerFilters, TimerStatus};

/// Deadline index entry; exists only for timers in `running`/`retrying`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpirationRecord {
    pub timer_id: String,
    pub expires_at_ms: i64,
    pub status: TimerStatus,
    pub worker: String,
}

/// Append-only lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerEventKind {
    Activated,
    Skipped,
    RetryScheduled,
    Expired,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerEventLogEntry {
    pub id: i64,
    pub timer_id: String,
    pub event: TimerEventKind,
    pub team_id: Option<String>,
    pub attempt: Option<i64>,
    pub delay_ms: Option<i64>,
    pub failure_reason: Option<String>,
    pub timestamp_ms: i64,
}

/// Per-team, per-fire-attempt performance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMetric {
    pub id: i64,
    pub timer_id: String,
    pub team_id: Option<String>,
    pub event: TimerEventKind,
    pub drift_ms: i64,
    pub webhook_latency_ms: Option<i64>,
    pub success: bool,
    pub attempt: i64,
    pub created_at_ms: i64,
}

/// Replay queue entry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayQueueStatus {
    Pending,
    Processing,
    Processed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayQueueEntry {
    pub id: String,
    pub timer_id: String,
    pub team_id: Option<String>,
    pub status: ReplayQueueStatus,
    pub reason: String,
    pub attempts: i64,
    pub payload: Timer,
    pub enqueued_at_ms: i64,
    pub last_attempt_at_ms: Option<i64>,
    pub processed_at_ms: Option<i64>,
    pub replay_timer_id: Option<String>,
    pub last_error: Option<String>,
    pub error_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayHistoryEntry {
    pub id: i64,
    pub source_timer_id: String,
    pub replay_timer_id: String,
    pub reason: String,
    pub requested_by: Option<String>,
    pub queue_entry_id: Option<String>,
    pub team_id: Option<String>,
    pub created_at_ms: i64,
}

/// Deletion-metrics record appended by cascade delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionMetrics {
    pub id: i64,
    pub timer_id: String,
    pub team_id: Option<String>,
    pub counts: DeletionCounts,
    pub reason: Option<String>,
    pub triggered_at_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionCounts {
    pub logs: i64,
    pub metrics: i64,
    pub replay_entries: i64,
}

/// A reusable timer config template, referenced by a [`CronSchedule`]'s
/// `template_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub config: Value,
}

/// The durable store interface. Every mutation is scoped to one document;
/// the engine never requires multi-document transactions.
#[async_trait]
pub trait DurableStore: Send + Sync {
    // Timers
    async fn put_timer(&self, timer: Timer) -> Result<(), StoreError>;
    async fn get_timer(&self, id: &str) -> Result<Option<Timer>, StoreError>;
    async fn list_timers(&self, filters: &TimerFilters) -> Result<Vec<Timer>, StoreError>;
    async fn delete_timer(&self, id: &str) -> Result<(), StoreError>;
    /// Timers whose `dependencies` set contains `id` (back-index query
    /// rather than a mutable in-memory graph of dependents).
    async fn list_dependents(&self, id: &str) -> Result<Vec<Timer>, StoreError>;

    // Expiration records
    async fn put_expiration(&self, record: ExpirationRecord) -> Result<(), StoreError>;
    async fn delete_expiration(&self, timer_id: &str) -> Result<(), StoreError>;
    async fn due_expirations(&self, now_ms: i64, limit: usize) -> Result<Vec<ExpirationRecord>, StoreError>;

    // Event log
    async fn append_event(&self, entry: TimerEventLogEntry) -> Result<(), StoreError>;
    async fn list_events(&self, timer_id: &str) -> Result<Vec<TimerEventLogEntry>, StoreError>;
    async fn delete_events(&self, timer_id: &str) -> Result<i64, StoreError>;

    // Team metrics
    async fn append_metric(&self, metric: TeamMetric) -> Result<(), StoreError>;
    async fn list_metrics(&self, timer_id: &str) -> Result<Vec<TeamMetric>, StoreError>;
    async fn delete_metrics(&self, timer_id: &str) -> Result<i64, StoreError>;

    // Replay queue
    async fn put_replay_entry(&self, entry: ReplayQueueEntry) -> Result<(), StoreError>;
    async fn get_pending_replay_entry(&self, timer_id: &str) -> Result<Option<ReplayQueueEntry>, StoreError>;
    async fn due_replay_entries(&self, limit: usize) -> Result<Vec<ReplayQueueEntry>, StoreError>;
    async fn purgeable_replay_entries(
        &self,
        older_than_ms: i64,
        limit: usize,
    ) -> Result<Vec<ReplayQueueEntry>, StoreError>;
    async fn delete_replay_entry(&self, id: &str) -> Result<(), StoreError>;
    async fn delete_replay_entries_for_timer(&self, timer_id: &str) -> Result<i64, StoreError>;

    // Replay history
    async fn append_replay_history(&self, entry: ReplayHistoryEntry) -> Result<(), StoreError>;

    // Deletion metrics
    async fn append_deletion_metrics(&self, record: DeletionMetrics) -> Result<(), StoreError>;

    // Schedules
    async fn put_schedule(&self, schedule: CronSchedule) -> Result<(), StoreError>;
    async fn get_schedule(&self, id: &str) -> Result<Option<CronSchedule>, StoreError>;
    async fn due_schedules(&self, now_ms: i64, limit: usize) -> Result<Vec<CronSchedule>, StoreError>;

    // Templates
    async fn get_template(&self, id: &str) -> Result<Option<Template>, StoreError>;

    // Cleanup: expired timers past retention
    async fn purgeable_expired_timers(&self, older_than_ms: i64) -> Result<Vec<String>, StoreError>;
}

/// In-memory reference implementation, built on `dashmap::DashMap`.
#[derive(Default)]
pub struct InMemoryStore {
    timers: DashMap<String, Timer>,
    expirations: DashMap<String, ExpirationRecord>,
    events: DashMap<i64, TimerEventLogEntry>,
    metrics: DashMap<i64, TeamMetric>,
    replay_queue: DashMap<String, ReplayQueueEntry>,
    replay_history: DashMap<i64, ReplayHistoryEntry>,
    deletion_metrics: DashMap<i64, DeletionMetrics>,
    schedules: DashMap<String, CronSchedule>,
    templates: DashMap<String, Template>,
    next_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn seed_template(&self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }

    /// Test/audit accessor: all replay history rows naming `source_timer_id`.
    pub fn replay_history_for(&self, source_timer_id: &str) -> Vec<ReplayHistoryEntry> {
        self.replay_history
.iter()
.filter(|e| e.source_timer_id == source_timer_id)
.map(|e| e.clone())
.collect()
    }

    /// Test/audit accessor: all deletion-metrics rows for a timer.
    pub fn deletion_metrics_for(&self, timer_id: &str) -> Vec<DeletionMetrics> {
        self.deletion_metrics
.iter()
.filter(|e| e.timer_id == timer_id)
.map(|e| e.clone())
.collect()
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn put_timer(&self, timer: Timer) -> Result<(), StoreError> {
        self.timers.insert(timer.id.clone(), timer);
        Ok(())
    }

    async fn get_timer(&self, id: &str) -> Result<Option<Timer>, StoreError> {
        Ok(self.timers.get(id).map(|t| t.clone()))
    }

    async fn list_timers(&self, filters: &TimerFilters) -> Result<Vec<Timer>, StoreError> {
        Ok(self
.timers
.iter()
.map(|t| t.clone())
.filter(|t| {
                filters
.agent_id
.as_ref()
.map(|a| t.owner_agent_id.as_deref() == Some(a.as_str()))
.unwrap_or(true)
            })
.filter(|t| {
                filters
.team_id
.as_ref()
.map(|tm| t.team_id.as_deref() == Some(tm.as_str()))
.unwrap_or(true)
            })
.filter(|t| filters.status.map(|s| t.status == s).unwrap_or(true))
.collect())
    }

    async fn delete_timer(&self, id: &str) -> Result<(), StoreError> {
        self.timers.remove(id);
        Ok(())
    }

    async fn list_dependents(&self, id: &str) -> Result<Vec<Timer>, StoreError> {
        Ok(self
.timers
.iter()
.filter(|t| t.dependencies.contains(id))
.map(|t| t.clone())
.collect())
    }

    async fn put_expiration(&self, record: ExpirationRecord) -> Result<(), StoreError> {
        self.expirations.insert(record.timer_id.clone(), record);
        Ok(())
    }

    async fn delete_expiration(&self, timer_id: &str) -> Result<(), StoreError> {
        self.expirations.remove(timer_id);
        Ok(())
    }

    async fn due_expirations(&self, now_ms: i64, limit: usize) -> Result<Vec<ExpirationRecord>, StoreError> {
        let mut due: Vec<_> = self
.expirations
.iter()
.filter(|e| e.expires_at_ms <= now_ms)
.map(|e| e.clone())
.collect();
        due.sort_by_key(|e| e.expires_at_ms);
        due.truncate(limit);
        Ok(due)
    }

    async fn append_event(&self, mut entry: TimerEventLogEntry) -> Result<(), StoreError> {
        entry.id = self.next_id();
        self.events.insert(entry.id, entry);
        Ok(())
    }

    async fn list_events(&self, timer_id: &str) -> Result<Vec<TimerEventLogEntry>, StoreError> {
        Ok(self
.events
.iter()
.filter(|e| e.timer_id == timer_id)
.map(|e| e.clone())
.collect())
    }

    async fn delete_events(&self, timer_id: &str) -> Result<i64, StoreError> {
        let ids: Vec<i64> = self
.events
.iter()
.filter(|e| e.timer_id == timer_id)
.map(|e| *e.key())
.collect();
        for id in &ids {
            self.events.remove(id);
        }
        Ok(ids.len() as i64)
    }

    async fn append_metric(&self, mut metric: TeamMetric) -> Result<(), StoreError> {
        metric.id = self.next_id();
        self.metrics.insert(metric.id, metric);
        Ok(())
    }

    async fn list_metrics(&self, timer_id: &str) -> Result<Vec<TeamMetric>, StoreError> {
        Ok(self
.metrics
.iter()
.filter(|m| m.timer_id == timer_id)
.map(|m| m.clone())
.collect())
    }

    async fn delete_metrics(&self, timer_id: &str) -> Result<i64, StoreError> {
        let ids: Vec<i64> = self
.metrics
.iter()
.filter(|m| m.timer_id == timer_id)
.map(|m| *m.key())
.collect();
        for id in &ids {
            self.metrics.remove(id);
        }
        Ok(ids.len() as i64)
    }

    async fn put_replay_entry(&self, entry: ReplayQueueEntry) -> Result<(), StoreError> {
        self.replay_queue.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn get_pending_replay_entry(&self, timer_id: &str) -> Result<Option<ReplayQueueEntry>, StoreError> {
        Ok(self
.replay_queue
.iter()
.find(|e| e.timer_id == timer_id && e.status == ReplayQueueStatus::Pending)
.map(|e| e.clone()))
    }

    async fn due_replay_entries(&self, limit: usize) -> Result<Vec<ReplayQueueEntry>, StoreError> {
        let mut pending: Vec<_> = self
.replay_queue
.iter()
.filter(|e| e.status == ReplayQueueStatus::Pending)
.map(|e| e.clone())
.collect();
        pending.sort_by_key(|e| e.enqueued_at_ms);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn purgeable_replay_entries(
        &self,
        older_than_ms: i64,
        limit: usize,
    ) -> Result<Vec<ReplayQueueEntry>, StoreError> {
        let mut purgeable: Vec<_> = self
.replay_queue
.iter()
.filter(|e| matches!(e.status, ReplayQueueStatus::Processed | ReplayQueueStatus::Error))
.filter(|e| {
                let ts = e.processed_at_ms.unwrap_or(e.enqueued_at_ms);
                ts < older_than_ms
            })
.map(|e| e.clone())
.collect();
        purgeable.sort_by_key(|e| e.processed_at_ms.unwrap_or(e.enqueued_at_ms));
        purgeable.truncate(limit);
        Ok(purgeable)
    }

    async fn delete_replay_entry(&self, id: &str) -> Result<(), StoreError> {
        self.replay_queue.remove(id);
        Ok(())
    }

    async fn delete_replay_entries_for_timer(&self, timer_id: &str) -> Result<i64, StoreError> {
        let ids: Vec<String> = self
.replay_queue
.iter()
.filter(|e| e.timer_id == timer_id)
.map(|e| e.key().clone())
.collect();
        for id in &ids {
            self.replay_queue.remove(id);
        }
        Ok(ids.len() as i64)
    }

    async fn append_replay_history(&self, mut entry: ReplayHistoryEntry) -> Result<(), StoreError> {
        entry.id = self.next_id();
        self.replay_history.insert(entry.id, entry);
        Ok(())
    }

    async fn append_deletion_metrics(&self, mut record: DeletionMetrics) -> Result<(), StoreError> {
        record.id = self.next_id();
        self.deletion_metrics.insert(record.id, record);
        Ok(())
    }

    async fn put_schedule(&self, schedule: CronSchedule) -> Result<(), StoreError> {
        self.schedules.insert(schedule.id.clone(), schedule);
        Ok(())
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<CronSchedule>, StoreError> {
        Ok(self.schedules.get(id).map(|s| s.clone()))
    }

    async fn due_schedules(&self, now_ms: i64, limit: usize) -> Result<Vec<CronSchedule>, StoreError> {
        let mut due: Vec<_> = self
.schedules
.iter()
.filter(|s| !s.paused && s.next_run_at_ms <= now_ms)
.map(|s| s.clone())
.collect();
        due.sort_by_key(|s| s.next_run_at_ms);
        due.truncate(limit);
        Ok(due)
    }

    async fn get_template(&self, id: &str) -> Result<Option<Template>, StoreError> {
        Ok(self.templates.get(id).map(|t| t.clone()))
    }

    async fn purgeable_expired_timers(&self, older_than_ms: i64) -> Result<Vec<String>, StoreError> {
        Ok(self
.timers
.iter()
.filter(|t| t.status == TimerStatus::Expired)
.filter(|t| t.end_time_ms.map(|end| end < older_than_ms).unwrap_or(false))
.map(|t| t.id.clone())
.collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerEvents;
    use std::collections::BTreeSet;

    fn sample_timer(id: &str, status: TimerStatus) -> Timer {
        Timer {
            id: id.to_string(),
            name: None,
            owner_agent_id: Some("agent-1".into()),
            team_id: Some("team-A".into()),
            created_by: None,
            duration_ms: 1000,
            start_time_ms: Some(0),
            end_time_ms: Some(1000),
            status,
            dependencies: BTreeSet::new(),
            pending_dependencies: BTreeSet::new(),
            conditions: vec![],
            context: Value::Null,
            metadata: Value::Null,
            events: TimerEvents::default(),
            retry_policy: None,
            retry_count: 0,
            chain_id: None,
            template_id: None,
            scenario: None,
            load_balancing_key: None,
            assigned_worker: "worker-0".into(),
            skip_reason: None,
            failure_reason: None,
            next_retry_at_ms: None,
            created_at_ms: 0,
            updated_at_ms: 0,
            completed_at_ms: None,
        }
    }

    #[tokio::test]
    async fn put_and_get_roundtrip() {
        let store = InMemoryStore::new();
        store.put_timer(sample_timer("t1", TimerStatus::Running)).await.unwrap();
        let loaded = store.get_timer("t1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "t1");
    }

    #[tokio::test]
    async fn list_filters_by_status_and_team() {
        let store = InMemoryStore::new();
        store.put_timer(sample_timer("t1", TimerStatus::Running)).await.unwrap();
        store.put_timer(sample_timer("t2", TimerStatus::Expired)).await.unwrap();

        let running = store
.list_timers(&TimerFilters {
                agent_id: None,
                team_id: None,
                status: Some(TimerStatus::Running),
            })
.await
.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "t1");
    }

    #[tokio::test]
    async fn due_expirations_are_sorted_and_limited() {
        let store = InMemoryStore::new();
        store
.put_expiration(ExpirationRecord {
                timer_id: "a".into(),
                expires_at_ms: 200,
                status: TimerStatus::Running,
                worker: "worker-0".into(),
            })
.await
.unwrap();
        store
.put_expiration(ExpirationRecord {
                timer_id: "b".into(),
                expires_at_ms: 100,
                status: TimerStatus::Running,
                worker: "worker-0".into(),
            })
.await
.unwrap();
        let due = store.due_expirations(1000, 10).await.unwrap();
        assert_eq!(due[0].timer_id, "b");
        assert_eq!(due[1].timer_id, "a");
    }

    #[tokio::test]
    async fn at_most_one_pending_replay_entry_is_queryable() {
        let store = InMemoryStore::new();
        assert!(store.get_pending_replay_entry("t1").await.unwrap().is_none());
        store
.put_replay_entry(ReplayQueueEntry {
                id: "r1".into(),
                timer_id: "t1".into(),
                team_id: None,
                status: ReplayQueueStatus::Pending,
                reason: "webhook_failed".into(),
                attempts: 1,
                payload: sample_timer("t1", TimerStatus::Failed),
                enqueued_at_ms: 0,
                last_attempt_at_ms: None,
                processed_at_ms: None,
                replay_timer_id: None,
                last_error: None,
                error_count: 0,
            })
.await
.unwrap();
        assert!(store.get_pending_replay_entry("t1").await.unwrap().is_some());
    }
}
