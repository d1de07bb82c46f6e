//! The `Timer` entity and its supporting types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::condition::Condition;

/// Lifecycle status of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Pending,
    Running,
    Retrying,
    Expired,
    Failed,
    Skipped,
    Deleted,
}

impl TimerStatus {
    /// Terminal statuses are never followed by a non-terminal transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TimerStatus::Expired | TimerStatus::Failed | TimerStatus::Skipped | TimerStatus::Deleted
        )
    }

    /// True for statuses that hold a live expiration record.
    pub fn is_armed(self) -> bool {
        matches!(self, TimerStatus::Running | TimerStatus::Retrying)
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed,
    Linear,
    Exponential,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Fixed
    }
}

/// Retry policy attached to a timer's webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub strategy: RetryStrategy,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: i64,
    pub max_attempts: i64,
}

fn default_backoff_ms() -> i64 {
    1000
}

/// The `events.on_expire` webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OnExpireEvent {
    pub webhook_url: Option<String>,
    pub message: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimerEvents {
    pub on_expire: Option<OnExpireEvent>,
}

/// Input document for `CreateTimer` / the basis for a replay config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimerConfig {
    pub name: Option<String>,
    pub owner_agent_id: Option<String>,
    pub team_id: Option<String>,
    pub created_by: Option<String>,
    pub duration: Option<Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub conditions: Value,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub metadata: Value,
    pub events: Option<TimerEvents>,
    pub retry_policy: Option<RetryPolicy>,
    pub chain_id: Option<String>,
    pub template_id: Option<String>,
    pub scenario: Option<String>,
    pub load_balancing_key: Option<String>,
}

/// The persisted timer record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timer {
    pub id: String,
    pub name: Option<String>,
    pub owner_agent_id: Option<String>,
    pub team_id: Option<String>,
    pub created_by: Option<String>,

    pub duration_ms: i64,
    pub start_time_ms: Option<i64>,
    pub end_time_ms: Option<i64>,

    pub status: TimerStatus,

    pub dependencies: BTreeSet<String>,
    pub pending_dependencies: BTreeSet<String>,

    pub conditions: Vec<Condition>,
    pub context: Value,
    pub metadata: Value,

    pub events: TimerEvents,
    pub retry_policy: Option<RetryPolicy>,
    pub retry_count: i64,

    pub chain_id: Option<String>,
    pub template_id: Option<String>,
    pub scenario: Option<String>,
    pub load_balancing_key: Option<String>,

    pub assigned_worker: String,

    pub skip_reason: Option<String>,
    pub failure_reason: Option<String>,
    pub next_retry_at_ms: Option<i64>,

    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub completed_at_ms: Option<i64>,
}

impl Timer {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// A `Timer` augmented with the derived fields `GetTimer` must return.
#[derive(Debug, Clone, Serialize)]
pub struct TimerView {
    #[serde(flatten)]
    pub timer: Timer,
    pub time_remaining_ms: i64,
    pub progress: f64,
}

impl TimerView {
    pub fn derive(timer: Timer, now_ms: i64) -> Self {
        let time_remaining_ms = match timer.end_time_ms {
            Some(end) => (end - now_ms).max(0),
            None => timer.duration_ms,
        };

        let progress = match timer.start_time_ms {
            Some(start) if timer.duration_ms > 0 => {
                let elapsed = (now_ms - start).max(0) as f64;
                (elapsed / timer.duration_ms as f64).clamp(0.0, 1.0)
            }
            Some(_) => 1.0, // duration_ms == 0 and started: fires immediately, full progress
            None => 0.0,
        };

        Self {
            timer,
            time_remaining_ms,
            progress,
        }
    }
}

/// Deduplicates a dependency list, preserving set semantics.
pub fn dedup_dependencies(deps: &[String]) -> BTreeSet<String> {
    deps.iter().cloned().collect()
}

/// Server-side list filters.
#[derive(Debug, Clone, Default)]
pub struct TimerFilters {
    pub agent_id: Option<String>,
    pub team_id: Option<String>,
    pub status: Option<TimerStatus>,
}

/// A free-form patch applied by `UpdateTimer`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerPatch {
    pub name: Option<String>,
    pub metadata: Option<Value>,
    pub context: Option<Value>,
    pub retry_policy: Option<RetryPolicy>,
    pub events: Option<TimerEvents>,
}

pub fn merge_json(base: &Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (k, v) in override_map {
                let merged_value = match merged.get(k) {
                    Some(existing) => merge_json(existing, v),
                    None => v.clone(),
                };
                merged.insert(k.clone(), merged_value);
            }
            Value::Object(merged)
        }
        (_, overrides) if !overrides.is_null() => overrides.clone(),
        (base, _) => base.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dedup_preserves_set_semantics() {
        let deps = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let deduped = dedup_dependencies(&deps);
        assert_eq!(deduped.len(), 2);
        assert!(deduped.contains("a"));
        assert!(deduped.contains("b"));
    }

    #[test]
    fn terminal_statuses() {
        assert!(TimerStatus::Expired.is_terminal());
        assert!(TimerStatus::Failed.is_terminal());
        assert!(TimerStatus::Skipped.is_terminal());
        assert!(TimerStatus::Deleted.is_terminal());
        assert!(!TimerStatus::Running.is_terminal());
        assert!(!TimerStatus::Pending.is_terminal());
    }

    #[test]
    fn armed_statuses() {
        assert!(TimerStatus::Running.is_armed());
        assert!(TimerStatus::Retrying.is_armed());
        assert!(!TimerStatus::Pending.is_armed());
    }

    #[test]
    fn derived_progress_zero_before_start() {
        let timer = Timer {
            id: "t1".into(),
            name: None,
            owner_agent_id: None,
            team_id: None,
            created_by: None,
            duration_ms: 1000,
            start_time_ms: None,
            end_time_ms: None,
            status: TimerStatus::Pending,
            dependencies: BTreeSet::new(),
            pending_dependencies: BTreeSet::new(),
            conditions: vec![],
            context: json!({}),
            metadata: json!({}),
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
        };
        let view = TimerView::derive(timer, 500);
        assert_eq!(view.progress, 0.0);
        assert_eq!(view.time_remaining_ms, 1000);
    }

    #[test]
    fn zero_duration_started_timer_reports_full_progress() {
        let mut timer_builder = |start: i64, end: i64| Timer {
            id: "t1".into(),
            name: None,
            owner_agent_id: None,
            team_id: None,
            created_by: None,
            duration_ms: 0,
            start_time_ms: Some(start),
            end_time_ms: Some(end),
            status: TimerStatus::Running,
            dependencies: BTreeSet::new(),
            pending_dependencies: BTreeSet::new(),
            conditions: vec![],
            context: json!({}),
            metadata: json!({}),
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
        };
        let view = TimerView::derive(timer_builder(100, 100), 100);
        assert_eq!(view.progress, 1.0);
        assert_eq!(view.time_remaining_ms, 0);
    }

    #[test]
    fn merge_json_deep_merges_objects() {
        let base = json!({"a": {"x": 1, "y": 2}, "b": 1});
        let overrides = json!({"a": {"y": 99}, "c": 3});
        let merged = merge_json(&base, &overrides);
        assert_eq!(merged, json!({"a": {"x": 1, "y": 99}, "b": 1, "c": 3}));
    }
}
