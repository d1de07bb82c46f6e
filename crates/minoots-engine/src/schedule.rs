//! Schedule Materializer: cron-driven injection of new timers.

use std::str::FromStr;

use chrono::{TimeZone, Utc};
use cron::Schedule as CronExpr;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::lifecycle::create_timer;
use crate::store::DurableStore;
use crate::timer::{merge_json, Timer, TimerConfig};

/// Default schedule tick batch size.
pub const DEFAULT_SCHEDULE_SWEEP_BATCH: usize = 25;

/// A cron-driven definition that periodically synthesizes new timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSchedule {
    pub id: String,
    pub team_id: Option<String>,
    pub cron_expression: String,
    pub template_id: Option<String>,
    pub timer_config_override: Option<Value>,
    pub paused: bool,
    pub next_run_at_ms: i64,
    pub last_run_at_ms: Option<i64>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub last_error: Option<String>,
}

/// Computes the next fire time after `after_ms`, in epoch milliseconds.
pub fn next_run_after(cron_expression: &str, after_ms: i64) -> Result<i64> {
    let schedule = CronExpr::from_str(cron_expression)
.map_err(|e| EngineError::InvalidCondition(format!("invalid cron expression: {e}")))?;
    let after = Utc
.timestamp_millis_opt(after_ms)
.single()
.ok_or_else(|| EngineError::InvalidCondition("invalid timestamp".to_string()))?;
    let next = schedule
.after(&after)
.next()
.ok_or_else(|| EngineError::InvalidCondition("cron schedule has no future occurrence".to_string()))?;
    Ok(next.timestamp_millis())
}

/// Builds the timer config for a due schedule: deep-merges the template
/// (if any) with the schedule's override, then injects `team_id`/`created_by`.
pub async fn materialize_config(store: &dyn DurableStore, schedule: &CronSchedule) -> Result<TimerConfig> {
    let base = match &schedule.template_id {
        Some(template_id) => {
            let template = store
.get_template(template_id)
.await?
.ok_or_else(|| EngineError::TemplateNotFound(template_id.clone()))?;
            template.config
        }
        None => Value::Object(Default::default()),
    };

    let overrides = schedule
.timer_config_override
.clone()
.unwrap_or(Value::Object(Default::default()));
    let mut merged = merge_json(&base, &overrides);

    if let Value::Object(map) = &mut merged {
        if let Some(team_id) = &schedule.team_id {
            map.insert("team_id".to_string(), Value::String(team_id.clone()));
        }
        if let Some(created_by) = &schedule.created_by {
            map.insert("created_by".to_string(), Value::String(created_by.clone()));
        }
    }

    serde_json::from_value(merged).map_err(|e| EngineError::InvalidCondition(e.to_string()))
}

/// `MaterializeSchedule` driven for every due schedule: one
/// tick of the Schedule Materializer. A failed schedule records
/// `lastError` and does not halt the tick; other schedules still run.
pub async fn materialize_due_schedules(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    worker_count: i64,
    limit: usize,
) -> Result<Vec<Timer>> {
    let now = clock.now_ms();
    let due = store.due_schedules(now, limit).await?;
    let mut created = Vec::new();

    for mut schedule in due {
        match materialize_one(store, clock, worker_count, &schedule).await {
            Ok(timer) => {
                schedule.last_run_at_ms = Some(schedule.next_run_at_ms);
                schedule.next_run_at_ms = next_run_after(&schedule.cron_expression, now)
.unwrap_or(schedule.next_run_at_ms + 60_000);
                schedule.last_error = None;
                store.put_schedule(schedule).await?;
                created.push(timer);
            }
            Err(e) => {
                warn!(schedule_id = %schedule.id, error = %e, "schedule materialization failed");
                schedule.last_error = Some(e.to_string());
                schedule.last_run_at_ms = Some(schedule.next_run_at_ms);
                schedule.next_run_at_ms = next_run_after(&schedule.cron_expression, now)
.unwrap_or(schedule.next_run_at_ms + 60_000);
                store.put_schedule(schedule).await?;
            }
        }
    }

    Ok(created)
}

async fn materialize_one(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    worker_count: i64,
    schedule: &CronSchedule,
) -> Result<Timer> {
    let config = materialize_config(store, schedule).await?;
    let timer = create_timer(store, clock, worker_count, config).await?;
    info!(schedule_id = %schedule.id, timer_id = %timer.id, "schedule materialized timer");
    Ok(timer)
}
