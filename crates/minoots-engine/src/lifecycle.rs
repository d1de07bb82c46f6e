//! Timer Lifecycle Manager: create/get/list, and the two
//! transitions it alone is responsible for — activating a pending timer
//! once its dependencies clear, and releasing dependents when a timer
//! terminates.

use tracing::{debug, info};

use crate::clock::Clock;
use crate::condition::{evaluate, normalize_conditions};
use crate::duration::parse_duration_value;
use crate::error::{EngineError, Result};
use crate::store::{DurableStore, ExpirationRecord, TimerEventKind, TimerEventLogEntry};
use crate::timer::{dedup_dependencies, Timer, TimerConfig, TimerFilters, TimerStatus, TimerView};
use crate::worker::assign_worker;

/// `CreateTimer`.
pub async fn create_timer(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    worker_count: i64,
    config: TimerConfig,
) -> Result<Timer> {
    let duration_value = config
.duration
.as_ref()
.ok_or_else(|| EngineError::InvalidDuration("duration is required".to_string()))?;
    let duration_ms = parse_duration_value(duration_value)?;

    let dependencies = dedup_dependencies(&config.dependencies);
    let conditions = normalize_conditions(&config.conditions)?;

    let now = clock.now_ms();
    let id = Timer::new_id();
    let assigned_worker = assign_worker(config.team_id.as_deref(), &id, worker_count);

    let mut timer = Timer {
        id: id.clone(),
        name: config.name,
        owner_agent_id: config.owner_agent_id,
        team_id: config.team_id,
        created_by: config.created_by,
        duration_ms,
        start_time_ms: None,
        end_time_ms: None,
        status: TimerStatus::Pending,
        dependencies: dependencies.clone(),
        pending_dependencies: dependencies.clone(),
        conditions,
        context: config.context,
        metadata: config.metadata,
        events: config.events.unwrap_or_default(),
        retry_policy: config.retry_policy,
        retry_count: 0,
        chain_id: config.chain_id,
        template_id: config.template_id,
        scenario: config.scenario,
        load_balancing_key: config.load_balancing_key,
        assigned_worker,
        skip_reason: None,
        failure_reason: None,
        next_retry_at_ms: None,
        created_at_ms: now,
        updated_at_ms: now,
        completed_at_ms: None,
    };

    if !dependencies.is_empty() {
        timer.status = TimerStatus::Pending;
    } else if !evaluate(&timer.conditions, &timer.context, &timer.metadata) {
        timer.status = TimerStatus::Skipped;
        timer.skip_reason = Some("conditions_not_met".to_string());
        timer.pending_dependencies.clear();
    } else {
        timer.status = TimerStatus::Running;
        timer.start_time_ms = Some(now);
        timer.end_time_ms = Some(now + duration_ms);
        timer.pending_dependencies.clear();
    }

    store.put_timer(timer.clone()).await?;

    if timer.status == TimerStatus::Running {
        store
.put_expiration(ExpirationRecord {
                timer_id: timer.id.clone(),
                expires_at_ms: timer.end_time_ms.unwrap(),
                status: timer.status,
                worker: timer.assigned_worker.clone(),
            })
.await?;
    }

    if timer.status == TimerStatus::Skipped {
        store
.append_event(TimerEventLogEntry {
                id: 0,
                timer_id: timer.id.clone(),
                event: TimerEventKind::Skipped,
                team_id: timer.team_id.clone(),
                attempt: None,
                delay_ms: None,
                failure_reason: None,
                timestamp_ms: now,
            })
.await?;
    }

    info!(timer_id = %timer.id, status = ?timer.status, "timer created");
    Ok(timer)
}

/// `GetTimer`: loads the record and attaches derived
/// fields.
pub async fn get_timer(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    id: &str,
) -> Result<TimerView> {
    let timer = store
.get_timer(id)
.await?
.ok_or_else(|| EngineError::NotFound(id.to_string()))?;
    Ok(TimerView::derive(timer, clock.now_ms()))
}

/// `ListTimers`.
pub async fn list_timers(store: &dyn DurableStore, filters: &TimerFilters) -> Result<Vec<Timer>> {
    Ok(store.list_timers(filters).await?)
}

/// Activates a pending timer once its dependencies have cleared.
/// Re-checks conditions at activation
/// time — a timer can still be skipped here even though it passed
/// creation-time validation, because conditions are evaluated against
/// live context/metadata.
pub async fn activate(store: &dyn DurableStore, clock: &dyn Clock, timer_id: &str) -> Result<()> {
    let Some(mut timer) = store.get_timer(timer_id).await? else {
        return Ok(());
    };
    if timer.status != TimerStatus::Pending {
        return Ok(());
    }

    let now = clock.now_ms();

    if !evaluate(&timer.conditions, &timer.context, &timer.metadata) {
        timer.status = TimerStatus::Skipped;
        timer.skip_reason = Some("conditions_not_met".to_string());
        timer.updated_at_ms = now;
        store.put_timer(timer.clone()).await?;
        store
.append_event(TimerEventLogEntry {
                id: 0,
                timer_id: timer.id.clone(),
                event: TimerEventKind::Skipped,
                team_id: timer.team_id.clone(),
                attempt: None,
                delay_ms: None,
                failure_reason: None,
                timestamp_ms: now,
            })
.await?;
        return Ok(());
    }

    timer.status = TimerStatus::Running;
    timer.start_time_ms = Some(now);
    timer.end_time_ms = Some(now + timer.duration_ms);
    timer.pending_dependencies.clear();
    timer.updated_at_ms = now;
    store.put_timer(timer.clone()).await?;
    store
.put_expiration(ExpirationRecord {
            timer_id: timer.id.clone(),
            expires_at_ms: timer.end_time_ms.unwrap(),
            status: timer.status,
            worker: timer.assigned_worker.clone(),
        })
.await?;
    store
.append_event(TimerEventLogEntry {
            id: 0,
            timer_id: timer.id.clone(),
            event: TimerEventKind::Activated,
            team_id: timer.team_id.clone(),
            attempt: None,
            delay_ms: None,
            failure_reason: None,
            timestamp_ms: now,
        })
.await?;

    Ok(())
}

/// Releases every timer whose `dependencies` contain `terminated_id`,
/// regardless of whether that id's timer succeeded, failed, or was
/// skipped — or deleted. A dependency is a happens-before ordering constraint, not
/// a success requirement.
pub async fn release_dependents(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    terminated_id: &str,
) -> Result<()> {
    let dependents = store.list_dependents(terminated_id).await?;
    debug!(terminated_id, count = dependents.len(), "releasing dependents");

    for mut dependent in dependents {
        dependent.pending_dependencies.remove(terminated_id);

        if dependent.pending_dependencies.is_empty() && dependent.status == TimerStatus::Pending {
            store.put_timer(dependent.clone()).await?;
            activate(store, clock, &dependent.id).await?;
        } else {
            dependent.updated_at_ms = clock.now_ms();
            store.put_timer(dependent).await?;
        }
    }

    Ok(())
}

/// `UpdateTimer`: applies a partial patch to mutable fields.
pub async fn update_timer(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    id: &str,
    patch: crate::timer::TimerPatch,
) -> Result<Timer> {
    let mut timer = store
.get_timer(id)
.await?
.ok_or_else(|| EngineError::NotFound(id.to_string()))?;

    if let Some(name) = patch.name {
        timer.name = Some(name);
    }
    if let Some(metadata) = patch.metadata {
        timer.metadata = crate::timer::merge_json(&timer.metadata, &metadata);
    }
    if let Some(context) = patch.context {
        timer.context = crate::timer::merge_json(&timer.context, &context);
    }
    if let Some(retry_policy) = patch.retry_policy {
        timer.retry_policy = Some(retry_policy);
    }
    if let Some(events) = patch.events {
        timer.events = events;
    }
    timer.updated_at_ms = clock.now_ms();

    store.put_timer(timer.clone()).await?;
    Ok(timer)
}
