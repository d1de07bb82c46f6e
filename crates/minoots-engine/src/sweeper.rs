//! Expiration Sweeper and `Expire` — the core state
//! transition of the whole engine.

use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::dispatch::{self, WebhookClient};
use crate::error::Result;
use crate::lifecycle::release_dependents;
use crate::replay::enqueue_replay;
use crate::retry::{next_delay_ms, retries_exhausted};
use crate::store::{
    DurableStore, ExpirationRecord, TeamMetric, TimerEventKind, TimerEventLogEntry,
};
use crate::timer::TimerStatus;

/// Default expiration sweep batch size.
pub const DEFAULT_SWEEP_BATCH: usize = 200;

/// One tick of the Expiration Sweeper: finds due
/// `running`/`retrying` timers and drives each through [`expire`].
/// Each timer id is handled at most once per tick; per-item failures are
/// logged and do not halt the batch.
pub async fn sweep_once(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    webhook_client: &dyn WebhookClient,
    config: &EngineConfig,
) -> Result<usize> {
    let now = clock.now_ms();
    let due = store
.due_expirations(now, config.expiration_sweep_batch)
.await?;

    let mut processed = 0;
    for record in due {
        match expire(store, clock, webhook_client, config, &record.timer_id).await {
            Ok(()) => processed += 1,
            Err(e) => warn!(timer_id = %record.timer_id, error = %e, "expire failed, will retry next sweep"),
        }
    }

    Ok(processed)
}

/// Drives one timer through its expiration attempt.
///
/// Idempotent against the sweep pattern: if the record is no longer in
/// `running`/`retrying` this is a no-op, so a concurrent or duplicate
/// sweep pass is harmless.
pub async fn expire(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    webhook_client: &dyn WebhookClient,
    config: &EngineConfig,
    timer_id: &str,
) -> Result<()> {
    let Some(mut timer) = store.get_timer(timer_id).await? else {
        return Ok(());
    };
    if !timer.status.is_armed() {
        return Ok(());
    }

    let original_end_ms = timer.end_time_ms.unwrap_or_else(|| clock.now_ms());

    timer.retry_count += 1;
    let attempt = timer.retry_count;

    let result = dispatch::dispatch(webhook_client, || clock.now_ms(), &timer, config.webhook_timeout_ms).await;
    let now = clock.now_ms();
    let success = result.outcome.is_success();
    let failure_reason = result.outcome.failure_reason();

    if !success {
        if let Some(policy) = timer.retry_policy.clone() {
            if !retries_exhausted(&policy, attempt) {
                let delay = next_delay_ms(&policy, attempt + 1);
                timer.status = TimerStatus::Retrying;
                timer.end_time_ms = Some(now + delay);
                timer.next_retry_at_ms = timer.end_time_ms;
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
                        event: TimerEventKind::RetryScheduled,
                        team_id: timer.team_id.clone(),
                        attempt: Some(attempt + 1),
                        delay_ms: Some(delay),
                        failure_reason: failure_reason.clone(),
                        timestamp_ms: now,
                    })
.await?;
                info!(timer_id = %timer.id, attempt = attempt + 1, delay_ms = delay, "retry scheduled");
                return Ok(());
            }
        }
    }

    // Terminal: expired on success, failed on exhausted-retry failure.
    timer.status = if success {
        TimerStatus::Expired
    } else {
        TimerStatus::Failed
    };
    timer.next_retry_at_ms = None;
    timer.failure_reason = failure_reason.clone();
    timer.completed_at_ms = Some(now);
    timer.updated_at_ms = now;

    store.put_timer(timer.clone()).await?;
    store.delete_expiration(&timer.id).await?;

    store
.append_metric(TeamMetric {
            id: 0,
            timer_id: timer.id.clone(),
            team_id: timer.team_id.clone(),
            event: if success {
                TimerEventKind::Expired
            } else {
                TimerEventKind::Failed
            },
            drift_ms: now - original_end_ms,
            webhook_latency_ms: result.latency_ms,
            success,
            attempt,
            created_at_ms: now,
        })
.await?;

    store
.append_event(TimerEventLogEntry {
            id: 0,
            timer_id: timer.id.clone(),
            event: if success {
                TimerEventKind::Expired
            } else {
                TimerEventKind::Failed
            },
            team_id: timer.team_id.clone(),
            attempt: Some(attempt),
            delay_ms: None,
            failure_reason: failure_reason.clone(),
            timestamp_ms: now,
        })
.await?;

    if !success {
        enqueue_replay(
            store,
            clock,
            &timer,
            "webhook_failed".to_string(),
            attempt,
            failure_reason,
            None,
        )
.await?;
    }

    info!(timer_id = %timer.id, status = ?timer.status, "timer terminal");

    release_dependents(store, clock, &timer.id).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::config::EngineConfig;
    use crate::dispatch::testing::ScriptedWebhookClient;
    use crate::lifecycle::create_timer;
    use crate::store::InMemoryStore;
    use crate::timer::{OnExpireEvent, RetryPolicy, RetryStrategy, TimerConfig, TimerEvents};
    use serde_json::json;

    fn webhook_config(url: &str) -> TimerConfig {
        TimerConfig {
            duration: Some(json!("50ms")),
            team_id: Some("team-A".to_string()),
            events: Some(TimerEvents {
                on_expire: Some(OnExpireEvent {
                    webhook_url: Some(url.to_string()),
                    message: Some("fire".to_string()),
                    data: None,
                }),
            }),
..Default::default()
        }
    }

    #[tokio::test]
    async fn successful_delivery_expires_and_emits_metric() {
        let store = InMemoryStore::new();
        let clock = TestClock::new(0);
        let client = ScriptedWebhookClient::new(vec![Ok(200)]);
        let config = EngineConfig::default();

        let timer = create_timer(&store, &clock, 5, webhook_config("https://hook/")).await.unwrap();
        clock.advance(50);

        expire(&store, &clock, &client, &config, &timer.id).await.unwrap();

        let reloaded = store.get_timer(&timer.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TimerStatus::Expired);
        assert!(store.get_timer(&timer.id).await.unwrap().unwrap().end_time_ms.is_some());
        assert_eq!(client.request_count(), 1);

        let metrics = store.list_metrics(&timer.id).await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert!(metrics[0].success);
    }

    #[tokio::test]
    async fn failure_with_retries_remaining_schedules_retry() {
        let store = InMemoryStore::new();
        let clock = TestClock::new(0);
        let client = ScriptedWebhookClient::new(vec![Err("boom".to_string()), Ok(200)]);
        let config = EngineConfig::default();

        let mut cfg = webhook_config("https://hook/");
        cfg.retry_policy = Some(RetryPolicy {
            strategy: RetryStrategy::Linear,
            backoff_ms: 1000,
            max_attempts: 3,
        });
        let timer = create_timer(&store, &clock, 5, cfg).await.unwrap();
        clock.advance(50);

        expire(&store, &clock, &client, &config, &timer.id).await.unwrap();
        let reloaded = store.get_timer(&timer.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TimerStatus::Retrying);
        assert_eq!(reloaded.retry_count, 1);

        let events = store.list_events(&timer.id).await.unwrap();
        assert!(events.iter().any(|e| e.event == TimerEventKind::RetryScheduled));

        clock.advance(2000);
        expire(&store, &clock, &client, &config, &timer.id).await.unwrap();
        let final_timer = store.get_timer(&timer.id).await.unwrap().unwrap();
        assert_eq!(final_timer.status, TimerStatus::Expired);
        assert_eq!(final_timer.retry_count, 2);
    }

    #[tokio::test]
    async fn retry_exhaustion_enqueues_replay() {
        let store = InMemoryStore::new();
        let clock = TestClock::new(0);
        let client = ScriptedWebhookClient::new(vec![Ok(500)]);
        let config = EngineConfig::default();

        let mut cfg = webhook_config("https://hook/");
        cfg.retry_policy = Some(RetryPolicy {
            strategy: RetryStrategy::Fixed,
            backoff_ms: 1000,
            max_attempts: 1,
        });
        let timer = create_timer(&store, &clock, 5, cfg).await.unwrap();
        clock.advance(50);

        expire(&store, &clock, &client, &config, &timer.id).await.unwrap();
        let reloaded = store.get_timer(&timer.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TimerStatus::Failed);
        assert_eq!(reloaded.failure_reason.as_deref(), Some("Webhook HTTP 500"));

        let pending = store.get_pending_replay_entry(&timer.id).await.unwrap();
        assert!(pending.is_some());
    }

    #[tokio::test]
    async fn no_op_when_not_armed() {
        let store = InMemoryStore::new();
        let clock = TestClock::new(0);
        let client = ScriptedWebhookClient::new(vec![]);
        let config = EngineConfig::default();

        // Never created, so no record exists: expire() must not error.
        expire(&store, &clock, &client, &config, "missing").await.unwrap();
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn release_dependents_fires_regardless_of_outcome() {
        let store = InMemoryStore::new();
        let clock = TestClock::new(0);
        let client = ScriptedWebhookClient::new(vec![Ok(500)]);
        let config = EngineConfig::default();

        let mut cfg = webhook_config("https://hook/");
        cfg.retry_policy = Some(RetryPolicy {
            strategy: RetryStrategy::Fixed,
            backoff_ms: 1000,
            max_attempts: 1,
        });
        let blocker = create_timer(&store, &clock, 5, cfg).await.unwrap();

        let mut dep_cfg = TimerConfig {
            duration: Some(json!("10ms")),
..Default::default()
        };
        dep_cfg.dependencies = vec![blocker.id.clone()];
        let dependent = create_timer(&store, &clock, 5, dep_cfg).await.unwrap();
        assert_eq!(dependent.status, TimerStatus::Pending);

        clock.advance(50);
        expire(&store, &clock, &client, &config, &blocker.id).await.unwrap();

        let reloaded_dependent = store.get_timer(&dependent.id).await.unwrap().unwrap();
        assert_eq!(reloaded_dependent.status, TimerStatus::Running);
    }
}
