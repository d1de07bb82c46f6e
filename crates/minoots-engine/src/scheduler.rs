//! Background Task Scheduler: spawns the five periodic
//! sweeps as independent `tokio` tasks, each on its own interval, in the
//! same spawn-and-loop shape as a `Runtime::run` driver. Unlike a single
//! event-driven loop, there is no shared event bus here — each sweep owns
//! its own ticker and failure domain, so one overrunning or failing sweep
//! never stalls another.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cleanup::cleanup_expired_timers;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::dispatch::WebhookClient;
use crate::replay::{cleanup_replay_queue, process_replay_queue};
use crate::schedule::materialize_due_schedules;
use crate::store::DurableStore;
use crate::sweeper::sweep_once;

/// Handles to the spawned background tasks. Dropping this does not cancel
/// the tasks; call [`BackgroundTasks::shutdown`] to abort them.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Spawns the expiration sweep, replay drain, replay cleanup, schedule
    /// tick, and expired-timer cleanup tasks on the current Tokio runtime.
    pub fn spawn(
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        webhook_client: Arc<dyn WebhookClient>,
        config: EngineConfig,
    ) -> Self {
        let mut handles = Vec::new();

        handles.push(tokio::spawn(run_periodic(
            "expiration_sweep",
            Duration::from_millis(config.expiration_sweep_interval_ms),
            {
                let store = store.clone();
                let clock = clock.clone();
                let webhook_client = webhook_client.clone();
                let config = config.clone();
                move || {
                    let store = store.clone();
                    let clock = clock.clone();
                    let webhook_client = webhook_client.clone();
                    let config = config.clone();
                    async move {
                        let n = sweep_once(store.as_ref(), clock.as_ref(), webhook_client.as_ref(), &config).await?;
                        if n > 0 {
                            info!(count = n, "expiration sweep processed timers");
                        }
                        Ok(())
                    }
                }
            },
        )));

        handles.push(tokio::spawn(run_periodic(
            "replay_drain",
            Duration::from_millis(config.replay_sweep_interval_ms),
            {
                let store = store.clone();
                let clock = clock.clone();
                let batch = config.replay_sweep_batch;
                let worker_count = config.timer_worker_count;
                move || {
                    let store = store.clone();
                    let clock = clock.clone();
                    async move {
                        let results = process_replay_queue(store.as_ref(), clock.as_ref(), worker_count, batch).await?;
                        if !results.is_empty() {
                            info!(count = results.len(), "replay queue drained");
                        }
                        Ok(())
                    }
                }
            },
        )));

        handles.push(tokio::spawn(run_periodic(
            "replay_cleanup",
            Duration::from_millis(config.replay_cleanup_interval_ms),
            {
                let store = store.clone();
                let clock = clock.clone();
                let retention_ms = config.replay_retention_ms;
                move || {
                    let store = store.clone();
                    let clock = clock.clone();
                    async move {
                        cleanup_replay_queue(store.as_ref(), clock.as_ref(), retention_ms, 200).await?;
                        Ok(())
                    }
                }
            },
        )));

        handles.push(tokio::spawn(run_periodic(
            "schedule_tick",
            Duration::from_millis(config.schedule_sweep_interval_ms),
            {
                let store = store.clone();
                let clock = clock.clone();
                let batch = config.schedule_sweep_batch;
                let worker_count = config.timer_worker_count;
                move || {
                    let store = store.clone();
                    let clock = clock.clone();
                    async move {
                        let created = materialize_due_schedules(store.as_ref(), clock.as_ref(), worker_count, batch).await?;
                        if !created.is_empty() {
                            info!(count = created.len(), "schedules materialized timers");
                        }
                        Ok(())
                    }
                }
            },
        )));

        handles.push(tokio::spawn(run_periodic(
            "expired_cleanup",
            Duration::from_millis(config.expired_cleanup_interval_ms),
            {
                let store = store.clone();
                let clock = clock.clone();
                let max_age_ms = config.expired_cleanup_age_ms;
                move || {
                    let store = store.clone();
                    let clock = clock.clone();
                    async move {
                        cleanup_expired_timers(store.as_ref(), clock.as_ref(), max_age_ms).await?;
                        Ok(())
                    }
                }
            },
        )));

        Self { handles }
    }

    /// Aborts every spawned task.
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

/// Runs `tick` on a fixed interval forever, logging (not propagating) any
/// error so one bad tick never kills the task.
async fn run_periodic<F, Fut>(name: &'static str, interval: Duration, mut tick: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = crate::error::Result<()>> + Send,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = tick().await {
            error!(task = name, error = %e, "background task tick failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::dispatch::testing::ScriptedWebhookClient;
    use crate::lifecycle::create_timer;
    use crate::store::InMemoryStore;
    use crate::timer::{OnExpireEvent, TimerConfig, TimerEvents, TimerStatus};
    use serde_json::json;
    use tokio::time::sleep;

    #[tokio::test]
    async fn expiration_sweep_task_fires_on_its_interval() {
        let store: Arc<dyn DurableStore> = Arc::new(InMemoryStore::new());
        let test_clock = Arc::new(TestClock::new(0));
        let clock: Arc<dyn Clock> = test_clock.clone();
        let webhook_client: Arc<dyn WebhookClient> = Arc::new(ScriptedWebhookClient::new(vec![Ok(200)]));

        let timer = create_timer(
            store.as_ref(),
            clock.as_ref(),
            5,
            TimerConfig {
                duration: Some(json!("1ms")),
                events: Some(TimerEvents {
                    on_expire: Some(OnExpireEvent {
                        webhook_url: Some("https://hook/".to_string()),
                        message: None,
                        data: None,
                    }),
                }),
..Default::default()
            },
        )
.await
.unwrap();

        test_clock.advance(5);

        let mut config = EngineConfig::default();
        config.expiration_sweep_interval_ms = 10;

        let tasks = BackgroundTasks::spawn(store.clone(), clock.clone(), webhook_client, config);
        sleep(Duration::from_millis(60)).await;
        tasks.shutdown();

        let reloaded = store.get_timer(&timer.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TimerStatus::Expired);
    }
}
