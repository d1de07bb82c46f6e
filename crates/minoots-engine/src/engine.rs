//! The `Engine` facade: bundles a store, a clock, a webhook client, and
//! configuration behind every public operation, the same way a
//! `Runtime`/`RuntimeBuilder` pair bundles a dispatcher and event bus
//! behind `with_*` builder methods.

use std::sync::Arc;

use crate::cascade::{delete_timer, DeleteOptions, DeleteResult};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::dispatch::{ReqwestWebhookClient, WebhookClient};
use crate::error::Result;
use crate::lifecycle::{create_timer, get_timer, list_timers, update_timer};
use crate::replay::{cleanup_replay_queue, enqueue_replay, process_replay_queue, replay_timer, ReplayOptions};
use crate::schedule::materialize_due_schedules;
use crate::scheduler::BackgroundTasks;
use crate::store::{DurableStore, InMemoryStore, ReplayQueueEntry};
use crate::timer::{Timer, TimerConfig, TimerFilters, TimerPatch, TimerView};

/// The assembled timer engine: every public operation is exposed as an
/// inherent async method here.
pub struct Engine {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    webhook_client: Arc<dyn WebhookClient>,
    config: EngineConfig,
    background: Option<BackgroundTasks>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub async fn create_timer(&self, config: TimerConfig) -> Result<Timer> {
        create_timer(self.store.as_ref(), self.clock.as_ref(), self.config.timer_worker_count, config).await
    }

    pub async fn get_timer(&self, id: &str) -> Result<TimerView> {
        get_timer(self.store.as_ref(), self.clock.as_ref(), id).await
    }

    pub async fn list_timers(&self, filters: &TimerFilters) -> Result<Vec<Timer>> {
        list_timers(self.store.as_ref(), filters).await
    }

    pub async fn update_timer(&self, id: &str, patch: TimerPatch) -> Result<Timer> {
        update_timer(self.store.as_ref(), self.clock.as_ref(), id, patch).await
    }

    pub async fn delete_timer(&self, id: &str, options: DeleteOptions) -> Result<DeleteResult> {
        delete_timer(self.store.as_ref(), self.clock.as_ref(), id, options).await
    }

    pub async fn replay_timer(&self, id: &str, options: ReplayOptions) -> Result<Timer> {
        replay_timer(self.store.as_ref(), self.clock.as_ref(), self.config.timer_worker_count, id, options).await
    }

    pub async fn enqueue_replay(
        &self,
        timer: &Timer,
        reason: String,
        attempts: i64,
        failure: Option<String>,
        triggered_by: Option<String>,
    ) -> Result<Option<ReplayQueueEntry>> {
        enqueue_replay(self.store.as_ref(), self.clock.as_ref(), timer, reason, attempts, failure, triggered_by).await
    }

    pub async fn process_replay_queue(&self, limit: usize) -> Result<Vec<(String, String)>> {
        process_replay_queue(self.store.as_ref(), self.clock.as_ref(), self.config.timer_worker_count, limit).await
    }

    pub async fn cleanup_replay_queue(&self) -> Result<usize> {
        cleanup_replay_queue(self.store.as_ref(), self.clock.as_ref(), self.config.replay_retention_ms, 200).await
    }

    pub async fn materialize_schedules(&self, limit: usize) -> Result<Vec<Timer>> {
        materialize_due_schedules(self.store.as_ref(), self.clock.as_ref(), self.config.timer_worker_count, limit).await
    }

    /// Runs one pass of the expiration sweeper synchronously. Exposed so
    /// callers (and tests) can drive the sweep deterministically instead of
    /// waiting on [`Engine::start_background_tasks`]'s interval.
    pub async fn run_expiration_sweep_once(&self) -> Result<usize> {
        crate::sweeper::sweep_once(self.store.as_ref(), self.clock.as_ref(), self.webhook_client.as_ref(), &self.config).await
    }

    /// Spawns the periodic expiration/replay/schedule/cleanup tasks on the
    /// current Tokio runtime. Call once per process.
    pub fn start_background_tasks(&mut self) {
        self.background = Some(BackgroundTasks::spawn(
            self.store.clone(),
            self.clock.clone(),
            self.webhook_client.clone(),
            self.config.clone(),
        ));
    }

    pub fn stop_background_tasks(&mut self) {
        if let Some(tasks) = self.background.take() {
            tasks.shutdown();
        }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Assembles an [`Engine`]. Defaults to an in-process [`InMemoryStore`], a
/// wall-clock [`SystemClock`], and a `reqwest`-backed webhook client —
/// enough to run a single-process deployment out of the box.
pub struct EngineBuilder {
    store: Option<Arc<dyn DurableStore>>,
    clock: Option<Arc<dyn Clock>>,
    webhook_client: Option<Arc<dyn WebhookClient>>,
    config: EngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            store: None,
            clock: None,
            webhook_client: None,
            config: EngineConfig::default(),
        }
    }
}

impl EngineBuilder {
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_webhook_client(mut self, webhook_client: Arc<dyn WebhookClient>) -> Self {
        self.webhook_client = Some(webhook_client);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            webhook_client: self.webhook_client.unwrap_or_else(|| Arc::new(ReqwestWebhookClient::default())),
            config: self.config,
            background: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::dispatch::testing::ScriptedWebhookClient;
    use crate::timer::TimerStatus;
    use serde_json::json;

    #[tokio::test]
    async fn builder_assembles_a_working_engine() {
        let clock = Arc::new(TestClock::new(1000));
        let engine = Engine::builder()
            .with_clock(clock.clone())
            .with_webhook_client(Arc::new(ScriptedWebhookClient::new(vec![])))
            .build();

        let timer = engine
            .create_timer(TimerConfig {
                duration: Some(json!("10ms")),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(timer.status, TimerStatus::Running);

        let view = engine.get_timer(&timer.id).await.unwrap();
        assert_eq!(view.timer.id, timer.id);
    }

    #[tokio::test]
    async fn delete_then_get_reports_not_found() {
        let engine = Engine::builder().build();
        let timer = engine
            .create_timer(TimerConfig {
                duration: Some(json!("10ms")),
                ..Default::default()
            })
            .await
            .unwrap();

        let result = engine.delete_timer(&timer.id, DeleteOptions::default()).await.unwrap();
        assert!(result.deleted);
        assert!(engine.get_timer(&timer.id).await.is_err());
    }
}
