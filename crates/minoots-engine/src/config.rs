//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunable knobs for the background tasks and the dispatcher. All fields
/// have defaults matching the default sweep cadences and batch
/// sizes; a deployment typically only overrides a handful of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timer_worker_count: i64,
    pub webhook_timeout_ms: u64,
    pub expiration_sweep_batch: usize,
    pub expiration_sweep_interval_ms: u64,
    pub replay_sweep_batch: usize,
    pub replay_sweep_interval_ms: u64,
    pub replay_retention_ms: i64,
    pub replay_cleanup_interval_ms: u64,
    pub schedule_sweep_batch: usize,
    pub schedule_sweep_interval_ms: u64,
    pub expired_cleanup_age_ms: i64,
    pub expired_cleanup_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timer_worker_count: crate::worker::DEFAULT_WORKER_COUNT,
            webhook_timeout_ms: crate::dispatch::DEFAULT_WEBHOOK_TIMEOUT_MS,
            expiration_sweep_batch: crate::sweeper::DEFAULT_SWEEP_BATCH,
            expiration_sweep_interval_ms: 60_000,
            replay_sweep_batch: crate::replay::DEFAULT_REPLAY_SWEEP_BATCH,
            replay_sweep_interval_ms: 5 * 60_000,
            replay_retention_ms: crate::replay::DEFAULT_REPLAY_RETENTION_MS,
            replay_cleanup_interval_ms: 6 * 60 * 60_000,
            schedule_sweep_batch: crate::schedule::DEFAULT_SCHEDULE_SWEEP_BATCH,
            schedule_sweep_interval_ms: 60_000,
            expired_cleanup_age_ms: 24 * 60 * 60_000,
            expired_cleanup_interval_ms: 24 * 60 * 60_000,
        }
    }
}
