//! # minoots-engine
//!
//! A timer-execution engine for autonomous agents: create a timer with a
//! duration, conditions, and an optional webhook, and the engine delivers
//! exactly the terminal transition the timer earns — `expired`, `failed`
//! after retries, or `skipped` — on its own schedule, independent of
//! whatever process created it.
//!
//! ## Architecture
//!
//! ```text
//! CreateTimer ──► Timer Lifecycle Manager ──► DurableStore
//!                        │                         ▲
//!                        ▼                         │
//!              Expiration Sweeper ──► Webhook Dispatcher
//!                        │
//!                        ├─► terminal success ──► release dependents
//!                        └─► terminal failure ──► Replay Queue
//!
//! Cron Schedule ──► Schedule Materializer ──► CreateTimer
//! ```
//!
//! Every component above takes its [`DurableStore`] and [`Clock`] as
//! injected dependencies rather than reaching for global state — the same
//! seam the engine's webhook transport draws around `reqwest` via
//! [`WebhookClient`]. Tests substitute [`InMemoryStore`] and [`TestClock`]
//! and drive a whole multi-timer scenario without a network call or a
//! running clock.
//!
//! [`Engine`] is the assembled facade: construct one with
//! [`EngineBuilder`], call its operations, and optionally
//! [`Engine::start_background_tasks`] to run the expiration sweep, replay
//! drain, schedule tick, and cleanup tasks on their own intervals.

mod cascade;
mod cleanup;
mod clock;
mod condition;
mod config;
mod dispatch;
mod duration;
mod engine;
mod error;
mod lifecycle;
mod replay;
mod schedule;
mod scheduler;
mod store;
mod retry;
mod sweeper;
mod timer;
mod worker;

pub use cascade::{DeleteOptions, DeleteResult};
pub use clock::{Clock, SystemClock, TestClock};
pub use condition::{Condition, Operator};
pub use config::EngineConfig;
pub use dispatch::{DispatchResult, ReqwestWebhookClient, WebhookClient, WebhookOutcome};
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, Result, StoreError};
pub use replay::{ReplayOptions, DEFAULT_REPLAY_RETENTION_MS};
pub use schedule::CronSchedule;
pub use scheduler::BackgroundTasks;
pub use store::{
    DeletionCounts, DeletionMetrics, DurableStore, ExpirationRecord, InMemoryStore,
    ReplayHistoryEntry, ReplayQueueEntry, ReplayQueueStatus, TeamMetric, Template,
    TimerEventKind, TimerEventLogEntry,
};
pub use timer::{
    OnExpireEvent, RetryPolicy, RetryStrategy, Timer, TimerConfig, TimerEvents, TimerFilters,
    TimerPatch, TimerStatus, TimerView,
};
pub use worker::DEFAULT_WORKER_COUNT;

#[cfg(any(test, feature = "testing"))]
pub use dispatch::testing::ScriptedWebhookClient;
