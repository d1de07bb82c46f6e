//! Structured error types for the timer engine.
//!
//! `EngineError` is the only error type that crosses an operation boundary
//! (`CreateTimer`, `GetTimer`, ...). Internal glue code may use
//! `anyhow::Error` for convenience, but every public method on [`crate::Engine`]
//! returns `Result<_, EngineError>`.
//!
//! # The Error Boundary Rule
//!
//! No bare `anyhow::Error` ever crosses an `Engine` method boundary.
//!
//! `StoreError` carries the split a durable store always needs: a
//! `Conflict` (another writer raced us, the caller should treat it as
//! "try again next sweep") is not the same failure as a `Backend` error
//! (the store itself is unhealthy).

use thiserror::Error;

/// Errors surfaced by the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer modified the record since it was loaded. Expected
    /// under concurrency; sweeps simply reprocess on the next tick.
    #[error("revision conflict: record was modified concurrently")]
    Conflict,

    /// The backend itself failed (timeout, connection, serialization).
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Errors returned from public engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `CreateTimer`/`ReplayTimer` received a duration that does not parse.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// A condition's shape could not be normalized (bad operator, shape).
    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    /// `GetTimer`/`ReplayTimer`/`DeleteTimer` referenced an id that does
    /// not exist.
    #[error("timer not found: {0}")]
    NotFound(String),

    /// `ReplayTimer` resolved a snapshot with no `durationMs`.
    #[error("replay source is missing a duration")]
    MissingDuration,

    /// `MaterializeSchedule` referenced a `templateId` with no matching
    /// template.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// The durable store faulted mid-operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// True for errors that are the caller's fault (bad input), as opposed
    /// to store/backend faults a retry might resolve.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidDuration(_)
                | EngineError::InvalidCondition(_)
                | EngineError::MissingDuration
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
