//! The crate's single error type.

use thiserror::Error;

/// Every failure mode a caller of this crate can observe.
///
/// Internal invariant violations (a lock poisoned by an earlier panic, a
/// queue that should be non-empty under its own lock) are not represented
/// here; those abort via `expect`/`panic!` at the one call site that relies
/// on the invariant, per the crate's error handling design.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A caller-supplied argument was out of range (e.g. a zero-size pool,
    /// a `Timeout::Never` where a finite delay is required).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The scheduler has been shut down; no new work is accepted.
    #[error("scheduler has been shut down")]
    ShutDown,

    /// The task was cancelled before or during execution.
    #[error("task was cancelled")]
    Cancelled,

    /// A blocking wait exceeded its deadline before the awaited condition held.
    #[error("operation timed out")]
    Timeout,

    /// The task's callable panicked; the message is the captured payload.
    #[error("task execution failed: {0}")]
    ExecutionFailed(String),
}

/// Convenience alias used throughout the crate's public functions.
pub type Result<T> = std::result::Result<T, SchedulerError>;
