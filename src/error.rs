//! Error types for the scheduling kernel.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors surfaced at the scheduler's API boundary.
///
/// Task-local failures (an `update` callable panicking or returning an
/// error) never reach this type — per the kernel's propagation policy they
/// are captured inside the task's run loop and become `Event::TaskCrashed`
/// records instead. `SchedulerError` covers invariant violations at the
/// scheduler/mutex/config boundary.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("no task named '{0}' is registered")]
    UnknownTask(String),

    #[error("scheduler is shutting down, rejecting add_task('{0}')")]
    ShutdownInProgress(String),

    #[error("mailbox for '{0}' is at capacity")]
    MailboxFull(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
