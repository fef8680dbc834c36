use thiserror::Error;

/// Result type for task pool operations
pub type TaskResult<T> = Result<T, TaskError>;

/// Task pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task queue is full")]
    QueueFull,

    #[error("Task pool is shut down")]
    ShutDown,

    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Task timed out")]
    TimedOut,
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// The task was refused at submission rather than run
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::QueueFull | Self::ShutDown)
    }
}
