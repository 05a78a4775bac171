//! Failure taxonomy.
//!
//! Handlers report failures as [`TaskError`]; the retry policy only cares
//! about the [`FailureKind`] classification. Submission-time and
//! registration-time problems get their own error types because they are
//! surfaced synchronously to the caller, while execution failures never are.

use std::time::Duration;

/// How the retry policy treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying with backoff until the budget runs out.
    Transient,
    /// Dead-letter immediately; retrying cannot help.
    Permanent,
}

/// A failed task execution.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The job names a task nobody registered. Classified permanent.
    #[error("task `{0}` is not registered")]
    Unroutable(String),

    /// Explicit marker for a feature that is intentionally absent. Classified
    /// permanent so it never consumes retry budget.
    #[error("{feature} is not implemented yet")]
    NotImplemented { feature: String },

    /// The payload did not match what the handler expects. Classified
    /// permanent; re-running the same payload cannot fix it.
    #[error("malformed arguments: {0}")]
    InvalidArgs(String),

    /// The execution exceeded its wall-clock limit. Classified transient.
    #[error("execution exceeded the {}s time limit", limit.as_secs())]
    Timeout { limit: Duration },

    /// Any other handler failure. Classified transient by default.
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TaskError {
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        TaskError::NotImplemented {
            feature: feature.into(),
        }
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        TaskError::InvalidArgs(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an arbitrary error as a transient failure.
    pub fn from_error(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        TaskError::Failed {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// Default classification; a task may override it with its own classifier.
    pub fn kind(&self) -> FailureKind {
        match self {
            TaskError::Unroutable(_)
            | TaskError::NotImplemented { .. }
            | TaskError::InvalidArgs(_) => FailureKind::Permanent,
            TaskError::Timeout { .. } | TaskError::Failed { .. } => FailureKind::Transient,
        }
    }

    /// Stable kind tag used in logs and the job's `last_error` field.
    pub fn kind_str(&self) -> &'static str {
        match self {
            TaskError::Unroutable(_) => "unroutable",
            TaskError::NotImplemented { .. } => "not_implemented",
            TaskError::InvalidArgs(_) => "invalid_args",
            TaskError::Timeout { .. } => "timeout",
            TaskError::Failed { .. } => "failed",
        }
    }
}

/// Registration-time failures. Registration happens once at startup; the
/// first binding for a name always wins.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("task `{0}` is already registered")]
    DuplicateTask(String),

    #[error("task `{task}` declares an invalid default queue `{queue}`")]
    InvalidQueue { task: String, queue: String },
}

/// Submission-time failures. A job that fails submission never enters a
/// queue.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("task `{0}` is not registered")]
    UnroutableTask(String),

    #[error("job payload is not JSON-representable: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job payload has the wrong shape: {0}")]
    InvalidShape(&'static str),

    #[error("broker transport failed: {0}")]
    Transport(Box<dyn std::error::Error + Send>),
}
