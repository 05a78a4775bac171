//! Retry policy: given an execution count and a failure, either requeue with
//! backoff or dead-letter.
//!
//! Evaluated exactly once per failed execution, synchronously, before the
//! worker slot is released. The ceiling used at decision time is the one
//! copied onto the job at enqueue, not the policy's current default.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{FailureKind, TaskError};

/// Delay function applied before a failed job becomes eligible again.
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Same delay for every attempt. The default is 300 seconds.
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the next execution, where `attempt` counts executions
    /// including the one that just failed (so the first retry sees 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(16);
                base.checked_mul(2u32.saturating_pow(exponent))
                    .unwrap_or(*max)
                    .min(*max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed(Duration::from_secs(300))
    }
}

/// Per-task failure classification override.
pub type Classifier = Arc<dyn Fn(&TaskError) -> FailureKind + Send + Sync>;

/// What happens to a job after a failed execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Reinsert into the same queue with `not_before = now + delay`.
    Requeue(Duration),
    /// Move to the dead-letter sink; the job is terminal.
    DeadLetter,
}

/// Retry behavior registered alongside a task handler.
#[derive(Clone, Default)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
    classifier: Option<Classifier>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("classifier", &self.classifier.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Default policy: 3 retries, fixed 300 second backoff, default
    /// classification.
    pub fn new() -> Self {
        RetryPolicy {
            max_retries: 3,
            backoff: Backoff::default(),
            classifier: None,
        }
    }

    /// Set the retry ceiling copied onto jobs at enqueue time.
    pub fn max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    /// Replace the backoff function.
    pub fn backoff(self, backoff: Backoff) -> Self {
        Self { backoff, ..self }
    }

    /// Override the default failure classification for this task.
    pub fn classify_with<F>(self, classifier: F) -> Self
    where
        F: Fn(&TaskError) -> FailureKind + Send + Sync + 'static,
    {
        Self {
            classifier: Some(Arc::new(classifier)),
            ..self
        }
    }

    /// Ceiling copied onto a job at enqueue time.
    pub fn retry_limit(&self) -> u32 {
        self.max_retries
    }

    /// Decide the fate of a failed execution.
    ///
    /// `attempt` counts executions including the failed one; `max_retries`
    /// is the ceiling carried by the job itself.
    pub fn decide(&self, attempt: u32, max_retries: u32, error: &TaskError) -> Decision {
        let kind = match &self.classifier {
            Some(classify) => classify(error),
            None => error.kind(),
        };

        match kind {
            FailureKind::Permanent => Decision::DeadLetter,
            FailureKind::Transient if attempt <= max_retries => {
                Decision::Requeue(self.backoff.delay(attempt))
            }
            FailureKind::Transient => Decision::DeadLetter,
        }
    }
}
