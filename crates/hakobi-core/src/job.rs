//! Job envelope: the unit of background work plus its routing and retry
//! bookkeeping.
//!
//! The envelope is what travels through the broker. Handlers only ever see
//! the `args`/`kwargs` payload; everything else belongs to the worker and the
//! retry policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::TaskError;

/// Opaque job identifier, assigned once at enqueue time.
pub type JobId = Uuid;

/// Lifecycle of a job. `Succeeded` and `Dead` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in its queue for a lease.
    Pending,
    /// Leased by a worker slot.
    Running,
    /// Acknowledged; removed from the backlog.
    Succeeded,
    /// Failed transiently; eligible for lease again once `not_before` passes.
    Retrying,
    /// Moved to the dead-letter sink for inspection.
    Dead,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Dead)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Retrying => "retrying",
            JobState::Dead => "dead",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "retrying" => Ok(JobState::Retrying),
            "dead" => Ok(JobState::Dead),
            other => Err(format!("unknown job state `{other}`")),
        }
    }
}

/// Most recent failure, kept on the envelope for inspection. Cleared on
/// success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Stable failure kind, e.g. `not_implemented` or `timeout`.
    pub kind: String,
    pub message: String,
}

impl From<&TaskError> for JobError {
    fn from(error: &TaskError) -> Self {
        JobError {
            kind: error.kind_str().to_owned(),
            message: error.to_string(),
        }
    }
}

/// Serialized unit of background work.
///
/// A job belongs to exactly one queue for its lifetime. `attempt` counts
/// completed executions and is incremented by the broker on every requeue or
/// dead-letter, so total executions never exceed `max_retries + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task_name: String,
    /// Positional handler parameters. Round-trips exactly through JSON.
    pub args: Vec<Value>,
    /// Named handler parameters. Round-trips exactly through JSON.
    pub kwargs: Map<String, Value>,
    pub queue: String,
    pub attempt: u32,
    /// Retry ceiling copied from the task's registered policy at enqueue, so
    /// a later policy change does not affect jobs already in flight.
    pub max_retries: u32,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job is eligible for lease again. Backoff is applied
    /// by moving this into the future.
    pub not_before: DateTime<Utc>,
    pub last_error: Option<JobError>,
}

impl Job {
    pub fn new(
        task_name: impl Into<String>,
        queue: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            task_name: task_name.into(),
            args,
            kwargs,
            queue: queue.into(),
            attempt: 0,
            max_retries,
            state: JobState::Pending,
            created_at: now,
            not_before: now,
            last_error: None,
        }
    }

    /// Compute an eligibility timestamp `delay` from `now`, saturating
    /// instead of overflowing for absurd delays.
    pub fn eligible_after(delay: std::time::Duration) -> DateTime<Utc> {
        let delta = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trips_through_json() {
        let mut kwargs = Map::new();
        kwargs.insert("since".to_owned(), Value::Null);
        let job = Job::new(
            "ingest_gmail_activities",
            "ingestion",
            vec![json!(1), json!("x")],
            kwargs,
            3,
        );

        let encoded = serde_json::to_string(&job).unwrap();
        let decoded: Job = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.args, vec![json!(1), json!("x")]);
        assert_eq!(decoded.kwargs.get("since"), Some(&Value::Null));
        assert_eq!(decoded.state, JobState::Pending);
        assert_eq!(decoded.max_retries, 3);
    }

    #[test]
    fn state_strings_round_trip() {
        for state in [
            JobState::Pending,
            JobState::Running,
            JobState::Succeeded,
            JobState::Retrying,
            JobState::Dead,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("paused".parse::<JobState>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Dead.is_terminal());
        assert!(!JobState::Retrying.is_terminal());
    }
}
