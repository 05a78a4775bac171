//! Handwritten SQL for the `hakobi_jobs` table plus row decoding.
//!
//! Every mutation issued on behalf of a lease carries the lease token in its
//! WHERE clause; 0 rows affected means the visibility window expired and the
//! job now belongs to someone else.

use serde_json::Value;
use sqlx::Row as _;
use sqlx::postgres::PgRow;

use hakobi_core::job::{Job, JobError, JobState};

use crate::error::{Error, ErrorKind};

pub(crate) const INSERT_JOB: &str = "\
INSERT INTO hakobi_jobs \
    (id, task_name, args, kwargs, queue_name, attempt, max_retries, state, created_at, not_before) \
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)";

/// Claim the earliest-eligible jobs in one statement. `SKIP LOCKED` keeps
/// concurrent pollers from blocking on each other's candidate rows, and the
/// `running AND leased_until <= now()` arm reclaims leases whose holder died.
pub(crate) const CLAIM_JOBS: &str = "\
WITH candidate AS ( \
    SELECT id FROM hakobi_jobs \
    WHERE queue_name = ANY($1) \
      AND ( \
            (state IN ('pending', 'retrying') AND not_before <= now()) \
         OR (state = 'running' AND leased_until <= now()) \
      ) \
    ORDER BY not_before \
    LIMIT $2 \
    FOR UPDATE SKIP LOCKED \
) \
UPDATE hakobi_jobs AS job \
SET state = 'running', \
    lease_token = gen_random_uuid(), \
    leased_until = now() + $3 \
FROM candidate \
WHERE job.id = candidate.id \
RETURNING job.id, job.task_name, job.args, job.kwargs, job.queue_name, \
          job.attempt, job.max_retries, job.state, job.created_at, \
          job.not_before, job.last_error, job.lease_token";

pub(crate) const ACK_JOB: &str = "\
DELETE FROM hakobi_jobs WHERE id = $1 AND lease_token = $2";

pub(crate) const RETRY_JOB: &str = "\
UPDATE hakobi_jobs \
SET state = 'retrying', \
    attempt = attempt + 1, \
    not_before = now() + $3, \
    last_error = $4, \
    lease_token = NULL, \
    leased_until = NULL \
WHERE id = $1 AND lease_token = $2";

pub(crate) const DEAD_LETTER_JOB: &str = "\
UPDATE hakobi_jobs \
SET state = 'dead', \
    attempt = attempt + 1, \
    last_error = $3, \
    lease_token = NULL, \
    leased_until = NULL \
WHERE id = $1 AND lease_token = $2";

pub(crate) const LIST_DEAD_LETTERS: &str = "\
SELECT id, task_name, args, kwargs, queue_name, attempt, max_retries, \
       state, created_at, not_before, last_error \
FROM hakobi_jobs \
WHERE state = 'dead' \
ORDER BY created_at \
LIMIT $1";

pub(crate) fn attempt_to_db(value: u32) -> Result<i32, Error> {
    i32::try_from(value)
        .map_err(|_| Error::malformed(ErrorKind::Encode, "attempt count exceeds integer range"))
}

fn attempt_from_db(value: i32) -> Result<u32, Error> {
    u32::try_from(value)
        .map_err(|_| Error::malformed(ErrorKind::Decode, "negative attempt count in row"))
}

/// Rebuild the envelope from a row. Payload columns must keep their JSON
/// shape; anything else is a `Decode` error rather than a panic.
pub(crate) fn job_from_row(row: &PgRow) -> Result<Job, Error> {
    let args = match row.try_get::<Value, _>("args")? {
        Value::Array(args) => args,
        _ => return Err(Error::malformed(ErrorKind::Decode, "args is not a JSON array")),
    };
    let kwargs = match row.try_get::<Value, _>("kwargs")? {
        Value::Object(kwargs) => kwargs,
        _ => {
            return Err(Error::malformed(
                ErrorKind::Decode,
                "kwargs is not a JSON object",
            ));
        }
    };
    let state = row
        .try_get::<String, _>("state")?
        .parse::<JobState>()
        .map_err(|message| Error::malformed(ErrorKind::Decode, message))?;
    let last_error = row
        .try_get::<Option<Value>, _>("last_error")?
        .map(serde_json::from_value::<JobError>)
        .transpose()
        .map_err(|error| Error::malformed(ErrorKind::Decode, error.to_string()))?;

    Ok(Job {
        id: row.try_get("id")?,
        task_name: row.try_get("task_name")?,
        args,
        kwargs,
        queue: row.try_get("queue_name")?,
        attempt: attempt_from_db(row.try_get("attempt")?)?,
        max_retries: attempt_from_db(row.try_get("max_retries")?)?,
        state,
        created_at: row.try_get("created_at")?,
        not_before: row.try_get("not_before")?,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_conversion_bounds() {
        assert_eq!(attempt_to_db(3).unwrap(), 3);
        assert!(attempt_to_db(u32::MAX).is_err());
        assert_eq!(attempt_from_db(0).unwrap(), 0);
        assert!(attempt_from_db(-1).is_err());
    }
}
