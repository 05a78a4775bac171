//! Producer-side Postgres transport plus dead-letter inspection.

use serde_json::Value;

use hakobi_core::broker::Enqueue;
use hakobi_core::job::Job;

use crate::backend::PostgresDriver;
use crate::error::Error;
use crate::queries;

/// A handle used to store jobs in the Postgres-backed queue. Cheap to clone;
/// every clone shares the pool.
#[derive(Debug, Clone)]
pub struct Client {
    pool: sqlx::PgPool,
}

impl Client {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// List dead-lettered jobs, oldest first, for inspection.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<Job>, Error> {
        let rows = sqlx::query(queries::LIST_DEAD_LETTERS)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(queries::job_from_row).collect()
    }
}

impl Enqueue for Client {
    type Driver = PostgresDriver;

    async fn enqueue(&self, job: &Job) -> Result<(), Error> {
        sqlx::query(queries::INSERT_JOB)
            .bind(job.id)
            .bind(&job.task_name)
            .bind(Value::Array(job.args.clone()))
            .bind(Value::Object(job.kwargs.clone()))
            .bind(&job.queue)
            .bind(queries::attempt_to_db(job.attempt)?)
            .bind(queries::attempt_to_db(job.max_retries)?)
            .bind(job.state.as_str())
            .bind(job.created_at)
            .bind(job.not_before)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
