//! Worker-side Postgres transport: claim leases, finalize outcomes.

use std::time::Duration;

use sqlx::postgres::types::PgInterval;
use uuid::Uuid;

use hakobi_core::broker::{BrokerDriver, BrokerPoller, LeaseContext, Leased};
use hakobi_core::job::JobError;

use crate::error::Error;
use crate::queries;

pub struct PostgresDriver;
impl BrokerDriver for PostgresDriver {
    type Error = Error;
}

/// Backend for leasing and finalizing jobs from Postgres.
///
/// Polls every configured queue in one statement; rows claimed by other
/// workers are skipped, not waited on.
#[derive(Debug, Clone)]
pub struct BackEnd {
    pool: sqlx::PgPool,
    queues: Vec<String>,
    lease_time: Duration,
}

impl BackEnd {
    const DEFAULT_LEASE_TIME: Duration = Duration::from_secs(30);

    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            pool,
            queues: vec![hakobi_core::DEFAULT_QUEUE.to_owned()],
            lease_time: Self::DEFAULT_LEASE_TIME,
        }
    }

    /// Replace the set of queues this poller drains.
    pub fn queues<I, S>(self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queues: queues.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Visibility window granted per claim. A job whose window expires
    /// without a finalizer becomes eligible again.
    pub fn lease_time(self, lease_time: Duration) -> Self {
        Self { lease_time, ..self }
    }
}

impl BrokerPoller for BackEnd {
    type Driver = PostgresDriver;
    type Context = PgLeaseContext;

    async fn poll_job(
        &mut self,
        batch_size: usize,
    ) -> Vec<Result<Leased<Self::Context>, Error>> {
        let lease_interval = match PgInterval::try_from(self.lease_time) {
            Ok(interval) => interval,
            Err(error) => return vec![Err(Error::new_database(error))],
        };

        let rows = sqlx::query(queries::CLAIM_JOBS)
            .bind(&self.queues)
            .bind(i64::try_from(batch_size).unwrap_or(32))
            .bind(lease_interval)
            .fetch_all(&self.pool)
            .await;
        let rows = match rows {
            Ok(rows) => rows,
            Err(error) => return vec![Err(error.into())],
        };

        rows.iter()
            .map(|row| {
                use sqlx::Row as _;

                let job = queries::job_from_row(row)?;
                let lease_token: Uuid = row.try_get("lease_token")?;
                let context = PgLeaseContext {
                    id: job.id,
                    lease_token,
                    pool: self.pool.clone(),
                };
                Ok(Leased::from_parts(job, context))
            })
            .collect()
    }
}

/// One claim on one row. Finalizers consume `self`; each guards its UPDATE
/// or DELETE with the lease token and reports `LostLease` on 0 rows.
#[derive(Debug)]
pub struct PgLeaseContext {
    id: Uuid,
    lease_token: Uuid,
    pool: sqlx::PgPool,
}

impl LeaseContext for PgLeaseContext {
    type Driver = PostgresDriver;

    async fn ack(self) -> Result<(), Error> {
        let res = sqlx::query(queries::ACK_JOB)
            .bind(self.id)
            .bind(self.lease_token)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(Error::lost_lease());
        }
        Ok(())
    }

    async fn requeue(self, delay: Duration, error: &JobError) -> Result<(), Error> {
        let interval = PgInterval::try_from(delay).map_err(|e| Error::new_database(e))?;
        let last_error = serde_json::to_value(error)?;
        let res = sqlx::query(queries::RETRY_JOB)
            .bind(self.id)
            .bind(self.lease_token)
            .bind(interval)
            .bind(last_error)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(Error::lost_lease());
        }
        Ok(())
    }

    async fn dead_letter(self, error: &JobError) -> Result<(), Error> {
        let last_error = serde_json::to_value(error)?;
        let res = sqlx::query(queries::DEAD_LETTER_JOB)
            .bind(self.id)
            .bind(self.lease_token)
            .bind(last_error)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(Error::lost_lease());
        }
        Ok(())
    }
}
