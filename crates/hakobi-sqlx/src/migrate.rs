//! Schema bootstrap, safe to run on every startup.

use crate::error::Error;

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS hakobi_jobs ( \
    id UUID PRIMARY KEY, \
    task_name TEXT NOT NULL, \
    args JSONB NOT NULL DEFAULT '[]'::jsonb, \
    kwargs JSONB NOT NULL DEFAULT '{}'::jsonb, \
    queue_name TEXT NOT NULL, \
    attempt INTEGER NOT NULL DEFAULT 0, \
    max_retries INTEGER NOT NULL DEFAULT 3, \
    state TEXT NOT NULL DEFAULT 'pending', \
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
    not_before TIMESTAMPTZ NOT NULL DEFAULT now(), \
    last_error JSONB, \
    lease_token UUID, \
    leased_until TIMESTAMPTZ \
); \
CREATE INDEX IF NOT EXISTS hakobi_jobs_poll_idx \
    ON hakobi_jobs (queue_name, not_before) \
    WHERE state IN ('pending', 'retrying', 'running');";

/// Create the jobs table and its poll index if they do not exist yet.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    tracing::debug!("hakobi_jobs schema ensured");
    Ok(())
}
