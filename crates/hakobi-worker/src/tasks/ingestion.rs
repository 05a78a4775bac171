//! Ingestion pipeline tasks: pull activity from external sources and build
//! embeddings over it.

use hakobi_core::{RegisterError, TaskRegistry};

pub(super) const TASK_NAMES: &[&str] = &[
    "ingest_gmail_activities",
    "ingest_calendar_activities",
    "ingest_twitter_activities",
    "ingest_github_activities",
    "ingest_web_mentions",
    "process_activity_embeddings",
];

pub fn register(registry: &mut TaskRegistry) -> Result<(), RegisterError> {
    for &name in TASK_NAMES {
        registry.register_task(name, super::stub(name), super::options("ingestion"))?;
    }
    Ok(())
}
