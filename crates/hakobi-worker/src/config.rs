//! Environment-driven configuration.
//!
//! Everything except `DATABASE_URL` has a default, so a bare container with
//! just the connection string runs with the stock queue set and limits.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{0}`")]
    Missing(&'static str),

    #[error("invalid value `{value}` for `{name}`")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Liveness endpoint port.
    pub port: u16,
    /// Max in-flight jobs per process.
    pub concurrency: usize,
    /// Queues this worker drains, in the order given.
    pub queues: Vec<String>,
    pub poll_interval: Duration,
    /// Hard wall-clock limit per execution.
    pub time_limit: Duration,
}

impl WorkerConfig {
    /// Margin added on top of the execution limit when sizing the lease.
    const LEASE_MARGIN: Duration = Duration::from_secs(30);

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Visibility window granted per claim. Must outlive the longest
    /// allowed execution, otherwise a healthy slow job is redelivered and
    /// runs on two workers at once.
    pub fn lease_time(&self) -> Duration {
        self.time_limit + Self::LEASE_MARGIN
    }

    fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let raw_queues =
            lookup("WORKER_QUEUES").unwrap_or_else(|| "default,ingestion,ai".to_owned());
        let queues: Vec<String> = raw_queues
            .split(',')
            .map(str::trim)
            .filter(|queue| !queue.is_empty())
            .map(str::to_owned)
            .collect();
        if queues.is_empty() {
            return Err(ConfigError::Invalid {
                name: "WORKER_QUEUES",
                value: raw_queues,
            });
        }

        Ok(WorkerConfig {
            database_url,
            port: parse_or(&lookup, "PORT", 8080)?,
            concurrency: parse_or(&lookup, "WORKER_CONCURRENCY", 2)?,
            queues,
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "WORKER_POLL_INTERVAL_MS",
                1_000,
            )?),
            time_limit: Duration::from_secs(parse_or(&lookup, "TASK_TIME_LIMIT_SECS", 3_600)?),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: impl Fn(&'static str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&'static str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<&'static str, String> = vars
            .iter()
            .map(|(name, value)| (*name, (*value).to_owned()))
            .collect();
        WorkerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_with_only_database_url() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/hakobi")]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.queues, vec!["default", "ingestion", "ai"]);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.time_limit, Duration::from_secs(3_600));
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(
            config_from(&[]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        ));
    }

    #[test]
    fn queue_list_is_trimmed() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/hakobi"),
            ("WORKER_QUEUES", " ingestion , ai ,"),
        ])
        .unwrap();
        assert_eq!(config.queues, vec!["ingestion", "ai"]);
    }

    #[test]
    fn empty_queue_list_is_rejected() {
        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/hakobi"),
            ("WORKER_QUEUES", " , "),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "WORKER_QUEUES", .. }));
    }

    #[test]
    fn lease_outlives_the_execution_limit() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/hakobi"),
            ("TASK_TIME_LIMIT_SECS", "120"),
        ])
        .unwrap();
        assert!(config.lease_time() > config.time_limit);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/hakobi"),
            ("WORKER_CONCURRENCY", "many"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "WORKER_CONCURRENCY", .. }));
    }
}
