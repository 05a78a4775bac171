//! Task surface: every name producers may submit, bound to its queue and
//! retry policy.
//!
//! All handlers are currently stubs that fail with `not_implemented`; that
//! failure is permanent, so a submitted job dead-letters on its first
//! execution instead of burning retry budget. The bindings keep routing and
//! retry behavior stable while the pipelines land one by one.

pub mod ai;
pub mod ingestion;

use std::time::Duration;

use serde_json::{Map, Value};

use hakobi_core::{
    Backoff, RegisterError, RetryPolicy, TaskError, TaskHandler, TaskOptions, TaskRegistry,
    handler_fn,
};

const MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(300);

fn options(queue: &str) -> TaskOptions {
    TaskOptions::default().queue(queue).policy(
        RetryPolicy::new()
            .max_retries(MAX_RETRIES)
            .backoff(Backoff::Fixed(DEFAULT_RETRY_DELAY)),
    )
}

fn stub(name: &'static str) -> impl TaskHandler + 'static {
    handler_fn(move |args: Vec<Value>, kwargs: Map<String, Value>| async move {
        tracing::info!(task = name, ?args, ?kwargs, "pipeline not built yet");
        Err::<Value, _>(TaskError::not_implemented(name))
    })
}

/// Bind every known task. Call once at startup, before the pool leases
/// anything.
pub fn register_all(registry: &mut TaskRegistry) -> Result<(), RegisterError> {
    ingestion::register(registry)?;
    ai::register(registry)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        register_all(&mut registry).unwrap();
        registry
    }

    #[test]
    fn every_task_is_registered_with_its_queue() {
        let registry = full_registry();
        assert_eq!(registry.len(), 12);
        for name in ingestion::TASK_NAMES {
            let task = registry.resolve(name).unwrap();
            assert_eq!(task.default_queue(), Some("ingestion"));
            assert_eq!(task.policy().retry_limit(), MAX_RETRIES);
        }
        for name in ai::TASK_NAMES {
            let task = registry.resolve(name).unwrap();
            assert_eq!(task.default_queue(), Some("ai"));
            assert_eq!(task.policy().retry_limit(), MAX_RETRIES);
        }
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = full_registry();
        assert!(matches!(
            ingestion::register(&mut registry),
            Err(RegisterError::DuplicateTask(_))
        ));
    }

    #[tokio::test]
    async fn stubs_fail_permanently() {
        let registry = full_registry();
        let handler = registry.resolve("find_matches").unwrap().handler();
        let err = handler.run(Vec::new(), Map::new()).await.unwrap_err();
        assert!(matches!(err, TaskError::NotImplemented { .. }));
        assert_eq!(err.kind(), hakobi_core::FailureKind::Permanent);
    }
}
