//! Task registry: name -> handler + retry policy + default queue.
//!
//! Built once during startup, before the worker pool leases anything, then
//! frozen behind an `Arc`. Read-only afterwards, so concurrent slots resolve
//! without locking.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{RegisterError, TaskError};
use crate::retry::RetryPolicy;
use crate::router;

/// A task implementation. Handlers receive the deserialized payload and
/// report success or a classified failure; they must tolerate duplicate
/// execution because delivery is at-least-once.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, args: Vec<Value>, kwargs: Map<String, Value>)
    -> Result<Value, TaskError>;
}

/// Adapter so plain async functions and closures can act as handlers.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send,
{
    async fn run(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        (self.0)(args, kwargs).await
    }
}

/// Wrap an async closure as a [`TaskHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send,
{
    FnHandler(f)
}

/// Registration-time settings shared by a family of tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Queue used when a submission does not name one explicitly.
    pub default_queue: Option<String>,
    pub policy: RetryPolicy,
}

impl TaskOptions {
    pub fn queue(self, queue: impl Into<String>) -> Self {
        Self {
            default_queue: Some(queue.into()),
            ..self
        }
    }

    pub fn policy(self, policy: RetryPolicy) -> Self {
        Self { policy, ..self }
    }
}

/// A handler with its registered routing and retry settings.
pub struct RegisteredTask {
    handler: Arc<dyn TaskHandler>,
    policy: RetryPolicy,
    default_queue: Option<String>,
}

impl RegisteredTask {
    pub fn handler(&self) -> Arc<dyn TaskHandler> {
        Arc::clone(&self.handler)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn default_queue(&self) -> Option<&str> {
        self.default_queue.as_deref()
    }
}

/// One registration per name; the first binding stays active.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, RegisteredTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry::default()
    }

    /// Register a handler with default options (global queue, default policy).
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl TaskHandler + 'static,
    ) -> Result<(), RegisterError> {
        self.register_task(name, handler, TaskOptions::default())
    }

    /// Register a handler with explicit routing and retry settings.
    pub fn register_task(
        &mut self,
        name: impl Into<String>,
        handler: impl TaskHandler + 'static,
        options: TaskOptions,
    ) -> Result<(), RegisterError> {
        let name = name.into();
        if self.tasks.contains_key(&name) {
            return Err(RegisterError::DuplicateTask(name));
        }
        if let Some(queue) = options.default_queue.as_deref() {
            if !router::is_valid_queue_name(queue) {
                return Err(RegisterError::InvalidQueue {
                    task: name,
                    queue: queue.to_owned(),
                });
            }
        }

        self.tasks.insert(
            name,
            RegisteredTask {
                handler: Arc::new(handler),
                policy: options.policy,
                default_queue: options.default_queue,
            },
        );
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<&RegisteredTask> {
        self.tasks.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> impl TaskHandler + 'static {
        handler_fn(|_args, _kwargs| async { Ok::<Value, TaskError>(Value::Null) })
    }

    #[test]
    fn duplicate_registration_keeps_first_binding() {
        let mut registry = TaskRegistry::new();
        registry
            .register_task("generate_narratives", noop(), TaskOptions::default().queue("ai"))
            .unwrap();

        let err = registry
            .register_task(
                "generate_narratives",
                noop(),
                TaskOptions::default().queue("ingestion"),
            )
            .unwrap_err();
        assert_eq!(
            err,
            RegisterError::DuplicateTask("generate_narratives".into())
        );

        // First registration still active.
        let task = registry.resolve("generate_narratives").unwrap();
        assert_eq!(task.default_queue(), Some("ai"));
    }

    #[test]
    fn unknown_name_does_not_resolve() {
        let registry = TaskRegistry::new();
        assert!(registry.resolve("ingest_gmail_activities").is_none());
    }

    #[test]
    fn invalid_default_queue_is_rejected() {
        let mut registry = TaskRegistry::new();
        let err = registry
            .register_task("bad", noop(), TaskOptions::default().queue(""))
            .unwrap_err();
        assert!(matches!(err, RegisterError::InvalidQueue { .. }));
    }

    #[tokio::test]
    async fn closure_handler_receives_payload() {
        let mut registry = TaskRegistry::new();
        registry
            .register(
                "echo_first_arg",
                handler_fn(|args, _kwargs| async move {
                    args.into_iter()
                        .next()
                        .ok_or_else(|| TaskError::invalid_args("expected one argument"))
                }),
            )
            .unwrap();

        let handler = registry.resolve("echo_first_arg").unwrap().handler();
        let out = handler
            .run(vec![json!("hello")], Map::new())
            .await
            .unwrap();
        assert_eq!(out, json!("hello"));
    }
}
