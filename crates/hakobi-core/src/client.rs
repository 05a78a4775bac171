//! Submission surface: validate against the registry, route, and enqueue.
//!
//! Submission returns only a job id; execution failures are never surfaced
//! here. A submission that fails validation never enters a queue.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::broker::Enqueue;
use crate::error::SubmitError;
use crate::job::{Job, JobId};
use crate::registry::TaskRegistry;
use crate::router;

/// A job waiting to be submitted. Serialization happens in the builder so a
/// non-JSON-safe value fails before anything touches the broker.
#[derive(Debug, Clone)]
pub struct Submission {
    task_name: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    queue: Option<String>,
    delay: Duration,
    max_retries: Option<u32>,
}

impl Submission {
    pub fn new(task_name: impl Into<String>) -> Self {
        Submission {
            task_name: task_name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            queue: None,
            delay: Duration::ZERO,
            max_retries: None,
        }
    }

    /// Replace the positional parameters; must serialize to a JSON array
    /// (tuples and `Vec`s do).
    pub fn args<A: Serialize>(self, args: A) -> Result<Self, SubmitError> {
        match serde_json::to_value(args)? {
            Value::Array(args) => Ok(Self { args, ..self }),
            _ => Err(SubmitError::InvalidShape(
                "args must serialize to a JSON array",
            )),
        }
    }

    /// Append one positional parameter.
    pub fn arg<A: Serialize>(mut self, value: A) -> Result<Self, SubmitError> {
        self.args.push(serde_json::to_value(value)?);
        Ok(self)
    }

    /// Replace the named parameters; must serialize to a JSON object.
    pub fn kwargs<K: Serialize>(self, kwargs: K) -> Result<Self, SubmitError> {
        match serde_json::to_value(kwargs)? {
            Value::Object(kwargs) => Ok(Self { kwargs, ..self }),
            _ => Err(SubmitError::InvalidShape(
                "kwargs must serialize to a JSON object",
            )),
        }
    }

    /// Set one named parameter.
    pub fn kwarg<V: Serialize>(mut self, key: &str, value: V) -> Result<Self, SubmitError> {
        self.kwargs
            .insert(key.to_owned(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Route to an explicit queue instead of the task's default.
    pub fn queue(self, queue: impl Into<String>) -> Self {
        Self {
            queue: Some(queue.into()),
            ..self
        }
    }

    /// Delay eligibility for the first execution.
    pub fn delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    /// Override the retry ceiling the registered policy would copy in.
    pub fn max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..self
        }
    }
}

/// Producer handle: routes submissions through the registry into a broker
/// transport. Cheap to clone alongside a cloneable transport.
pub struct Client<E> {
    registry: Arc<TaskRegistry>,
    transport: E,
}

impl<E: Clone> Clone for Client<E> {
    fn clone(&self) -> Self {
        Client {
            registry: Arc::clone(&self.registry),
            transport: self.transport.clone(),
        }
    }
}

impl<E> Client<E> {
    pub fn new(registry: Arc<TaskRegistry>, transport: E) -> Self {
        Client {
            registry,
            transport,
        }
    }
}

impl<E> Client<E>
where
    E: Enqueue,
{
    /// Validate, route, and enqueue. Returns the assigned job id.
    ///
    /// Unknown task names fail here with `UnroutableTask` so they never
    /// appear in any queue. The job's retry ceiling is the registered
    /// policy's at this moment; later policy changes do not affect it.
    pub async fn submit(&self, submission: Submission) -> Result<JobId, SubmitError> {
        let task = self
            .registry
            .resolve(&submission.task_name)
            .ok_or_else(|| SubmitError::UnroutableTask(submission.task_name.clone()))?;

        let queue = router::route(submission.queue.as_deref(), task.default_queue());
        let max_retries = submission
            .max_retries
            .unwrap_or_else(|| task.policy().retry_limit());

        let mut job = Job::new(
            submission.task_name,
            queue,
            submission.args,
            submission.kwargs,
            max_retries,
        );
        if !submission.delay.is_zero() {
            job.not_before = Job::eligible_after(submission.delay);
        }

        self.transport
            .enqueue(&job)
            .await
            .map_err(|error| SubmitError::Transport(Box::new(error)))?;

        tracing::debug!(
            task = %job.task_name,
            job_id = %job.id,
            queue = %job.queue,
            "job enqueued"
        );
        Ok(job.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use crate::registry::{TaskOptions, handler_fn};
    use serde_json::json;

    fn registry_with(name: &str, options: TaskOptions) -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry
            .register_task(
                name,
                handler_fn(|_args, _kwargs| async {
                    Ok::<Value, crate::error::TaskError>(Value::Null)
                }),
                options,
            )
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn unroutable_submission_never_enters_a_queue() {
        let broker = MemoryBroker::new();
        let client = Client::new(Arc::new(TaskRegistry::new()), broker.clone());

        let err = client
            .submit(Submission::new("ingest_gmail_activities"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::UnroutableTask(name) if name == "ingest_gmail_activities"));
        assert_eq!(broker.queue_depth(router::DEFAULT_QUEUE), 0);
    }

    #[tokio::test]
    async fn routing_falls_back_to_task_default_then_global() {
        let broker = MemoryBroker::new();
        let registry = registry_with("find_matches", TaskOptions::default().queue("ai"));
        let client = Client::new(registry, broker.clone());

        client.submit(Submission::new("find_matches")).await.unwrap();
        assert_eq!(broker.queue_depth("ai"), 1);

        client
            .submit(Submission::new("find_matches").queue("priority"))
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("priority"), 1);
    }

    #[tokio::test]
    async fn retry_ceiling_is_copied_at_enqueue() {
        let broker = MemoryBroker::new();
        let registry = registry_with(
            "update_user_embeddings",
            TaskOptions::default().policy(crate::retry::RetryPolicy::new().max_retries(7)),
        );
        let client = Client::new(registry, broker.clone());

        let id = client
            .submit(Submission::new("update_user_embeddings"))
            .await
            .unwrap();
        assert_eq!(broker.find(id).unwrap().max_retries, 7);
    }

    #[tokio::test]
    async fn payload_shape_is_validated() {
        let err = Submission::new("t").args(json!({"not": "an array"})).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidShape(_)));

        let err = Submission::new("t").kwargs(json!([1, 2])).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidShape(_)));
    }

    #[tokio::test]
    async fn payload_round_trips_exactly() {
        let broker = MemoryBroker::new();
        let registry = registry_with("echo", TaskOptions::default());
        let client = Client::new(registry, broker.clone());

        let id = client
            .submit(
                Submission::new("echo")
                    .args((1, "x"))
                    .unwrap()
                    .kwarg("since", Option::<String>::None)
                    .unwrap(),
            )
            .await
            .unwrap();

        let job = broker.find(id).unwrap();
        assert_eq!(job.args, vec![json!(1), json!("x")]);
        assert_eq!(job.kwargs.get("since"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_submit_error() {
        use crate::broker::BrokerDriver;

        struct FailingDriver;
        impl BrokerDriver for FailingDriver {
            type Error = std::io::Error;
        }

        struct FailingTransport;
        impl Enqueue for FailingTransport {
            type Driver = FailingDriver;

            async fn enqueue(&self, _job: &Job) -> Result<(), std::io::Error> {
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "broker down",
                ))
            }
        }

        let registry = registry_with("echo", TaskOptions::default());
        let client = Client::new(registry, FailingTransport);
        let err = client.submit(Submission::new("echo")).await.unwrap_err();
        assert!(matches!(err, SubmitError::Transport(_)));
    }

    #[tokio::test]
    async fn delayed_submission_sets_not_before() {
        let broker = MemoryBroker::new();
        let registry = registry_with("later", TaskOptions::default());
        let client = Client::new(registry, broker.clone());

        let id = client
            .submit(Submission::new("later").delay(Duration::from_secs(600)))
            .await
            .unwrap();
        let job = broker.find(id).unwrap();
        assert!(job.not_before > chrono::Utc::now() + chrono::Duration::seconds(500));
    }
}
