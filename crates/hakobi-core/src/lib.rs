//! Core contract for queue-backed background task execution.
//!
//! Submissions route through a frozen task registry into named queues; a
//! bounded pool of worker slots leases jobs, runs handlers under a time
//! limit, and the retry policy decides requeue-with-backoff versus
//! dead-letter. Delivery is at-least-once: all mutual exclusion over "who
//! runs this job" is the broker's lease/ack protocol, never in-process
//! locks, so handlers must tolerate duplicate execution.
//!
//! Storage policy stays behind the broker traits; this crate is
//! runtime-agnostic apart from the optional Tokio spawner.
pub mod broker;
pub mod client;
pub mod error;
pub mod job;
pub mod memory;
pub mod registry;
pub mod retry;
pub mod router;
pub mod utils;
pub mod worker;

#[cfg(feature = "rt-tokio")]
mod tokio_spawner;
#[cfg(feature = "rt-tokio")]
pub use tokio_spawner::TokioSpawner;

pub use broker::{BrokerDriver, BrokerPoller, Enqueue, LeaseContext, Leased};
pub use client::{Client, Submission};
pub use error::{FailureKind, RegisterError, SubmitError, TaskError};
pub use job::{Job, JobError, JobId, JobState};
pub use memory::MemoryBroker;
pub use registry::{TaskHandler, TaskOptions, TaskRegistry, handler_fn};
pub use retry::{Backoff, Decision, RetryPolicy};
pub use router::DEFAULT_QUEUE;
pub use worker::{
    FailureHook, InlineSpawner, JobSpawner, WorkerPool, WorkerPoolBuilder,
    WorkerPoolWithGracefulShutdown,
};
