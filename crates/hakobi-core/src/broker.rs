//! Broker-facing traits: enqueue jobs, lease them, and persist outcomes.
//!
//! Small surface, strong separation: the worker drives; the broker stores.
//! The broker owns lease semantics and the visibility window, so a lease
//! that is never finalized becomes eligible again on its own. That expiry is
//! what gives at-least-once delivery without core-side crash recovery.
//! Finalization methods consume `self` to forbid double-commit by type.

use std::time::Duration;

use crate::job::{Job, JobError};

mod tmp {
    use super::*;

    /// Broker marker carrying the transport-specific error type.
    pub trait BrokerDriver: Send {
        type Error: std::error::Error + Send + 'static;
    }

    /// Time-boxed claim on one job. Exactly one of the three finalizers may
    /// run, and only while the claim is still held; a transport should fail
    /// with its lost-lease error if the visibility window already expired
    /// and the job was handed to someone else.
    #[trait_variant::make(LeaseContext: Send)]
    pub trait LocalLeaseContext {
        type Driver: BrokerDriver;

        /// Permanently remove the job from the backlog.
        #[allow(unused)]
        async fn ack(self) -> Result<(), <Self::Driver as BrokerDriver>::Error>;

        /// Reinsert the job into its queue with `not_before = now + delay`,
        /// incrementing its attempt count and recording the failure.
        #[allow(unused)]
        async fn requeue(
            self,
            delay: Duration,
            error: &JobError,
        ) -> Result<(), <Self::Driver as BrokerDriver>::Error>;

        /// Move the job to the inspection sink; it will never run again.
        #[allow(unused)]
        async fn dead_letter(
            self,
            error: &JobError,
        ) -> Result<(), <Self::Driver as BrokerDriver>::Error>;
    }

    /// Pair of job envelope and lease handle.
    pub struct Leased<Context> {
        job: Job,
        context: Context,
    }

    impl<Context> Leased<Context> {
        /// Separate envelope and lease for dispatch and bookkeeping.
        pub fn split_parts(self) -> (Job, Context) {
            (self.job, self.context)
        }

        /// Build a leased job from envelope and lease handle.
        pub fn from_parts(job: Job, context: Context) -> Self {
            Self { job, context }
        }

        pub fn job(&self) -> &Job {
            &self.job
        }
    }

    /// Worker-side view of the broker: claim the earliest-eligible jobs from
    /// the poller's configured queues.
    #[trait_variant::make(BrokerPoller: Send)]
    pub trait LocalBrokerPoller {
        type Driver: BrokerDriver;
        type Context: LeaseContext + Send + 'static;

        /// Atomically claim up to `batch_size` eligible jobs, marking each
        /// invisible to other leasers for the transport's visibility window.
        /// Yields per-job results to avoid head-of-line blocking on errors.
        #[allow(unused)]
        async fn poll_job(
            &mut self,
            batch_size: usize,
        ) -> Vec<Result<Leased<Self::Context>, <Self::Driver as BrokerDriver>::Error>>;
    }

    /// Producer-side view of the broker. Safe to call concurrently.
    #[trait_variant::make(Enqueue: Send)]
    pub trait LocalEnqueue {
        type Driver: BrokerDriver;

        /// Serialize and store the job in its target queue.
        #[allow(unused)]
        async fn enqueue(&self, job: &Job) -> Result<(), <Self::Driver as BrokerDriver>::Error>;
    }
}

pub use tmp::{BrokerDriver, BrokerPoller, Enqueue, LeaseContext, Leased};
