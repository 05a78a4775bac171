//! In-process broker with the same lease semantics as the Postgres
//! transport: visibility windows, lease tokens, dead-letter sink.
//!
//! Exists for deterministic tests and single-process development. State
//! lives behind one mutex that is never held across an await.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::broker::{BrokerDriver, BrokerPoller, Enqueue, LeaseContext, Leased};
use crate::job::{Job, JobError, JobId, JobState};

pub struct MemoryDriver;

impl BrokerDriver for MemoryDriver {
    type Error = MemoryError;
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The visibility window expired and the job was handed elsewhere, or it
    /// was already finalized.
    #[error("lease for job {0} is no longer held")]
    LostLease(JobId),
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Stored {
    job: Job,
    lease: Option<Lease>,
}

#[derive(Debug, Default)]
struct Shared {
    backlog: Vec<Stored>,
    dead: Vec<Job>,
    acked: Vec<JobId>,
}

/// Shared in-memory backlog. Cloning yields another handle to the same
/// state; producers and pollers see one backlog.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Mutex<Shared>>,
    visibility: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub const DEFAULT_VISIBILITY: Duration = Duration::from_secs(30);

    pub fn new() -> Self {
        MemoryBroker {
            shared: Arc::new(Mutex::new(Shared::default())),
            visibility: Self::DEFAULT_VISIBILITY,
        }
    }

    /// Override how long a lease stays invisible before automatic
    /// redelivery.
    pub fn visibility_window(self, visibility: Duration) -> Self {
        Self { visibility, ..self }
    }

    /// Worker-side handle servicing the given queues in order.
    pub fn poller<I, S>(&self, queues: I) -> MemoryPoller
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MemoryPoller {
            shared: Arc::clone(&self.shared),
            queues: queues.into_iter().map(Into::into).collect(),
            visibility: self.visibility,
        }
    }

    /// Jobs waiting (unleased) in a queue.
    pub fn queue_depth(&self, queue: &str) -> usize {
        lock(&self.shared)
            .backlog
            .iter()
            .filter(|stored| stored.job.queue == queue && stored.lease.is_none())
            .count()
    }

    /// Snapshot of the dead-letter sink, oldest first.
    pub fn dead_letters(&self) -> Vec<Job> {
        lock(&self.shared).dead.clone()
    }

    /// Identifiers of acknowledged (successfully completed) jobs.
    pub fn acked(&self) -> Vec<JobId> {
        lock(&self.shared).acked.clone()
    }

    /// Current snapshot of a job still in the backlog.
    pub fn find(&self, id: JobId) -> Option<Job> {
        lock(&self.shared)
            .backlog
            .iter()
            .find(|stored| stored.job.id == id)
            .map(|stored| stored.job.clone())
    }
}

impl Enqueue for MemoryBroker {
    type Driver = MemoryDriver;

    async fn enqueue(&self, job: &Job) -> Result<(), MemoryError> {
        lock(&self.shared).backlog.push(Stored {
            job: job.clone(),
            lease: None,
        });
        Ok(())
    }
}

/// Claims the earliest-eligible jobs across its configured queues.
pub struct MemoryPoller {
    shared: Arc<Mutex<Shared>>,
    queues: Vec<String>,
    visibility: Duration,
}

impl BrokerPoller for MemoryPoller {
    type Driver = MemoryDriver;
    type Context = MemoryLeaseContext;

    async fn poll_job(
        &mut self,
        batch_size: usize,
    ) -> Vec<Result<Leased<MemoryLeaseContext>, MemoryError>> {
        let now = Utc::now();
        let mut shared = lock(&self.shared);

        // Expired leases become eligible again: this is the at-least-once
        // redelivery path for crashed workers.
        for stored in shared.backlog.iter_mut() {
            if let Some(lease) = stored.lease {
                if lease.expires_at <= now {
                    stored.lease = None;
                    stored.job.state = JobState::Pending;
                }
            }
        }

        let mut eligible: Vec<usize> = shared
            .backlog
            .iter()
            .enumerate()
            .filter(|(_, stored)| {
                stored.lease.is_none()
                    && !stored.job.state.is_terminal()
                    && stored.job.not_before <= now
                    && self.queues.contains(&stored.job.queue)
            })
            .map(|(index, _)| index)
            .collect();
        // Within a queue only eligible jobs compete, earliest-eligible-first.
        eligible.sort_by_key(|&index| shared.backlog[index].job.not_before);
        eligible.truncate(batch_size);

        let mut leased = Vec::with_capacity(eligible.len());
        for index in eligible {
            let token = Uuid::new_v4();
            let stored = &mut shared.backlog[index];
            stored.lease = Some(Lease {
                token,
                expires_at: now
                    + chrono::Duration::from_std(self.visibility)
                        .unwrap_or(chrono::Duration::MAX),
            });
            stored.job.state = JobState::Running;
            leased.push(Ok(Leased::from_parts(
                stored.job.clone(),
                MemoryLeaseContext {
                    id: stored.job.id,
                    token,
                    shared: Arc::clone(&self.shared),
                },
            )));
        }
        leased
    }
}

/// Lease handle scoped to one claimed job.
pub struct MemoryLeaseContext {
    id: JobId,
    token: Uuid,
    shared: Arc<Mutex<Shared>>,
}

impl MemoryLeaseContext {
    /// Index of the held job, or `LostLease` if it was finalized or
    /// re-leased after the visibility window expired.
    fn held_index(&self, shared: &Shared) -> Result<usize, MemoryError> {
        shared
            .backlog
            .iter()
            .position(|stored| {
                stored.job.id == self.id
                    && stored.lease.is_some_and(|lease| lease.token == self.token)
            })
            .ok_or(MemoryError::LostLease(self.id))
    }
}

impl LeaseContext for MemoryLeaseContext {
    type Driver = MemoryDriver;

    async fn ack(self) -> Result<(), MemoryError> {
        let mut shared = lock(&self.shared);
        let index = self.held_index(&shared)?;
        shared.backlog.remove(index);
        shared.acked.push(self.id);
        Ok(())
    }

    async fn requeue(self, delay: Duration, error: &JobError) -> Result<(), MemoryError> {
        let mut shared = lock(&self.shared);
        let index = self.held_index(&shared)?;
        let stored = &mut shared.backlog[index];
        stored.lease = None;
        stored.job.attempt += 1;
        stored.job.state = JobState::Retrying;
        stored.job.not_before = Job::eligible_after(delay);
        stored.job.last_error = Some(error.clone());
        Ok(())
    }

    async fn dead_letter(self, error: &JobError) -> Result<(), MemoryError> {
        let mut shared = lock(&self.shared);
        let index = self.held_index(&shared)?;
        let mut stored = shared.backlog.remove(index);
        stored.job.attempt += 1;
        stored.job.state = JobState::Dead;
        stored.job.last_error = Some(error.clone());
        shared.dead.push(stored.job);
        Ok(())
    }
}

fn lock(shared: &Arc<Mutex<Shared>>) -> MutexGuard<'_, Shared> {
    // A poisoned lock only means another worker panicked mid-update of
    // plain data; the backlog itself is still usable.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn job_in(queue: &str) -> Job {
        Job::new("noop", queue, Vec::new(), Map::new(), 3)
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_expiry() {
        let broker = MemoryBroker::new();
        broker.enqueue(&job_in("default")).await.unwrap();

        let mut poller = broker.poller(["default"]);
        let first = poller.poll_job(5).await;
        assert_eq!(first.len(), 1);

        // Same job must not be handed out twice while leased.
        let second = poller.poll_job(5).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered() {
        let broker = MemoryBroker::new().visibility_window(Duration::from_millis(10));
        let job = job_in("default");
        broker.enqueue(&job).await.unwrap();

        let mut poller = broker.poller(["default"]);
        let leased = poller.poll_job(1).await;
        assert_eq!(leased.len(), 1);
        // Simulate a crash: drop the lease without finalizing.
        drop(leased);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let redelivered = poller.poll_job(1).await;
        assert_eq!(redelivered.len(), 1);
        let (redelivered_job, context) = redelivered
            .into_iter()
            .next()
            .unwrap()
            .unwrap()
            .split_parts();
        assert_eq!(redelivered_job.id, job.id);
        context.ack().await.unwrap();
        assert_eq!(broker.acked(), vec![job.id]);
    }

    #[tokio::test]
    async fn stale_lease_cannot_finalize() {
        let broker = MemoryBroker::new().visibility_window(Duration::from_millis(10));
        broker.enqueue(&job_in("default")).await.unwrap();

        let mut poller = broker.poller(["default"]);
        let stale = poller.poll_job(1).await.remove(0).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let fresh = poller.poll_job(1).await.remove(0).unwrap();

        let (_, stale_context) = stale.split_parts();
        assert!(matches!(
            stale_context.ack().await,
            Err(MemoryError::LostLease(_))
        ));

        let (_, fresh_context) = fresh.split_parts();
        fresh_context.ack().await.unwrap();
    }

    #[tokio::test]
    async fn poller_only_sees_its_queues() {
        let broker = MemoryBroker::new();
        broker.enqueue(&job_in("ingestion")).await.unwrap();
        broker.enqueue(&job_in("ai")).await.unwrap();

        let mut poller = broker.poller(["ai"]);
        let leased = poller.poll_job(10).await;
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].as_ref().unwrap().job().queue, "ai");
        assert_eq!(broker.queue_depth("ingestion"), 1);
    }

    #[tokio::test]
    async fn delayed_job_is_not_eligible_early() {
        let broker = MemoryBroker::new();
        let mut job = job_in("default");
        job.not_before = Job::eligible_after(Duration::from_secs(3600));
        broker.enqueue(&job).await.unwrap();

        let mut poller = broker.poller(["default"]);
        assert!(poller.poll_job(1).await.is_empty());
    }

    #[tokio::test]
    async fn eligible_jobs_come_earliest_first() {
        let broker = MemoryBroker::new();
        let mut late = job_in("default");
        late.not_before = late.not_before - chrono::Duration::seconds(10);
        let mut early = job_in("default");
        early.not_before = early.not_before - chrono::Duration::seconds(60);
        broker.enqueue(&late).await.unwrap();
        broker.enqueue(&early).await.unwrap();

        let mut poller = broker.poller(["default"]);
        let leased = poller.poll_job(1).await;
        assert_eq!(leased[0].as_ref().unwrap().job().id, early.id);
    }

    #[tokio::test]
    async fn requeue_applies_backoff_and_attempt() {
        let broker = MemoryBroker::new();
        let job = job_in("default");
        broker.enqueue(&job).await.unwrap();

        let mut poller = broker.poller(["default"]);
        let (_, context) = poller.poll_job(1).await.remove(0).unwrap().split_parts();
        let error = JobError {
            kind: "failed".into(),
            message: "boom".into(),
        };
        context
            .requeue(Duration::from_secs(300), &error)
            .await
            .unwrap();

        let stored = broker.find(job.id).unwrap();
        assert_eq!(stored.attempt, 1);
        assert_eq!(stored.state, JobState::Retrying);
        assert!(stored.not_before > Utc::now() + chrono::Duration::seconds(250));
        assert_eq!(stored.last_error.unwrap().message, "boom");

        // Not eligible until the backoff passes.
        assert!(poller.poll_job(1).await.is_empty());
    }
}
