//! Worker pool engine and builder.
//!
//! Periodic polling, bounded concurrency, a hard per-execution time limit,
//! explicit finalization through the retry policy. Spawning is pluggable so
//! tests can run jobs inline without a runtime.

use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt as _, Stream, StreamExt as _};

use crate::broker::{BrokerPoller, LeaseContext, Leased};
use crate::error::TaskError;
use crate::job::{Job, JobError, JobState};
use crate::registry::TaskRegistry;
use crate::retry::{Decision, RetryPolicy};
use crate::utils::Ticker;

/// How job futures are executed (inline, Tokio, etc.).
pub trait JobSpawner {
    type JobHandle<Fut>: Future<Output = ()> + Send + 'static
    where
        Fut: Future<Output = ()> + Send + 'static;
    fn spawn<Fut>(fut: Fut) -> Self::JobHandle<Fut>
    where
        Fut: Future<Output = ()> + Send + 'static;
}

/// Minimal spawner that runs jobs inline (deterministic tests, no runtime).
pub struct InlineSpawner;

impl JobSpawner for InlineSpawner {
    type JobHandle<Fut>
        = Fut
    where
        Fut: Future<Output = ()> + Send + 'static;
    fn spawn<Fut>(fut: Fut) -> Self::JobHandle<Fut>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        fut
    }
}

/// Stream that wakes the pool to poll the broker.
pub trait TickStream: Stream<Item = ()> + Send {}

impl<St> TickStream for St where St: Stream<Item = ()> + Send {}

/// Callback invoked after every failed execution, before finalization.
/// Receives the envelope (task name, id, args, kwargs, attempt) and the
/// failure; an explicit value instead of an inheritance hook.
pub type FailureHook = Arc<dyn Fn(&Job, &TaskError) + Send + Sync>;

/// Execution time limit applied when a task's policy does not override it.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(3600);

/// Pool of concurrent execution slots over one broker poller.
pub struct WorkerPool<Tick, Poller, Sp>
where
    Tick: TickStream,
    Poller: BrokerPoller,
    Sp: JobSpawner,
{
    tick: Tick,
    poller: Poller,
    registry: Arc<TaskRegistry>,
    concurrent: usize,
    time_limit: Duration,
    on_failure: Option<FailureHook>,
    marker: std::marker::PhantomData<fn() -> Sp>,
}

impl<Tick, Poller, Sp> WorkerPool<Tick, Poller, Sp>
where
    Tick: TickStream,
    Poller: BrokerPoller + 'static,
    Sp: JobSpawner,
{
    /// Add a shutdown signal: stop leasing, drain in-flight executions.
    pub fn with_graceful_shutdown<Signal>(
        self,
        signal: Signal,
    ) -> WorkerPoolWithGracefulShutdown<Tick, Poller, Signal, Sp>
    where
        Signal: Future<Output = ()> + Send,
    {
        let Self {
            tick,
            poller,
            registry,
            concurrent,
            time_limit,
            on_failure,
            marker: _,
        } = self;
        WorkerPoolWithGracefulShutdown {
            tick,
            poller,
            registry,
            concurrent,
            time_limit,
            on_failure,
            signal,
            marker: std::marker::PhantomData,
        }
    }

    /// Run until the tick stream ends (or forever).
    pub fn run(self) -> impl Future<Output = ()> + Send {
        run_pool::<_, _, _, Sp>(
            self.tick,
            self.poller,
            self.registry,
            self.concurrent,
            self.time_limit,
            self.on_failure,
            std::future::pending::<()>(),
        )
    }
}

/// Pool variant that reacts to a shutdown signal and drains tasks.
pub struct WorkerPoolWithGracefulShutdown<Tick, Poller, Signal, Sp>
where
    Tick: TickStream,
    Poller: BrokerPoller,
    Signal: Future<Output = ()> + Send,
    Sp: JobSpawner,
{
    tick: Tick,
    poller: Poller,
    registry: Arc<TaskRegistry>,
    concurrent: usize,
    time_limit: Duration,
    on_failure: Option<FailureHook>,
    signal: Signal,
    marker: std::marker::PhantomData<fn() -> Sp>,
}

impl<Tick, Poller, Signal, Sp> WorkerPoolWithGracefulShutdown<Tick, Poller, Signal, Sp>
where
    Tick: TickStream,
    Poller: BrokerPoller + 'static,
    Signal: Future<Output = ()> + Send,
    Sp: JobSpawner,
{
    /// Run until shutdown, then drain in-flight executions.
    pub fn run(self) -> impl Future<Output = ()> + Send {
        run_pool::<_, _, _, Sp>(
            self.tick,
            self.poller,
            self.registry,
            self.concurrent,
            self.time_limit,
            self.on_failure,
            self.signal,
        )
    }
}

/// Core loop: fetch when capacity is free, spawn, finalize via the policy.
async fn run_pool<Tick, Poller, Signal, Sp>(
    tick: Tick,
    mut poller: Poller,
    registry: Arc<TaskRegistry>,
    concurrent: usize,
    time_limit: Duration,
    on_failure: Option<FailureHook>,
    signal: Signal,
) where
    Tick: TickStream,
    Poller: BrokerPoller + 'static,
    Signal: Future + Send,
    Sp: JobSpawner,
{
    futures::pin_mut!(tick);
    futures::pin_mut!(signal);
    let mut tick = tick.fuse();
    // Track in-flight jobs; FuturesUnordered for fair progress across slots.
    let mut tasks = futures::stream::FuturesUnordered::new();
    let mut signal = signal.fuse();
    loop {
        futures::select! {
            tick_val = tick.next() => {
                // Tick stream ended: stop fetching.
                if tick_val.is_none() { break; }

                // Backpressure: fetch only when capacity is free.
                let free = concurrent.saturating_sub(tasks.len());
                if free == 0 {
                    continue;
                }

                let leased = poller.poll_job(free).await;
                for job in leased {
                    match job {
                        Ok(job) => {
                            let fut = execute_one(
                                job,
                                Arc::clone(&registry),
                                time_limit,
                                on_failure.clone(),
                            );
                            tasks.push(<Sp as JobSpawner>::spawn(fut));
                        },
                        Err(error) => {
                            tracing::error!(error = %error, "Failed to lease job");
                        },
                    }
                }
            },
            _ = tasks.next() => { },
            _ = signal => {
                tracing::info!(
                    in_flight = tasks.len(),
                    "received graceful shutdown signal; draining in-flight jobs"
                );
                break;
            }
        }
    }

    // Drain remaining tasks
    while tasks.next().await.is_some() {}
}

/// Run one leased job to an outcome, then finalize exactly once.
async fn execute_one<Context>(
    leased: Leased<Context>,
    registry: Arc<TaskRegistry>,
    time_limit: Duration,
    on_failure: Option<FailureHook>,
) where
    Context: LeaseContext + Send + 'static,
{
    let (mut job, context) = leased.split_parts();
    job.state = JobState::Running;
    tracing::debug!(
        task = %job.task_name,
        job_id = %job.id,
        queue = %job.queue,
        attempt = job.attempt + 1,
        "task started"
    );

    let outcome = match registry.resolve(&job.task_name) {
        None => Err(TaskError::Unroutable(job.task_name.clone())),
        Some(task) => {
            let handler = task.handler();
            let handler_fut = handler.run(job.args.clone(), job.kwargs.clone()).fuse();
            // Local limit only: the dropped future stops at its next await
            // point, and the lease's visibility window covers anything that
            // keeps running on a foreign executor.
            let deadline = futures_timer::Delay::new(time_limit).fuse();
            futures::pin_mut!(handler_fut);
            futures::pin_mut!(deadline);
            futures::select! {
                res = handler_fut => res,
                _ = deadline => Err(TaskError::Timeout { limit: time_limit }),
            }
        }
    };

    match outcome {
        Ok(_) => {
            job.state = JobState::Succeeded;
            job.last_error = None;
            tracing::debug!(task = %job.task_name, job_id = %job.id, "task succeeded");
            let _ = context
                .ack()
                .await
                .inspect_err(|error| tracing::error!(error = %error, job_id = %job.id, "Failed to ack job"));
        }
        Err(error) => {
            job.attempt += 1;
            let policy = registry
                .resolve(&job.task_name)
                .map(|task| task.policy().clone())
                .unwrap_or_else(RetryPolicy::new);
            let decision = policy.decide(job.attempt, job.max_retries, &error);

            if matches!(error, TaskError::NotImplemented { .. }) {
                tracing::warn!(
                    task = %job.task_name,
                    job_id = %job.id,
                    args = ?job.args,
                    kwargs = ?job.kwargs,
                    attempt = job.attempt,
                    error = %error,
                    "task feature not implemented"
                );
            } else {
                tracing::error!(
                    task = %job.task_name,
                    job_id = %job.id,
                    args = ?job.args,
                    kwargs = ?job.kwargs,
                    attempt = job.attempt,
                    error = %error,
                    kind = error.kind_str(),
                    "task failed"
                );
            }
            if let Some(hook) = &on_failure {
                hook(&job, &error);
            }

            let job_error = JobError::from(&error);
            job.last_error = Some(job_error.clone());
            let _ = match decision {
                Decision::Requeue(delay) => {
                    job.state = JobState::Retrying;
                    context
                        .requeue(delay, &job_error)
                        .await
                        .inspect_err(|error| tracing::error!(error = %error, job_id = %job.id, "Failed to requeue job"))
                }
                Decision::DeadLetter => {
                    job.state = JobState::Dead;
                    context
                        .dead_letter(&job_error)
                        .await
                        .inspect_err(|error| tracing::error!(error = %error, job_id = %job.id, "Failed to dead-letter job"))
                }
            };
        }
    }
}

/// Builder for configuring and constructing [`WorkerPool`] instances.
pub struct WorkerPoolBuilder<Tick = Ticker, Sp = InlineSpawner> {
    tick: Tick,
    concurrent: usize,
    time_limit: Duration,
    on_failure: Option<FailureHook>,
    marker: std::marker::PhantomData<fn() -> Sp>,
}

impl WorkerPoolBuilder {
    /// Poll every `interval`, two slots, default time limit.
    pub fn new(interval: Duration) -> WorkerPoolBuilder<Ticker, InlineSpawner> {
        Self::new_with_tick(Ticker::new(interval))
    }

    /// Use a custom tick stream.
    pub fn new_with_tick<Tick>(tick: Tick) -> WorkerPoolBuilder<Tick, InlineSpawner> {
        WorkerPoolBuilder {
            tick,
            concurrent: 2,
            time_limit: DEFAULT_TIME_LIMIT,
            on_failure: None,
            marker: std::marker::PhantomData,
        }
    }
}

impl<Tick, Sp> WorkerPoolBuilder<Tick, Sp> {
    /// Set concurrency (max in-flight jobs per process).
    pub fn concurrent(self, concurrent: usize) -> Self {
        Self { concurrent, ..self }
    }

    /// Set the hard wall-clock limit applied to each execution.
    pub fn time_limit(self, time_limit: Duration) -> Self {
        Self { time_limit, ..self }
    }

    /// Attach a callback invoked after every failed execution.
    pub fn on_failure<F>(self, hook: F) -> Self
    where
        F: Fn(&Job, &TaskError) + Send + Sync + 'static,
    {
        Self {
            on_failure: Some(Arc::new(hook)),
            ..self
        }
    }

    /// Choose how to spawn jobs (inline, Tokio, ...).
    pub fn job_spawner<Sp2>(self, _spawner: Sp2) -> WorkerPoolBuilder<Tick, Sp2>
    where
        Sp2: JobSpawner,
    {
        let Self {
            tick,
            concurrent,
            time_limit,
            on_failure,
            marker: _,
        } = self;
        WorkerPoolBuilder {
            tick,
            concurrent,
            time_limit,
            on_failure,
            marker: std::marker::PhantomData,
        }
    }

    /// Finalize the pool with a frozen registry and a broker poller.
    pub fn build<Poller>(
        self,
        registry: Arc<TaskRegistry>,
        poller: Poller,
    ) -> WorkerPool<Tick, Poller, Sp>
    where
        Tick: TickStream,
        Poller: BrokerPoller,
        Sp: JobSpawner,
    {
        let Self {
            tick,
            concurrent,
            time_limit,
            on_failure,
            marker: _,
        } = self;
        WorkerPool {
            tick,
            poller,
            registry,
            concurrent,
            time_limit,
            on_failure,
            marker: std::marker::PhantomData,
        }
    }
}
