use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::{JobId, SchedulerSettings, SupersedePolicy};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    definition::{JobDefinition, JobDefinitionBuilder},
    error::{JobError, Result, SchedulerError},
    handle::JobHandle,
    metrics::{Metrics, NoopMetrics},
    record::JobRecord,
    retry::RetryExecutor,
    storage::{InMemoryJobStorage, JobStorage},
    types::{AnyValue, JobInstance, JobResult, JobStatus},
};

/// In-process job scheduler: one concurrent execution line per job.
///
/// Cheap to clone; every clone drives the same storage and runtime.
#[derive(Clone)]
pub struct Scheduler {
    storage: Arc<dyn JobStorage>,
    retry: RetryExecutor,
    metrics: Arc<dyn Metrics>,
    settings: SchedulerSettings,
    runtime: Handle,
}

impl Scheduler {
    /// Create a scheduler on the current Tokio runtime.
    pub fn new(storage: Arc<dyn JobStorage>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| SchedulerError::NoRuntime(e.to_string()))?;
        Ok(Self::with_runtime(storage, runtime))
    }

    /// Create a scheduler with in-memory storage on the current runtime.
    pub fn in_memory() -> Result<Self> {
        Self::new(Arc::new(InMemoryJobStorage::new()))
    }

    /// Create a scheduler that spawns its execution lines on `runtime`.
    ///
    /// Usable from threads outside the runtime, e.g. for
    /// [`Scheduler::await_result_blocking`].
    pub fn with_runtime(storage: Arc<dyn JobStorage>, runtime: Handle) -> Self {
        let metrics: Arc<dyn Metrics> = Arc::new(NoopMetrics);
        Self {
            storage,
            retry: RetryExecutor::new(Arc::clone(&metrics)),
            metrics,
            settings: SchedulerSettings::default(),
            runtime,
        }
    }

    pub fn with_settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Attach an instrumentation backend.
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.retry = RetryExecutor::new(Arc::clone(&metrics));
        self.metrics = metrics;
        self
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<dyn JobStorage> {
        &self.storage
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Register `definition` and start its execution line.
    ///
    /// Cron recurrences fail with [`SchedulerError::Unsupported`] before
    /// anything is stored. Re-using an id replaces the stored record; the
    /// superseded line is cancelled unless the settings say otherwise.
    pub fn schedule<T>(&self, definition: JobDefinition<T>) -> Result<JobHandle>
    where
        T: Send + Sync + 'static,
    {
        definition.recurrence().validate()?;
        let id = definition.id().clone();

        if let Some(previous) = self.storage.get_job(&id)? {
            match self.settings.supersede {
                SupersedePolicy::CancelPrevious => {
                    if previous.cancel() {
                        info!(job_id = %id, "superseded execution line cancelled");
                    }
                }
                SupersedePolicy::KeepRunning => {
                    warn!(job_id = %id, "job re-scheduled while a previous line may still run");
                }
            }
        }

        // Line must be attached before the record is visible to cancel_job.
        let token = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(false);
        let record = Arc::new(JobRecord::new(definition.descriptor().clone()));
        record.attach_line(token.clone(), finished_rx);
        self.storage.save_job(Arc::clone(&record))?;

        info!(
            job_id = %id,
            name = %definition.name(),
            recurrence = %definition.recurrence().kind(),
            "job scheduled"
        );

        let line = ExecutionLine {
            record: Arc::clone(&record),
            definition,
            retry: self.retry.clone(),
            metrics: Arc::clone(&self.metrics),
            token,
            trailing_interval_wait: self.settings.trailing_interval_wait,
        };
        self.runtime.spawn(async move {
            line.run().await;
            finished_tx.send_replace(true);
        });

        Ok(JobHandle::new(record, self.runtime.clone()))
    }

    /// Build a definition through the fluent builder and schedule it.
    pub fn schedule_job<T, F>(&self, build: F) -> Result<JobHandle>
    where
        T: Send + Sync + 'static,
        F: FnOnce(JobDefinitionBuilder<T>) -> JobDefinitionBuilder<T>,
    {
        let definition = build(JobDefinitionBuilder::new()).build()?;
        self.schedule(definition)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Snapshot of every stored job, in no particular order.
    pub fn list_jobs(&self) -> Result<Vec<JobInstance>> {
        Ok(self
            .storage
            .list_all()?
            .iter()
            .map(|record| record.snapshot())
            .collect())
    }

    /// The live record behind `id`, for inspecting execution history.
    pub fn record(&self, id: impl Into<JobId>) -> Result<Arc<JobRecord>> {
        let id = id.into();
        self.storage
            .get_job(&id)?
            .ok_or(SchedulerError::JobNotFound { id })
    }

    pub fn get_job_status(&self, id: impl Into<JobId>) -> Result<JobStatus> {
        Ok(self.record(id)?.status())
    }

    /// Latest result re-typed to `T`; `Ok(None)` until an execution finishes.
    pub fn get_result<T: Clone + 'static>(
        &self,
        id: impl Into<JobId>,
    ) -> Result<Option<JobResult<T>>> {
        self.record(id)?.result::<T>()
    }

    // -----------------------------------------------------------------------
    // Cancellation and awaiting
    // -----------------------------------------------------------------------

    /// Request cancellation; see [`JobRecord::cancel`] for the return value.
    pub fn cancel_job(&self, id: impl Into<JobId>) -> Result<bool> {
        Ok(self.record(id)?.cancel())
    }

    /// Cancel every live execution line. Returns how many were cancelled.
    pub fn cancel_all(&self) -> Result<usize> {
        let cancelled = self
            .storage
            .list_all()?
            .iter()
            .filter(|record| record.cancel())
            .count();
        if cancelled > 0 {
            info!(count = cancelled, "cancelled all live jobs");
        }
        Ok(cancelled)
    }

    /// Wait until the job's line has fully finished, then return its last
    /// result re-typed to `T`.
    pub async fn await_result<T: Clone + 'static>(
        &self,
        id: impl Into<JobId>,
    ) -> Result<JobResult<T>> {
        let record = self.record(id)?;
        record.await_result::<T>().await
    }

    /// Thread-blocking [`Scheduler::await_result`].
    ///
    /// Callable from plain threads and from multi-threaded runtime workers.
    /// Inside a current-thread runtime it fails with
    /// [`SchedulerError::BlockingUnsupported`].
    pub fn await_result_blocking<T: Clone + 'static>(
        &self,
        id: impl Into<JobId>,
    ) -> Result<JobResult<T>> {
        let record = self.record(id)?;
        block_on(&self.runtime, record.await_result::<T>())?
    }
}

/// Drive `fut` to completion on `runtime`, blocking the calling thread.
///
/// A current-thread runtime worker cannot block in place.
pub(crate) fn block_on<F: Future>(runtime: &Handle, fut: F) -> Result<F::Output> {
    match Handle::try_current() {
        Ok(current) if current.runtime_flavor() == RuntimeFlavor::CurrentThread => {
            Err(SchedulerError::BlockingUnsupported(
                "blocking await needs a multi-thread runtime; use await_result instead"
                    .to_string(),
            ))
        }
        Ok(_) => Ok(tokio::task::block_in_place(|| runtime.block_on(fut))),
        Err(_) => Ok(runtime.block_on(fut)),
    }
}

/// One job's execution line: optional initial delay, then one or more
/// executions, each delegated to the retry executor.
struct ExecutionLine<T> {
    record: Arc<JobRecord>,
    definition: JobDefinition<T>,
    retry: RetryExecutor,
    metrics: Arc<dyn Metrics>,
    token: CancellationToken,
    trailing_interval_wait: bool,
}

impl<T: Send + Sync + 'static> ExecutionLine<T> {
    async fn run(self) {
        if !self.drive().await {
            self.metrics.job_cancelled(self.record.id());
        }
    }

    /// `false` when the line stopped on cancellation.
    async fn drive(&self) -> bool {
        let recurrence = self.definition.recurrence();
        let id = self.record.id();

        if let Some(delay) = recurrence.delay() {
            debug!(job_id = %id, delay_ms = delay.as_millis() as u64, "waiting before first execution");
            if !self.pause(delay).await {
                return false;
            }
        }

        let (runs, interval) = match recurrence.repetitions() {
            Some((times, interval)) => (times, Some(interval)),
            None => (1, None),
        };

        for execution in 0..runs {
            match self.execute(execution).await {
                Step::Continue => {}
                Step::Failed => return true,
                Step::Cancelled => return false,
            }

            let last = execution + 1 == runs;
            if let Some(interval) = interval.filter(|_| !last || self.trailing_interval_wait) {
                if !self.pause(interval).await {
                    return false;
                }
            }
        }

        self.record.complete_line();
        true
    }

    /// Run one execution and store its outcome on the record.
    async fn execute(&self, execution: u32) -> Step {
        let id = self.record.id();
        if !self.record.begin_execution() {
            return Step::Cancelled;
        }
        self.metrics.job_started(id, execution);

        let outcome = self
            .retry
            .execute_with_retry(&self.definition, execution, &self.token)
            .await;
        let step = match &outcome {
            Ok(_) => {
                info!(job_id = %id, execution, "execution succeeded");
                self.metrics.job_succeeded(id, execution);
                Step::Continue
            }
            Err(JobError::Cancelled) => {
                info!(job_id = %id, execution, "execution cancelled");
                Step::Cancelled
            }
            Err(err) => {
                warn!(job_id = %id, execution, error = %err, "execution failed; skipping remaining repeats");
                self.metrics.job_failed(id, execution);
                Step::Failed
            }
        };

        let may_continue = self
            .record
            .record_outcome(outcome.map(|value| Arc::new(value) as AnyValue));
        match step {
            Step::Continue if !may_continue => Step::Cancelled,
            other => other,
        }
    }

    /// Cancellable sleep. `false` if the token fired first.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

enum Step {
    Continue,
    Failed,
    Cancelled,
}
