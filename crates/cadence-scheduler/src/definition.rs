//! Job definitions: the immutable, caller-supplied unit of work.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use cadence_core::JobId;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Result, SchedulerError},
    recurrence::RecurrenceConfiguration,
    retry::RetryPolicy,
    types::ResultType,
};

/// Type-erased job body. Invoked once per attempt.
pub type JobAction<T> = Arc<dyn Fn(JobContext) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

fn boxed_action<T, F, Fut>(action: F) -> JobAction<T>
where
    T: 'static,
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move |ctx: JobContext| -> BoxFuture<'static, anyhow::Result<T>> {
        Box::pin(action(ctx))
    })
}

/// Per-attempt context handed to a job action.
///
/// Long-running actions should poll [`JobContext::is_cancelled`] or race
/// their work against [`JobContext::cancelled`] so cancellation takes effect
/// promptly.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    /// Zero-based execution index (repeat number).
    pub execution: u32,
    /// One-based attempt number within this execution's retry loop.
    pub attempt: u32,
    token: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(job_id: JobId, execution: u32, attempt: u32, token: CancellationToken) -> Self {
        Self {
            job_id,
            execution,
            attempt,
            token,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the job's execution line has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Descriptive half of a definition: everything except the action.
///
/// Kept on the job record so lookups never need the typed definition.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub id: JobId,
    pub name: String,
    pub recurrence: RecurrenceConfiguration,
    pub retry_policy: RetryPolicy,
    pub result_type: ResultType,
}

/// A schedulable unit of work producing a `T`.
pub struct JobDefinition<T> {
    descriptor: JobDescriptor,
    action: JobAction<T>,
}

impl<T> Clone for JobDefinition<T> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            action: Arc::clone(&self.action),
        }
    }
}

impl<T> fmt::Debug for JobDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> JobDefinition<T> {
    /// Define a job that runs once, immediately, without retries.
    pub fn new<F, Fut>(id: impl Into<JobId>, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            descriptor: JobDescriptor {
                id: id.into(),
                name: name.into(),
                recurrence: RecurrenceConfiguration::once(),
                retry_policy: RetryPolicy::no_retries(),
                result_type: ResultType::of::<T>(),
            },
            action: boxed_action(action),
        }
    }

    /// Define a job around a synchronous closure.
    ///
    /// The closure runs on Tokio's blocking pool. It cannot be interrupted:
    /// cancelling the job abandons the wait, the closure runs to completion
    /// in the background and its value is discarded.
    pub fn blocking<F>(id: impl Into<JobId>, name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let action = Arc::new(action);
        Self::new(id, name, move |_ctx| {
            let action = Arc::clone(&action);
            async move {
                tokio::task::spawn_blocking(move || action())
                    .await
                    .map_err(|e| anyhow::anyhow!("blocking job action did not finish: {e}"))?
            }
        })
    }

    pub fn with_recurrence(mut self, recurrence: RecurrenceConfiguration) -> Self {
        self.descriptor.recurrence = recurrence;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.descriptor.retry_policy = policy;
        self
    }
}

impl<T> JobDefinition<T> {
    pub fn id(&self) -> &JobId {
        &self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn recurrence(&self) -> &RecurrenceConfiguration {
        &self.descriptor.recurrence
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.descriptor.retry_policy
    }

    pub fn result_type(&self) -> ResultType {
        self.descriptor.result_type
    }

    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    /// Start one attempt of the action.
    pub fn invoke(&self, ctx: JobContext) -> BoxFuture<'static, anyhow::Result<T>> {
        (self.action)(ctx)
    }
}

/// Fluent constructor for [`JobDefinition`] that validates at `build()`.
///
/// The result type is carried by `T`, so only the id, name and action can
/// be missing.
pub struct JobDefinitionBuilder<T> {
    id: Option<JobId>,
    name: Option<String>,
    recurrence: RecurrenceConfiguration,
    retry_policy: RetryPolicy,
    action: Option<JobAction<T>>,
}

impl<T> Default for JobDefinitionBuilder<T> {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            recurrence: RecurrenceConfiguration::once(),
            retry_policy: RetryPolicy::no_retries(),
            action: None,
        }
    }
}

impl<T: Send + 'static> JobDefinitionBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn recurrence(mut self, recurrence: RecurrenceConfiguration) -> Self {
        self.recurrence = recurrence;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn action<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.action = Some(boxed_action(action));
        self
    }

    pub fn build(self) -> Result<JobDefinition<T>> {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SchedulerError::Configuration("Job ID must be set".to_string()))?;
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| SchedulerError::Configuration("Job name must be set".to_string()))?;
        let action = self
            .action
            .ok_or_else(|| SchedulerError::Configuration("Action must be set".to_string()))?;

        Ok(JobDefinition {
            descriptor: JobDescriptor {
                id,
                name,
                recurrence: self.recurrence,
                retry_policy: self.retry_policy,
                result_type: ResultType::of::<T>(),
            },
            action,
        })
    }
}
