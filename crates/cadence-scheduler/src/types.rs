use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use cadence_core::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Lifecycle state of a job.
///
/// Legal moves: Scheduled → Running | Cancelled, Running → Completed |
/// Failed | Cancelled. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, waiting for its first execution.
    Scheduled,
    /// An execution is in flight, or a repeat job is between executions.
    Running,
    /// Every planned execution succeeded.
    Completed,
    /// An execution exhausted its retries; remaining repeats were skipped.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self → next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Scheduled, Running)
                | (Scheduled, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SCHEDULED" => Ok(JobStatus::Scheduled),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Runtime tag for the value type a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultType {
    id: TypeId,
    name: &'static str,
}

impl ResultType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Type-erased result value as stored on a job record.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Outcome of one execution (one retry-executor invocation).
///
/// `result` is present iff `status` is Completed; `error` iff Failed or
/// Cancelled.
#[derive(Debug, Clone)]
pub struct JobResult<T> {
    pub status: JobStatus,
    pub result: Option<T>,
    pub error: Option<JobError>,
}

impl<T> JobResult<T> {
    pub fn completed(value: T) -> Self {
        Self {
            status: JobStatus::Completed,
            result: Some(value),
            error: None,
        }
    }

    pub fn failed(error: JobError) -> Self {
        Self {
            status: JobStatus::Failed,
            result: None,
            error: Some(error),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: JobStatus::Cancelled,
            result: None,
            error: Some(JobError::Cancelled),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Collapse into a plain `Result`, for callers that want to use `?`.
    pub fn into_result(self) -> std::result::Result<T, JobError> {
        match (self.result, self.error) {
            (Some(value), _) => Ok(value),
            (None, Some(err)) => Err(err),
            (None, None) => Err(JobError::failed(anyhow::anyhow!(
                "{} result carries neither a value nor an error",
                self.status
            ))),
        }
    }
}

impl JobResult<AnyValue> {
    /// Re-type an erased result. `None` if the stored value is not a `T`.
    pub fn downcast<T: Clone + 'static>(&self) -> Option<JobResult<T>> {
        let result = match &self.result {
            Some(value) => Some(value.downcast_ref::<T>()?.clone()),
            None => None,
        };
        Some(JobResult {
            status: self.status,
            result,
            error: self.error.clone(),
        })
    }
}

/// Immutable external snapshot of a job, derived from its record on demand.
#[derive(Debug, Clone, Serialize)]
pub struct JobInstance {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub executions_completed: u32,
    /// Status of the latest finished execution, if any.
    pub last_result_status: Option<JobStatus>,
    /// Rendered error of the latest execution, if it failed or was cancelled.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub result: Option<JobResult<AnyValue>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        let all = [
            JobStatus::Scheduled,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn scheduled_cannot_skip_to_completed_or_failed() {
        assert!(!JobStatus::Scheduled.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Scheduled.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Scheduled.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn running_has_no_self_edge() {
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn status_round_trips_through_display() {
        for status in [JobStatus::Scheduled, JobStatus::Cancelled] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("missed".parse::<JobStatus>().is_err());
    }

    #[test]
    fn downcast_checks_the_value_type() {
        let erased: JobResult<AnyValue> = JobResult::completed(Arc::new(7_i32) as AnyValue);
        assert_eq!(erased.downcast::<i32>().unwrap().result, Some(7));
        assert!(erased.downcast::<String>().is_none());
    }

    #[test]
    fn downcast_keeps_errors_of_valueless_results() {
        let erased: JobResult<AnyValue> = JobResult::cancelled();
        let typed = erased.downcast::<String>().unwrap();
        assert_eq!(typed.status, JobStatus::Cancelled);
        assert!(typed.error.unwrap().is_cancelled());
    }

    #[test]
    fn into_result_surfaces_failure_verbatim() {
        let failed: JobResult<String> =
            JobResult::failed(JobError::failed(anyhow::anyhow!("disk full")));
        assert_eq!(failed.into_result().unwrap_err().to_string(), "disk full");
    }

    #[test]
    fn result_type_compares_by_type() {
        let tag = ResultType::of::<String>();
        assert!(tag.is::<String>());
        assert!(!tag.is::<&'static str>());
        assert!(tag.name().contains("String"));
    }
}
