//! `JobRecord`: the mutable runtime state of one scheduled job.
//!
//! A record is the single source of truth for its job. All mutable fields
//! sit behind one per-record mutex, so jobs never contend with each other;
//! the guard is never held across an `.await`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use cadence_core::JobId;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    definition::JobDescriptor,
    error::{JobError, Result, SchedulerError},
    types::{AnyValue, JobInstance, JobResult, JobStatus},
};

/// Control half of the task driving a job through its executions.
struct ExecutionLine {
    token: CancellationToken,
    /// Flips to `true` once the line has fully finished, repeats included.
    finished: watch::Receiver<bool>,
}

impl ExecutionLine {
    fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }
}

struct RecordState {
    status: JobStatus,
    result: Option<JobResult<AnyValue>>,
    executions_completed: u32,
    /// Indexed by execution number; appended in execution order.
    execution_results: Vec<JobResult<AnyValue>>,
    line: Option<ExecutionLine>,
}

impl RecordState {
    /// Apply a lifecycle move if the graph allows it.
    fn transition(&mut self, next: JobStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

pub struct JobRecord {
    descriptor: JobDescriptor,
    created_at: DateTime<Utc>,
    state: Mutex<RecordState>,
}

impl JobRecord {
    pub(crate) fn new(descriptor: JobDescriptor) -> Self {
        Self {
            descriptor,
            created_at: Utc::now(),
            state: Mutex::new(RecordState {
                status: JobStatus::Scheduled,
                result: None,
                executions_completed: 0,
                execution_results: Vec::new(),
                line: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RecordState> {
        // No code panics while holding the guard; recover rather than cascade.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- read access --------------------------------------------------------

    pub fn id(&self) -> &JobId {
        &self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    /// Finished executions, whatever their outcome.
    pub fn executions_completed(&self) -> u32 {
        self.state().executions_completed
    }

    /// Per-execution outcomes; index `k` is execution `k`.
    pub fn execution_results(&self) -> Vec<JobResult<AnyValue>> {
        self.state().execution_results.clone()
    }

    /// Outcome of the most recent execution, if any has finished.
    pub fn latest_result(&self) -> Option<JobResult<AnyValue>> {
        self.state().result.clone()
    }

    /// Whether the execution line has fully finished. `false` before it starts.
    pub fn is_finished(&self) -> bool {
        self.state().line.as_ref().is_some_and(ExecutionLine::is_finished)
    }

    /// Latest result re-typed to `T`; `Ok(None)` while nothing has finished.
    pub fn result<T: Clone + 'static>(&self) -> Result<Option<JobResult<T>>> {
        self.check_type::<T>()?;
        self.latest_result()
            .map(|raw| self.retype(&raw))
            .transpose()
    }

    /// Wait for the execution line to finish, including every repeat, then
    /// return the last recorded result re-typed to `T`.
    ///
    /// Failed and cancelled outcomes are returned, not raised: inspect
    /// `status`/`error` or call [`JobResult::into_result`].
    pub async fn await_result<T: Clone + 'static>(&self) -> Result<JobResult<T>> {
        self.check_type::<T>()?;
        self.wait().await;
        let raw = self
            .latest_result()
            .ok_or_else(|| SchedulerError::NoResult { id: self.id().clone() })?;
        self.retype(&raw)
    }

    /// Resolve once the execution line has finished.
    pub async fn wait(&self) {
        let finished = self.state().line.as_ref().map(|line| line.finished.clone());
        if let Some(mut finished) = finished {
            // Err means the driving task is gone; either way it is over.
            let _ = finished.wait_for(|done| *done).await;
        }
    }

    pub fn snapshot(&self) -> JobInstance {
        let state = self.state();
        JobInstance {
            id: self.descriptor.id.clone(),
            name: self.descriptor.name.clone(),
            status: state.status,
            executions_completed: state.executions_completed,
            last_result_status: state.result.as_ref().map(|r| r.status),
            last_error: state
                .result
                .as_ref()
                .and_then(|r| r.error.as_ref())
                .map(ToString::to_string),
            created_at: self.created_at,
            result: state.result.clone(),
        }
    }

    fn check_type<T: 'static>(&self) -> Result<()> {
        let declared = self.descriptor.result_type;
        if declared.is::<T>() {
            Ok(())
        } else {
            Err(SchedulerError::TypeMismatch {
                id: self.id().clone(),
                declared: declared.name(),
                requested: std::any::type_name::<T>(),
            })
        }
    }

    fn retype<T: Clone + 'static>(&self, raw: &JobResult<AnyValue>) -> Result<JobResult<T>> {
        raw.downcast::<T>()
            .ok_or_else(|| SchedulerError::TypeMismatch {
                id: self.id().clone(),
                declared: self.descriptor.result_type.name(),
                requested: std::any::type_name::<T>(),
            })
    }

    // --- cancellation -------------------------------------------------------

    /// Request cancellation of the in-flight execution line.
    ///
    /// Returns `false` when there is no line yet, the line has finished, or
    /// the job is already terminal. Otherwise the token is cancelled, the
    /// status moves to Cancelled immediately, and `true` is returned; the
    /// action itself stops at its next suspension point.
    pub fn cancel(&self) -> bool {
        let mut state = self.state();
        let token = match &state.line {
            Some(line) if !line.is_finished() => line.token.clone(),
            _ => return false,
        };
        if state.status.is_terminal() {
            return false;
        }

        token.cancel();
        state.transition(JobStatus::Cancelled);
        info!(job_id = %self.id(), "cancelling job");
        true
    }

    // --- driver mutation points ----------------------------------------------

    pub(crate) fn attach_line(&self, token: CancellationToken, finished: watch::Receiver<bool>) {
        self.state().line = Some(ExecutionLine { token, finished });
    }

    /// Enter Running for the next execution. `false` if the job was
    /// cancelled first, in which case nothing may run.
    ///
    /// A repeat starts while the record is still Running from the previous
    /// execution; that is not a lifecycle move.
    pub(crate) fn begin_execution(&self) -> bool {
        let mut state = self.state();
        state.status == JobStatus::Running || state.transition(JobStatus::Running)
    }

    /// Store the outcome of one execution as a single atomic step: history
    /// entry, latest result, counter and (on failure/cancel) status.
    ///
    /// Returns whether the line may go on to the next repeat.
    pub(crate) fn record_outcome(&self, outcome: std::result::Result<AnyValue, JobError>) -> bool {
        let mut state = self.state();
        let result = match outcome {
            Ok(value) => JobResult::completed(value),
            Err(JobError::Cancelled) => JobResult::cancelled(),
            Err(err) => JobResult::failed(err),
        };
        let execution = state.executions_completed;

        state.execution_results.push(result.clone());
        state.executions_completed += 1;
        let status = result.status;
        state.result = Some(result);

        // A racing cancel may already have made the job terminal; keep it.
        if status != JobStatus::Completed {
            state.transition(status);
        }
        debug!(job_id = %self.id(), execution, outcome = %status, "execution recorded");

        status == JobStatus::Completed && !state.status.is_terminal()
    }

    /// Close a line that ran out of executions without failing or being
    /// cancelled. Never overwrites a terminal status.
    pub(crate) fn complete_line(&self) -> bool {
        let completed = self.state().transition(JobStatus::Completed);
        if completed {
            info!(job_id = %self.id(), "all executions completed");
        }
        completed
    }
}

impl std::fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("JobRecord")
            .field("id", &self.descriptor.id)
            .field("name", &self.descriptor.name)
            .field("status", &state.status)
            .field("executions_completed", &state.executions_completed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{definition::JobDefinition, recurrence::RecurrenceConfiguration};
    use std::sync::Arc;

    fn record() -> JobRecord {
        let def = JobDefinition::new("rec-1", "Record", |_| async { Ok(String::new()) })
            .with_recurrence(RecurrenceConfiguration::once());
        JobRecord::new(def.descriptor().clone())
    }

    fn value(s: &str) -> AnyValue {
        Arc::new(s.to_string())
    }

    fn attached(record: &JobRecord) -> (CancellationToken, watch::Sender<bool>) {
        let token = CancellationToken::new();
        let (tx, rx) = watch::channel(false);
        record.attach_line(token.clone(), rx);
        (token, tx)
    }

    #[test]
    fn new_record_is_scheduled_and_empty() {
        let rec = record();
        assert_eq!(rec.status(), JobStatus::Scheduled);
        assert_eq!(rec.executions_completed(), 0);
        assert!(rec.latest_result().is_none());
        assert!(rec.result::<String>().unwrap().is_none());
    }

    #[test]
    fn successful_execution_is_recorded_under_its_index() {
        let rec = record();
        assert!(rec.begin_execution());
        assert!(rec.record_outcome(Ok(value("a"))));
        assert!(rec.begin_execution());
        assert!(rec.record_outcome(Ok(value("b"))));

        let history = rec.execution_results();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].downcast::<String>().unwrap().result.as_deref(), Some("b"));
        assert_eq!(rec.executions_completed(), 2);
        assert_eq!(rec.status(), JobStatus::Running);
        assert!(rec.complete_line());
        assert_eq!(rec.status(), JobStatus::Completed);
    }

    #[test]
    fn repeats_reenter_running_but_terminal_records_do_not() {
        let rec = record();
        assert!(rec.begin_execution());
        assert!(rec.record_outcome(Ok(value("first"))));
        assert_eq!(rec.status(), JobStatus::Running);
        assert!(rec.begin_execution());
        assert!(rec.record_outcome(Ok(value("second"))));
        assert!(rec.complete_line());
        assert!(!rec.begin_execution());
        assert_eq!(rec.status(), JobStatus::Completed);
    }

    #[test]
    fn failure_makes_the_job_failed_and_stops_the_line() {
        let rec = record();
        rec.begin_execution();
        let keep_going = rec.record_outcome(Err(JobError::failed(anyhow::anyhow!("nope"))));
        assert!(!keep_going);
        assert_eq!(rec.status(), JobStatus::Failed);
        assert!(!rec.complete_line());
        assert_eq!(rec.status(), JobStatus::Failed);
        assert_eq!(rec.execution_results()[0].error.as_ref().unwrap().to_string(), "nope");
    }

    #[test]
    fn cancel_without_line_is_a_no_op() {
        let rec = record();
        assert!(!rec.cancel());
        assert_eq!(rec.status(), JobStatus::Scheduled);
    }

    #[test]
    fn cancel_while_scheduled_blocks_execution() {
        let rec = record();
        let (token, _tx) = attached(&rec);
        assert!(rec.cancel());
        assert!(token.is_cancelled());
        assert_eq!(rec.status(), JobStatus::Cancelled);
        assert!(!rec.begin_execution());
        assert_eq!(rec.executions_completed(), 0);
    }

    #[test]
    fn cancel_after_finish_returns_false() {
        let rec = record();
        let (_token, tx) = attached(&rec);
        rec.begin_execution();
        rec.record_outcome(Ok(value("done")));
        rec.complete_line();
        tx.send_replace(true);

        assert!(!rec.cancel());
        assert_eq!(rec.status(), JobStatus::Completed);
    }

    #[test]
    fn cancel_on_terminal_status_returns_false_even_if_line_is_closing() {
        let rec = record();
        let (token, _tx) = attached(&rec);
        rec.begin_execution();
        rec.record_outcome(Ok(value("done")));
        rec.complete_line();

        assert!(!rec.cancel());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn completion_racing_a_cancel_keeps_cancelled() {
        let rec = record();
        let (_token, _tx) = attached(&rec);
        rec.begin_execution();
        assert!(rec.cancel());
        // The action finished anyway; its value is kept but the status is not.
        assert!(!rec.record_outcome(Ok(value("late"))));
        assert!(!rec.complete_line());
        assert_eq!(rec.status(), JobStatus::Cancelled);
        assert_eq!(rec.executions_completed(), 1);
    }

    #[test]
    fn typed_lookup_rejects_other_types() {
        let rec = record();
        let err = rec.result::<i32>().unwrap_err();
        assert!(matches!(err, SchedulerError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn await_result_waits_for_the_line() {
        let rec = Arc::new(record());
        let (_token, tx) = attached(&rec);

        let waiter = {
            let rec = Arc::clone(&rec);
            tokio::spawn(async move { rec.await_result::<String>().await })
        };
        rec.begin_execution();
        rec.record_outcome(Ok(value("hello")));
        rec.complete_line();
        tx.send_replace(true);

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.result.as_deref(), Some("hello"));
        assert!(rec.is_finished());
    }

    #[tokio::test]
    async fn await_without_any_result_is_no_result() {
        let rec = record();
        let (_token, tx) = attached(&rec);
        rec.cancel();
        tx.send_replace(true);

        let err = rec.await_result::<String>().await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoResult { .. }));
    }

    #[test]
    fn snapshot_reflects_latest_state() {
        let rec = record();
        rec.begin_execution();
        rec.record_outcome(Err(JobError::failed(anyhow::anyhow!("bad input"))));

        let snap = rec.snapshot();
        assert_eq!(snap.id.as_str(), "rec-1");
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.executions_completed, 1);
        assert_eq!(snap.last_result_status, Some(JobStatus::Failed));
        assert_eq!(snap.last_error.as_deref(), Some("bad input"));
    }
}
