use std::sync::Arc;

use cadence_core::JobId;
use tokio::runtime::Handle;

use crate::{
    engine::block_on,
    error::Result,
    record::JobRecord,
    types::{JobResult, JobStatus},
};

/// Returned by [`crate::Scheduler::schedule`]: direct access to one job
/// without going back through storage.
#[derive(Clone)]
pub struct JobHandle {
    record: Arc<JobRecord>,
    runtime: Handle,
}

impl JobHandle {
    pub(crate) fn new(record: Arc<JobRecord>, runtime: Handle) -> Self {
        Self { record, runtime }
    }

    pub fn id(&self) -> &JobId {
        self.record.id()
    }

    pub fn status(&self) -> JobStatus {
        self.record.status()
    }

    pub fn cancel(&self) -> bool {
        self.record.cancel()
    }

    pub fn record(&self) -> &Arc<JobRecord> {
        &self.record
    }

    pub async fn await_result<T: Clone + 'static>(&self) -> Result<JobResult<T>> {
        self.record.await_result::<T>().await
    }

    pub fn await_result_blocking<T: Clone + 'static>(&self) -> Result<JobResult<T>> {
        block_on(&self.runtime, self.record.await_result::<T>())?
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").field("record", &self.record).finish()
    }
}
