//! Instrumentation extension point.
//!
//! The scheduler reports lifecycle events through [`Metrics`]. Every hook
//! defaults to a no-op, so the engine behaves identically with or without a
//! backend attached.

use std::time::Duration;

use cadence_core::JobId;

pub trait Metrics: Send + Sync {
    /// An execution began (before its first attempt).
    fn job_started(&self, _id: &JobId, _execution: u32) {}

    /// An execution produced a value.
    fn job_succeeded(&self, _id: &JobId, _execution: u32) {}

    /// An execution exhausted its attempts.
    fn job_failed(&self, _id: &JobId, _execution: u32) {}

    /// An execution line was cancelled.
    fn job_cancelled(&self, _id: &JobId) {}

    /// A failed attempt will be retried after `backoff`.
    fn retry_scheduled(&self, _id: &JobId, _attempt: u32, _backoff: Duration) {}
}

/// Default backend: records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}
