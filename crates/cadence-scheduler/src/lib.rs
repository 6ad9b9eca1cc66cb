//! `cadence-scheduler`: in-process job scheduler on Tokio.
//!
//! # Overview
//!
//! A [`JobDefinition`] pairs an async action with a [`RecurrenceConfiguration`]
//! and a [`RetryPolicy`]. [`Scheduler::schedule`] stores a [`JobRecord`] and
//! spawns one execution line per job; the line runs the action the configured
//! number of times, retrying failed attempts through the [`RetryExecutor`].
//! Callers observe progress by id (status, latest result, execution history)
//! and may cancel or await any job.
//!
//! # Lifecycle
//!
//! | From        | To                                      |
//! |-------------|-----------------------------------------|
//! | `Scheduled` | `Running`, `Cancelled`                  |
//! | `Running`   | `Completed`, `Failed`, `Cancelled`      |
//!
//! `Completed`, `Failed` and `Cancelled` are terminal.
//!
//! # Recurrence
//!
//! | Kind         | Behaviour                                       |
//! |--------------|-------------------------------------------------|
//! | `Once`       | Single execution, immediately                   |
//! | `Delayed`    | Single execution after a delay                  |
//! | `FixedCount` | N executions, an interval apart                 |
//! | `Cron`       | Rejected at schedule time                       |

pub mod definition;
pub mod engine;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod record;
pub mod recurrence;
pub mod retry;
pub mod storage;
pub mod types;

pub use definition::{JobAction, JobContext, JobDefinition, JobDefinitionBuilder, JobDescriptor};
pub use engine::Scheduler;
pub use error::{JobError, Result, SchedulerError, StorageError};
pub use handle::JobHandle;
pub use metrics::{Metrics, NoopMetrics};
pub use record::JobRecord;
pub use recurrence::{Recurrence, RecurrenceConfiguration};
pub use retry::{Backoff, RetryExecutor, RetryPolicy};
pub use storage::{
    DynamoDbJobStorage, FileSystemJobStorage, InMemoryJobStorage, JobStorage, StorageResult,
};
pub use types::{AnyValue, JobInstance, JobResult, JobStatus, ResultType};

pub use cadence_core::JobId;
