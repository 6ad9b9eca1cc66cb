//! Pluggable job storage.
//!
//! The scheduler depends only on [`JobStorage`]. [`InMemoryJobStorage`] is the
//! working backend; the file-system and DynamoDB backends are reserved
//! extension points that fail loudly on every call.

use std::path::PathBuf;
use std::sync::Arc;

use cadence_core::JobId;
use dashmap::DashMap;
use tracing::{debug, error};

use crate::{error::StorageError, record::JobRecord};

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Keyed store of job records. Implementations must be safe to call from
/// many threads at once without an external lock.
pub trait JobStorage: Send + Sync {
    /// Insert a record under its id, replacing any previous one.
    fn save_job(&self, record: Arc<JobRecord>) -> StorageResult<()>;

    /// Persist the current state of a record.
    fn update_job(&self, record: Arc<JobRecord>) -> StorageResult<()>;

    /// Remove a record. Removing an unknown id is not an error.
    fn delete_job(&self, id: &JobId) -> StorageResult<()>;

    fn get_job(&self, id: &JobId) -> StorageResult<Option<Arc<JobRecord>>>;

    /// Every stored record, in no particular order.
    fn list_all(&self) -> StorageResult<Vec<Arc<JobRecord>>>;

    fn clear(&self) -> StorageResult<()>;
}

/// Concurrent in-process store backed by a sharded map.
///
/// Records are shared by `Arc`, so the scheduler's in-place mutations are
/// visible through the store without explicit `update_job` calls.
#[derive(Default)]
pub struct InMemoryJobStorage {
    jobs: DashMap<JobId, Arc<JobRecord>>,
}

impl InMemoryJobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl JobStorage for InMemoryJobStorage {
    fn save_job(&self, record: Arc<JobRecord>) -> StorageResult<()> {
        let id = record.id().clone();
        if self.jobs.insert(id.clone(), record).is_some() {
            debug!(job_id = %id, "stored record replaced");
        }
        Ok(())
    }

    fn update_job(&self, record: Arc<JobRecord>) -> StorageResult<()> {
        self.jobs.insert(record.id().clone(), record);
        Ok(())
    }

    fn delete_job(&self, id: &JobId) -> StorageResult<()> {
        self.jobs.remove(id);
        Ok(())
    }

    fn get_job(&self, id: &JobId) -> StorageResult<Option<Arc<JobRecord>>> {
        Ok(self.jobs.get(id).map(|entry| Arc::clone(entry.value())))
    }

    fn list_all(&self) -> StorageResult<Vec<Arc<JobRecord>>> {
        Ok(self.jobs.iter().map(|entry| Arc::clone(entry.value())).collect())
    }

    fn clear(&self) -> StorageResult<()> {
        self.jobs.clear();
        Ok(())
    }
}

fn unimplemented<T>(backend: &'static str, operation: &'static str) -> StorageResult<T> {
    error!(backend, operation, "job storage backend is not implemented");
    Err(StorageError::Unimplemented { backend, operation })
}

/// Planned file-backed store rooted at a directory. Not implemented.
#[derive(Debug, Clone)]
pub struct FileSystemJobStorage {
    root: PathBuf,
}

impl FileSystemJobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl JobStorage for FileSystemJobStorage {
    fn save_job(&self, _record: Arc<JobRecord>) -> StorageResult<()> {
        unimplemented("filesystem", "save_job")
    }

    fn update_job(&self, _record: Arc<JobRecord>) -> StorageResult<()> {
        unimplemented("filesystem", "update_job")
    }

    fn delete_job(&self, _id: &JobId) -> StorageResult<()> {
        unimplemented("filesystem", "delete_job")
    }

    fn get_job(&self, _id: &JobId) -> StorageResult<Option<Arc<JobRecord>>> {
        unimplemented("filesystem", "get_job")
    }

    fn list_all(&self) -> StorageResult<Vec<Arc<JobRecord>>> {
        unimplemented("filesystem", "list_all")
    }

    fn clear(&self) -> StorageResult<()> {
        unimplemented("filesystem", "clear")
    }
}

/// Planned DynamoDB-backed store. Not implemented.
#[derive(Debug, Clone)]
pub struct DynamoDbJobStorage {
    table: String,
}

impl DynamoDbJobStorage {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl JobStorage for DynamoDbJobStorage {
    fn save_job(&self, _record: Arc<JobRecord>) -> StorageResult<()> {
        unimplemented("dynamodb", "save_job")
    }

    fn update_job(&self, _record: Arc<JobRecord>) -> StorageResult<()> {
        unimplemented("dynamodb", "update_job")
    }

    fn delete_job(&self, _id: &JobId) -> StorageResult<()> {
        unimplemented("dynamodb", "delete_job")
    }

    fn get_job(&self, _id: &JobId) -> StorageResult<Option<Arc<JobRecord>>> {
        unimplemented("dynamodb", "get_job")
    }

    fn list_all(&self) -> StorageResult<Vec<Arc<JobRecord>>> {
        unimplemented("dynamodb", "list_all")
    }

    fn clear(&self) -> StorageResult<()> {
        unimplemented("dynamodb", "clear")
    }
}
