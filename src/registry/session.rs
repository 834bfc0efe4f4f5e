use crate::core::{DbError, Result};
use crate::storage::pool::{Pool, Savepoint, Session};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// How a dataset was touched in the current commit session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetStatus {
    /// Committed before the session began.
    Exists,
    /// Created in this session; lives in `<dbid>.new`.
    New,
    /// Deleted in this session; lives in `<dbid>.deleted`.
    Deleted,
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetStatus::Exists => write!(f, "exists"),
            DatasetStatus::New => write!(f, "new"),
            DatasetStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// Per-dataset state of a commit session.
///
/// The savepoint and change session are taken out as commit finalizes them,
/// so a commit that fails halfway can be retried from where it stopped.
pub struct OpenDb {
    pub pool: Option<Arc<dyn Pool>>,
    pub savepoint: Option<Box<dyn Savepoint>>,
    pub change_session: Option<Box<dyn Session>>,
    pub status: DatasetStatus,
    /// Changeset id, once computed and written to the dataset.
    pub app_hash: Option<Vec<u8>>,
    /// A created dataset whose `.new` file already moved to its final name.
    pub renamed: bool,
}

impl OpenDb {
    pub fn new(
        pool: Arc<dyn Pool>,
        savepoint: Box<dyn Savepoint>,
        change_session: Box<dyn Session>,
        status: DatasetStatus,
    ) -> Self {
        Self {
            pool: Some(pool),
            savepoint: Some(savepoint),
            change_session: Some(change_session),
            status,
            app_hash: None,
            renamed: false,
        }
    }

    /// A dataset deleted in this session. Its pool is already closed.
    pub fn deleted() -> Self {
        Self {
            pool: None,
            savepoint: None,
            change_session: None,
            status: DatasetStatus::Deleted,
            app_hash: None,
            renamed: false,
        }
    }
}

/// The registry's single in-flight block of work.
pub struct CommitSession {
    pub idempotency_key: Vec<u8>,
    pub recovery: bool,
    pub open: BTreeMap<String, OpenDb>,
    /// Datasets fully finalized by an earlier, failed commit attempt.
    pub committed: BTreeMap<String, Vec<u8>>,
}

impl CommitSession {
    pub fn new(idempotency_key: &[u8], recovery: bool) -> Self {
        Self {
            idempotency_key: idempotency_key.to_vec(),
            recovery,
            open: BTreeMap::new(),
            committed: BTreeMap::new(),
        }
    }

    pub fn status_of(&self, dbid: &str) -> Option<DatasetStatus> {
        self.open.get(dbid).map(|db| db.status)
    }

    /// A dataset finalized by a failed commit accepts no further changes
    /// until the commit is retried or cancelled.
    pub fn ensure_not_finalized(&self, dbid: &str) -> Result<()> {
        if self.committed.contains_key(dbid) {
            return Err(DbError::ExecutionError(format!(
                "dataset '{}' was finalized by a failed commit; retry the commit or cancel",
                dbid
            ))
            .in_dataset(dbid));
        }
        Ok(())
    }

    pub fn key_hex(&self) -> String {
        hex::encode(&self.idempotency_key)
    }
}
