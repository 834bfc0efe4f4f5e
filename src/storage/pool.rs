//! Contract between the registry and a dataset's storage engine.
//!
//! The registry never looks inside a dataset. Everything it needs (writes
//! inside a savepoint, a deterministic digest of those writes, and a small
//! key/value namespace for its own bookkeeping) goes through these traits.

use crate::core::{Result, Value};
use crate::result::QueryResult;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// One open handle to a single dataset.
///
/// A pool has exactly one writer. `execute`, `set` and `get(.., true)` act on
/// the writer's view; `query` and `get(.., false)` see committed data only.
#[async_trait]
pub trait Pool: Send + Sync {
    async fn execute(&self, stmt: &str, params: &[Value]) -> Result<QueryResult>;

    async fn query(&self, stmt: &str, params: &[Value]) -> Result<QueryResult>;

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    async fn get(&self, key: &[u8], sync: bool) -> Result<Option<Vec<u8>>>;

    /// Open a savepoint on the writer. Writes made until it is committed are
    /// invisible to readers and are discarded on rollback.
    async fn savepoint(&self) -> Result<Box<dyn Savepoint>>;

    /// Start tracking row-level changes made by the writer.
    async fn create_session(&self) -> Result<Box<dyn Session>>;

    async fn close(&self) -> Result<()>;
}

/// Either call may be retried after it fails. Once one of them succeeds the
/// savepoint is finished and further calls do nothing.
#[async_trait]
pub trait Savepoint: Send {
    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Change tracker. Reduces every change since its creation to an identifier
/// that is identical on every replica that made the same changes.
#[async_trait]
pub trait Session: Send {
    async fn changeset_id(&mut self) -> Result<Vec<u8>>;

    async fn delete(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait PoolOpener: Send + Sync {
    /// Open the dataset stored at `path`. With `create` the file must not
    /// exist yet and is created empty; without it the file must exist.
    async fn open(&self, path: &Path, create: bool) -> Result<Arc<dyn Pool>>;
}
