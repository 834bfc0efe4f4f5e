//! File-backed [`Pool`] implementation.
//!
//! Each dataset is a single snapshot file (see [`SnapshotManager`]). The pool
//! keeps two images in memory: the committed image that readers see and the
//! writer's working image. Outside a savepoint every write is persisted and
//! published immediately.

use crate::core::{DbError, Result, Value};
use crate::executor::{ExecutionContext, ExecutorPipeline};
use crate::parser::SqlParserAdapter;
use crate::result::QueryResult;
use crate::storage::fs::Filesystem;
use crate::storage::image::DatasetImage;
use crate::storage::persistence::SnapshotManager;
use crate::storage::pool::{Pool, PoolOpener, Savepoint, Session};
use crate::transaction::diff;
use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

type LiveSet = Arc<Mutex<HashSet<PathBuf>>>;

/// Opens [`FilePool`]s and enforces one live writer per file.
pub struct FilePoolOpener {
    fs: Arc<dyn Filesystem>,
    live: LiveSet,
}

impl FilePoolOpener {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self {
            fs,
            live: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Open without going through the trait object.
    pub fn open_file(&self, path: &Path, create: bool) -> Result<FilePool> {
        let mut live = self.live.lock()?;
        if live.contains(path) {
            return Err(DbError::DatabaseLocked(path.display().to_string()));
        }

        let snapshots = SnapshotManager::new(self.fs.clone(), path);
        let image = if create {
            if snapshots.exists() {
                return Err(DbError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{}: already exists", path.display()),
                )));
            }
            let image = DatasetImage::new();
            snapshots.save(&image)?;
            image
        } else {
            snapshots.load()?
        };

        live.insert(path.to_path_buf());
        log::debug!("opened dataset file {} (create={})", path.display(), create);

        Ok(FilePool {
            inner: Arc::new(PoolInner {
                path: path.to_path_buf(),
                snapshots,
                committed: RwLock::new(image.clone()),
                writer: tokio::sync::Mutex::new(WriterState {
                    working: image,
                    savepoint_open: false,
                }),
                closed: AtomicBool::new(false),
                live: self.live.clone(),
                parser: SqlParserAdapter::new(),
                executors: ExecutorPipeline::standard(),
            }),
        })
    }
}

#[async_trait]
impl PoolOpener for FilePoolOpener {
    async fn open(&self, path: &Path, create: bool) -> Result<Arc<dyn Pool>> {
        Ok(Arc::new(self.open_file(path, create)?))
    }
}

struct WriterState {
    working: DatasetImage,
    savepoint_open: bool,
}

struct PoolInner {
    path: PathBuf,
    snapshots: SnapshotManager,
    committed: RwLock<DatasetImage>,
    writer: tokio::sync::Mutex<WriterState>,
    closed: AtomicBool,
    live: LiveSet,
    parser: SqlParserAdapter,
    executors: ExecutorPipeline,
}

impl PoolInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::PoolClosed(self.path.display().to_string()));
        }
        Ok(())
    }

    /// Persist `image` and make it the committed image.
    fn publish(&self, image: &DatasetImage) -> Result<()> {
        self.snapshots.save(image)?;
        *self.committed.write()? = image.clone();
        Ok(())
    }

    fn release(&self) {
        if let Ok(mut live) = self.live.lock() {
            live.remove(&self.path);
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.release();
        }
    }
}

#[derive(Clone)]
pub struct FilePool {
    inner: Arc<PoolInner>,
}

impl FilePool {
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Pool for FilePool {
    async fn execute(&self, stmt: &str, params: &[Value]) -> Result<QueryResult> {
        self.inner.ensure_open()?;
        let statements = self.inner.parser.parse(stmt)?;

        let mut state = self.inner.writer.lock().await;
        self.inner.ensure_open()?;

        // Run the whole batch on a copy so a failing statement leaves no trace.
        let mut next = state.working.clone();
        let mut result = QueryResult::empty();
        {
            let mut ctx = ExecutionContext::new(&mut next, params);
            for statement in &statements {
                result = self.inner.executors.execute(statement, &mut ctx)?;
            }
        }

        if !state.savepoint_open {
            self.inner.publish(&next)?;
        }
        state.working = next;
        Ok(result)
    }

    async fn query(&self, stmt: &str, params: &[Value]) -> Result<QueryResult> {
        self.inner.ensure_open()?;
        let statement = self.inner.parser.parse_one(stmt)?;
        if !statement.is_read_only() {
            return Err(DbError::UnsupportedOperation(
                "query only accepts read-only statements".into(),
            ));
        }

        let mut snapshot = self.inner.committed.read()?.clone();
        let mut ctx = ExecutionContext::new(&mut snapshot, params);
        self.inner.executors.execute(&statement, &mut ctx)
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut state = self.inner.writer.lock().await;
        self.inner.ensure_open()?;

        let mut next = state.working.clone();
        next.set(key, value);
        if !state.savepoint_open {
            self.inner.publish(&next)?;
        }
        state.working = next;
        Ok(())
    }

    async fn get(&self, key: &[u8], sync: bool) -> Result<Option<Vec<u8>>> {
        self.inner.ensure_open()?;
        if sync {
            let state = self.inner.writer.lock().await;
            Ok(state.working.get(key))
        } else {
            Ok(self.inner.committed.read()?.get(key))
        }
    }

    async fn savepoint(&self) -> Result<Box<dyn Savepoint>> {
        let mut state = self.inner.writer.lock().await;
        self.inner.ensure_open()?;
        if state.savepoint_open {
            return Err(DbError::SavepointOpen);
        }
        state.savepoint_open = true;
        Ok(Box::new(FileSavepoint {
            inner: self.inner.clone(),
            finished: false,
        }))
    }

    async fn create_session(&self) -> Result<Box<dyn Session>> {
        let state = self.inner.writer.lock().await;
        self.inner.ensure_open()?;
        Ok(Box::new(FileSession {
            inner: self.inner.clone(),
            baseline: state.working.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        // Wait for an in-flight write before letting go of the file.
        let _state = self.inner.writer.lock().await;
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.release();
            log::debug!("closed dataset file {}", self.inner.path.display());
        }
        Ok(())
    }
}

struct FileSavepoint {
    inner: Arc<PoolInner>,
    finished: bool,
}

#[async_trait]
impl Savepoint for FileSavepoint {
    async fn commit(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let mut state = self.inner.writer.lock().await;
        self.inner.ensure_open()?;
        self.inner.publish(&state.working)?;
        state.savepoint_open = false;
        self.finished = true;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let mut state = self.inner.writer.lock().await;
        state.working = self.inner.committed.read()?.clone();
        state.savepoint_open = false;
        self.finished = true;
        Ok(())
    }
}

struct FileSession {
    inner: Arc<PoolInner>,
    baseline: DatasetImage,
}

#[async_trait]
impl Session for FileSession {
    async fn changeset_id(&mut self) -> Result<Vec<u8>> {
        let state = self.inner.writer.lock().await;
        self.inner.ensure_open()?;
        Ok(diff(&self.baseline, &state.working).id())
    }

    async fn delete(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fs::MemoryFilesystem;

    fn opener() -> (MemoryFilesystem, FilePoolOpener) {
        let fs = MemoryFilesystem::new();
        let opener = FilePoolOpener::new(Arc::new(fs.clone()));
        (fs, opener)
    }

    #[tokio::test]
    async fn test_auto_commit_outside_savepoint() {
        let (_fs, opener) = opener();
        let pool = opener.open(Path::new("data/db1"), true).await.unwrap();
        pool.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[]).await.unwrap();
        pool.execute("INSERT INTO t VALUES ($1)", &[Value::Integer(1)]).await.unwrap();

        let result = pool.query("SELECT * FROM t", &[]).await.unwrap();
        assert_eq!(result.row_count(), 1);
    }

    #[tokio::test]
    async fn test_savepoint_hides_writes_until_commit() {
        let (_fs, opener) = opener();
        let pool = opener.open(Path::new("data/db1"), true).await.unwrap();

        let mut savepoint = pool.savepoint().await.unwrap();
        pool.set(b"k", b"v").await.unwrap();
        assert_eq!(pool.get(b"k", true).await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(pool.get(b"k", false).await.unwrap(), None);

        savepoint.commit().await.unwrap();
        assert_eq!(pool.get(b"k", false).await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_rollback_restores_committed_image() {
        let (_fs, opener) = opener();
        let pool = opener.open(Path::new("data/db1"), true).await.unwrap();
        pool.set(b"k", b"v1").await.unwrap();

        let mut savepoint = pool.savepoint().await.unwrap();
        pool.set(b"k", b"v2").await.unwrap();
        savepoint.rollback().await.unwrap();
        assert_eq!(pool.get(b"k", true).await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn test_only_one_savepoint() {
        let (_fs, opener) = opener();
        let pool = opener.open(Path::new("data/db1"), true).await.unwrap();
        let _first = pool.savepoint().await.unwrap();
        assert!(matches!(pool.savepoint().await, Err(DbError::SavepointOpen)));
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_trace() {
        let (_fs, opener) = opener();
        let pool = opener.open(Path::new("data/db1"), true).await.unwrap();
        pool.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[]).await.unwrap();

        let err = pool
            .execute("INSERT INTO t VALUES (1); INSERT INTO t VALUES (1)", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
        assert!(pool.query("SELECT * FROM t", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_writer_per_file() {
        let (_fs, opener) = opener();
        let path = Path::new("data/db1");
        let pool = opener.open(path, true).await.unwrap();
        assert!(matches!(
            opener.open(path, false).await,
            Err(DbError::DatabaseLocked(_))
        ));

        pool.close().await.unwrap();
        assert!(matches!(pool.set(b"k", b"v").await, Err(DbError::PoolClosed(_))));
        assert!(opener.open(path, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropping_pool_releases_file() {
        let (_fs, opener) = opener();
        let path = Path::new("data/db1");
        drop(opener.open(path, true).await.unwrap());
        assert!(opener.open(path, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_reopen_reads_persisted_image() {
        let (fs, opener) = opener();
        let path = Path::new("data/db1");
        let pool = opener.open(path, true).await.unwrap();
        pool.set(b"k", b"v").await.unwrap();
        pool.close().await.unwrap();

        let reopened = FilePoolOpener::new(Arc::new(fs))
            .open(path, false)
            .await
            .unwrap();
        assert_eq!(reopened.get(b"k", false).await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_changeset_ignores_rolled_back_writes() {
        let (_fs, opener) = opener();
        let pool = opener.open(Path::new("data/db1"), true).await.unwrap();

        let mut session = pool.create_session().await.unwrap();
        let empty = session.changeset_id().await.unwrap();

        let mut savepoint = pool.savepoint().await.unwrap();
        pool.set(b"k", b"v").await.unwrap();
        assert_ne!(session.changeset_id().await.unwrap(), empty);
        savepoint.rollback().await.unwrap();

        assert_eq!(session.changeset_id().await.unwrap(), empty);
        session.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_rejects_writes() {
        let (_fs, opener) = opener();
        let pool = opener.open(Path::new("data/db1"), true).await.unwrap();
        pool.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
        assert!(matches!(
            pool.query("INSERT INTO t VALUES (1)", &[]).await,
            Err(DbError::UnsupportedOperation(_))
        ));
    }
}
