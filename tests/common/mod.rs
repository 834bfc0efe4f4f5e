#![allow(dead_code)]

use async_trait::async_trait;
use datasetdb::{
    DbError, FilePoolOpener, MemoryFilesystem, Pool, PoolOpener, QueryResult, Registry, RegistryOptions,
    Result, Savepoint, Session, Value,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DIR: &str = "/data/registry";

pub async fn open_registry(fs: &MemoryFilesystem) -> Registry {
    let opener = Arc::new(FilePoolOpener::new(Arc::new(fs.clone())));
    Registry::new(opener, DIR, options(fs)).await.unwrap()
}

pub fn options(fs: &MemoryFilesystem) -> RegistryOptions {
    RegistryOptions::new()
        .filesystem(Arc::new(fs.clone()))
        .name("test")
}

/// Files in the registry directory, companions included.
pub fn files(fs: &MemoryFilesystem) -> Vec<String> {
    fs.file_names(DIR)
}

pub fn path(name: &str) -> String {
    format!("{}/{}", DIR, name)
}

/// Integer column `column` of every row, in result order.
pub fn ints(result: &QueryResult, column: &str) -> Vec<i64> {
    (0..result.row_count())
        .filter_map(|i| match result.get(i, column) {
            Some(Value::Integer(n)) => Some(*n),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Wrapped pool: slow reads and failing change sessions on demand
// ============================================================================

pub struct WrappedOpener {
    inner: FilePoolOpener,
    delay: Duration,
    fail_sessions: Arc<AtomicBool>,
}

impl WrappedOpener {
    pub fn new(fs: &MemoryFilesystem) -> Self {
        Self {
            inner: FilePoolOpener::new(Arc::new(fs.clone())),
            delay: Duration::ZERO,
            fail_sessions: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delay every `query` by `delay`.
    pub fn query_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail `create_session` while the flag is set.
    pub fn session_failures(mut self, flag: Arc<AtomicBool>) -> Self {
        self.fail_sessions = flag;
        self
    }
}

#[async_trait]
impl PoolOpener for WrappedOpener {
    async fn open(&self, path: &Path, create: bool) -> Result<Arc<dyn Pool>> {
        let inner = self.inner.open(path, create).await?;
        Ok(Arc::new(WrappedPool {
            inner,
            delay: self.delay,
            fail_sessions: self.fail_sessions.clone(),
        }))
    }
}

struct WrappedPool {
    inner: Arc<dyn Pool>,
    delay: Duration,
    fail_sessions: Arc<AtomicBool>,
}

#[async_trait]
impl Pool for WrappedPool {
    async fn execute(&self, stmt: &str, params: &[Value]) -> Result<QueryResult> {
        self.inner.execute(stmt, params).await
    }

    async fn query(&self, stmt: &str, params: &[Value]) -> Result<QueryResult> {
        tokio::time::sleep(self.delay).await;
        self.inner.query(stmt, params).await
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &[u8], sync: bool) -> Result<Option<Vec<u8>>> {
        self.inner.get(key, sync).await
    }

    async fn savepoint(&self) -> Result<Box<dyn Savepoint>> {
        self.inner.savepoint().await
    }

    async fn create_session(&self) -> Result<Box<dyn Session>> {
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(DbError::ExecutionError("change session unavailable".to_string()));
        }
        self.inner.create_session().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
