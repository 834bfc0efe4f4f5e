// ============================================================================
// Registry - atomic, recoverable commits across many datasets
// ============================================================================
//
// One commit session at a time. Writes go to per-dataset savepoints; at
// commit every touched dataset records its changeset id and the session's
// idempotency key in its own key/value namespace before its file becomes
// visible. Created datasets live in `<dbid>.new` and deleted ones in
// `<dbid>.deleted` until then.
//
// Locks, always taken in this order:
//   writer  - session state, serializes every mutating call
//   readers - reader gate, held while the visible dataset set changes
//   pools   - visible (committed) pools
//
// ============================================================================

pub mod bookkeeping;
pub mod config;
pub mod files;
pub mod reader_gate;
pub mod session;

mod commit;
mod data;
mod datasets;

pub use bookkeeping::{aggregate_hash, APP_HASH_KEY, IDEMPOTENCY_KEY};
pub use config::RegistryOptions;
pub use session::DatasetStatus;

use crate::core::{DbError, Result};
use crate::storage::fs::Filesystem;
use crate::storage::pool::{Pool, PoolOpener};
use futures::future::join_all;
use reader_gate::ReaderGate;
use session::CommitSession;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{event, info_span, Instrument, Level};

struct WriterState {
    session: Option<CommitSession>,
    closed: bool,
}

impl WriterState {
    fn session_mut(&mut self) -> Result<&mut CommitSession> {
        self.session.as_mut().ok_or(DbError::RegistryNotWritable)
    }
}

pub struct Registry {
    opener: Arc<dyn PoolOpener>,
    fs: Arc<dyn Filesystem>,
    directory: PathBuf,
    options: RegistryOptions,
    pools: RwLock<BTreeMap<String, Arc<dyn Pool>>>,
    writer: Mutex<WriterState>,
    readers: ReaderGate,
}

impl Registry {
    /// Open the registry over `directory`, rolling back whatever an
    /// interrupted session left behind.
    pub async fn new(
        opener: Arc<dyn PoolOpener>,
        directory: impl AsRef<Path>,
        options: RegistryOptions,
    ) -> Result<Self> {
        options.validate().map_err(DbError::Config)?;
        let directory = directory.as_ref().to_path_buf();
        let span = info_span!("registry.open", registry = %options.name, directory = %directory.display());

        async move {
            let fs = options.filesystem.clone();
            fs.mkdir_all(&directory)?;

            let pools = datasets::open_directory(opener.as_ref(), fs.as_ref(), &directory).await?;
            event!(Level::INFO, datasets = pools.len(), "registry opened");

            Ok(Self {
                opener,
                fs,
                directory,
                options,
                pools: RwLock::new(pools),
                writer: Mutex::new(WriterState {
                    session: None,
                    closed: false,
                }),
                readers: ReaderGate::new(),
            })
        }
        .instrument(span)
        .await
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Committed datasets, in ascending order. Datasets created in the open
    /// session are not listed yet; datasets deleted in it still are.
    pub async fn list(&self) -> Result<Vec<String>> {
        let state = self.lock_writer().await?;
        let mut dbids: Vec<String> = self.pools.read().await.keys().cloned().collect();

        if let Some(session) = &state.session {
            dbids.extend(
                session
                    .open
                    .iter()
                    .filter(|(_, db)| db.status == DatasetStatus::Deleted)
                    .map(|(dbid, _)| dbid.clone()),
            );
        }

        dbids.sort();
        dbids.dedup();
        Ok(dbids)
    }

    pub async fn in_session(&self) -> bool {
        self.writer.lock().await.session.is_some()
    }

    pub async fn is_recovery(&self) -> bool {
        self.writer
            .lock()
            .await
            .session
            .as_ref()
            .is_some_and(|s| s.recovery)
    }

    /// Cancel any open session, close every dataset and refuse further use.
    pub async fn close(&self) -> Result<()> {
        let span = info_span!("registry.close", registry = %self.options.name);

        async {
            let mut state = self.writer.lock().await;
            if state.closed {
                return Ok(());
            }

            let mut errors = Vec::new();
            if let Err(err) = self.cancel_locked(&mut state).await {
                errors.push(err);
            }

            let block = self.readers.block_all(self.options.reader_wait_timeout).await?;
            self.readers.close();

            let mut pools = self.pools.write().await;
            let closing = std::mem::take(&mut *pools);
            let results = join_all(closing.iter().map(|(dbid, pool)| async move {
                pool.close().await.map_err(|e| e.in_dataset(dbid))
            }))
            .await;
            errors.extend(results.into_iter().filter_map(|r| r.err()));
            drop(pools);
            drop(block);

            state.closed = true;
            event!(Level::INFO, "registry closed");

            match errors.len() {
                0 => Ok(()),
                1 => Err(errors.remove(0)),
                _ => Err(DbError::Cancel(errors)),
            }
        }
        .instrument(span)
        .await
    }

    async fn lock_writer(&self) -> Result<MutexGuard<'_, WriterState>> {
        let state = self.writer.lock().await;
        if state.closed {
            return Err(DbError::RegistryClosed);
        }
        Ok(state)
    }

    fn path(&self, dbid: &str, state: files::FileState) -> PathBuf {
        files::dataset_path(&self.directory, dbid, state)
    }
}
