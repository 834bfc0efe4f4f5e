//! Admission control for readers while the registry finalizes a commit.
//!
//! Readers pass through a single-slot semaphore and then hold a shared lock
//! on their dataset for as long as they run. A commit takes the slot (new
//! readers queue behind it) and then waits for the exclusive lock of every
//! dataset it is about to change. Readers of other datasets keep running.
//! Readers of the affected datasets still running after the grace period are
//! told to stop through a watch channel.

use crate::core::{DbError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{
    watch, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, Semaphore, SemaphorePermit,
};
use tracing::{event, Level};

pub struct ReaderGate {
    slot: Semaphore,
    active: Mutex<BTreeMap<String, Arc<RwLock<()>>>>,
    cancel: watch::Sender<Arc<BTreeSet<String>>>,
}

impl ReaderGate {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(Arc::new(BTreeSet::new()));
        Self {
            slot: Semaphore::new(1),
            active: Mutex::new(BTreeMap::new()),
            cancel,
        }
    }

    /// Admit one reader of `dbid`. Waits while a commit holds the gate.
    pub async fn enter(&self, dbid: &str) -> Result<ReadPass> {
        let permit = self
            .slot
            .acquire()
            .await
            .map_err(|_| DbError::RegistryClosed)?;
        let lock = self.active.lock()?.entry(dbid.to_string()).or_default().clone();
        let guard = lock.read_owned().await;
        drop(permit);

        Ok(ReadPass {
            dbid: dbid.to_string(),
            _guard: guard,
            signal: self.cancel.subscribe(),
        })
    }

    /// Stop admitting readers and wait for the readers of `dbids` to leave.
    /// After `grace` the ones still running are cancelled.
    pub async fn block(&self, dbids: &BTreeSet<String>, grace: Duration) -> Result<ReaderBlock<'_>> {
        self.block_matching(grace, |dbid| dbids.contains(dbid)).await
    }

    /// Like `block`, for the readers of every dataset.
    pub async fn block_all(&self, grace: Duration) -> Result<ReaderBlock<'_>> {
        self.block_matching(grace, |_| true).await
    }

    async fn block_matching(
        &self,
        grace: Duration,
        affects: impl Fn(&str) -> bool,
    ) -> Result<ReaderBlock<'_>> {
        let permit = self
            .slot
            .acquire()
            .await
            .map_err(|_| DbError::RegistryClosed)?;

        // Every admitted reader already holds its read guard once we own the slot.
        let locks: Vec<(String, Arc<RwLock<()>>)> = {
            let mut active = self.active.lock()?;
            active.retain(|_, lock| Arc::strong_count(lock) > 1);
            active
                .iter()
                .filter(|(dbid, _)| affects(dbid.as_str()))
                .map(|(dbid, lock)| (dbid.clone(), lock.clone()))
                .collect()
        };
        let dbids: BTreeSet<String> = locks.iter().map(|(dbid, _)| dbid.clone()).collect();

        let drain = drain(locks.into_iter().map(|(_, lock)| lock).collect());
        tokio::pin!(drain);

        let drained = match tokio::time::timeout(grace, &mut drain).await {
            Ok(guards) => guards,
            Err(_) => {
                event!(
                    Level::WARN,
                    grace_ms = grace.as_millis() as u64,
                    datasets = ?dbids,
                    "readers still running after grace period, cancelling them"
                );
                self.cancel.send_replace(Arc::new(dbids));
                drain.await
            }
        };

        Ok(ReaderBlock {
            _permit: permit,
            _drained: drained,
        })
    }

    /// Refuse every future reader.
    pub fn close(&self) {
        self.slot.close();
    }
}

impl Default for ReaderGate {
    fn default() -> Self {
        Self::new()
    }
}

async fn drain(locks: Vec<Arc<RwLock<()>>>) -> Vec<OwnedRwLockWriteGuard<()>> {
    let mut guards = Vec::with_capacity(locks.len());
    for lock in locks {
        guards.push(lock.write_owned().await);
    }
    guards
}

/// Held by an admitted reader.
pub struct ReadPass {
    dbid: String,
    _guard: OwnedRwLockReadGuard<()>,
    signal: watch::Receiver<Arc<BTreeSet<String>>>,
}

impl ReadPass {
    /// Run `read`, giving up with `ReadCancelled` if a commit cancels the
    /// readers of this dataset.
    pub async fn run<T, F>(mut self, read: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            result = read => result,
            _ = self.cancelled() => Err(DbError::ReadCancelled),
        }
    }

    async fn cancelled(&mut self) {
        while self.signal.changed().await.is_ok() {
            if self.signal.borrow_and_update().contains(&self.dbid) {
                return;
            }
        }
    }
}

/// Readers stay out while this is alive.
pub struct ReaderBlock<'a> {
    _permit: SemaphorePermit<'a>,
    _drained: Vec<OwnedRwLockWriteGuard<()>>,
}
