use super::bookkeeping;
use super::datasets;
use super::files::FileState;
use super::session::{CommitSession, DatasetStatus, OpenDb};
use super::{Registry, WriterState};
use crate::core::{DbError, Result};
use crate::storage::pool::Pool;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;
use tracing::{event, info_span, Instrument, Level};

impl Registry {
    /// Open a commit session for `key`.
    pub async fn begin(&self, key: &[u8]) -> Result<()> {
        let span = info_span!("registry.begin", registry = %self.options.name, key = %hex::encode(key), recovery = false);
        self.begin_session(key, false).instrument(span).await
    }

    /// Open a session that replays the calls of a commit that may have been
    /// interrupted. Datasets that already recorded `key` are not written again.
    pub async fn begin_recovery(&self, key: &[u8]) -> Result<()> {
        let span = info_span!("registry.begin", registry = %self.options.name, key = %hex::encode(key), recovery = true);
        self.begin_session(key, true).instrument(span).await
    }

    async fn begin_session(&self, key: &[u8], recovery: bool) -> Result<()> {
        if key.is_empty() {
            return Err(DbError::ExecutionError(
                "idempotency key must not be empty".to_string(),
            ));
        }

        let mut state = self.lock_writer().await?;
        if state.session.is_some() {
            return Err(DbError::AlreadyInSession);
        }

        // A cancel that failed halfway may have left suffixed files behind.
        let stable = datasets::roll_back_leftovers(self.fs.as_ref(), &self.directory)?;
        {
            let mut pools = self.pools.write().await;
            for dbid in stable {
                if pools.contains_key(&dbid) {
                    continue;
                }
                let pool = self
                    .opener
                    .open(&self.path(&dbid, FileState::Stable), false)
                    .await
                    .map_err(|e| e.in_dataset(&dbid))?;
                event!(Level::DEBUG, dbid = %dbid, "reopened restored dataset");
                pools.insert(dbid, pool);
            }
        }

        state.session = Some(CommitSession::new(key, recovery));
        event!(Level::DEBUG, "session started");
        Ok(())
    }

    /// Finalize every dataset touched by the session and return the aggregate
    /// hash. On failure the session stays open; retry with the same key or
    /// cancel.
    pub async fn commit(&self, key: &[u8]) -> Result<Vec<u8>> {
        let span = info_span!("registry.commit", registry = %self.options.name, key = %hex::encode(key));
        self.commit_inner(key).instrument(span).await
    }

    async fn commit_inner(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut state = self.lock_writer().await?;
        let session = state.session_mut()?;

        if session.idempotency_key != key {
            return Err(DbError::IdempotencyKeyMismatch {
                expected: session.key_hex(),
                got: hex::encode(key),
            });
        }

        let affected: BTreeSet<String> = session.open.keys().cloned().collect();
        let _block = self
            .readers
            .block(&affected, self.options.reader_wait_timeout)
            .await?;
        let mut pools = self.pools.write().await;

        let mut errors = Vec::new();
        let mut hashes: BTreeMap<String, Vec<u8>> = session.committed.clone();

        // Untouched datasets count only if an earlier attempt at this commit
        // already finished them.
        for (dbid, pool) in pools.iter() {
            if session.open.contains_key(dbid) || hashes.contains_key(dbid) {
                continue;
            }
            match previous_contribution(pool.as_ref(), key).await {
                Ok(Some(hash)) => {
                    event!(Level::DEBUG, dbid = %dbid, "dataset already committed this key");
                    hashes.insert(dbid.clone(), hash);
                }
                Ok(None) => {}
                Err(err) => errors.push(err.in_dataset(dbid)),
            }
        }

        let touched: Vec<String> = session
            .open
            .iter()
            .filter(|(_, db)| db.status != DatasetStatus::Deleted)
            .map(|(dbid, _)| dbid.clone())
            .collect();

        for dbid in touched {
            let Some(db) = session.open.get_mut(&dbid) else {
                continue;
            };
            match self.finalize(&dbid, key, db, &mut pools).await {
                Ok(hash) => {
                    event!(Level::DEBUG, dbid = %dbid, app_hash = %hex::encode(&hash), "dataset committed");
                    session.open.remove(&dbid);
                    session.committed.insert(dbid.clone(), hash.clone());
                    hashes.insert(dbid, hash);
                }
                Err(err) => {
                    event!(Level::ERROR, dbid = %dbid, error = %err, "failed to commit dataset");
                    errors.push(err.in_dataset(&dbid));
                }
            }
        }

        if !errors.is_empty() {
            return Err(DbError::Commit(errors));
        }

        let deleted: Vec<String> = session
            .open
            .iter()
            .filter(|(_, db)| db.status == DatasetStatus::Deleted)
            .map(|(dbid, _)| dbid.clone())
            .collect();

        for dbid in deleted {
            match self.fs.remove(&self.path(&dbid, FileState::Deleted)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    event!(Level::ERROR, dbid = %dbid, error = %err, "failed to remove deleted dataset");
                    errors.push(DbError::from(err).in_dataset(&dbid));
                    continue;
                }
            }
            event!(Level::DEBUG, dbid = %dbid, "dataset removed");
            session.open.remove(&dbid);
        }

        if !errors.is_empty() {
            return Err(DbError::Commit(errors));
        }

        let aggregate =
            bookkeeping::aggregate_hash(hashes.iter().map(|(dbid, hash)| (dbid.as_str(), hash.as_slice())));
        state.session = None;

        event!(
            Level::INFO,
            datasets = hashes.len(),
            hash = %hex::encode(&aggregate),
            "session committed"
        );
        Ok(aggregate)
    }

    /// Make one dataset's writes durable and visible. Each step records its
    /// progress in `db`, so a retry picks up after the last step that worked.
    async fn finalize(
        &self,
        dbid: &str,
        key: &[u8],
        db: &mut OpenDb,
        pools: &mut BTreeMap<String, Arc<dyn Pool>>,
    ) -> Result<Vec<u8>> {
        if !db.renamed {
            let pool = db
                .pool
                .clone()
                .ok_or_else(|| DbError::PoolClosed(dbid.to_string()))?;

            if db.savepoint.is_some() {
                let app_hash = match &db.app_hash {
                    Some(hash) => hash.clone(),
                    None => {
                        let change_session = db.change_session.as_mut().ok_or_else(|| {
                            DbError::ExecutionError("change session already released".to_string())
                        })?;
                        let hash = change_session.changeset_id().await?;
                        db.app_hash = Some(hash.clone());
                        hash
                    }
                };

                bookkeeping::record(pool.as_ref(), key, &app_hash).await?;
                if let Some(savepoint) = db.savepoint.as_mut() {
                    savepoint.commit().await?;
                }
                db.savepoint = None;
            }

            if let Some(change_session) = db.change_session.take() {
                change_session.delete().await?;
            }

            if db.status == DatasetStatus::New {
                pool.close().await?;
                self.fs.rename(
                    &self.path(dbid, FileState::New),
                    &self.path(dbid, FileState::Stable),
                )?;
                db.renamed = true;
                db.pool = None;
            }
        }

        if db.status == DatasetStatus::New {
            let reopened = self
                .opener
                .open(&self.path(dbid, FileState::Stable), false)
                .await?;
            pools.insert(dbid.to_string(), reopened);
        }

        db.app_hash
            .clone()
            .ok_or_else(|| DbError::ExecutionError("dataset has no changeset id".to_string()))
    }

    /// Discard the open session, if any, restoring every dataset it touched.
    pub async fn cancel(&self) -> Result<()> {
        let span = info_span!("registry.cancel", registry = %self.options.name);
        async {
            let mut state = self.lock_writer().await?;
            self.cancel_locked(&mut state).await
        }
        .instrument(span)
        .await
    }

    /// Undo the session with the writer lock held. The session is cleared even
    /// when some datasets fail to roll back; the next `begin` cleans up the
    /// files they leave behind.
    pub(super) async fn cancel_locked(&self, state: &mut WriterState) -> Result<()> {
        let Some(session) = state.session.as_ref() else {
            return Ok(());
        };

        let affected: BTreeSet<String> = session.open.keys().cloned().collect();
        let _block = self
            .readers
            .block(&affected, self.options.reader_wait_timeout)
            .await?;
        let Some(mut session) = state.session.take() else {
            return Ok(());
        };
        let mut pools = self.pools.write().await;

        let mut errors = Vec::new();
        for (dbid, mut db) in std::mem::take(&mut session.open) {
            let status = db.status;
            let undone = match status {
                DatasetStatus::New if db.renamed => self.reopen(&dbid, &mut pools).await,
                DatasetStatus::New => self.discard_new(&dbid, &mut db).await,
                DatasetStatus::Deleted => match self.fs.rename(
                    &self.path(&dbid, FileState::Deleted),
                    &self.path(&dbid, FileState::Stable),
                ) {
                    Ok(()) => self.reopen(&dbid, &mut pools).await,
                    Err(err) => Err(err.into()),
                },
                DatasetStatus::Exists => roll_back(&mut db).await,
            };

            match undone {
                Ok(()) => event!(Level::DEBUG, dbid = %dbid, status = %status, "dataset restored"),
                Err(err) => {
                    event!(Level::ERROR, dbid = %dbid, error = %err, "failed to restore dataset");
                    errors.push(err.in_dataset(&dbid));
                }
            }
        }

        event!(
            Level::INFO,
            key = %session.key_hex(),
            finalized = session.committed.len(),
            "session cancelled"
        );

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(DbError::Cancel(errors)),
        }
    }

    async fn reopen(&self, dbid: &str, pools: &mut BTreeMap<String, Arc<dyn Pool>>) -> Result<()> {
        let pool = self
            .opener
            .open(&self.path(dbid, FileState::Stable), false)
            .await?;
        pools.insert(dbid.to_string(), pool);
        Ok(())
    }
}

/// App hash the dataset recorded for `key`, if it already committed it.
async fn previous_contribution(pool: &dyn Pool, key: &[u8]) -> Result<Option<Vec<u8>>> {
    if !bookkeeping::already_applied(pool, key, false).await? {
        return Ok(None);
    }
    match bookkeeping::stored_app_hash(pool, false).await? {
        Some(hash) => Ok(Some(hash)),
        None => Err(DbError::ExecutionError(
            "idempotency key recorded without an app hash".to_string(),
        )),
    }
}

async fn roll_back(db: &mut OpenDb) -> Result<()> {
    if let Some(savepoint) = db.savepoint.as_mut() {
        savepoint.rollback().await?;
        db.savepoint = None;
    }
    if let Some(change_session) = db.change_session.take() {
        change_session.delete().await?;
    }
    Ok(())
}
