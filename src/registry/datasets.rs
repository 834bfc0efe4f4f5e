use super::files::{self, FileState};
use super::session::{DatasetStatus, OpenDb};
use super::Registry;
use crate::core::{DbError, Result};
use crate::storage::fs::Filesystem;
use crate::storage::pool::{Pool, PoolOpener};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{event, info_span, Instrument, Level};

/// Undo whatever an unfinished session left in `dir`: `.new` files are
/// removed and `.deleted` files are renamed back. Returns the stable dbids.
pub(super) fn roll_back_leftovers(fs: &dyn Filesystem, dir: &Path) -> Result<BTreeSet<String>> {
    let mut names = Vec::new();
    fs.for_each_file(dir, &mut |name| {
        names.push(name.to_string());
        Ok(())
    })?;

    let mut stable = BTreeSet::new();
    for name in &names {
        let (dbid, state) = files::parse_file_name(name);
        match state {
            FileState::Stable => {
                stable.insert(dbid.to_string());
            }
            FileState::New => {
                fs.remove(&files::dataset_path(dir, dbid, FileState::New))?;
                event!(Level::WARN, dbid, "removed uncommitted dataset");
            }
            FileState::Deleted => {
                fs.rename(
                    &files::dataset_path(dir, dbid, FileState::Deleted),
                    &files::dataset_path(dir, dbid, FileState::Stable),
                )?;
                event!(Level::WARN, dbid, "restored dataset deleted by an uncommitted session");
                stable.insert(dbid.to_string());
            }
        }
    }
    Ok(stable)
}

/// Startup scan: roll back leftovers and open every committed dataset.
pub(super) async fn open_directory(
    opener: &dyn PoolOpener,
    fs: &dyn Filesystem,
    dir: &Path,
) -> Result<BTreeMap<String, Arc<dyn Pool>>> {
    let mut pools = BTreeMap::new();
    for dbid in roll_back_leftovers(fs, dir)? {
        let pool = opener
            .open(&files::dataset_path(dir, &dbid, FileState::Stable), false)
            .await
            .map_err(|e| e.in_dataset(&dbid))?;
        event!(Level::DEBUG, dbid = %dbid, "opened dataset");
        pools.insert(dbid, pool);
    }
    Ok(pools)
}

impl Registry {
    /// Create an empty dataset. It stays invisible to readers until commit.
    pub async fn create(&self, dbid: &str) -> Result<()> {
        let span = info_span!("registry.create", registry = %self.options.name, dbid);
        self.create_inner(dbid).instrument(span).await
    }

    async fn create_inner(&self, dbid: &str) -> Result<()> {
        files::validate_dbid(dbid)?;
        let mut state = self.lock_writer().await?;
        let session = state.session_mut()?;

        let committed = self.pools.read().await.contains_key(dbid);
        if committed && session.recovery {
            event!(Level::DEBUG, "dataset already exists, skipping create during recovery");
            return Ok(());
        }
        if committed || session.open.contains_key(dbid) || session.committed.contains_key(dbid) {
            return Err(DbError::DatabaseExists(dbid.to_string()));
        }

        let path = self.path(dbid, FileState::New);
        let pool = self.opener.open(&path, true).await.map_err(|e| e.in_dataset(dbid))?;

        let tracked = async {
            let savepoint = pool.savepoint().await?;
            let change_session = pool.create_session().await?;
            Ok::<_, DbError>((savepoint, change_session))
        }
        .await;

        match tracked {
            Ok((savepoint, change_session)) => {
                session.open.insert(
                    dbid.to_string(),
                    OpenDb::new(pool, savepoint, change_session, DatasetStatus::New),
                );
                event!(Level::DEBUG, "dataset created");
                Ok(())
            }
            Err(err) => {
                if let Err(close) = pool.close().await {
                    event!(Level::ERROR, error = %close, "failed to close dataset after failed create");
                }
                if let Err(remove) = self.fs.remove(&path) {
                    event!(Level::ERROR, error = %remove, "failed to remove dataset after failed create");
                }
                Err(err.in_dataset(dbid))
            }
        }
    }

    /// Delete a dataset. Committed data stays readable on disk under
    /// `<dbid>.deleted` until the session commits.
    pub async fn delete(&self, dbid: &str) -> Result<()> {
        let span = info_span!("registry.delete", registry = %self.options.name, dbid);
        self.delete_inner(dbid).instrument(span).await
    }

    async fn delete_inner(&self, dbid: &str) -> Result<()> {
        files::validate_dbid(dbid)?;
        let mut state = self.lock_writer().await?;
        let session = state.session_mut()?;
        session.ensure_not_finalized(dbid)?;

        match session.status_of(dbid) {
            Some(DatasetStatus::Deleted) => {
                if session.recovery {
                    return Ok(());
                }
                return Err(DbError::DatabaseNotFound(dbid.to_string()));
            }
            Some(DatasetStatus::New) => {
                // Never became durable; discard it entirely.
                if let Some(mut db) = session.open.remove(dbid) {
                    self.discard_new(dbid, &mut db).await.map_err(|e| e.in_dataset(dbid))?;
                }
                event!(Level::DEBUG, "discarded dataset created in this session");
                return Ok(());
            }
            Some(DatasetStatus::Exists) | None => {}
        }

        let Some(pool) = self.pools.read().await.get(dbid).cloned() else {
            if session.recovery {
                event!(Level::DEBUG, "dataset already gone, skipping delete during recovery");
                return Ok(());
            }
            return Err(DbError::DatabaseNotFound(dbid.to_string()));
        };

        // Throw away writes made earlier in this session.
        if let Some(mut db) = session.open.remove(dbid) {
            let undone = async {
                if let Some(savepoint) = db.savepoint.as_mut() {
                    savepoint.rollback().await?;
                    db.savepoint = None;
                }
                if let Some(change_session) = db.change_session.take() {
                    change_session.delete().await?;
                }
                Ok::<_, DbError>(())
            }
            .await;
            if let Err(err) = undone {
                session.open.insert(dbid.to_string(), db);
                return Err(err.in_dataset(dbid));
            }
        }

        let _block = self
            .readers
            .block(&BTreeSet::from([dbid.to_string()]), self.options.reader_wait_timeout)
            .await?;
        let mut pools = self.pools.write().await;
        pools.remove(dbid);

        let stable = self.path(dbid, FileState::Stable);
        let moved = async {
            pool.close().await?;
            self.fs.rename(&stable, &self.path(dbid, FileState::Deleted))?;
            Ok::<_, DbError>(())
        }
        .await;

        if let Err(err) = moved {
            // Put the dataset back the way it was.
            match self.opener.open(&stable, false).await {
                Ok(reopened) => {
                    pools.insert(dbid.to_string(), reopened);
                }
                Err(reopen) => {
                    event!(Level::ERROR, error = %reopen, "failed to reopen dataset after failed delete");
                }
            }
            return Err(err.in_dataset(dbid));
        }

        session.open.insert(dbid.to_string(), OpenDb::deleted());
        event!(Level::DEBUG, "dataset marked deleted");
        Ok(())
    }

    /// Roll back and remove a dataset created in the current session.
    pub(super) async fn discard_new(&self, dbid: &str, db: &mut OpenDb) -> Result<()> {
        if let Some(savepoint) = db.savepoint.as_mut() {
            savepoint.rollback().await?;
            db.savepoint = None;
        }
        if let Some(change_session) = db.change_session.take() {
            change_session.delete().await?;
        }
        if let Some(pool) = db.pool.take() {
            pool.close().await?;
        }
        self.fs.remove(&self.path(dbid, FileState::New))?;
        Ok(())
    }
}
