use super::bookkeeping;
use super::session::{CommitSession, DatasetStatus, OpenDb};
use super::Registry;
use crate::core::{DbError, Result, Value};
use crate::result::QueryResult;
use crate::storage::pool::Pool;
use std::sync::Arc;
use tracing::{event, Level};

/// Where a session write goes.
enum Writer {
    /// Recovery replay of a write the dataset already committed.
    Skip,
    Pool(Arc<dyn Pool>),
}

impl Registry {
    /// Run a statement on the dataset's writer inside the open session.
    pub async fn execute(&self, dbid: &str, stmt: &str, params: &[Value]) -> Result<QueryResult> {
        let mut state = self.lock_writer().await?;
        let session = state.session_mut()?;

        match self.writer_for(session, dbid).await? {
            Writer::Skip => Ok(QueryResult::empty()),
            Writer::Pool(pool) => pool
                .execute(stmt, params)
                .await
                .map_err(|e| e.in_dataset(dbid)),
        }
    }

    /// Store a key/value pair in the dataset inside the open session.
    pub async fn set(&self, dbid: &str, key: &[u8], value: &[u8]) -> Result<()> {
        if bookkeeping::is_reserved(key) {
            return Err(DbError::ReservedKey(String::from_utf8_lossy(key).into_owned()));
        }

        let mut state = self.lock_writer().await?;
        let session = state.session_mut()?;

        match self.writer_for(session, dbid).await? {
            Writer::Skip => Ok(()),
            Writer::Pool(pool) => pool.set(key, value).await.map_err(|e| e.in_dataset(dbid)),
        }
    }

    /// Read a value. With `sync` the read goes through the session's writer
    /// and sees its uncommitted writes; without it, it reads committed data.
    pub async fn get(&self, dbid: &str, key: &[u8], sync: bool) -> Result<Option<Vec<u8>>> {
        if !sync {
            let pass = self.readers.enter(dbid).await?;
            let pool = self.visible_pool(dbid).await?;
            return pass
                .run(async { pool.get(key, false).await.map_err(|e| e.in_dataset(dbid)) })
                .await;
        }

        let mut state = self.lock_writer().await?;
        let session = state.session_mut()?;

        match self.writer_for(session, dbid).await? {
            Writer::Skip => Ok(None),
            Writer::Pool(pool) => pool.get(key, true).await.map_err(|e| e.in_dataset(dbid)),
        }
    }

    /// Read-only statement against committed data. Runs alongside the open
    /// session; a commit may cancel it once its grace period has passed.
    pub async fn query(&self, dbid: &str, stmt: &str, params: &[Value]) -> Result<QueryResult> {
        let pass = self.readers.enter(dbid).await?;
        let pool = self.visible_pool(dbid).await?;
        pass.run(async {
            pool.query(stmt, params)
                .await
                .map_err(|e| e.in_dataset(dbid))
        })
        .await
    }

    async fn visible_pool(&self, dbid: &str) -> Result<Arc<dyn Pool>> {
        self.pools
            .read()
            .await
            .get(dbid)
            .cloned()
            .ok_or_else(|| DbError::DatabaseNotFound(dbid.to_string()))
    }

    /// Find or open the session's writer for `dbid`.
    async fn writer_for(&self, session: &mut CommitSession, dbid: &str) -> Result<Writer> {
        if let Some(db) = session.open.get(dbid) {
            return match (db.status, &db.pool) {
                (DatasetStatus::Deleted, _) | (_, None) => {
                    Err(DbError::DatabaseNotFound(dbid.to_string()))
                }
                (_, Some(pool)) => Ok(Writer::Pool(pool.clone())),
            };
        }

        session.ensure_not_finalized(dbid)?;

        let Some(pool) = self.pools.read().await.get(dbid).cloned() else {
            // Replaying a block whose delete already committed.
            if session.recovery {
                event!(Level::DEBUG, dbid, "dataset already gone, skipping write");
                return Ok(Writer::Skip);
            }
            return Err(DbError::DatabaseNotFound(dbid.to_string()));
        };

        if session.recovery
            && bookkeeping::already_applied(pool.as_ref(), &session.idempotency_key, true)
                .await
                .map_err(|e| e.in_dataset(dbid))?
        {
            event!(Level::DEBUG, dbid, "dataset already committed this key, skipping write");
            return Ok(Writer::Skip);
        }

        let savepoint = pool.savepoint().await.map_err(|e| e.in_dataset(dbid))?;
        let change_session = match pool.create_session().await {
            Ok(change_session) => change_session,
            Err(err) => {
                let mut savepoint = savepoint;
                if let Err(rollback) = savepoint.rollback().await {
                    event!(Level::ERROR, dbid, error = %rollback, "failed to roll back savepoint");
                }
                return Err(err.in_dataset(dbid));
            }
        };

        session.open.insert(
            dbid.to_string(),
            OpenDb::new(pool.clone(), savepoint, change_session, DatasetStatus::Exists),
        );
        Ok(Writer::Pool(pool))
    }
}
