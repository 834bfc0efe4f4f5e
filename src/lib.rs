// ============================================================================
// datasetdb Library
// ============================================================================
//
// Many small embedded datasets, one atomic commit. A `Registry` applies a
// block of writes across any number of datasets, makes the whole block
// durable as a unit, and returns a hash every replica computes identically.
// An interrupted commit is finished by replaying the same calls under
// `begin_recovery`.
//
// use datasetdb::{FilePoolOpener, OsFilesystem, Registry, RegistryOptions};
// use std::sync::Arc;
//
// let fs = Arc::new(OsFilesystem::new());
// let opener = Arc::new(FilePoolOpener::new(fs.clone()));
// let registry = Registry::new(opener, "data", RegistryOptions::new().filesystem(fs)).await?;
//
// registry.begin(b"block-1").await?;
// registry.create("accounts").await?;
// registry
//     .execute("accounts", "CREATE TABLE balances (id INTEGER PRIMARY KEY, amount INTEGER)", &[])
//     .await?;
// let app_hash = registry.commit(b"block-1").await?;
//
// ============================================================================

pub mod core;
pub mod executor;
pub mod parser;
pub mod registry;
pub mod result;
pub mod storage;
pub mod transaction;

pub use core::{Column, DataType, DbError, Result, Row, Schema, Value};
pub use registry::{aggregate_hash, DatasetStatus, Registry, RegistryOptions, APP_HASH_KEY, IDEMPOTENCY_KEY};
pub use result::QueryResult;
pub use storage::{
    FilePool, FilePoolOpener, Filesystem, MemoryFilesystem, OsFilesystem, Pool, PoolOpener,
    Savepoint, Session,
};
