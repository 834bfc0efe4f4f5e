/// Crash recovery tests
///
/// A crash is simulated by dropping the registry without cancelling and
/// opening a new one over the same in-memory filesystem.
/// Run with: cargo test --test recovery_tests

mod common;

use common::{files, ints, open_registry, options, path, WrappedOpener, DIR};
use datasetdb::{DbError, MemoryFilesystem, Registry, IDEMPOTENCY_KEY};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

async fn genesis(registry: &Registry) {
    registry.begin(b"k0").await.unwrap();
    registry.create("base").await.unwrap();
    registry
        .execute("base", "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)", &[])
        .await
        .unwrap();
    registry
        .execute("base", "INSERT INTO items VALUES (1, 'one'), (2, 'two')", &[])
        .await
        .unwrap();
    registry.commit(b"k0").await.unwrap();
}

/// The block every test replays.
async fn block(registry: &Registry) {
    registry.create("db1").await.unwrap();
    registry
        .execute("db1", "CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
        .await
        .unwrap();
    registry.execute("db1", "INSERT INTO t VALUES (10)", &[]).await.unwrap();
    registry
        .execute("base", "INSERT INTO items VALUES (3, 'three')", &[])
        .await
        .unwrap();
    registry.create("db2").await.unwrap();
    registry.set("db2", b"owner", b"bob").await.unwrap();
}

async fn clean_hash() -> Vec<u8> {
    let fs = MemoryFilesystem::new();
    let registry = open_registry(&fs).await;
    genesis(&registry).await;
    registry.begin(b"k1").await.unwrap();
    block(&registry).await;
    registry.commit(b"k1").await.unwrap()
}

async fn base_ids(registry: &Registry) -> Vec<i64> {
    let result = registry
        .query("base", "SELECT id FROM items ORDER BY id", &[])
        .await
        .unwrap();
    ints(&result, "id")
}

fn commit_errors(result: datasetdb::Result<Vec<u8>>) -> Vec<DbError> {
    match result {
        Err(DbError::Commit(errors)) => errors,
        other => panic!("expected a commit failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_crash_before_commit_rolls_back_on_startup() {
    let fs = MemoryFilesystem::new();
    {
        let registry = open_registry(&fs).await;
        genesis(&registry).await;

        registry.begin(b"k1").await.unwrap();
        block(&registry).await;
        registry.delete("base").await.unwrap();
        assert_eq!(
            files(&fs),
            vec!["base.deleted".to_string(), "db1.new".to_string(), "db2.new".to_string()]
        );
    }

    let registry = open_registry(&fs).await;
    assert_eq!(files(&fs), vec!["base".to_string()]);
    assert_eq!(registry.list().await.unwrap(), vec!["base".to_string()]);
    assert_eq!(base_ids(&registry).await, vec![1, 2]);
    assert_eq!(
        registry.get("base", IDEMPOTENCY_KEY, false).await.unwrap(),
        Some(b"k0".to_vec())
    );
}

#[tokio::test]
async fn test_uncommitted_writes_lost_on_crash() {
    let fs = MemoryFilesystem::new();
    {
        let registry = open_registry(&fs).await;
        genesis(&registry).await;
        registry.begin(b"k1").await.unwrap();
        registry
            .execute("base", "DELETE FROM items", &[])
            .await
            .unwrap();
    }

    let registry = open_registry(&fs).await;
    assert_eq!(base_ids(&registry).await, vec![1, 2]);
}

#[tokio::test]
async fn test_crash_during_commit_recovers_same_hash() {
    let expected = clean_hash().await;

    let fs = MemoryFilesystem::new();
    {
        let registry = open_registry(&fs).await;
        genesis(&registry).await;

        fs.fail_renames_from(path("db2.new"));
        registry.begin(b"k1").await.unwrap();
        block(&registry).await;
        let errors = commit_errors(registry.commit(b"k1").await);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].root(), DbError::Io(_)));
    }
    fs.clear_failures();

    // base and db1 finished before the crash; db2 did not.
    let registry = open_registry(&fs).await;
    assert_eq!(registry.list().await.unwrap(), vec!["base".to_string(), "db1".to_string()]);
    assert_eq!(base_ids(&registry).await, vec![1, 2, 3]);

    registry.begin_recovery(b"k1").await.unwrap();
    block(&registry).await;
    let recovered = registry.commit(b"k1").await.unwrap();
    assert_eq!(recovered, expected);

    // The replay did not insert anything twice.
    assert_eq!(base_ids(&registry).await, vec![1, 2, 3]);
    let result = registry.query("db1", "SELECT id FROM t", &[]).await.unwrap();
    assert_eq!(ints(&result, "id"), vec![10]);
    assert_eq!(registry.get("db2", b"owner", false).await.unwrap(), Some(b"bob".to_vec()));
    assert_eq!(files(&fs), vec!["base", "db1", "db2"]);
}

#[tokio::test]
async fn test_failed_commit_can_be_retried() {
    let expected = clean_hash().await;

    let fs = MemoryFilesystem::new();
    let registry = open_registry(&fs).await;
    genesis(&registry).await;

    fs.fail_renames_from(path("db2.new"));
    registry.begin(b"k1").await.unwrap();
    block(&registry).await;
    commit_errors(registry.commit(b"k1").await);
    assert!(registry.in_session().await);

    // Datasets finalized by the failed attempt refuse further writes.
    let err = registry
        .execute("base", "INSERT INTO items VALUES (4, 'four')", &[])
        .await
        .unwrap_err();
    assert!(matches!(err.root(), DbError::ExecutionError(_)));

    fs.clear_failures();
    assert_eq!(registry.commit(b"k1").await.unwrap(), expected);
    assert!(!registry.in_session().await);
    assert_eq!(files(&fs), vec!["base", "db1", "db2"]);
}

#[tokio::test]
async fn test_finalized_dataset_cannot_be_deleted_before_retry() {
    let expected = clean_hash().await;

    let fs = MemoryFilesystem::new();
    let registry = open_registry(&fs).await;
    genesis(&registry).await;

    fs.fail_renames_from(path("db2.new"));
    registry.begin(b"k1").await.unwrap();
    block(&registry).await;
    commit_errors(registry.commit(b"k1").await);
    fs.clear_failures();

    let err = registry.delete("base").await.unwrap_err();
    assert!(matches!(err.root(), DbError::ExecutionError(_)));
    assert_eq!(files(&fs), vec!["base", "db1", "db2.new"]);

    // The retry hashes exactly what a clean commit would have.
    assert_eq!(registry.commit(b"k1").await.unwrap(), expected);
    assert_eq!(registry.list().await.unwrap(), vec!["base", "db1", "db2"]);
}

#[tokio::test]
async fn test_failed_change_session_releases_dataset() {
    let fs = MemoryFilesystem::new();
    let failing = Arc::new(AtomicBool::new(false));
    let opener = Arc::new(WrappedOpener::new(&fs).session_failures(failing.clone()));
    let registry = Registry::new(opener, DIR, options(&fs)).await.unwrap();
    genesis(&registry).await;

    registry.begin(b"k1").await.unwrap();
    failing.store(true, Ordering::SeqCst);
    assert!(registry
        .execute("base", "INSERT INTO items VALUES (3, 'three')", &[])
        .await
        .is_err());
    assert!(registry.create("db1").await.is_err());
    assert_eq!(files(&fs), vec!["base".to_string()]);
    failing.store(false, Ordering::SeqCst);

    // Neither failure left a savepoint or file behind.
    registry
        .execute("base", "INSERT INTO items VALUES (3, 'three')", &[])
        .await
        .unwrap();
    registry.create("db1").await.unwrap();
    registry.commit(b"k1").await.unwrap();

    assert_eq!(base_ids(&registry).await, vec![1, 2, 3]);
    assert_eq!(registry.list().await.unwrap(), vec!["base", "db1"]);
}

#[tokio::test]
async fn test_commit_accumulates_every_failure() {
    let fs = MemoryFilesystem::new();
    let registry = open_registry(&fs).await;

    fs.fail_renames_from(path("a.new"));
    fs.fail_renames_from(path("c.new"));
    registry.begin(b"k1").await.unwrap();
    for dbid in ["a", "b", "c"] {
        registry.create(dbid).await.unwrap();
    }

    let errors = commit_errors(registry.commit(b"k1").await);
    assert_eq!(errors.len(), 2);
    let message = DbError::Commit(errors).to_string();
    assert!(message.contains("'a'"), "{}", message);
    assert!(message.contains("'c'"), "{}", message);

    fs.clear_failures();
    registry.commit(b"k1").await.unwrap();
    assert_eq!(registry.list().await.unwrap(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_deleted_file_removal_failure_is_retried() {
    let fs = MemoryFilesystem::new();
    let registry = open_registry(&fs).await;
    genesis(&registry).await;

    fs.fail_removes_of(path("base.deleted"));
    registry.begin(b"k1").await.unwrap();
    registry.delete("base").await.unwrap();
    commit_errors(registry.commit(b"k1").await);
    assert_eq!(files(&fs), vec!["base.deleted".to_string()]);

    fs.clear_failures();
    registry.commit(b"k1").await.unwrap();
    assert!(files(&fs).is_empty());
}

#[tokio::test]
async fn test_crash_before_deleted_removal_replays_delete() {
    let fs = MemoryFilesystem::new();
    let clean = {
        let other = MemoryFilesystem::new();
        let registry = open_registry(&other).await;
        genesis(&registry).await;
        registry.begin(b"k1").await.unwrap();
        registry.create("db1").await.unwrap();
        registry.delete("base").await.unwrap();
        registry.commit(b"k1").await.unwrap()
    };

    {
        let registry = open_registry(&fs).await;
        genesis(&registry).await;
        fs.fail_removes_of(path("base.deleted"));
        registry.begin(b"k1").await.unwrap();
        registry.create("db1").await.unwrap();
        registry.delete("base").await.unwrap();
        commit_errors(registry.commit(b"k1").await);
    }
    fs.clear_failures();

    // Startup brings base back; the replay deletes it again.
    let registry = open_registry(&fs).await;
    assert_eq!(registry.list().await.unwrap(), vec!["base", "db1"]);

    registry.begin_recovery(b"k1").await.unwrap();
    registry.create("db1").await.unwrap();
    registry.delete("base").await.unwrap();
    assert_eq!(registry.commit(b"k1").await.unwrap(), clean);
    assert_eq!(files(&fs), vec!["db1".to_string()]);
}

#[tokio::test]
async fn test_cancel_after_partial_commit() {
    let fs = MemoryFilesystem::new();
    let registry = open_registry(&fs).await;
    genesis(&registry).await;

    fs.fail_renames_from(path("db2.new"));
    registry.begin(b"k1").await.unwrap();
    block(&registry).await;
    commit_errors(registry.commit(b"k1").await);
    fs.clear_failures();

    // Finalized datasets stay committed; the rest is rolled back.
    registry.cancel().await.unwrap();
    assert_eq!(files(&fs), vec!["base", "db1"]);
    assert_eq!(base_ids(&registry).await, vec![1, 2, 3]);

    // Recovery completes the block.
    registry.begin_recovery(b"k1").await.unwrap();
    block(&registry).await;
    assert_eq!(registry.commit(b"k1").await.unwrap(), clean_hash().await);
}

#[tokio::test]
async fn test_startup_ignores_companion_files() {
    let fs = MemoryFilesystem::new();
    {
        let registry = open_registry(&fs).await;
        genesis(&registry).await;
    }
    fs.insert_file(path("base-wal"), vec![1, 2, 3]);
    fs.insert_file(path("base-shm"), vec![4]);

    let registry = open_registry(&fs).await;
    assert_eq!(registry.list().await.unwrap(), vec!["base".to_string()]);
    assert_eq!(base_ids(&registry).await, vec![1, 2]);
}

#[tokio::test]
async fn test_begin_cleans_up_after_failed_cancel() {
    let fs = MemoryFilesystem::new();
    let registry = open_registry(&fs).await;
    genesis(&registry).await;

    registry.begin(b"k1").await.unwrap();
    registry.delete("base").await.unwrap();

    fs.fail_renames_from(path("base.deleted"));
    assert!(registry.cancel().await.is_err());
    assert!(!registry.in_session().await);
    fs.clear_failures();

    registry.begin(b"k2").await.unwrap();
    assert_eq!(files(&fs), vec!["base".to_string()]);
    assert_eq!(base_ids(&registry).await, vec![1, 2]);
    registry.cancel().await.unwrap();
}
