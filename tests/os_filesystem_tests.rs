/// Registry over real files
///
/// Run with: cargo test --test os_filesystem_tests

mod common;

use common::ints;
use datasetdb::{FilePoolOpener, OsFilesystem, Registry, RegistryOptions, IDEMPOTENCY_KEY};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn open(dir: &Path) -> Registry {
    let fs = Arc::new(OsFilesystem::new());
    let opener = Arc::new(FilePoolOpener::new(fs.clone()));
    Registry::new(opener, dir, RegistryOptions::new().filesystem(fs))
        .await
        .unwrap()
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_commit_survives_restart() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("registry");

    let hash = {
        let registry = open(&dir).await;
        registry.begin(b"k1").await.unwrap();
        registry.create("ledger").await.unwrap();
        registry
            .execute(
                "ledger",
                "CREATE TABLE entries (id INTEGER PRIMARY KEY, memo TEXT NOT NULL)",
                &[],
            )
            .await
            .unwrap();
        registry
            .execute("ledger", "INSERT INTO entries VALUES (1, 'a'), (2, 'b')", &[])
            .await
            .unwrap();
        let hash = registry.commit(b"k1").await.unwrap();
        registry.close().await.unwrap();
        hash
    };
    assert_eq!(hash.len(), 32);
    assert_eq!(names(&dir), vec!["ledger".to_string()]);

    let registry = open(&dir).await;
    let result = registry
        .query("ledger", "SELECT id FROM entries ORDER BY id DESC", &[])
        .await
        .unwrap();
    assert_eq!(ints(&result, "id"), vec![2, 1]);
    assert_eq!(
        registry.get("ledger", IDEMPOTENCY_KEY, false).await.unwrap(),
        Some(b"k1".to_vec())
    );

    // Replaying the block after a restart changes nothing.
    registry.begin_recovery(b"k1").await.unwrap();
    registry.create("ledger").await.unwrap();
    registry
        .execute("ledger", "INSERT INTO entries VALUES (3, 'c')", &[])
        .await
        .unwrap();
    assert_eq!(registry.commit(b"k1").await.unwrap(), hash);
    let result = registry.query("ledger", "SELECT id FROM entries", &[]).await.unwrap();
    assert_eq!(result.row_count(), 2);
}

#[tokio::test]
async fn test_startup_rolls_back_suffixed_files() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().to_path_buf();

    {
        let registry = open(&dir).await;
        registry.begin(b"k1").await.unwrap();
        registry.create("keep").await.unwrap();
        registry.set("keep", b"color", b"blue").await.unwrap();
        registry.commit(b"k1").await.unwrap();

        registry.begin(b"k2").await.unwrap();
        registry.delete("keep").await.unwrap();
        registry.create("fresh").await.unwrap();
        // Dropped without commit or cancel.
    }
    assert_eq!(names(&dir), vec!["fresh.new".to_string(), "keep.deleted".to_string()]);

    let registry = open(&dir).await;
    assert_eq!(names(&dir), vec!["keep".to_string()]);
    assert_eq!(registry.list().await.unwrap(), vec!["keep".to_string()]);
    assert_eq!(
        registry.get("keep", b"color", false).await.unwrap(),
        Some(b"blue".to_vec())
    );
}

#[tokio::test]
async fn test_constraint_violation_leaves_session_usable() {
    let temp = TempDir::new().unwrap();
    let registry = open(temp.path()).await;

    registry.begin(b"k1").await.unwrap();
    registry.create("db").await.unwrap();
    registry
        .execute("db", "CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
        .await
        .unwrap();
    registry.execute("db", "INSERT INTO t VALUES (1)", &[]).await.unwrap();
    assert!(registry.execute("db", "INSERT INTO t VALUES (1)", &[]).await.is_err());
    registry.execute("db", "INSERT INTO t VALUES (2)", &[]).await.unwrap();
    registry.commit(b"k1").await.unwrap();

    let result = registry.query("db", "SELECT id FROM t ORDER BY id", &[]).await.unwrap();
    assert_eq!(ints(&result, "id"), vec![1, 2]);
}
