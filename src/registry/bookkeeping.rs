//! Commit bookkeeping stored inside each dataset.
//!
//! Every dataset records, in its own key/value namespace, the idempotency key
//! of the last commit it took part in and the app hash it contributed. A
//! dataset carrying key `K` has finished its part of commit `K`, whatever
//! happened to the rest of the registry.

use crate::core::Result;
use crate::storage::pool::Pool;
use sha2::{Digest, Sha256};

pub const IDEMPOTENCY_KEY: &[u8] = b"idempotency_key";
pub const APP_HASH_KEY: &[u8] = b"app_hash";

pub fn is_reserved(key: &[u8]) -> bool {
    key == IDEMPOTENCY_KEY || key == APP_HASH_KEY
}

/// Idempotency key last recorded by the dataset (writer view when `sync`).
pub async fn stored_idempotency_key(pool: &dyn Pool, sync: bool) -> Result<Option<Vec<u8>>> {
    pool.get(IDEMPOTENCY_KEY, sync).await
}

pub async fn stored_app_hash(pool: &dyn Pool, sync: bool) -> Result<Option<Vec<u8>>> {
    pool.get(APP_HASH_KEY, sync).await
}

/// True when the dataset already finished its part of the commit keyed by `key`.
pub async fn already_applied(pool: &dyn Pool, key: &[u8], sync: bool) -> Result<bool> {
    Ok(stored_idempotency_key(pool, sync).await?.as_deref() == Some(key))
}

/// Write the app hash and idempotency key into the dataset.
pub async fn record(pool: &dyn Pool, key: &[u8], app_hash: &[u8]) -> Result<()> {
    pool.set(APP_HASH_KEY, app_hash).await?;
    pool.set(IDEMPOTENCY_KEY, key).await
}

/// SHA-256 over the app hashes of the contributing datasets, in ascending
/// dbid order.
pub fn aggregate_hash<'a, I>(hashes: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut ordered: Vec<(&str, &[u8])> = hashes.into_iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (_, hash) in ordered {
        hasher.update(hash);
    }
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_keys() {
        assert!(is_reserved(b"idempotency_key"));
        assert!(is_reserved(b"app_hash"));
        assert!(!is_reserved(b"app_hash2"));
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let a = aggregate_hash([("db1", &b"h1"[..]), ("db2", &b"h2"[..])]);
        let b = aggregate_hash([("db2", &b"h2"[..]), ("db1", &b"h1"[..])]);
        assert_eq!(a, b);

        let swapped = aggregate_hash([("db1", &b"h2"[..]), ("db2", &b"h1"[..])]);
        assert_ne!(a, swapped);
    }

    #[test]
    fn test_aggregate_of_nothing_is_empty_digest() {
        let empty: [(&str, &[u8]); 0] = [];
        assert_eq!(aggregate_hash(empty), Sha256::digest(b"").to_vec());
    }
}
