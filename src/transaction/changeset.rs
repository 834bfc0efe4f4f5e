//! Deterministic changesets.
//!
//! [`diff`] reduces two images of a dataset to the changes between them and
//! [`Changeset::id`] hashes those changes into an identifier that only depends
//! on what changed, never on the order the writes were issued in.

use super::change::{Changeset, RecordChange, SchemaChange, TableChangeset};
use crate::core::Value;
use crate::storage::image::{DatasetImage, Table};
use sha2::{Digest, Sha256};

/// Length-prefixed encoding of a primary key: for each value, 4 bytes of
/// little-endian length followed by its canonical bytes.
pub fn encode_key(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        let bytes = value.to_bytes();
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&bytes);
    }
    out
}

/// Net changes that turn `baseline` into `current`.
pub fn diff(baseline: &DatasetImage, current: &DatasetImage) -> Changeset {
    let mut changeset = Changeset::default();

    for (name, table) in current.tables() {
        match baseline.tables().get(name) {
            None => {
                let mut tc = TableChangeset::new(SchemaChange::Created, table.schema().column_names());
                for (key, row) in table.rows() {
                    tc.records.insert(encode_key(key), RecordChange::create(row.clone()));
                }
                changeset.tables.insert(name.clone(), tc);
            }
            Some(old) if old == table => {}
            Some(old) => {
                let schema_change = if old.schema() == table.schema() {
                    SchemaChange::Unchanged
                } else {
                    SchemaChange::Recreated
                };
                let tc = diff_rows(old, table, schema_change);
                if !tc.is_empty() {
                    changeset.tables.insert(name.clone(), tc);
                }
            }
        }
    }

    for (name, old) in baseline.tables() {
        if current.has_table(name) {
            continue;
        }
        let mut tc = TableChangeset::new(SchemaChange::Dropped, old.schema().column_names());
        for (key, _) in old.rows() {
            tc.records.insert(encode_key(key), RecordChange::delete());
        }
        changeset.tables.insert(name.clone(), tc);
    }

    for (key, value) in current.kv() {
        if baseline.kv().get(key) != Some(value) {
            changeset.kv.insert(key.clone(), value.clone());
        }
    }

    changeset
}

fn diff_rows(old: &Table, new: &Table, schema_change: SchemaChange) -> TableChangeset {
    let mut tc = TableChangeset::new(schema_change, new.schema().column_names());

    for (key, row) in new.rows() {
        match old.get(key) {
            None => {
                tc.records.insert(encode_key(key), RecordChange::create(row.clone()));
            }
            Some(prev) if prev != row => {
                tc.records.insert(encode_key(key), RecordChange::update(row.clone()));
            }
            Some(_) => {}
        }
    }
    for (key, _) in old.rows() {
        if new.get(key).is_none() {
            tc.records.insert(encode_key(key), RecordChange::delete());
        }
    }

    tc
}

fn write_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u32).to_le_bytes());
    hasher.update(bytes);
}

impl Changeset {
    /// SHA-256 over the changeset. Tables are visited by name, records by
    /// encoded primary key, key/value changes by key.
    pub fn id(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();

        hasher.update((self.tables.len() as u32).to_le_bytes());
        for (name, table) in &self.tables {
            write_bytes(&mut hasher, name.as_bytes());
            hasher.update([table.schema_change as u8]);
            hasher.update((table.column_names.len() as u32).to_le_bytes());
            for column in &table.column_names {
                write_bytes(&mut hasher, column.as_bytes());
            }

            hasher.update((table.records.len() as u32).to_le_bytes());
            for (key, record) in &table.records {
                write_bytes(&mut hasher, key);
                hasher.update([record.change_type as u8]);
                hasher.update((record.values.len() as u32).to_le_bytes());
                for value in &record.values {
                    hasher.update([value.tag()]);
                    write_bytes(&mut hasher, &value.to_bytes());
                }
            }
        }

        hasher.update((self.kv.len() as u32).to_le_bytes());
        for (key, value) in &self.kv {
            write_bytes(&mut hasher, key);
            write_bytes(&mut hasher, value);
        }

        hasher.finalize().to_vec()
    }
}
