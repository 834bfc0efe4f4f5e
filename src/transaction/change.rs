// ============================================================================
// Row-level change records
// ============================================================================
//
// A Changeset is the net effect of a writer's work on one dataset since a
// change-tracking session began. Intermediate states are not recorded: a
// row inserted and then deleted in the same session leaves no trace.
//
// ============================================================================

use crate::core::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChangeType {
    Create = 0,
    Update = 1,
    Delete = 2,
}

/// Change to one record. `values` holds the full new row for creates and
/// updates and is empty for deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordChange {
    pub change_type: ChangeType,
    pub values: Vec<Value>,
}

impl RecordChange {
    pub fn create(values: Vec<Value>) -> Self {
        Self {
            change_type: ChangeType::Create,
            values,
        }
    }

    pub fn update(values: Vec<Value>) -> Self {
        Self {
            change_type: ChangeType::Update,
            values,
        }
    }

    pub fn delete() -> Self {
        Self {
            change_type: ChangeType::Delete,
            values: Vec::new(),
        }
    }
}

/// What happened to a table's definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchemaChange {
    Unchanged = 0,
    Created = 1,
    Dropped = 2,
    /// Dropped and created again with a different definition.
    Recreated = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableChangeset {
    pub schema_change: SchemaChange,
    pub column_names: Vec<String>,
    /// Keyed by the encoded primary key, so iteration order is the hash order.
    pub records: BTreeMap<Vec<u8>, RecordChange>,
}

impl TableChangeset {
    pub fn new(schema_change: SchemaChange, column_names: Vec<String>) -> Self {
        Self {
            schema_change,
            column_names,
            records: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.schema_change == SchemaChange::Unchanged && self.records.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    pub tables: BTreeMap<String, TableChangeset>,
    pub kv: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.kv.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.tables.values().map(|t| t.records.len()).sum()
    }
}
