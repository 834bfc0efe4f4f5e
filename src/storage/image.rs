//! In-memory image of one dataset: its tables and its key/value namespace.
//!
//! Images are built on `im` persistent maps, so cloning one to take a
//! savepoint or a change-tracking baseline is O(1).

use crate::core::{Column, DbError, Result, Row, Schema, Value};
use im::OrdMap;
use serde::{Deserialize, Serialize};

/// Primary key values of a row (or the implicit rowid).
pub type RowKey = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    name: String,
    schema: Schema,
    rows: OrdMap<RowKey, Row>,
    next_rowid: i64,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            rows: OrdMap::new(),
            next_rowid: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&RowKey, &Row)> {
        self.rows.iter()
    }

    pub fn get(&self, key: &RowKey) -> Option<&Row> {
        self.rows.get(key)
    }

    fn has_declared_key(&self) -> bool {
        self.schema.columns().iter().any(|c| c.primary_key)
    }

    fn key_of(&self, row: &Row) -> RowKey {
        self.schema
            .primary_key_indexes()
            .into_iter()
            .map(|i| row[i].clone())
            .collect()
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.schema.column_count() {
            return Err(DbError::ExecutionError(format!(
                "Table '{}' has {} columns, got {} values",
                self.name,
                self.schema.column_count(),
                row.len()
            )));
        }
        self.schema
            .columns()
            .iter()
            .zip(row.iter())
            .try_for_each(|(col, value)| col.validate(value))
    }

    pub fn insert(&mut self, row: Row) -> Result<RowKey> {
        self.validate_row(&row)?;
        let key = if self.has_declared_key() {
            self.key_of(&row)
        } else {
            let rowid = self.next_rowid;
            self.next_rowid += 1;
            vec![Value::Integer(rowid)]
        };
        if self.rows.contains_key(&key) {
            return Err(DbError::ConstraintViolation(format!(
                "Duplicate primary key in table '{}': {}",
                self.name,
                format_key(&key)
            )));
        }
        self.rows.insert(key.clone(), row);
        Ok(key)
    }

    /// Replace the row stored under `key`, moving it if its primary key changed.
    pub fn update(&mut self, key: &RowKey, row: Row) -> Result<RowKey> {
        self.validate_row(&row)?;
        let new_key = if self.has_declared_key() {
            self.key_of(&row)
        } else {
            key.clone()
        };
        if &new_key != key && self.rows.contains_key(&new_key) {
            return Err(DbError::ConstraintViolation(format!(
                "Duplicate primary key in table '{}': {}",
                self.name,
                format_key(&new_key)
            )));
        }
        if self.rows.remove(key).is_none() {
            return Err(DbError::ExecutionError(format!(
                "Row {} vanished from table '{}'",
                format_key(key),
                self.name
            )));
        }
        self.rows.insert(new_key.clone(), row);
        Ok(new_key)
    }

    pub fn delete(&mut self, key: &RowKey) -> bool {
        self.rows.remove(key).is_some()
    }
}

fn format_key(key: &RowKey) -> String {
    key.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetImage {
    tables: OrdMap<String, Table>,
    kv: OrdMap<Vec<u8>, Vec<u8>>,
}

impl DatasetImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> &OrdMap<String, Table> {
        &self.tables
    }

    pub fn kv(&self) -> &OrdMap<Vec<u8>, Vec<u8>> {
        &self.kv
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn create_table(&mut self, name: &str, columns: Vec<Column>) -> Result<()> {
        if self.has_table(name) {
            return Err(DbError::TableExists(name.to_string()));
        }
        self.tables
            .insert(name.to_string(), Table::new(name, Schema::new(columns)));
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<Table> {
        self.tables
            .remove(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.kv.insert(key.to_vec(), value.to_vec());
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.kv.get(key).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(|t| t.row_count()).sum()
    }
}
