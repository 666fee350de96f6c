//! Common type definitions for ycsb-rs

use std::fmt;

use serde::{Deserialize, Serialize};

/// A record is an ordered list of field/value pairs
pub type Record = Vec<KvPair>;

// ============================================================================
// Operation Types
// ============================================================================

/// Operation kinds a workload can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Read,
    Update,
    Scan,
    ReadModifyWrite,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Scan => "scan",
            Operation::ReadModifyWrite => "read_modify_write",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Record Types
// ============================================================================

/// A single field of a record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KvPair {
    pub field: String,
    pub value: String,
}

impl KvPair {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Keep only the requested fields of a record, in record order
pub fn project(record: &[KvPair], fields: Option<&[String]>) -> Record {
    match fields {
        None => record.to_vec(),
        Some(fields) => record
            .iter()
            .filter(|pair| fields.iter().any(|f| *f == pair.field))
            .cloned()
            .collect(),
    }
}

/// Overwrite matching fields of `record` with `values`, appending new ones
pub fn merge_fields(record: &mut Record, values: &[KvPair]) {
    for pair in values {
        match record.iter_mut().find(|existing| existing.field == pair.field) {
            Some(existing) => existing.value.clone_from(&pair.value),
            None => record.push(pair.clone()),
        }
    }
}
