//! Uniform adapter contract the benchmark client drives
//!
//! Every backend exposes the five record operations. Transactional backends
//! additionally hand out an owned transaction handle from [`StorageEngine::begin`]
//! that is consumed again by [`StorageEngine::commit`].

use ycsb_common::error::{DbError, DbResult};
use ycsb_common::types::{KvPair, Record};

/// Transaction handle of engines without transactions; it cannot be created
#[derive(Debug)]
pub enum NoTransaction {}

/// A key-value storage engine as seen by the benchmark client
pub trait StorageEngine: Send + Sync {
    /// Owned per-attempt transaction context
    type Txn: Send;

    /// Short engine name for logs and reports
    fn name(&self) -> &'static str;

    /// Capability flag: whether [`begin`](Self::begin) returns a handle
    fn supports_transactions(&self) -> bool {
        false
    }

    /// Open a transaction attempt; `None` for non-transactional engines
    fn begin(&self) -> DbResult<Option<Self::Txn>> {
        Ok(None)
    }

    /// Finish a transaction attempt, consuming the handle
    ///
    /// When `aborted` is set the attempt's effects are discarded and the call
    /// reports [`DbError::Conflict`]. A commit may also report a conflict the
    /// client could not observe mid-transaction.
    fn commit(&self, txn: Self::Txn, aborted: bool) -> DbResult<()> {
        let _ = (txn, aborted);
        Err(DbError::NotSupported("commit"))
    }

    /// Read one record, projected to `fields` when given
    fn read(
        &self,
        txn: Option<&mut Self::Txn>,
        table: &str,
        key: &str,
        fields: Option<&[String]>,
    ) -> DbResult<Option<Record>>;

    /// Read up to `len` records in key order starting at `start_key`
    fn scan(
        &self,
        txn: Option<&mut Self::Txn>,
        table: &str,
        start_key: &str,
        len: usize,
        fields: Option<&[String]>,
    ) -> DbResult<Vec<Record>>;

    /// Overwrite the given fields, creating the record when absent
    fn update(
        &self,
        txn: Option<&mut Self::Txn>,
        table: &str,
        key: &str,
        values: &[KvPair],
    ) -> DbResult<()>;

    /// Store a full record
    fn insert(
        &self,
        txn: Option<&mut Self::Txn>,
        table: &str,
        key: &str,
        values: &[KvPair],
    ) -> DbResult<()>;

    fn delete(&self, txn: Option<&mut Self::Txn>, table: &str, key: &str) -> DbResult<()>;

    /// Flush and release engine resources at the end of a run
    fn close(&self) -> DbResult<()> {
        Ok(())
    }
}

/// Shared composite key of transactional engines
pub(crate) type TableKey = (String, String);

pub(crate) fn table_key(table: &str, key: &str) -> TableKey {
    (table.to_string(), key.to_string())
}
