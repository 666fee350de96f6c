//! OptimisticEngine - optimistic transactional in-memory engine
//!
//! Transactions never block. Each key a transaction reads or writes records
//! the version it observed; commit validates those versions under the commit
//! lock and either installs the buffered writes or reports a conflict.
//! Deletes leave a versioned tombstone, so a key never returns to a version
//! a transaction may already have observed.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use ycsb_common::error::{DbError, DbResult};
use ycsb_common::types::{merge_fields, project, KvPair, Record};

use crate::engine::{table_key, StorageEngine, TableKey};

/// Version of a key that was never written
const ABSENT: u64 = 0;

#[derive(Debug)]
struct Versioned {
    version: u64,
    /// `None` marks a deleted key
    record: Option<Record>,
}

type Table = SkipMap<String, Arc<Versioned>>;

/// Transaction handle of [`OptimisticEngine`]
#[derive(Debug, Default)]
pub struct OptimisticTxn {
    /// First version observed per key
    observed: HashMap<TableKey, u64>,
    /// Pending writes; `None` deletes the key
    writes: HashMap<TableKey, Option<Record>>,
}

impl OptimisticTxn {
    fn observe(&mut self, tk: &TableKey, version: u64) {
        if let Entry::Vacant(slot) = self.observed.entry(tk.clone()) {
            slot.insert(version);
        }
    }
}

/// Transactional engine with commit-time validation
#[derive(Default)]
pub struct OptimisticEngine {
    tables: DashMap<String, Arc<Table>>,
    commit_lock: Mutex<()>,
    clock: AtomicU64,
}

impl OptimisticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, name: &str) -> Arc<Table> {
        if let Some(table) = self.tables.get(name) {
            return Arc::clone(&table);
        }
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SkipMap::new()))
            .clone()
    }

    fn committed(&self, tk: &TableKey) -> Option<Arc<Versioned>> {
        self.table(&tk.0)
            .get(&tk.1)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Latest value of a key as seen by `txn`, observing its version
    fn current(&self, txn: &mut OptimisticTxn, tk: &TableKey) -> Option<Record> {
        if let Some(pending) = txn.writes.get(tk) {
            return pending.clone();
        }
        let committed = self.committed(tk);
        txn.observe(tk, committed.as_ref().map_or(ABSENT, |v| v.version));
        committed.and_then(|v| v.record.clone())
    }

    fn touch(&self, txn: &mut OptimisticTxn, tk: &TableKey) {
        if !txn.observed.contains_key(tk) {
            let version = self.committed(tk).map_or(ABSENT, |v| v.version);
            txn.observe(tk, version);
        }
    }
}

fn require(txn: Option<&mut OptimisticTxn>) -> DbResult<&mut OptimisticTxn> {
    txn.ok_or(DbError::NotSupported("optimistic engine requires a transaction"))
}

impl StorageEngine for OptimisticEngine {
    type Txn = OptimisticTxn;

    fn name(&self) -> &'static str {
        "optimistic"
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn begin(&self) -> DbResult<Option<OptimisticTxn>> {
        Ok(Some(OptimisticTxn::default()))
    }

    fn commit(&self, txn: OptimisticTxn, aborted: bool) -> DbResult<()> {
        if aborted {
            return Err(DbError::Conflict("attempt aborted".into()));
        }
        if txn.writes.is_empty() && txn.observed.is_empty() {
            return Ok(());
        }

        let _guard = self.commit_lock.lock();
        for (tk, seen) in &txn.observed {
            let now = self.committed(tk).map_or(ABSENT, |v| v.version);
            if now != *seen {
                debug!("validation failed on {}/{}: saw v{} now v{}", tk.0, tk.1, seen, now);
                return Err(DbError::Conflict(format!(
                    "{}/{} changed since it was read",
                    tk.0, tk.1
                )));
            }
        }

        let version = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        for ((table, key), record) in txn.writes {
            self.table(&table)
                .insert(key, Arc::new(Versioned { version, record }));
        }
        Ok(())
    }

    fn read(
        &self,
        txn: Option<&mut OptimisticTxn>,
        table: &str,
        key: &str,
        fields: Option<&[String]>,
    ) -> DbResult<Option<Record>> {
        let txn = require(txn)?;
        let tk = table_key(table, key);
        Ok(self.current(txn, &tk).map(|record| project(&record, fields)))
    }

    fn scan(
        &self,
        txn: Option<&mut OptimisticTxn>,
        table: &str,
        start_key: &str,
        len: usize,
        fields: Option<&[String]>,
    ) -> DbResult<Vec<Record>> {
        let txn = require(txn)?;
        let rows = self
            .table(table)
            .range(start_key.to_string()..)
            .filter_map(|entry| {
                let versioned = entry.value();
                txn.observe(&table_key(table, entry.key()), versioned.version);
                versioned.record.as_ref().map(|record| project(record, fields))
            })
            .take(len)
            .collect();
        Ok(rows)
    }

    fn update(
        &self,
        txn: Option<&mut OptimisticTxn>,
        table: &str,
        key: &str,
        values: &[KvPair],
    ) -> DbResult<()> {
        let txn = require(txn)?;
        let tk = table_key(table, key);
        let mut record = self.current(txn, &tk).unwrap_or_default();
        merge_fields(&mut record, values);
        txn.writes.insert(tk, Some(record));
        Ok(())
    }

    fn insert(
        &self,
        txn: Option<&mut OptimisticTxn>,
        table: &str,
        key: &str,
        values: &[KvPair],
    ) -> DbResult<()> {
        let txn = require(txn)?;
        let tk = table_key(table, key);
        self.touch(txn, &tk);
        txn.writes.insert(tk, Some(values.to_vec()));
        Ok(())
    }

    fn delete(&self, txn: Option<&mut OptimisticTxn>, table: &str, key: &str) -> DbResult<()> {
        let txn = require(txn)?;
        let tk = table_key(table, key);
        self.touch(txn, &tk);
        txn.writes.insert(tk, None);
        Ok(())
    }
}
