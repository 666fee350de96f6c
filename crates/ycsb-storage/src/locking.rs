//! LockingEngine - pessimistic transactional in-memory engine
//!
//! Every key a transaction touches is locked exclusively on first access.
//! A key held by another transaction is reported as a conflict at once (a
//! lock timeout of zero). Writes are buffered in the handle and applied at
//! commit while the locks are still held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use ycsb_common::error::{DbError, DbResult};
use ycsb_common::types::{merge_fields, project, KvPair, Record};

use crate::engine::{table_key, StorageEngine, TableKey};

type Table = SkipMap<String, Record>;

/// Transaction handle of [`LockingEngine`]
#[derive(Debug)]
pub struct LockingTxn {
    id: u64,
    held: Vec<TableKey>,
    /// Pending writes; `None` deletes the key
    writes: HashMap<TableKey, Option<Record>>,
}

impl LockingTxn {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Transactional engine with per-key exclusive locks
#[derive(Default)]
pub struct LockingEngine {
    tables: DashMap<String, Arc<Table>>,
    locks: DashMap<TableKey, u64>,
    next_txn: AtomicU64,
}

impl LockingEngine {
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

    /// Number of keys currently locked by open transactions
    pub fn locked_keys(&self) -> usize {
        self.locks.len()
    }

    fn lock(&self, txn: &mut LockingTxn, table: &str, key: &str) -> DbResult<TableKey> {
        let tk = table_key(table, key);
        match self.locks.entry(tk.clone()) {
            Entry::Occupied(holder) if *holder.get() == txn.id => {}
            Entry::Occupied(holder) => {
                debug!("txn {} blocked on {}/{} held by txn {}", txn.id, table, key, holder.get());
                return Err(DbError::Conflict(format!(
                    "{}/{} locked by txn {}",
                    table,
                    key,
                    holder.get()
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(txn.id);
                txn.held.push(tk.clone());
            }
        }
        Ok(tk)
    }

    /// Latest value of a key as seen by `txn`
    fn current(&self, txn: &LockingTxn, tk: &TableKey) -> Option<Record> {
        match txn.writes.get(tk) {
            Some(pending) => pending.clone(),
            None => self
                .table(&tk.0)
                .get(&tk.1)
                .map(|entry| entry.value().clone()),
        }
    }

    fn release(&self, txn: &LockingTxn) {
        for tk in &txn.held {
            self.locks.remove_if(tk, |_, holder| *holder == txn.id);
        }
    }
}

fn require(txn: Option<&mut LockingTxn>) -> DbResult<&mut LockingTxn> {
    txn.ok_or(DbError::NotSupported("locking engine requires a transaction"))
}

impl StorageEngine for LockingEngine {
    type Txn = LockingTxn;

    fn name(&self) -> &'static str {
        "locking"
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn begin(&self) -> DbResult<Option<LockingTxn>> {
        Ok(Some(LockingTxn {
            id: self.next_txn.fetch_add(1, Ordering::Relaxed) + 1,
            held: Vec::new(),
            writes: HashMap::new(),
        }))
    }

    fn commit(&self, txn: LockingTxn, aborted: bool) -> DbResult<()> {
        if aborted {
            self.release(&txn);
            return Err(DbError::Conflict(format!("txn {} rolled back", txn.id)));
        }

        for ((table, key), pending) in &txn.writes {
            let table = self.table(table);
            match pending {
                Some(record) => {
                    table.insert(key.clone(), record.clone());
                }
                None => {
                    table.remove(key);
                }
            }
        }
        self.release(&txn);
        Ok(())
    }

    fn read(
        &self,
        txn: Option<&mut LockingTxn>,
        table: &str,
        key: &str,
        fields: Option<&[String]>,
    ) -> DbResult<Option<Record>> {
        let txn = require(txn)?;
        let tk = self.lock(txn, table, key)?;
        Ok(self.current(txn, &tk).map(|record| project(&record, fields)))
    }

    // Range reads see committed data and take no locks.
    fn scan(
        &self,
        txn: Option<&mut LockingTxn>,
        table: &str,
        start_key: &str,
        len: usize,
        fields: Option<&[String]>,
    ) -> DbResult<Vec<Record>> {
        require(txn)?;
        Ok(self
            .table(table)
            .range(start_key.to_string()..)
            .take(len)
            .map(|entry| project(entry.value(), fields))
            .collect())
    }

    fn update(
        &self,
        txn: Option<&mut LockingTxn>,
        table: &str,
        key: &str,
        values: &[KvPair],
    ) -> DbResult<()> {
        let txn = require(txn)?;
        let tk = self.lock(txn, table, key)?;
        let mut record = self.current(txn, &tk).unwrap_or_default();
        merge_fields(&mut record, values);
        txn.writes.insert(tk, Some(record));
        Ok(())
    }

    fn insert(
        &self,
        txn: Option<&mut LockingTxn>,
        table: &str,
        key: &str,
        values: &[KvPair],
    ) -> DbResult<()> {
        let txn = require(txn)?;
        let tk = self.lock(txn, table, key)?;
        txn.writes.insert(tk, Some(values.to_vec()));
        Ok(())
    }

    fn delete(&self, txn: Option<&mut LockingTxn>, table: &str, key: &str) -> DbResult<()> {
        let txn = require(txn)?;
        let tk = self.lock(txn, table, key)?;
        txn.writes.insert(tk, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(v: &str) -> Vec<KvPair> {
        vec![KvPair::new("field0", v)]
    }

    fn begin(engine: &LockingEngine) -> LockingTxn {
        engine.begin().unwrap().unwrap()
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let engine = LockingEngine::new();
        let mut txn = begin(&engine);
        engine.insert(Some(&mut txn), "t", "k1", &values("a")).unwrap();

        // own writes are visible before commit
        assert_eq!(
            engine.read(Some(&mut txn), "t", "k1", None).unwrap(),
            Some(values("a"))
        );
        engine.commit(txn, false).unwrap();
        assert_eq!(engine.locked_keys(), 0);

        let mut txn = begin(&engine);
        assert_eq!(
            engine.read(Some(&mut txn), "t", "k1", None).unwrap(),
            Some(values("a"))
        );
        engine.commit(txn, false).unwrap();
    }

    #[test]
    fn test_lock_conflict_is_immediate() {
        let engine = LockingEngine::new();
        let mut first = begin(&engine);
        let mut second = begin(&engine);

        engine.update(Some(&mut first), "t", "k1", &values("a")).unwrap();
        let err = engine
            .read(Some(&mut second), "t", "k1", None)
            .unwrap_err();
        assert!(err.is_conflict());

        engine.commit(first, false).unwrap();
        // the loser still has to finish its attempt
        assert!(engine.commit(second, true).unwrap_err().is_conflict());
        assert_eq!(engine.locked_keys(), 0);
    }

    #[test]
    fn test_aborted_commit_discards_writes() {
        let engine = LockingEngine::new();
        let mut txn = begin(&engine);
        engine.insert(Some(&mut txn), "t", "k1", &values("a")).unwrap();
        assert!(engine.commit(txn, true).unwrap_err().is_conflict());

        let mut txn = begin(&engine);
        assert_eq!(engine.read(Some(&mut txn), "t", "k1", None).unwrap(), None);
        engine.commit(txn, false).unwrap();
    }

    #[test]
    fn test_requires_transaction() {
        let engine = LockingEngine::new();
        assert!(matches!(
            engine.read(None, "t", "k", None),
            Err(DbError::NotSupported(_))
        ));
    }

    #[test]
    fn test_delete_and_scan() {
        let engine = LockingEngine::new();
        let mut txn = begin(&engine);
        for key in ["k1", "k2", "k3"] {
            engine.insert(Some(&mut txn), "t", key, &values(key)).unwrap();
        }
        engine.commit(txn, false).unwrap();

        let mut txn = begin(&engine);
        engine.delete(Some(&mut txn), "t", "k2").unwrap();
        engine.commit(txn, false).unwrap();

        let mut txn = begin(&engine);
        let rows = engine.scan(Some(&mut txn), "t", "k1", 5, None).unwrap();
        assert_eq!(rows, vec![values("k1"), values("k3")]);
        engine.commit(txn, false).unwrap();
    }
}
