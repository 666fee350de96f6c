//! MemoryEngine - non-transactional in-memory engine
//!
//! One lock-free skip list per table; each record sits behind its own mutex
//! so concurrent field updates to one key merge instead of clobbering.

use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use parking_lot::Mutex;

use ycsb_common::error::DbResult;
use ycsb_common::types::{merge_fields, project, KvPair, Record};

use crate::engine::{NoTransaction, StorageEngine};

type Table = SkipMap<String, Mutex<Record>>;

/// Non-transactional engine backed by skip lists
#[derive(Default)]
pub struct MemoryEngine {
    tables: DashMap<String, Arc<Table>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the skip list of a table
    fn table(&self, name: &str) -> Arc<Table> {
        if let Some(table) = self.tables.get(name) {
            return Arc::clone(&table);
        }
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SkipMap::new()))
            .clone()
    }

    /// Number of records stored in a table
    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.len())
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

impl StorageEngine for MemoryEngine {
    type Txn = NoTransaction;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn read(
        &self,
        _txn: Option<&mut NoTransaction>,
        table: &str,
        key: &str,
        fields: Option<&[String]>,
    ) -> DbResult<Option<Record>> {
        let table = self.table(table);
        Ok(table
            .get(key)
            .map(|entry| project(&entry.value().lock(), fields)))
    }

    fn scan(
        &self,
        _txn: Option<&mut NoTransaction>,
        table: &str,
        start_key: &str,
        len: usize,
        fields: Option<&[String]>,
    ) -> DbResult<Vec<Record>> {
        let table = self.table(table);
        Ok(table
            .range(start_key.to_string()..)
            .take(len)
            .map(|entry| project(&entry.value().lock(), fields))
            .collect())
    }

    fn update(
        &self,
        _txn: Option<&mut NoTransaction>,
        table: &str,
        key: &str,
        values: &[KvPair],
    ) -> DbResult<()> {
        let table = self.table(table);
        let entry = table.get_or_insert_with(key.to_string(), || Mutex::new(Vec::new()));
        merge_fields(&mut entry.value().lock(), values);
        Ok(())
    }

    fn insert(
        &self,
        _txn: Option<&mut NoTransaction>,
        table: &str,
        key: &str,
        values: &[KvPair],
    ) -> DbResult<()> {
        self.table(table)
            .insert(key.to_string(), Mutex::new(values.to_vec()));
        Ok(())
    }

    fn delete(&self, _txn: Option<&mut NoTransaction>, table: &str, key: &str) -> DbResult<()> {
        self.table(table).remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: &str) -> Vec<KvPair> {
        vec![KvPair::new("field0", value), KvPair::new("field1", value)]
    }

    #[test]
    fn test_memory_crud() {
        let engine = MemoryEngine::new();
        assert!(!engine.supports_transactions());
        assert!(engine.begin().unwrap().is_none());

        engine.insert(None, "t", "user1", &record("a")).unwrap();
        assert_eq!(engine.read(None, "t", "user1", None).unwrap(), Some(record("a")));
        assert_eq!(engine.read(None, "t", "user2", None).unwrap(), None);

        engine
            .update(None, "t", "user1", &[KvPair::new("field1", "b")])
            .unwrap();
        let fields = vec!["field1".to_string()];
        assert_eq!(
            engine.read(None, "t", "user1", Some(&fields)).unwrap(),
            Some(vec![KvPair::new("field1", "b")])
        );

        engine.delete(None, "t", "user1").unwrap();
        assert!(engine.is_empty("t"));
    }

    #[test]
    fn test_memory_scan_in_key_order() {
        let engine = MemoryEngine::new();
        for key in ["user3", "user1", "user2", "user5"] {
            engine.insert(None, "t", key, &record(key)).unwrap();
        }

        let rows = engine.scan(None, "t", "user2", 2, None).unwrap();
        assert_eq!(rows, vec![record("user2"), record("user3")]);

        let rows = engine.scan(None, "t", "user4", 10, None).unwrap();
        assert_eq!(rows, vec![record("user5")]);
    }

    #[test]
    fn test_memory_tables_are_separate() {
        let engine = MemoryEngine::new();
        engine.insert(None, "a", "k", &record("x")).unwrap();
        assert_eq!(engine.read(None, "b", "k", None).unwrap(), None);
        assert_eq!(engine.len("a"), 1);
    }
}
