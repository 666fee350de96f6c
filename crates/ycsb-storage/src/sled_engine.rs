//! SledEngine - non-transactional persistent engine
//!
//! One sled tree per table; records are stored bincode-encoded.

use std::path::Path;

use tracing::info;

use ycsb_common::error::{DbError, DbResult};
use ycsb_common::types::{merge_fields, project, KvPair, Record};

use crate::engine::{NoTransaction, StorageEngine};

fn storage_err(e: impl std::fmt::Display) -> DbError {
    DbError::Storage(e.to_string())
}

fn decode(bytes: &[u8]) -> DbResult<Record> {
    bincode::deserialize(bytes).map_err(storage_err)
}

fn encode(record: &[KvPair]) -> DbResult<Vec<u8>> {
    bincode::serialize(record).map_err(storage_err)
}

/// Persistent engine backed by sled
pub struct SledEngine {
    db: sled::Db,
}

impl SledEngine {
    /// Open the database at `path`
    ///
    /// A fresh run (`preloaded == false`) refuses an existing database; a
    /// preloaded run refuses a missing one.
    pub fn open(path: &Path, preloaded: bool, cache_capacity_bytes: u64) -> DbResult<Self> {
        info!("Opening sled database at {:?}", path);

        if preloaded && !path.exists() {
            return Err(DbError::Storage(format!(
                "no preloaded database at {}",
                path.display()
            )));
        }

        let db = sled::Config::new()
            .path(path)
            .cache_capacity(cache_capacity_bytes)
            .open()
            .map_err(storage_err)?;

        if !preloaded && db.was_recovered() && db.tree_names().len() > 1 {
            return Err(DbError::Storage(format!(
                "database already exists at {}",
                path.display()
            )));
        }

        Ok(Self { db })
    }

    fn tree(&self, table: &str) -> DbResult<sled::Tree> {
        self.db.open_tree(table).map_err(storage_err)
    }
}

impl StorageEngine for SledEngine {
    type Txn = NoTransaction;

    fn name(&self) -> &'static str {
        "sled"
    }

    fn read(
        &self,
        _txn: Option<&mut NoTransaction>,
        table: &str,
        key: &str,
        fields: Option<&[String]>,
    ) -> DbResult<Option<Record>> {
        match self.tree(table)?.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(project(&decode(&bytes)?, fields))),
            None => Ok(None),
        }
    }

    fn scan(
        &self,
        _txn: Option<&mut NoTransaction>,
        table: &str,
        start_key: &str,
        len: usize,
        fields: Option<&[String]>,
    ) -> DbResult<Vec<Record>> {
        self.tree(table)?
            .range(start_key..)
            .take(len)
            .map(|item| {
                let (_, bytes) = item.map_err(storage_err)?;
                Ok(project(&decode(&bytes)?, fields))
            })
            .collect()
    }

    fn update(
        &self,
        _txn: Option<&mut NoTransaction>,
        table: &str,
        key: &str,
        values: &[KvPair],
    ) -> DbResult<()> {
        let mut failure = None;
        self.tree(table)?
            .fetch_and_update(key, |old| {
                let mut record = match old.map(decode).transpose() {
                    Ok(record) => record.unwrap_or_default(),
                    Err(e) => {
                        failure = Some(e);
                        return old.map(<[u8]>::to_vec);
                    }
                };
                merge_fields(&mut record, values);
                match encode(&record) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        failure = Some(e);
                        old.map(<[u8]>::to_vec)
                    }
                }
            })
            .map_err(storage_err)?;
        failure.map_or(Ok(()), Err)
    }

    fn insert(
        &self,
        _txn: Option<&mut NoTransaction>,
        table: &str,
        key: &str,
        values: &[KvPair],
    ) -> DbResult<()> {
        self.tree(table)?
            .insert(key, encode(values)?)
            .map_err(storage_err)?;
        Ok(())
    }

    fn delete(&self, _txn: Option<&mut NoTransaction>, table: &str, key: &str) -> DbResult<()> {
        self.tree(table)?.remove(key).map_err(storage_err)?;
        Ok(())
    }

    fn close(&self) -> DbResult<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}
