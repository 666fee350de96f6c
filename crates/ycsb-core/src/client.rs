//! Transactional benchmark client
//!
//! One client per worker thread. A logical transaction runs a number of
//! workload operations inside one engine transaction and is retried until
//! it commits. The first attempt records every operation; later attempts
//! replay the recorded log, so all attempts issue identical operations.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use ycsb_common::error::{DbError, DbResult, Error, Result};
use ycsb_common::metrics::ClientMetrics;
use ycsb_common::types::{KvPair, Operation};
use ycsb_storage::StorageEngine;

use crate::reporting::{LatencyTables, RunningTimes, ThreadLog};
use crate::transaction::{OperationLog, TransactionOperation};
use crate::workload::Workload;

/// Client settings
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientOptions {
    /// Retries allowed per logical transaction; unbounded when `None`
    pub max_retries: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    Conflict,
}

fn outcome(result: DbResult<()>) -> Result<Outcome> {
    match result {
        Ok(()) => Ok(Outcome::Done),
        Err(DbError::Conflict(reason)) => {
            debug!("Operation conflicted: {}", reason);
            Ok(Outcome::Conflict)
        }
        Err(e) => Err(e.into()),
    }
}

fn elapsed_ns(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX >> 1)
}

/// Issues operations against the engine and times every successful call
struct Executor<'e, E> {
    engine: &'e E,
    tables: LatencyTables,
}

impl<'e, E: StorageEngine> Executor<'e, E> {
    fn execute(
        &self,
        mut txn: Option<&mut E::Txn>,
        op: &TransactionOperation,
    ) -> Result<Outcome> {
        match op.op {
            Operation::Read => self.read(txn, op),
            Operation::Update => self.update(txn, op),
            Operation::Insert => self.insert(txn, &op.table, &op.key, &op.values),
            Operation::Scan => self.scan(txn, op),
            Operation::ReadModifyWrite => match self.read(txn.as_deref_mut(), op)? {
                Outcome::Done => self.update(txn, op),
                Outcome::Conflict => Ok(Outcome::Conflict),
            },
            Operation::Delete => Err(Error::UnrecognizedOperation(op.op)),
        }
    }

    fn read(&self, txn: Option<&mut E::Txn>, op: &TransactionOperation) -> Result<Outcome> {
        let start = Instant::now();
        let result = self
            .engine
            .read(txn, &op.table, &op.key, op.fields.as_deref());
        let elapsed = elapsed_ns(start);
        outcome(result.map(|found| {
            if found.is_some() {
                self.tables.pos_query.record(elapsed);
            } else {
                self.tables.neg_query.record(elapsed);
            }
        }))
    }

    fn scan(&self, txn: Option<&mut E::Txn>, op: &TransactionOperation) -> Result<Outcome> {
        let start = Instant::now();
        let result = self
            .engine
            .scan(txn, &op.table, &op.key, op.len, op.fields.as_deref());
        let elapsed = elapsed_ns(start);
        outcome(result.map(|_| self.tables.scan.record(elapsed)))
    }

    fn update(&self, txn: Option<&mut E::Txn>, op: &TransactionOperation) -> Result<Outcome> {
        let start = Instant::now();
        let result = self.engine.update(txn, &op.table, &op.key, &op.values);
        let elapsed = elapsed_ns(start);
        outcome(result.map(|()| self.tables.update.record(elapsed)))
    }

    fn insert(
        &self,
        txn: Option<&mut E::Txn>,
        table: &str,
        key: &str,
        values: &[KvPair],
    ) -> Result<Outcome> {
        let start = Instant::now();
        let result = self.engine.insert(txn, table, key, values);
        let elapsed = elapsed_ns(start);
        outcome(result.map(|()| self.tables.insert.record(elapsed)))
    }
}

fn read_fields<W: Workload>(workload: &mut W) -> Option<Vec<String>> {
    if workload.read_all_fields() {
        None
    } else {
        Some(vec![workload.next_field_name()])
    }
}

fn write_values<W: Workload>(workload: &mut W, values: &mut Vec<KvPair>) {
    if workload.write_all_fields() {
        workload.build_values(values);
    } else {
        workload.build_update(values);
    }
}

/// Per-thread benchmark client
pub struct Client<'e, E: StorageEngine, W> {
    exec: Executor<'e, E>,
    workload: W,
    metrics: Arc<ClientMetrics>,
    options: ClientOptions,
    log: OperationLog,
    key: String,
    values: Vec<KvPair>,
    total_ops: u64,
    aborts: u64,
}

impl<'e, E: StorageEngine, W: Workload> Client<'e, E, W> {
    pub fn new(
        engine: &'e E,
        workload: W,
        metrics: Arc<ClientMetrics>,
        options: ClientOptions,
    ) -> Self {
        Self {
            exec: Executor {
                engine,
                tables: LatencyTables::new(),
            },
            workload,
            metrics,
            options,
            log: OperationLog::new(),
            key: String::new(),
            values: Vec::new(),
            total_ops: 0,
            aborts: 0,
        }
    }

    /// Insert the next sequence key with a full record
    ///
    /// Returns `false` when the insert or its commit conflicted.
    pub fn do_insert(&mut self) -> Result<bool> {
        self.workload.next_sequence_key(&mut self.key);
        self.workload.build_values(&mut self.values);
        let table = self.workload.next_table();

        let mut txn = self.exec.engine.begin()?;
        let status = self
            .exec
            .insert(txn.as_mut(), table, &self.key, &self.values);

        let inserted = match (status, txn) {
            (Ok(Outcome::Done), None) => true,
            (Ok(Outcome::Conflict), None) => false,
            (Ok(Outcome::Done), Some(txn)) => self.commit(txn, false)?,
            (Ok(Outcome::Conflict), Some(txn)) => {
                self.abandon(txn);
                false
            }
            (Err(e), txn) => {
                if let Some(txn) = txn {
                    self.abandon(txn);
                }
                return Err(e);
            }
        };
        if !inserted {
            warn!("Insert of {} conflicted", self.key);
        }
        self.total_ops += 1;
        Ok(inserted)
    }

    /// Run one logical transaction to completion
    ///
    /// Conflicts are retried and never returned. Only engines without
    /// transactions can report a conflicted operation, as `Ok(false)`.
    pub fn do_transaction(&mut self) -> Result<bool> {
        let ops = self.workload.ops_per_transaction();
        self.log.reset(ops);

        let result = match self.exec.engine.begin()? {
            Some(txn) => self.run_transaction(txn, ops).map(|()| true),
            None => self.run_direct(ops),
        };
        if result.is_ok() {
            self.total_ops += 1;
        }
        result
    }

    fn run_transaction(&mut self, mut txn: E::Txn, ops: usize) -> Result<()> {
        for _ in 0..ops {
            if let Err(e) = self.record_next() {
                self.abandon(txn);
                return Err(e);
            }
            // once aborted, the rest of the pass is only recorded
            if self.log.is_aborted() {
                continue;
            }
            let op = self.log.at(self.log.size_recorded() - 1);
            match self.exec.execute(Some(&mut txn), op) {
                Ok(Outcome::Done) => {}
                Ok(Outcome::Conflict) => self.log.set_aborted(true),
                Err(e) => {
                    self.abandon(txn);
                    return Err(e);
                }
            }
        }

        let mut attempts = 1u64;
        while !self.commit(txn, self.log.is_aborted())? {
            self.record_abort(attempts);
            if self.options.max_retries.map_or(false, |max| attempts > max) {
                return Err(Error::RetriesExhausted { attempts });
            }
            attempts += 1;

            txn = self
                .exec
                .engine
                .begin()?
                .ok_or(DbError::NotSupported("begin on retry"))?;
            self.log.set_aborted(false);

            for i in 0..self.log.size_recorded() {
                match self.exec.execute(Some(&mut txn), self.log.at(i)) {
                    Ok(Outcome::Done) => {}
                    Ok(Outcome::Conflict) => {
                        self.log.set_aborted(true);
                        break;
                    }
                    Err(e) => {
                        self.abandon(txn);
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    fn run_direct(&mut self, ops: usize) -> Result<bool> {
        let mut clean = true;
        for _ in 0..ops {
            self.record_next()?;
            let op = self.log.at(self.log.size_recorded() - 1);
            if self.exec.execute(None, op)? == Outcome::Conflict {
                warn!("{} of {} conflicted without a transaction", op.op, op.key);
                clean = false;
            }
        }
        Ok(clean)
    }

    /// Draw the next operation from the workload into the log
    fn record_next(&mut self) -> Result<()> {
        let kind = self.workload.next_operation();
        let workload = &mut self.workload;
        let op = self.log.append();
        op.op = kind;
        op.table.push_str(workload.next_table());

        match kind {
            Operation::Read => {
                workload.next_transaction_key(&mut op.key);
                op.fields = read_fields(workload);
            }
            Operation::Update => {
                workload.next_transaction_key(&mut op.key);
                write_values(workload, &mut op.values);
            }
            Operation::Insert => {
                workload.next_sequence_key(&mut op.key);
                workload.build_values(&mut op.values);
            }
            Operation::Scan => {
                workload.next_transaction_key(&mut op.key);
                op.len = workload.next_scan_length();
                op.fields = read_fields(workload);
            }
            Operation::ReadModifyWrite => {
                workload.next_transaction_key(&mut op.key);
                op.fields = read_fields(workload);
                write_values(workload, &mut op.values);
            }
            Operation::Delete => return Err(Error::UnrecognizedOperation(kind)),
        }
        Ok(())
    }

    /// `Ok(false)` when the engine reports a conflict
    fn commit(&self, txn: E::Txn, aborted: bool) -> Result<bool> {
        match self.exec.engine.commit(txn, aborted) {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Roll back an attempt that is being given up
    fn abandon(&self, txn: E::Txn) {
        if let Err(e) = self.exec.engine.commit(txn, true) {
            if !e.is_conflict() {
                warn!("Rollback failed: {}", e);
            }
        }
    }

    fn record_abort(&mut self, attempt: u64) {
        self.aborts += 1;
        self.metrics.record_abort();
        debug!("Attempt {} aborted, retrying", attempt);
    }

    /// Aborted attempts of this client
    pub fn abort_count(&self) -> u64 {
        self.aborts
    }

    pub fn tables(&self) -> &LatencyTables {
        &self.exec.tables
    }

    /// Hand over the measurements; timings are filled in by the caller
    pub fn finish(self) -> ThreadLog {
        ThreadLog {
            thread_id: 0,
            total_ops: self.total_ops,
            times: RunningTimes::default(),
            tables: self.exec.tables,
        }
    }
}
