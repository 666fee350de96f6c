//! Per-attempt operation log
//!
//! The first attempt of a logical transaction records every operation the
//! workload chose. Retries replay the log by index so that every attempt
//! issues the same kinds, keys and values.

use ycsb_common::types::{KvPair, Operation};

/// One recorded operation
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOperation {
    pub op: Operation,
    pub table: String,
    pub key: String,
    /// Projection for reads and scans; `None` reads all fields
    pub fields: Option<Vec<String>>,
    /// Scan length
    pub len: usize,
    /// Values written by updates, inserts and read-modify-writes
    pub values: Vec<KvPair>,
}

impl TransactionOperation {
    /// Empty the slot, keeping its buffers
    fn clear(&mut self) {
        self.op = Operation::Read;
        self.table.clear();
        self.key.clear();
        self.fields = None;
        self.len = 0;
        self.values.clear();
    }
}

impl Default for TransactionOperation {
    fn default() -> Self {
        Self {
            op: Operation::Read,
            table: String::new(),
            key: String::new(),
            fields: None,
            len: 0,
            values: Vec::new(),
        }
    }
}

/// Recorded operations of the current logical transaction plus the aborted
/// flag of the attempt in flight
#[derive(Debug, Default)]
pub struct OperationLog {
    ops: Vec<TransactionOperation>,
    next_op: usize,
    aborted: bool,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare `expected_size` empty slots for a new logical transaction
    pub fn reset(&mut self, expected_size: usize) {
        self.ops.truncate(expected_size);
        self.ops.iter_mut().for_each(TransactionOperation::clear);
        self.ops
            .resize_with(expected_size, TransactionOperation::default);
        self.next_op = 0;
        self.aborted = false;
    }

    /// The next unfilled slot
    ///
    /// # Panics
    ///
    /// Panics when every slot reserved by [`reset`](Self::reset) is filled.
    pub fn append(&mut self) -> &mut TransactionOperation {
        assert!(
            self.next_op < self.ops.len(),
            "operation log is full ({} slots)",
            self.ops.len()
        );
        let slot = &mut self.ops[self.next_op];
        self.next_op += 1;
        slot
    }

    pub fn size_recorded(&self) -> usize {
        self.next_op
    }

    pub fn at(&self, index: usize) -> &TransactionOperation {
        &self.ops[..self.next_op][index]
    }

    /// Recorded operations in order
    pub fn iter(&self) -> std::slice::Iter<'_, TransactionOperation> {
        self.ops[..self.next_op].iter()
    }

    pub fn set_aborted(&mut self, aborted: bool) {
        self.aborted = aborted;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}
