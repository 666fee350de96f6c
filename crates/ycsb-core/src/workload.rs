//! Workload generation
//!
//! [`CoreWorkload`] holds what all threads of a run share: the configuration,
//! the operation mix and the insert sequence. Each worker gets its own
//! [`WorkloadThread`] with a private, seeded random source.

use std::sync::Arc;

use rand::distributions::{Alphanumeric, Distribution};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ycsb_common::config::WorkloadConfig;
use ycsb_common::error::Result;
use ycsb_common::types::{KvPair, Operation};

use crate::generator::{build_key_name, Batch, BatchedCounterGenerator, DiscreteGenerator, KeyChooser};

/// Source of operations and their parameters, as consumed by the client
pub trait Workload {
    fn next_operation(&mut self) -> Operation;

    fn next_table(&self) -> &str;

    /// Key of an existing record
    fn next_transaction_key(&mut self, key: &mut String);

    /// Key of a record to insert
    fn next_sequence_key(&mut self, key: &mut String);

    fn next_field_name(&mut self) -> String;

    fn next_scan_length(&mut self) -> usize;

    /// A full record
    fn build_values(&mut self, values: &mut Vec<KvPair>);

    /// A single-field update
    fn build_update(&mut self, values: &mut Vec<KvPair>);

    fn read_all_fields(&self) -> bool;

    fn write_all_fields(&self) -> bool;

    fn ops_per_transaction(&self) -> usize;
}

/// Workload state shared by every thread of a run
#[derive(Debug)]
pub struct CoreWorkload {
    config: WorkloadConfig,
    operations: DiscreteGenerator<Operation>,
    keys: KeyChooser,
    inserts: BatchedCounterGenerator,
}

impl CoreWorkload {
    /// `insert_start` is the first key number new inserts use; records below
    /// it are assumed to exist already
    pub fn new(config: &WorkloadConfig, insert_start: u64) -> Result<Self> {
        let operations = DiscreteGenerator::new([
            (Operation::Read, config.read_proportion),
            (Operation::Update, config.update_proportion),
            (Operation::Insert, config.insert_proportion),
            (Operation::Scan, config.scan_proportion),
            (Operation::ReadModifyWrite, config.read_modify_write_proportion),
        ])?;
        let keys = KeyChooser::new(
            config.request_distribution,
            config.record_count,
            config.zipfian_constant,
        )?;

        Ok(Self {
            config: config.clone(),
            operations,
            keys,
            inserts: BatchedCounterGenerator::new(insert_start, config.insert_batch_size),
        })
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Low-water mark of inserted key numbers
    pub fn inserted(&self) -> u64 {
        self.inserts.last()
    }

    /// Per-thread view seeded with `seed + thread_id`
    pub fn thread(self: &Arc<Self>, thread_id: usize) -> WorkloadThread {
        let seed = self.config.seed.wrapping_add(thread_id as u64);
        WorkloadThread {
            shared: Arc::clone(self),
            rng: StdRng::seed_from_u64(seed),
            batch: None,
            used: 0,
            insert_quota: None,
        }
    }
}

/// One thread's stream of workload choices
///
/// Holds at most one batch of insert keys; unused keys go back to the shared
/// counter when the thread is dropped.
#[derive(Debug)]
pub struct WorkloadThread {
    shared: Arc<CoreWorkload>,
    rng: StdRng,
    batch: Option<Batch>,
    used: u64,
    /// Sequence keys this thread still expects to insert
    insert_quota: Option<u64>,
}

impl WorkloadThread {
    /// Size insert batches to exactly `count` more sequence keys
    ///
    /// Threads that split a known insert count this way consume one
    /// contiguous range between them. Past the quota, batches are full size
    /// again.
    pub fn limit_inserts(&mut self, count: u64) {
        self.insert_quota = Some(count);
    }

    fn random_value(&mut self) -> String {
        Alphanumeric
            .sample_iter(&mut self.rng)
            .take(self.shared.config.field_length)
            .map(char::from)
            .collect()
    }

    fn field_index(&mut self) -> usize {
        self.rng.gen_range(0..self.shared.config.field_count)
    }

    fn next_insert_number(&mut self) -> u64 {
        let batch = match self.batch {
            Some(batch) if self.used < batch.len => batch,
            _ => self.refill(),
        };
        let n = batch.start + self.used;
        self.used += 1;
        if let Some(quota) = self.insert_quota.as_mut() {
            *quota = quota.saturating_sub(1);
        }
        n
    }

    fn refill(&mut self) -> Batch {
        if let Some(done) = self.batch.take() {
            self.shared.inserts.mark_completed(done);
        }
        let fresh = match self.insert_quota {
            Some(quota) if quota > 0 => self.shared.inserts.next_batch_up_to(quota),
            _ => self.shared.inserts.next_batch(),
        };
        self.batch = Some(fresh);
        self.used = 0;
        fresh
    }
}

impl Workload for WorkloadThread {
    fn next_operation(&mut self) -> Operation {
        self.shared.operations.next(&mut self.rng)
    }

    fn next_table(&self) -> &str {
        &self.shared.config.table
    }

    fn next_transaction_key(&mut self, key: &mut String) {
        let n = self.shared.keys.next(&mut self.rng, self.shared.inserted());
        let c = &self.shared.config;
        build_key_name(n, c.ordered_inserts, c.zero_padding, key);
    }

    fn next_sequence_key(&mut self, key: &mut String) {
        let n = self.next_insert_number();
        let c = &self.shared.config;
        build_key_name(n, c.ordered_inserts, c.zero_padding, key);
    }

    fn next_field_name(&mut self) -> String {
        format!("field{}", self.field_index())
    }

    fn next_scan_length(&mut self) -> usize {
        self.rng.gen_range(1..=self.shared.config.max_scan_length.max(1))
    }

    fn build_values(&mut self, values: &mut Vec<KvPair>) {
        values.clear();
        for i in 0..self.shared.config.field_count {
            let value = self.random_value();
            values.push(KvPair::new(format!("field{}", i), value));
        }
    }

    fn build_update(&mut self, values: &mut Vec<KvPair>) {
        values.clear();
        let field = self.next_field_name();
        let value = self.random_value();
        values.push(KvPair::new(field, value));
    }

    fn read_all_fields(&self) -> bool {
        self.shared.config.read_all_fields
    }

    fn write_all_fields(&self) -> bool {
        self.shared.config.write_all_fields
    }

    fn ops_per_transaction(&self) -> usize {
        self.shared.config.ops_per_transaction
    }
}

impl Drop for WorkloadThread {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.shared
                .inserts
                .mark_partial(batch, batch.len - self.used);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WorkloadConfig {
        WorkloadConfig {
            record_count: 100,
            field_count: 3,
            field_length: 8,
            insert_batch_size: 4,
            ordered_inserts: true,
            ..WorkloadConfig::default()
        }
    }

    #[test]
    fn test_same_seed_same_choices() {
        let workload = Arc::new(CoreWorkload::new(&config(), 100).unwrap());
        let mut a = workload.thread(3);
        let mut b = workload.thread(3);

        let (mut ka, mut kb) = (String::new(), String::new());
        for _ in 0..50 {
            assert_eq!(a.next_operation(), b.next_operation());
            a.next_transaction_key(&mut ka);
            b.next_transaction_key(&mut kb);
            assert_eq!(ka, kb);
        }
    }

    #[test]
    fn test_values_shape() {
        let workload = Arc::new(CoreWorkload::new(&config(), 0).unwrap());
        let mut thread = workload.thread(0);

        let mut values = Vec::new();
        thread.build_values(&mut values);
        assert_eq!(values.len(), 3);
        assert_eq!(values[2].field, "field2");
        assert!(values
            .iter()
            .all(|kv| kv.value.len() == 8 && kv.value.chars().all(|c| c.is_ascii_alphanumeric())));

        thread.build_update(&mut values);
        assert_eq!(values.len(), 1);
        assert!(values[0].field.starts_with("field"));
    }

    #[test]
    fn test_sequence_keys_use_batches() {
        let workload = Arc::new(CoreWorkload::new(&config(), 0).unwrap());
        let mut key = String::new();
        {
            let mut t0 = workload.thread(0);
            let mut t1 = workload.thread(1);
            t0.next_sequence_key(&mut key);
            assert_eq!(key, "user0");
            t1.next_sequence_key(&mut key);
            assert_eq!(key, "user4");
            t0.next_sequence_key(&mut key);
            assert_eq!(key, "user1");
        }

        // both threads returned their unused keys; 2, 3 come back first
        let mut t2 = workload.thread(2);
        t2.next_sequence_key(&mut key);
        assert_eq!(key, "user2");
        assert_eq!(workload.inserted(), 2);
    }

    #[test]
    fn test_insert_quota_leaves_no_gaps() {
        let mut cfg = config();
        cfg.insert_batch_size = 1000;
        let workload = Arc::new(CoreWorkload::new(&cfg, 0).unwrap());
        let mut key = String::new();
        let mut keys = Vec::new();
        {
            let mut threads: Vec<_> = (0..4)
                .map(|id| {
                    let mut t = workload.thread(id);
                    t.limit_inserts(25);
                    t
                })
                .collect();
            for _ in 0..25 {
                for t in &mut threads {
                    t.next_sequence_key(&mut key);
                    keys.push(key.trim_start_matches("user").parse::<u64>().unwrap());
                }
            }
        }

        keys.sort_unstable();
        assert_eq!(keys, (0..100).collect::<Vec<_>>());
        assert_eq!(workload.inserted(), 100);
    }

    #[test]
    fn test_transaction_keys_stay_below_inserted() {
        let workload = Arc::new(CoreWorkload::new(&config(), 100).unwrap());
        let mut thread = workload.thread(0);
        let mut key = String::new();
        for _ in 0..200 {
            thread.next_transaction_key(&mut key);
            let n: u64 = key.trim_start_matches("user").parse().unwrap();
            assert!(n < 100);
        }
    }

    #[test]
    fn test_scan_length_range() {
        let mut cfg = config();
        cfg.max_scan_length = 5;
        let workload = Arc::new(CoreWorkload::new(&cfg, 0).unwrap());
        let mut thread = workload.thread(0);
        assert!((0..100)
            .map(|_| thread.next_scan_length())
            .all(|len| (1..=5).contains(&len)));
    }
}
