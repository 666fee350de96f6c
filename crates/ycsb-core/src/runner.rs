//! Phase runner
//!
//! A phase splits its operation count across worker threads. Each worker
//! drives its own [`Client`] against the shared engine and hands its
//! [`ThreadLog`] to the phase when done.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use ycsb_common::config::RunConfig;
use ycsb_common::error::Result;
use ycsb_common::metrics::ClientMetrics;
use ycsb_storage::StorageEngine;

use crate::client::{Client, ClientOptions};
use crate::reporting::{Phase, RunningTimes, ThreadLog};
use crate::workload::{CoreWorkload, WorkloadThread};

/// CPU time consumed by the calling thread, in nanoseconds
pub fn thread_cpu_time_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return 0;
    }
    let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
    let nanos = u64::try_from(ts.tv_nsec).unwrap_or(0);
    secs * 1_000_000_000 + nanos
}

/// Runs benchmark phases against one engine
pub struct Runner<'e, E> {
    engine: &'e E,
    workload: Arc<CoreWorkload>,
    metrics: Arc<ClientMetrics>,
    threads: usize,
    options: ClientOptions,
    /// Thread start and finish times are measured from here
    epoch: Instant,
}

impl<'e, E: StorageEngine> Runner<'e, E> {
    pub fn new(
        engine: &'e E,
        workload: Arc<CoreWorkload>,
        metrics: Arc<ClientMetrics>,
        run: &RunConfig,
    ) -> Self {
        Self {
            engine,
            workload,
            metrics,
            threads: run.threads.max(1),
            options: ClientOptions {
                max_retries: run.max_retries,
            },
            epoch: Instant::now(),
        }
    }

    /// Insert `record_count` records
    ///
    /// Each worker's insert batches are sized to its share, so the loaded key
    /// numbers form one contiguous range.
    pub fn load_phase(&self) -> Result<Phase> {
        let total = self.workload.config().record_count;
        self.run_phase("load", total, true, |client| client.do_insert())
    }

    /// Run `operation_count` logical transactions
    pub fn transaction_phase(&self) -> Result<Phase> {
        let total = self.workload.config().operation_count;
        self.run_phase("run", total, false, |client| client.do_transaction())
    }

    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn run_phase<F>(&self, name: &str, total: u64, limit_inserts: bool, step: F) -> Result<Phase>
    where
        F: Fn(&mut Client<'e, E, WorkloadThread>) -> Result<bool> + Sync,
    {
        info!(
            "Starting {} phase: {} operations on {} threads against {}",
            name,
            total,
            self.threads,
            self.engine.name()
        );
        let phase = Phase::new(name);
        let threads = self.threads as u64;

        std::thread::scope(|s| {
            let handles: Vec<_> = (0..self.threads)
                .map(|id| {
                    let share = total / threads + u64::from((id as u64) < total % threads);
                    let (phase, step) = (&phase, &step);
                    s.spawn(move || self.worker(id, share, limit_inserts, phase, step))
                })
                .collect();

            handles.into_iter().try_for_each(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
        })?;

        let mut phase = phase;
        phase.compute();
        info!(
            "Finished {} phase: {} operations in {} ns",
            name,
            phase.total_ops(),
            phase.wall_clock_time()
        );
        Ok(phase)
    }

    fn worker<F>(
        &self,
        id: usize,
        ops: u64,
        limit_inserts: bool,
        phase: &Phase,
        step: &F,
    ) -> Result<()>
    where
        F: Fn(&mut Client<'e, E, WorkloadThread>) -> Result<bool>,
    {
        let mut workload = self.workload.thread(id);
        if limit_inserts {
            workload.limit_inserts(ops);
        }
        let mut client = Client::new(
            self.engine,
            workload,
            Arc::clone(&self.metrics),
            self.options,
        );

        let start = self.now();
        let cpu_start = thread_cpu_time_ns();
        let mut conflicted = 0u64;
        for _ in 0..ops {
            if !step(&mut client)? {
                conflicted += 1;
            }
        }
        let finish = self.now();
        let cpu = thread_cpu_time_ns().saturating_sub(cpu_start);

        if conflicted > 0 {
            warn!("Thread {}: {} operations conflicted", id, conflicted);
        }
        debug!(
            "Thread {} done: {} operations, {} aborted attempts",
            id,
            ops,
            client.abort_count()
        );

        let log = ThreadLog {
            thread_id: id,
            times: RunningTimes::for_thread(start, finish, cpu),
            ..client.finish()
        };
        phase.add_log(log);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ycsb_common::config::WorkloadConfig;
    use ycsb_storage::{LockingEngine, MemoryEngine, OptimisticEngine};

    fn workload(record_count: u64, operation_count: u64) -> WorkloadConfig {
        WorkloadConfig {
            record_count,
            operation_count,
            field_count: 2,
            field_length: 10,
            read_proportion: 0.5,
            update_proportion: 0.5,
            insert_batch_size: 8,
            ops_per_transaction: 2,
            ..WorkloadConfig::default()
        }
    }

    fn run_config(threads: usize) -> RunConfig {
        RunConfig {
            threads,
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_load_then_run_memory() {
        let engine = MemoryEngine::new();
        let config = workload(100, 60);
        let shared = Arc::new(CoreWorkload::new(&config, 0).unwrap());
        let metrics = Arc::new(ClientMetrics::new());
        let runner = Runner::new(&engine, Arc::clone(&shared), Arc::clone(&metrics), &run_config(3));

        let load = runner.load_phase().unwrap();
        assert_eq!(load.total_ops(), 100);
        assert_eq!(load.tables().insert.count(), 100);
        assert_eq!(load.logs().len(), 3);
        assert_eq!(engine.len("usertable"), 100);

        let run = runner.transaction_phase().unwrap();
        assert_eq!(run.total_ops(), 60);
        let t = run.tables();
        assert_eq!(t.all_query.count() + t.update.count(), 120);
        assert_eq!(metrics.total_aborts(), 0);
        assert!(run.times().sum_of_wall_clock_times > 0);
    }

    #[test]
    fn test_threaded_load_covers_record_range() {
        let engine = MemoryEngine::new();
        let config = WorkloadConfig {
            insert_batch_size: WorkloadConfig::default().insert_batch_size,
            ..workload(100, 200)
        };
        let loader = Arc::new(CoreWorkload::new(&config, 0).unwrap());
        let metrics = Arc::new(ClientMetrics::new());
        Runner::new(&engine, Arc::clone(&loader), Arc::clone(&metrics), &run_config(4))
            .load_phase()
            .unwrap();

        assert_eq!(loader.inserted(), 100);
        assert_eq!(engine.len("usertable"), 100);

        // a later run-only invocation continues after the loaded records
        let reads = WorkloadConfig {
            read_proportion: 1.0,
            update_proportion: 0.0,
            ..config
        };
        let runner_workload = Arc::new(CoreWorkload::new(&reads, 100).unwrap());
        let run = Runner::new(&engine, runner_workload, metrics, &run_config(4))
            .transaction_phase()
            .unwrap();
        assert_eq!(run.tables().neg_query.count(), 0);
        assert_eq!(run.tables().pos_query.count(), 400);
    }

    #[test]
    fn test_contended_transactions_complete() {
        for threads in [1, 4] {
            let engine = OptimisticEngine::new();
            let config = workload(10, 200);
            let shared = Arc::new(CoreWorkload::new(&config, 0).unwrap());
            let metrics = Arc::new(ClientMetrics::new());
            let runner = Runner::new(&engine, shared, Arc::clone(&metrics), &run_config(threads));

            runner.load_phase().unwrap();
            let run = runner.transaction_phase().unwrap();
            assert_eq!(run.total_ops(), 200);
            if threads == 1 {
                assert_eq!(metrics.total_aborts(), 0);
            }
        }
    }

    #[test]
    fn test_locking_engine_releases_all_locks() {
        let engine = LockingEngine::new();
        let config = workload(20, 100);
        let shared = Arc::new(CoreWorkload::new(&config, 0).unwrap());
        let runner = Runner::new(&engine, shared, Arc::new(ClientMetrics::new()), &run_config(4));

        runner.load_phase().unwrap();
        runner.transaction_phase().unwrap();
        assert_eq!(engine.locked_keys(), 0);
    }

    #[test]
    fn test_thread_cpu_clock_advances() {
        let before = thread_cpu_time_ns();
        let mut x = 0u64;
        for i in 0..2_000_000u64 {
            x = x.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(x);
        assert!(thread_cpu_time_ns() >= before);
    }
}
