//! Report aggregation
//!
//! Each worker thread hands in one [`ThreadLog`]. A [`Phase`] folds the logs
//! of one benchmark phase; a [`RunReport`] folds all phases. Every fold is a
//! plain sum or min/max, so the order logs arrive in does not matter.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use parking_lot::{Mutex, MutexGuard};
use tracing::info;

use crate::latency::LatencyTable;

/// Latency tables kept per thread, phase and run
#[derive(Debug, Default)]
pub struct LatencyTables {
    /// Reads that found their record
    pub pos_query: LatencyTable,
    /// Reads that found nothing
    pub neg_query: LatencyTable,
    /// `pos_query + neg_query`, filled by [`compute_derived`](Self::compute_derived)
    pub all_query: LatencyTable,
    pub delete: LatencyTable,
    pub insert: LatencyTable,
    pub update: LatencyTable,
    pub scan: LatencyTable,
}

impl LatencyTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute_derived(&mut self) {
        self.all_query = LatencyTable::sum_of(&self.pos_query, &self.neg_query);
    }

    /// Fold `other` into these tables; safe to call concurrently
    pub fn merge(&self, other: &LatencyTables) {
        for ((_, dest), (_, src)) in self.named().into_iter().zip(other.named()) {
            dest.merge(src);
        }
    }

    /// Tables with their report names, in report order
    pub fn named(&self) -> [(&'static str, &LatencyTable); 7] {
        [
            ("pos_query", &self.pos_query),
            ("neg_query", &self.neg_query),
            ("all_query", &self.all_query),
            ("delete", &self.delete),
            ("insert", &self.insert),
            ("update", &self.update),
            ("scan", &self.scan),
        ]
    }
}

/// Timing of a thread, phase or run; nanoseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningTimes {
    pub earliest_thread_start_time: u64,
    pub last_thread_finish_time: u64,
    pub sum_of_wall_clock_times: u64,
    pub sum_of_cpu_times: u64,
    pub cleanup_time: u64,
}

impl RunningTimes {
    /// Times of a single thread
    pub fn for_thread(start: u64, finish: u64, cpu: u64) -> Self {
        Self {
            earliest_thread_start_time: start,
            last_thread_finish_time: finish,
            sum_of_wall_clock_times: finish.saturating_sub(start),
            sum_of_cpu_times: cpu,
            cleanup_time: 0,
        }
    }

    pub fn wall_clock_time(&self) -> u64 {
        self.last_thread_finish_time
            .saturating_sub(self.earliest_thread_start_time)
    }

    fn fold<'a>(all: impl IntoIterator<Item = &'a RunningTimes>) -> Self {
        let mut total: Option<RunningTimes> = None;
        for t in all {
            let acc = total.get_or_insert(RunningTimes {
                sum_of_wall_clock_times: 0,
                sum_of_cpu_times: 0,
                cleanup_time: 0,
                ..*t
            });
            acc.earliest_thread_start_time =
                acc.earliest_thread_start_time.min(t.earliest_thread_start_time);
            acc.last_thread_finish_time =
                acc.last_thread_finish_time.max(t.last_thread_finish_time);
            acc.sum_of_wall_clock_times += t.sum_of_wall_clock_times;
            acc.sum_of_cpu_times += t.sum_of_cpu_times;
            acc.cleanup_time += t.cleanup_time;
        }
        total.unwrap_or_default()
    }
}

/// Everything one worker thread measured in one phase
#[derive(Debug, Default)]
pub struct ThreadLog {
    /// Index of the worker; orders per-thread reports
    pub thread_id: usize,
    pub total_ops: u64,
    pub times: RunningTimes,
    pub tables: LatencyTables,
}

fn throughput(total_ops: u64, wall_clock_time: u64) -> f64 {
    if wall_clock_time == 0 {
        return 0.0;
    }
    1_000_000_000.0 * total_ops as f64 / wall_clock_time as f64
}

fn mean_overall_latency(total_ops: u64, times: &RunningTimes) -> f64 {
    if total_ops == 0 {
        return 0.0;
    }
    times.sum_of_wall_clock_times as f64 / total_ops as f64
}

/// One named benchmark phase (`load`, `run`)
#[derive(Debug)]
pub struct Phase {
    name: String,
    logs: Mutex<Vec<ThreadLog>>,
    tables: LatencyTables,
    times: RunningTimes,
    total_ops: u64,
}

impl Phase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            logs: Mutex::new(Vec::new()),
            tables: LatencyTables::new(),
            times: RunningTimes::default(),
            total_ops: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fold a finished thread's tables into the phase and keep its log
    pub fn add_log(&self, mut log: ThreadLog) {
        log.tables.compute_derived();
        self.tables.merge(&log.tables);
        self.logs.lock().push(log);
    }

    /// Derive the phase timing and operation totals from its logs
    pub fn compute(&mut self) {
        let logs = self.logs.get_mut();
        logs.sort_by_key(|log| log.thread_id);
        self.times = RunningTimes::fold(logs.iter().map(|log| &log.times));
        self.total_ops = logs.iter().map(|log| log.total_ops).sum();
    }

    /// Thread logs, ordered by thread once [`compute`](Self::compute) ran
    pub fn logs(&self) -> MutexGuard<'_, Vec<ThreadLog>> {
        self.logs.lock()
    }

    pub fn tables(&self) -> &LatencyTables {
        &self.tables
    }

    pub fn times(&self) -> &RunningTimes {
        &self.times
    }

    pub fn total_ops(&self) -> u64 {
        self.total_ops
    }

    pub fn wall_clock_time(&self) -> u64 {
        self.times.wall_clock_time()
    }

    /// Operations per second
    pub fn throughput(&self) -> f64 {
        throughput(self.total_ops, self.wall_clock_time())
    }

    pub fn mean_overall_latency(&self) -> f64 {
        mean_overall_latency(self.total_ops, &self.times)
    }
}

/// Totals over every phase of a run
#[derive(Debug, Default)]
pub struct RunReport {
    pub total_ops: u64,
    pub times: RunningTimes,
    pub tables: LatencyTables,
}

impl RunReport {
    /// Compute every phase, then fold them into whole-run totals
    pub fn compute_all(phases: &mut [Phase]) -> Self {
        phases.iter_mut().for_each(Phase::compute);

        let report = Self {
            total_ops: phases.iter().map(Phase::total_ops).sum(),
            times: RunningTimes::fold(phases.iter().map(Phase::times)),
            tables: LatencyTables::new(),
        };
        for phase in phases.iter() {
            report.tables.merge(phase.tables());
        }
        report
    }

    pub fn throughput(&self) -> f64 {
        throughput(self.total_ops, self.times.wall_clock_time())
    }
}

/// Flat `key: value` statistics for one thread, phase or run
pub fn write_statistics<W: Write>(
    out: &mut W,
    total_ops: u64,
    times: &RunningTimes,
    tables: &LatencyTables,
) -> io::Result<()> {
    let wall_clock_time = times.wall_clock_time();
    writeln!(out, "total_operations: {}", total_ops)?;
    writeln!(out, "wall_clock_time: {}", wall_clock_time)?;
    writeln!(out, "sum_of_wall_clock_times: {}", times.sum_of_wall_clock_times)?;
    writeln!(out, "sum_of_cpu_times: {}", times.sum_of_cpu_times)?;
    writeln!(
        out,
        "mean_overall_latency: {:.6}",
        mean_overall_latency(total_ops, times)
    )?;
    writeln!(
        out,
        "mean_overall_throughput: {:.6}",
        throughput(total_ops, wall_clock_time)
    )?;

    for (name, table) in tables.named() {
        write_operation_statistics(out, name, table)?;
    }
    Ok(())
}

fn write_operation_statistics<W: Write>(
    out: &mut W,
    name: &str,
    table: &LatencyTable,
) -> io::Result<()> {
    writeln!(out, "{}_count: {}", name, table.count())?;
    writeln!(out, "{}_total_latency: {}", name, table.sum())?;
    writeln!(out, "{}_min_latency: {}", name, table.min())?;
    writeln!(out, "{}_mean_latency: {:.6}", name, table.mean())?;
    writeln!(out, "{}_median_latency: {}", name, table.p50())?;
    writeln!(out, "{}_99.0_latency: {}", name, table.p99())?;
    writeln!(out, "{}_99.5_latency: {}", name, table.percentile(99.5))?;
    writeln!(out, "{}_99.9_latency: {}", name, table.percentile(99.9))?;
    writeln!(out, "{}_max_latency: {}", name, table.max())?;

    writeln!(out, "{}_000_latency: {}", name, table.min())?;
    for p in (5..100).step_by(5) {
        writeln!(
            out,
            "{}_{:03}_latency: {}",
            name,
            p,
            table.percentile(f64::from(p))
        )?;
    }
    writeln!(out, "{}_100_latency: {}", name, table.max())?;
    Ok(())
}

fn create(dir: &Path, file_name: &str) -> io::Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(dir.join(file_name))?))
}

fn write_tables(dir: &Path, prefix: &str, tables: &LatencyTables) -> io::Result<()> {
    for (op, table) in tables.named() {
        let mut df = create(dir, &format!("{}.{}.latency.df", prefix, op))?;
        table.write_table(&mut df)?;
        df.flush()?;

        let mut cdf = create(dir, &format!("{}.{}.latency.cdf", prefix, op))?;
        table.write_cdf(&mut cdf)?;
        cdf.flush()?;
    }
    Ok(())
}

/// Write the latency dumps and statistics of one computed phase into `dir`
pub fn write_phase_reports(dir: &Path, phase: &Phase) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    for (i, log) in phase.logs().iter().enumerate() {
        let prefix = format!("{}.{:02}", phase.name(), i);
        write_tables(dir, &prefix, &log.tables)?;

        let mut stats = create(dir, &format!("{}.statistics", prefix))?;
        write_statistics(&mut stats, log.total_ops, &log.times, &log.tables)?;
        stats.flush()?;
    }

    write_tables(dir, phase.name(), phase.tables())?;
    let mut stats = create(dir, &format!("{}.statistics", phase.name()))?;
    write_statistics(&mut stats, phase.total_ops(), phase.times(), phase.tables())?;
    stats.flush()?;

    info!("Wrote {} reports to {:?}", phase.name(), dir);
    Ok(())
}

pub fn write_all_reports(dir: &Path, phases: &[Phase]) -> io::Result<()> {
    phases
        .iter()
        .try_for_each(|phase| write_phase_reports(dir, phase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn thread_log(thread_id: usize, start: u64, finish: u64, reads: &[u64]) -> ThreadLog {
        let log = ThreadLog {
            thread_id,
            total_ops: reads.len() as u64,
            times: RunningTimes::for_thread(start, finish, (finish - start) / 2),
            tables: LatencyTables::new(),
        };
        for r in reads {
            log.tables.pos_query.record(*r);
        }
        log.tables.neg_query.record(5);
        log
    }

    #[test]
    fn test_phase_compute() {
        let mut phase = Phase::new("run");
        phase.add_log(thread_log(1, 200, 1200, &[10, 20]));
        phase.add_log(thread_log(0, 100, 900, &[30]));
        phase.compute();

        assert_eq!(phase.total_ops(), 3);
        assert_eq!(phase.times().earliest_thread_start_time, 100);
        assert_eq!(phase.times().last_thread_finish_time, 1200);
        assert_eq!(phase.times().sum_of_wall_clock_times, 1000 + 800);
        assert_eq!(phase.wall_clock_time(), 1100);
        assert_eq!(phase.mean_overall_latency(), 600.0);
        assert!((phase.throughput() - 3.0e9 / 1100.0).abs() < 1e-6);

        assert_eq!(phase.tables().pos_query.count(), 3);
        assert_eq!(phase.tables().all_query.count(), 5);
        assert_eq!(phase.logs()[0].thread_id, 0);
    }

    fn phase_statistics(phase: &Phase) -> String {
        let mut out = Vec::new();
        write_statistics(&mut out, phase.total_ops(), phase.times(), phase.tables()).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_phase_statistics_independent_of_log_order() {
        let logs = || {
            vec![
                thread_log(0, 100, 900, &[30, 7_000]),
                thread_log(1, 200, 1200, &[10, 20, 1_500_000]),
                thread_log(2, 50, 700, &[3]),
            ]
        };

        let mut forward = Phase::new("run");
        logs().into_iter().for_each(|log| forward.add_log(log));
        forward.compute();

        let mut backward = Phase::new("run");
        logs().into_iter().rev().for_each(|log| backward.add_log(log));
        backward.compute();

        assert_eq!(phase_statistics(&forward), phase_statistics(&backward));

        // merging the tables themselves in another order gives the same totals
        let mut reversed = LatencyTables::new();
        for log in logs().iter().rev() {
            reversed.merge(&log.tables);
        }
        reversed.compute_derived();
        let mut out = Vec::new();
        write_statistics(&mut out, forward.total_ops(), forward.times(), &reversed).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), phase_statistics(&forward));
    }

    #[test]
    fn test_empty_phase() {
        let mut phase = Phase::new("load");
        phase.compute();
        assert_eq!(phase.total_ops(), 0);
        assert_eq!(phase.throughput(), 0.0);
        assert_eq!(phase.mean_overall_latency(), 0.0);
    }

    #[test]
    fn test_concurrent_add_log() {
        let phase = Arc::new(Phase::new("run"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let phase = Arc::clone(&phase);
                std::thread::spawn(move || {
                    phase.add_log(thread_log(i, 0, 10, &[1, 2, 3]));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut phase = Arc::try_unwrap(phase).unwrap();
        phase.compute();
        assert_eq!(phase.total_ops(), 24);
        assert_eq!(phase.tables().pos_query.count(), 24);
        assert_eq!(phase.tables().all_query.count(), 32);
    }

    #[test]
    fn test_compute_all_folds_phases() {
        let load = Phase::new("load");
        load.add_log(thread_log(0, 0, 100, &[1]));
        let run = Phase::new("run");
        run.add_log(thread_log(0, 150, 400, &[2, 3]));

        let mut phases = [load, run];
        let report = RunReport::compute_all(&mut phases);
        assert_eq!(report.total_ops, 3);
        assert_eq!(report.times.wall_clock_time(), 400);
        assert_eq!(report.times.sum_of_wall_clock_times, 350);
        assert_eq!(report.tables.pos_query.count(), 3);
        assert_eq!(phases[1].total_ops(), 2);
    }

    #[test]
    fn test_statistics_format() {
        let log = thread_log(0, 0, 1000, &[1, 2, 3]);
        let mut out = Vec::new();
        write_statistics(&mut out, log.total_ops, &log.times, &log.tables).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("total_operations: 3\nwall_clock_time: 1000\n"));
        assert!(text.contains("mean_overall_throughput: 3000000.000000\n"));
        assert!(text.contains("pos_query_count: 3\n"));
        assert!(text.contains("pos_query_median_latency: 2\n"));
        assert!(text.contains("pos_query_005_latency: 1\n"));
        assert!(text.contains("pos_query_100_latency: 3\n"));
        assert!(text.contains("scan_max_latency: 0\n"));
        // 9 summary lines + 21 percentile lines per table
        assert_eq!(text.lines().count(), 6 + 7 * 30);
    }

    #[test]
    fn test_report_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut phase = Phase::new("run");
        phase.add_log(thread_log(0, 0, 10, &[4]));
        phase.add_log(thread_log(1, 0, 10, &[8]));
        phase.compute();

        write_all_reports(dir.path(), std::slice::from_ref(&phase)).unwrap();

        for name in [
            "run.00.pos_query.latency.df",
            "run.01.scan.latency.cdf",
            "run.00.statistics",
            "run.01.statistics",
            "run.all_query.latency.df",
            "run.update.latency.cdf",
            "run.statistics",
        ] {
            assert!(dir.path().join(name).exists(), "missing {}", name);
        }

        let df = fs::read_to_string(dir.path().join("run.pos_query.latency.df")).unwrap();
        assert!(df.starts_with("latency count\n"));
    }
}
