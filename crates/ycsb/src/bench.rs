//! Benchmark orchestration

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::ValueEnum;
use tracing::info;

use ycsb_common::config::Config;
use ycsb_common::metrics::ClientMetrics;
use ycsb_core::reporting::{write_all_reports, Phase, RunReport};
use ycsb_core::{CoreWorkload, Runner};
use ycsb_storage::{with_engine, EngineVisitor, StorageEngine};

/// Phases to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PhaseSelection {
    /// Insert the initial records only
    Load,
    /// Run transactions against records loaded earlier
    Run,
    /// Load, then run
    Both,
}

impl PhaseSelection {
    fn loads(self) -> bool {
        matches!(self, PhaseSelection::Load | PhaseSelection::Both)
    }

    fn runs(self) -> bool {
        matches!(self, PhaseSelection::Run | PhaseSelection::Both)
    }
}

struct Benchmark<'a> {
    config: &'a Config,
    selection: PhaseSelection,
}

impl EngineVisitor for Benchmark<'_> {
    type Output = ycsb_common::Result<Vec<Phase>>;

    fn visit<E: StorageEngine>(self, engine: &E) -> Self::Output {
        let w = &self.config.workload;
        // a run without a load continues the key sequence after the loaded records
        let insert_start = if self.selection.loads() { 0 } else { w.record_count };
        let workload = Arc::new(CoreWorkload::new(w, insert_start)?);
        let metrics = Arc::new(ClientMetrics::new());
        let runner = Runner::new(engine, workload, Arc::clone(&metrics), &self.config.run);

        let mut phases = Vec::new();
        if self.selection.loads() {
            phases.push(runner.load_phase()?);
        }
        if self.selection.runs() {
            metrics.reset();
            phases.push(runner.transaction_phase()?);
            info!("Aborted transaction attempts: {}", metrics.total_aborts());
        }
        Ok(phases)
    }
}

fn summarize(phase: &Phase) {
    let t = phase.tables();
    info!(
        "{}: {} operations in {:.3} s, {:.0} ops/sec",
        phase.name(),
        phase.total_ops(),
        phase.wall_clock_time() as f64 / 1e9,
        phase.throughput()
    );
    for (name, table) in t.named() {
        if table.count() == 0 {
            continue;
        }
        info!(
            "  {:<10} count {:>10}  mean {:>10.0} ns  p50 {:>10} ns  p99 {:>10} ns  max {:>10} ns",
            name,
            table.count(),
            table.mean(),
            table.p50(),
            table.p99(),
            table.max()
        );
    }
}

/// Run the selected phases and report on them
pub fn run(config: &Config, selection: PhaseSelection, output: Option<&Path>) -> Result<()> {
    let mut engine = config.engine.clone();
    if !selection.loads() {
        engine.preloaded = true;
    }

    let benchmark = Benchmark { config, selection };
    let mut phases = with_engine(&engine, benchmark)??;

    let report = RunReport::compute_all(&mut phases);
    phases.iter().for_each(summarize);
    info!(
        "Total: {} operations, {:.0} ops/sec",
        report.total_ops,
        report.throughput()
    );

    if let Some(dir) = output.or(config.run.output_dir.as_deref()) {
        write_all_reports(dir, &phases)?;
    }
    Ok(())
}
