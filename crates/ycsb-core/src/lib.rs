//! ycsb-rs Core - the benchmark engine
//!
//! Provides:
//! - Log-scale latency histograms
//! - Workload generators and key choosers
//! - The retrying transactional client
//! - Phase runners and report aggregation

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

pub mod client;
pub mod generator;
pub mod latency;
pub mod reporting;
pub mod runner;
pub mod transaction;
pub mod workload;

pub use client::{Client, ClientOptions};
pub use latency::LatencyTable;
pub use reporting::{LatencyTables, Phase, RunReport, RunningTimes, ThreadLog};
pub use runner::Runner;
pub use transaction::{OperationLog, TransactionOperation};
pub use workload::{CoreWorkload, Workload, WorkloadThread};
