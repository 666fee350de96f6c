//! Metrics sink shared by the clients of one run

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;

/// Process-wide counters handed to every client at construction
///
/// Reset at run start, read at run end. Updates are `Relaxed`: only the final
/// sum is meaningful.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    aborts: AtomicU64,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one aborted transaction attempt
    pub fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
        counter!("ycsb_transaction_aborts_total").increment(1);
    }

    /// Total aborts recorded since the last reset
    pub fn total_aborts(&self) -> u64 {
        self.aborts.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.aborts.store(0, Ordering::Relaxed);
    }
}
