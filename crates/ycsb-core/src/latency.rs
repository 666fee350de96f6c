//! Log-scale latency histogram
//!
//! A fixed `EXPONENT_LIMIT x MANTISSA_LIMIT` grid of counters. A value keeps
//! its `MANTISSA_BITS` most significant bits below the leading one; the
//! exponent records how many low bits were dropped. Iterating the grid in
//! (exponent, mantissa) order visits latencies in non-decreasing order, so
//! min, max and percentiles are linear scans.
//!
//! Cells are atomics: any number of threads may record into, or merge into,
//! one shared histogram.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

/// Precision of a bucket, in bits
pub const MANTISSA_BITS: u32 = 10;
/// Number of exponent bands
pub const EXPONENT_LIMIT: usize = 64 - MANTISSA_BITS as usize;
/// Cells per exponent band
pub const MANTISSA_LIMIT: usize = 1 << MANTISSA_BITS;

const CELLS: usize = EXPONENT_LIMIT * MANTISSA_LIMIT;

/// Map a latency to its (exponent, mantissa) cell
///
/// The exponent may be out of range for values of 2^63 and above; callers
/// that record must check it.
pub fn bucket(value: u64) -> (usize, usize) {
    let bits = 64 - value.leading_zeros();
    if bits > MANTISSA_BITS + 1 {
        let exponent = bits - MANTISSA_BITS;
        let mantissa = (value >> (exponent - 1)) - MANTISSA_LIMIT as u64;
        (exponent as usize, mantissa as usize)
    } else if bits == MANTISSA_BITS + 1 {
        (1, (value - MANTISSA_LIMIT as u64) as usize)
    } else {
        (0, value as usize)
    }
}

/// The latency reported for a cell; never larger than any value in it
pub fn representative(exponent: usize, mantissa: usize) -> u64 {
    let mantissa = mantissa as u64;
    match exponent {
        0 => mantissa,
        1 => mantissa + MANTISSA_LIMIT as u64,
        _ => (mantissa + MANTISSA_LIMIT as u64) << (exponent - 1),
    }
}

fn cell_latency(index: usize) -> u64 {
    representative(index / MANTISSA_LIMIT, index % MANTISSA_LIMIT)
}

/// Fixed-memory latency histogram
pub struct LatencyTable {
    cells: Box<[AtomicU64]>,
}

impl LatencyTable {
    pub fn new() -> Self {
        Self {
            cells: (0..CELLS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Record a latency sample
    ///
    /// # Panics
    ///
    /// Panics when `value` is 2^63 or more; no benchmark latency gets there.
    pub fn record(&self, value: u64) {
        let (exponent, mantissa) = bucket(value);
        assert!(
            exponent < EXPONENT_LIMIT,
            "latency {} exceeds the histogram range",
            value
        );
        self.cells[exponent * MANTISSA_LIMIT + mantissa].fetch_add(1, Ordering::Relaxed);
    }

    /// Fold `other` into this histogram, cell by cell
    pub fn merge(&self, other: &LatencyTable) {
        for (dest, src) in self.cells.iter().zip(other.cells.iter()) {
            let n = src.load(Ordering::Relaxed);
            if n != 0 {
                dest.fetch_add(n, Ordering::Relaxed);
            }
        }
    }

    /// A new histogram holding `a + b`
    pub fn sum_of(a: &LatencyTable, b: &LatencyTable) -> Self {
        let sum = Self::new();
        sum.merge(a);
        sum.merge(b);
        sum
    }

    fn loaded(&self) -> impl DoubleEndedIterator<Item = (usize, u64)> + '_ {
        self.cells
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .enumerate()
    }

    /// Get count
    pub fn count(&self) -> u64 {
        self.loaded().map(|(_, n)| n).sum()
    }

    /// Sum of all samples, each counted at its representative latency
    pub fn sum(&self) -> u128 {
        self.loaded()
            .map(|(i, n)| u128::from(n) * u128::from(cell_latency(i)))
            .sum()
    }

    /// Get average; 0 when empty
    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum() as f64 / count as f64
    }

    /// Get min; 0 when empty
    pub fn min(&self) -> u64 {
        self.loaded()
            .find(|(_, n)| *n != 0)
            .map_or(0, |(i, _)| cell_latency(i))
    }

    /// Get max; 0 when empty
    pub fn max(&self) -> u64 {
        self.loaded()
            .rev()
            .find(|(_, n)| *n != 0)
            .map_or(0, |(i, _)| cell_latency(i))
    }

    /// Latency of the sample at zero-based `rank` in sorted order
    pub fn ith(&self, mut rank: u64) -> u64 {
        for (i, n) in self.loaded() {
            if rank < n {
                return cell_latency(i);
            }
            rank -= n;
        }
        self.max()
    }

    /// Get percentile value (0-100)
    pub fn percentile(&self, p: f64) -> u64 {
        let count = self.count();
        if count == 0 {
            return 0;
        }
        let rank = ((p / 100.0) * count as f64).floor() as u64;
        self.ith(rank)
    }

    /// Get p50 (median)
    pub fn p50(&self) -> u64 {
        self.percentile(50.0)
    }

    /// Get p99
    pub fn p99(&self) -> u64 {
        self.percentile(99.0)
    }

    /// Write the `latency count` distribution from the first non-empty cell
    /// through the maximum
    pub fn write_table<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "latency count")?;
        let max = self.max();
        let mut started = false;
        for (i, n) in self.loaded() {
            if !started && n == 0 {
                continue;
            }
            started = true;
            let latency = cell_latency(i);
            writeln!(out, "{:>20} {:>20}", latency, n)?;
            if latency == max {
                break;
            }
        }
        Ok(())
    }

    /// Write the cumulative distribution, one line per latency from the first
    /// recorded one until every sample is accounted for
    pub fn write_cdf<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "latency count")?;
        let total = self.count().max(1);
        let mut so_far = 0u64;
        for (i, n) in self.loaded() {
            so_far += n;
            if so_far != 0 {
                writeln!(
                    out,
                    "{:>20} {:.6}",
                    cell_latency(i),
                    so_far as f64 / total as f64
                )?;
            }
            if so_far == total {
                break;
            }
        }
        Ok(())
    }
}

impl Default for LatencyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LatencyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyTable")
            .field("count", &self.count())
            .field("min", &self.min())
            .field("max", &self.max())
            .finish()
    }
}
