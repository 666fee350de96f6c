//! Sequence number generators

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

/// A contiguous range of sequence numbers reserved for one producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub start: u64,
    pub len: u64,
}

impl Batch {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

#[derive(Debug)]
struct BatchState {
    batch_size: u64,
    next_batch_start: u64,
    /// Returned partial batches, start -> remaining length
    available: BTreeMap<u64, u64>,
    /// Starts of batches handed out and not yet returned
    outstanding: BTreeSet<u64>,
}

/// Hands out batches of sequence numbers to concurrent producers
///
/// Partially used batches come back through [`mark_partial`](Self::mark_partial)
/// and are handed out again, lowest first, before any fresh batch. So
/// [`last`](Self::last) is a low-water mark: every number below it belongs to
/// a batch that was fully consumed.
#[derive(Debug)]
pub struct BatchedCounterGenerator {
    state: Mutex<BatchState>,
}

impl BatchedCounterGenerator {
    pub fn new(start: u64, batch_size: u64) -> Self {
        Self {
            state: Mutex::new(BatchState {
                batch_size,
                next_batch_start: start,
                available: BTreeMap::new(),
                outstanding: BTreeSet::new(),
            }),
        }
    }

    /// Reserve the lowest available batch
    pub fn next_batch(&self) -> Batch {
        self.next_batch_up_to(u64::MAX)
    }

    /// Reserve the lowest available batch, at most `max_len` long
    ///
    /// A longer returned batch is split and its tail stays available. A fresh
    /// batch only advances the counter by the length handed out, so producers
    /// that know their exact share leave no gaps.
    pub fn next_batch_up_to(&self, max_len: u64) -> Batch {
        let max_len = max_len.max(1);
        let mut state = self.state.lock();
        let batch = match state.available.pop_first() {
            Some((start, len)) if len > max_len => {
                state.available.insert(start + max_len, len - max_len);
                Batch {
                    start,
                    len: max_len,
                }
            }
            Some((start, len)) => Batch { start, len },
            None => {
                let batch = Batch {
                    start: state.next_batch_start,
                    len: state.batch_size.min(max_len),
                };
                state.next_batch_start += batch.len;
                batch
            }
        };
        state.outstanding.insert(batch.start);
        batch
    }

    /// Lowest sequence number that may not have been consumed yet
    pub fn last(&self) -> u64 {
        let state = self.state.lock();
        let mut last = state.next_batch_start;
        if let Some(start) = state.outstanding.first() {
            last = last.min(*start);
        }
        if let Some((start, _)) = state.available.first_key_value() {
            last = last.min(*start);
        }
        last
    }

    /// Return a batch with its last `remaining` numbers unused
    ///
    /// # Panics
    ///
    /// Panics when `batch` is not outstanding.
    pub fn mark_partial(&self, batch: Batch, remaining: u64) {
        let mut state = self.state.lock();
        assert!(
            state.outstanding.remove(&batch.start),
            "batch at {} is not outstanding",
            batch.start
        );
        if remaining > 0 {
            state
                .available
                .insert(batch.end() - remaining, remaining);
        }
    }

    pub fn mark_completed(&self, batch: Batch) {
        self.mark_partial(batch, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_partial_batch_is_reused_first() {
        let counter = BatchedCounterGenerator::new(0, 10);
        let first = counter.next_batch();
        assert_eq!(first, Batch { start: 0, len: 10 });
        assert_eq!(counter.last(), 0);

        counter.mark_partial(first, 4);
        assert_eq!(counter.last(), 6);

        assert_eq!(counter.next_batch(), Batch { start: 6, len: 4 });
        assert_eq!(counter.next_batch(), Batch { start: 10, len: 10 });
        assert_eq!(counter.last(), 6);
    }

    #[test]
    fn test_completed_batches_advance_low_water_mark() {
        let counter = BatchedCounterGenerator::new(100, 5);
        let a = counter.next_batch();
        let b = counter.next_batch();
        assert_eq!(b.start, 105);

        counter.mark_completed(b);
        // a is still outstanding
        assert_eq!(counter.last(), 100);

        counter.mark_completed(a);
        assert_eq!(counter.last(), 110);
    }

    #[test]
    #[should_panic(expected = "not outstanding")]
    fn test_double_return_is_fatal() {
        let counter = BatchedCounterGenerator::new(0, 10);
        let batch = counter.next_batch();
        counter.mark_completed(batch);
        counter.mark_completed(batch);
    }

    #[test]
    fn test_concurrent_batches_are_disjoint() {
        let counter = Arc::new(BatchedCounterGenerator::new(0, 7));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            let batch = counter.next_batch();
                            counter.mark_completed(batch);
                            batch.start
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut starts: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        starts.sort_unstable();
        starts.dedup();
        assert_eq!(starts.len(), 200);
        assert_eq!(counter.last(), 200 * 7);
    }

    #[test]
    fn test_capped_batches_are_contiguous() {
        let counter = BatchedCounterGenerator::new(0, 1000);
        let shares: Vec<Batch> = (0..4).map(|_| counter.next_batch_up_to(25)).collect();
        assert_eq!(
            shares.iter().map(|b| (b.start, b.len)).collect::<Vec<_>>(),
            vec![(0, 25), (25, 25), (50, 25), (75, 25)]
        );

        shares.into_iter().for_each(|b| counter.mark_completed(b));
        assert_eq!(counter.last(), 100);
        assert_eq!(counter.next_batch(), Batch { start: 100, len: 1000 });
    }

    #[test]
    fn test_capped_batch_splits_returned_range() {
        let counter = BatchedCounterGenerator::new(0, 10);
        let first = counter.next_batch();
        counter.mark_partial(first, 8);

        let head = counter.next_batch_up_to(3);
        assert_eq!(head, Batch { start: 2, len: 3 });
        assert_eq!(counter.next_batch(), Batch { start: 5, len: 5 });
        assert_eq!(counter.last(), 2);
    }
}
