//! Weighted choice among a fixed set of values

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use ycsb_common::error::{Error, Result};

/// Picks one of its values with probability proportional to its weight
#[derive(Debug, Clone)]
pub struct DiscreteGenerator<T> {
    values: Vec<T>,
    index: WeightedIndex<f64>,
}

impl<T: Copy> DiscreteGenerator<T> {
    /// Build from `(value, weight)` pairs; zero weights are dropped
    pub fn new<I>(weighted: I) -> Result<Self>
    where
        I: IntoIterator<Item = (T, f64)>,
    {
        let (values, weights): (Vec<T>, Vec<f64>) =
            weighted.into_iter().filter(|(_, w)| *w > 0.0).unzip();
        let index = WeightedIndex::new(&weights)
            .map_err(|e| Error::Config(format!("Invalid operation weights: {}", e)))?;
        Ok(Self { values, index })
    }

    pub fn next<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        self.values[self.index.sample(rng)]
    }
}
