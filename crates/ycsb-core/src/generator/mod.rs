//! Generators feeding the workload: sequence counters, weighted choice and
//! key choosers

mod counter;
mod discrete;
mod key;

pub use counter::{Batch, BatchedCounterGenerator};
pub use discrete::DiscreteGenerator;
pub use key::{build_key_name, KeyChooser};
