//! Key number choosers and key naming

use rand::distributions::Distribution;
use rand::Rng;
use xxhash_rust::xxh3::xxh3_64;
use zipf::ZipfDistribution;

use ycsb_common::config::RequestDistribution;
use ycsb_common::error::{Error, Result};

/// Picks the key number of a transaction operation from `[0, inserted)`
#[derive(Debug, Clone)]
pub enum KeyChooser {
    Uniform,
    /// Zipfian ranks scattered over the key space by hashing
    ScrambledZipfian(ZipfDistribution),
    /// Zipfian skew towards the most recently inserted keys
    Latest(ZipfDistribution),
}

impl KeyChooser {
    /// `items` sizes the zipfian rank space; usually the initial record count
    pub fn new(distribution: RequestDistribution, items: u64, constant: f64) -> Result<Self> {
        let zipf = || {
            let items = usize::try_from(items.max(1))
                .map_err(|_| Error::Config(format!("record count {} too large", items)))?;
            ZipfDistribution::new(items, constant).map_err(|()| {
                Error::Config(format!("zipfian constant must be positive: {}", constant))
            })
        };
        Ok(match distribution {
            RequestDistribution::Uniform => KeyChooser::Uniform,
            RequestDistribution::Zipfian => KeyChooser::ScrambledZipfian(zipf()?),
            RequestDistribution::Latest => KeyChooser::Latest(zipf()?),
        })
    }

    pub fn next<R: Rng + ?Sized>(&self, rng: &mut R, inserted: u64) -> u64 {
        if inserted == 0 {
            return 0;
        }
        match self {
            KeyChooser::Uniform => rng.gen_range(0..inserted),
            KeyChooser::ScrambledZipfian(zipf) => {
                let rank = zipf.sample(rng) as u64;
                xxh3_64(&rank.to_le_bytes()) % inserted
            }
            KeyChooser::Latest(zipf) => {
                let back = (zipf.sample(rng) as u64 - 1) % inserted;
                inserted - 1 - back
            }
        }
    }
}

/// Render key number `n` as a record key
///
/// Unordered inserts hash the number so consecutive inserts land far apart
/// in the key space.
pub fn build_key_name(n: u64, ordered: bool, zero_padding: usize, key: &mut String) {
    use std::fmt::Write;

    let n = if ordered { n } else { xxh3_64(&n.to_le_bytes()) };
    key.clear();
    // writing to a String cannot fail
    let _ = write!(key, "user{:0width$}", n, width = zero_padding);
}
