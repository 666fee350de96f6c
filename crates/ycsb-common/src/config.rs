//! Configuration management for ycsb-rs

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Main configuration structure for a benchmark run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Workload shape
    #[serde(default)]
    pub workload: WorkloadConfig,

    /// Engine selection
    #[serde(default)]
    pub engine: EngineConfig,

    /// Driver settings
    #[serde(default)]
    pub run: RunConfig,
}

impl Config {
    /// Load configuration from a TOML or JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config = if path.extension().map_or(false, |ext| ext == "json") {
            serde_json::from_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };

        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `section.key=value` overrides on top of the loaded values
    ///
    /// The value is parsed as a TOML scalar (`100`, `true`, `0.5`), falling
    /// back to a plain string.
    pub fn apply_overrides<S: AsRef<str>>(&mut self, overrides: &[S]) -> Result<()> {
        if overrides.is_empty() {
            return Ok(());
        }

        let mut root = toml::Value::try_from(&*self)
            .map_err(|e| Error::Serialization(e.to_string()))?;

        for raw in overrides {
            let raw = raw.as_ref();
            let (path, value) = raw
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("Override must be key=value: {}", raw)))?;
            let (section, key) = path.trim().split_once('.').ok_or_else(|| {
                Error::Config(format!("Override key must be section.key: {}", path))
            })?;

            let table = root
                .as_table_mut()
                .and_then(|t| t.get_mut(section))
                .and_then(toml::Value::as_table_mut)
                .ok_or_else(|| Error::Config(format!("Unknown config section: {}", section)))?;
            table.insert(key.to_string(), parse_scalar(value.trim()));
        }

        *self = root.try_into::<Config>()?;
        Ok(())
    }

    /// Reject settings the driver cannot run with
    pub fn validate(&self) -> Result<()> {
        let w = &self.workload;
        if self.run.threads == 0 {
            return Err(Error::Config("run.threads must be at least 1".into()));
        }
        if w.ops_per_transaction == 0 {
            return Err(Error::Config(
                "workload.ops_per_transaction must be at least 1".into(),
            ));
        }
        if w.field_count == 0 {
            return Err(Error::Config("workload.field_count must be at least 1".into()));
        }
        if w.insert_batch_size == 0 {
            return Err(Error::Config(
                "workload.insert_batch_size must be at least 1".into(),
            ));
        }
        let proportions = [
            w.read_proportion,
            w.update_proportion,
            w.insert_proportion,
            w.scan_proportion,
            w.read_modify_write_proportion,
        ];
        if proportions.iter().any(|p| *p < 0.0) || proportions.iter().sum::<f64>() <= 0.0 {
            return Err(Error::Config(
                "operation proportions must be non-negative and sum above zero".into(),
            ));
        }
        if self.engine.kind == EngineKind::Sled && self.engine.path.is_none() {
            return Err(Error::Config("engine.path is required for sled".into()));
        }
        Ok(())
    }
}

fn parse_scalar(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {}", raw))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

/// Key chooser used for transaction keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestDistribution {
    Uniform,
    Zipfian,
    Latest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Table name passed to every operation
    pub table: String,
    /// Records inserted by the load phase
    pub record_count: u64,
    /// Logical transactions issued by the run phase
    pub operation_count: u64,
    /// Fields per record
    pub field_count: usize,
    /// Bytes per field value
    pub field_length: usize,
    pub read_all_fields: bool,
    pub write_all_fields: bool,
    pub read_proportion: f64,
    pub update_proportion: f64,
    pub insert_proportion: f64,
    pub scan_proportion: f64,
    pub read_modify_write_proportion: f64,
    pub request_distribution: RequestDistribution,
    /// Zipfian skew constant
    pub zipfian_constant: f64,
    pub max_scan_length: usize,
    /// Insert keys in key-number order instead of hashed order
    pub ordered_inserts: bool,
    /// Minimum digits of the key number
    pub zero_padding: usize,
    pub ops_per_transaction: usize,
    /// Sequence numbers reserved per thread per batch
    pub insert_batch_size: u64,
    /// Base seed; thread `i` uses `seed + i`
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            table: "usertable".to_string(),
            record_count: 1000,
            operation_count: 1000,
            field_count: 10,
            field_length: 100,
            read_all_fields: true,
            write_all_fields: false,
            read_proportion: 0.95,
            update_proportion: 0.05,
            insert_proportion: 0.0,
            scan_proportion: 0.0,
            read_modify_write_proportion: 0.0,
            request_distribution: RequestDistribution::Uniform,
            zipfian_constant: 0.99,
            max_scan_length: 1000,
            ordered_inserts: false,
            zero_padding: 1,
            ops_per_transaction: 1,
            insert_batch_size: 1000,
            seed: 1,
        }
    }
}

/// Storage engine variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Non-transactional in-memory engine
    Memory,
    /// Transactional engine with per-key locks
    Locking,
    /// Transactional engine with commit-time validation
    Optimistic,
    /// Non-transactional persistent engine
    Sled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Database directory for persistent engines
    pub path: Option<PathBuf>,
    /// Whether the database was loaded by an earlier invocation
    pub preloaded: bool,
    /// Page cache size for sled
    pub cache_capacity_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Memory,
            path: None,
            preloaded: false,
            cache_capacity_bytes: 256 * 1024 * 1024, // 256MB
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Worker threads per phase
    pub threads: usize,
    /// Retry bound per logical transaction (unbounded when absent)
    pub max_retries: Option<u64>,
    /// Directory for report files (none written when absent)
    pub output_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            max_retries: None,
            output_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workload.table, "usertable");
        assert_eq!(config.run.max_retries, None);
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::from_toml_str(
            r#"
            [workload]
            record_count = 5000
            request_distribution = "zipfian"
            ops_per_transaction = 4

            [engine]
            kind = "optimistic"

            [run]
            threads = 8
            max_retries = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.workload.record_count, 5000);
        assert_eq!(config.workload.request_distribution, RequestDistribution::Zipfian);
        assert_eq!(config.workload.ops_per_transaction, 4);
        // untouched fields keep their defaults
        assert_eq!(config.workload.field_count, 10);
        assert_eq!(config.engine.kind, EngineKind::Optimistic);
        assert_eq!(config.run.threads, 8);
        assert_eq!(config.run.max_retries, Some(100));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(&[
                "workload.record_count=42",
                "workload.read_all_fields=false",
                "workload.table=other",
                "engine.kind=locking",
                "run.max_retries=3",
            ])
            .unwrap();

        assert_eq!(config.workload.record_count, 42);
        assert!(!config.workload.read_all_fields);
        assert_eq!(config.workload.table, "other");
        assert_eq!(config.engine.kind, EngineKind::Locking);
        assert_eq!(config.run.max_retries, Some(3));
    }

    #[test]
    fn test_bad_overrides() {
        let mut config = Config::default();
        assert!(config.apply_overrides(&["record_count"]).is_err());
        assert!(config.apply_overrides(&["record_count=1"]).is_err());
        assert!(config.apply_overrides(&["nosuch.key=1"]).is_err());
        assert!(config.apply_overrides(&["workload.record_count=abc"]).is_err());
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = Config::default();
        config.run.threads = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.workload.read_proportion = 0.0;
        config.workload.update_proportion = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.engine.kind = EngineKind::Sled;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        std::fs::write(&path, "[run]\nthreads = 2\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.run.threads, 2);

        let json = dir.path().join("bench.json");
        std::fs::write(&json, r#"{"workload": {"record_count": 7}}"#).unwrap();
        assert_eq!(Config::load(&json).unwrap().workload.record_count, 7);

        assert!(matches!(
            Config::load(dir.path().join("missing.toml")),
            Err(Error::Io(_))
        ));

        std::fs::write(&json, "{ not json").unwrap();
        assert!(matches!(Config::load(&json), Err(Error::Serialization(_))));

        std::fs::write(&path, "[run\nthreads = ").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }
}
