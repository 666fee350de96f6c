//! Configuration loading

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;
use ycsb_common::config::Config;

/// Load configuration from file, apply `-p` overrides and validate
///
/// Without a file the built-in defaults are used.
pub fn load<S: AsRef<str>>(path: Option<&Path>, properties: &[S]) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => {
            debug!("No configuration file given, using defaults");
            Config::default()
        }
    };

    config
        .apply_overrides(properties)
        .context("applying property overrides")?;
    config.validate()?;
    Ok(config)
}
