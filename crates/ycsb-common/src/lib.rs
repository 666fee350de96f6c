//! ycsb-rs Common - Shared utilities and types
//!
//! This crate provides functionality used across the benchmark driver:
//! - Error types and the adapter status taxonomy
//! - Configuration management
//! - The abort-count metrics sink
//! - Common type definitions

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::Config;
pub use error::{DbError, DbResult, Error, Result};
pub use metrics::ClientMetrics;
pub use types::*;
