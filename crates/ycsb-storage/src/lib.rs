//! Storage engine adapters for ycsb-rs
//!
//! Provides:
//! - The [`StorageEngine`] contract driven by the benchmark client
//! - In-memory engines: non-transactional, locking, optimistic
//! - A persistent sled-backed engine
//! - Configuration-time engine selection

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod locking;
pub mod memory;
pub mod optimistic;
pub mod sled_engine;

pub use engine::{NoTransaction, StorageEngine};
pub use locking::{LockingEngine, LockingTxn};
pub use memory::MemoryEngine;
pub use optimistic::{OptimisticEngine, OptimisticTxn};
pub use sled_engine::SledEngine;

use ycsb_common::config::{EngineConfig, EngineKind};
use ycsb_common::error::{DbError, DbResult};

/// Code that runs against whichever engine the configuration selects
pub trait EngineVisitor {
    type Output;

    fn visit<E: StorageEngine>(self, engine: &E) -> Self::Output;
}

/// Open the configured engine and hand it to `visitor`
///
/// The engine is closed after the visitor returns.
pub fn with_engine<V: EngineVisitor>(config: &EngineConfig, visitor: V) -> DbResult<V::Output> {
    tracing::info!("Opening {:?} engine", config.kind);
    match config.kind {
        EngineKind::Memory => run(&MemoryEngine::new(), visitor),
        EngineKind::Locking => run(&LockingEngine::new(), visitor),
        EngineKind::Optimistic => run(&OptimisticEngine::new(), visitor),
        EngineKind::Sled => {
            let path = config
                .path
                .as_deref()
                .ok_or(DbError::NotSupported("sled engine needs engine.path"))?;
            let engine = SledEngine::open(path, config.preloaded, config.cache_capacity_bytes)?;
            run(&engine, visitor)
        }
    }
}

fn run<E: StorageEngine, V: EngineVisitor>(engine: &E, visitor: V) -> DbResult<V::Output> {
    let output = visitor.visit(engine);
    engine.close()?;
    Ok(output)
}
