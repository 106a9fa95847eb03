//! cachegraph - build cache provenance
//!
//! Models cache keys and the records that satisfy them, selects the best
//! record for a key, and exports a key's dependency graph as a deduplicated
//! cache configuration.

pub mod artifact;
pub mod cli;
pub mod config;
pub mod context;
pub mod digest;
pub mod error;
pub mod export;
pub mod graph;
pub mod key;
pub mod manager;
pub mod record;
pub mod storage;
pub mod ui;

pub use error::{CacheGraphError, CacheGraphResult};
