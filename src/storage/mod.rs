//! Storage contracts consumed by the cache core
//!
//! Two capability sets back a cache manager:
//! - `KeyStorage`: keys, their results and the link edges between keys
//! - `ResultStorage`: the result content and its transportable remotes
//!
//! Implementations own all locking; every operation must be atomic and safe
//! under concurrent callers.

pub mod memory;

pub use memory::{MemoryKeyStorage, MemoryResult, MemoryResultStorage};

use crate::artifact::{BuildResult, CacheResult, CompressionConfig, Remote, SessionGroup};
use crate::context::Context;
use crate::digest::Digest;
use crate::error::CacheGraphResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Callback receiving key ids during a walk
pub type IdVisitor<'a> = dyn FnMut(&str) -> CacheGraphResult<()> + Send + 'a;

/// Callback receiving results during a walk
pub type ResultVisitor<'a> = dyn FnMut(CacheResult) -> CacheGraphResult<()> + Send + 'a;

/// Callback receiving `(source id, link)` pairs during a backlink walk
pub type BacklinkVisitor<'a> = dyn FnMut(&str, &CacheInfoLink) -> CacheGraphResult<()> + Send + 'a;

/// Label of a dependency edge between two keys
///
/// `add_link(dep, link, key)` records that input slot `input` of `key`
/// consumes `dep` through `selector`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheInfoLink {
    /// Dependency slot of the dependent key
    pub input: usize,
    /// Output index of the dependent key
    pub output: usize,
    /// Vertex digest of the dependent key
    pub digest: Digest,
    /// Sub-output of the dependency consumed through this edge
    #[serde(default)]
    pub selector: String,
}

/// Persistence of keys, their results and link edges
#[async_trait]
pub trait KeyStorage: Send + Sync {
    /// Whether a key id is registered
    async fn exists(&self, id: &str) -> bool;

    /// Visit every registered key id, stopping at the first error
    async fn walk(&self, ctx: &Context, f: &mut IdVisitor<'_>) -> CacheGraphResult<()>;

    /// Visit every result registered under a key id
    async fn walk_results(
        &self,
        ctx: &Context,
        id: &str,
        f: &mut ResultVisitor<'_>,
    ) -> CacheGraphResult<()>;

    /// Fetch one result; fails with `NotFound` once it is gone
    async fn load(&self, ctx: &Context, id: &str, result_id: &str) -> CacheGraphResult<CacheResult>;

    /// Register a result under a key id (idempotent on id + result id)
    async fn add_result(&self, id: &str, res: CacheResult) -> CacheGraphResult<()>;

    /// Discard a result everywhere it is referenced
    async fn release(&self, result_id: &str) -> CacheGraphResult<()>;

    /// Visit every key id referencing a result id
    async fn walk_ids_by_result(
        &self,
        ctx: &Context,
        result_id: &str,
        f: &mut IdVisitor<'_>,
    ) -> CacheGraphResult<()>;

    /// Record a forward edge from key `id` to key `target`
    async fn add_link(&self, id: &str, link: CacheInfoLink, target: &str) -> CacheGraphResult<()>;

    /// Visit forward edge targets of `id`, optionally only those labelled `link`
    async fn walk_links(
        &self,
        ctx: &Context,
        id: &str,
        link: Option<&CacheInfoLink>,
        f: &mut IdVisitor<'_>,
    ) -> CacheGraphResult<()>;

    /// Whether the edge `id -link-> target` exists
    async fn has_link(&self, id: &str, link: &CacheInfoLink, target: &str) -> bool;

    /// Visit edges pointing into `id`
    async fn walk_backlinks(
        &self,
        ctx: &Context,
        id: &str,
        f: &mut BacklinkVisitor<'_>,
    ) -> CacheGraphResult<()>;
}

/// Persistence of result content and its transportable references
#[async_trait]
pub trait ResultStorage: Send + Sync {
    /// Persist a computed result
    async fn save(
        &self,
        result: Arc<dyn BuildResult>,
        created_at: DateTime<Utc>,
    ) -> CacheGraphResult<CacheResult>;

    /// Materialize a result; fails with `NotFound` when no live content backs it
    async fn load(
        &self,
        ctx: &Context,
        res: &CacheResult,
    ) -> CacheGraphResult<Arc<dyn BuildResult>>;

    /// Transportable forms of a result; empty when none exist
    async fn load_remotes(
        &self,
        ctx: &Context,
        res: &CacheResult,
        compression: Option<&CompressionConfig>,
        session: &SessionGroup,
    ) -> CacheGraphResult<Vec<Remote>>;

    /// Whether a result id is live
    async fn exists(&self, ctx: &Context, id: &str) -> bool;
}
