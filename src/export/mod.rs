//! Cache graph export
//!
//! The exporter walks a key's dependency closure and writes a deduplicated
//! copy of it into a target. Targets decide what the exported graph becomes;
//! `CacheChains` collects it into a serializable `CacheConfig`.

pub mod chains;
mod exporter;

pub use chains::{
    CacheChains, CacheConfig, CacheConfigSummary, ChainLink, ChainRecord, ChainResult,
};
pub use exporter::{Exporter, ExporterId};

use crate::artifact::{BuildResult, CompressionConfig, Remote, SessionGroup};
use crate::context::Context;
use crate::digest::Digest;
use crate::error::CacheGraphResult;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Fallback used to produce remotes from a loaded result
pub type ResolveRemotesFn = Arc<
    dyn Fn(Context, Arc<dyn BuildResult>) -> BoxFuture<'static, CacheGraphResult<Vec<Remote>>>
        + Send
        + Sync,
>;

/// How much of each record is exported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheExportMode {
    /// Keys and links only
    #[default]
    Min,
    /// Keys, links and resolved remotes
    Max,
}

impl fmt::Display for CacheExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
        }
    }
}

/// Options for a single export call
#[derive(Clone, Default)]
pub struct CacheExportOpt {
    /// Called when the result storage has no usable remote for a record
    pub resolve_remotes: Option<ResolveRemotesFn>,
    pub mode: CacheExportMode,
    /// Required for any remote resolution
    pub session: Option<SessionGroup>,
    pub compression: Option<CompressionConfig>,
    /// Attach results to keys without dependencies
    pub export_roots: bool,
    /// Skip backend backlinks
    pub ignore_backlinks: bool,
}

impl fmt::Debug for CacheExportOpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheExportOpt")
            .field("resolve_remotes", &self.resolve_remotes.is_some())
            .field("mode", &self.mode)
            .field("session", &self.session)
            .field("compression", &self.compression)
            .field("export_roots", &self.export_roots)
            .field("ignore_backlinks", &self.ignore_backlinks)
            .finish()
    }
}

/// Node of an export target
///
/// Handles are cheap to clone; mutations go through the handle.
pub trait CacheExporterRecord: Clone + Send + Sync {
    /// Content digest the node was added under
    fn digest(&self) -> Digest;

    /// Attach one resolved artifact reference
    fn add_result(&self, vtx: &Digest, index: usize, created_at: DateTime<Utc>, remote: &Remote);

    /// Record an incoming dependency edge from `src` into input slot `index`
    fn link_from(&self, src: &Self, index: usize, selector: &str);
}

/// Sink receiving an exported cache graph
pub trait CacheExporterTarget: Send {
    type Record: CacheExporterRecord;

    /// Create or return the node for a content digest
    fn add(&mut self, digest: &Digest) -> Self::Record;

    /// Mark an exporter as visited in this target
    fn visit(&mut self, id: ExporterId);

    fn visited(&self, id: ExporterId) -> bool;

    /// Keep the records the first export of `id` produced
    fn set_records(&mut self, id: ExporterId, records: Vec<Self::Record>);

    /// Records kept for `id`, returned when it is exported again
    fn records_for(&self, id: ExporterId) -> Option<Vec<Self::Record>>;
}
