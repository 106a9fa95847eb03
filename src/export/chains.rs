//! In-memory export target and its serializable form

use super::{CacheExporterRecord, CacheExporterTarget, ExporterId};
use crate::artifact::{Descriptor, Remote};
use crate::digest::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Artifact reference attached to an exported node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainResult {
    pub vtx: Digest,
    pub output: usize,
    pub created_at: DateTime<Utc>,
    pub remote: Remote,
}

/// Incoming edge of an exported node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainLink {
    /// Emission index of the source node
    pub source: usize,
    pub selector: String,
}

#[derive(Debug)]
struct ChainItem {
    digest: Digest,
    results: Vec<ChainResult>,
    links: Vec<Vec<ChainLink>>,
}

/// Handle to one node of a `CacheChains`
#[derive(Debug, Clone)]
pub struct ChainRecord {
    index: usize,
    item: Arc<Mutex<ChainItem>>,
}

impl ChainRecord {
    fn item(&self) -> MutexGuard<'_, ChainItem> {
        self.item.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Position in emission order
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn results(&self) -> Vec<ChainResult> {
        self.item().results.clone()
    }

    /// Incoming edges per input slot
    pub fn links(&self) -> Vec<Vec<ChainLink>> {
        self.item().links.clone()
    }
}

impl CacheExporterRecord for ChainRecord {
    fn digest(&self) -> Digest {
        self.item().digest.clone()
    }

    fn add_result(&self, vtx: &Digest, index: usize, created_at: DateTime<Utc>, remote: &Remote) {
        let mut item = self.item();
        let duplicate = item
            .results
            .iter()
            .any(|r| r.vtx == *vtx && r.output == index && r.remote == *remote);
        if !duplicate {
            item.results.push(ChainResult {
                vtx: vtx.clone(),
                output: index,
                created_at,
                remote: remote.clone(),
            });
        }
    }

    fn link_from(&self, src: &Self, index: usize, selector: &str) {
        let link = ChainLink {
            source: src.index,
            selector: selector.to_string(),
        };
        let mut item = self.item();
        if item.links.len() <= index {
            item.links.resize_with(index + 1, Vec::new);
        }
        let slot = &mut item.links[index];
        if !slot.contains(&link) {
            slot.push(link);
        }
    }
}

/// Export target collecting a deduplicated cache graph
#[derive(Debug, Default)]
pub struct CacheChains {
    items: Vec<ChainRecord>,
    by_digest: HashMap<Digest, usize>,
    visited: HashSet<ExporterId>,
    exported: HashMap<ExporterId, Vec<ChainRecord>>,
}

impl CacheChains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Nodes in emission order
    pub fn records(&self) -> &[ChainRecord] {
        &self.items
    }

    pub fn get(&self, digest: &Digest) -> Option<&ChainRecord> {
        self.by_digest.get(digest).map(|&i| &self.items[i])
    }

    /// Flatten the collected graph into its serializable form
    pub fn marshal(&self) -> CacheConfig {
        let mut layers = LayerTable::default();
        let records = self
            .items
            .iter()
            .map(|record| {
                let item = record.item();
                let results = item
                    .results
                    .iter()
                    .filter_map(|res| {
                        layers.add_remote(&res.remote).map(|layer| ConfigResult {
                            layer,
                            created_at: res.created_at,
                        })
                    })
                    .collect();
                let inputs = item
                    .links
                    .iter()
                    .map(|slot| {
                        slot.iter()
                            .map(|l| ConfigInput {
                                selector: l.selector.clone(),
                                link: l.source,
                            })
                            .collect()
                    })
                    .collect();
                ConfigRecord {
                    digest: item.digest.clone(),
                    results,
                    inputs,
                }
            })
            .collect();

        CacheConfig {
            layers: layers.layers,
            records,
        }
    }
}

impl CacheExporterTarget for CacheChains {
    type Record = ChainRecord;

    fn add(&mut self, digest: &Digest) -> ChainRecord {
        if let Some(&index) = self.by_digest.get(digest) {
            return self.items[index].clone();
        }
        let record = ChainRecord {
            index: self.items.len(),
            item: Arc::new(Mutex::new(ChainItem {
                digest: digest.clone(),
                results: Vec::new(),
                links: Vec::new(),
            })),
        };
        self.by_digest.insert(digest.clone(), record.index);
        self.items.push(record.clone());
        record
    }

    fn visit(&mut self, id: ExporterId) {
        self.visited.insert(id);
    }

    fn visited(&self, id: ExporterId) -> bool {
        self.visited.contains(&id)
    }

    fn set_records(&mut self, id: ExporterId, records: Vec<ChainRecord>) {
        self.exported.insert(id, records);
    }

    fn records_for(&self, id: ExporterId) -> Option<Vec<ChainRecord>> {
        self.exported.get(&id).cloned()
    }
}

/// Layers keyed by blob and parent, so shared blobs on different bases stay apart
#[derive(Default)]
struct LayerTable {
    layers: Vec<CacheLayer>,
    by_chain: HashMap<(Digest, Option<usize>), usize>,
}

impl LayerTable {
    /// Register a remote's chain; returns the index of its top layer
    fn add_remote(&mut self, remote: &Remote) -> Option<usize> {
        let mut parent = None;
        for desc in &remote.descriptors {
            parent = Some(self.add(desc, parent));
        }
        parent
    }

    fn add(&mut self, desc: &Descriptor, parent: Option<usize>) -> usize {
        let chain = (desc.digest.clone(), parent);
        if let Some(&index) = self.by_chain.get(&chain) {
            return index;
        }
        let index = self.layers.len();
        self.layers.push(CacheLayer {
            blob: desc.digest.clone(),
            media_type: desc.media_type.clone(),
            size: desc.size,
            parent,
            annotations: desc.annotations.clone(),
        });
        self.by_chain.insert(chain, index);
        index
    }
}

/// Serialized cache graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub layers: Vec<CacheLayer>,
    #[serde(default)]
    pub records: Vec<ConfigRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLayer {
    pub blob: Digest,
    pub media_type: String,
    pub size: u64,
    /// Index of the layer this one is stacked on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub digest: Digest,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ConfigResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Vec<ConfigInput>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResult {
    pub layer: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigInput {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
    pub link: usize,
}

/// Counts describing a `CacheConfig`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheConfigSummary {
    pub records: usize,
    pub layers: usize,
    pub results: usize,
    pub links: usize,
    /// Records without any incoming edge
    pub roots: usize,
}

impl CacheConfig {
    pub fn summary(&self) -> CacheConfigSummary {
        CacheConfigSummary {
            records: self.records.len(),
            layers: self.layers.len(),
            results: self.records.iter().map(|r| r.results.len()).sum(),
            links: self
                .records
                .iter()
                .flat_map(|r| &r.inputs)
                .map(Vec::len)
                .sum(),
            roots: self
                .records
                .iter()
                .filter(|r| r.inputs.iter().all(Vec::is_empty))
                .count(),
        }
    }
}
