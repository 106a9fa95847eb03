//! Cache key model
//!
//! A `CacheKey` identifies a reproducible build-step output independent of
//! whether it has been computed. Keys are built bottom-up and shared as
//! `Arc<CacheKey>`; only the per-manager id map changes after construction.

use crate::digest::Digest;
use crate::export::Exporter;
use crate::manager::CacheManager;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Zero-based output index of a vertex
pub type Index = usize;

/// Identity of a cache manager, used to index `CacheKey` local ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagerId(String);

impl ManagerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key paired with the exporter that can serialize it
#[derive(Clone)]
pub struct ExportableCacheKey {
    pub key: Arc<CacheKey>,
    pub exporter: Arc<Exporter>,
}

impl ExportableCacheKey {
    pub fn new(exporter: Arc<Exporter>) -> Self {
        Self {
            key: Arc::clone(exporter.key()),
            exporter,
        }
    }
}

impl fmt::Debug for ExportableCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportableCacheKey")
            .field("key", &self.key.id())
            .field("exporter", &self.exporter.id())
            .finish()
    }
}

/// One alternative of a dependency slot
#[derive(Debug, Clone)]
pub struct CacheKeyWithSelector {
    pub key: ExportableCacheKey,
    /// Sub-output of the dependency that is consumed (empty = whole output)
    pub selector: String,
}

impl CacheKeyWithSelector {
    pub fn new(key: ExportableCacheKey, selector: impl Into<String>) -> Self {
        Self {
            key,
            selector: selector.into(),
        }
    }
}

/// Identity of a build-step output
pub struct CacheKey {
    id: String,
    digest: Digest,
    vtx: Digest,
    output: Index,
    ids: RwLock<HashMap<ManagerId, String>>,
    /// Managers holding this key, for walks that start from the key
    managers: RwLock<HashMap<ManagerId, Weak<CacheManager>>>,
    deps: Vec<Vec<CacheKeyWithSelector>>,
}

impl CacheKey {
    /// Create a key; `deps` holds positional slots of OR-alternatives
    pub fn new(
        id: impl Into<String>,
        digest: Digest,
        vtx: Digest,
        output: Index,
        deps: Vec<Vec<CacheKeyWithSelector>>,
    ) -> Self {
        Self {
            id: id.into(),
            digest,
            vtx,
            output,
            ids: RwLock::new(HashMap::new()),
            managers: RwLock::new(HashMap::new()),
            deps,
        }
    }

    /// Derive a content digest from the vertex, output and dependency digests
    ///
    /// Slot order and alternative order are part of the hash.
    pub fn compute_digest(
        vtx: &Digest,
        output: Index,
        deps: &[Vec<CacheKeyWithSelector>],
    ) -> Digest {
        let mut material = format!("vtx={}\noutput={}\n", vtx, output);
        for (slot, alternatives) in deps.iter().enumerate() {
            for dep in alternatives {
                material.push_str(&format!(
                    "dep[{}]={}#{}\n",
                    slot,
                    dep.key.key.digest(),
                    dep.selector
                ));
            }
        }
        Digest::from_bytes(material)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn vtx(&self) -> &Digest {
        &self.vtx
    }

    pub fn output(&self) -> Index {
        self.output
    }

    pub fn deps(&self) -> &[Vec<CacheKeyWithSelector>] {
        &self.deps
    }

    /// Record the local id this key has in a manager's backend
    pub fn register_id(&self, manager: &ManagerId, local_id: impl Into<String>) {
        self.ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(manager.clone(), local_id.into());
    }

    /// Record the local id this key has in `cm` and remember the manager
    pub fn register(&self, cm: &Arc<CacheManager>, local_id: impl Into<String>) {
        self.register_id(cm.id(), local_id);
        self.managers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cm.id().clone(), Arc::downgrade(cm));
    }

    /// Live managers holding this key with the key's id in each, by manager id
    pub fn registrations(&self) -> Vec<(Arc<CacheManager>, String)> {
        let mut managers: Vec<_> = self
            .managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(id, cm)| cm.upgrade().map(|cm| (id.clone(), cm)))
            .collect();
        managers.sort_by(|a, b| a.0.cmp(&b.0));
        managers
            .into_iter()
            .map(|(id, cm)| {
                let local_id = self.id_for(&id);
                (cm, local_id)
            })
            .collect()
    }

    /// Local id for `manager`, falling back to the key's own id
    pub fn id_for(&self, manager: &ManagerId) -> String {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(manager)
            .cloned()
            .unwrap_or_else(|| self.id.clone())
    }

    /// Managers this key is registered with
    pub fn managers(&self) -> Vec<ManagerId> {
        let mut managers: Vec<_> = self
            .ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        managers.sort();
        managers
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKey")
            .field("id", &self.id)
            .field("digest", &self.digest)
            .field("vtx", &self.vtx)
            .field("output", &self.output)
            .field("deps", &self.deps.len())
            .finish()
    }
}
