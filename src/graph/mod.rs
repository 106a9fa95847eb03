//! Cache graphs declared in manifest files
//!
//! `LoadedGraph::build` turns a `GraphManifest` into live cache keys backed
//! by in-memory storage, ready to be exported.

pub mod manifest;

pub use manifest::{DepSpec, GraphManifest, KeySpec, LinkSpec, ManifestFormat, ResultSpec};

use crate::digest::Digest;
use crate::error::{CacheGraphError, CacheGraphResult};
use crate::export::Exporter;
use crate::key::{CacheKey, CacheKeyWithSelector, ExportableCacheKey};
use crate::manager::CacheManager;
use crate::storage::{
    CacheInfoLink, KeyStorage, MemoryKeyStorage, MemoryResult, MemoryResultStorage,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A manifest materialized into a cache manager and exportable keys
pub struct LoadedGraph {
    manager: Arc<CacheManager>,
    keys: Arc<MemoryKeyStorage>,
    results: Arc<MemoryResultStorage>,
    exporters: HashMap<String, ExportableCacheKey>,
    order: Vec<String>,
}

impl LoadedGraph {
    /// Build every key of `manifest` in declaration order
    ///
    /// Keys are registered under their content digest, so backend edges can
    /// be traced back to digests during export.
    pub async fn build(
        manifest: &GraphManifest,
        manager_id: &str,
        priority: i64,
    ) -> CacheGraphResult<Self> {
        let keys = Arc::new(MemoryKeyStorage::new());
        let results = Arc::new(MemoryResultStorage::new());
        let manager =
            CacheManager::with_priority(manager_id, priority, keys.clone(), results.clone());

        let mut graph = Self {
            manager,
            keys,
            results,
            exporters: HashMap::new(),
            order: Vec::new(),
        };
        for spec in &manifest.keys {
            graph.add_key(spec).await?;
        }

        for result_id in &manifest.released {
            graph.manager.release(result_id).await?;
            debug!("Released result {}", result_id);
        }

        info!(
            "Built graph with {} key(s) in manager {}",
            graph.order.len(),
            graph.manager.id()
        );
        Ok(graph)
    }

    async fn add_key(&mut self, spec: &KeySpec) -> CacheGraphResult<()> {
        let deps = spec
            .deps
            .iter()
            .map(|alternatives| {
                alternatives
                    .iter()
                    .map(|dep| {
                        self.exporter(&dep.key)
                            .map(|key| CacheKeyWithSelector::new(key.clone(), dep.selector.clone()))
                    })
                    .collect::<CacheGraphResult<Vec<_>>>()
            })
            .collect::<CacheGraphResult<Vec<_>>>()?;

        let vtx = Digest::from_bytes(&spec.vtx);
        let digest = CacheKey::compute_digest(&vtx, spec.output, &deps);
        let key = Arc::new(CacheKey::new(&spec.id, digest, vtx, spec.output, deps));
        key.register(&self.manager, key.digest().as_str());
        let local_id = self.manager.local_id(&key);

        let mut records = Vec::with_capacity(spec.results.len());
        for res in &spec.results {
            let record = self
                .manager
                .save(&key, Arc::new(MemoryResult::new(&res.id, res.size)), res.created_at)
                .await?;
            self.results.set_remotes(&res.id, res.remotes.clone())?;
            records.push(record);
        }

        for (input, alternatives) in key.deps().iter().enumerate() {
            for dep in alternatives {
                let link = CacheInfoLink {
                    input,
                    output: key.output(),
                    digest: key.vtx().clone(),
                    selector: dep.selector.clone(),
                };
                let dep_id = self.manager.local_id(&dep.key.key);
                self.keys.add_link(&dep_id, link, &local_id).await?;
            }
        }

        for extra in &spec.extra_links {
            let source = Digest::from_bytes(&extra.source);
            let link = CacheInfoLink {
                input: extra.input,
                output: key.output(),
                digest: key.vtx().clone(),
                selector: extra.selector.clone(),
            };
            self.keys.add_link(source.as_str(), link, &local_id).await?;
        }

        debug!(
            "Added key {} ({}) with {} result(s)",
            spec.id,
            key.digest(),
            records.len()
        );
        self.exporters
            .insert(spec.id.clone(), ExportableCacheKey::new(Exporter::new(key, records)));
        self.order.push(spec.id.clone());
        Ok(())
    }

    /// The exportable key declared as `id`
    pub fn exporter(&self, id: &str) -> CacheGraphResult<&ExportableCacheKey> {
        self.exporters
            .get(id)
            .ok_or_else(|| CacheGraphError::not_found(format!("key '{}'", id)))
    }

    /// Key ids in declaration order
    pub fn key_ids(&self) -> &[String] {
        &self.order
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    pub fn key_storage(&self) -> &Arc<MemoryKeyStorage> {
        &self.keys
    }

    pub fn result_storage(&self) -> &Arc<MemoryResultStorage> {
        &self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::SessionGroup;
    use crate::context::Context;
    use crate::export::{CacheChains, CacheExportMode, CacheExportOpt};
    use std::path::Path;

    const MANIFEST: &str = r#"
[[keys]]
id = "base"
vtx = "image:alpine"

[[keys.results]]
id = "res-base"
created_at = "2024-01-01T00:00:00Z"

[[keys.results.remotes]]
descriptors = [
  { media_type = "application/vnd.oci.image.layer.v1.tar+gzip", digest = "sha256:aaaa", size = 10 },
]

[[keys]]
id = "app"
vtx = "exec:make"
deps = [[{ key = "base", selector = "/out" }]]
extra_links = [{ source = "previous-base", input = 0, selector = "/old" }]

[[keys.results]]
id = "res-app"
created_at = "2024-01-02T00:00:00Z"

[[keys.results.remotes]]
descriptors = [
  { media_type = "application/vnd.oci.image.layer.v1.tar+gzip", digest = "sha256:aaaa", size = 10 },
  { media_type = "application/vnd.oci.image.layer.v1.tar+gzip", digest = "sha256:bbbb", size = 20 },
]
"#;

    async fn build(content: &str) -> LoadedGraph {
        let manifest =
            GraphManifest::parse(content, ManifestFormat::Toml, Path::new("graph.toml")).unwrap();
        LoadedGraph::build(&manifest, "local", 0).await.unwrap()
    }

    fn max_opt() -> CacheExportOpt {
        CacheExportOpt {
            mode: CacheExportMode::Max,
            session: Some(SessionGroup::local()),
            export_roots: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn builds_keys_and_backend_links() {
        let graph = build(MANIFEST).await;
        assert_eq!(graph.key_ids(), ["base", "app"]);

        let base = graph.exporter("base").unwrap();
        let app = graph.exporter("app").unwrap();
        assert_eq!(app.key.deps()[0][0].key.key.digest(), base.key.digest());

        let base_id = graph.manager().local_id(&base.key);
        let app_id = graph.manager().local_id(&app.key);
        assert_eq!(base_id, base.key.digest().as_str());

        let link = CacheInfoLink {
            input: 0,
            output: 0,
            digest: app.key.vtx().clone(),
            selector: "/out".to_string(),
        };
        assert!(graph.key_storage().has_link(&base_id, &link, &app_id).await);
        assert!(graph.exporter("missing").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn exports_declared_graph() {
        let graph = build(MANIFEST).await;
        let app = graph.exporter("app").unwrap();

        let mut chains = CacheChains::new();
        app.exporter
            .export_to(&Context::background(), &mut chains, &max_opt())
            .await
            .unwrap();

        let config = chains.marshal();
        let summary = config.summary();
        assert_eq!(summary.records, 3);
        assert_eq!(summary.layers, 2);
        assert_eq!(summary.results, 2);
        assert_eq!(summary.links, 2);
        assert_eq!(config.layers[1].parent, Some(0));
        assert_eq!(config.records[0].results[0].layer, 1);
    }

    #[tokio::test]
    async fn released_results_export_as_metadata() {
        let released = format!("released = [\"res-base\"]\n{}", MANIFEST);
        let graph = build(&released).await;
        let app = graph.exporter("app").unwrap();

        let mut chains = CacheChains::new();
        app.exporter
            .export_to(&Context::background(), &mut chains, &max_opt())
            .await
            .unwrap();

        let config = chains.marshal();
        assert_eq!(config.records.len(), 3);
        assert_eq!(config.records[0].results.len(), 1);
        assert!(config.records[1].results.is_empty());
    }
}
