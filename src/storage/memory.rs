//! In-memory storage backends
//!
//! Reference implementations of `KeyStorage` and `ResultStorage`. Each
//! operation takes one mutex for its duration; walks copy what they need
//! and release the lock before invoking the caller's callback.

use super::{BacklinkVisitor, CacheInfoLink, IdVisitor, KeyStorage, ResultStorage, ResultVisitor};
use crate::artifact::{BuildResult, CacheResult, CompressionConfig, Remote, SessionGroup};
use crate::context::Context;
use crate::error::{CacheGraphError, CacheGraphResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A result that only carries its identity and size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryResult {
    pub id: String,
    pub size: u64,
}

impl MemoryResult {
    pub fn new(id: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            size,
        }
    }
}

impl BuildResult for MemoryResult {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug, Default)]
struct KeyEntry {
    results: Vec<CacheResult>,
    links: Vec<(CacheInfoLink, String)>,
}

#[derive(Debug, Default)]
struct KeyIndex {
    keys: BTreeMap<String, KeyEntry>,
    ids_by_result: HashMap<String, BTreeSet<String>>,
    backlinks: HashMap<String, Vec<(String, CacheInfoLink)>>,
}

impl KeyIndex {
    /// Forget a key that no longer carries results or edges
    fn prune(&mut self, id: &str) {
        let unused = self
            .keys
            .get(id)
            .is_some_and(|e| e.results.is_empty() && e.links.is_empty())
            && self.backlinks.get(id).is_none_or(|b| b.is_empty());
        if unused {
            self.keys.remove(id);
            debug!("Pruned key {} with no results or links", id);
        }
    }
}

/// Key storage held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryKeyStorage {
    index: Mutex<KeyIndex>,
}

impl MemoryKeyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self) -> MutexGuard<'_, KeyIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.index().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyStorage for MemoryKeyStorage {
    async fn exists(&self, id: &str) -> bool {
        self.index().keys.contains_key(id)
    }

    async fn walk(&self, ctx: &Context, f: &mut IdVisitor<'_>) -> CacheGraphResult<()> {
        let ids: Vec<String> = self.index().keys.keys().cloned().collect();
        for id in ids {
            ctx.check()?;
            f(&id)?;
        }
        Ok(())
    }

    async fn walk_results(
        &self,
        ctx: &Context,
        id: &str,
        f: &mut ResultVisitor<'_>,
    ) -> CacheGraphResult<()> {
        let results = self
            .index()
            .keys
            .get(id)
            .map(|e| e.results.clone())
            .unwrap_or_default();
        for res in results {
            ctx.check()?;
            f(res)?;
        }
        Ok(())
    }

    async fn load(
        &self,
        ctx: &Context,
        id: &str,
        result_id: &str,
    ) -> CacheGraphResult<CacheResult> {
        ctx.check()?;
        self.index()
            .keys
            .get(id)
            .and_then(|e| e.results.iter().find(|r| r.id == result_id).cloned())
            .ok_or_else(|| {
                CacheGraphError::not_found(format!("result {} of key {}", result_id, id))
            })
    }

    async fn add_result(&self, id: &str, res: CacheResult) -> CacheGraphResult<()> {
        let mut index = self.index();
        index
            .ids_by_result
            .entry(res.id.clone())
            .or_default()
            .insert(id.to_string());

        let entry = index.keys.entry(id.to_string()).or_default();
        if !entry.results.iter().any(|r| r.id == res.id) {
            debug!("Added result {} to key {}", res.id, id);
            entry.results.push(res);
        }
        Ok(())
    }

    async fn release(&self, result_id: &str) -> CacheGraphResult<()> {
        let mut index = self.index();
        let ids = index.ids_by_result.remove(result_id).unwrap_or_default();
        for id in &ids {
            if let Some(entry) = index.keys.get_mut(id) {
                entry.results.retain(|r| r.id != result_id);
            }
            index.prune(id);
        }
        debug!("Released result {} from {} key(s)", result_id, ids.len());
        Ok(())
    }

    async fn walk_ids_by_result(
        &self,
        ctx: &Context,
        result_id: &str,
        f: &mut IdVisitor<'_>,
    ) -> CacheGraphResult<()> {
        let ids: Vec<String> = self
            .index()
            .ids_by_result
            .get(result_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        for id in ids {
            ctx.check()?;
            f(&id)?;
        }
        Ok(())
    }

    async fn add_link(&self, id: &str, link: CacheInfoLink, target: &str) -> CacheGraphResult<()> {
        let mut index = self.index();
        index.keys.entry(target.to_string()).or_default();

        let entry = index.keys.entry(id.to_string()).or_default();
        if entry.links.iter().any(|(l, t)| *l == link && t == target) {
            return Ok(());
        }
        entry.links.push((link.clone(), target.to_string()));
        index
            .backlinks
            .entry(target.to_string())
            .or_default()
            .push((id.to_string(), link));
        Ok(())
    }

    async fn walk_links(
        &self,
        ctx: &Context,
        id: &str,
        link: Option<&CacheInfoLink>,
        f: &mut IdVisitor<'_>,
    ) -> CacheGraphResult<()> {
        let targets: Vec<String> = self
            .index()
            .keys
            .get(id)
            .map(|e| {
                e.links
                    .iter()
                    .filter(|(l, _)| link.is_none_or(|want| want == l))
                    .map(|(_, t)| t.clone())
                    .collect()
            })
            .unwrap_or_default();
        for target in targets {
            ctx.check()?;
            f(&target)?;
        }
        Ok(())
    }

    async fn has_link(&self, id: &str, link: &CacheInfoLink, target: &str) -> bool {
        self.index()
            .keys
            .get(id)
            .is_some_and(|e| e.links.iter().any(|(l, t)| l == link && t == target))
    }

    async fn walk_backlinks(
        &self,
        ctx: &Context,
        id: &str,
        f: &mut BacklinkVisitor<'_>,
    ) -> CacheGraphResult<()> {
        let sources = self.index().backlinks.get(id).cloned().unwrap_or_default();
        for (source, link) in sources {
            ctx.check()?;
            f(&source, &link)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct StoredResult {
    result: Arc<dyn BuildResult>,
    remotes: Vec<Remote>,
}

/// Result storage held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryResultStorage {
    results: Mutex<HashMap<String, StoredResult>>,
}

impl MemoryResultStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn results(&self) -> MutexGuard<'_, HashMap<String, StoredResult>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the transportable forms of a saved result
    pub fn set_remotes(&self, id: &str, remotes: Vec<Remote>) -> CacheGraphResult<()> {
        let mut results = self.results();
        let stored = results
            .get_mut(id)
            .ok_or_else(|| CacheGraphError::not_found(format!("result {}", id)))?;
        stored.remotes = remotes;
        Ok(())
    }

    /// Drop a result's content; returns whether it existed
    pub fn release(&self, id: &str) -> bool {
        self.results().remove(id).is_some()
    }
}

#[async_trait]
impl ResultStorage for MemoryResultStorage {
    async fn save(
        &self,
        result: Arc<dyn BuildResult>,
        created_at: DateTime<Utc>,
    ) -> CacheGraphResult<CacheResult> {
        let id = result.id();
        let mut results = self.results();
        match results.get_mut(&id) {
            Some(stored) => stored.result = result,
            None => {
                results.insert(
                    id.clone(),
                    StoredResult {
                        result,
                        remotes: Vec::new(),
                    },
                );
            }
        }
        Ok(CacheResult::new(id, created_at))
    }

    async fn load(
        &self,
        ctx: &Context,
        res: &CacheResult,
    ) -> CacheGraphResult<Arc<dyn BuildResult>> {
        ctx.check()?;
        self.results()
            .get(&res.id)
            .map(|stored| Arc::clone(&stored.result))
            .ok_or_else(|| CacheGraphError::not_found(format!("result {}", res.id)))
    }

    async fn load_remotes(
        &self,
        ctx: &Context,
        res: &CacheResult,
        compression: Option<&CompressionConfig>,
        _session: &SessionGroup,
    ) -> CacheGraphResult<Vec<Remote>> {
        ctx.check()?;
        let results = self.results();
        let stored = results
            .get(&res.id)
            .ok_or_else(|| CacheGraphError::not_found(format!("result {}", res.id)))?;

        let remotes = match compression {
            Some(cfg) if cfg.force => stored
                .remotes
                .iter()
                .filter(|r| {
                    r.top()
                        .is_some_and(|d| cfg.compression.matches_media_type(&d.media_type))
                })
                .cloned()
                .collect(),
            _ => stored.remotes.clone(),
        };
        Ok(remotes)
    }

    async fn exists(&self, _ctx: &Context, id: &str) -> bool {
        self.results().contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{CompressionType, Descriptor};
    use crate::digest::Digest;

    fn link(input: usize) -> CacheInfoLink {
        CacheInfoLink {
            input,
            output: 0,
            digest: Digest::from_bytes("exec:make"),
            selector: String::new(),
        }
    }

    fn remote(media_type: &str, data: &str) -> Remote {
        Remote::new(vec![Descriptor {
            media_type: media_type.to_string(),
            digest: Digest::from_bytes(data),
            size: data.len() as u64,
            annotations: Default::default(),
        }])
    }

    #[tokio::test]
    async fn add_result_is_idempotent() {
        let storage = MemoryKeyStorage::new();
        let ctx = Context::background();
        let res = CacheResult::new("res-1", Utc::now());

        storage.add_result("k1", res.clone()).await.unwrap();
        storage.add_result("k1", res.clone()).await.unwrap();

        let mut seen = Vec::new();
        storage
            .walk_results(&ctx, "k1", &mut |r| {
                seen.push(r.id);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["res-1"]);
        assert!(storage.exists("k1").await);
    }

    #[tokio::test]
    async fn release_makes_load_not_found() {
        let storage = MemoryKeyStorage::new();
        let ctx = Context::background();
        storage
            .add_result("k1", CacheResult::new("res-1", Utc::now()))
            .await
            .unwrap();

        assert!(storage.load(&ctx, "k1", "res-1").await.is_ok());
        storage.release("res-1").await.unwrap();

        let err = storage.load(&ctx, "k1", "res-1").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!storage.exists("k1").await);
    }

    #[tokio::test]
    async fn reverse_index_lists_all_keys() {
        let storage = MemoryKeyStorage::new();
        let ctx = Context::background();
        let res = CacheResult::new("shared", Utc::now());
        storage.add_result("k2", res.clone()).await.unwrap();
        storage.add_result("k1", res).await.unwrap();

        let mut ids = Vec::new();
        storage
            .walk_ids_by_result(&ctx, "shared", &mut |id| {
                ids.push(id.to_string());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(ids, vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn links_and_backlinks_are_two_views_of_one_edge() {
        let storage = MemoryKeyStorage::new();
        let ctx = Context::background();

        storage.add_link("dep", link(0), "app").await.unwrap();
        storage.add_link("dep", link(0), "app").await.unwrap();
        storage.add_link("dep", link(1), "other").await.unwrap();

        assert!(storage.has_link("dep", &link(0), "app").await);
        assert!(!storage.has_link("dep", &link(1), "app").await);

        let mut all = Vec::new();
        storage
            .walk_links(&ctx, "dep", None, &mut |t| {
                all.push(t.to_string());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(all, vec!["app", "other"]);

        let mut filtered = Vec::new();
        storage
            .walk_links(&ctx, "dep", Some(&link(1)), &mut |t| {
                filtered.push(t.to_string());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(filtered, vec!["other"]);

        let mut back = Vec::new();
        storage
            .walk_backlinks(&ctx, "app", &mut |src, l| {
                back.push((src.to_string(), l.input));
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(back, vec![("dep".to_string(), 0)]);
    }

    #[tokio::test]
    async fn walk_stops_at_first_error() {
        let storage = MemoryKeyStorage::new();
        let ctx = Context::background();
        for id in ["a", "b", "c"] {
            storage
                .add_result(id, CacheResult::new(format!("res-{id}"), Utc::now()))
                .await
                .unwrap();
        }

        let mut visited = 0;
        let err = storage
            .walk(&ctx, &mut |id| {
                visited += 1;
                if id == "b" {
                    return Err(CacheGraphError::backend("test", "stop"));
                }
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(visited, 2);
        assert!(matches!(err, CacheGraphError::Backend { .. }));
    }

    #[tokio::test]
    async fn walk_honours_cancellation() {
        let storage = MemoryKeyStorage::new();
        storage
            .add_result("a", CacheResult::new("res-a", Utc::now()))
            .await
            .unwrap();
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();

        let err = storage.walk(&ctx, &mut |_| Ok(())).await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn result_storage_roundtrip_and_release() {
        let storage = MemoryResultStorage::new();
        let ctx = Context::background();
        let res = storage
            .save(Arc::new(MemoryResult::new("res-1", 128)), Utc::now())
            .await
            .unwrap();

        assert!(storage.exists(&ctx, "res-1").await);
        assert_eq!(storage.load(&ctx, &res).await.unwrap().size(), 128);

        let remotes = storage
            .load_remotes(&ctx, &res, None, &SessionGroup::local())
            .await
            .unwrap();
        assert!(remotes.is_empty());

        assert!(storage.release("res-1"));
        assert!(storage.load(&ctx, &res).await.unwrap_err().is_not_found());
        assert!(storage
            .load_remotes(&ctx, &res, None, &SessionGroup::local())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn forced_compression_filters_remotes() {
        let storage = MemoryResultStorage::new();
        let ctx = Context::background();
        let res = storage
            .save(Arc::new(MemoryResult::new("res-1", 1)), Utc::now())
            .await
            .unwrap();
        storage
            .set_remotes(
                "res-1",
                vec![
                    remote("application/vnd.oci.image.layer.v1.tar+gzip", "gz"),
                    remote("application/vnd.oci.image.layer.v1.tar+zstd", "zst"),
                ],
            )
            .unwrap();

        let session = SessionGroup::local();
        let preferred = CompressionConfig::new(CompressionType::Zstd);
        let all = storage
            .load_remotes(&ctx, &res, Some(&preferred), &session)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let forced = preferred.with_force(true);
        let zstd = storage
            .load_remotes(&ctx, &res, Some(&forced), &session)
            .await
            .unwrap();
        assert_eq!(zstd.len(), 1);
        assert_eq!(zstd[0].top().unwrap().digest, Digest::from_bytes("zst"));
    }
}
