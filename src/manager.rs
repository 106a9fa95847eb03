//! Cache manager: one key storage and one result storage under an identity
//!
//! The manager adds no algorithm of its own. Its identity is what a
//! `CacheKey` indexes its backend-local ids by, so the same logical key can be
//! registered with several managers at once.

use crate::artifact::BuildResult;
use crate::context::Context;
use crate::error::CacheGraphResult;
use crate::key::{CacheKey, ManagerId};
use crate::record::{sort_records, CacheRecord};
use crate::storage::{KeyStorage, ResultStorage};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A queryable cache namespace
pub struct CacheManager {
    id: ManagerId,
    priority: i64,
    backend: Arc<dyn KeyStorage>,
    results: Arc<dyn ResultStorage>,
}

impl CacheManager {
    /// Create a manager; records it produces get priority 0
    pub fn new(
        id: impl Into<String>,
        backend: Arc<dyn KeyStorage>,
        results: Arc<dyn ResultStorage>,
    ) -> Arc<Self> {
        Self::with_priority(id, 0, backend, results)
    }

    /// Create a manager whose records carry `priority` (lower wins on ties)
    pub fn with_priority(
        id: impl Into<String>,
        priority: i64,
        backend: Arc<dyn KeyStorage>,
        results: Arc<dyn ResultStorage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ManagerId::new(id),
            priority,
            backend,
            results,
        })
    }

    pub fn id(&self) -> &ManagerId {
        &self.id
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn backend(&self) -> &Arc<dyn KeyStorage> {
        &self.backend
    }

    pub fn results(&self) -> &Arc<dyn ResultStorage> {
        &self.results
    }

    /// The id `key` is stored under in this manager's backend
    pub fn local_id(&self, key: &CacheKey) -> String {
        key.id_for(&self.id)
    }

    /// Whether the key is registered in the backend
    pub async fn exists(&self, key: &CacheKey) -> bool {
        self.backend.exists(&self.local_id(key)).await
    }

    /// Persist a result and register it against `key`
    pub async fn save(
        self: &Arc<Self>,
        key: &Arc<CacheKey>,
        result: Arc<dyn BuildResult>,
        created_at: DateTime<Utc>,
    ) -> CacheGraphResult<Arc<CacheRecord>> {
        let size = result.size();
        let res = self.results.save(result, created_at).await?;

        let local_id = self.local_id(key);
        self.backend.add_result(&local_id, res.clone()).await?;
        key.register(self, &local_id);

        debug!(
            "Saved result {} for key {} in manager {}",
            res.id, local_id, self.id
        );

        Ok(Arc::new(
            CacheRecord::new(res.id, res.created_at)
                .with_size(size)
                .with_priority(self.priority)
                .bind(self, key),
        ))
    }

    /// All records registered for `key`, best first
    pub async fn records(
        self: &Arc<Self>,
        ctx: &Context,
        key: &Arc<CacheKey>,
    ) -> CacheGraphResult<Vec<Arc<CacheRecord>>> {
        let local_id = self.local_id(key);
        let mut records = Vec::new();
        self.backend
            .walk_results(ctx, &local_id, &mut |res| {
                records.push(Arc::new(
                    CacheRecord::new(res.id, res.created_at)
                        .with_priority(self.priority)
                        .bind(self, key),
                ));
                Ok(())
            })
            .await?;
        sort_records(&mut records);
        Ok(records)
    }

    /// Materialize a record's result
    pub async fn load(
        &self,
        ctx: &Context,
        key: &CacheKey,
        record: &CacheRecord,
    ) -> CacheGraphResult<Arc<dyn BuildResult>> {
        let res = ctx
            .run(self.backend.load(ctx, &self.local_id(key), &record.id))
            .await?;
        ctx.run(self.results.load(ctx, &res)).await
    }

    /// Discard a result from the key storage
    pub async fn release(&self, result_id: &str) -> CacheGraphResult<()> {
        self.backend.release(result_id).await
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish()
    }
}
