//! Depth-first export of a key's dependency graph

use super::{CacheExportMode, CacheExportOpt, CacheExporterRecord, CacheExporterTarget};
use crate::artifact::Remote;
use crate::context::Context;
use crate::digest::Digest;
use crate::error::CacheGraphResult;
use crate::key::{CacheKey, ManagerId};
use crate::manager::CacheManager;
use crate::record::{best_record, CacheRecord};
use crate::storage::CacheInfoLink;
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity of an exporter, used for visited bookkeeping in targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExporterId(Uuid);

impl fmt::Display for ExporterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exports one key and, recursively, its dependencies
pub struct Exporter {
    id: ExporterId,
    key: Arc<CacheKey>,
    record: Option<Arc<CacheRecord>>,
    records: Vec<Arc<CacheRecord>>,
}

/// Outcome of resolving a record's content
#[derive(Debug)]
enum Resolution {
    Resolved(Vec<Remote>),
    Unresolved,
}

impl Exporter {
    /// Exporter choosing the best of `records` at export time
    pub fn new(key: Arc<CacheKey>, records: Vec<Arc<CacheRecord>>) -> Arc<Self> {
        Arc::new(Self {
            id: ExporterId(Uuid::new_v4()),
            key,
            record: None,
            records,
        })
    }

    /// Exporter bound to one specific record
    pub fn with_record(key: Arc<CacheKey>, record: Arc<CacheRecord>) -> Arc<Self> {
        Arc::new(Self {
            id: ExporterId(Uuid::new_v4()),
            key,
            record: Some(record),
            records: Vec::new(),
        })
    }

    pub fn id(&self) -> ExporterId {
        self.id
    }

    pub fn key(&self) -> &Arc<CacheKey> {
        &self.key
    }

    /// The record attached on export: the bound one, else the best candidate
    pub fn selected_record(&self) -> Option<Arc<CacheRecord>> {
        self.record.clone().or_else(|| best_record(&self.records))
    }

    /// Export this key's graph into `target`
    ///
    /// Returns every target record of the exported graph, root first. An
    /// exporter already exported into `target` returns the records of its
    /// first export. Missing results only downgrade their node to metadata;
    /// storage faults and cancellation abort the call.
    pub async fn export_to<T: CacheExporterTarget>(
        &self,
        ctx: &Context,
        target: &mut T,
        opt: &CacheExportOpt,
    ) -> CacheGraphResult<Vec<T::Record>> {
        let mut walk = ExportWalk {
            ctx,
            opt,
            target,
            backlinks: HashMap::new(),
            backlinked: Vec::new(),
        };
        let rec = walk.export(self).await?;
        let records = walk.target.records_for(self.id).unwrap_or_else(|| vec![rec]);

        info!(
            "Exported {} record(s) for key {} (mode {})",
            records.len(),
            self.key.id(),
            opt.mode
        );
        Ok(records)
    }
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exporter")
            .field("id", &self.id)
            .field("key", &self.key.id())
            .field("record", &self.record)
            .field("records", &self.records.len())
            .finish()
    }
}

/// State of one export call
struct ExportWalk<'a, T: CacheExporterTarget> {
    ctx: &'a Context,
    opt: &'a CacheExportOpt,
    target: &'a mut T,
    /// Node of each backend id whose backlinks were walked; `None` when the
    /// id has no node
    backlinks: HashMap<(ManagerId, String), Option<T::Record>>,
    /// Nodes linked from backlinks since the current key started its walk
    backlinked: Vec<T::Record>,
}

impl<'a, T: CacheExporterTarget> ExportWalk<'a, T> {
    fn export<'s>(&'s mut self, e: &'s Exporter) -> BoxFuture<'s, CacheGraphResult<T::Record>> {
        async move {
            self.ctx.check()?;

            if self.target.visited(e.id) {
                return Ok(self.target.add(e.key.digest()));
            }
            self.target.visit(e.id);

            let key = &e.key;
            let deps = key.deps();

            let rec = self.target.add(key.digest());
            debug!("Exporting key {} as {}", key.id(), key.digest());

            let record = e.selected_record();
            let attach = !deps.is_empty() || self.opt.export_roots;
            if !attach {
                debug!("Not attaching results to root key {}", key.id());
            }
            if let Some(record) = record.as_ref().filter(|_| attach) {
                match resolve(self.ctx, self.opt, key, record).await? {
                    Resolution::Resolved(remotes) => {
                        debug!(
                            "Attaching {} remote(s) of result {} to {}",
                            remotes.len(),
                            record.id,
                            key.id()
                        );
                        for remote in &remotes {
                            rec.add_result(key.vtx(), key.output(), record.created_at, remote);
                        }
                    }
                    Resolution::Unresolved => {
                        debug!("Result {} of {} exported without content", record.id, key.id());
                    }
                }
            }

            let mut records = vec![rec.clone()];
            let mut linked = HashSet::new();
            for (index, alternatives) in deps.iter().enumerate() {
                for dep in alternatives {
                    linked.insert((index, dep.key.key.digest().clone()));
                    let src = self.export(&dep.key.exporter).await?;
                    rec.link_from(&src, index, &dep.selector);
                    let dep_records = self.target.records_for(dep.key.exporter.id);
                    records.extend(dep_records.unwrap_or_else(|| vec![src]));
                }
            }

            if !self.opt.ignore_backlinks {
                let mark = self.backlinked.len();
                for (cm, local_id) in key.registrations() {
                    self.export_backlinks(cm, local_id, Some(rec.clone()), linked.clone())
                        .await?;
                }
                records.extend(self.backlinked.drain(mark..));
            }

            let mut seen = HashSet::new();
            records.retain(|r| seen.insert(r.digest()));
            self.target.set_records(e.id, records);

            Ok(rec)
        }
        .boxed()
    }

    /// Link the backend-known sources of `id` in `cm`, following them
    /// transitively
    ///
    /// `rec` is the node `id` is exported as; other ids get a node when they
    /// parse as a digest. Edges in `linked` are already part of the graph.
    /// Returns the node of `id`, if it has one.
    fn export_backlinks<'s>(
        &'s mut self,
        cm: Arc<CacheManager>,
        id: String,
        rec: Option<T::Record>,
        linked: HashSet<(usize, Digest)>,
    ) -> BoxFuture<'s, CacheGraphResult<Option<T::Record>>> {
        async move {
            let memo = (cm.id().clone(), id.clone());
            if rec.is_none() {
                if let Some(done) = self.backlinks.get(&memo) {
                    return Ok(done.clone());
                }
            }

            let rec = match rec {
                Some(rec) => rec,
                None => match Digest::parse(&id) {
                    Ok(digest) => {
                        let rec = self.target.add(&digest);
                        self.backlinked.push(rec.clone());
                        rec
                    }
                    Err(_) => {
                        debug!("Backlink source {} is not a digest", id);
                        self.backlinks.insert(memo, None);
                        return Ok(None);
                    }
                },
            };
            self.backlinks.insert(memo, Some(rec.clone()));

            let mut sources: Vec<(String, CacheInfoLink)> = Vec::new();
            let walked = self
                .ctx
                .run(cm.backend().walk_backlinks(self.ctx, &id, &mut |src, link| {
                    sources.push((src.to_string(), link.clone()));
                    Ok(())
                }))
                .await;

            match walked {
                Ok(()) => {}
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    warn!("Skipping backlinks of {} in {}: {}", id, cm.id(), err);
                    sources.clear();
                }
            }

            for (source, link) in sources {
                if let Ok(digest) = Digest::parse(&source) {
                    if linked.contains(&(link.input, digest)) {
                        continue;
                    }
                }
                let src = match self.backlinks.get(&(cm.id().clone(), source.clone())) {
                    Some(done) => done.clone(),
                    None => {
                        self.export_backlinks(cm.clone(), source, None, HashSet::new())
                            .await?
                    }
                };
                if let Some(src) = src {
                    rec.link_from(&src, link.input, &link.selector);
                }
            }

            Ok(Some(rec))
        }
        .boxed()
    }
}

/// Resolve the remotes of `record`, treating missing content as unresolved
async fn resolve(
    ctx: &Context,
    opt: &CacheExportOpt,
    key: &CacheKey,
    record: &CacheRecord,
) -> CacheGraphResult<Resolution> {
    if opt.mode == CacheExportMode::Min {
        return Ok(Resolution::Unresolved);
    }
    let Some(session) = &opt.session else {
        return Ok(Resolution::Unresolved);
    };
    let Some(cm) = record.manager() else {
        debug!("Manager of result {} is gone", record.id);
        return Ok(Resolution::Unresolved);
    };

    let local_id = cm.local_id(key);
    let res = match ctx.run(cm.backend().load(ctx, &local_id, &record.id)).await {
        Ok(res) => res,
        Err(err) if err.is_not_found() => {
            debug!("Result {} of {} no longer exists", record.id, local_id);
            return Ok(Resolution::Unresolved);
        }
        Err(err) => return Err(err),
    };

    let mut remotes = match ctx
        .run(cm.results().load_remotes(ctx, &res, opt.compression.as_ref(), session))
        .await
    {
        Ok(remotes) => remotes,
        Err(err) if err.is_not_found() => return Ok(Resolution::Unresolved),
        Err(err) => return Err(err),
    };

    if remotes.is_empty() || opt.compression.is_some() {
        if let Some(resolve_remotes) = &opt.resolve_remotes {
            match ctx.run(cm.results().load(ctx, &res)).await {
                Ok(result) => {
                    let resolved = match ctx.run(resolve_remotes(ctx.clone(), result)).await {
                        Ok(resolved) => resolved,
                        Err(err) if err.is_not_found() => Vec::new(),
                        Err(err) => return Err(err),
                    };
                    if !resolved.is_empty() {
                        remotes = resolved;
                    }
                }
                Err(err) if err.is_not_found() => {
                    debug!("Content of result {} is gone", res.id);
                }
                Err(err) => return Err(err),
            }
        }
    }

    if remotes.is_empty() {
        Ok(Resolution::Unresolved)
    } else {
        Ok(Resolution::Resolved(remotes))
    }
}
