//! Cache records and the record selection order
//!
//! A `CacheRecord` is a concrete result registered against a key. When a key
//! has several records, the best one is the first after sorting with
//! [`compare_cache_record`].

use crate::key::CacheKey;
use crate::manager::CacheManager;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Weak};

/// A stored result bound to a key
///
/// Fields are fixed once the record is shared. The manager and key are
/// non-owning references used for lookup only.
pub struct CacheRecord {
    /// Backend-local result id
    pub id: String,
    /// Byte size of the result (0 when unknown)
    pub size: u64,
    /// When the result was materialized
    pub created_at: DateTime<Utc>,
    /// Lower values win when timestamps tie
    pub priority: i64,
    manager: Weak<CacheManager>,
    key: Weak<CacheKey>,
}

impl CacheRecord {
    /// Create an unbound record
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            size: 0,
            created_at,
            priority: 0,
            manager: Weak::new(),
            key: Weak::new(),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Attach the owning manager and key
    pub fn bind(mut self, manager: &Arc<CacheManager>, key: &Arc<CacheKey>) -> Self {
        self.manager = Arc::downgrade(manager);
        self.key = Arc::downgrade(key);
        self
    }

    /// The manager that registered this record, if still alive
    pub fn manager(&self) -> Option<Arc<CacheManager>> {
        self.manager.upgrade()
    }

    /// The key this record satisfies, if still alive
    pub fn key(&self) -> Option<Arc<CacheKey>> {
        self.key.upgrade()
    }
}

impl fmt::Debug for CacheRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRecord")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("created_at", &self.created_at)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Order records best-candidate-first
///
/// Present records sort before absent ones, newer before older, and on equal
/// timestamps the smaller priority first. Two absent records are equal.
pub fn compare_cache_record(a: Option<&CacheRecord>, b: Option<&CacheRecord>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(a), Some(b)) => b
            .created_at
            .cmp(&a.created_at)
            .then_with(|| a.priority.cmp(&b.priority)),
    }
}

/// Pick the record that satisfies a key, if any
pub fn best_record(records: &[Arc<CacheRecord>]) -> Option<Arc<CacheRecord>> {
    records
        .iter()
        .min_by(|a, b| compare_cache_record(Some(a.as_ref()), Some(b.as_ref())))
        .cloned()
}

/// Sort records in place, best first
pub fn sort_records(records: &mut [Arc<CacheRecord>]) {
    records.sort_by(|a, b| compare_cache_record(Some(a.as_ref()), Some(b.as_ref())));
}
