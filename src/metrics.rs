//! Cache observability counters.
//!
//! Counters are plain atomics bumped on the resolution hot paths; snapshots
//! are cheap and lock-free. `CacheStats` serializes for log shipping and
//! renders human-readable via `Display`.

use std::fmt;

use serde::Serialize;

use crate::sync::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BindMetrics {
    pub field_token_hits: AtomicU64,
    pub field_token_misses: AtomicU64,
    pub generic_instance_hits: AtomicU64,
    pub generic_instance_misses: AtomicU64,
    pub hierarchy_hits: AtomicU64,
    pub hierarchy_misses: AtomicU64,
    pub vmt_hits: AtomicU64,
    pub vmt_misses: AtomicU64,
    pub string_hits: AtomicU64,
    pub string_misses: AtomicU64,
}

impl BindMetrics {
    pub fn record_field_token(&self, hit: bool) {
        if hit {
            self.field_token_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.field_token_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_generic_instance(&self, hit: bool) {
        if hit {
            self.generic_instance_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.generic_instance_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_hierarchy(&self, hit: bool) {
        if hit {
            self.hierarchy_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hierarchy_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_vmt(&self, hit: bool) {
        if hit {
            self.vmt_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.vmt_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_string(&self, hit: bool) {
        if hit {
            self.string_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.string_misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Point-in-time view of one cache.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStat {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
}

impl CacheStat {
    pub(crate) fn new(hits: &AtomicU64, misses: &AtomicU64, size: usize) -> Self {
        let hits = hits.load(Ordering::Relaxed);
        let misses = misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        CacheStat {
            hits,
            misses,
            hit_rate,
            size,
        }
    }
}

impl fmt::Display for CacheStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hits / {} misses ({:.1}% hit rate, {} entries)",
            self.hits,
            self.misses,
            self.hit_rate * 100.0,
            self.size
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub field_token: CacheStat,
    pub generic_instance: CacheStat,
    pub hierarchy: CacheStat,
    pub virtual_dispatch: CacheStat,
    pub string: CacheStat,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "field token cache: {}", self.field_token)?;
        writeln!(f, "generic instance cache: {}", self.generic_instance)?;
        writeln!(f, "hierarchy cache: {}", self.hierarchy)?;
        writeln!(f, "virtual dispatch cache: {}", self.virtual_dispatch)?;
        write!(f, "string table: {}", self.string)
    }
}
