//! 计划缓存统计收集器
//!
//! 计数器全部是原子量，热路径上不加锁；`snapshot()` 返回某一时刻的副本。

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::FaultKind;

/// 统计信息快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_stored: u64,
    pub total_bypassed: u64,
    pub total_evictions: u64,
    pub total_invalidations: u64,
    pub unsupported_faults: u64,
    pub serialization_faults: u64,
    pub dependency_faults: u64,
    pub write_conflicts: u64,
    pub storage_faults: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_hits + self.total_misses == 0 {
            0.0
        } else {
            self.total_hits as f64 / (self.total_hits + self.total_misses) as f64
        }
    }

    pub fn hit_rate_percentage(&self) -> f64 {
        self.hit_rate() * 100.0
    }

    pub fn total_faults(&self) -> u64 {
        self.unsupported_faults
            + self.serialization_faults
            + self.dependency_faults
            + self.write_conflicts
            + self.storage_faults
    }

    pub fn total_operations(&self) -> u64 {
        self.total_hits + self.total_misses + self.total_bypassed
    }
}

/// 统计收集器
#[derive(Debug, Default)]
pub struct CacheStatsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    stored: AtomicU64,
    bypassed: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    unsupported_faults: AtomicU64,
    serialization_faults: AtomicU64,
    dependency_faults: AtomicU64,
    write_conflicts: AtomicU64,
    storage_faults: AtomicU64,
}

impl CacheStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_fault(&self, kind: FaultKind) {
        let counter = match kind {
            FaultKind::UnsupportedConstruct => &self.unsupported_faults,
            FaultKind::Serialization => &self.serialization_faults,
            FaultKind::DependencyRegistration => &self.dependency_faults,
            FaultKind::ConcurrentWrite => &self.write_conflicts,
            FaultKind::Storage => &self.storage_faults,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            total_hits: self.hits.load(Ordering::Relaxed),
            total_misses: self.misses.load(Ordering::Relaxed),
            total_stored: self.stored.load(Ordering::Relaxed),
            total_bypassed: self.bypassed.load(Ordering::Relaxed),
            total_evictions: self.evictions.load(Ordering::Relaxed),
            total_invalidations: self.invalidations.load(Ordering::Relaxed),
            unsupported_faults: self.unsupported_faults.load(Ordering::Relaxed),
            serialization_faults: self.serialization_faults.load(Ordering::Relaxed),
            dependency_faults: self.dependency_faults.load(Ordering::Relaxed),
            write_conflicts: self.write_conflicts.load(Ordering::Relaxed),
            storage_faults: self.storage_faults.load(Ordering::Relaxed),
        }
    }
}
