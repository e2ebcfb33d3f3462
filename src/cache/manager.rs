//! 计划缓存管理器
//!
//! 把计划存储与依赖追踪组合成一个整体：发布新条目（插入 + 登记依赖）、
//! 对象变更通知、整体清理都在这里完成，保证两者的状态不会分叉。

use std::sync::Arc;

use crate::cache::dependency::{DependencyTracker, Invalidation, PlanningTicket};
use crate::cache::entry::{plan_hash, DependencySet};
use crate::cache::stats_collector::{CacheStats, CacheStatsCollector};
use crate::cache::store::{InsertOutcome, PlanStore};
use crate::config::Config;
use crate::core::error::{CacheFault, PlanCacheResult, StorageResult};
use crate::core::types::{Fingerprint, ObjectId};
use crate::storage::engine::{MemoryPlanBackend, PlanBackend};

/// 发布结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// 新条目已写入并登记依赖
    Stored,
    /// 同一指纹上已有等价的有效计划
    Duplicate,
    /// 规划期间依赖对象发生过变更，计划可能已过期，不写入
    StaleDependencies,
    /// 容量已满且没有可淘汰的条目
    CapacityExhausted,
}

/// 计划缓存
pub struct PlanCache {
    store: Arc<PlanStore>,
    tracker: DependencyTracker,
    stats: CacheStatsCollector,
}

impl PlanCache {
    /// 打开缓存：恢复存储内容并重建依赖索引
    pub fn open(backend: Arc<dyn PlanBackend>, capacity: Option<usize>) -> StorageResult<Self> {
        let store = Arc::new(PlanStore::open(backend, capacity)?);
        let tracker = DependencyTracker::new(Arc::clone(&store));
        tracker.rebuild();
        Ok(Self {
            store,
            tracker,
            stats: CacheStatsCollector::new(),
        })
    }

    pub fn in_memory() -> Self {
        let store = Arc::new(PlanStore::in_memory());
        Self {
            tracker: DependencyTracker::new(Arc::clone(&store)),
            store,
            stats: CacheStatsCollector::new(),
        }
    }

    /// 按配置打开缓存
    ///
    /// `storage_path` 为空时使用内存后端。
    pub fn from_config(config: &Config) -> PlanCacheResult<Self> {
        let backend: Arc<dyn PlanBackend> = if config.storage_path.is_empty() {
            Arc::new(MemoryPlanBackend::new())
        } else {
            open_file_backend(&config.storage_path)?
        };
        Ok(Self::open(backend, config.capacity)?)
    }

    pub fn store(&self) -> &Arc<PlanStore> {
        &self.store
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    pub(crate) fn collector(&self) -> &CacheStatsCollector {
        &self.stats
    }

    /// 当前对象变更纪元，仅用于诊断
    pub fn epoch(&self) -> u64 {
        self.tracker.epoch()
    }

    /// 开始一次规划，票据的纪元在发布时传回
    ///
    /// 票据必须存活到发布结束，否则规划期间的对象变更可能已被丢弃。
    pub fn begin_planning(&self) -> PlanningTicket<'_> {
        self.tracker.begin_planning()
    }

    /// 发布新计划：写入存储并登记依赖
    ///
    /// 整个过程持有依赖索引写锁，对象变更通知不会插在插入与登记之间。
    /// 依赖中含无效对象时在改动存储之前拒绝，同一指纹上的旧计划保持不变。
    pub fn publish(
        &self,
        key: Fingerprint,
        payload: Vec<u8>,
        dependencies: DependencySet,
        query_text: &str,
        planned_at: u64,
    ) -> PlanCacheResult<PublishOutcome> {
        dependencies.check_objects(key)?;
        let mut index = self.tracker.lock_index();

        if index.changed_since(&dependencies, planned_at) {
            log::debug!("规划期间依赖对象已变更，放弃写入 {}", key);
            return Ok(PublishOutcome::StaleDependencies);
        }

        if let Some(existing) = self.store.lookup(key) {
            if existing.is_valid() {
                if existing.metadata().plan_hash == plan_hash(&payload) {
                    return Ok(PublishOutcome::Duplicate);
                }
                let conflict = CacheFault::ConcurrentWriteConflict(key);
                log::debug!("{}，以本次写入为准", conflict);
                self.stats.record_fault(conflict.kind());
            }
        }

        match self
            .store
            .insert_or_replace(key, payload, dependencies.clone(), query_text)?
        {
            InsertOutcome::Rejected => return Ok(PublishOutcome::CapacityExhausted),
            InsertOutcome::Inserted {
                evicted: Some(victim),
            } => {
                index.unregister(victim);
                self.stats.record_eviction();
            }
            InsertOutcome::Inserted { evicted: None } | InsertOutcome::Replaced { .. } => {}
        }

        if let Err(fault) = index.register(key, &dependencies) {
            index.unregister(key);
            if let Err(e) = self.store.invalidate(key) {
                log::error!("使条目 {} 失效时持久化失败: {}", key, e);
            }
            return Err(fault.into());
        }

        Ok(PublishOutcome::Stored)
    }

    /// 目录对象变更通知，返回时所有受影响条目均已失效
    pub fn on_object_changed(&self, object: ObjectId) -> StorageResult<Vec<Fingerprint>> {
        self.invalidate_dependents(object).into_result()
    }

    /// 目录对象变更通知，持久化失败时仍返回内存中已失效的指纹
    pub fn invalidate_dependents(&self, object: ObjectId) -> Invalidation {
        let invalidation = self.tracker.invalidate_dependents(object);
        self.stats.record_invalidations(invalidation.keys.len() as u64);
        invalidation
    }

    pub fn on_objects_changed<I>(&self, objects: I) -> StorageResult<Vec<Fingerprint>>
    where
        I: IntoIterator<Item = ObjectId>,
    {
        let invalidated = self.tracker.on_objects_changed(objects)?;
        self.stats.record_invalidations(invalidated.len() as u64);
        Ok(invalidated)
    }

    /// 使单个条目失效
    pub fn invalidate(&self, key: Fingerprint) -> StorageResult<bool> {
        let mut index = self.tracker.lock_index();
        index.unregister(key);
        let changed = self.store.invalidate(key)?;
        if changed {
            self.stats.record_invalidations(1);
        }
        Ok(changed)
    }

    /// 使全部条目失效
    pub fn invalidate_all(&self) -> StorageResult<usize> {
        let mut index = self.tracker.lock_index();
        index.clear();
        let count = self.store.invalidate_all()?;
        self.stats.record_invalidations(count as u64);
        Ok(count)
    }

    /// 删除单个条目
    pub fn delete(&self, key: Fingerprint) -> StorageResult<bool> {
        let mut index = self.tracker.lock_index();
        index.unregister(key);
        Ok(self.store.delete(key)?.is_some())
    }

    /// 删除全部条目
    pub fn purge(&self) -> StorageResult<usize> {
        let mut index = self.tracker.lock_index();
        index.clear();
        self.store.purge()
    }

    /// 删除全部失效条目
    pub fn purge_invalid(&self) -> StorageResult<usize> {
        self.store.purge_invalid()
    }

    /// 把使用计数写回后端
    pub fn checkpoint(&self) -> StorageResult<usize> {
        self.store.checkpoint()
    }
}

#[cfg(feature = "redb")]
fn open_file_backend(path: &str) -> PlanCacheResult<Arc<dyn PlanBackend>> {
    Ok(Arc::new(crate::storage::engine::RedbPlanBackend::open(path)?))
}

#[cfg(not(feature = "redb"))]
fn open_file_backend(path: &str) -> PlanCacheResult<Arc<dyn PlanBackend>> {
    Err(crate::core::error::PlanCacheError::Config(format!(
        "未启用 redb 特性，无法打开持久化存储: {}",
        path
    )))
}

impl Drop for PlanCache {
    fn drop(&mut self) {
        if let Err(e) = self.store.checkpoint() {
            log::warn!("关闭计划缓存时写回使用计数失败: {}", e);
        }
    }
}

impl std::fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCache")
            .field("store", &self.store)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
