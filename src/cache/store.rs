//! 计划存储
//!
//! 以指纹为键保存计划条目。读路径只访问 `DashMap` 分片读锁，
//! 不会被其他键的写入阻塞；写路径由存储级写锁串行化，
//! 保证同一键"最后一次提交生效"，并与持久化后端保持一致顺序。
//!
//! 条目以 `Arc` 整体替换发布，读者要么看到旧条目要么看到新条目。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::cache::entry::{DependencySet, EntrySummary, PlanEntry};
use crate::core::error::StorageResult;
use crate::core::types::Fingerprint;
use crate::storage::engine::{MemoryPlanBackend, Operation, PlanBackend};

/// 插入结果
#[derive(Debug)]
pub enum InsertOutcome {
    /// 新键插入，可能为腾出空间淘汰了另一个条目
    Inserted { evicted: Option<Fingerprint> },
    /// 覆盖了同一键上的旧条目
    Replaced { previous: Arc<PlanEntry> },
    /// 容量已满且所有条目都在使用中，本次不插入
    Rejected,
}

/// 计划存储
pub struct PlanStore {
    entries: DashMap<Fingerprint, Arc<PlanEntry>>,
    backend: Arc<dyn PlanBackend>,
    write_lock: Mutex<()>,
    capacity: Option<usize>,
    clock: AtomicU64,
}

impl PlanStore {
    /// 打开存储并从后端恢复全部条目
    pub fn open(backend: Arc<dyn PlanBackend>, capacity: Option<usize>) -> StorageResult<Self> {
        let store = Self {
            entries: DashMap::new(),
            backend,
            write_lock: Mutex::new(()),
            capacity,
            clock: AtomicU64::new(1),
        };

        let plans = store.backend.load_all()?;
        let count = plans.len();
        for plan in plans {
            let tick = store.tick();
            store
                .entries
                .insert(plan.fingerprint, Arc::new(PlanEntry::from_stored(plan, tick)));
        }
        log::info!(
            "计划存储已恢复 {} 个条目（后端: {}）",
            count,
            store.backend.name()
        );
        Ok(store)
    }

    /// 纯内存存储，不跨进程保留
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            backend: Arc::new(MemoryPlanBackend::new()),
            write_lock: Mutex::new(()),
            capacity: None,
            clock: AtomicU64::new(1),
        }
    }

    pub fn backend(&self) -> &Arc<dyn PlanBackend> {
        &self.backend
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// 按指纹查找条目，不论是否有效
    pub fn lookup(&self, key: Fingerprint) -> Option<Arc<PlanEntry>> {
        self.entries.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    /// 记录一次命中
    pub fn touch(&self, entry: &PlanEntry) {
        entry.record_use(self.tick());
    }

    /// 插入或覆盖条目
    ///
    /// 先写后端再发布到内存，后端失败时内存状态保持不变。
    pub fn insert_or_replace(
        &self,
        key: Fingerprint,
        payload: Vec<u8>,
        dependencies: DependencySet,
        query_text: impl Into<String>,
    ) -> StorageResult<InsertOutcome> {
        let _guard = self.write_lock.lock();

        let entry = Arc::new(PlanEntry::new(
            key,
            payload,
            dependencies,
            query_text.into(),
            self.tick(),
        ));
        let existing = self.lookup(key);

        let mut evicted = None;
        if existing.is_none() {
            if let Some(capacity) = self.capacity {
                if self.entries.len() >= capacity {
                    match self.pick_victim() {
                        Some(victim) => evicted = Some(victim),
                        None => {
                            log::warn!(
                                "计划存储已满（容量 {}）且所有条目都在使用中，跳过插入 {}",
                                capacity,
                                key
                            );
                            return Ok(InsertOutcome::Rejected);
                        }
                    }
                }
            }
        }

        let mut ops = Vec::with_capacity(2);
        if let Some(victim) = evicted {
            ops.push(Operation::Delete(victim));
        }
        ops.push(Operation::Put(entry.to_stored()));
        self.backend.batch(ops)?;

        if let Some(victim) = evicted {
            self.entries.remove(&victim);
            log::debug!("淘汰计划条目 {}", victim);
        }
        self.entries.insert(key, entry);

        Ok(match existing {
            Some(previous) => InsertOutcome::Replaced { previous },
            None => InsertOutcome::Inserted { evicted },
        })
    }

    /// 选择淘汰对象：优先回收失效条目，否则选最久未使用的有效条目。
    /// 正被读者持有的条目不参与淘汰。
    fn pick_victim(&self) -> Option<Fingerprint> {
        let mut invalid: Option<(u64, Fingerprint)> = None;
        let mut valid: Option<(u64, Fingerprint)> = None;

        for item in self.entries.iter() {
            let entry = item.value();
            if Arc::strong_count(entry) > 1 {
                continue;
            }
            let candidate = (entry.last_used(), *item.key());
            let slot = if entry.is_valid() {
                &mut valid
            } else {
                &mut invalid
            };
            if slot.map_or(true, |current| candidate < current) {
                *slot = Some(candidate);
            }
        }

        invalid.or(valid).map(|(_, key)| key)
    }

    /// 标记条目失效，返回是否发生了状态变化
    ///
    /// 内存标志先于持久化更新，后端写入失败时条目仍然不会再被命中。
    pub fn invalidate(&self, key: Fingerprint) -> StorageResult<bool> {
        let _guard = self.write_lock.lock();
        let Some(entry) = self.lookup(key) else {
            return Ok(false);
        };
        if !entry.mark_invalid() {
            return Ok(false);
        }
        self.backend.put(&entry.to_stored())?;
        Ok(true)
    }

    /// 标记全部条目失效，返回新失效的条目数
    pub fn invalidate_all(&self) -> StorageResult<usize> {
        let _guard = self.write_lock.lock();
        let changed: Vec<Arc<PlanEntry>> = self
            .entries
            .iter()
            .filter(|item| item.value().mark_invalid())
            .map(|item| Arc::clone(item.value()))
            .collect();

        let ops = changed
            .iter()
            .map(|entry| Operation::Put(entry.to_stored()))
            .collect();
        self.backend.batch(ops)?;
        Ok(changed.len())
    }

    /// 删除条目
    pub fn delete(&self, key: Fingerprint) -> StorageResult<Option<Arc<PlanEntry>>> {
        let _guard = self.write_lock.lock();
        if !self.entries.contains_key(&key) {
            return Ok(None);
        }
        self.backend.delete(key)?;
        Ok(self.entries.remove(&key).map(|(_, entry)| entry))
    }

    /// 删除全部条目
    pub fn purge(&self) -> StorageResult<usize> {
        let _guard = self.write_lock.lock();
        let keys: Vec<Fingerprint> = self.entries.iter().map(|item| *item.key()).collect();
        self.backend
            .batch(keys.iter().copied().map(Operation::Delete).collect())?;
        self.entries.clear();
        Ok(keys.len())
    }

    /// 删除全部失效条目
    pub fn purge_invalid(&self) -> StorageResult<usize> {
        let _guard = self.write_lock.lock();
        let keys: Vec<Fingerprint> = self
            .entries
            .iter()
            .filter(|item| !item.value().is_valid())
            .map(|item| *item.key())
            .collect();
        self.backend
            .batch(keys.iter().copied().map(Operation::Delete).collect())?;
        for key in &keys {
            self.entries.remove(key);
        }
        Ok(keys.len())
    }

    /// 条目摘要的惰性序列，顺序不保证
    pub fn list(&self) -> impl Iterator<Item = EntrySummary> + '_ {
        self.entries.iter().map(|item| item.value().summary())
    }

    /// 有效条目及其依赖，用于重建依赖索引
    pub fn valid_dependencies(&self) -> Vec<(Fingerprint, DependencySet)> {
        self.entries
            .iter()
            .filter(|item| item.value().is_valid())
            .map(|item| (*item.key(), item.value().dependencies().clone()))
            .collect()
    }

    /// 把变化过的使用计数写回后端，返回写回的条目数
    pub fn checkpoint(&self) -> StorageResult<usize> {
        let _guard = self.write_lock.lock();
        let dirty: Vec<Arc<PlanEntry>> = self
            .entries
            .iter()
            .filter(|item| item.value().usage_dirty())
            .map(|item| Arc::clone(item.value()))
            .collect();
        if dirty.is_empty() {
            return Ok(0);
        }

        let records: Vec<_> = dirty.iter().map(|entry| entry.to_stored()).collect();
        let usages: Vec<u64> = records.iter().map(|record| record.usage_count).collect();
        self.backend
            .batch(records.into_iter().map(Operation::Put).collect())?;
        for (entry, usage) in dirty.iter().zip(usages) {
            entry.mark_usage_persisted(usage);
        }
        Ok(dirty.len())
    }
}

impl std::fmt::Debug for PlanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanStore")
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("backend", &self.backend.name())
            .finish()
    }
}
