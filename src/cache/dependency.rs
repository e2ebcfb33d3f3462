//! 依赖追踪
//!
//! 维护"目录对象 -> 依赖它的指纹"的倒排索引。对象变更通知到达时，
//! 同步地把所有受影响的条目标记为失效，并把这些指纹移出索引。
//!
//! 索引只是派生数据，计划负载始终归计划存储所有；
//! 启动时由 `rebuild` 从存储中的有效条目重新生成。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::cache::entry::DependencySet;
use crate::cache::store::PlanStore;
use crate::core::error::{CacheFault, StorageError};
use crate::core::types::{Fingerprint, ObjectId};

/// 倒排索引
#[derive(Debug, Default)]
pub struct DependencyIndex {
    by_object: HashMap<ObjectId, BTreeSet<Fingerprint>>,
    by_key: HashMap<Fingerprint, BTreeSet<ObjectId>>,
    /// 每个对象最近一次变更时的纪元，只保留进行中的规划还可能用到的记录
    changed_at: HashMap<ObjectId, u64>,
    /// 进行中的规划：起始纪元 -> 数量
    in_flight: BTreeMap<u64, usize>,
    epoch: u64,
}

impl DependencyIndex {
    /// 登记依赖，替换同一键上的旧登记
    ///
    /// 依赖中含无效对象标识时返回错误，索引保持不变。
    pub fn register(&mut self, key: Fingerprint, deps: &DependencySet) -> Result<(), CacheFault> {
        deps.check_objects(key)?;
        let objects = deps.objects();

        self.unregister(key);
        for object in &objects {
            self.by_object.entry(*object).or_default().insert(key);
        }
        self.by_key.insert(key, objects);
        Ok(())
    }

    /// 移除某个键的全部登记
    pub fn unregister(&mut self, key: Fingerprint) {
        let Some(objects) = self.by_key.remove(&key) else {
            return;
        };
        for object in objects {
            if let Some(bucket) = self.by_object.get_mut(&object) {
                bucket.remove(&key);
                if bucket.is_empty() {
                    self.by_object.remove(&object);
                }
            }
        }
    }

    pub fn dependents(&self, object: ObjectId) -> BTreeSet<Fingerprint> {
        self.by_object.get(&object).cloned().unwrap_or_default()
    }

    pub fn dependencies_of(&self, key: Fingerprint) -> Option<&BTreeSet<ObjectId>> {
        self.by_key.get(&key)
    }

    pub fn is_registered(&self, key: Fingerprint) -> bool {
        self.by_key.contains_key(&key)
    }

    /// 当前纪元
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// 登记一次进行中的规划，返回起始纪元
    fn begin_planning(&mut self) -> u64 {
        *self.in_flight.entry(self.epoch).or_default() += 1;
        self.epoch
    }

    fn end_planning(&mut self, epoch: u64) {
        if let Some(count) = self.in_flight.get_mut(&epoch) {
            *count -= 1;
            if *count == 0 {
                self.in_flight.remove(&epoch);
            }
        }
        self.prune_changes();
    }

    /// 丢弃不晚于最早进行中规划的变更记录，没有进行中的规划时全部丢弃
    fn prune_changes(&mut self) {
        match self.in_flight.keys().next().copied() {
            Some(oldest) => self.changed_at.retain(|_, changed| *changed > oldest),
            None => self.changed_at.clear(),
        }
    }

    /// 仍保留的对象变更记录数
    pub fn tracked_changes(&self) -> usize {
        self.changed_at.len()
    }

    /// 自给定纪元以来，依赖中是否有对象发生过变更
    ///
    /// 只对仍在进行中的规划（持有 [`PlanningTicket`]）的起始纪元有意义。
    pub fn changed_since(&self, deps: &DependencySet, epoch: u64) -> bool {
        deps.iter().any(|(_, object)| {
            self.changed_at
                .get(&object)
                .is_some_and(|changed| *changed > epoch)
        })
    }

    fn record_change(&mut self, object: ObjectId) {
        self.epoch += 1;
        self.changed_at.insert(object, self.epoch);
        self.prune_changes();
    }

    /// 取出依赖某个对象的全部指纹，并把它们移出所有桶
    fn take_dependents(&mut self, object: ObjectId) -> BTreeSet<Fingerprint> {
        let keys = self.by_object.remove(&object).unwrap_or_default();
        for key in &keys {
            self.unregister(*key);
        }
        keys
    }

    pub fn clear(&mut self) {
        self.by_object.clear();
        self.by_key.clear();
    }

    pub fn object_count(&self) -> usize {
        self.by_object.len()
    }

    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }
}

/// 依赖追踪器
#[derive(Debug)]
pub struct DependencyTracker {
    store: Arc<PlanStore>,
    index: RwLock<DependencyIndex>,
}

impl DependencyTracker {
    pub fn new(store: Arc<PlanStore>) -> Self {
        Self {
            store,
            index: RwLock::new(DependencyIndex::default()),
        }
    }

    /// 从计划存储的有效条目重建索引，返回登记的条目数
    pub fn rebuild(&self) -> usize {
        let mut index = self.index.write();
        index.clear();

        let mut registered = 0;
        for (key, deps) in self.store.valid_dependencies() {
            match index.register(key, &deps) {
                Ok(()) => registered += 1,
                Err(fault) => {
                    // 没有依赖覆盖的条目不能保持有效
                    log::warn!("条目 {} 无法登记依赖，标记失效: {}", key, fault);
                    if let Err(e) = self.store.invalidate(key) {
                        log::error!("使条目 {} 失效时持久化失败: {}", key, e);
                    }
                }
            }
        }
        log::debug!("依赖索引已重建，共 {} 个条目", registered);
        registered
    }

    /// 登记依赖（幂等替换）
    pub fn register(&self, key: Fingerprint, deps: &DependencySet) -> Result<(), CacheFault> {
        self.index.write().register(key, deps)
    }

    pub fn unregister(&self, key: Fingerprint) {
        self.index.write().unregister(key);
    }

    /// 对象变更通知
    ///
    /// 返回前所有依赖该对象的条目都已标记失效。持久化失败时返回第一个错误，
    /// 需要失效指纹的调用方使用 [`invalidate_dependents`](Self::invalidate_dependents)。
    pub fn on_object_changed(&self, object: ObjectId) -> Result<Vec<Fingerprint>, StorageError> {
        self.invalidate_dependents(object).into_result()
    }

    /// 批量对象变更通知，例如一条 DDL 同时修改表及其索引
    pub fn on_objects_changed<I>(&self, objects: I) -> Result<Vec<Fingerprint>, StorageError>
    where
        I: IntoIterator<Item = ObjectId>,
    {
        let mut total = Invalidation::default();
        for object in objects {
            total.merge(self.invalidate_dependents(object));
        }
        total.into_result()
    }

    /// 使依赖某个对象的全部条目失效
    ///
    /// 某个条目的持久化失败不会中断其余条目的失效；内存中已失效的指纹
    /// 与第一个持久化错误一起返回。
    pub fn invalidate_dependents(&self, object: ObjectId) -> Invalidation {
        let mut index = self.index.write();
        index.record_change(object);
        let keys = index.take_dependents(object);

        let mut result = Invalidation::default();
        for key in keys {
            match self.store.invalidate(key) {
                Ok(true) => result.keys.push(key),
                Ok(false) => {}
                Err(e) => {
                    log::error!("使条目 {} 失效时持久化失败: {}", key, e);
                    result.keys.push(key);
                    result.error.get_or_insert(e);
                }
            }
        }

        if !result.keys.is_empty() {
            log::debug!("对象 {} 变更，{} 个计划条目失效", object, result.keys.len());
        }
        result
    }

    /// 开始一次规划
    ///
    /// 票据存活期间发生的对象变更会被保留，发布时据此判断计划是否过期。
    pub fn begin_planning(&self) -> PlanningTicket<'_> {
        let epoch = self.index.write().begin_planning();
        PlanningTicket {
            tracker: self,
            epoch,
        }
    }

    /// 仍保留的对象变更记录数
    pub fn tracked_changes(&self) -> usize {
        self.index.read().tracked_changes()
    }

    /// 依赖某个对象的指纹
    pub fn dependents(&self, object: ObjectId) -> BTreeSet<Fingerprint> {
        self.index.read().dependents(object)
    }

    pub fn is_registered(&self, key: Fingerprint) -> bool {
        self.index.read().is_registered(key)
    }

    pub fn epoch(&self) -> u64 {
        self.index.read().epoch()
    }

    /// 获取索引写锁
    ///
    /// 发布新条目与整体清理时持有该锁，与对象变更通知互斥。
    /// 加锁顺序固定为：索引锁在前，存储写锁在后。
    pub(crate) fn lock_index(&self) -> RwLockWriteGuard<'_, DependencyIndex> {
        self.index.write()
    }
}

/// 对象变更的处理结果
#[derive(Debug, Default)]
pub struct Invalidation {
    /// 内存中已经失效的指纹
    pub keys: Vec<Fingerprint>,
    /// 第一个持久化错误
    pub error: Option<StorageError>,
}

impl Invalidation {
    fn merge(&mut self, other: Invalidation) {
        self.keys.extend(other.keys);
        if let Some(e) = other.error {
            self.error.get_or_insert(e);
        }
    }

    pub fn into_result(self) -> Result<Vec<Fingerprint>, StorageError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.keys),
        }
    }
}

/// 进行中的规划
///
/// 释放时注销，最早的进行中规划决定对象变更记录保留到哪里。
#[derive(Debug)]
pub struct PlanningTicket<'a> {
    tracker: &'a DependencyTracker,
    epoch: u64,
}

impl PlanningTicket<'_> {
    /// 规划开始时的纪元
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for PlanningTicket<'_> {
    fn drop(&mut self) {
        self.tracker.index.write().end_planning(self.epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<PlanStore>, DependencyTracker) {
        let store = Arc::new(PlanStore::in_memory());
        let tracker = DependencyTracker::new(Arc::clone(&store));
        (store, tracker)
    }

    fn insert(store: &PlanStore, tracker: &DependencyTracker, key: u64, deps: DependencySet) {
        store
            .insert_or_replace(Fingerprint(key), vec![key as u8], deps.clone(), "q")
            .expect("insert should succeed");
        tracker
            .register(Fingerprint(key), &deps)
            .expect("register should succeed");
    }

    #[test]
    fn test_object_change_invalidates_all_dependents() {
        let (store, tracker) = setup();
        insert(&store, &tracker, 1, DependencySet::new().with_relation(100));
        insert(
            &store,
            &tracker,
            2,
            DependencySet::new().with_relation(100).with_index(200),
        );
        insert(&store, &tracker, 3, DependencySet::new().with_relation(300));

        let mut invalidated = tracker
            .on_object_changed(ObjectId(100))
            .expect("invalidation should succeed");
        invalidated.sort();
        assert_eq!(invalidated, vec![Fingerprint(1), Fingerprint(2)]);

        assert!(!store.lookup(Fingerprint(1)).expect("entry").is_valid());
        assert!(!store.lookup(Fingerprint(2)).expect("entry").is_valid());
        assert!(store.lookup(Fingerprint(3)).expect("entry").is_valid());

        // 失效条目的其他依赖也不再被追踪
        assert!(tracker.dependents(ObjectId(200)).is_empty());
        assert!(!tracker.is_registered(Fingerprint(2)));
    }

    #[test]
    fn test_register_is_idempotent_upsert() {
        let (store, tracker) = setup();
        insert(&store, &tracker, 1, DependencySet::new().with_relation(100));
        tracker
            .register(Fingerprint(1), &DependencySet::new().with_relation(101))
            .expect("register should succeed");
        tracker
            .register(Fingerprint(1), &DependencySet::new().with_relation(101))
            .expect("register should succeed");

        assert!(tracker.dependents(ObjectId(100)).is_empty());
        assert_eq!(
            tracker.dependents(ObjectId(101)).into_iter().collect::<Vec<_>>(),
            vec![Fingerprint(1)]
        );

        tracker
            .on_object_changed(ObjectId(100))
            .expect("invalidation should succeed");
        assert!(store.lookup(Fingerprint(1)).expect("entry").is_valid());
    }

    #[test]
    fn test_invalid_object_rejected_without_mutation() {
        let (_store, tracker) = setup();
        tracker
            .register(Fingerprint(1), &DependencySet::new().with_relation(100))
            .expect("register should succeed");

        let result = tracker.register(
            Fingerprint(1),
            &DependencySet::new().with_relation(100).with_index(0),
        );
        assert!(matches!(
            result,
            Err(CacheFault::DependencyRegistrationFault(_))
        ));
        assert!(tracker.dependents(ObjectId(100)).contains(&Fingerprint(1)));
    }

    #[test]
    fn test_rebuild_from_store() {
        let (store, tracker) = setup();
        store
            .insert_or_replace(
                Fingerprint(1),
                b"a".to_vec(),
                DependencySet::new().with_relation(100),
                "q",
            )
            .expect("insert");
        store
            .insert_or_replace(
                Fingerprint(2),
                b"b".to_vec(),
                DependencySet::new().with_relation(100),
                "q",
            )
            .expect("insert");
        store.invalidate(Fingerprint(2)).expect("invalidate");

        assert_eq!(tracker.rebuild(), 1);
        assert_eq!(
            tracker.dependents(ObjectId(100)).into_iter().collect::<Vec<_>>(),
            vec![Fingerprint(1)]
        );
    }

    #[test]
    fn test_batch_object_change() {
        let (store, tracker) = setup();
        insert(&store, &tracker, 1, DependencySet::new().with_relation(100));
        insert(&store, &tracker, 2, DependencySet::new().with_index(200));
        insert(&store, &tracker, 3, DependencySet::new().with_relation(300));

        let mut invalidated = tracker
            .on_objects_changed([ObjectId(100), ObjectId(200)])
            .expect("invalidation should succeed");
        invalidated.sort();
        assert_eq!(invalidated, vec![Fingerprint(1), Fingerprint(2)]);
        assert!(store.lookup(Fingerprint(3)).expect("entry").is_valid());
    }

    #[test]
    fn test_changed_since_epoch() {
        let (_store, tracker) = setup();
        let ticket = tracker.begin_planning();
        tracker
            .on_object_changed(ObjectId(100))
            .expect("invalidation should succeed");

        let index = tracker.lock_index();
        assert!(index.changed_since(&DependencySet::new().with_relation(100), ticket.epoch()));
        assert!(!index.changed_since(&DependencySet::new().with_relation(101), ticket.epoch()));
        assert!(!index.changed_since(&DependencySet::new().with_relation(100), index.epoch()));
        drop(index);
    }

    #[test]
    fn test_change_records_do_not_accumulate() {
        let (_store, tracker) = setup();
        for id in 1..=10_000 {
            tracker
                .on_object_changed(ObjectId(id))
                .expect("invalidation should succeed");
        }
        assert_eq!(tracker.tracked_changes(), 0);
        assert_eq!(tracker.epoch(), 10_000);
    }

    #[test]
    fn test_change_records_kept_while_planning() {
        let (_store, tracker) = setup();
        tracker
            .on_object_changed(ObjectId(1))
            .expect("invalidation should succeed");

        let older = tracker.begin_planning();
        tracker
            .on_object_changed(ObjectId(2))
            .expect("invalidation should succeed");
        let newer = tracker.begin_planning();
        tracker
            .on_object_changed(ObjectId(3))
            .expect("invalidation should succeed");

        // 只保留晚于最早进行中规划的记录
        assert_eq!(tracker.tracked_changes(), 2);
        assert!(tracker
            .lock_index()
            .changed_since(&DependencySet::new().with_relation(2), older.epoch()));

        drop(older);
        assert_eq!(tracker.tracked_changes(), 1);
        assert!(tracker
            .lock_index()
            .changed_since(&DependencySet::new().with_relation(3), newer.epoch()));

        drop(newer);
        assert_eq!(tracker.tracked_changes(), 0);
    }

    #[test]
    fn test_rebuild_invalidates_entry_with_bad_dependency() {
        let (store, tracker) = setup();
        store
            .insert_or_replace(
                Fingerprint(1),
                b"a".to_vec(),
                DependencySet::new().with_relation(100).with_relation(0),
                "q",
            )
            .expect("insert");
        store
            .insert_or_replace(
                Fingerprint(2),
                b"b".to_vec(),
                DependencySet::new().with_relation(100),
                "q",
            )
            .expect("insert");

        assert_eq!(tracker.rebuild(), 1);
        assert!(!store.lookup(Fingerprint(1)).expect("entry").is_valid());
        assert!(!tracker.is_registered(Fingerprint(1)));
        assert!(store.lookup(Fingerprint(2)).expect("entry").is_valid());
    }
}
