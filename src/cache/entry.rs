//! 计划缓存条目
//!
//! 条目一旦发布就不再修改负载；有效性与使用计数是原子量，
//! 读者持有 `Arc<PlanEntry>` 时永远看不到写了一半的负载。

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::CacheFault;
use crate::core::murmur::{murmurhash64a, DEFAULT_SEED};
use crate::core::types::{Fingerprint, ObjectId, ObjectKind};
use crate::storage::layout::StoredPlan;

/// 依赖集合
///
/// 按对象种类分组，组内有序，序列化结果稳定。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySet {
    #[serde(default)]
    pub relations: BTreeSet<ObjectId>,
    #[serde(default)]
    pub indexes: BTreeSet<ObjectId>,
    #[serde(default)]
    pub functions: BTreeSet<ObjectId>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relation(mut self, id: impl Into<ObjectId>) -> Self {
        self.relations.insert(id.into());
        self
    }

    pub fn with_index(mut self, id: impl Into<ObjectId>) -> Self {
        self.indexes.insert(id.into());
        self
    }

    pub fn with_function(mut self, id: impl Into<ObjectId>) -> Self {
        self.functions.insert(id.into());
        self
    }

    pub fn insert(&mut self, kind: ObjectKind, id: ObjectId) {
        match kind {
            ObjectKind::Relation => self.relations.insert(id),
            ObjectKind::Index => self.indexes.insert(id),
            ObjectKind::Function => self.functions.insert(id),
        };
    }

    /// 合并另一个依赖集合
    pub fn merge(&mut self, other: &DependencySet) {
        self.relations.extend(other.relations.iter().copied());
        self.indexes.extend(other.indexes.iter().copied());
        self.functions.extend(other.functions.iter().copied());
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.relations.contains(&id) || self.indexes.contains(&id) || self.functions.contains(&id)
    }

    /// 全部对象标识（去重、有序）
    pub fn objects(&self) -> BTreeSet<ObjectId> {
        self.iter().map(|(_, id)| id).collect()
    }

    /// 校验全部对象标识有效
    pub fn check_objects(&self, key: Fingerprint) -> Result<(), CacheFault> {
        match self.iter().find(|(_, id)| !id.is_valid()) {
            Some((kind, id)) => Err(CacheFault::DependencyRegistrationFault(format!(
                "条目 {} 依赖无效的 {} 对象 {}",
                key, kind, id
            ))),
            None => Ok(()),
        }
    }

    /// 按种类遍历
    pub fn iter(&self) -> impl Iterator<Item = (ObjectKind, ObjectId)> + '_ {
        self.relations
            .iter()
            .map(|id| (ObjectKind::Relation, *id))
            .chain(self.indexes.iter().map(|id| (ObjectKind::Index, *id)))
            .chain(self.functions.iter().map(|id| (ObjectKind::Function, *id)))
    }

    pub fn len(&self) -> usize {
        self.relations.len() + self.indexes.len() + self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 依赖摘要，用于管理视图
    pub fn summary(&self) -> String {
        fn join(ids: &BTreeSet<ObjectId>) -> String {
            ids.iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",")
        }

        let mut parts = Vec::new();
        if !self.relations.is_empty() {
            parts.push(format!("relations={{{}}}", join(&self.relations)));
        }
        if !self.indexes.is_empty() {
            parts.push(format!("indexes={{{}}}", join(&self.indexes)));
        }
        if !self.functions.is_empty() {
            parts.push(format!("functions={{{}}}", join(&self.functions)));
        }
        if parts.is_empty() {
            "-".to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// 条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    Valid,
    Invalid,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::Valid => write!(f, "valid"),
            EntryState::Invalid => write!(f, "invalid"),
        }
    }
}

/// 条目元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub query_text: String,
    /// 负载哈希，用于识别相同的重新规划结果
    pub plan_hash: u64,
    pub created_at: DateTime<Utc>,
}

/// 计算计划负载哈希
pub fn plan_hash(payload: &[u8]) -> u64 {
    murmurhash64a(payload, DEFAULT_SEED)
}

/// 计划缓存条目
#[derive(Debug)]
pub struct PlanEntry {
    fingerprint: Fingerprint,
    payload: Arc<[u8]>,
    dependencies: DependencySet,
    metadata: EntryMetadata,
    valid: AtomicBool,
    usage_count: AtomicU64,
    /// 最近一次持久化时的使用计数
    persisted_usage: AtomicU64,
    /// LRU 时钟值
    last_used: AtomicU64,
}

impl PlanEntry {
    pub(crate) fn new(
        fingerprint: Fingerprint,
        payload: Vec<u8>,
        dependencies: DependencySet,
        query_text: String,
        tick: u64,
    ) -> Self {
        let metadata = EntryMetadata {
            query_text,
            plan_hash: plan_hash(&payload),
            created_at: Utc::now(),
        };
        Self {
            fingerprint,
            payload: Arc::from(payload),
            dependencies,
            metadata,
            valid: AtomicBool::new(true),
            usage_count: AtomicU64::new(0),
            persisted_usage: AtomicU64::new(0),
            last_used: AtomicU64::new(tick),
        }
    }

    /// 从持久化记录恢复
    pub(crate) fn from_stored(stored: StoredPlan, tick: u64) -> Self {
        Self {
            fingerprint: stored.fingerprint,
            payload: Arc::from(stored.payload),
            dependencies: stored.dependencies,
            metadata: EntryMetadata {
                query_text: stored.query_text,
                plan_hash: stored.plan_hash,
                created_at: stored.created_at,
            },
            valid: AtomicBool::new(stored.valid),
            usage_count: AtomicU64::new(stored.usage_count),
            persisted_usage: AtomicU64::new(stored.usage_count),
            last_used: AtomicU64::new(tick),
        }
    }

    /// 生成持久化记录
    pub(crate) fn to_stored(&self) -> StoredPlan {
        StoredPlan {
            fingerprint: self.fingerprint,
            query_text: self.metadata.query_text.clone(),
            plan_hash: self.metadata.plan_hash,
            payload: self.payload.to_vec(),
            dependencies: self.dependencies.clone(),
            valid: self.is_valid(),
            usage_count: self.usage_count(),
            created_at: self.metadata.created_at,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn dependencies(&self) -> &DependencySet {
        &self.dependencies
    }

    pub fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn state(&self) -> EntryState {
        if self.is_valid() {
            EntryState::Valid
        } else {
            EntryState::Invalid
        }
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count.load(Ordering::Relaxed)
    }

    pub(crate) fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    /// 标记失效，返回状态是否发生变化
    pub(crate) fn mark_invalid(&self) -> bool {
        self.valid.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn record_use(&self, tick: u64) {
        self.usage_count.fetch_add(1, Ordering::Relaxed);
        self.last_used.store(tick, Ordering::Relaxed);
    }

    /// 使用计数自上次持久化以来是否变化
    pub(crate) fn usage_dirty(&self) -> bool {
        self.usage_count() != self.persisted_usage.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_usage_persisted(&self, usage: u64) {
        self.persisted_usage.store(usage, Ordering::Relaxed);
    }

    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            fingerprint: self.fingerprint,
            state: self.state(),
            usage_count: self.usage_count(),
            dependencies: self.dependencies.clone(),
            query_text: self.metadata.query_text.clone(),
            plan_hash: self.metadata.plan_hash,
            created_at: self.metadata.created_at,
        }
    }
}

/// 条目摘要，`list()` 与管理视图使用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub fingerprint: Fingerprint,
    pub state: EntryState,
    pub usage_count: u64,
    pub dependencies: DependencySet,
    pub query_text: String,
    pub plan_hash: u64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_summary() {
        let deps = DependencySet::new()
            .with_relation(16384)
            .with_relation(16390)
            .with_index(16400);
        assert_eq!(deps.summary(), "relations={16384,16390} indexes={16400}");
        assert_eq!(DependencySet::new().summary(), "-");
    }

    #[test]
    fn test_dependency_objects_deduplicated() {
        let deps = DependencySet::new().with_relation(5).with_function(5).with_index(7);
        assert_eq!(deps.len(), 3);
        assert_eq!(
            deps.objects().into_iter().collect::<Vec<_>>(),
            vec![ObjectId(5), ObjectId(7)]
        );
        assert!(deps.contains(ObjectId(7)));
        assert!(!deps.contains(ObjectId(8)));
    }

    #[test]
    fn test_entry_lifecycle() {
        let entry = PlanEntry::new(
            Fingerprint(1),
            b"plan".to_vec(),
            DependencySet::new().with_relation(1),
            "SELECT 1".to_string(),
            0,
        );
        assert_eq!(entry.state(), EntryState::Valid);
        assert_eq!(entry.metadata().plan_hash, plan_hash(b"plan"));

        entry.record_use(5);
        assert_eq!(entry.usage_count(), 1);
        assert_eq!(entry.last_used(), 5);
        assert!(entry.usage_dirty());

        assert!(entry.mark_invalid());
        assert!(!entry.mark_invalid());
        assert_eq!(entry.state(), EntryState::Invalid);
    }

    #[test]
    fn test_stored_roundtrip_preserves_state() {
        let entry = PlanEntry::new(
            Fingerprint(9),
            b"payload".to_vec(),
            DependencySet::new().with_relation(3),
            "SELECT 9".to_string(),
            0,
        );
        entry.record_use(1);
        entry.mark_invalid();

        let restored = PlanEntry::from_stored(entry.to_stored(), 2);
        assert_eq!(restored.fingerprint(), Fingerprint(9));
        assert_eq!(restored.payload(), b"payload");
        assert!(!restored.is_valid());
        assert_eq!(restored.usage_count(), 1);
        assert!(!restored.usage_dirty());
    }
}
