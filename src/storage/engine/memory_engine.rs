use super::{Operation, PlanBackend};
use crate::core::error::{StorageError, StorageResult};
use crate::core::types::Fingerprint;
use crate::storage::layout::{
    current_surface, decode_plan, encode_plan, surface_definition, upgrade_records, StoredPlan,
    LAYOUT_VERSION,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// 内存后端
///
/// 记录以编码后的字节保存，克隆共享同一份数据，
/// 可以模拟进程重启后从同一后端恢复。
#[derive(Clone)]
pub struct MemoryPlanBackend {
    state: Arc<Mutex<MemoryState>>,
}

struct MemoryState {
    plans: BTreeMap<Fingerprint, Vec<u8>>,
    layout_version: u32,
    surface: String,
}

impl MemoryPlanBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                plans: BTreeMap::new(),
                layout_version: LAYOUT_VERSION,
                surface: current_surface(),
            })),
        }
    }

    /// 从旧布局的原始记录构造，构造时完成升级
    pub fn from_layout(version: u32, raw: Vec<(Fingerprint, Vec<u8>)>) -> StorageResult<Self> {
        if surface_definition(version).is_none() {
            return Err(StorageError::UnsupportedLayout(version));
        }
        let (keys, values): (Vec<_>, Vec<_>) = raw.into_iter().unzip();
        let upgraded = upgrade_records(version, values)?;

        let mut plans = BTreeMap::new();
        for (key, mut plan) in keys.into_iter().zip(upgraded) {
            plan.fingerprint = key;
            plans.insert(key, encode_plan(&plan)?);
        }
        if version != LAYOUT_VERSION {
            log::info!(
                "内存后端已从布局版本 {} 升级到 {}，共 {} 条记录",
                version,
                LAYOUT_VERSION,
                plans.len()
            );
        }

        Ok(Self {
            state: Arc::new(Mutex::new(MemoryState {
                plans,
                layout_version: LAYOUT_VERSION,
                surface: current_surface(),
            })),
        })
    }

    pub fn len(&self) -> usize {
        self.state.lock().plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryPlanBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanBackend for MemoryPlanBackend {
    fn load_all(&self) -> StorageResult<Vec<StoredPlan>> {
        let state = self.state.lock();
        state.plans.values().map(|bytes| decode_plan(bytes)).collect()
    }

    fn put(&self, plan: &StoredPlan) -> StorageResult<()> {
        let bytes = encode_plan(plan)?;
        self.state.lock().plans.insert(plan.fingerprint, bytes);
        Ok(())
    }

    fn delete(&self, fingerprint: Fingerprint) -> StorageResult<()> {
        self.state.lock().plans.remove(&fingerprint);
        Ok(())
    }

    fn batch(&self, ops: Vec<Operation>) -> StorageResult<()> {
        // 先完成全部编码，保证要么全部生效要么都不生效
        let mut encoded = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                Operation::Put(plan) => encoded.push((plan.fingerprint, Some(encode_plan(&plan)?))),
                Operation::Delete(fingerprint) => encoded.push((fingerprint, None)),
            }
        }

        let mut state = self.state.lock();
        for (fingerprint, bytes) in encoded {
            match bytes {
                Some(bytes) => {
                    state.plans.insert(fingerprint, bytes);
                }
                None => {
                    state.plans.remove(&fingerprint);
                }
            }
        }
        Ok(())
    }

    fn layout_version(&self) -> StorageResult<u32> {
        Ok(self.state.lock().layout_version)
    }

    fn surface(&self) -> StorageResult<String> {
        Ok(self.state.lock().surface.clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
