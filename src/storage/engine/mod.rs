//! 计划持久化后端
//!
//! 计划存储的每次变更都会同步写入后端；启动时从后端恢复全部条目。
//! 后端负责布局版本检查与升级，调用方看到的永远是当前版本的记录。

use crate::core::error::StorageResult;
use crate::core::types::Fingerprint;
use crate::storage::layout::StoredPlan;

pub mod memory_engine;
#[cfg(feature = "redb")]
pub mod redb_engine;

pub use memory_engine::MemoryPlanBackend;
#[cfg(feature = "redb")]
pub use redb_engine::RedbPlanBackend;

/// 批量写操作
#[derive(Debug, Clone)]
pub enum Operation {
    Put(StoredPlan),
    Delete(Fingerprint),
}

pub trait PlanBackend: Send + Sync {
    /// 读取全部计划记录
    fn load_all(&self) -> StorageResult<Vec<StoredPlan>>;
    fn put(&self, plan: &StoredPlan) -> StorageResult<()>;
    fn delete(&self, fingerprint: Fingerprint) -> StorageResult<()>;
    /// 原子地执行一组写操作
    fn batch(&self, ops: Vec<Operation>) -> StorageResult<()>;
    /// 已安装的布局版本
    fn layout_version(&self) -> StorageResult<u32>;
    /// 已安装的管理接口定义（规范化文本）
    fn surface(&self) -> StorageResult<String>;
    fn name(&self) -> &'static str;
}
