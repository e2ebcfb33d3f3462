//! 计划缓存模块
//!
//! - `store`：以指纹为键的计划存储，写入同步落到持久化后端
//! - `dependency`：目录对象到指纹的倒排索引与同步失效
//! - `manager`：存储与依赖追踪的组合，负责发布与整体清理
//! - `coordinator`：每次查询执行的查找 / 规划 / 写入状态机
//! - `modes`：全局默认值与会话覆盖
//! - `admin`：管理接口

pub mod admin;
pub mod coordinator;
pub mod dependency;
pub mod entry;
pub mod manager;
pub mod modes;
pub mod stats_collector;
pub mod store;

pub use admin::{OpaquePlan, PlanCacheAdmin, PlanFormat};
pub use coordinator::{
    CachedPlan, JsonPlanCodec, PlanCodec, PlanCoordinator, PlanOutcome, Planner, QueryRequest,
    Resolution,
};
pub use dependency::{DependencyIndex, DependencyTracker, Invalidation, PlanningTicket};
pub use entry::{DependencySet, EntryMetadata, EntryState, EntrySummary, PlanEntry};
pub use manager::{PlanCache, PublishOutcome};
pub use modes::{CacheModes, LogUsage, ModeController, SessionModes};
pub use stats_collector::{CacheStats, CacheStatsCollector};
pub use store::{InsertOutcome, PlanStore};
