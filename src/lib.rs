//! PlanCache - 查询计划缓存核心
//!
//! 按查询指纹保存执行计划，命中时跳过规划；目录对象变更时
//! 同步使依赖它的计划失效。缓存只是优化层，内部故障从不导致查询失败。
//!
//! - `query`：查询表示、稳定指纹与缓存资格分析
//! - `cache`：计划存储、依赖追踪、模式控制、协调器与管理接口
//! - `storage`：持久化后端（内存 / redb）与存储布局
//! - `config`：TOML 配置
//! - `utils::logging`：flexi_logger 初始化与关闭

pub mod cache;
pub mod config;
pub mod core;
pub mod query;
pub mod storage;
pub mod utils;

pub use crate::cache::{
    CachedPlan, DependencySet, JsonPlanCodec, PlanCache, PlanCacheAdmin, PlanCodec,
    PlanCoordinator, Planner, QueryRequest, Resolution, SessionModes,
};
pub use crate::core::{Fingerprint, ObjectId, PlanCacheError, PlanCacheResult};
