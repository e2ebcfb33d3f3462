//! 统一错误处理系统
//!
//! ## 设计理念
//!
//! 1. **分层定义**：每一层拥有自己的错误枚举
//!    - `StorageError`：持久化后端（redb / 内存）相关错误
//!    - `CacheFault`：缓存内部故障，只在缓存内部流转，绝不会让查询失败
//!    - `AdminError`：管理操作（清空、删除、查看计划）直接返回给调用方的错误
//!
//! 2. **统一接口**：`PlanCacheError` 通过 `#[from]` 汇总各层错误，
//!    `PlanCacheResult<T>` 作为统一返回类型

use thiserror::Error;

pub mod admin;
pub mod cache;
pub mod storage;

pub use admin::{AdminError, AdminResult};
pub use cache::{CacheFault, FaultKind};
pub use storage::{StorageError, StorageResult};

/// 统一的计划缓存错误类型
#[derive(Error, Debug, Clone)]
pub enum PlanCacheError {
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    #[error("缓存故障: {0}")]
    Fault(#[from] CacheFault),

    #[error("管理操作错误: {0}")]
    Admin(#[from] AdminError),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    Io(String),
}

/// 统一的结果类型
pub type PlanCacheResult<T> = Result<T, PlanCacheError>;

impl From<std::io::Error> for PlanCacheError {
    fn from(err: std::io::Error) -> Self {
        PlanCacheError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for PlanCacheError {
    fn from(err: toml::de::Error) -> Self {
        PlanCacheError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PlanCacheError {
    fn from(err: toml::ser::Error) -> Self {
        PlanCacheError::Config(err.to_string())
    }
}
