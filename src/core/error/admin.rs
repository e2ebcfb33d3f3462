//! 管理操作错误类型
//!
//! 管理操作（清空缓存、删除条目、查看计划）的失败直接报告给调用方

use thiserror::Error;

use super::storage::StorageError;
use crate::core::types::Fingerprint;

/// 管理操作结果类型
pub type AdminResult<T> = Result<T, AdminError>;

/// 管理操作错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("无效参数: {0}")]
    InvalidParameter(String),
    #[error("未找到已保存的计划: {0}")]
    PlanNotFound(Fingerprint),
    #[error("计划解码失败: {0}")]
    Decode(String),
    #[error("存储操作失败: {0}")]
    Storage(#[from] StorageError),
}
