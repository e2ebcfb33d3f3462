//! 缓存内部故障
//!
//! 这些故障全部在缓存内部处理：协调器遇到它们时退化为"缓存不存在"的行为，
//! 从不作为查询失败向外传播。

use thiserror::Error;

use crate::core::types::Fingerprint;

/// 缓存内部故障
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheFault {
    /// 指纹规则无法规范化的查询结构，强制绕过缓存
    #[error("不支持的查询结构: {0}")]
    UnsupportedConstruct(String),

    /// 计划负载无法序列化或反序列化，按未命中处理
    #[error("计划序列化失败: {0}")]
    SerializationFault(String),

    /// 依赖集合无法登记，对应的插入必须回滚
    #[error("依赖登记失败: {0}")]
    DependencyRegistrationFault(String),

    /// 同一指纹的并发写入，以最后一次提交为准
    #[error("并发写入冲突: {0}")]
    ConcurrentWriteConflict(Fingerprint),
}

/// 故障种类，用于统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    UnsupportedConstruct,
    Serialization,
    DependencyRegistration,
    ConcurrentWrite,
    Storage,
}

impl CacheFault {
    pub fn kind(&self) -> FaultKind {
        match self {
            CacheFault::UnsupportedConstruct(_) => FaultKind::UnsupportedConstruct,
            CacheFault::SerializationFault(_) => FaultKind::Serialization,
            CacheFault::DependencyRegistrationFault(_) => FaultKind::DependencyRegistration,
            CacheFault::ConcurrentWriteConflict(_) => FaultKind::ConcurrentWrite,
        }
    }
}

impl From<serde_json::Error> for CacheFault {
    fn from(e: serde_json::Error) -> Self {
        CacheFault::SerializationFault(e.to_string())
    }
}
