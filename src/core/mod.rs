pub mod error;
pub mod murmur;
pub mod types;

// 错误和结果类型
pub use error::{
    AdminError, AdminResult, CacheFault, FaultKind, PlanCacheError, PlanCacheResult, StorageError,
    StorageResult,
};

// 核心标识类型
pub use types::{DataType, Fingerprint, ObjectId, ObjectKind};
