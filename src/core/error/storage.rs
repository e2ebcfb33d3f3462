//! 存储层错误类型
//!
//! 涵盖计划持久化后端相关的错误

use thiserror::Error;

/// 存储层结果类型
pub type StorageResult<T> = Result<T, StorageError>;

/// 存储层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("数据库错误: {0}")]
    DbError(String),
    #[error("序列化错误: {0}")]
    SerializeError(String),
    #[error("反序列化错误: {0}")]
    DeserializeError(String),
    #[error("存储布局版本不受支持: {0}")]
    UnsupportedLayout(u32),
    #[error("锁错误: {0}")]
    LockError(String),
    #[error("IO错误: {0}")]
    IOError(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::IOError(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializeError(e.to_string())
    }
}

#[cfg(feature = "redb")]
mod redb_conversions {
    use super::StorageError;

    impl From<redb::Error> for StorageError {
        fn from(e: redb::Error) -> Self {
            StorageError::DbError(e.to_string())
        }
    }

    impl From<redb::DatabaseError> for StorageError {
        fn from(e: redb::DatabaseError) -> Self {
            StorageError::DbError(e.to_string())
        }
    }

    impl From<redb::TransactionError> for StorageError {
        fn from(e: redb::TransactionError) -> Self {
            StorageError::DbError(e.to_string())
        }
    }

    impl From<redb::TableError> for StorageError {
        fn from(e: redb::TableError) -> Self {
            StorageError::DbError(e.to_string())
        }
    }

    impl From<redb::StorageError> for StorageError {
        fn from(e: redb::StorageError) -> Self {
            StorageError::DbError(e.to_string())
        }
    }

    impl From<redb::CommitError> for StorageError {
        fn from(e: redb::CommitError) -> Self {
            StorageError::DbError(e.to_string())
        }
    }
}
