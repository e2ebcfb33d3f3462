//! Redb 存储共享类型定义
//!
//! 提供 Redb 数据库操作所需的共享类型，包括 ByteKey 和表定义

use std::cmp::Ordering as CmpOrdering;
use redb::{TableDefinition, TypeName};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ByteKey(pub Vec<u8>);

impl redb::Key for ByteKey {
    fn compare(data1: &[u8], data2: &[u8]) -> CmpOrdering {
        data1.cmp(data2)
    }
}

impl redb::Value for ByteKey {
    type SelfType<'a> = ByteKey where Self: 'a;
    type AsBytes<'a> = Vec<u8> where Self: 'a;

    fn fixed_width() -> Option<usize> {
        None
    }

    fn from_bytes<'a>(data: &'a [u8]) -> ByteKey where Self: 'a {
        ByteKey(data.to_vec())
    }

    fn as_bytes<'a, 'b: 'a>(value: &'a Self::SelfType<'b>) -> Vec<u8> where Self: 'b {
        value.0.clone()
    }

    fn type_name() -> TypeName {
        TypeName::new("plancache::ByteKey")
    }
}

// 指纹（大端 8 字节）-> 计划记录
pub const PLANS_TABLE: TableDefinition<ByteKey, ByteKey> = TableDefinition::new("plans");
// 布局版本与管理接口定义
pub const META_TABLE: TableDefinition<ByteKey, ByteKey> = TableDefinition::new("meta");
