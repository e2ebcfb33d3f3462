//! 核心标识类型
//!
//! 指纹、目录对象标识以及参数类型，这些类型会被持久化，
//! 其序列化形式属于存储布局的一部分。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 查询指纹
///
/// 固定宽度的 64 位值，由查询的规范化结构与绑定参数类型决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn new(value: u64) -> Self {
        Fingerprint(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// 大端字节序编码，用作存储键，保证按数值有序
    pub fn to_key_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_key_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(Fingerprint(u64::from_be_bytes(arr)))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches("0x");
        u64::from_str_radix(trimmed, 16)
            .map(Fingerprint)
            .map_err(|e| format!("无效的指纹 '{}': {}", s, e))
    }
}

impl From<u64> for Fingerprint {
    fn from(val: u64) -> Self {
        Fingerprint(val)
    }
}

/// 目录对象标识（表、视图、索引、函数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// 无效对象标识
    pub const INVALID: ObjectId = ObjectId(0);

    pub fn new(id: u32) -> Self {
        ObjectId(id)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ObjectId {
    fn from(val: u32) -> Self {
        ObjectId(val)
    }
}

/// 目录对象种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// 表或视图
    Relation,
    /// 索引
    Index,
    /// 函数
    Function,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Relation => write!(f, "relation"),
            ObjectKind::Index => write!(f, "index"),
            ObjectKind::Function => write!(f, "function"),
        }
    }
}

/// 参数与常量的数据类型
///
/// 指纹只依赖类型而不依赖值，`type_tag` 是写入指纹的稳定编码，
/// 不能随意调整已有取值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Unknown,
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Varchar,
    Date,
    Timestamp,
    Json,
}

impl DataType {
    pub fn type_tag(&self) -> u8 {
        match self {
            DataType::Unknown => 0,
            DataType::Bool => 1,
            DataType::Int2 => 2,
            DataType::Int4 => 3,
            DataType::Int8 => 4,
            DataType::Float4 => 5,
            DataType::Float8 => 6,
            DataType::Numeric => 7,
            DataType::Text => 8,
            DataType::Varchar => 9,
            DataType::Date => 10,
            DataType::Timestamp => 11,
            DataType::Json => 12,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Unknown => "unknown",
            DataType::Bool => "bool",
            DataType::Int2 => "int2",
            DataType::Int4 => "int4",
            DataType::Int8 => "int8",
            DataType::Float4 => "float4",
            DataType::Float8 => "float8",
            DataType::Numeric => "numeric",
            DataType::Text => "text",
            DataType::Varchar => "varchar",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
            DataType::Json => "json",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_display_and_parse() {
        let fp = Fingerprint(0xdead_beef);
        let text = fp.to_string();
        assert_eq!(text, "00000000deadbeef");
        assert_eq!(text.parse::<Fingerprint>(), Ok(fp));
        assert_eq!("0xdeadbeef".parse::<Fingerprint>(), Ok(fp));
        assert!("zz".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_fingerprint_key_bytes() {
        let fp = Fingerprint(42);
        let bytes = fp.to_key_bytes();
        assert_eq!(Fingerprint::from_key_bytes(&bytes), Some(fp));
        assert_eq!(Fingerprint::from_key_bytes(&bytes[..4]), None);
    }

    #[test]
    fn test_object_id_validity() {
        assert!(!ObjectId::INVALID.is_valid());
        assert!(ObjectId(16384).is_valid());
    }

    #[test]
    fn test_type_tags_are_unique() {
        let all = [
            DataType::Unknown,
            DataType::Bool,
            DataType::Int2,
            DataType::Int4,
            DataType::Int8,
            DataType::Float4,
            DataType::Float8,
            DataType::Numeric,
            DataType::Text,
            DataType::Varchar,
            DataType::Date,
            DataType::Timestamp,
            DataType::Json,
        ];
        let mut tags: Vec<u8> = all.iter().map(|t| t.type_tag()).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), all.len());
    }
}
