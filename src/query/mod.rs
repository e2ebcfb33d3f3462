//! 查询表示与指纹
//!
//! - `ast`：外部解析器交给缓存的查询结构
//! - `fingerprint`：跨进程稳定的查询指纹
//! - `analysis`：缓存资格判断与标记常量收集

pub mod analysis;
pub mod ast;
pub mod fingerprint;

pub use analysis::{analyze, QueryAnalysis};
pub use ast::{
    BoolOp, CommandKind, Expr, FromItem, JoinKind, Literal, QueryTree, SortKey, TargetEntry,
    Volatility,
};
pub use fingerprint::{fingerprint, FingerprintEngine, FINGERPRINT_FORMAT_VERSION};
