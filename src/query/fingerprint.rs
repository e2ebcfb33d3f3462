//! 指纹引擎
//!
//! 把查询树和绑定参数类型编码成规范字节流，再用 MurmurHash64A 得到固定宽度的指纹。
//!
//! 规范化规则：
//! - 普通常量按值编码，`x = 10` 与 `x = 15` 得到不同指纹
//! - `_p(...)` 标记的常量只编码类型，`_p(10)` 与 `_p(15)` 得到相同指纹，
//!   但与未标记的 `10` 不同
//! - 绑定参数只编码位置与类型
//! - 无序结构（hints）先按键排序
//! - FROM 别名不参与编码
//! - 字节流以格式版本号开头，编码规则变化后旧指纹不会与新指纹混淆

use std::hash::Hasher;

use crate::core::error::CacheFault;
use crate::core::murmur::{MurmurHasher, DEFAULT_SEED};
use crate::core::types::{DataType, Fingerprint};
use crate::query::ast::{BoolOp, Expr, FromItem, JoinKind, Literal, QueryTree, Volatility};

/// 规范编码格式版本
pub const FINGERPRINT_FORMAT_VERSION: u8 = 1;

const TAG_QUERY: u8 = 0x01;
const TAG_NONE: u8 = 0x02;
const TAG_SOME: u8 = 0x03;

const TAG_COLUMN: u8 = 0x10;
const TAG_CONST: u8 = 0x11;
const TAG_PARAM: u8 = 0x12;
const TAG_MARKED: u8 = 0x13;
const TAG_CALL: u8 = 0x14;
const TAG_OP: u8 = 0x15;
const TAG_BOOL: u8 = 0x16;
const TAG_SUBQUERY: u8 = 0x17;

const TAG_FROM_RELATION: u8 = 0x20;
const TAG_FROM_SUBQUERY: u8 = 0x21;
const TAG_FROM_JOIN: u8 = 0x22;

/// 指纹引擎
///
/// 无内部状态，纯函数式：同一输入在任何进程中都得到相同指纹。
#[derive(Debug, Clone, Copy)]
pub struct FingerprintEngine {
    seed: u64,
}

impl Default for FingerprintEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintEngine {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    /// 计算查询指纹
    ///
    /// 查询中包含无法规范化的结构时返回 `UnsupportedConstruct`，调用方应绕过缓存。
    pub fn fingerprint(
        &self,
        query: &QueryTree,
        param_types: &[DataType],
    ) -> Result<Fingerprint, CacheFault> {
        let mut encoder = CanonicalEncoder::new(self.seed);
        encoder.write_u8(FINGERPRINT_FORMAT_VERSION);
        encoder.encode_query(query)?;

        encoder.write_len(param_types.len());
        for ty in param_types {
            encoder.write_u8(ty.type_tag());
        }

        Ok(Fingerprint(encoder.finish()))
    }
}

/// 使用默认种子计算指纹
pub fn fingerprint(query: &QueryTree, param_types: &[DataType]) -> Result<Fingerprint, CacheFault> {
    FingerprintEngine::new().fingerprint(query, param_types)
}

/// 规范编码器
struct CanonicalEncoder {
    hasher: MurmurHasher,
}

impl CanonicalEncoder {
    fn new(seed: u64) -> Self {
        Self {
            hasher: MurmurHasher::with_seed(seed),
        }
    }

    fn finish(&self) -> u64 {
        self.hasher.finish()
    }

    fn write_u8(&mut self, v: u8) {
        self.hasher.write_u8(v);
    }

    fn write_bool(&mut self, v: bool) {
        self.hasher.write_u8(v as u8);
    }

    fn write_len(&mut self, len: usize) {
        self.hasher.write_u64(len as u64);
    }

    fn write_str(&mut self, s: &str) {
        self.write_len(s.len());
        self.hasher.write(s.as_bytes());
    }

    fn encode_query(&mut self, query: &QueryTree) -> Result<(), CacheFault> {
        self.write_u8(TAG_QUERY);
        self.write_u8(query.command.tag());
        self.write_bool(query.explain);

        self.write_len(query.targets.len());
        for target in &query.targets {
            self.encode_expr(&target.expr)?;
            match &target.name {
                Some(name) => {
                    self.write_u8(TAG_SOME);
                    self.write_str(name);
                }
                None => self.write_u8(TAG_NONE),
            }
        }

        self.write_len(query.from.len());
        for item in &query.from {
            self.encode_from(item)?;
        }

        self.encode_opt_expr(query.filter.as_ref())?;

        self.write_len(query.group_by.len());
        for expr in &query.group_by {
            self.encode_expr(expr)?;
        }

        self.write_len(query.order_by.len());
        for key in &query.order_by {
            self.encode_expr(&key.expr)?;
            self.write_bool(key.descending);
            self.write_bool(key.nulls_first);
        }

        self.encode_opt_expr(query.limit.as_ref())?;

        // HashMap 的迭代顺序不确定，必须先排序
        let mut hints: Vec<(&String, &String)> = query.hints.iter().collect();
        hints.sort();
        self.write_len(hints.len());
        for (key, value) in hints {
            self.write_str(key);
            self.write_str(value);
        }

        Ok(())
    }

    fn encode_opt_expr(&mut self, expr: Option<&Expr>) -> Result<(), CacheFault> {
        match expr {
            Some(expr) => {
                self.write_u8(TAG_SOME);
                self.encode_expr(expr)
            }
            None => {
                self.write_u8(TAG_NONE);
                Ok(())
            }
        }
    }

    fn encode_from(&mut self, item: &FromItem) -> Result<(), CacheFault> {
        match item {
            FromItem::Relation { id, .. } => {
                self.write_u8(TAG_FROM_RELATION);
                self.hasher.write_u32(id.as_u32());
            }
            FromItem::Subquery { query, .. } => {
                self.write_u8(TAG_FROM_SUBQUERY);
                self.encode_query(query)?;
            }
            FromItem::Join {
                kind,
                left,
                right,
                on,
            } => {
                self.write_u8(TAG_FROM_JOIN);
                self.write_u8(join_tag(*kind));
                self.encode_from(left)?;
                self.encode_from(right)?;
                self.encode_opt_expr(on.as_ref())?;
            }
        }
        Ok(())
    }

    fn encode_expr(&mut self, expr: &Expr) -> Result<(), CacheFault> {
        match expr {
            Expr::Column { relation, name } => {
                self.write_u8(TAG_COLUMN);
                self.hasher.write_u32(relation.as_u32());
                self.write_str(name);
            }
            Expr::Const(literal) => {
                self.write_u8(TAG_CONST);
                self.encode_literal(literal);
            }
            Expr::Param { index, ty } => {
                self.write_u8(TAG_PARAM);
                self.hasher.write_u32(*index);
                self.write_u8(ty.type_tag());
            }
            Expr::Marked(literal) => {
                self.write_u8(TAG_MARKED);
                self.write_u8(literal.data_type().type_tag());
            }
            Expr::Call {
                func,
                name,
                args,
                volatility,
            } => {
                self.write_u8(TAG_CALL);
                self.hasher.write_u32(func.as_u32());
                self.write_str(name);
                self.write_u8(volatility_tag(*volatility));
                self.encode_list(args)?;
            }
            Expr::Op { op, args } => {
                self.write_u8(TAG_OP);
                self.write_str(op);
                self.encode_list(args)?;
            }
            Expr::Bool { op, args } => {
                self.write_u8(TAG_BOOL);
                self.write_u8(bool_tag(*op));
                self.encode_list(args)?;
            }
            Expr::SubQuery(query) => {
                self.write_u8(TAG_SUBQUERY);
                self.encode_query(query)?;
            }
            Expr::Unknown { tag } => {
                return Err(CacheFault::UnsupportedConstruct(tag.clone()));
            }
        }
        Ok(())
    }

    fn encode_list(&mut self, exprs: &[Expr]) -> Result<(), CacheFault> {
        self.write_len(exprs.len());
        for expr in exprs {
            self.encode_expr(expr)?;
        }
        Ok(())
    }

    fn encode_literal(&mut self, literal: &Literal) {
        match literal {
            Literal::Null(ty) => {
                self.write_u8(0);
                self.write_u8(ty.type_tag());
            }
            Literal::Bool(b) => {
                self.write_u8(1);
                self.write_bool(*b);
            }
            Literal::Int(i) => {
                self.write_u8(2);
                self.hasher.write_i64(*i);
            }
            Literal::Float(f) => {
                self.write_u8(3);
                self.hasher.write_u64(canonical_float_bits(*f));
            }
            Literal::Text(s) => {
                self.write_u8(4);
                self.write_str(s);
            }
        }
    }
}

/// -0.0 与 0.0 视为相同，所有 NaN 归一到同一位模式
fn canonical_float_bits(f: f64) -> u64 {
    if f.is_nan() {
        f64::NAN.to_bits()
    } else if f == 0.0 {
        0.0f64.to_bits()
    } else {
        f.to_bits()
    }
}

fn join_tag(kind: JoinKind) -> u8 {
    match kind {
        JoinKind::Inner => 1,
        JoinKind::Left => 2,
        JoinKind::Right => 3,
        JoinKind::Full => 4,
        JoinKind::Cross => 5,
    }
}

fn volatility_tag(volatility: Volatility) -> u8 {
    match volatility {
        Volatility::Immutable => 1,
        Volatility::Stable => 2,
        Volatility::Volatile => 3,
    }
}

fn bool_tag(op: BoolOp) -> u8 {
    match op {
        BoolOp::And => 1,
        BoolOp::Or => 2,
        BoolOp::Not => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ObjectId;
    use crate::query::ast::{CommandKind, Expr, FromItem, QueryTree};

    const TEST_TABLE: u32 = 16384;

    fn attr_eq(value: Expr) -> QueryTree {
        QueryTree::select()
            .with_target(Expr::column(TEST_TABLE, "test_attr1"))
            .with_target(Expr::column(TEST_TABLE, "test_attr2"))
            .with_from(FromItem::relation(TEST_TABLE))
            .with_filter(Expr::eq(Expr::column(TEST_TABLE, "test_attr1"), value))
    }

    #[test]
    fn test_same_query_same_fingerprint() {
        let a = fingerprint(&attr_eq(Expr::int(10)), &[]).expect("fingerprint failed");
        let b = fingerprint(&attr_eq(Expr::int(10)), &[]).expect("fingerprint failed");
        assert_eq!(a, b);
    }

    /// 已持久化的指纹依赖这些值，编码或哈希变化必须同时提升格式版本
    #[test]
    fn test_fingerprint_known_values() {
        assert_eq!(
            fingerprint(&attr_eq(Expr::marked_int(10)), &[]).expect("fingerprint failed"),
            Fingerprint(0x1f86_2707_3a68_9059)
        );
        assert_eq!(
            fingerprint(&attr_eq(Expr::int(10)), &[]).expect("fingerprint failed"),
            Fingerprint(0x357a_3652_6ada_3bdd)
        );
        assert_eq!(
            fingerprint(&attr_eq(Expr::marked_int(10)), &[DataType::Int4])
                .expect("fingerprint failed"),
            Fingerprint(0xefec_cda6_89b7_9c46)
        );
    }

    #[test]
    fn test_plain_constants_are_distinct() {
        let a = fingerprint(&attr_eq(Expr::int(10)), &[]).expect("fingerprint failed");
        let b = fingerprint(&attr_eq(Expr::int(15)), &[]).expect("fingerprint failed");
        assert_ne!(a, b);
    }

    #[test]
    fn test_marked_constants_share_fingerprint() {
        let a = fingerprint(&attr_eq(Expr::marked_int(10)), &[]).expect("fingerprint failed");
        let b = fingerprint(&attr_eq(Expr::marked_int(15)), &[]).expect("fingerprint failed");
        assert_eq!(a, b);
    }

    #[test]
    fn test_marked_differs_from_plain() {
        let marked = fingerprint(&attr_eq(Expr::marked_int(10)), &[]).expect("fingerprint failed");
        let plain = fingerprint(&attr_eq(Expr::int(10)), &[]).expect("fingerprint failed");
        assert_ne!(marked, plain);
    }

    #[test]
    fn test_marked_type_matters() {
        let int = fingerprint(&attr_eq(Expr::marked_int(10)), &[]).expect("fingerprint failed");
        let text = fingerprint(
            &attr_eq(Expr::Marked(Literal::Text("10".to_string()))),
            &[],
        )
        .expect("fingerprint failed");
        assert_ne!(int, text);
    }

    #[test]
    fn test_param_types_not_values() {
        let query = attr_eq(Expr::Param {
            index: 1,
            ty: DataType::Int4,
        });
        let a = fingerprint(&query, &[DataType::Int4]).expect("fingerprint failed");
        let b = fingerprint(&query, &[DataType::Int4]).expect("fingerprint failed");
        let c = fingerprint(&query, &[DataType::Int8]).expect("fingerprint failed");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hint_order_is_canonical() {
        // 不同插入顺序的 HashMap 必须得到相同指纹
        let mut a = attr_eq(Expr::int(1));
        let mut b = attr_eq(Expr::int(1));
        for i in 0..32 {
            a.hints.insert(format!("k{}", i), format!("v{}", i));
        }
        for i in (0..32).rev() {
            b.hints.insert(format!("k{}", i), format!("v{}", i));
        }
        assert_eq!(
            fingerprint(&a, &[]).expect("fingerprint failed"),
            fingerprint(&b, &[]).expect("fingerprint failed")
        );
    }

    #[test]
    fn test_alias_ignored() {
        let plain = attr_eq(Expr::int(1));
        let mut aliased = plain.clone();
        aliased.from = vec![FromItem::Relation {
            id: ObjectId(TEST_TABLE),
            alias: Some("t".to_string()),
        }];
        assert_eq!(
            fingerprint(&plain, &[]).expect("fingerprint failed"),
            fingerprint(&aliased, &[]).expect("fingerprint failed")
        );
    }

    #[test]
    fn test_command_kind_matters() {
        let select = attr_eq(Expr::int(1));
        let delete = select.clone().with_command(CommandKind::Delete);
        assert_ne!(
            fingerprint(&select, &[]).expect("fingerprint failed"),
            fingerprint(&delete, &[]).expect("fingerprint failed")
        );
    }

    #[test]
    fn test_unknown_construct_rejected() {
        let query = attr_eq(Expr::Unknown {
            tag: "TableSample".to_string(),
        });
        let err = fingerprint(&query, &[]).expect_err("should be unsupported");
        assert_eq!(err, CacheFault::UnsupportedConstruct("TableSample".to_string()));
    }

    #[test]
    fn test_float_zero_normalized() {
        let pos = attr_eq(Expr::Const(Literal::Float(0.0)));
        let neg = attr_eq(Expr::Const(Literal::Float(-0.0)));
        assert_eq!(
            fingerprint(&pos, &[]).expect("fingerprint failed"),
            fingerprint(&neg, &[]).expect("fingerprint failed")
        );
    }

    #[test]
    fn test_seed_changes_fingerprint() {
        let query = attr_eq(Expr::int(1));
        let a = FingerprintEngine::with_seed(1)
            .fingerprint(&query, &[])
            .expect("fingerprint failed");
        let b = FingerprintEngine::with_seed(2)
            .fingerprint(&query, &[])
            .expect("fingerprint failed");
        assert_ne!(a, b);
    }
}
