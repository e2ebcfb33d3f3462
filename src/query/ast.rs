//! 查询表示
//!
//! 外部解析器交给缓存的查询结构。缓存只关心结构本身：
//! 它不解析 SQL，也不理解语义，只对结构做规范化与哈希。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{DataType, ObjectId};

/// 语句种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Select,
    Insert,
    Update,
    Delete,
    Utility,
}

impl CommandKind {
    pub(crate) fn tag(&self) -> u8 {
        match self {
            CommandKind::Select => 1,
            CommandKind::Insert => 2,
            CommandKind::Update => 3,
            CommandKind::Delete => 4,
            CommandKind::Utility => 5,
        }
    }
}

/// 函数易变性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Volatility {
    Immutable,
    Stable,
    Volatile,
}

/// 常量字面值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null(DataType),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Literal {
    pub fn data_type(&self) -> DataType {
        match self {
            Literal::Null(ty) => *ty,
            Literal::Bool(_) => DataType::Bool,
            Literal::Int(_) => DataType::Int8,
            Literal::Float(_) => DataType::Float8,
            Literal::Text(_) => DataType::Text,
        }
    }
}

/// 布尔连接符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
    Not,
}

/// 表达式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// 列引用
    Column { relation: ObjectId, name: String },
    /// 普通常量，按值参与指纹
    Const(Literal),
    /// 绑定参数，只按位置和类型参与指纹
    Param { index: u32, ty: DataType },
    /// `_p(...)` 标记的常量：规划时视为参数，按类型占位参与指纹，
    /// 命中缓存后再把当前值还原到计划中
    Marked(Literal),
    /// 函数调用
    Call {
        func: ObjectId,
        name: String,
        args: Vec<Expr>,
        volatility: Volatility,
    },
    /// 运算符
    Op { op: String, args: Vec<Expr> },
    /// 布尔表达式
    Bool { op: BoolOp, args: Vec<Expr> },
    /// 子查询
    SubQuery(Box<QueryTree>),
    /// 没有规范化规则的结构
    Unknown { tag: String },
}

impl Expr {
    pub fn column(relation: impl Into<ObjectId>, name: impl Into<String>) -> Self {
        Expr::Column {
            relation: relation.into(),
            name: name.into(),
        }
    }

    pub fn int(value: i64) -> Self {
        Expr::Const(Literal::Int(value))
    }

    pub fn marked_int(value: i64) -> Self {
        Expr::Marked(Literal::Int(value))
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::Op {
            op: "=".to_string(),
            args: vec![left, right],
        }
    }
}

/// 连接类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

/// FROM 子句中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FromItem {
    /// 表或视图，别名不参与指纹
    Relation {
        id: ObjectId,
        alias: Option<String>,
    },
    Subquery {
        query: Box<QueryTree>,
        alias: Option<String>,
    },
    Join {
        kind: JoinKind,
        left: Box<FromItem>,
        right: Box<FromItem>,
        on: Option<Expr>,
    },
}

impl FromItem {
    pub fn relation(id: impl Into<ObjectId>) -> Self {
        FromItem::Relation {
            id: id.into(),
            alias: None,
        }
    }
}

/// 输出列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub expr: Expr,
    pub name: Option<String>,
}

/// 排序键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    pub descending: bool,
    pub nulls_first: bool,
}

/// 查询树
///
/// `hints` 是无序结构，计算指纹前会先按键排序。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTree {
    pub command: CommandKind,
    /// 是否为 EXPLAIN 语句
    pub explain: bool,
    pub targets: Vec<TargetEntry>,
    pub from: Vec<FromItem>,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<SortKey>,
    pub limit: Option<Expr>,
    pub hints: HashMap<String, String>,
}

impl QueryTree {
    /// 创建空的 SELECT 查询
    pub fn select() -> Self {
        Self {
            command: CommandKind::Select,
            explain: false,
            targets: Vec::new(),
            from: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            hints: HashMap::new(),
        }
    }

    pub fn with_command(mut self, command: CommandKind) -> Self {
        self.command = command;
        self
    }

    pub fn with_target(mut self, expr: Expr) -> Self {
        self.targets.push(TargetEntry { expr, name: None });
        self
    }

    pub fn with_from(mut self, item: FromItem) -> Self {
        self.from.push(item);
        self
    }

    pub fn with_filter(mut self, expr: Expr) -> Self {
        self.filter = Some(expr);
        self
    }

    pub fn with_order_by(mut self, expr: Expr, descending: bool) -> Self {
        self.order_by.push(SortKey {
            expr,
            descending,
            nulls_first: descending,
        });
        self
    }

    pub fn with_limit(mut self, expr: Expr) -> Self {
        self.limit = Some(expr);
        self
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }

    pub fn explained(mut self) -> Self {
        self.explain = true;
        self
    }
}
