//! 查询分析
//!
//! 协调器在决定是否使用缓存前需要知道的信息：语句种类、是否 EXPLAIN、
//! 是否包含易变函数、`_p` 标记常量的当前值，以及查询树直接引用的目录对象。
//!
//! 遍历顺序与指纹编码顺序一致（targets, from, filter, group_by, order_by, limit，
//! 表达式内部从左到右深度优先），标记常量按此顺序收集。

use std::collections::BTreeSet;

use crate::core::types::ObjectId;
use crate::query::ast::{CommandKind, Expr, FromItem, Literal, QueryTree, Volatility};

/// 查询分析结果
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAnalysis {
    pub command: CommandKind,
    pub explain: bool,
    pub has_volatile: bool,
    pub has_unknown: bool,
    /// `_p` 标记常量，按规范遍历顺序
    pub markers: Vec<Literal>,
    pub relations: BTreeSet<ObjectId>,
    pub functions: BTreeSet<ObjectId>,
}

impl QueryAnalysis {
    /// 查询是否允许写入缓存
    ///
    /// 只缓存 SELECT；EXPLAIN 与包含易变函数的查询不缓存。
    pub fn is_cacheable(&self) -> bool {
        self.command == CommandKind::Select && !self.explain && !self.has_volatile && !self.has_unknown
    }
}

/// 分析查询树
pub fn analyze(query: &QueryTree) -> QueryAnalysis {
    let mut analysis = QueryAnalysis {
        command: query.command,
        explain: query.explain,
        has_volatile: false,
        has_unknown: false,
        markers: Vec::new(),
        relations: BTreeSet::new(),
        functions: BTreeSet::new(),
    };
    walk_query(query, &mut analysis);
    analysis
}

fn walk_query(query: &QueryTree, analysis: &mut QueryAnalysis) {
    for target in &query.targets {
        walk_expr(&target.expr, analysis);
    }
    for item in &query.from {
        walk_from(item, analysis);
    }
    if let Some(filter) = &query.filter {
        walk_expr(filter, analysis);
    }
    for expr in &query.group_by {
        walk_expr(expr, analysis);
    }
    for key in &query.order_by {
        walk_expr(&key.expr, analysis);
    }
    if let Some(limit) = &query.limit {
        walk_expr(limit, analysis);
    }
}

fn walk_from(item: &FromItem, analysis: &mut QueryAnalysis) {
    match item {
        FromItem::Relation { id, .. } => {
            analysis.relations.insert(*id);
        }
        FromItem::Subquery { query, .. } => walk_query(query, analysis),
        FromItem::Join { left, right, on, .. } => {
            walk_from(left, analysis);
            walk_from(right, analysis);
            if let Some(on) = on {
                walk_expr(on, analysis);
            }
        }
    }
}

fn walk_expr(expr: &Expr, analysis: &mut QueryAnalysis) {
    match expr {
        Expr::Column { relation, .. } => {
            analysis.relations.insert(*relation);
        }
        Expr::Const(_) | Expr::Param { .. } => {}
        Expr::Marked(literal) => analysis.markers.push(literal.clone()),
        Expr::Call {
            func,
            args,
            volatility,
            ..
        } => {
            analysis.functions.insert(*func);
            if *volatility == Volatility::Volatile {
                analysis.has_volatile = true;
            }
            for arg in args {
                walk_expr(arg, analysis);
            }
        }
        Expr::Op { args, .. } | Expr::Bool { args, .. } => {
            for arg in args {
                walk_expr(arg, analysis);
            }
        }
        Expr::SubQuery(query) => walk_query(query, analysis),
        Expr::Unknown { .. } => analysis.has_unknown = true,
    }
}
