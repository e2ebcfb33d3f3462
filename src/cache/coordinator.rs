//! 检索与替换协调器
//!
//! 每次查询执行的状态机：
//!
//! ```text
//! 指纹 -> 查找 -> 命中（还原标记常量，返回缓存计划）
//!              -> 未命中 -> 外部规划器 -> 写入（写入模式且可缓存）
//!                                      -> 不写入
//! ```
//!
//! 缓存内部的任何故障都退化为"缓存不存在"时的行为：
//! 规划器的结果原样返回，缓存从不让一个本该成功的查询失败。

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::entry::DependencySet;
use crate::cache::manager::{PlanCache, PublishOutcome};
use crate::cache::modes::{CacheModes, ModeController, SessionModes};
use crate::core::error::{CacheFault, FaultKind, PlanCacheError};
use crate::core::types::{DataType, Fingerprint, ObjectId};
use crate::query::analysis::{analyze, QueryAnalysis};
use crate::query::ast::{CommandKind, Literal, QueryTree};
use crate::query::fingerprint::FingerprintEngine;

/// 可缓存的计划
pub trait CachedPlan {
    /// 计划依赖的目录对象（表、索引、函数）
    fn dependencies(&self) -> DependencySet;

    /// 命中缓存后，把 `_p` 标记常量的当前值还原到计划中
    ///
    /// `markers` 按查询树的遍历顺序排列。
    fn restore_markers(&mut self, _markers: &[Literal]) {}

    /// 文本形式的计划说明
    fn explain(&self) -> String;
}

/// 外部规划器
pub trait Planner {
    type Plan: CachedPlan;
    type Error;

    fn plan(&self, query: &QueryTree, param_types: &[DataType]) -> Result<Self::Plan, Self::Error>;
}

/// 计划负载编解码
pub trait PlanCodec<P>: Send + Sync {
    fn encode(&self, plan: &P) -> Result<Vec<u8>, CacheFault>;
    fn decode(&self, bytes: &[u8]) -> Result<P, CacheFault>;
}

/// JSON 编解码
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPlanCodec;

impl<P> PlanCodec<P> for JsonPlanCodec
where
    P: Serialize + DeserializeOwned,
{
    fn encode(&self, plan: &P) -> Result<Vec<u8>, CacheFault> {
        Ok(serde_json::to_vec(plan)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<P, CacheFault> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// 一次查询执行的缓存路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 使用了缓存计划
    Hit,
    /// 重新规划并写入了缓存
    Stored,
    /// 重新规划但没有写入
    Unstored,
    /// 查询不经过缓存（缓存关闭、非 SELECT、EXPLAIN、不支持的结构）
    Bypassed,
}

/// 查询请求
#[derive(Debug, Clone, Copy)]
pub struct QueryRequest<'a> {
    /// 原始查询文本，仅用于日志与管理视图
    pub text: &'a str,
    pub tree: &'a QueryTree,
    pub param_types: &'a [DataType],
}

impl<'a> QueryRequest<'a> {
    pub fn new(text: &'a str, tree: &'a QueryTree) -> Self {
        Self {
            text,
            tree,
            param_types: &[],
        }
    }

    pub fn with_param_types(mut self, param_types: &'a [DataType]) -> Self {
        self.param_types = param_types;
        self
    }
}

/// 执行结果
#[derive(Debug)]
pub struct PlanOutcome<P> {
    pub plan: P,
    pub resolution: Resolution,
    pub fingerprint: Option<Fingerprint>,
}

thread_local! {
    static PLANNING_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// 规划嵌套深度守卫
///
/// 规划器内部再次经过协调器时（例如规划期间执行的函数体），
/// 内层查询只查找不写入。
struct PlanningGuard;

impl PlanningGuard {
    fn enter() -> Self {
        PLANNING_DEPTH.with(|depth| depth.set(depth.get() + 1));
        PlanningGuard
    }

    fn is_nested() -> bool {
        PLANNING_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for PlanningGuard {
    fn drop(&mut self) {
        PLANNING_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// 检索与替换协调器
pub struct PlanCoordinator<P, C = JsonPlanCodec> {
    cache: Arc<PlanCache>,
    modes: Arc<ModeController>,
    engine: FingerprintEngine,
    codec: C,
    _plan: PhantomData<fn() -> P>,
}

impl<P> PlanCoordinator<P, JsonPlanCodec>
where
    P: CachedPlan + Serialize + DeserializeOwned,
{
    pub fn new(cache: Arc<PlanCache>, modes: Arc<ModeController>) -> Self {
        Self::with_codec(cache, modes, JsonPlanCodec)
    }
}

impl<P, C> PlanCoordinator<P, C>
where
    P: CachedPlan,
    C: PlanCodec<P>,
{
    pub fn with_codec(cache: Arc<PlanCache>, modes: Arc<ModeController>, codec: C) -> Self {
        Self {
            cache,
            modes,
            engine: FingerprintEngine::new(),
            codec,
            _plan: PhantomData,
        }
    }

    pub fn with_engine(mut self, engine: FingerprintEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn cache(&self) -> &Arc<PlanCache> {
        &self.cache
    }

    pub fn modes(&self) -> &Arc<ModeController> {
        &self.modes
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// 为一次查询执行取得计划
    ///
    /// 只有规划器自身的错误会返回给调用方。
    pub fn execute<Pl>(
        &self,
        planner: &Pl,
        session: &SessionModes,
        request: QueryRequest<'_>,
    ) -> Result<PlanOutcome<P>, Pl::Error>
    where
        Pl: Planner<Plan = P>,
    {
        let modes = self.modes.resolve(session);
        let nested = PlanningGuard::is_nested();

        if !modes.enabled {
            return self.bypass(planner, request);
        }

        let analysis = analyze(request.tree);
        if analysis.command != CommandKind::Select || analysis.explain {
            return self.bypass(planner, request);
        }

        let fingerprint = match self.engine.fingerprint(request.tree, request.param_types) {
            Ok(fingerprint) => fingerprint,
            Err(fault) => {
                self.report_fault(&fault);
                return self.bypass(planner, request);
            }
        };

        if !analysis.has_volatile {
            if let Some(plan) = self.try_hit(fingerprint, &analysis, &modes, request.text) {
                return Ok(PlanOutcome {
                    plan,
                    resolution: Resolution::Hit,
                    fingerprint: Some(fingerprint),
                });
            }
        }
        self.cache.collector().record_miss();

        let ticket = self.cache.begin_planning();
        let plan = {
            let _guard = PlanningGuard::enter();
            planner.plan(request.tree, request.param_types)?
        };

        let resolution = if modes.write_mode && !nested && analysis.is_cacheable() {
            self.store(fingerprint, &plan, &analysis, &modes, request.text, ticket.epoch())
        } else {
            Resolution::Unstored
        };

        Ok(PlanOutcome {
            plan,
            resolution,
            fingerprint: Some(fingerprint),
        })
    }

    fn bypass<Pl>(&self, planner: &Pl, request: QueryRequest<'_>) -> Result<PlanOutcome<P>, Pl::Error>
    where
        Pl: Planner<Plan = P>,
    {
        self.cache.collector().record_bypass();
        let plan = {
            let _guard = PlanningGuard::enter();
            planner.plan(request.tree, request.param_types)?
        };
        Ok(PlanOutcome {
            plan,
            resolution: Resolution::Bypassed,
            fingerprint: None,
        })
    }

    fn try_hit(
        &self,
        fingerprint: Fingerprint,
        analysis: &QueryAnalysis,
        modes: &CacheModes,
        text: &str,
    ) -> Option<P> {
        let entry = self.cache.store().lookup(fingerprint)?;
        if !entry.is_valid() {
            return None;
        }

        let mut plan = match self.codec.decode(entry.payload()) {
            Ok(plan) => plan,
            Err(fault) => {
                self.report_fault(&fault);
                return None;
            }
        };
        plan.restore_markers(&analysis.markers);

        self.cache.store().touch(&entry);
        self.cache.collector().record_hit();
        if let Some(level) = modes.log_usage.level() {
            log::log!(level, "cached plan was used for query: {}", text);
        }
        Some(plan)
    }

    fn store(
        &self,
        fingerprint: Fingerprint,
        plan: &P,
        analysis: &QueryAnalysis,
        modes: &CacheModes,
        text: &str,
        planned_at: u64,
    ) -> Resolution {
        let payload = match self.codec.encode(plan) {
            Ok(payload) => payload,
            Err(fault) => {
                self.report_fault(&fault);
                return Resolution::Unstored;
            }
        };

        let mut dependencies = plan.dependencies();
        dependencies.relations.extend(analysis.relations.iter().copied());
        dependencies.functions.extend(analysis.functions.iter().copied());

        match self
            .cache
            .publish(fingerprint, payload, dependencies, text, planned_at)
        {
            Ok(PublishOutcome::Stored) => {
                self.cache.collector().record_stored();
                if let Some(level) = modes.log_usage.level() {
                    log::log!(level, "saved plan for {}", text);
                }
                Resolution::Stored
            }
            Ok(PublishOutcome::Duplicate) => Resolution::Stored,
            Ok(PublishOutcome::StaleDependencies) | Ok(PublishOutcome::CapacityExhausted) => {
                Resolution::Unstored
            }
            Err(PlanCacheError::Fault(fault)) => {
                self.report_fault(&fault);
                Resolution::Unstored
            }
            Err(e) => {
                log::warn!("写入计划缓存失败 {}: {}", fingerprint, e);
                self.cache.collector().record_fault(FaultKind::Storage);
                Resolution::Unstored
            }
        }
    }

    fn report_fault(&self, fault: &CacheFault) {
        match fault {
            CacheFault::UnsupportedConstruct(_) => log::debug!("查询绕过计划缓存: {}", fault),
            _ => log::warn!("计划缓存故障: {}", fault),
        }
        self.cache.collector().record_fault(fault.kind());
    }

    /// 目录对象变更通知的便捷入口
    ///
    /// 返回内存中已失效的全部指纹，持久化失败只记录日志。
    pub fn on_object_changed(&self, object: ObjectId) -> Vec<Fingerprint> {
        let invalidation = self.cache.invalidate_dependents(object);
        if let Some(e) = &invalidation.error {
            log::error!("对象 {} 变更后持久化失效状态失败: {}", object, e);
        }
        invalidation.keys
    }
}
