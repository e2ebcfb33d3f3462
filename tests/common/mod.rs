//! 集成测试共享工具模块
//!
//! 提供测试规划器、故障注入编解码器、临时存储目录等基础设施

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use plancache::cache::{
    CacheModes, CachedPlan, DependencySet, JsonPlanCodec, LogUsage, ModeController, PlanCache,
    PlanCodec, PlanCoordinator, Planner,
};
use plancache::core::{CacheFault, DataType, Fingerprint, ObjectId};
use plancache::query::{analyze, Expr, FromItem, Literal, QueryTree};
use plancache::storage::engine::RedbPlanBackend;
use plancache::storage::layout::{
    surface_definition, LegacyPlanV1, META_LAYOUT_VERSION, META_SURFACE,
};
use plancache::storage::redb_types::{ByteKey, META_TABLE, PLANS_TABLE};

/// 测试表 `test_plans`
pub const TEST_TABLE: u32 = 16384;
/// `test_plans` 上的索引
pub const TEST_INDEX: u32 = 16390;
/// 另一张无关的表
pub const OTHER_TABLE: u32 = 16400;

/// 测试存储目录
///
/// 使用项目目录下的临时文件夹确保每个测试有独立的存储环境，
/// 测试结束后自动清理临时目录
pub struct TestStore {
    temp_path: PathBuf,
}

impl TestStore {
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("target")
            .join("test-temp");
        std::fs::create_dir_all(&temp_dir)?;

        let unique_id = format!(
            "plancache_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default()
        );
        let temp_path = temp_dir.join(unique_id);
        std::fs::create_dir_all(&temp_path)?;
        Ok(Self { temp_path })
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp_path.join("plans.redb")
    }

    pub fn path(&self) -> &Path {
        &self.temp_path
    }

    /// 打开（或重新打开）redb 后端的缓存，模拟一次进程启动
    pub fn open_cache(&self) -> Arc<PlanCache> {
        let backend = RedbPlanBackend::open(self.db_path()).expect("Failed to open redb backend");
        Arc::new(PlanCache::open(Arc::new(backend), None).expect("Failed to open plan cache"))
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.temp_path);
    }
}

/// 测试计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    pub relation: u32,
    pub index: Option<u32>,
    /// 计划中使用的标记常量值
    pub params: Vec<i64>,
}

impl CachedPlan for TestPlan {
    fn dependencies(&self) -> DependencySet {
        let mut deps = DependencySet::new().with_relation(self.relation);
        if let Some(index) = self.index {
            deps = deps.with_index(index);
        }
        deps
    }

    fn restore_markers(&mut self, markers: &[Literal]) {
        self.params = int_markers(markers);
    }

    fn explain(&self) -> String {
        match self.index {
            Some(index) => format!("Index Scan using {} on {}", index, self.relation),
            None => format!("Seq Scan on {}", self.relation),
        }
    }
}

fn int_markers(markers: &[Literal]) -> Vec<i64> {
    markers
        .iter()
        .filter_map(|m| match m {
            Literal::Int(v) => Some(*v),
            _ => None,
        })
        .collect()
}

/// 测试规划器，记录被调用的次数
#[derive(Default)]
pub struct TestPlanner {
    calls: AtomicUsize,
}

impl TestPlanner {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Planner for TestPlanner {
    type Plan = TestPlan;
    type Error = String;

    fn plan(&self, query: &QueryTree, _param_types: &[DataType]) -> Result<TestPlan, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let analysis = analyze(query);
        let relation = analysis
            .relations
            .iter()
            .next()
            .map(|id| id.as_u32())
            .ok_or_else(|| "query has no relation".to_string())?;
        Ok(TestPlan {
            relation,
            index: (relation == TEST_TABLE).then_some(TEST_INDEX),
            params: int_markers(&analysis.markers),
        })
    }
}

/// 可以按需失败的编解码器
#[derive(Default)]
pub struct FlakyCodec {
    pub fail_encode: std::sync::atomic::AtomicBool,
    pub fail_decode: std::sync::atomic::AtomicBool,
}

impl PlanCodec<TestPlan> for FlakyCodec {
    fn encode(&self, plan: &TestPlan) -> Result<Vec<u8>, CacheFault> {
        if self.fail_encode.load(Ordering::SeqCst) {
            return Err(CacheFault::SerializationFault("injected encode failure".to_string()));
        }
        JsonPlanCodec.encode(plan)
    }

    fn decode(&self, bytes: &[u8]) -> Result<TestPlan, CacheFault> {
        if self.fail_decode.load(Ordering::SeqCst) {
            return Err(CacheFault::SerializationFault("injected decode failure".to_string()));
        }
        JsonPlanCodec.decode(bytes)
    }
}

pub fn write_modes() -> Arc<ModeController> {
    Arc::new(ModeController::new(CacheModes {
        enabled: true,
        write_mode: true,
        log_usage: LogUsage::None,
    }))
}

pub fn coordinator(cache: Arc<PlanCache>) -> PlanCoordinator<TestPlan> {
    PlanCoordinator::new(cache, write_modes())
}

/// `SELECT test_attr1, test_attr2 FROM test_plans WHERE test_attr1 = <value>`
pub fn attr_query(value: Expr) -> QueryTree {
    QueryTree::select()
        .with_target(Expr::column(TEST_TABLE, "test_attr1"))
        .with_target(Expr::column(TEST_TABLE, "test_attr2"))
        .with_from(FromItem::relation(TEST_TABLE))
        .with_filter(Expr::eq(Expr::column(TEST_TABLE, "test_attr1"), value))
}

pub fn other_table_query() -> QueryTree {
    QueryTree::select()
        .with_target(Expr::column(OTHER_TABLE, "id"))
        .with_from(FromItem::relation(OTHER_TABLE))
}

/// 写入一个布局版本 1 的 redb 文件
pub fn write_v1_store(path: &Path, plans: &[LegacyPlanV1]) {
    let db = redb::Database::create(path).expect("Failed to create legacy database");
    let txn = db.begin_write().expect("Failed to begin write");
    {
        let mut meta = txn.open_table(META_TABLE).expect("Failed to open meta table");
        meta.insert(ByteKey(META_LAYOUT_VERSION.to_vec()), ByteKey(b"1".to_vec()))
            .expect("Failed to write layout version");
        let surface = surface_definition(1)
            .expect("v1 surface must exist")
            .render();
        meta.insert(ByteKey(META_SURFACE.to_vec()), ByteKey(surface.into_bytes()))
            .expect("Failed to write surface");

        let mut table = txn.open_table(PLANS_TABLE).expect("Failed to open plans table");
        for plan in plans {
            table
                .insert(
                    ByteKey(Fingerprint(plan.query_hash).to_key_bytes().to_vec()),
                    ByteKey(serde_json::to_vec(plan).expect("Failed to encode legacy plan")),
                )
                .expect("Failed to write legacy plan");
        }
    }
    txn.commit().expect("Failed to commit legacy database");
}

pub fn object(id: u32) -> ObjectId {
    ObjectId(id)
}
