//! 存储布局
//!
//! 持久化记录格式、布局版本以及管理接口定义（视图与管理函数）。
//!
//! 版本历史：
//! - 1：记录只保存查询哈希、计划、启用标志与表依赖列表
//! - 2：增加查询文本、计划哈希、索引/函数依赖、使用计数与创建时间
//!
//! 升级后的管理接口必须与全新安装逐字节一致，因此接口定义只由版本号决定。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::entry::{plan_hash, DependencySet};
use crate::core::error::{StorageError, StorageResult};
use crate::core::types::{Fingerprint, ObjectId};

/// 当前布局版本
pub const LAYOUT_VERSION: u32 = 2;

/// 元数据键
pub const META_LAYOUT_VERSION: &[u8] = b"layout_version";
pub const META_SURFACE: &[u8] = b"surface";

/// 当前版本的持久化计划记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPlan {
    pub fingerprint: Fingerprint,
    pub query_text: String,
    pub plan_hash: u64,
    pub payload: Vec<u8>,
    pub dependencies: DependencySet,
    pub valid: bool,
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
}

/// 版本 1 的计划记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyPlanV1 {
    pub query_hash: u64,
    pub plan: Vec<u8>,
    pub enable: bool,
    pub reloids: Vec<u32>,
}

impl LegacyPlanV1 {
    /// 升级为当前版本记录
    ///
    /// 旧记录没有查询文本与使用计数，分别置为空串与 0。
    pub fn upgrade(self, migrated_at: DateTime<Utc>) -> StoredPlan {
        let mut dependencies = DependencySet::new();
        dependencies.relations = self.reloids.into_iter().map(ObjectId).collect();
        StoredPlan {
            fingerprint: Fingerprint(self.query_hash),
            query_text: String::new(),
            plan_hash: plan_hash(&self.plan),
            payload: self.plan,
            dependencies,
            valid: self.enable,
            usage_count: 0,
            created_at: migrated_at,
        }
    }
}

pub fn encode_plan(plan: &StoredPlan) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(plan).map_err(|e| StorageError::SerializeError(e.to_string()))
}

pub fn decode_plan(bytes: &[u8]) -> StorageResult<StoredPlan> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::DeserializeError(e.to_string()))
}

/// 按给定布局版本解码原始记录，并升级到当前版本
pub fn upgrade_records(version: u32, raw: Vec<Vec<u8>>) -> StorageResult<Vec<StoredPlan>> {
    match version {
        1 => {
            let migrated_at = Utc::now();
            raw.iter()
                .map(|bytes| {
                    serde_json::from_slice::<LegacyPlanV1>(bytes)
                        .map(|legacy| legacy.upgrade(migrated_at))
                        .map_err(|e| StorageError::DeserializeError(e.to_string()))
                })
                .collect()
        }
        LAYOUT_VERSION => raw.iter().map(|bytes| decode_plan(bytes)).collect(),
        other => Err(StorageError::UnsupportedLayout(other)),
    }
}

/// 管理接口对象种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    View,
    Function,
}

/// 管理接口中的一个对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceObject {
    pub kind: SurfaceKind,
    pub name: &'static str,
    pub signature: &'static str,
}

/// 某个布局版本对外暴露的管理接口
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceDefinition {
    pub version: u32,
    pub objects: Vec<SurfaceObject>,
}

impl SurfaceDefinition {
    /// 规范化文本形式，持久化到元数据表
    pub fn render(&self) -> String {
        let mut out = format!("-- plan cache surface v{}\n", self.version);
        for object in &self.objects {
            let kind = match object.kind {
                SurfaceKind::View => "VIEW",
                SurfaceKind::Function => "FUNCTION",
            };
            out.push_str(&format!("{} {}{};\n", kind, object.name, object.signature));
        }
        out
    }
}

/// 返回指定布局版本的管理接口定义
pub fn surface_definition(version: u32) -> Option<SurfaceDefinition> {
    let objects = match version {
        1 => vec![
            SurfaceObject {
                kind: SurfaceKind::View,
                name: "plan_entries",
                signature: "(query_hash, enable, reloids)",
            },
            SurfaceObject {
                kind: SurfaceKind::Function,
                name: "show_plan",
                signature: "(query_hash)",
            },
        ],
        2 => vec![
            SurfaceObject {
                kind: SurfaceKind::View,
                name: "plan_entries",
                signature: "(fingerprint, state, usage_count, dependencies, query_text)",
            },
            SurfaceObject {
                kind: SurfaceKind::View,
                name: "invalid_entries",
                signature: "(fingerprint, dependencies, query_text)",
            },
            SurfaceObject {
                kind: SurfaceKind::Function,
                name: "show_plan",
                signature: "(fingerprint, format)",
            },
            SurfaceObject {
                kind: SurfaceKind::Function,
                name: "delete",
                signature: "(fingerprint)",
            },
            SurfaceObject {
                kind: SurfaceKind::Function,
                name: "clear",
                signature: "()",
            },
            SurfaceObject {
                kind: SurfaceKind::Function,
                name: "reset",
                signature: "()",
            },
            SurfaceObject {
                kind: SurfaceKind::Function,
                name: "set_write_mode",
                signature: "(enabled)",
            },
            SurfaceObject {
                kind: SurfaceKind::Function,
                name: "set_log_usage",
                signature: "(level)",
            },
        ],
        _ => return None,
    };
    Some(SurfaceDefinition { version, objects })
}

/// 当前版本管理接口的规范化文本
pub fn current_surface() -> String {
    surface_definition(LAYOUT_VERSION)
        .map(|surface| surface.render())
        .unwrap_or_default()
}
