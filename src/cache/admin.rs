//! 管理接口
//!
//! 对外暴露的管理操作：模式开关、条目视图、清空与重置、删除单个条目、
//! 查看已保存的计划。这里的失败直接返回给调用方。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::coordinator::{CachedPlan, PlanCodec};
use crate::cache::entry::{DependencySet, EntryState, EntrySummary};
use crate::cache::manager::PlanCache;
use crate::cache::modes::{LogUsage, ModeController};
use crate::cache::stats_collector::CacheStats;
use crate::core::error::{AdminError, AdminResult};
use crate::core::types::Fingerprint;

/// 计划输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanFormat {
    #[default]
    Text,
    Json,
    Yaml,
    Xml,
}

impl FromStr for PlanFormat {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(PlanFormat::Text),
            "json" => Ok(PlanFormat::Json),
            "yaml" => Ok(PlanFormat::Yaml),
            "xml" => Ok(PlanFormat::Xml),
            _ => Err(AdminError::InvalidParameter(format!(
                "无法识别的输出格式: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for PlanFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanFormat::Text => write!(f, "text"),
            PlanFormat::Json => write!(f, "json"),
            PlanFormat::Yaml => write!(f, "yaml"),
            PlanFormat::Xml => write!(f, "xml"),
        }
    }
}

/// 不透明计划
///
/// 离线管理工具不知道规划器的计划类型，只按 JSON 原样展示负载。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpaquePlan(pub serde_json::Value);

impl CachedPlan for OpaquePlan {
    fn dependencies(&self) -> DependencySet {
        DependencySet::new()
    }

    fn explain(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.0.to_string())
    }
}

/// 管理接口
#[derive(Debug, Clone)]
pub struct PlanCacheAdmin {
    cache: Arc<PlanCache>,
    modes: Arc<ModeController>,
}

impl PlanCacheAdmin {
    pub fn new(cache: Arc<PlanCache>, modes: Arc<ModeController>) -> Self {
        Self { cache, modes }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.modes.set_enabled(enabled);
    }

    pub fn set_write_mode(&self, enabled: bool) {
        self.modes.set_write_mode(enabled);
    }

    /// 设置使用日志级别，取值见 [`LogUsage`]
    pub fn set_log_usage(&self, level: &str) -> AdminResult<LogUsage> {
        let level = level.parse::<LogUsage>().map_err(AdminError::InvalidParameter)?;
        self.modes.set_log_usage(level);
        Ok(level)
    }

    /// 全部条目，按指纹排序
    pub fn entries(&self) -> Vec<EntrySummary> {
        let mut entries: Vec<_> = self.cache.store().list().collect();
        entries.sort_by_key(|entry| entry.fingerprint);
        entries
    }

    /// 失效条目，按指纹排序
    pub fn invalid_entries(&self) -> Vec<EntrySummary> {
        let mut entries: Vec<_> = self
            .cache
            .store()
            .list()
            .filter(|entry| entry.state == EntryState::Invalid)
            .collect();
        entries.sort_by_key(|entry| entry.fingerprint);
        entries
    }

    /// 使全部条目失效，返回受影响的条目数
    pub fn clear(&self) -> AdminResult<usize> {
        let count = self.cache.invalidate_all()?;
        log::info!("计划缓存已清空，{} 个条目失效", count);
        Ok(count)
    }

    /// 删除全部条目，返回删除的条目数
    pub fn reset(&self) -> AdminResult<usize> {
        let count = self.cache.purge()?;
        log::info!("计划缓存已重置，删除 {} 个条目", count);
        Ok(count)
    }

    /// 删除全部失效条目
    pub fn purge_invalid(&self) -> AdminResult<usize> {
        Ok(self.cache.purge_invalid()?)
    }

    pub fn delete(&self, fingerprint: Fingerprint) -> AdminResult<()> {
        if self.cache.delete(fingerprint)? {
            Ok(())
        } else {
            Err(AdminError::PlanNotFound(fingerprint))
        }
    }

    /// 以指定格式输出已保存的计划
    pub fn show_plan<P, C>(&self, fingerprint: Fingerprint, codec: &C, format: &str) -> AdminResult<String>
    where
        P: CachedPlan,
        C: PlanCodec<P>,
    {
        let format = format.parse::<PlanFormat>()?;
        let entry = self
            .cache
            .store()
            .lookup(fingerprint)
            .ok_or(AdminError::PlanNotFound(fingerprint))?;
        let plan = codec
            .decode(entry.payload())
            .map_err(|e| AdminError::Decode(e.to_string()))?;

        let rendered = match format {
            PlanFormat::Text => {
                let mut out = format!(
                    "Fingerprint: {}\nState: {}\nUsage: {}\nDependencies: {}\n",
                    fingerprint,
                    entry.state(),
                    entry.usage_count(),
                    entry.dependencies().summary()
                );
                if !entry.metadata().query_text.is_empty() {
                    out.push_str(&format!("Query: {}\n", entry.metadata().query_text));
                }
                out.push_str(&plan.explain());
                out
            }
            PlanFormat::Json | PlanFormat::Yaml => {
                let value = json!({
                    "fingerprint": fingerprint.to_string(),
                    "state": entry.state().to_string(),
                    "usage_count": entry.usage_count(),
                    "dependencies": entry.dependencies(),
                    "query_text": entry.metadata().query_text,
                    "created_at": entry.metadata().created_at.to_rfc3339(),
                    "plan": plan.explain(),
                });
                if format == PlanFormat::Json {
                    serde_json::to_string_pretty(&value)
                        .map_err(|e| AdminError::Decode(e.to_string()))?
                } else {
                    serde_yaml::to_string(&value).map_err(|e| AdminError::Decode(e.to_string()))?
                }
            }
            PlanFormat::Xml => {
                let fields = [
                    ("fingerprint", fingerprint.to_string()),
                    ("state", entry.state().to_string()),
                    ("usage-count", entry.usage_count().to_string()),
                    ("dependencies", entry.dependencies().summary()),
                    ("query-text", entry.metadata().query_text.clone()),
                    ("created-at", entry.metadata().created_at.to_rfc3339()),
                    ("plan", plan.explain()),
                ];
                let mut out = String::from("<saved-plan>\n");
                for (tag, value) in fields {
                    out.push_str(&format!("  <{tag}>{}</{tag}>\n", escape_xml(&value)));
                }
                out.push_str("</saved-plan>\n");
                out
            }
        };
        Ok(rendered)
    }

    /// 已安装的管理接口定义
    pub fn surface(&self) -> AdminResult<String> {
        Ok(self.cache.store().backend().surface()?)
    }

    pub fn layout_version(&self) -> AdminResult<u32> {
        Ok(self.cache.store().backend().layout_version()?)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
