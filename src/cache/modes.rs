//! 缓存模式控制
//!
//! 全局默认值加会话级覆盖。每次查询执行开始时解析出一份 `CacheModes`，
//! 之后的修改只影响后续查询，不影响正在执行中的查询。

use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// 使用日志级别
///
/// 取值与宿主数据库的消息级别一致；`None` 表示不输出使用日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogUsage {
    #[default]
    None,
    Debug5,
    Debug4,
    Debug3,
    Debug2,
    Debug1,
    Debug,
    Log,
    Info,
    Notice,
    Warning,
}

impl LogUsage {
    pub const ALL: [LogUsage; 11] = [
        LogUsage::None,
        LogUsage::Debug5,
        LogUsage::Debug4,
        LogUsage::Debug3,
        LogUsage::Debug2,
        LogUsage::Debug1,
        LogUsage::Debug,
        LogUsage::Log,
        LogUsage::Info,
        LogUsage::Notice,
        LogUsage::Warning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogUsage::None => "none",
            LogUsage::Debug5 => "debug5",
            LogUsage::Debug4 => "debug4",
            LogUsage::Debug3 => "debug3",
            LogUsage::Debug2 => "debug2",
            LogUsage::Debug1 => "debug1",
            LogUsage::Debug => "debug",
            LogUsage::Log => "log",
            LogUsage::Info => "info",
            LogUsage::Notice => "notice",
            LogUsage::Warning => "warning",
        }
    }

    /// 映射到 `log` 级别
    pub fn level(&self) -> Option<log::Level> {
        match self {
            LogUsage::None => None,
            // `debug` 是 `debug2` 的别名
            LogUsage::Debug5
            | LogUsage::Debug4
            | LogUsage::Debug3
            | LogUsage::Debug2
            | LogUsage::Debug => Some(log::Level::Trace),
            LogUsage::Debug1 => Some(log::Level::Debug),
            LogUsage::Log | LogUsage::Info | LogUsage::Notice => Some(log::Level::Info),
            LogUsage::Warning => Some(log::Level::Warn),
        }
    }
}

impl fmt::Display for LogUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogUsage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        LogUsage::ALL
            .iter()
            .find(|level| level.as_str() == normalized)
            .copied()
            .ok_or_else(|| format!("无效的使用日志级别: {}", s))
    }
}

/// 某次查询执行时生效的模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheModes {
    /// 是否启用缓存（查找与写入）
    pub enabled: bool,
    /// 未命中时是否写入新条目
    pub write_mode: bool,
    pub log_usage: LogUsage,
}

impl Default for CacheModes {
    fn default() -> Self {
        Self {
            enabled: true,
            write_mode: false,
            log_usage: LogUsage::None,
        }
    }
}

/// 会话级覆盖，`None` 表示沿用全局默认值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionModes {
    pub enabled: Option<bool>,
    pub write_mode: Option<bool>,
    pub log_usage: Option<LogUsage>,
}

impl SessionModes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn with_write_mode(mut self, write_mode: bool) -> Self {
        self.write_mode = Some(write_mode);
        self
    }

    pub fn with_log_usage(mut self, log_usage: LogUsage) -> Self {
        self.log_usage = Some(log_usage);
        self
    }
}

/// 模式控制器
#[derive(Debug, Default)]
pub struct ModeController {
    defaults: RwLock<CacheModes>,
}

impl ModeController {
    pub fn new(defaults: CacheModes) -> Self {
        Self {
            defaults: RwLock::new(defaults),
        }
    }

    pub fn defaults(&self) -> CacheModes {
        *self.defaults.read()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.defaults.write().enabled = enabled;
        log::info!("计划缓存全局开关: {}", enabled);
    }

    pub fn set_write_mode(&self, write_mode: bool) {
        self.defaults.write().write_mode = write_mode;
        log::info!("计划缓存写入模式: {}", write_mode);
    }

    pub fn set_log_usage(&self, log_usage: LogUsage) {
        self.defaults.write().log_usage = log_usage;
        log::info!("计划缓存使用日志级别: {}", log_usage);
    }

    /// 合并全局默认值与会话覆盖，得到本次执行的模式
    pub fn resolve(&self, session: &SessionModes) -> CacheModes {
        let defaults = self.defaults();
        CacheModes {
            enabled: session.enabled.unwrap_or(defaults.enabled),
            write_mode: session.write_mode.unwrap_or(defaults.write_mode),
            log_usage: session.log_usage.unwrap_or(defaults.log_usage),
        }
    }
}
