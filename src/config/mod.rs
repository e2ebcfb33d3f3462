use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::modes::{CacheModes, LogUsage};
use crate::core::error::{PlanCacheError, PlanCacheResult};

/// 日志配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    pub max_file_size: u64,
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            file: "plancache".to_string(),
            max_file_size: 100 * 1024 * 1024, // 100MB
            max_files: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// redb 文件路径，为空时使用内存后端
    pub storage_path: String,
    /// 最大条目数，缺省不限制
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    pub enabled: bool,
    pub write_mode: bool,
    pub log_usage: LogUsage,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        let modes = CacheModes::default();
        Self {
            storage_path: "data/plancache.redb".to_string(),
            capacity: None,
            enabled: modes.enabled,
            write_mode: modes.write_mode,
            log_usage: modes.log_usage,
            log: LogConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> PlanCacheResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&content)?;
        if !config.storage_path.is_empty() {
            let base = path.as_ref().parent().unwrap_or_else(|| Path::new(""));
            config.storage_path = Config::resolve_storage_path(&config.storage_path, base)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> PlanCacheResult<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> PlanCacheResult<()> {
        if self.capacity == Some(0) {
            return Err(PlanCacheError::Config("capacity 必须大于 0".to_string()));
        }
        if self.log.max_files == 0 {
            return Err(PlanCacheError::Config("log.max_files 必须大于 0".to_string()));
        }
        if self.log.level.trim().is_empty() {
            return Err(PlanCacheError::Config("log.level 不能为空".to_string()));
        }
        Ok(())
    }

    /// 全局默认缓存模式
    pub fn modes(&self) -> CacheModes {
        CacheModes {
            enabled: self.enabled,
            write_mode: self.write_mode,
            log_usage: self.log_usage,
        }
    }

    /// 解析存储路径：`~` 展开为用户主目录，相对路径相对于配置文件所在目录
    #[allow(deprecated)]
    fn resolve_storage_path(storage_path: &str, base: &Path) -> PlanCacheResult<String> {
        let path = PathBuf::from(storage_path);

        if path.is_absolute() {
            return Ok(storage_path.to_string());
        }

        if let Some(relative_path) = storage_path.strip_prefix('~') {
            if let Some(home_dir) = env::home_dir() {
                let relative_path = relative_path.trim_start_matches(['/', '\\']);
                let absolute_path = home_dir.join(relative_path);
                return Ok(absolute_path.to_string_lossy().into_owned());
            }
            return Err(PlanCacheError::Config("无法获取用户主目录".to_string()));
        }

        Ok(base.join(&path).to_string_lossy().into_owned())
    }
}
