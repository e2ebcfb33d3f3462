// 日志工具模块
//
// 封装 flexi_logger 的初始化和关闭操作，确保异步日志正确 flush。
// 计划缓存的使用日志（命中 / 写入）也经由这里配置的 logger 输出。

use crate::config::Config;
use crate::core::error::{PlanCacheError, PlanCacheResult};
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use parking_lot::Mutex;

/// 全局日志句柄，用于程序退出时 flush
static LOGGER_HANDLE: Mutex<Option<LoggerHandle>> = Mutex::new(None);

/// 初始化日志系统
///
/// 重复调用时保留第一次的配置，直接返回成功。
///
/// # Examples
/// ```no_run
/// use plancache::config::Config;
/// use plancache::utils::logging;
///
/// let config = Config::default();
/// logging::init(&config).expect("日志初始化失败");
/// ```
pub fn init(config: &Config) -> PlanCacheResult<()> {
    let mut guard = LOGGER_HANDLE.lock();
    if guard.is_some() {
        return Ok(());
    }

    std::fs::create_dir_all(&config.log.dir)?;

    let handle = Logger::try_with_str(&config.log.level)
        .map_err(|e| PlanCacheError::Config(format!("无效的日志级别 {}: {}", config.log.level, e)))?
        .log_to_file(
            FileSpec::default()
                .basename(&config.log.file)
                .directory(&config.log.dir),
        )
        .rotate(
            Criterion::Size(config.log.max_file_size),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config.log.max_files),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .write_mode(WriteMode::Async)
        .append()
        .start()
        .map_err(|e| PlanCacheError::Config(format!("日志系统启动失败: {}", e)))?;

    *guard = Some(handle);
    drop(guard);

    log::info!("日志系统初始化完成: {}/{}", config.log.dir, config.log.file);
    Ok(())
}

/// 刷新缓冲区中的日志，不关闭日志系统
pub fn flush() {
    if let Some(handle) = LOGGER_HANDLE.lock().as_ref() {
        handle.flush();
    }
}

/// 刷新并关闭日志系统
///
/// 在程序退出前调用，确保所有异步日志都已写入文件
pub fn shutdown() {
    if let Some(handle) = LOGGER_HANDLE.lock().take() {
        handle.flush();
        handle.shutdown();
    }
}

/// 检查日志系统是否已初始化
pub fn is_initialized() -> bool {
    LOGGER_HANDLE.lock().is_some()
}
