//! 日志系统模块
//!
//! 基于 `tracing` 的结构化日志。控制台输出始终开启，
//! 文件输出通过 `tracing-appender` 按天滚动。
//!
//! ```no_run
//! use dxcore::core::{config::LogLevel, log};
//!
//! log::init_logger(LogLevel::Debug, true, Some("logs/dxcore.log"));
//! tracing::info!(width = 1280, height = 720, "Swap chain created");
//! ```

use std::path::Path;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::config::LogLevel;

/// 初始化日志系统
///
/// 必须在程序开始时调用一次。`RUST_LOG` 环境变量优先于 `level`。
///
/// * `level` - 日志级别
/// * `file_output` - 是否同时输出到文件
/// * `log_file_path` - 日志文件路径，默认为 "dxcore.log"
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_ansi(true);

    if file_output {
        let log_path = log_file_path.unwrap_or("dxcore.log");
        let path = Path::new(log_path);
        let directory = path.parent().unwrap_or(Path::new("."));
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("dxcore.log");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, filename);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .init();
    }
}

impl LogLevel {
    /// `EnvFilter` 指令字符串
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// GPU 核心日志 - Info 级别
#[macro_export]
macro_rules! gpu_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "dxcore::gpu", $($arg)*)
    };
}

/// GPU 核心日志 - Warn 级别
#[macro_export]
macro_rules! gpu_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "dxcore::gpu", $($arg)*)
    };
}

/// 帧级别日志，默认被过滤
#[macro_export]
macro_rules! frame_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "dxcore::frame", $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(LogLevel::Trace.as_filter(), "trace");
    }
}
