//! 核心功能模块
//!
//! 与图形 API 无关的基础设施：配置、日志、错误处理。
//!
//! - `config`：从 TOML 加载并校验配置
//! - `log`：基于 tracing 的结构化日志
//! - `error`：统一的错误类型

pub mod config;
pub mod error;
pub mod log;

pub use config::Config;
pub use error::{DxCoreError, Result};
