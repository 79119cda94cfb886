//! 错误处理模块
//!
//! 定义了整个核心库统一使用的错误类型。
//!
//! 错误分为三层：
//! - `DxCoreError`：对外暴露的顶层错误
//! - `ConfigError`：配置加载与校验
//! - `GraphicsError`：设备、描述符、同步、资源状态相关的错误

use std::fmt;

/// 核心库统一的 Result 类型
pub type Result<T> = std::result::Result<T, DxCoreError>;

/// dxcore 的错误类型
#[derive(Debug)]
pub enum DxCoreError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// IO 错误
    Io(std::io::Error),

    /// 日志系统错误
    Log(String),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 交换链错误
    SwapchainError(String),

    /// 资源创建失败
    ResourceCreation(String),

    /// 命令记录或提交失败
    CommandExecution(String),

    /// 描述符堆已满
    DescriptorHeapExhausted { heap: &'static str, capacity: u32 },

    /// 描述符 ID 从未分配过
    InvalidDescriptor { heap: &'static str, id: u32 },

    /// 非法的资源状态转换
    InvalidStateTransition(String),

    /// Fence 同步失败
    Synchronization(String),

    /// 交换链缓冲无法恢复，上下文不能再使用
    ContextLost(String),
}

impl fmt::Display for DxCoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DxCoreError::Config(e) => write!(f, "Configuration error: {}", e),
            DxCoreError::Graphics(e) => write!(f, "Graphics error: {}", e),
            DxCoreError::Io(e) => write!(f, "IO error: {}", e),
            DxCoreError::Log(msg) => write!(f, "Log error: {}", msg),
            DxCoreError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            DxCoreError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::SwapchainError(msg) => write!(f, "Swapchain error: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::DescriptorHeapExhausted { heap, capacity } => {
                write!(f, "{} descriptor heap exhausted (capacity {})", heap, capacity)
            }
            GraphicsError::InvalidDescriptor { heap, id } => {
                write!(f, "{} descriptor {} was never allocated", heap, id)
            }
            GraphicsError::InvalidStateTransition(msg) => {
                write!(f, "Invalid resource state transition: {}", msg)
            }
            GraphicsError::Synchronization(msg) => write!(f, "Synchronization failed: {}", msg),
            GraphicsError::ContextLost(msg) => write!(f, "Graphics context lost: {}", msg),
        }
    }
}

impl std::error::Error for DxCoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DxCoreError::Io(e) => Some(e),
            DxCoreError::Config(e) => Some(e),
            DxCoreError::Graphics(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}

impl From<std::io::Error> for DxCoreError {
    fn from(err: std::io::Error) -> Self {
        DxCoreError::Io(err)
    }
}

impl From<ConfigError> for DxCoreError {
    fn from(err: ConfigError) -> Self {
        DxCoreError::Config(err)
    }
}

impl From<GraphicsError> for DxCoreError {
    fn from(err: GraphicsError) -> Self {
        DxCoreError::Graphics(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphics_error_messages() {
        let err: DxCoreError = GraphicsError::DescriptorHeapExhausted {
            heap: "RTV",
            capacity: 4,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Graphics error: RTV descriptor heap exhausted (capacity 4)"
        );

        let err = GraphicsError::InvalidDescriptor { heap: "SRV", id: 7 };
        assert_eq!(err.to_string(), "SRV descriptor 7 was never allocated");

        let err: DxCoreError = GraphicsError::ContextLost("resize failed".to_string()).into();
        assert_eq!(err.to_string(), "Graphics error: Graphics context lost: resize failed");
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let err: DxCoreError = ConfigError::ParseError("bad toml".to_string()).into();
        assert!(err.source().is_some());

        let err = DxCoreError::Runtime("oops".to_string());
        assert!(err.source().is_none());
    }
}
