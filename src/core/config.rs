//! 配置管理模块
//!
//! 提供核心库配置的加载、解析和校验。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//! title = "dxcore"
//! resizable = true
//!
//! [graphics]
//! frame_count = 2            # 同时在途的帧数 = 交换链缓冲数
//! vsync = true
//! debug_layer = false
//! back_buffer_format = "rgba8_unorm"
//! depth_format = "d24_unorm_s8_uint"
//! clear_color = [0.1, 0.1, 0.15, 1.0]
//!
//! [descriptors]
//! rtv = 32
//! dsv = 8
//! cbv = 256
//! srv = 256
//! uav = 64
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};
use crate::renderer::resource::TextureFormat;

/// 允许的最小在途帧数
pub const MIN_FRAME_COUNT: u32 = 2;
/// 允许的最大在途帧数
pub const MAX_FRAME_COUNT: u32 = 3;
/// 着色器可见 CBV/SRV/UAV 堆的描述符上限（Resource Binding Tier 1）
pub const MAX_SHADER_VISIBLE_DESCRIPTORS: u32 = 1_000_000;

/// 核心库配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 描述符堆容量
    #[serde(default)]
    pub descriptors: DescriptorConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default = "default_resizable")]
    pub resizable: bool,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 在途帧数，同时也是交换链缓冲数和命令分配器数
    #[serde(default = "default_frame_count")]
    pub frame_count: u32,

    /// 垂直同步
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// 启用 D3D12 调试层
    #[serde(default)]
    pub debug_layer: bool,

    /// 后备缓冲格式
    #[serde(default = "default_back_buffer_format")]
    pub back_buffer_format: TextureFormat,

    /// 深度模板缓冲格式
    #[serde(default = "default_depth_format")]
    pub depth_format: TextureFormat,

    /// 后备缓冲清屏颜色
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],
}

/// 各类描述符的容量
///
/// RTV 和 DSV 各自一个 CPU 堆；CBV、SRV、UAV 共用一个着色器可见堆，
/// 按顺序划分为三个子区间。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorConfig {
    #[serde(default = "default_rtv")]
    pub rtv: u32,
    #[serde(default = "default_dsv")]
    pub dsv: u32,
    #[serde(default = "default_cbv")]
    pub cbv: u32,
    #[serde(default = "default_srv")]
    pub srv: u32,
    #[serde(default = "default_uav")]
    pub uav: u32,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_file_output")]
    pub file_output: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_title() -> String { "dxcore".to_string() }
fn default_resizable() -> bool { true }
fn default_frame_count() -> u32 { 2 }
fn default_vsync() -> bool { true }
fn default_back_buffer_format() -> TextureFormat { TextureFormat::Rgba8Unorm }
fn default_depth_format() -> TextureFormat { TextureFormat::D24UnormS8Uint }
fn default_clear_color() -> [f32; 4] { [0.1, 0.1, 0.15, 1.0] }
fn default_rtv() -> u32 { 32 }
fn default_dsv() -> u32 { 8 }
fn default_cbv() -> u32 { 256 }
fn default_srv() -> u32 { 256 }
fn default_uav() -> u32 { 64 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "dxcore.log".to_string() }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            resizable: default_resizable(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            frame_count: default_frame_count(),
            vsync: default_vsync(),
            debug_layer: false,
            back_buffer_format: default_back_buffer_format(),
            depth_format: default_depth_format(),
            clear_color: default_clear_color(),
        }
    }
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            rtv: default_rtv(),
            dsv: default_dsv(),
            cbv: default_cbv(),
            srv: default_srv(),
            uav: default_uav(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或解析失败则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--width <value>` / `--height <value>`：窗口尺寸
    /// - `--frames <value>`：在途帧数
    /// - `--no-vsync`：关闭垂直同步
    /// - `--debug-layer`：启用 D3D12 调试层
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--no-vsync") {
            self.graphics.vsync = false;
        }

        if args.iter().any(|a| a == "--debug-layer") {
            self.graphics.debug_layer = true;
        }

        if let Some(width) = parse_flag_value(&args, "--width") {
            self.window.width = width;
        }

        if let Some(height) = parse_flag_value(&args, "--height") {
            self.window.height = height;
        }

        if let Some(frames) = parse_flag_value(&args, "--frames") {
            self.graphics.frame_count = frames;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(invalid("window.width/height", "Window dimensions must be greater than 0"));
        }

        let frames = self.graphics.frame_count;
        if !(MIN_FRAME_COUNT..=MAX_FRAME_COUNT).contains(&frames) {
            return Err(invalid(
                "graphics.frame_count",
                &format!("must be between {} and {}", MIN_FRAME_COUNT, MAX_FRAME_COUNT),
            ));
        }

        if self.graphics.back_buffer_format.is_depth() {
            return Err(invalid("graphics.back_buffer_format", "must be a color format"));
        }

        if !self.graphics.depth_format.is_depth() {
            return Err(invalid("graphics.depth_format", "must be a depth format"));
        }

        self.descriptors.validate(frames)
    }
}

impl DescriptorConfig {
    /// 校验描述符容量
    ///
    /// 交换链的 RTV 从 RTV 堆中分配，所以 RTV 容量至少要等于在途帧数。
    pub fn validate(&self, frame_count: u32) -> Result<()> {
        let fields = [
            ("descriptors.rtv", self.rtv),
            ("descriptors.dsv", self.dsv),
            ("descriptors.cbv", self.cbv),
            ("descriptors.srv", self.srv),
            ("descriptors.uav", self.uav),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(invalid(field, "capacity must be greater than 0"));
            }
        }

        if self.rtv < frame_count {
            return Err(invalid(
                "descriptors.rtv",
                &format!("must hold at least {} back buffer views", frame_count),
            ));
        }

        if self.shader_visible_total() > u64::from(MAX_SHADER_VISIBLE_DESCRIPTORS) {
            return Err(invalid(
                "descriptors.cbv/srv/uav",
                &format!("combined capacity exceeds {}", MAX_SHADER_VISIBLE_DESCRIPTORS),
            ));
        }

        Ok(())
    }

    /// CBV + SRV + UAV 总数
    pub fn shader_visible_total(&self) -> u64 {
        u64::from(self.cbv) + u64::from(self.srv) + u64::from(self.uav)
    }
}

fn parse_flag_value<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    let idx = args.iter().position(|a| a == flag)?;
    args.get(idx + 1)?.parse().ok()
}

fn invalid(field: &str, reason: &str) -> super::error::DxCoreError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
