//! dxcore - DirectX 12 引擎核心
//!
//! 提供设备初始化、描述符槽位分配、GPU 缓冲封装、资源状态屏障，
//! 以及基于 fence 的 CPU/GPU 帧同步。
//!
//! # 模块结构
//!
//! - `core`: 配置、日志、错误处理
//! - `renderer`: 与图形 API 无关的簿记（描述符、fence、在途帧、命令列表、屏障、缓冲布局）
//! - `gfx`: DirectX 12 绑定（仅 Windows）
//!
//! # 使用示例
//!
//! 帧协议可以脱离 GPU，用软件时间线驱动：
//!
//! ```
//! use dxcore::renderer::{FramePacer, SoftwareTimeline};
//!
//! let timeline = SoftwareTimeline::immediate();
//! let mut pacer = FramePacer::new(2)?;
//!
//! for frame in 0..4 {
//!     let slot = pacer.begin_frame(&timeline)?;
//!     assert_eq!(slot, frame % 2);
//!     pacer.end_frame(&timeline, (slot + 1) % 2)?;
//! }
//! assert_eq!(pacer.fence().last_signaled().value(), 4);
//! # Ok::<(), dxcore::core::DxCoreError>(())
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
