//! DirectX 12 后端
//!
//! - `context`：设备、命令队列、交换链、帧循环（`Dx12Context`）
//! - `descriptor`：三个物理描述符堆与五个槽位分配器
//! - `sync`：fence + 事件，实现 `GpuTimeline`
//! - `barrier`：资源状态屏障的 D3D12 表示
//! - `buffer`：上传缓冲、默认缓冲、颜色缓冲、可读写结构化缓冲
//! - `format`：纹理格式到 DXGI 格式的映射

pub mod barrier;
pub mod buffer;
pub mod context;
pub mod descriptor;
pub mod format;
pub mod sync;

pub use buffer::{ColorBuffer, DefaultBuffer, RWStructuredBuffer, UploadBuffer};
pub use context::Dx12Context;
pub use descriptor::{Dx12DescriptorHeap, Dx12DescriptorHeaps};
pub use sync::Dx12Fence;

use crate::core::error::{DxCoreError, GraphicsError};

/// 把 windows-rs 的错误包装成指定种类的图形错误
pub(crate) fn graphics_error(
    kind: fn(String) -> GraphicsError,
    what: &'static str,
) -> impl FnOnce(windows::core::Error) -> DxCoreError {
    move |e| DxCoreError::Graphics(kind(format!("{}: {:?}", what, e)))
}
