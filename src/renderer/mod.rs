//! 渲染器簿记模块
//!
//! 与具体图形 API 无关的部分：描述符槽位、fence 协议、在途帧、
//! 命令列表状态、资源状态屏障、缓冲布局与延迟释放、交换链视图槽位。
//!
//! 这些类型不持有任何 GPU 对象，可以在任何平台上测试；
//! `gfx::dx12` 把它们绑定到真正的 D3D12 对象上。

pub mod barrier;
pub mod command;
pub mod descriptor;
pub mod frame;
pub mod resource;
pub mod swapchain;
pub mod sync;

pub use barrier::{Barrier, ResourceId, ResourceState, ResourceStateTracker};
pub use command::{CommandListState, CommandListTracker, QueueType};
pub use descriptor::{
    DescriptorAllocatorSet, DescriptorHandle, DescriptorHeapLayout, DescriptorId, DescriptorType,
    HeapBase, ResourceAllocator,
};
pub use frame::FramePacer;
pub use resource::{BufferLayout, ColorBufferDesc, ReleaseQueue, TextureFormat};
pub use swapchain::{ResizeRequest, SwapChainViews};
pub use sync::{FenceManager, FenceValue, GpuTimeline, SoftwareTimeline};
