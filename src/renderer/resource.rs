//! 资源布局与生命周期
//!
//! 与 API 无关的资源计算：
//! - 常量缓冲区 256 字节对齐
//! - 类型化缓冲区的步长和偏移
//! - 纹理格式与颜色缓冲描述
//! - `ReleaseQueue`：按 fence 值延迟释放 GPU 仍可能在使用的对象

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::error::{GraphicsError, Result};
use crate::renderer::barrier::ResourceState;
use crate::renderer::sync::FenceValue;

/// 常量缓冲区视图要求的对齐
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 向上对齐到 `alignment`（必须是 2 的幂）
pub fn align_up(size: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (size + alignment - 1) & !(alignment - 1)
}

/// 常量缓冲区的字节大小（对齐到 256）
pub fn constant_buffer_byte_size(size: u64) -> u64 {
    align_up(size, CONSTANT_BUFFER_ALIGNMENT)
}

/// 缓冲区所在的堆
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapType {
    /// GPU 本地内存，CPU 不可访问
    Default,
    /// CPU 写、GPU 读
    Upload,
    /// GPU 写、CPU 读
    Readback,
}

impl HeapType {
    /// 该堆上资源必须使用的创建状态
    pub fn initial_state(&self) -> ResourceState {
        match self {
            HeapType::Default => ResourceState::COMMON,
            HeapType::Upload => ResourceState::GENERIC_READ,
            HeapType::Readback => ResourceState::COPY_DEST,
        }
    }
}

/// 类型化缓冲区的布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// 每个元素占用的字节数（可能已对齐）
    pub stride: u64,
    /// 元素数量
    pub count: u64,
}

impl BufferLayout {
    /// 紧密排列的元素数组
    pub fn packed(element_size: u64, count: u64) -> Self {
        Self {
            stride: element_size,
            count,
        }
    }

    /// 常量缓冲区数组，每个元素对齐到 256 字节
    pub fn constant(element_size: u64, count: u64) -> Self {
        Self {
            stride: constant_buffer_byte_size(element_size),
            count,
        }
    }

    pub fn for_type<T>(count: u64, is_constant_buffer: bool) -> Self {
        let size = std::mem::size_of::<T>() as u64;
        if is_constant_buffer {
            Self::constant(size, count)
        } else {
            Self::packed(size, count)
        }
    }

    /// 总字节数
    pub fn byte_size(&self) -> u64 {
        self.stride * self.count
    }

    /// 第 `index` 个元素的字节偏移
    pub fn offset_of(&self, index: u64) -> Result<u64> {
        if index >= self.count {
            return Err(GraphicsError::ResourceCreation(format!(
                "element {} out of bounds ({} elements)",
                index, self.count
            ))
            .into());
        }
        Ok(self.stride * index)
    }

    /// 顶点/索引缓冲视图里的字节数，视图字段只有 32 位
    pub fn view_byte_size(&self) -> Result<u32> {
        let size = self
            .stride
            .checked_mul(self.count)
            .ok_or_else(|| GraphicsError::ResourceCreation("buffer size overflows u64".to_string()))?;
        u32::try_from(size).map_err(|_| {
            GraphicsError::ResourceCreation(format!("buffer of {} bytes is too large for a buffer view", size)).into()
        })
    }

    pub fn view_stride(&self) -> Result<u32> {
        u32::try_from(self.stride).map_err(|_| {
            GraphicsError::ResourceCreation(format!("stride of {} bytes is too large for a buffer view", self.stride))
                .into()
        })
    }
}

/// 纹理格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    R11G11B10Float,
    D24UnormS8Uint,
    D32Float,
}

impl TextureFormat {
    /// 每像素字节数
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::R32Float
            | TextureFormat::R11G11B10Float
            | TextureFormat::D24UnormS8Uint
            | TextureFormat::D32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::D24UnormS8Uint | TextureFormat::D32Float)
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, TextureFormat::D24UnormS8Uint)
    }

    /// 能否作为 UAV 使用
    pub fn supports_uav(&self) -> bool {
        !self.is_depth() && !matches!(self, TextureFormat::Rgba8UnormSrgb)
    }
}

/// 颜色缓冲（可渲染、可采样的 2D 纹理）描述
#[derive(Debug, Clone, PartialEq)]
pub struct ColorBufferDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// 优化清屏值，清屏时使用相同的值可以走快速路径
    pub clear_color: [f32; 4],
    /// 是否额外创建 UAV
    pub allow_uav: bool,
    pub name: Option<String>,
}

impl ColorBufferDesc {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            allow_uav: false,
            name: None,
        }
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_uav(mut self) -> Self {
        self.allow_uav = true;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "color buffer size {}x{} must be non-zero",
                self.width, self.height
            ))
            .into());
        }
        if self.format.is_depth() {
            return Err(GraphicsError::ResourceCreation(format!(
                "{:?} is a depth format, not a color format",
                self.format
            ))
            .into());
        }
        if self.allow_uav && !self.format.supports_uav() {
            return Err(GraphicsError::ResourceCreation(format!(
                "{:?} cannot be used as an unordered access view",
                self.format
            ))
            .into());
        }
        Ok(())
    }

    /// 未压缩的字节数（单个 mip）
    pub fn byte_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.format.bytes_per_pixel())
    }
}

/// 按 fence 值延迟释放
///
/// GPU 可能仍在读取的对象（上传用的中转缓冲、改变尺寸前的旧资源）
/// 不能立刻 drop，而是挂在这里直到提交它们的 fence 值完成。
#[derive(Debug)]
pub struct ReleaseQueue<T> {
    entries: VecDeque<(FenceValue, T)>,
}

impl<T> ReleaseQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// 在 `fence` 完成后释放 `item`
    ///
    /// fence 值单调递增，所以队列按 fence 值有序。
    pub fn retire(&mut self, item: T, fence: FenceValue) {
        let position = self
            .entries
            .iter()
            .rposition(|(value, _)| *value <= fence)
            .map(|p| p + 1)
            .unwrap_or(0);
        self.entries.insert(position, (fence, item));
    }

    /// 释放所有 fence 值 <= `completed` 的对象，返回释放的个数
    pub fn collect(&mut self, completed: FenceValue) -> usize {
        let mut released = 0;
        while let Some((value, _)) = self.entries.front() {
            if *value > completed {
                break;
            }
            self.entries.pop_front();
            released += 1;
        }
        released
    }

    /// 释放全部（仅在确认 GPU 空闲后调用）
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for ReleaseQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_view_sizes_fit_in_u32() {
        let layout = BufferLayout::packed(12, 4);
        assert_eq!(layout.view_byte_size().unwrap(), 48);
        assert_eq!(layout.view_stride().unwrap(), 12);

        // 4 GiB 正好越过 32 位
        let huge = BufferLayout::packed(1 << 20, 1 << 12);
        assert_eq!(huge.byte_size(), 1 << 32);
        assert!(matches!(
            huge.view_byte_size(),
            Err(crate::core::error::DxCoreError::Graphics(GraphicsError::ResourceCreation(_)))
        ));

        let overflow = BufferLayout::packed(u64::MAX, 2);
        assert!(overflow.view_byte_size().is_err());
        assert!(BufferLayout::packed(u64::from(u32::MAX) + 1, 1).view_stride().is_err());
    }

    #[test]
    fn test_alignment() {
        assert_eq!(constant_buffer_byte_size(1), 256);
        assert_eq!(constant_buffer_byte_size(256), 256);
        assert_eq!(constant_buffer_byte_size(300), 512);
        assert_eq!(align_up(13, 4), 16);
        assert_eq!(align_up(0, 256), 0);
    }

    #[test]
    fn test_buffer_layout() {
        #[allow(dead_code)]
        struct ObjectConstants {
            world: [[f32; 4]; 4],
            tint: [f32; 4],
        }

        let cb = BufferLayout::for_type::<ObjectConstants>(10, true);
        assert_eq!(cb.stride, 256);
        assert_eq!(cb.byte_size(), 2560);
        assert_eq!(cb.offset_of(3).unwrap(), 768);
        assert!(cb.offset_of(10).is_err());

        let vb = BufferLayout::for_type::<[f32; 3]>(4, false);
        assert_eq!(vb.stride, 12);
        assert_eq!(vb.byte_size(), 48);
    }

    #[test]
    fn test_heap_initial_states() {
        assert_eq!(HeapType::Upload.initial_state(), ResourceState::GENERIC_READ);
        assert_eq!(HeapType::Readback.initial_state(), ResourceState::COPY_DEST);
        assert_eq!(HeapType::Default.initial_state(), ResourceState::COMMON);
    }

    #[test]
    fn test_texture_format() {
        assert!(TextureFormat::D32Float.is_depth());
        assert!(TextureFormat::D24UnormS8Uint.has_stencil());
        assert!(!TextureFormat::Rgba8Unorm.is_depth());
        assert_eq!(TextureFormat::Rgba16Float.bytes_per_pixel(), 8);
        assert!(!TextureFormat::Rgba8UnormSrgb.supports_uav());
    }

    #[test]
    fn test_color_buffer_desc() {
        let desc = ColorBufferDesc::new(1920, 1080, TextureFormat::Rgba16Float)
            .with_clear_color([0.2, 0.3, 0.4, 1.0])
            .with_uav()
            .with_name("HDR Target");
        assert!(desc.validate().is_ok());
        assert_eq!(desc.byte_size(), 1920 * 1080 * 8);

        assert!(ColorBufferDesc::new(0, 16, TextureFormat::Rgba8Unorm).validate().is_err());
        assert!(ColorBufferDesc::new(16, 16, TextureFormat::D32Float).validate().is_err());
        assert!(ColorBufferDesc::new(16, 16, TextureFormat::Rgba8UnormSrgb)
            .with_uav()
            .validate()
            .is_err());
    }

    #[test]
    fn test_release_queue_keeps_items_until_fence() {
        let staging = Rc::new(());
        let mut queue = ReleaseQueue::new();

        queue.retire(Rc::clone(&staging), FenceValue::new(2));
        queue.retire(Rc::clone(&staging), FenceValue::new(5));
        assert_eq!(Rc::strong_count(&staging), 3);

        assert_eq!(queue.collect(FenceValue::new(1)), 0);
        assert_eq!(queue.collect(FenceValue::new(4)), 1);
        assert_eq!(Rc::strong_count(&staging), 2);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.collect(FenceValue::new(5)), 1);
        assert!(queue.is_empty());
        assert_eq!(Rc::strong_count(&staging), 1);
    }

    #[test]
    fn test_release_queue_orders_by_fence() {
        let mut queue = ReleaseQueue::new();
        queue.retire("late", FenceValue::new(9));
        queue.retire("early", FenceValue::new(3));

        assert_eq!(queue.collect(FenceValue::new(3)), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.clear(), 1);
    }
}
