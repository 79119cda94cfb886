//! 交换链视图槽位
//!
//! 后备缓冲的 RTV 和深度缓冲的 DSV 在初始化时各分配一次。
//! 改变尺寸只在这些槽位上重建视图，不再消耗新的描述符。
//! 重建失败且无法恢复时标记为丢失，之后的帧和 resize 都返回 `ContextLost`。

use crate::core::error::{GraphicsError, Result};
use crate::renderer::descriptor::{DescriptorAllocatorSet, DescriptorId, DescriptorType};

/// 一次 resize 请求的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeRequest {
    /// 宽或高为 0（窗口最小化），什么也不做
    Ignore,
    /// 尺寸没有变化
    Unchanged,
    /// 需要重建交换链缓冲
    Rebuild { width: u32, height: u32 },
}

#[derive(Debug, Clone)]
pub struct SwapChainViews {
    first_rtv: DescriptorId,
    buffer_count: u32,
    dsv: DescriptorId,
    width: u32,
    height: u32,
    lost: bool,
}

impl SwapChainViews {
    /// 为 `buffer_count` 个后备缓冲分配连续的 RTV，再分配一个 DSV
    pub fn allocate(
        allocators: &mut DescriptorAllocatorSet,
        buffer_count: u32,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        if buffer_count == 0 {
            return Err(GraphicsError::SwapchainError("swap chain needs at least one buffer".to_string()).into());
        }
        if width == 0 || height == 0 {
            return Err(GraphicsError::SwapchainError(format!(
                "back buffer size {}x{} must be non-zero",
                width, height
            ))
            .into());
        }

        let first_rtv = allocators.allocate_range(DescriptorType::RenderTargetView, buffer_count)?;
        let dsv = allocators.allocate(DescriptorType::DepthStencilView)?;

        Ok(Self {
            first_rtv,
            buffer_count,
            dsv,
            width,
            height,
            lost: false,
        })
    }

    /// 第 `index` 个后备缓冲的 RTV
    pub fn rtv(&self, index: usize) -> Result<DescriptorId> {
        if index >= self.buffer_count as usize {
            return Err(GraphicsError::SwapchainError(format!(
                "back buffer {} out of range ({} buffers)",
                index, self.buffer_count
            ))
            .into());
        }
        Ok(self.first_rtv.offset(index as u32))
    }

    /// 全部后备缓冲的 RTV，按缓冲索引排列
    pub fn rtvs(&self) -> impl Iterator<Item = DescriptorId> {
        let first = self.first_rtv;
        (0..self.buffer_count).map(move |i| first.offset(i))
    }

    pub fn dsv(&self) -> DescriptorId {
        self.dsv
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub fn ensure_usable(&self) -> Result<()> {
        if self.lost {
            return Err(GraphicsError::ContextLost(
                "swap chain buffers could not be recovered after a failed resize".to_string(),
            )
            .into());
        }
        Ok(())
    }

    pub fn request_resize(&self, width: u32, height: u32) -> Result<ResizeRequest> {
        self.ensure_usable()?;
        if width == 0 || height == 0 {
            return Ok(ResizeRequest::Ignore);
        }
        if width == self.width && height == self.height {
            return Ok(ResizeRequest::Unchanged);
        }
        Ok(ResizeRequest::Rebuild { width, height })
    }

    /// 视图已经在新尺寸下重建
    pub fn commit_resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn mark_lost(&mut self) {
        self.lost = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DescriptorConfig;
    use crate::core::error::DxCoreError;
    use crate::renderer::descriptor::{DescriptorHeapLayout, HeapBase};

    fn allocators() -> DescriptorAllocatorSet {
        let layout = DescriptorHeapLayout::from_capacities(&DescriptorConfig::default());
        DescriptorAllocatorSet::new(
            layout,
            HeapBase::cpu_only(0x1000, 32),
            HeapBase::cpu_only(0x2000, 8),
            HeapBase::shader_visible(0x3000, 0x4000, 64),
        )
    }

    #[test]
    fn test_allocate_views() {
        let mut allocators = allocators();
        let views = SwapChainViews::allocate(&mut allocators, 3, 1280, 720).unwrap();

        let rtvs: Vec<_> = views.rtvs().collect();
        assert_eq!(rtvs.len(), 3);
        assert_eq!(views.rtv(2).unwrap(), rtvs[2]);
        assert!(views.rtv(3).is_err());
        assert_eq!(allocators.stats(DescriptorType::RenderTargetView).used, 3);
        assert_eq!(allocators.stats(DescriptorType::DepthStencilView).used, 1);
    }

    #[test]
    fn test_resize_requests() {
        let mut allocators = allocators();
        let mut views = SwapChainViews::allocate(&mut allocators, 2, 800, 600).unwrap();

        assert_eq!(views.request_resize(0, 600).unwrap(), ResizeRequest::Ignore);
        assert_eq!(views.request_resize(800, 600).unwrap(), ResizeRequest::Unchanged);
        assert_eq!(
            views.request_resize(1024, 768).unwrap(),
            ResizeRequest::Rebuild {
                width: 1024,
                height: 768
            }
        );

        // 提交前尺寸不变
        assert_eq!((views.width(), views.height()), (800, 600));
        views.commit_resize(1024, 768);
        assert_eq!(views.request_resize(1024, 768).unwrap(), ResizeRequest::Unchanged);
    }

    #[test]
    fn test_lost_views_reject_everything() {
        let mut allocators = allocators();
        let mut views = SwapChainViews::allocate(&mut allocators, 2, 800, 600).unwrap();
        assert!(views.ensure_usable().is_ok());

        views.mark_lost();
        assert!(views.is_lost());
        assert!(matches!(
            views.ensure_usable(),
            Err(DxCoreError::Graphics(GraphicsError::ContextLost(_)))
        ));
        assert!(views.request_resize(0, 0).is_err());
    }

    #[test]
    fn test_allocate_rejects_bad_input() {
        let mut allocators = allocators();
        assert!(SwapChainViews::allocate(&mut allocators, 0, 800, 600).is_err());
        assert!(SwapChainViews::allocate(&mut allocators, 2, 0, 600).is_err());
        assert_eq!(allocators.stats(DescriptorType::RenderTargetView).used, 0);
    }
}
