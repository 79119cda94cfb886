//! DirectX 12 上下文
//!
//! `Dx12Context` 持有设备、命令队列、每帧一个命令分配器、一个命令列表、
//! 交换链、深度缓冲、三个描述符堆和 fence，并驱动帧循环：
//!
//! ```text
//! begin_frame   等待槽位 fence -> 重置分配器和命令列表 -> 后备缓冲 PRESENT→RENDER_TARGET
//! clear         清空当前 RTV 和 DSV
//! end_frame     后备缓冲 →PRESENT -> Close -> Execute -> Present -> Signal -> 切换槽位
//! ```
//!
//! # 初始化流程
//!
//! 1. 启用调试层（可选）
//! 2. 创建 DXGI 工厂和 D3D12 设备
//! 3. 创建命令队列、命令分配器、命令列表
//! 4. 创建交换链
//! 5. 创建描述符堆，为后备缓冲创建 RTV
//! 6. 创建深度模板缓冲和 DSV
//! 7. 创建 fence

use std::collections::HashMap;

use tracing::{debug, warn};
use windows::core::Interface;
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::core::config::Config;
use crate::core::error::{DxCoreError, GraphicsError, Result};
use crate::gfx::dx12::barrier;
use crate::gfx::dx12::descriptor::Dx12DescriptorHeaps;
use crate::gfx::dx12::format::{command_list_type, dxgi_format};
use crate::gfx::dx12::graphics_error;
use crate::gfx::dx12::sync::Dx12Fence;
use crate::renderer::barrier::{ResourceId, ResourceState, ResourceStateTracker};
use crate::renderer::command::{CommandListTracker, QueueType};
use crate::renderer::descriptor::{DescriptorId, DescriptorType};
use crate::renderer::frame::FramePacer;
use crate::renderer::resource::{ReleaseQueue, TextureFormat};
use crate::renderer::swapchain::{ResizeRequest, SwapChainViews};
use crate::renderer::sync::FenceValue;
use crate::{frame_trace, gpu_info, gpu_warn};

/// DirectX 12 上下文
pub struct Dx12Context {
    device: ID3D12Device,
    command_queue: ID3D12CommandQueue,
    /// 前 `frame_count` 个每帧一个，最后一个给 `execute_immediate`
    command_allocators: Vec<ID3D12CommandAllocator>,
    command_list: ID3D12GraphicsCommandList,
    swap_chain: IDXGISwapChain3,
    heaps: Dx12DescriptorHeaps,
    fence: Dx12Fence,

    pacer: FramePacer,
    commands: CommandListTracker,
    states: ResourceStateTracker,
    resources: HashMap<ResourceId, ID3D12Resource>,
    deferred: ReleaseQueue<ID3D12Resource>,

    /// 后备缓冲 RTV 和 DSV 的槽位，resize 后沿用
    views: SwapChainViews,
    back_buffers: Vec<ResourceId>,
    depth_buffer: ResourceId,

    viewport: D3D12_VIEWPORT,
    scissor_rect: RECT,
    frame_count: usize,
    vsync: bool,
    back_buffer_format: TextureFormat,
    depth_format: TextureFormat,
}

// 上下文只在一个线程上驱动，但可以在线程之间移动
unsafe impl Send for Dx12Context {}

impl Dx12Context {
    /// 创建 DirectX 12 上下文
    ///
    /// * `hwnd` - 交换链绑定的窗口
    /// * `width` / `height` - 后备缓冲尺寸
    /// * `config` - 在途帧数、格式、描述符容量等
    pub fn new(hwnd: HWND, width: u32, height: u32, config: &Config) -> Result<Self> {
        config.validate()?;
        if width == 0 || height == 0 {
            return Err(GraphicsError::SwapchainError(format!(
                "back buffer size {}x{} must be non-zero",
                width, height
            ))
            .into());
        }

        let graphics = &config.graphics;
        let frame_count = graphics.frame_count as usize;
        let back_buffer_format = graphics.back_buffer_format;
        let depth_format = graphics.depth_format;

        if !matches!(
            back_buffer_format,
            TextureFormat::Rgba8Unorm | TextureFormat::Bgra8Unorm | TextureFormat::Rgba16Float
        ) {
            return Err(GraphicsError::SwapchainError(format!(
                "{:?} is not supported by flip-model swap chains",
                back_buffer_format
            ))
            .into());
        }

        unsafe {
            // 1. 调试层
            if graphics.debug_layer {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => {
                        if let Some(debug) = debug {
                            debug.EnableDebugLayer();
                            debug!("D3D12 debug layer enabled");
                        }
                    }
                    Err(e) => gpu_warn!("Failed to enable D3D12 debug layer: {:?}", e),
                }
            }

            // 2. 工厂与设备
            let factory_flags = if graphics.debug_layer {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                DXGI_CREATE_FACTORY_FLAGS(0)
            };
            let factory: IDXGIFactory4 = CreateDXGIFactory2(factory_flags)
                .map_err(graphics_error(GraphicsError::DeviceCreation, "Failed to create DXGI factory"))?;

            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(None, D3D_FEATURE_LEVEL_11_0, &mut device)
                .map_err(graphics_error(GraphicsError::DeviceCreation, "Failed to create D3D12 device"))?;
            let device = device.ok_or_else(|| {
                GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".to_string())
            })?;

            // 3. 命令队列、分配器、命令列表
            let list_type = command_list_type(QueueType::Direct);
            let queue_desc = D3D12_COMMAND_QUEUE_DESC {
                Type: list_type,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            };
            let command_queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&queue_desc)
                .map_err(graphics_error(GraphicsError::DeviceCreation, "Failed to create command queue"))?;

            let command_allocators = (0..=frame_count)
                .map(|_| device.CreateCommandAllocator::<ID3D12CommandAllocator>(list_type))
                .collect::<windows::core::Result<Vec<_>>>()
                .map_err(graphics_error(GraphicsError::DeviceCreation, "Failed to create command allocator"))?;

            let command_list: ID3D12GraphicsCommandList = device
                .CreateCommandList(0, list_type, &command_allocators[0], None::<&ID3D12PipelineState>)
                .map_err(graphics_error(GraphicsError::DeviceCreation, "Failed to create command list"))?;
            // 新建的命令列表处于录制状态，先关闭，与跟踪器保持一致
            command_list
                .Close()
                .map_err(graphics_error(GraphicsError::CommandExecution, "Failed to close initial command list"))?;

            debug!(
                queue = QueueType::Direct.name(),
                allocators = command_allocators.len(),
                "Command objects created"
            );

            // 4. 交换链
            let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
                Width: width,
                Height: height,
                Format: dxgi_format(back_buffer_format),
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    ..Default::default()
                },
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                BufferCount: graphics.frame_count,
                SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                ..Default::default()
            };
            let swap_chain: IDXGISwapChain1 = factory
                .CreateSwapChainForHwnd(&command_queue, hwnd, &swap_chain_desc, None, None)
                .map_err(graphics_error(GraphicsError::SwapchainError, "Failed to create swap chain"))?;
            let swap_chain: IDXGISwapChain3 = swap_chain
                .cast()
                .map_err(graphics_error(GraphicsError::SwapchainError, "Failed to query IDXGISwapChain3"))?;

            // 5. 描述符堆与后备缓冲 RTV
            let mut heaps = Dx12DescriptorHeaps::new(&device, &config.descriptors)?;
            let views = SwapChainViews::allocate(heaps.allocators_mut(), graphics.frame_count, width, height)?;

            let back_buffer_resources =
                create_back_buffers(&device, &swap_chain, &heaps, &views, back_buffer_format)?;

            // 6. 深度模板缓冲
            let depth_resource = create_depth_buffer(&device, width, height, depth_format)?;
            create_depth_view(&device, &depth_resource, depth_format, &heaps, views.dsv())?;

            // 7. fence
            let fence = Dx12Fence::new(&device, &command_queue)?;

            let mut pacer = FramePacer::new(frame_count)?;
            pacer.rebind(swap_chain.GetCurrentBackBufferIndex() as usize)?;

            let (viewport, scissor_rect) = viewport_and_scissor(width, height);

            let mut states = ResourceStateTracker::new();
            let mut resources = HashMap::new();
            let mut back_buffers = Vec::with_capacity(frame_count);
            for resource in back_buffer_resources {
                let id = states.register(ResourceState::PRESENT)?;
                resources.insert(id, resource);
                back_buffers.push(id);
            }
            let depth_buffer = states.register(ResourceState::DEPTH_WRITE)?;
            resources.insert(depth_buffer, depth_resource);

            let context = Self {
                device,
                command_queue,
                command_allocators,
                command_list,
                swap_chain,
                heaps,
                fence,
                pacer,
                commands: CommandListTracker::new(frame_count + 1),
                states,
                resources,
                deferred: ReleaseQueue::new(),
                views,
                back_buffers,
                depth_buffer,
                viewport,
                scissor_rect,
                frame_count,
                vsync: graphics.vsync,
                back_buffer_format,
                depth_format,
            };

            gpu_info!(
                width,
                height,
                frames = frame_count,
                format = ?back_buffer_format,
                depth = ?depth_format,
                "DX12 context initialized"
            );

            Ok(context)
        }
    }

    // ---------------------------------------------------------------------
    // 访问器
    // ---------------------------------------------------------------------

    pub fn device(&self) -> &ID3D12Device {
        &self.device
    }

    pub fn command_list(&self) -> &ID3D12GraphicsCommandList {
        &self.command_list
    }

    pub fn command_queue(&self) -> &ID3D12CommandQueue {
        &self.command_queue
    }

    pub fn swap_chain(&self) -> &IDXGISwapChain3 {
        &self.swap_chain
    }

    pub fn descriptors(&self) -> &Dx12DescriptorHeaps {
        &self.heaps
    }

    pub fn allocate_descriptor(&mut self, descriptor_type: DescriptorType) -> Result<DescriptorId> {
        self.heaps.allocate(descriptor_type)
    }

    pub fn allocate_descriptors(&mut self, descriptor_type: DescriptorType, count: u32) -> Result<DescriptorId> {
        self.heaps.allocate_range(descriptor_type, count)
    }

    pub fn cpu_descriptor(&self, descriptor_type: DescriptorType, id: DescriptorId) -> Result<D3D12_CPU_DESCRIPTOR_HANDLE> {
        self.heaps.cpu_handle(descriptor_type, id)
    }

    pub fn gpu_descriptor(&self, descriptor_type: DescriptorType, id: DescriptorId) -> Result<D3D12_GPU_DESCRIPTOR_HANDLE> {
        self.heaps.gpu_handle(descriptor_type, id)
    }

    /// 当前帧的后备缓冲
    pub fn current_back_buffer(&self) -> Result<&ID3D12Resource> {
        let id = self.back_buffer_state(self.pacer.current_index())?;
        self.resource(id).ok_or_else(|| {
            GraphicsError::SwapchainError("back buffer is not available".to_string()).into()
        })
    }

    /// 当前后备缓冲的 RTV
    pub fn current_back_buffer_view(&self) -> Result<D3D12_CPU_DESCRIPTOR_HANDLE> {
        let rtv = self.views.rtv(self.pacer.current_index())?;
        self.heaps.cpu_handle(DescriptorType::RenderTargetView, rtv)
    }

    pub fn depth_stencil_view(&self) -> Result<D3D12_CPU_DESCRIPTOR_HANDLE> {
        self.heaps.cpu_handle(DescriptorType::DepthStencilView, self.views.dsv())
    }

    pub fn depth_stencil_buffer(&self) -> Option<&ID3D12Resource> {
        self.resource(self.depth_buffer)
    }

    /// 当前帧槽位，等于交换链当前后备缓冲索引
    pub fn frame_index(&self) -> usize {
        self.pacer.current_index()
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn frame_number(&self) -> u64 {
        self.pacer.frame_number()
    }

    pub fn is_in_frame(&self) -> bool {
        self.pacer.is_in_frame()
    }

    pub fn width(&self) -> u32 {
        self.views.width()
    }

    pub fn height(&self) -> u32 {
        self.views.height()
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.views.width() as f32 / self.views.height() as f32
    }

    /// resize 失败且交换链缓冲无法恢复后为 true，上下文不能再使用
    pub fn is_lost(&self) -> bool {
        self.views.is_lost()
    }

    pub fn viewport(&self) -> D3D12_VIEWPORT {
        self.viewport
    }

    pub fn scissor_rect(&self) -> RECT {
        self.scissor_rect
    }

    pub fn back_buffer_format(&self) -> TextureFormat {
        self.back_buffer_format
    }

    pub fn depth_format(&self) -> TextureFormat {
        self.depth_format
    }

    pub fn fence(&self) -> &Dx12Fence {
        &self.fence
    }

    /// 最近一次 signal 的 fence 值
    pub fn last_signaled_fence(&self) -> FenceValue {
        self.pacer.fence().last_signaled()
    }

    pub fn pending_releases(&self) -> usize {
        self.deferred.len()
    }

    // ---------------------------------------------------------------------
    // 资源状态
    // ---------------------------------------------------------------------

    /// 登记一个资源，之后可以用 `transition` 改变它的状态
    pub fn register_resource(&mut self, resource: &ID3D12Resource, initial: ResourceState) -> Result<ResourceId> {
        self.track(resource.clone(), initial)
    }

    pub fn resource(&self, id: ResourceId) -> Option<&ID3D12Resource> {
        self.resources.get(&id)
    }

    pub fn resource_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.states.state(id)
    }

    /// 记录状态转换，屏障在下一次 `flush_barriers` 时写入命令列表
    pub fn transition(&mut self, id: ResourceId, after: ResourceState) -> Result<()> {
        self.states.transition(id, after)
    }

    /// 把待提交的屏障写入命令列表
    ///
    /// 命令列表未在录制时，屏障保留到下一次打开命令列表。
    pub fn flush_barriers(&mut self) -> Result<()> {
        if !self.states.has_pending() {
            return Ok(());
        }
        if !self.commands.is_recording() {
            debug!(pending = self.states.pending().len(), "Barriers deferred until the command list is open");
            return Ok(());
        }

        let pending = self.states.flush();
        let mut barriers = Vec::with_capacity(pending.len());
        for b in &pending {
            let resource = self.resources.get(&b.resource()).ok_or_else(|| {
                GraphicsError::InvalidStateTransition(format!(
                    "resource {} has no D3D12 object",
                    b.resource().raw()
                ))
            })?;
            barriers.push(barrier::to_d3d12(b, resource));
        }

        unsafe {
            self.command_list.ResourceBarrier(&barriers);
        }
        frame_trace!(count = barriers.len(), "Resource barriers recorded");
        Ok(())
    }

    /// 取消登记，资源在 GPU 用完之后释放
    pub fn release_resource(&mut self, id: ResourceId) {
        self.states.unregister(id);
        if let Some(resource) = self.resources.remove(&id) {
            self.defer_release(resource);
        }
    }

    /// 在下一次 signal 完成后释放 `resource`
    pub fn defer_release(&mut self, resource: ID3D12Resource) {
        let fence = self.pacer.fence().last_signaled().next();
        self.deferred.retire(resource, fence);
    }

    // ---------------------------------------------------------------------
    // 帧循环
    // ---------------------------------------------------------------------

    /// 开始一帧，返回帧槽位
    pub fn begin_frame(&mut self) -> Result<usize> {
        self.views.ensure_usable()?;
        let slot = self.pacer.begin_frame(&self.fence)?;

        if let Err(e) = self.open_frame(slot) {
            unsafe {
                let _ = self.command_list.Close();
            }
            self.commands.discard();
            self.pacer.abandon_frame();
            return Err(e);
        }

        frame_trace!(slot, frame = self.pacer.frame_number(), "Frame begun");
        Ok(slot)
    }

    fn open_frame(&mut self, slot: usize) -> Result<()> {
        self.reset_command_list(slot)?;
        self.deferred.collect(self.pacer.fence().last_completed());

        let back_buffer = self.back_buffer_state(slot)?;
        self.states.transition(back_buffer, ResourceState::RENDER_TARGET)?;
        self.flush_barriers()?;

        let rtv = self.current_back_buffer_view()?;
        let dsv = self.depth_stencil_view()?;
        let heaps = self.heaps.shader_visible_heaps();
        unsafe {
            self.command_list.SetDescriptorHeaps(&heaps);
            self.command_list.RSSetViewports(&[self.viewport]);
            self.command_list.RSSetScissorRects(&[self.scissor_rect]);
            self.command_list.OMSetRenderTargets(1, Some(&rtv), false, Some(&dsv));
        }
        Ok(())
    }

    /// 清空当前后备缓冲和深度缓冲
    pub fn clear(&mut self, color: [f32; 4]) -> Result<()> {
        if !self.pacer.is_in_frame() {
            return Err(DxCoreError::Runtime("clear called outside of a frame".to_string()));
        }

        self.states.transition(self.depth_buffer, ResourceState::DEPTH_WRITE)?;
        self.flush_barriers()?;

        let rtv = self.current_back_buffer_view()?;
        let dsv = self.depth_stencil_view()?;
        let flags = if self.depth_format.has_stencil() {
            D3D12_CLEAR_FLAG_DEPTH | D3D12_CLEAR_FLAG_STENCIL
        } else {
            D3D12_CLEAR_FLAG_DEPTH
        };

        unsafe {
            self.command_list.ClearRenderTargetView(rtv, &color, None);
            self.command_list.ClearDepthStencilView(dsv, flags, 1.0, 0, None);
        }
        Ok(())
    }

    /// 结束一帧：提交、Present、signal，并切换到下一个后备缓冲
    pub fn end_frame(&mut self) -> Result<FenceValue> {
        if !self.pacer.is_in_frame() {
            return Err(DxCoreError::Runtime("end_frame called without begin_frame".to_string()));
        }

        let slot = self.pacer.current_index();
        let submitted = self
            .back_buffer_state(slot)
            .and_then(|back_buffer| self.states.transition(back_buffer, ResourceState::PRESENT))
            .and_then(|_| self.flush_barriers())
            .and_then(|_| self.close_and_execute());
        if let Err(e) = submitted {
            unsafe {
                let _ = self.command_list.Close();
            }
            self.commands.discard();
            self.pacer.abandon_frame();
            return Err(e);
        }

        let sync_interval = if self.vsync { 1 } else { 0 };
        let present = unsafe { self.swap_chain.Present(sync_interval, DXGI_PRESENT(0)) }.ok();

        let next = unsafe { self.swap_chain.GetCurrentBackBufferIndex() } as usize;
        let value = match self.pacer.end_frame(&self.fence, next) {
            Ok(value) => value,
            Err(e) => {
                self.pacer.abandon_frame();
                self.record_unsignaled_submission();
                if let Err(rebind) = self.pacer.rebind(next) {
                    gpu_warn!("Failed to realign frame slot after a failed signal: {}", rebind);
                }
                return Err(e);
            }
        };
        self.commands.submitted(value)?;

        let completed = self.pacer.fence_mut().poll(&self.fence);
        let released = self.deferred.collect(completed);

        frame_trace!(
            slot,
            next,
            fence = value.value(),
            completed = completed.value(),
            released,
            "Frame submitted"
        );

        present.map_err(graphics_error(GraphicsError::SwapchainError, "Present failed"))?;
        Ok(value)
    }

    /// 等待 GPU 完成所有已提交的工作
    pub fn flush_command_queue(&mut self) -> Result<FenceValue> {
        let value = self.pacer.flush(&self.fence)?;
        self.deferred.collect(value);
        debug!(fence = value.value(), "Command queue flushed");
        Ok(value)
    }

    /// 改变交换链尺寸
    ///
    /// 后备缓冲的 RTV 和深度缓冲的 DSV 沿用原来的描述符槽位；
    /// fence 计数器保持递增。宽或高为 0（窗口最小化）时什么也不做。
    ///
    /// `ResizeBuffers` 或重建视图失败时，按交换链实际尺寸重新取回缓冲并返回原错误；
    /// 连这一步也失败，上下文标记为丢失，返回 `ContextLost`。
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let (width, height) = match self.views.request_resize(width, height)? {
            ResizeRequest::Ignore => {
                debug!(width, height, "Ignoring resize to an empty area");
                return Ok(());
            }
            ResizeRequest::Unchanged => return Ok(()),
            ResizeRequest::Rebuild { width, height } => (width, height),
        };
        if self.pacer.is_in_frame() {
            return Err(DxCoreError::Runtime("cannot resize while a frame is recording".to_string()));
        }

        self.flush_command_queue()?;

        // 交换链缓冲的所有引用必须在 ResizeBuffers 之前释放
        self.release_swap_chain_targets();
        self.deferred.clear();

        let rebuilt = unsafe {
            self.swap_chain.ResizeBuffers(
                self.frame_count as u32,
                width,
                height,
                dxgi_format(self.back_buffer_format),
                DXGI_SWAP_CHAIN_FLAG(0),
            )
        }
        .map_err(graphics_error(GraphicsError::SwapchainError, "Failed to resize swap chain buffers"))
        .and_then(|_| self.acquire_swap_chain_targets(width, height));

        if let Err(e) = rebuilt {
            return Err(self.recover_swap_chain_targets(e));
        }

        let index = self.finish_resize(width, height)?;
        gpu_info!(width, height, frame_index = index, "Swap chain resized");
        Ok(())
    }

    /// 录制一段命令并立即提交、等待完成
    ///
    /// 用于初始化阶段的上传，不能在帧内调用。
    pub fn execute_immediate<F>(&mut self, record: F) -> Result<FenceValue>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if self.pacer.is_in_frame() {
            return Err(DxCoreError::Runtime(
                "execute_immediate cannot run while a frame is recording".to_string(),
            ));
        }
        self.views.ensure_usable()?;

        let allocator = self.frame_count;
        self.reset_command_list(allocator)?;

        let recorded = match record(self) {
            Ok(()) => self.flush_barriers().and_then(|_| self.close_and_execute()),
            Err(e) => Err(e),
        };
        if let Err(e) = recorded {
            unsafe {
                let _ = self.command_list.Close();
            }
            self.commands.discard();
            return Err(e);
        }

        let value = match self.pacer.fence_mut().signal(&self.fence) {
            Ok(value) => value,
            Err(e) => {
                self.record_unsignaled_submission();
                return Err(e);
            }
        };
        self.commands.submitted(value)?;
        self.pacer.fence_mut().wait(&self.fence, value)?;
        self.deferred.collect(value);

        debug!(fence = value.value(), "Immediate command list executed");
        Ok(value)
    }

    /// 帧内直接录制到当前命令列表，帧外走 `execute_immediate`
    pub fn record<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if self.pacer.is_in_frame() {
            record(self)?;
            self.flush_barriers()
        } else {
            self.execute_immediate(record).map(|_| ())
        }
    }

    // ---------------------------------------------------------------------
    // 内部
    // ---------------------------------------------------------------------

    fn track(&mut self, resource: ID3D12Resource, initial: ResourceState) -> Result<ResourceId> {
        let id = self.states.register(initial)?;
        self.resources.insert(id, resource);
        Ok(id)
    }

    fn back_buffer_state(&self, index: usize) -> Result<ResourceId> {
        self.back_buffers.get(index).copied().ok_or_else(|| {
            GraphicsError::SwapchainError(format!(
                "back buffer {} out of range ({} buffers)",
                index,
                self.back_buffers.len()
            ))
            .into()
        })
    }

    /// 等分配器上次提交的工作完成，再重置分配器和命令列表
    fn reset_command_list(&mut self, allocator: usize) -> Result<()> {
        let last_use = self.commands.allocator_fence(allocator).unwrap_or_default();
        let completed = self.pacer.fence_mut().settle(&self.fence, last_use)?;
        self.commands.reset(allocator, completed)?;
        unsafe {
            self.command_allocators[allocator]
                .Reset()
                .map_err(graphics_error(GraphicsError::CommandExecution, "Failed to reset command allocator"))?;
            self.command_list
                .Reset(&self.command_allocators[allocator], None::<&ID3D12PipelineState>)
                .map_err(graphics_error(GraphicsError::CommandExecution, "Failed to reset command list"))?;
        }
        Ok(())
    }

    /// 命令列表已经提交但 signal 失败
    ///
    /// 分配器记下下一次 signal 的值，重置前 `settle` 会补 signal 并等待它。
    fn record_unsignaled_submission(&mut self) {
        let pending = self.pacer.fence().last_signaled().next();
        if let Err(e) = self.commands.submitted(pending) {
            gpu_warn!("Failed to record fence for submitted command list: {}", e);
        }
    }

    fn release_swap_chain_targets(&mut self) {
        for id in self.back_buffers.drain(..) {
            self.states.unregister(id);
            self.resources.remove(&id);
        }
        self.states.unregister(self.depth_buffer);
        self.resources.remove(&self.depth_buffer);
    }

    /// 取回交换链缓冲并在原来的槽位上重建 RTV、深度缓冲和 DSV
    fn acquire_swap_chain_targets(&mut self, width: u32, height: u32) -> Result<()> {
        let back_buffers =
            create_back_buffers(&self.device, &self.swap_chain, &self.heaps, &self.views, self.back_buffer_format)?;
        let depth = create_depth_buffer(&self.device, width, height, self.depth_format)?;
        create_depth_view(&self.device, &depth, self.depth_format, &self.heaps, self.views.dsv())?;

        for resource in back_buffers {
            let id = self.track(resource, ResourceState::PRESENT)?;
            self.back_buffers.push(id);
        }
        self.depth_buffer = self.track(depth, ResourceState::DEPTH_WRITE)?;
        Ok(())
    }

    fn finish_resize(&mut self, width: u32, height: u32) -> Result<usize> {
        self.views.commit_resize(width, height);
        (self.viewport, self.scissor_rect) = viewport_and_scissor(width, height);

        let index = unsafe { self.swap_chain.GetCurrentBackBufferIndex() } as usize;
        self.pacer.rebind(index)?;
        Ok(index)
    }

    /// resize 失败后按交换链的实际尺寸恢复缓冲
    ///
    /// 恢复成功返回原错误，上下文保持可用；否则标记为丢失。
    fn recover_swap_chain_targets(&mut self, cause: DxCoreError) -> DxCoreError {
        self.release_swap_chain_targets();

        let recovered = unsafe { self.swap_chain.GetDesc1() }
            .map_err(graphics_error(GraphicsError::SwapchainError, "Failed to query swap chain size"))
            .and_then(|desc| {
                self.acquire_swap_chain_targets(desc.Width, desc.Height)?;
                self.finish_resize(desc.Width, desc.Height)
            });

        match recovered {
            Ok(index) => {
                gpu_warn!(
                    width = self.views.width(),
                    height = self.views.height(),
                    frame_index = index,
                    "Resize failed, kept the previous swap chain buffers: {}",
                    cause
                );
                cause
            }
            Err(e) => {
                self.release_swap_chain_targets();
                self.views.mark_lost();
                GraphicsError::ContextLost(format!("resize failed ({}) and recovery failed ({})", cause, e)).into()
            }
        }
    }

    fn close_and_execute(&mut self) -> Result<()> {
        self.commands.close()?;
        unsafe {
            self.command_list
                .Close()
                .map_err(graphics_error(GraphicsError::CommandExecution, "Failed to close command list"))?;
            let command_lists = [Some(self.command_list.cast::<ID3D12CommandList>().map_err(
                graphics_error(GraphicsError::CommandExecution, "Failed to query ID3D12CommandList"),
            )?)];
            self.command_queue.ExecuteCommandLists(&command_lists);
        }
        Ok(())
    }
}

impl Drop for Dx12Context {
    fn drop(&mut self) {
        if let Err(e) = self.flush_command_queue() {
            warn!("Failed to flush command queue on shutdown: {}", e);
        }
        debug!(frames = self.pacer.frame_number(), "DX12 context dropped");
    }
}

fn viewport_and_scissor(width: u32, height: u32) -> (D3D12_VIEWPORT, RECT) {
    let viewport = D3D12_VIEWPORT {
        TopLeftX: 0.0,
        TopLeftY: 0.0,
        Width: width as f32,
        Height: height as f32,
        MinDepth: 0.0,
        MaxDepth: 1.0,
    };
    let scissor_rect = RECT {
        left: 0,
        top: 0,
        right: width as i32,
        bottom: height as i32,
    };
    (viewport, scissor_rect)
}

/// 取出交换链缓冲，并在给定的 RTV 槽位上创建视图
fn create_back_buffers(
    device: &ID3D12Device,
    swap_chain: &IDXGISwapChain3,
    heaps: &Dx12DescriptorHeaps,
    views: &SwapChainViews,
    format: TextureFormat,
) -> Result<Vec<ID3D12Resource>> {
    let rtv_desc = D3D12_RENDER_TARGET_VIEW_DESC {
        Format: dxgi_format(format),
        ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
        ..Default::default()
    };

    let mut buffers = Vec::with_capacity(views.buffer_count() as usize);
    for (i, rtv) in views.rtvs().enumerate() {
        let handle = heaps.cpu_handle(DescriptorType::RenderTargetView, rtv)?;
        unsafe {
            let surface: ID3D12Resource = swap_chain
                .GetBuffer(i as u32)
                .map_err(graphics_error(GraphicsError::SwapchainError, "Failed to get swap chain buffer"))?;
            device.CreateRenderTargetView(&surface, Some(&rtv_desc), handle);
            buffers.push(surface);
        }
    }
    Ok(buffers)
}

fn create_depth_buffer(device: &ID3D12Device, width: u32, height: u32, format: TextureFormat) -> Result<ID3D12Resource> {
    let heap_props = D3D12_HEAP_PROPERTIES {
        Type: D3D12_HEAP_TYPE_DEFAULT,
        ..Default::default()
    };
    let desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        Width: u64::from(width),
        Height: height,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: dxgi_format(format),
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
        Flags: D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL,
        ..Default::default()
    };
    let clear_value = D3D12_CLEAR_VALUE {
        Format: dxgi_format(format),
        Anonymous: D3D12_CLEAR_VALUE_0 {
            DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                Depth: 1.0,
                Stencil: 0,
            },
        },
    };

    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device
            .CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &desc,
                D3D12_RESOURCE_STATE_DEPTH_WRITE,
                Some(&clear_value),
                &mut resource,
            )
            .map_err(graphics_error(GraphicsError::ResourceCreation, "Failed to create depth stencil buffer"))?;
    }

    debug!(width, height, format = ?format, "Depth stencil buffer created");
    resource.ok_or_else(|| GraphicsError::ResourceCreation("depth stencil buffer was not returned".to_string()).into())
}

fn create_depth_view(
    device: &ID3D12Device,
    resource: &ID3D12Resource,
    format: TextureFormat,
    heaps: &Dx12DescriptorHeaps,
    dsv: DescriptorId,
) -> Result<()> {
    let handle = heaps.cpu_handle(DescriptorType::DepthStencilView, dsv)?;
    let dsv_desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
        Format: dxgi_format(format),
        ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
        Flags: D3D12_DSV_FLAG_NONE,
        Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
            Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
        },
    };
    unsafe {
        device.CreateDepthStencilView(resource, Some(&dsv_desc), handle);
    }
    Ok(())
}
