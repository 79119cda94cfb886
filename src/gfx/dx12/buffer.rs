//! GPU 缓冲区封装
//!
//! - `UploadBuffer<T>`：上传堆，持久映射，CPU 每帧写入（常量缓冲、动态顶点）
//! - `DefaultBuffer`：默认堆，通过中转上传缓冲一次性填充（静态顶点/索引）
//! - `ColorBuffer`：可作为渲染目标并可采样的 2D 纹理
//! - `RWStructuredBuffer`：计算着色器读写的结构化缓冲
//!
//! 默认堆上的资源都登记到 `Dx12Context` 的状态跟踪器里，
//! 状态转换通过 `Dx12Context::transition` 完成。

use std::ffi::c_void;
use std::marker::PhantomData;

use bytemuck::Pod;
use tracing::{debug, warn};
use windows::core::HSTRING;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::dx12::barrier::d3d12_state;
use crate::gfx::dx12::context::Dx12Context;
use crate::gfx::dx12::format::{dxgi_format, index_format};
use crate::gfx::dx12::graphics_error;
use crate::renderer::barrier::{ResourceId, ResourceState};
use crate::renderer::descriptor::{DescriptorId, DescriptorType};
use crate::renderer::resource::{BufferLayout, ColorBufferDesc, HeapType, CONSTANT_BUFFER_ALIGNMENT};

fn heap_properties(heap: HeapType) -> D3D12_HEAP_PROPERTIES {
    let heap_type = match heap {
        HeapType::Default => D3D12_HEAP_TYPE_DEFAULT,
        HeapType::Upload => D3D12_HEAP_TYPE_UPLOAD,
        HeapType::Readback => D3D12_HEAP_TYPE_READBACK,
    };
    D3D12_HEAP_PROPERTIES {
        Type: heap_type,
        CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
        MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
        CreationNodeMask: 1,
        VisibleNodeMask: 1,
    }
}

/// 在 `heap` 上创建 `size` 字节的缓冲，初始状态由堆类型决定
fn create_buffer(
    device: &ID3D12Device,
    heap: HeapType,
    size: u64,
    flags: D3D12_RESOURCE_FLAGS,
) -> Result<ID3D12Resource> {
    if size == 0 {
        return Err(GraphicsError::ResourceCreation("buffer size must be non-zero".to_string()).into());
    }

    let desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Alignment: 0,
        Width: size,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DXGI_FORMAT_UNKNOWN,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        Flags: flags,
    };

    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device
            .CreateCommittedResource(
                &heap_properties(heap),
                D3D12_HEAP_FLAG_NONE,
                &desc,
                d3d12_state(heap.initial_state()),
                None,
                &mut resource,
            )
            .map_err(graphics_error(GraphicsError::ResourceCreation, "Failed to create buffer"))?;
    }

    debug!(heap = ?heap, size, "Buffer created");
    resource.ok_or_else(|| GraphicsError::ResourceCreation("buffer was not returned".to_string()).into())
}

fn set_name(resource: &ID3D12Resource, name: &str) {
    if let Err(e) = unsafe { resource.SetName(&HSTRING::from(name)) } {
        warn!("Failed to name resource {}: {:?}", name, e);
    }
}

/// 写入上传堆上的缓冲
fn write_bytes(resource: &ID3D12Resource, bytes: &[u8]) -> Result<()> {
    unsafe {
        let mut mapped: *mut c_void = std::ptr::null_mut();
        // 读取范围为空，CPU 不会读这块内存
        let read_range = D3D12_RANGE { Begin: 0, End: 0 };
        resource
            .Map(0, Some(&read_range), Some(&mut mapped))
            .map_err(graphics_error(GraphicsError::ResourceCreation, "Failed to map staging buffer"))?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped as *mut u8, bytes.len());
        resource.Unmap(0, None);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// UploadBuffer
// ---------------------------------------------------------------------------

/// 持久映射的上传缓冲
///
/// 常量缓冲模式下每个元素占 256 字节的整数倍。
/// CPU 写入时不做同步，调用者要保证 GPU 不再读取被覆盖的元素，
/// 通常做法是每个帧槽位一个元素，用 `frame_index` 做下标。
pub struct UploadBuffer<T: Pod> {
    resource: ID3D12Resource,
    mapped: *mut u8,
    layout: BufferLayout,
    _marker: PhantomData<T>,
}

impl<T: Pod> UploadBuffer<T> {
    pub fn new(device: &ID3D12Device, count: u64, is_constant_buffer: bool) -> Result<Self> {
        if count == 0 {
            return Err(GraphicsError::ResourceCreation("upload buffer needs at least one element".to_string()).into());
        }

        let layout = BufferLayout::for_type::<T>(count, is_constant_buffer);
        let resource = create_buffer(device, HeapType::Upload, layout.byte_size(), D3D12_RESOURCE_FLAG_NONE)?;

        let mut mapped: *mut c_void = std::ptr::null_mut();
        unsafe {
            resource
                .Map(0, None, Some(&mut mapped))
                .map_err(graphics_error(GraphicsError::ResourceCreation, "Failed to map upload buffer"))?;
        }

        Ok(Self {
            resource,
            mapped: mapped as *mut u8,
            layout,
            _marker: PhantomData,
        })
    }

    /// 写入第 `index` 个元素
    pub fn copy_data(&mut self, index: u64, data: &T) -> Result<()> {
        let offset = self.layout.offset_of(index)?;
        let bytes = bytemuck::bytes_of(data);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.add(offset as usize), bytes.len());
        }
        Ok(())
    }

    /// 第 `index` 个元素的 GPU 虚拟地址
    pub fn gpu_address(&self, index: u64) -> Result<u64> {
        let offset = self.layout.offset_of(index)?;
        Ok(unsafe { self.resource.GetGPUVirtualAddress() } + offset)
    }

    /// 在着色器可见堆上为第 `index` 个元素创建 CBV
    pub fn create_constant_buffer_view(&self, ctx: &mut Dx12Context, index: u64) -> Result<DescriptorId> {
        if self.layout.stride % CONSTANT_BUFFER_ALIGNMENT != 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "stride {} is not a constant buffer stride",
                self.layout.stride
            ))
            .into());
        }

        let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
            BufferLocation: self.gpu_address(index)?,
            SizeInBytes: self.layout.view_stride()?,
        };
        let id = ctx.allocate_descriptor(DescriptorType::ConstantBufferView)?;
        let handle = ctx.cpu_descriptor(DescriptorType::ConstantBufferView, id)?;
        unsafe {
            ctx.device().CreateConstantBufferView(Some(&desc), handle);
        }
        Ok(id)
    }

    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }
}

impl<T: Pod> Drop for UploadBuffer<T> {
    fn drop(&mut self) {
        unsafe {
            self.resource.Unmap(0, None);
        }
    }
}

// ---------------------------------------------------------------------------
// DefaultBuffer
// ---------------------------------------------------------------------------

/// 默认堆上的只读缓冲，创建时从 CPU 数据填充
pub struct DefaultBuffer {
    resource: ID3D12Resource,
    id: ResourceId,
    layout: BufferLayout,
}

impl DefaultBuffer {
    /// 用 `data` 填充一个新的默认堆缓冲，拷贝完成后转换到 `final_state`
    ///
    /// 帧内调用时拷贝录制到当前命令列表，帧外调用时立即提交并等待。
    /// 中转缓冲在拷贝的 fence 完成之后释放。
    pub fn from_slice<T: Pod>(ctx: &mut Dx12Context, data: &[T], final_state: ResourceState) -> Result<Self> {
        if data.is_empty() {
            return Err(GraphicsError::ResourceCreation("default buffer needs initial data".to_string()).into());
        }
        final_state.validate()?;

        let layout = BufferLayout::for_type::<T>(data.len() as u64, false);
        let size = layout.byte_size();

        let resource = create_buffer(ctx.device(), HeapType::Default, size, D3D12_RESOURCE_FLAG_NONE)?;
        let staging = create_buffer(ctx.device(), HeapType::Upload, size, D3D12_RESOURCE_FLAG_NONE)?;
        write_bytes(&staging, bytemuck::cast_slice(data))?;

        let id = ctx.register_resource(&resource, HeapType::Default.initial_state())?;
        let destination = resource.clone();
        let uploaded = ctx.record(move |ctx| {
            ctx.transition(id, ResourceState::COPY_DEST)?;
            ctx.flush_barriers()?;
            unsafe {
                ctx.command_list().CopyBufferRegion(&destination, 0, &staging, 0, size);
            }
            ctx.defer_release(staging);
            ctx.transition(id, final_state)
        });
        if let Err(e) = uploaded {
            ctx.release_resource(id);
            return Err(e);
        }

        Ok(Self { resource, id, layout })
    }

    /// 顶点缓冲视图，超过 4 GiB 的缓冲无法用一个视图描述
    pub fn vertex_buffer_view(&self) -> Result<D3D12_VERTEX_BUFFER_VIEW> {
        Ok(D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: self.gpu_address(),
            SizeInBytes: self.layout.view_byte_size()?,
            StrideInBytes: self.layout.view_stride()?,
        })
    }

    /// 索引缓冲视图，元素必须是 u16 或 u32
    pub fn index_buffer_view(&self) -> Result<D3D12_INDEX_BUFFER_VIEW> {
        Ok(D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: self.gpu_address(),
            SizeInBytes: self.layout.view_byte_size()?,
            Format: index_format(self.layout.stride)?,
        })
    }

    pub fn gpu_address(&self) -> u64 {
        unsafe { self.resource.GetGPUVirtualAddress() }
    }

    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }

    pub fn resource_id(&self) -> ResourceId {
        self.id
    }

    /// 取消登记，GPU 用完后释放
    pub fn release(self, ctx: &mut Dx12Context) {
        ctx.release_resource(self.id);
    }
}

// ---------------------------------------------------------------------------
// ColorBuffer
// ---------------------------------------------------------------------------

/// 离屏渲染目标
pub struct ColorBuffer {
    resource: ID3D12Resource,
    id: ResourceId,
    desc: ColorBufferDesc,
    rtv: DescriptorId,
    srv: DescriptorId,
    uav: Option<DescriptorId>,
}

impl ColorBuffer {
    pub fn new(ctx: &mut Dx12Context, desc: &ColorBufferDesc) -> Result<Self> {
        desc.validate()?;

        let format = dxgi_format(desc.format);
        let mut flags = D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
        if desc.allow_uav {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
        }

        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Alignment: 0,
            Width: u64::from(desc.width),
            Height: desc.height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: format,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: flags,
        };
        let clear_value = D3D12_CLEAR_VALUE {
            Format: format,
            Anonymous: D3D12_CLEAR_VALUE_0 { Color: desc.clear_color },
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            ctx.device()
                .CreateCommittedResource(
                    &heap_properties(HeapType::Default),
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    d3d12_state(HeapType::Default.initial_state()),
                    Some(&clear_value),
                    &mut resource,
                )
                .map_err(graphics_error(GraphicsError::ResourceCreation, "Failed to create color buffer"))?;
        }
        let resource = resource
            .ok_or_else(|| GraphicsError::ResourceCreation("color buffer was not returned".to_string()))?;
        if let Some(name) = &desc.name {
            set_name(&resource, name);
        }

        let rtv = ctx.allocate_descriptor(DescriptorType::RenderTargetView)?;
        let srv = ctx.allocate_descriptor(DescriptorType::ShaderResourceView)?;
        let uav = if desc.allow_uav {
            Some(ctx.allocate_descriptor(DescriptorType::UnorderedAccessView)?)
        } else {
            None
        };

        let rtv_desc = D3D12_RENDER_TARGET_VIEW_DESC {
            Format: format,
            ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
            Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_RTV { MipSlice: 0, PlaneSlice: 0 },
            },
        };
        let srv_desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: format,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        };

        let rtv_handle = ctx.cpu_descriptor(DescriptorType::RenderTargetView, rtv)?;
        let srv_handle = ctx.cpu_descriptor(DescriptorType::ShaderResourceView, srv)?;
        unsafe {
            ctx.device().CreateRenderTargetView(&resource, Some(&rtv_desc), rtv_handle);
            ctx.device().CreateShaderResourceView(&resource, Some(&srv_desc), srv_handle);
        }

        if let Some(uav) = uav {
            let uav_desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                Format: format,
                ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2D,
                Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                    Texture2D: D3D12_TEX2D_UAV { MipSlice: 0, PlaneSlice: 0 },
                },
            };
            let uav_handle = ctx.cpu_descriptor(DescriptorType::UnorderedAccessView, uav)?;
            unsafe {
                ctx.device()
                    .CreateUnorderedAccessView(&resource, None::<&ID3D12Resource>, Some(&uav_desc), uav_handle);
            }
        }

        let id = ctx.register_resource(&resource, HeapType::Default.initial_state())?;

        debug!(
            width = desc.width,
            height = desc.height,
            format = ?desc.format,
            uav = desc.allow_uav,
            "Color buffer created"
        );

        Ok(Self {
            resource,
            id,
            desc: desc.clone(),
            rtv,
            srv,
            uav,
        })
    }

    /// 用创建时的优化清屏值清空
    pub fn clear(&self, ctx: &mut Dx12Context) -> Result<()> {
        let id = self.id;
        let rtv = self.rtv_handle(ctx)?;
        let color = self.desc.clear_color;
        ctx.record(move |ctx| {
            ctx.transition(id, ResourceState::RENDER_TARGET)?;
            ctx.flush_barriers()?;
            unsafe {
                ctx.command_list().ClearRenderTargetView(rtv, &color, None);
            }
            Ok(())
        })
    }

    pub fn rtv_handle(&self, ctx: &Dx12Context) -> Result<D3D12_CPU_DESCRIPTOR_HANDLE> {
        ctx.cpu_descriptor(DescriptorType::RenderTargetView, self.rtv)
    }

    pub fn srv_handle(&self, ctx: &Dx12Context) -> Result<D3D12_GPU_DESCRIPTOR_HANDLE> {
        ctx.gpu_descriptor(DescriptorType::ShaderResourceView, self.srv)
    }

    pub fn uav_handle(&self, ctx: &Dx12Context) -> Result<D3D12_GPU_DESCRIPTOR_HANDLE> {
        let uav = self.uav.ok_or_else(|| {
            GraphicsError::InvalidDescriptor {
                heap: DescriptorType::UnorderedAccessView.name(),
                id: u32::MAX,
            }
        })?;
        ctx.gpu_descriptor(DescriptorType::UnorderedAccessView, uav)
    }

    pub fn desc(&self) -> &ColorBufferDesc {
        &self.desc
    }

    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }

    pub fn resource_id(&self) -> ResourceId {
        self.id
    }

    pub fn release(self, ctx: &mut Dx12Context) {
        ctx.release_resource(self.id);
    }
}

// ---------------------------------------------------------------------------
// RWStructuredBuffer
// ---------------------------------------------------------------------------

/// 计算着色器读写的结构化缓冲，带 SRV 和 UAV
pub struct RWStructuredBuffer {
    resource: ID3D12Resource,
    id: ResourceId,
    layout: BufferLayout,
    srv: DescriptorId,
    uav: DescriptorId,
}

impl RWStructuredBuffer {
    pub fn new<T: Pod>(ctx: &mut Dx12Context, count: u64) -> Result<Self> {
        if count == 0 || count > u64::from(u32::MAX) {
            return Err(GraphicsError::ResourceCreation(format!(
                "structured buffer element count {} out of range",
                count
            ))
            .into());
        }

        let layout = BufferLayout::for_type::<T>(count, false);
        let stride = layout.view_stride()?;
        let resource = create_buffer(
            ctx.device(),
            HeapType::Default,
            layout.byte_size(),
            D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS,
        )?;

        let srv = ctx.allocate_descriptor(DescriptorType::ShaderResourceView)?;
        let uav = ctx.allocate_descriptor(DescriptorType::UnorderedAccessView)?;

        let srv_desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: DXGI_FORMAT_UNKNOWN,
            ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Buffer: D3D12_BUFFER_SRV {
                    FirstElement: 0,
                    NumElements: count as u32,
                    StructureByteStride: stride,
                    Flags: D3D12_BUFFER_SRV_FLAG_NONE,
                },
            },
        };
        let uav_desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
            Format: DXGI_FORMAT_UNKNOWN,
            ViewDimension: D3D12_UAV_DIMENSION_BUFFER,
            Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Buffer: D3D12_BUFFER_UAV {
                    FirstElement: 0,
                    NumElements: count as u32,
                    StructureByteStride: stride,
                    CounterOffsetInBytes: 0,
                    Flags: D3D12_BUFFER_UAV_FLAG_NONE,
                },
            },
        };

        let srv_handle = ctx.cpu_descriptor(DescriptorType::ShaderResourceView, srv)?;
        let uav_handle = ctx.cpu_descriptor(DescriptorType::UnorderedAccessView, uav)?;
        unsafe {
            ctx.device().CreateShaderResourceView(&resource, Some(&srv_desc), srv_handle);
            ctx.device()
                .CreateUnorderedAccessView(&resource, None::<&ID3D12Resource>, Some(&uav_desc), uav_handle);
        }

        let id = ctx.register_resource(&resource, HeapType::Default.initial_state())?;
        debug!(count, stride = layout.stride, "Structured buffer created");

        Ok(Self {
            resource,
            id,
            layout,
            srv,
            uav,
        })
    }

    /// 准备给计算着色器写入；已经是 UAV 状态时插入 UAV 屏障
    pub fn uav_barrier(&self, ctx: &mut Dx12Context) -> Result<()> {
        ctx.transition(self.id, ResourceState::UNORDERED_ACCESS)
    }

    /// 准备给着色器读取
    pub fn as_shader_resource(&self, ctx: &mut Dx12Context) -> Result<()> {
        ctx.transition(self.id, ResourceState::ALL_SHADER_RESOURCE)
    }

    pub fn gpu_address(&self) -> u64 {
        unsafe { self.resource.GetGPUVirtualAddress() }
    }

    pub fn srv_handle(&self, ctx: &Dx12Context) -> Result<D3D12_GPU_DESCRIPTOR_HANDLE> {
        ctx.gpu_descriptor(DescriptorType::ShaderResourceView, self.srv)
    }

    pub fn uav_handle(&self, ctx: &Dx12Context) -> Result<D3D12_GPU_DESCRIPTOR_HANDLE> {
        ctx.gpu_descriptor(DescriptorType::UnorderedAccessView, self.uav)
    }

    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }

    pub fn resource_id(&self) -> ResourceId {
        self.id
    }

    pub fn release(self, ctx: &mut Dx12Context) {
        ctx.release_resource(self.id);
    }
}
