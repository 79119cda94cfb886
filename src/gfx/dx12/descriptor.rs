//! DirectX 12 描述符堆实现
//!
//! 创建 RTV、DSV 和着色器可见的 CBV/SRV/UAV 三个物理堆，
//! 把它们的基址交给 `DescriptorAllocatorSet` 做槽位分配。

use windows::Win32::Graphics::Direct3D12::*;

use crate::core::config::DescriptorConfig;
use crate::core::error::{DxCoreError, GraphicsError, Result};
use crate::renderer::descriptor::{
    CpuDescriptorHandle, DescriptorAllocatorSet, DescriptorHeapLayout, DescriptorId,
    DescriptorType, GpuDescriptorHandle, HeapBase, HeapKind,
};

impl From<CpuDescriptorHandle> for D3D12_CPU_DESCRIPTOR_HANDLE {
    fn from(handle: CpuDescriptorHandle) -> Self {
        D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }
    }
}

impl From<GpuDescriptorHandle> for D3D12_GPU_DESCRIPTOR_HANDLE {
    fn from(handle: GpuDescriptorHandle) -> Self {
        D3D12_GPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }
    }
}

/// DX12 描述符堆
///
/// 封装 ID3D12DescriptorHeap，记录基址和步长。
pub struct Dx12DescriptorHeap {
    heap: ID3D12DescriptorHeap,
    kind: HeapKind,
    base: HeapBase,
    num_descriptors: u32,
}

impl Dx12DescriptorHeap {
    pub fn new(device: &ID3D12Device, kind: HeapKind, num_descriptors: u32) -> Result<Self> {
        let (heap_type, shader_visible) = match kind {
            HeapKind::Rtv => (D3D12_DESCRIPTOR_HEAP_TYPE_RTV, false),
            HeapKind::Dsv => (D3D12_DESCRIPTOR_HEAP_TYPE_DSV, false),
            HeapKind::CbvSrvUav => (D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV, true),
        };

        let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: heap_type,
            NumDescriptors: num_descriptors,
            Flags: if shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        };

        unsafe {
            let heap: ID3D12DescriptorHeap = device.CreateDescriptorHeap(&heap_desc).map_err(|e| {
                DxCoreError::Graphics(GraphicsError::ResourceCreation(format!(
                    "Failed to create {}: {:?}",
                    kind.name(),
                    e
                )))
            })?;

            let increment_size = device.GetDescriptorHandleIncrementSize(heap_type);
            let cpu_start = heap.GetCPUDescriptorHandleForHeapStart().ptr;
            let base = if shader_visible {
                HeapBase::shader_visible(cpu_start, heap.GetGPUDescriptorHandleForHeapStart().ptr, increment_size)
            } else {
                HeapBase::cpu_only(cpu_start, increment_size)
            };

            Ok(Self {
                heap,
                kind,
                base,
                num_descriptors,
            })
        }
    }

    pub fn heap(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }

    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    pub fn base(&self) -> HeapBase {
        self.base
    }

    pub fn num_descriptors(&self) -> u32 {
        self.num_descriptors
    }
}

/// 三个物理堆加五个分配器
pub struct Dx12DescriptorHeaps {
    rtv: Dx12DescriptorHeap,
    dsv: Dx12DescriptorHeap,
    shader_visible: Dx12DescriptorHeap,
    allocators: DescriptorAllocatorSet,
}

impl Dx12DescriptorHeaps {
    pub fn new(device: &ID3D12Device, config: &DescriptorConfig) -> Result<Self> {
        let layout = DescriptorHeapLayout::from_capacities(config);

        let rtv = Dx12DescriptorHeap::new(device, HeapKind::Rtv, layout.heap_size(HeapKind::Rtv))?;
        let dsv = Dx12DescriptorHeap::new(device, HeapKind::Dsv, layout.heap_size(HeapKind::Dsv))?;
        let shader_visible =
            Dx12DescriptorHeap::new(device, HeapKind::CbvSrvUav, layout.heap_size(HeapKind::CbvSrvUav))?;

        let allocators = DescriptorAllocatorSet::new(layout, rtv.base(), dsv.base(), shader_visible.base());

        tracing::debug!(
            rtv = config.rtv,
            dsv = config.dsv,
            cbv = config.cbv,
            srv = config.srv,
            uav = config.uav,
            "Descriptor heaps created"
        );

        Ok(Self {
            rtv,
            dsv,
            shader_visible,
            allocators,
        })
    }

    pub fn allocate(&mut self, descriptor_type: DescriptorType) -> Result<DescriptorId> {
        self.allocators.allocate(descriptor_type)
    }

    pub fn allocate_range(&mut self, descriptor_type: DescriptorType, count: u32) -> Result<DescriptorId> {
        self.allocators.allocate_range(descriptor_type, count)
    }

    pub fn cpu_handle(&self, descriptor_type: DescriptorType, id: DescriptorId) -> Result<D3D12_CPU_DESCRIPTOR_HANDLE> {
        self.allocators.cpu_handle(descriptor_type, id).map(Into::into)
    }

    pub fn gpu_handle(&self, descriptor_type: DescriptorType, id: DescriptorId) -> Result<D3D12_GPU_DESCRIPTOR_HANDLE> {
        self.allocators.gpu_handle(descriptor_type, id).map(Into::into)
    }

    pub fn allocators(&self) -> &DescriptorAllocatorSet {
        &self.allocators
    }

    pub fn allocators_mut(&mut self) -> &mut DescriptorAllocatorSet {
        &mut self.allocators
    }

    pub fn heap(&self, kind: HeapKind) -> &Dx12DescriptorHeap {
        match kind {
            HeapKind::Rtv => &self.rtv,
            HeapKind::Dsv => &self.dsv,
            HeapKind::CbvSrvUav => &self.shader_visible,
        }
    }

    /// 需要绑定到命令列表的堆（SetDescriptorHeaps）
    pub fn shader_visible_heaps(&self) -> [Option<ID3D12DescriptorHeap>; 1] {
        [Some(self.shader_visible.heap().clone())]
    }
}
