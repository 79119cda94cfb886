//! 描述符分配模块
//!
//! 管理描述符堆中的槽位分配，以及 CPU/GPU 句柄的偏移计算。
//! 本模块只做簿记，不触碰任何图形 API 对象；堆的创建在 `gfx::dx12::descriptor` 中完成。
//!
//! # 堆布局
//!
//! - **RTV**：独立的 CPU 堆
//! - **DSV**：独立的 CPU 堆
//! - **CBV / SRV / UAV**：共用一个着色器可见堆，按顺序切成三个互不重叠的子区间
//!
//! ```text
//! shader-visible heap
//! ┌──────────── CBV ────────────┬──────────── SRV ────────────┬──── UAV ────┐
//! 0                            cbv                        cbv+srv     cbv+srv+uav
//! ```
//!
//! # 分配策略
//!
//! 每种描述符一个 `ResourceAllocator`，发放单调递增的槽位 ID。
//! ID 永远不会被重复发放（除非整个分配器被 `reset`），
//! 所以持有 ID 的对象不需要担心槽位被其他资源覆盖。

use crate::core::config::DescriptorConfig;
use crate::core::error::{GraphicsError, Result};

/// 描述符类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// 渲染目标视图 (RTV)
    RenderTargetView,
    /// 深度模板视图 (DSV)
    DepthStencilView,
    /// 常量缓冲视图 (CBV)
    ConstantBufferView,
    /// 着色资源视图 (SRV)
    ShaderResourceView,
    /// 无序访问视图 (UAV)
    UnorderedAccessView,
}

impl DescriptorType {
    /// 全部描述符类型，顺序与 `DescriptorAllocatorSet` 内部一致
    pub const ALL: [DescriptorType; 5] = [
        DescriptorType::RenderTargetView,
        DescriptorType::DepthStencilView,
        DescriptorType::ConstantBufferView,
        DescriptorType::ShaderResourceView,
        DescriptorType::UnorderedAccessView,
    ];

    /// 所在的堆是否着色器可见
    pub fn is_shader_visible(&self) -> bool {
        self.heap_kind() == HeapKind::CbvSrvUav
    }

    /// 所在的堆
    pub fn heap_kind(&self) -> HeapKind {
        match self {
            DescriptorType::RenderTargetView => HeapKind::Rtv,
            DescriptorType::DepthStencilView => HeapKind::Dsv,
            DescriptorType::ConstantBufferView
            | DescriptorType::ShaderResourceView
            | DescriptorType::UnorderedAccessView => HeapKind::CbvSrvUav,
        }
    }

    /// 描述符类型名称
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorType::RenderTargetView => "RTV",
            DescriptorType::DepthStencilView => "DSV",
            DescriptorType::ConstantBufferView => "CBV",
            DescriptorType::ShaderResourceView => "SRV",
            DescriptorType::UnorderedAccessView => "UAV",
        }
    }

    fn slot(&self) -> usize {
        match self {
            DescriptorType::RenderTargetView => 0,
            DescriptorType::DepthStencilView => 1,
            DescriptorType::ConstantBufferView => 2,
            DescriptorType::ShaderResourceView => 3,
            DescriptorType::UnorderedAccessView => 4,
        }
    }
}

/// 物理描述符堆的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    Rtv,
    Dsv,
    CbvSrvUav,
}

impl HeapKind {
    pub fn name(&self) -> &'static str {
        match self {
            HeapKind::Rtv => "RTV Heap",
            HeapKind::Dsv => "DSV Heap",
            HeapKind::CbvSrvUav => "CBV/SRV/UAV Heap",
        }
    }
}

/// 描述符槽位 ID
///
/// 由 `ResourceAllocator` 按 0, 1, 2, ... 顺序发放。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DescriptorId(u32);

impl DescriptorId {
    pub fn index(&self) -> u32 {
        self.0
    }

    /// 连续分配区间中第 `n` 个 ID
    ///
    /// 溢出时停在 `u32::MAX`，该 ID 不会被任何分配器发放，查询句柄时被拒绝。
    pub fn offset(&self, n: u32) -> DescriptorId {
        DescriptorId(self.0.saturating_add(n))
    }
}

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: usize,
    /// 在堆中的绝对索引
    pub index: u32,
}

impl CpuDescriptorHandle {
    pub fn new(ptr: usize, index: u32) -> Self {
        Self { ptr, index }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as usize * increment_size as usize,
            index: self.index + count,
        }
    }
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: u64,
    /// 在堆中的绝对索引
    pub index: u32,
}

impl GpuDescriptorHandle {
    pub fn new(ptr: u64, index: u32) -> Self {
        Self { ptr, index }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + u64::from(count) * u64::from(increment_size),
            index: self.index + count,
        }
    }
}

/// 描述符句柄对（CPU + GPU）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHandle {
    pub cpu: CpuDescriptorHandle,
    /// 仅对着色器可见的堆有效
    pub gpu: Option<GpuDescriptorHandle>,
}

/// 物理堆的基址与步长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapBase {
    pub cpu_start: usize,
    pub gpu_start: Option<u64>,
    pub increment_size: u32,
}

impl HeapBase {
    pub fn cpu_only(cpu_start: usize, increment_size: u32) -> Self {
        Self {
            cpu_start,
            gpu_start: None,
            increment_size,
        }
    }

    pub fn shader_visible(cpu_start: usize, gpu_start: u64, increment_size: u32) -> Self {
        Self {
            cpu_start,
            gpu_start: Some(gpu_start),
            increment_size,
        }
    }
}

/// 堆内的一个子区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRange {
    /// 子区间起始位置（堆内绝对索引）
    pub offset: u32,
    /// 子区间容量
    pub count: u32,
}

impl DescriptorRange {
    pub fn new(offset: u32, count: u32) -> Self {
        Self { offset, count }
    }

    /// 子区间的结束位置（不含）
    pub fn end(&self) -> u32 {
        self.offset.saturating_add(self.count)
    }

    pub fn overlaps(&self, other: &DescriptorRange) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// 三个物理堆的大小和五类描述符的子区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapLayout {
    pub rtv: DescriptorRange,
    pub dsv: DescriptorRange,
    pub cbv: DescriptorRange,
    pub srv: DescriptorRange,
    pub uav: DescriptorRange,
}

impl DescriptorHeapLayout {
    /// 根据配置的容量划分子区间
    pub fn from_capacities(config: &DescriptorConfig) -> Self {
        let cbv = DescriptorRange::new(0, config.cbv);
        let srv = DescriptorRange::new(cbv.end(), config.srv);
        let uav = DescriptorRange::new(srv.end(), config.uav);

        Self {
            rtv: DescriptorRange::new(0, config.rtv),
            dsv: DescriptorRange::new(0, config.dsv),
            cbv,
            srv,
            uav,
        }
    }

    /// 某类描述符的子区间
    pub fn range(&self, descriptor_type: DescriptorType) -> DescriptorRange {
        match descriptor_type {
            DescriptorType::RenderTargetView => self.rtv,
            DescriptorType::DepthStencilView => self.dsv,
            DescriptorType::ConstantBufferView => self.cbv,
            DescriptorType::ShaderResourceView => self.srv,
            DescriptorType::UnorderedAccessView => self.uav,
        }
    }

    /// 物理堆需要的描述符数量
    pub fn heap_size(&self, kind: HeapKind) -> u32 {
        match kind {
            HeapKind::Rtv => self.rtv.count,
            HeapKind::Dsv => self.dsv.count,
            HeapKind::CbvSrvUav => self.uav.end(),
        }
    }
}

/// 描述符堆子区间分配器
///
/// 固定容量、单调递增地发放槽位 ID，并按
/// `base + (range.offset + id) * increment_size` 计算句柄。
#[derive(Debug, Clone)]
pub struct ResourceAllocator {
    descriptor_type: DescriptorType,
    range: DescriptorRange,
    base: HeapBase,
    next_id: u32,
}

impl ResourceAllocator {
    pub fn new(descriptor_type: DescriptorType, range: DescriptorRange, base: HeapBase) -> Self {
        Self {
            descriptor_type,
            range,
            base,
            next_id: 0,
        }
    }

    /// 分配一个槽位
    pub fn allocate(&mut self) -> Result<DescriptorId> {
        self.allocate_range(1)
    }

    /// 分配 `count` 个连续槽位，返回第一个 ID
    ///
    /// 剩余空间不足时不消耗任何槽位。
    pub fn allocate_range(&mut self, count: u32) -> Result<DescriptorId> {
        if count == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "Cannot allocate an empty {} descriptor range",
                self.descriptor_type.name()
            ))
            .into());
        }

        if count > self.remaining() {
            return Err(GraphicsError::DescriptorHeapExhausted {
                heap: self.descriptor_type.name(),
                capacity: self.range.count,
            }
            .into());
        }

        let id = DescriptorId(self.next_id);
        self.next_id += count;
        Ok(id)
    }

    /// CPU 句柄
    pub fn cpu_handle(&self, id: DescriptorId) -> Result<CpuDescriptorHandle> {
        let index = self.heap_index(id)?;
        let ptr = self.base.cpu_start + index as usize * self.base.increment_size as usize;
        Ok(CpuDescriptorHandle::new(ptr, index))
    }

    /// GPU 句柄（仅着色器可见的堆）
    pub fn gpu_handle(&self, id: DescriptorId) -> Result<GpuDescriptorHandle> {
        let index = self.heap_index(id)?;
        let start = self.base.gpu_start.ok_or_else(|| {
            GraphicsError::ResourceCreation(format!(
                "{} descriptors are not shader visible",
                self.descriptor_type.name()
            ))
        })?;
        let ptr = start + u64::from(index) * u64::from(self.base.increment_size);
        Ok(GpuDescriptorHandle::new(ptr, index))
    }

    /// CPU + GPU 句柄对
    pub fn handle(&self, id: DescriptorId) -> Result<DescriptorHandle> {
        let cpu = self.cpu_handle(id)?;
        let gpu = match self.base.gpu_start {
            Some(_) => Some(self.gpu_handle(id)?),
            None => None,
        };
        Ok(DescriptorHandle { cpu, gpu })
    }

    /// 槽位在物理堆中的绝对索引
    pub fn heap_index(&self, id: DescriptorId) -> Result<u32> {
        if id.0 >= self.next_id {
            return Err(GraphicsError::InvalidDescriptor {
                heap: self.descriptor_type.name(),
                id: id.0,
            }
            .into());
        }
        self.range.offset.checked_add(id.0).ok_or_else(|| {
            GraphicsError::InvalidDescriptor {
                heap: self.descriptor_type.name(),
                id: id.0,
            }
            .into()
        })
    }

    /// 忘记所有已发放的 ID，之前的 ID 全部失效
    pub fn reset(&mut self) {
        self.next_id = 0;
    }

    pub fn allocated_count(&self) -> u32 {
        self.next_id
    }

    pub fn capacity(&self) -> u32 {
        self.range.count
    }

    pub fn remaining(&self) -> u32 {
        self.range.count - self.next_id
    }

    pub fn is_full(&self) -> bool {
        self.next_id >= self.range.count
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        self.descriptor_type
    }

    pub fn range(&self) -> DescriptorRange {
        self.range
    }

    pub fn increment_size(&self) -> u32 {
        self.base.increment_size
    }
}

/// 描述符堆统计信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapStats {
    pub descriptor_type: DescriptorType,
    pub capacity: u32,
    pub used: u32,
    pub available: u32,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    pub fn new(descriptor_type: DescriptorType, capacity: u32, used: u32) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };

        Self {
            descriptor_type,
            capacity,
            used,
            available,
            usage_ratio,
        }
    }
}

/// RTV / DSV / CBV / SRV / UAV 五个分配器
#[derive(Debug, Clone)]
pub struct DescriptorAllocatorSet {
    layout: DescriptorHeapLayout,
    allocators: [ResourceAllocator; 5],
}

impl DescriptorAllocatorSet {
    /// 根据堆布局和三个物理堆的基址创建
    pub fn new(
        layout: DescriptorHeapLayout,
        rtv_base: HeapBase,
        dsv_base: HeapBase,
        shader_visible_base: HeapBase,
    ) -> Self {
        let make = |ty: DescriptorType| {
            let base = match ty.heap_kind() {
                HeapKind::Rtv => rtv_base,
                HeapKind::Dsv => dsv_base,
                HeapKind::CbvSrvUav => shader_visible_base,
            };
            ResourceAllocator::new(ty, layout.range(ty), base)
        };

        Self {
            layout,
            allocators: DescriptorType::ALL.map(make),
        }
    }

    pub fn layout(&self) -> &DescriptorHeapLayout {
        &self.layout
    }

    pub fn allocator(&self, descriptor_type: DescriptorType) -> &ResourceAllocator {
        &self.allocators[descriptor_type.slot()]
    }

    pub fn allocator_mut(&mut self, descriptor_type: DescriptorType) -> &mut ResourceAllocator {
        &mut self.allocators[descriptor_type.slot()]
    }

    pub fn allocate(&mut self, descriptor_type: DescriptorType) -> Result<DescriptorId> {
        self.allocator_mut(descriptor_type).allocate()
    }

    pub fn allocate_range(&mut self, descriptor_type: DescriptorType, count: u32) -> Result<DescriptorId> {
        self.allocator_mut(descriptor_type).allocate_range(count)
    }

    pub fn cpu_handle(&self, descriptor_type: DescriptorType, id: DescriptorId) -> Result<CpuDescriptorHandle> {
        self.allocator(descriptor_type).cpu_handle(id)
    }

    pub fn gpu_handle(&self, descriptor_type: DescriptorType, id: DescriptorId) -> Result<GpuDescriptorHandle> {
        self.allocator(descriptor_type).gpu_handle(id)
    }

    pub fn stats(&self, descriptor_type: DescriptorType) -> DescriptorHeapStats {
        let allocator = self.allocator(descriptor_type);
        DescriptorHeapStats::new(descriptor_type, allocator.capacity(), allocator.allocated_count())
    }

    pub fn all_stats(&self) -> Vec<DescriptorHeapStats> {
        DescriptorType::ALL.iter().map(|ty| self.stats(*ty)).collect()
    }
}
