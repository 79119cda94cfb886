//! 帧协议集成测试
//!
//! 用软件时间线模拟 GPU，按 `Dx12Context` 的顺序驱动帧节奏、命令列表、
//! 资源状态和延迟释放，不需要显卡。

use std::time::Duration;

use dxcore::core::config::DescriptorConfig;
use dxcore::core::error::{DxCoreError, GraphicsError};
use dxcore::renderer::{
    Barrier, CommandListTracker, DescriptorAllocatorSet, DescriptorHeapLayout, DescriptorType,
    FenceValue, FramePacer, GpuTimeline, HeapBase, ReleaseQueue, ResizeRequest, ResourceId,
    ResourceState, ResourceStateTracker, SoftwareTimeline, SwapChainViews,
};

/// 一个最小的帧循环：槽位、分配器、后备缓冲状态、延迟释放
struct FrameLoop {
    pacer: FramePacer,
    commands: CommandListTracker,
    states: ResourceStateTracker,
    back_buffers: Vec<ResourceId>,
    deferred: ReleaseQueue<&'static str>,
    recorded: Vec<Barrier>,
}

impl FrameLoop {
    fn new(frame_count: usize) -> Self {
        let mut states = ResourceStateTracker::new();
        let back_buffers = (0..frame_count)
            .map(|_| states.register(ResourceState::PRESENT).unwrap())
            .collect();
        Self {
            pacer: FramePacer::new(frame_count).unwrap(),
            commands: CommandListTracker::new(frame_count + 1),
            states,
            back_buffers,
            deferred: ReleaseQueue::new(),
            recorded: Vec::new(),
        }
    }

    fn begin<T: GpuTimeline>(&mut self, timeline: &T) -> dxcore::core::Result<usize> {
        let slot = self.pacer.begin_frame(timeline)?;
        let completed = self.pacer.fence_mut().poll(timeline);
        self.deferred.collect(completed);
        self.commands.reset(slot, completed)?;
        self.states
            .transition(self.back_buffers[slot], ResourceState::RENDER_TARGET)?;
        self.recorded.extend(self.states.flush());
        Ok(slot)
    }

    fn end<T: GpuTimeline>(&mut self, timeline: &T) -> dxcore::core::Result<FenceValue> {
        let slot = self.pacer.current_index();
        self.states
            .transition(self.back_buffers[slot], ResourceState::PRESENT)?;
        self.recorded.extend(self.states.flush());
        self.commands.close()?;
        let next = (slot + 1) % self.pacer.frame_count();
        let value = self.pacer.end_frame(timeline, next)?;
        self.commands.submitted(value)?;
        Ok(value)
    }
}

#[test]
fn test_double_buffered_frames_alternate_slots() {
    let timeline = SoftwareTimeline::immediate();
    let mut frames = FrameLoop::new(2);

    let mut slots = Vec::new();
    for _ in 0..6 {
        slots.push(frames.begin(&timeline).unwrap());
        frames.end(&timeline).unwrap();
    }

    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
    assert_eq!(frames.pacer.frame_number(), 6);
    assert_eq!(frames.pacer.fence().last_signaled(), FenceValue::new(6));
    // 每帧两个转换：PRESENT→RENDER_TARGET 和 RENDER_TARGET→PRESENT
    assert_eq!(frames.recorded.len(), 12);
}

#[test]
fn test_cpu_runs_ahead_by_frame_count() {
    let timeline = SoftwareTimeline::manual(Duration::from_millis(20));
    let mut frames = FrameLoop::new(3);

    // 三个槽位都没提交过，前三帧无需等待
    for expected in 0..3 {
        assert_eq!(frames.begin(&timeline).unwrap(), expected);
        frames.end(&timeline).unwrap();
    }
    assert_eq!(timeline.pending_count(), 3);

    // 第四帧回到槽位 0，GPU 还没完成 fence 1，等待超时
    let err = frames.begin(&timeline).unwrap_err();
    assert!(matches!(
        err,
        DxCoreError::Graphics(GraphicsError::Synchronization(_))
    ));
    frames.pacer.abandon_frame();

    timeline.retire_through(FenceValue::new(1)).unwrap();
    assert_eq!(frames.begin(&timeline).unwrap(), 0);
    frames.end(&timeline).unwrap();
    assert_eq!(frames.commands.allocator_fence(0), Some(FenceValue::new(4)));
}

#[test]
fn test_allocator_reset_requires_completed_fence() {
    let timeline = SoftwareTimeline::manual(Duration::from_millis(10));
    let mut commands = CommandListTracker::new(2);
    let mut pacer = FramePacer::new(2).unwrap();

    pacer.begin_frame(&timeline).unwrap();
    commands.reset(0, FenceValue::default()).unwrap();
    commands.close().unwrap();
    let value = pacer.end_frame(&timeline, 1).unwrap();
    commands.submitted(value).unwrap();

    // 分配器 0 仍在 GPU 上
    let completed = pacer.fence_mut().poll(&timeline);
    assert!(commands.reset(0, completed).is_err());

    timeline.retire_all().unwrap();
    let completed = pacer.fence_mut().poll(&timeline);
    assert_eq!(completed, value);
    commands.reset(0, completed).unwrap();
    assert!(commands.is_recording());
}

#[test]
fn test_flush_then_rebind_keeps_fence_monotonic() {
    let timeline = SoftwareTimeline::immediate();
    let mut frames = FrameLoop::new(2);

    for _ in 0..3 {
        frames.begin(&timeline).unwrap();
        frames.end(&timeline).unwrap();
    }
    let before = frames.pacer.fence().last_signaled();

    let flushed = frames.pacer.flush(&timeline).unwrap();
    assert!(flushed > before);
    assert_eq!(timeline.completed_value(), flushed);

    // 交换链重建后当前后备缓冲可能回到 0
    frames.pacer.rebind(0).unwrap();
    assert_eq!(frames.begin(&timeline).unwrap(), 0);
    let value = frames.end(&timeline).unwrap();
    assert!(value > flushed);
}

#[test]
fn test_staging_buffers_released_after_their_frame_completes() {
    let timeline = SoftwareTimeline::manual(Duration::from_millis(10));
    let mut frames = FrameLoop::new(2);

    frames.begin(&timeline).unwrap();
    // 本帧结束时 signal 的值
    let upload_fence = frames.pacer.fence().last_signaled().next();
    frames.deferred.retire("staging", upload_fence);
    let submitted = frames.end(&timeline).unwrap();
    assert_eq!(submitted, upload_fence);

    frames.begin(&timeline).unwrap();
    assert_eq!(frames.deferred.len(), 1);
    frames.end(&timeline).unwrap();

    timeline.retire_through(upload_fence).unwrap();
    frames.begin(&timeline).unwrap();
    assert!(frames.deferred.is_empty());
}

#[test]
fn test_upload_then_read_barriers_collapse() {
    let mut states = ResourceStateTracker::new();
    let buffer = states.register(ResourceState::COMMON).unwrap();

    states.transition(buffer, ResourceState::COPY_DEST).unwrap();
    let copy = states.flush();
    assert_eq!(
        copy,
        vec![Barrier::Transition {
            resource: buffer,
            before: ResourceState::COMMON,
            after: ResourceState::COPY_DEST,
        }]
    );

    // 拷贝之后连续两次转换合并为一条
    states.transition(buffer, ResourceState::GENERIC_READ).unwrap();
    states
        .transition(buffer, ResourceState::VERTEX_AND_CONSTANT_BUFFER)
        .unwrap();
    let after_copy = states.flush();
    assert_eq!(
        after_copy,
        vec![Barrier::Transition {
            resource: buffer,
            before: ResourceState::COPY_DEST,
            after: ResourceState::VERTEX_AND_CONSTANT_BUFFER,
        }]
    );
}

fn descriptor_heaps(config: &DescriptorConfig) -> DescriptorAllocatorSet {
    let layout = DescriptorHeapLayout::from_capacities(config);
    let rtv_base = HeapBase::cpu_only(0x1000, 32);
    let dsv_base = HeapBase::cpu_only(0x8000, 8);
    let sv_base = HeapBase::shader_visible(0x10000, 0xF000_0000, 64);
    DescriptorAllocatorSet::new(layout, rtv_base, dsv_base, sv_base)
}

fn view_handles(views: &SwapChainViews, allocators: &DescriptorAllocatorSet) -> (Vec<usize>, usize) {
    let rtvs = views
        .rtvs()
        .map(|id| {
            allocators
                .cpu_handle(DescriptorType::RenderTargetView, id)
                .unwrap()
                .ptr
        })
        .collect();
    let dsv = allocators
        .cpu_handle(DescriptorType::DepthStencilView, views.dsv())
        .unwrap()
        .ptr;
    (rtvs, dsv)
}

#[test]
fn test_back_buffer_views_stable_across_resize() {
    let config = DescriptorConfig::default();
    let mut allocators = descriptor_heaps(&config);
    let mut views = SwapChainViews::allocate(&mut allocators, 3, 800, 600).unwrap();
    let initial = view_handles(&views, &allocators);
    assert_eq!(initial.0[2], 0x1000 + 2 * 32);

    for (width, height) in [(1024, 768), (640, 480), (1920, 1080), (800, 600), (1280, 720)] {
        match views.request_resize(width, height).unwrap() {
            ResizeRequest::Rebuild { width, height } => views.commit_resize(width, height),
            other => panic!("expected a rebuild, got {:?}", other),
        }

        // 每次重建都写回同一批槽位，不消耗新的描述符
        assert_eq!(view_handles(&views, &allocators), initial);
        assert_eq!(allocators.stats(DescriptorType::RenderTargetView).used, 3);
        assert_eq!(allocators.stats(DescriptorType::DepthStencilView).used, 1);
    }
    assert_eq!((views.width(), views.height()), (1280, 720));

    // 最小化和同尺寸都不会重建
    assert_eq!(views.request_resize(0, 0).unwrap(), ResizeRequest::Ignore);
    assert_eq!(views.request_resize(1280, 720).unwrap(), ResizeRequest::Unchanged);

    // 着色器可见堆里 SRV 排在 CBV 之后
    let srv = allocators.allocate(DescriptorType::ShaderResourceView).unwrap();
    let gpu = allocators
        .gpu_handle(DescriptorType::ShaderResourceView, srv)
        .unwrap();
    assert_eq!(gpu.ptr, 0xF000_0000 + u64::from(config.cbv) * 64);
    assert!(allocators
        .gpu_handle(DescriptorType::DepthStencilView, views.dsv())
        .is_err());
}

#[test]
fn test_unrecoverable_resize_loses_views() {
    let mut allocators = descriptor_heaps(&DescriptorConfig::default());
    let mut views = SwapChainViews::allocate(&mut allocators, 2, 800, 600).unwrap();

    views.mark_lost();
    let err = views.request_resize(1024, 768).unwrap_err();
    assert!(matches!(
        err,
        DxCoreError::Graphics(GraphicsError::ContextLost(_))
    ));
    assert!(views.ensure_usable().is_err());
    assert_eq!(allocators.stats(DescriptorType::RenderTargetView).used, 2);
}

#[test]
fn test_allocator_waits_for_submission_whose_signal_failed() {
    let timeline = SoftwareTimeline::immediate();
    let mut frames = FrameLoop::new(2);

    frames.begin(&timeline).unwrap();
    frames.end(&timeline).unwrap();

    // 命令列表已提交，signal 失败：分配器记下下一次 signal 的值
    let slot = frames.begin(&timeline).unwrap();
    frames.commands.close().unwrap();
    frames.pacer.abandon_frame();
    let pending = frames.pacer.fence().last_signaled().next();
    frames.commands.submitted(pending).unwrap();

    // 仅轮询时分配器仍被视为在用
    let completed = frames.pacer.fence_mut().poll(&timeline);
    assert!(frames.commands.reset(slot, completed).is_err());

    // settle 补 signal 并等待后才能重置
    let settled = frames.pacer.fence_mut().settle(&timeline, pending).unwrap();
    assert!(settled >= pending);
    frames.commands.reset(slot, settled).unwrap();
    assert!(frames.commands.is_recording());
}

#[test]
fn test_descriptor_exhaustion_reports_heap() {
    let config = DescriptorConfig {
        dsv: 1,
        ..DescriptorConfig::default()
    };
    let layout = DescriptorHeapLayout::from_capacities(&config);
    let base = HeapBase::cpu_only(0, 8);
    let mut allocators = DescriptorAllocatorSet::new(
        layout,
        base,
        base,
        HeapBase::shader_visible(0, 0, 8),
    );

    allocators.allocate(DescriptorType::DepthStencilView).unwrap();
    let err = allocators
        .allocate(DescriptorType::DepthStencilView)
        .unwrap_err();
    match err {
        DxCoreError::Graphics(GraphicsError::DescriptorHeapExhausted { capacity, .. }) => {
            assert_eq!(capacity, 1)
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
