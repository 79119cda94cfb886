//! 在途帧管理
//!
//! N 个帧槽位循环使用，每个槽位拥有一个命令分配器和一个交换链后备缓冲。
//! 槽位记录最近一次提交时 signal 的 fence 值；再次使用该槽位之前，
//! CPU 必须等 GPU 完成这个值，否则会重置一个 GPU 还在读的命令分配器。
//!
//! ```text
//! frame N     : CPU 正在录制      (slot N % count)
//! frame N - 1 : GPU 正在执行
//! frame N - 2 : 已完成，可复用    (仅三缓冲)
//! ```

use crate::core::error::{DxCoreError, Result};
use crate::renderer::sync::{FenceManager, FenceValue, GpuTimeline};

/// 单个帧槽位
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameResource {
    /// 最近一次提交的 fence 值，0 表示从未提交
    pub fence_value: FenceValue,
}

impl FrameResource {
    pub fn is_submitted(&self) -> bool {
        !self.fence_value.is_zero()
    }
}

/// 帧节奏控制器
#[derive(Debug)]
pub struct FramePacer {
    frames: Vec<FrameResource>,
    current: usize,
    in_frame: bool,
    frame_number: u64,
    fence: FenceManager,
}

impl FramePacer {
    pub fn new(frame_count: usize) -> Result<Self> {
        if frame_count == 0 {
            return Err(DxCoreError::Initialization(
                "At least 1 frame resource required".to_string(),
            ));
        }

        Ok(Self {
            frames: vec![FrameResource::default(); frame_count],
            current: 0,
            in_frame: false,
            frame_number: 0,
            fence: FenceManager::new(),
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// 当前槽位索引
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// 已结束的帧数
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn is_in_frame(&self) -> bool {
        self.in_frame
    }

    pub fn frame(&self, index: usize) -> Option<&FrameResource> {
        self.frames.get(index)
    }

    pub fn fence(&self) -> &FenceManager {
        &self.fence
    }

    pub fn fence_mut(&mut self) -> &mut FenceManager {
        &mut self.fence
    }

    /// 开始录制一帧
    ///
    /// 等待当前槽位上一次提交完成，之后它的命令分配器可以安全重置。
    /// 返回当前槽位索引。
    pub fn begin_frame<T: GpuTimeline + ?Sized>(&mut self, timeline: &T) -> Result<usize> {
        if self.in_frame {
            return Err(DxCoreError::Runtime(
                "begin_frame called twice without end_frame".to_string(),
            ));
        }

        let slot = self.frames[self.current];
        if slot.is_submitted() {
            self.fence.wait(timeline, slot.fence_value)?;
        }

        self.in_frame = true;
        Ok(self.current)
    }

    /// 结束一帧
    ///
    /// signal 一个新的 fence 值并记录到当前槽位，然后切换到 `next_index`
    /// （交换链 Present 之后的当前后备缓冲索引）。
    pub fn end_frame<T: GpuTimeline + ?Sized>(&mut self, timeline: &T, next_index: usize) -> Result<FenceValue> {
        if !self.in_frame {
            return Err(DxCoreError::Runtime(
                "end_frame called without begin_frame".to_string(),
            ));
        }
        self.check_index(next_index)?;

        let value = self.fence.signal(timeline)?;
        self.frames[self.current].fence_value = value;
        self.current = next_index;
        self.in_frame = false;
        self.frame_number += 1;
        Ok(value)
    }

    /// 放弃当前帧（录制失败时），不 signal
    pub fn abandon_frame(&mut self) {
        self.in_frame = false;
    }

    /// 等待所有槽位空闲
    pub fn flush<T: GpuTimeline + ?Sized>(&mut self, timeline: &T) -> Result<FenceValue> {
        self.fence.flush(timeline)
    }

    /// 交换链重建后重新对齐当前槽位
    ///
    /// 调用前必须已经 `flush`，fence 计数器保持不变。
    pub fn rebind(&mut self, next_index: usize) -> Result<()> {
        if self.in_frame {
            return Err(DxCoreError::Runtime(
                "cannot rebind frame slots while a frame is recording".to_string(),
            ));
        }
        self.check_index(next_index)?;
        self.current = next_index;
        Ok(())
    }

    /// 最早仍可能在 GPU 上执行的 fence 值
    pub fn oldest_in_flight(&self) -> Option<FenceValue> {
        self.frames
            .iter()
            .filter(|f| f.is_submitted() && f.fence_value > self.fence.last_completed())
            .map(|f| f.fence_value)
            .min()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.frames.len() {
            return Err(DxCoreError::Runtime(format!(
                "frame index {} out of range ({} frames)",
                index,
                self.frames.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::sync::SoftwareTimeline;
    use std::time::Duration;

    #[test]
    fn test_first_frames_do_not_wait() {
        let timeline = SoftwareTimeline::manual(Duration::from_millis(10));
        let mut pacer = FramePacer::new(2).unwrap();

        assert_eq!(pacer.begin_frame(&timeline).unwrap(), 0);
        assert_eq!(pacer.end_frame(&timeline, 1).unwrap().value(), 1);
        assert_eq!(pacer.begin_frame(&timeline).unwrap(), 1);
        assert_eq!(pacer.end_frame(&timeline, 0).unwrap().value(), 2);
        assert_eq!(pacer.frame_number(), 2);
    }

    #[test]
    fn test_slot_reuse_waits_for_gpu() {
        let timeline = SoftwareTimeline::manual(Duration::from_millis(10));
        let mut pacer = FramePacer::new(2).unwrap();

        pacer.begin_frame(&timeline).unwrap();
        let first = pacer.end_frame(&timeline, 1).unwrap();
        pacer.begin_frame(&timeline).unwrap();
        pacer.end_frame(&timeline, 0).unwrap();

        // 槽位 0 的提交还没完成
        assert!(pacer.begin_frame(&timeline).is_err());
        pacer.abandon_frame();

        timeline.retire_through(first).unwrap();
        assert_eq!(pacer.begin_frame(&timeline).unwrap(), 0);
    }

    #[test]
    fn test_begin_end_pairing() {
        let timeline = SoftwareTimeline::immediate();
        let mut pacer = FramePacer::new(3).unwrap();

        assert!(pacer.end_frame(&timeline, 1).is_err());
        pacer.begin_frame(&timeline).unwrap();
        assert!(pacer.begin_frame(&timeline).is_err());
        assert!(pacer.end_frame(&timeline, 3).is_err());
        assert!(pacer.end_frame(&timeline, 1).is_ok());
    }

    #[test]
    fn test_fence_survives_rebind() {
        let timeline = SoftwareTimeline::immediate();
        let mut pacer = FramePacer::new(2).unwrap();

        for i in 0..4 {
            pacer.begin_frame(&timeline).unwrap();
            pacer.end_frame(&timeline, (i + 1) % 2).unwrap();
        }
        let flushed = pacer.flush(&timeline).unwrap();
        assert_eq!(flushed.value(), 5);
        assert!(pacer.oldest_in_flight().is_none());

        pacer.rebind(1).unwrap();
        pacer.begin_frame(&timeline).unwrap();
        assert_eq!(pacer.end_frame(&timeline, 0).unwrap().value(), 6);
    }

    #[test]
    fn test_oldest_in_flight() {
        let timeline = SoftwareTimeline::manual(Duration::from_millis(10));
        let mut pacer = FramePacer::new(3).unwrap();

        for i in 0..3 {
            pacer.begin_frame(&timeline).unwrap();
            pacer.end_frame(&timeline, (i + 1) % 3).unwrap();
        }
        assert_eq!(pacer.oldest_in_flight(), Some(FenceValue::new(1)));

        timeline.retire_through(FenceValue::new(2)).unwrap();
        pacer.fence_mut().poll(&timeline);
        assert_eq!(pacer.oldest_in_flight(), Some(FenceValue::new(3)));
    }

    #[test]
    fn test_zero_frames_rejected() {
        assert!(FramePacer::new(0).is_err());
    }
}
