//! 命令列表与命令分配器的状态跟踪
//!
//! D3D12 的规则：
//! - 命令列表只能在 Closed 状态下 Reset，只能在 Recording 状态下 Close
//! - 命令分配器只有在 GPU 执行完用它录制的所有命令之后才能 Reset
//!
//! `CommandListTracker` 把这两条规则变成可检查的状态机，
//! 在真正调用 API 之前拒绝错误的调用顺序。

use crate::core::error::{GraphicsError, Result};
use crate::renderer::sync::FenceValue;

/// 命令列表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    /// 已关闭，可以提交或重置
    Closed,
    /// 正在录制，绑定了某个分配器
    Recording { allocator: usize },
}

/// 命令队列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueType {
    /// 图形队列（支持图形、计算、复制）
    Direct,
    /// 计算队列
    Compute,
    /// 复制队列
    Copy,
}

impl QueueType {
    pub fn name(&self) -> &'static str {
        match self {
            QueueType::Direct => "Direct",
            QueueType::Compute => "Compute",
            QueueType::Copy => "Copy",
        }
    }
}

/// 单个命令列表 + 一组分配器
#[derive(Debug)]
pub struct CommandListTracker {
    state: CommandListState,
    /// 每个分配器最近一次被提交时的 fence 值
    allocator_fences: Vec<FenceValue>,
    /// 最近一次 Close 时绑定的分配器，等待 `submitted` 记录 fence
    closed_allocator: Option<usize>,
}

impl CommandListTracker {
    /// 命令列表创建时处于 Closed 状态
    pub fn new(allocator_count: usize) -> Self {
        Self {
            state: CommandListState::Closed,
            allocator_fences: vec![FenceValue::ZERO; allocator_count],
            closed_allocator: None,
        }
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, CommandListState::Recording { .. })
    }

    pub fn allocator_count(&self) -> usize {
        self.allocator_fences.len()
    }

    /// 分配器最近一次提交的 fence 值
    pub fn allocator_fence(&self, allocator: usize) -> Option<FenceValue> {
        self.allocator_fences.get(allocator).copied()
    }

    /// 重置分配器并开始录制
    ///
    /// `completed` 是 GPU 当前的完成值，用来确认分配器已经空闲。
    pub fn reset(&mut self, allocator: usize, completed: FenceValue) -> Result<()> {
        if let CommandListState::Recording { allocator: current } = self.state {
            return Err(GraphicsError::CommandExecution(format!(
                "command list is still recording with allocator {}",
                current
            ))
            .into());
        }

        let last_use = self.allocator_fence(allocator).ok_or_else(|| {
            GraphicsError::CommandExecution(format!("no command allocator {}", allocator))
        })?;

        if last_use > completed {
            return Err(GraphicsError::CommandExecution(format!(
                "command allocator {} is still in use by the GPU (fence {} > completed {})",
                allocator,
                last_use.value(),
                completed.value()
            ))
            .into());
        }

        self.state = CommandListState::Recording { allocator };
        self.closed_allocator = None;
        Ok(())
    }

    /// 结束录制，返回录制时使用的分配器
    pub fn close(&mut self) -> Result<usize> {
        match self.state {
            CommandListState::Recording { allocator } => {
                self.state = CommandListState::Closed;
                self.closed_allocator = Some(allocator);
                Ok(allocator)
            }
            CommandListState::Closed => Err(GraphicsError::CommandExecution(
                "command list is already closed".to_string(),
            )
            .into()),
        }
    }

    /// 记录刚提交的命令列表对应的 fence 值
    pub fn submitted(&mut self, fence: FenceValue) -> Result<()> {
        let allocator = self.closed_allocator.take().ok_or_else(|| {
            GraphicsError::CommandExecution("no closed command list to submit".to_string())
        })?;
        self.allocator_fences[allocator] = fence;
        Ok(())
    }

    /// 录制失败时强制回到 Closed，分配器的 fence 不变
    pub fn discard(&mut self) {
        self.state = CommandListState::Closed;
        self.closed_allocator = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        let mut tracker = CommandListTracker::new(2);
        assert_eq!(tracker.state(), CommandListState::Closed);

        assert!(tracker.close().is_err());

        tracker.reset(0, FenceValue::ZERO).unwrap();
        assert!(tracker.is_recording());
        assert!(tracker.reset(1, FenceValue::ZERO).is_err());

        assert_eq!(tracker.close().unwrap(), 0);
        tracker.submitted(FenceValue::new(1)).unwrap();
        assert_eq!(tracker.allocator_fence(0), Some(FenceValue::new(1)));

        // 同一次 close 只能提交一次
        assert!(tracker.submitted(FenceValue::new(2)).is_err());
    }

    #[test]
    fn test_allocator_reset_requires_completion() {
        let mut tracker = CommandListTracker::new(2);

        tracker.reset(0, FenceValue::ZERO).unwrap();
        tracker.close().unwrap();
        tracker.submitted(FenceValue::new(3)).unwrap();

        assert!(tracker.reset(0, FenceValue::new(2)).is_err());
        assert!(!tracker.is_recording());

        // 另一个分配器不受影响
        tracker.reset(1, FenceValue::new(2)).unwrap();
        tracker.close().unwrap();
        tracker.submitted(FenceValue::new(4)).unwrap();

        tracker.reset(0, FenceValue::new(3)).unwrap();
    }

    #[test]
    fn test_unknown_allocator() {
        let mut tracker = CommandListTracker::new(2);
        assert!(tracker.reset(2, FenceValue::ZERO).is_err());
    }

    #[test]
    fn test_discard() {
        let mut tracker = CommandListTracker::new(1);
        tracker.reset(0, FenceValue::ZERO).unwrap();
        tracker.discard();
        assert_eq!(tracker.state(), CommandListState::Closed);
        assert!(tracker.submitted(FenceValue::new(1)).is_err());
    }

    #[test]
    fn test_queue_type_name() {
        assert_eq!(QueueType::Direct.name(), "Direct");
    }
}
