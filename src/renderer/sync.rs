//! GPU 同步模块
//!
//! Fence 协议：CPU 侧维护一个单调递增的计数器，每次提交后让命令队列
//! signal 一个新值；想复用某块 GPU 正在读写的内存时，先等 fence 的完成值
//! 追上提交时记录的值。
//!
//! - `GpuTimeline`：对命令队列 + fence 的抽象（DX12 实现在 `gfx::dx12::sync`）
//! - `FenceManager`：计数器与 signal / wait / flush 协议
//! - `SoftwareTimeline`：纯 CPU 的时间线，用于没有 GPU 的环境

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::core::error::{GraphicsError, Result};

/// Fence 值
///
/// 0 表示“从未提交”，第一次 signal 的值是 1。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FenceValue(u64);

impl FenceValue {
    pub const ZERO: FenceValue = FenceValue(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

/// 命令队列上的 fence 时间线
pub trait GpuTimeline {
    /// 在队列末尾插入一次 signal，GPU 执行到这里时完成值变为 `value`
    fn signal(&self, value: FenceValue) -> Result<()>;

    /// GPU 已完成的最大 fence 值
    fn completed_value(&self) -> FenceValue;

    /// 阻塞 CPU 直到完成值 >= `value`
    fn wait_for(&self, value: FenceValue) -> Result<()>;
}

/// Fence 管理器
///
/// 负责 fence 值的发放。计数器从不回退，包括窗口大小改变之后。
#[derive(Debug, Default)]
pub struct FenceManager {
    last_signaled: FenceValue,
    last_completed: FenceValue,
}

impl FenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最近一次 signal 的值
    pub fn last_signaled(&self) -> FenceValue {
        self.last_signaled
    }

    /// 最近一次观察到的完成值
    pub fn last_completed(&self) -> FenceValue {
        self.last_completed
    }

    /// 递增计数器并让队列 signal 新值
    pub fn signal<T: GpuTimeline + ?Sized>(&mut self, timeline: &T) -> Result<FenceValue> {
        let value = self.last_signaled.next();
        timeline.signal(value)?;
        self.last_signaled = value;
        Ok(value)
    }

    /// 查询并缓存完成值
    pub fn poll<T: GpuTimeline + ?Sized>(&mut self, timeline: &T) -> FenceValue {
        let completed = timeline.completed_value();
        if completed > self.last_completed {
            self.last_completed = completed;
        }
        self.last_completed
    }

    pub fn is_completed<T: GpuTimeline + ?Sized>(&mut self, timeline: &T, value: FenceValue) -> bool {
        value <= self.last_completed || self.poll(timeline) >= value
    }

    /// 等待 `value` 完成
    ///
    /// 等待一个从未 signal 过的值会永远阻塞，所以直接返回错误。
    pub fn wait<T: GpuTimeline + ?Sized>(&mut self, timeline: &T, value: FenceValue) -> Result<()> {
        if value > self.last_signaled {
            return Err(GraphicsError::Synchronization(format!(
                "fence value {} was never signaled (last signaled {})",
                value.value(),
                self.last_signaled.value()
            ))
            .into());
        }

        if self.is_completed(timeline, value) {
            return Ok(());
        }

        timeline.wait_for(value)?;
        self.poll(timeline);
        Ok(())
    }

    /// 确保 `value` 已完成，返回最新的完成值
    ///
    /// 命令列表提交之后 signal 失败时，调用者记下的是 `last_signaled().next()`，
    /// 这个值从未 signal 过。此时补一次 signal 覆盖那次提交，再等待它。
    pub fn settle<T: GpuTimeline + ?Sized>(&mut self, timeline: &T, value: FenceValue) -> Result<FenceValue> {
        if value > self.last_signaled.next() {
            return Err(GraphicsError::Synchronization(format!(
                "fence value {} is ahead of the timeline (last signaled {})",
                value.value(),
                self.last_signaled.value()
            ))
            .into());
        }

        if value > self.last_signaled {
            self.flush(timeline)?;
        } else {
            self.wait(timeline, value)?;
        }
        Ok(self.poll(timeline))
    }

    /// 等待队列中所有已提交的工作完成
    pub fn flush<T: GpuTimeline + ?Sized>(&mut self, timeline: &T) -> Result<FenceValue> {
        let value = self.signal(timeline)?;
        self.wait(timeline, value)?;
        Ok(value)
    }
}

#[derive(Debug, Default)]
struct SoftwareState {
    pending: VecDeque<u64>,
    completed: u64,
}

/// 纯 CPU 的 fence 时间线
///
/// `signal` 只把值排进队列；完成由 `retire_through` / `retire_all` 推进，
/// 或者在 `immediate` 模式下由 `wait_for` 自己推进。
/// 非 immediate 模式下，`wait_for` 最多等待 `timeout`，超时即返回同步错误，
/// 方便在测试中暴露会死锁的调用顺序。
#[derive(Debug)]
pub struct SoftwareTimeline {
    state: Mutex<SoftwareState>,
    retired: Condvar,
    immediate: bool,
    timeout: Duration,
}

impl SoftwareTimeline {
    /// `wait_for` 自动完成所有排队的 signal
    pub fn immediate() -> Self {
        Self::with_mode(true, Duration::ZERO)
    }

    /// 只有显式 retire 才会推进完成值
    pub fn manual(timeout: Duration) -> Self {
        Self::with_mode(false, timeout)
    }

    fn with_mode(immediate: bool, timeout: Duration) -> Self {
        Self {
            state: Mutex::new(SoftwareState::default()),
            retired: Condvar::new(),
            immediate,
            timeout,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SoftwareState>> {
        self.state
            .lock()
            .map_err(|_| GraphicsError::Synchronization("software timeline poisoned".to_string()).into())
    }

    /// 完成所有 <= `value` 的 signal
    pub fn retire_through(&self, value: FenceValue) -> Result<()> {
        let mut state = self.lock()?;
        while let Some(&front) = state.pending.front() {
            if front > value.value() {
                break;
            }
            state.pending.pop_front();
            state.completed = front;
        }
        self.retired.notify_all();
        Ok(())
    }

    /// 完成所有排队的 signal
    pub fn retire_all(&self) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(&last) = state.pending.back() {
            state.completed = last;
        }
        state.pending.clear();
        self.retired.notify_all();
        Ok(())
    }

    /// 尚未完成的 signal 个数
    pub fn pending_count(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }
}

impl GpuTimeline for SoftwareTimeline {
    fn signal(&self, value: FenceValue) -> Result<()> {
        let mut state = self.lock()?;
        let last = state.pending.back().copied().unwrap_or(state.completed);
        if value.value() <= last {
            return Err(GraphicsError::Synchronization(format!(
                "fence value {} is not greater than {}",
                value.value(),
                last
            ))
            .into());
        }
        state.pending.push_back(value.value());
        Ok(())
    }

    fn completed_value(&self) -> FenceValue {
        FenceValue(self.state.lock().map(|s| s.completed).unwrap_or(0))
    }

    fn wait_for(&self, value: FenceValue) -> Result<()> {
        if self.immediate {
            let last = {
                let state = self.lock()?;
                state.pending.back().copied().unwrap_or(state.completed)
            };
            if value.value() > last {
                return Err(GraphicsError::Synchronization(format!(
                    "fence value {} was never signaled (last signaled {})",
                    value.value(),
                    last
                ))
                .into());
            }
            return self.retire_through(value);
        }

        let state = self.lock()?;
        let (state, result) = self
            .retired
            .wait_timeout_while(state, self.timeout, |s| s.completed < value.value())
            .map_err(|_| GraphicsError::Synchronization("software timeline poisoned".to_string()))?;

        if result.timed_out() && state.completed < value.value() {
            return Err(GraphicsError::Synchronization(format!(
                "timed out waiting for fence value {} (completed {})",
                value.value(),
                state.completed
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fence_value() {
        let fence = FenceValue::new(1);
        assert_eq!(fence.next().value(), 2);
        assert!(FenceValue::ZERO.is_zero());
        assert!(FenceValue::new(1) < FenceValue::new(2));
    }

    #[test]
    fn test_signal_starts_at_one() {
        let timeline = SoftwareTimeline::immediate();
        let mut fence = FenceManager::new();

        assert_eq!(fence.signal(&timeline).unwrap().value(), 1);
        assert_eq!(fence.signal(&timeline).unwrap().value(), 2);
        assert_eq!(fence.last_signaled().value(), 2);
        assert_eq!(timeline.pending_count(), 2);
    }

    #[test]
    fn test_wait_on_unsignaled_value_fails() {
        let timeline = SoftwareTimeline::immediate();
        let mut fence = FenceManager::new();
        fence.signal(&timeline).unwrap();

        assert!(fence.wait(&timeline, FenceValue::new(5)).is_err());
    }

    #[test]
    fn test_immediate_timeline_rejects_unsignaled_wait() {
        let timeline = SoftwareTimeline::immediate();
        timeline.signal(FenceValue::new(1)).unwrap();

        assert!(timeline.wait_for(FenceValue::new(2)).is_err());
        assert_eq!(timeline.completed_value(), FenceValue::ZERO);

        timeline.wait_for(FenceValue::new(1)).unwrap();
        assert_eq!(timeline.completed_value(), FenceValue::new(1));
        // 已完成的值可以重复等待
        assert!(timeline.wait_for(FenceValue::new(1)).is_ok());
    }

    #[test]
    fn test_wait_skips_completed_values() {
        let timeline = SoftwareTimeline::manual(Duration::from_millis(10));
        let mut fence = FenceManager::new();

        let v1 = fence.signal(&timeline).unwrap();
        let v2 = fence.signal(&timeline).unwrap();
        timeline.retire_through(v1).unwrap();

        assert!(fence.wait(&timeline, v1).is_ok());
        assert!(fence.is_completed(&timeline, v1));
        assert!(!fence.is_completed(&timeline, v2));

        // 没有人推进时间线，等待应当超时
        assert!(fence.wait(&timeline, v2).is_err());
    }

    #[test]
    fn test_settle_covers_unsignaled_submission() {
        let timeline = SoftwareTimeline::immediate();
        let mut fence = FenceManager::new();
        let v1 = fence.signal(&timeline).unwrap();

        // 已 signal 的值：普通等待
        assert_eq!(fence.settle(&timeline, v1).unwrap(), v1);

        // 提交后没 signal 上的值：补一次 signal
        let pending = fence.last_signaled().next();
        assert_eq!(fence.settle(&timeline, pending).unwrap(), pending);
        assert_eq!(fence.last_signaled(), pending);

        let too_far = FenceValue::new(pending.value() + 2);
        assert!(fence.settle(&timeline, too_far).is_err());
    }

    #[test]
    fn test_flush_waits_for_everything() {
        let timeline = SoftwareTimeline::immediate();
        let mut fence = FenceManager::new();
        fence.signal(&timeline).unwrap();
        fence.signal(&timeline).unwrap();

        let flushed = fence.flush(&timeline).unwrap();
        assert_eq!(flushed.value(), 3);
        assert_eq!(timeline.completed_value(), flushed);
        assert_eq!(timeline.pending_count(), 0);
        assert_eq!(fence.last_completed(), flushed);
    }

    #[test]
    fn test_timeline_rejects_non_monotonic_signal() {
        let timeline = SoftwareTimeline::immediate();
        timeline.signal(FenceValue::new(3)).unwrap();
        assert!(timeline.signal(FenceValue::new(3)).is_err());
        assert!(timeline.signal(FenceValue::new(2)).is_err());
    }

    #[test]
    fn test_wait_unblocked_by_other_thread() {
        let timeline = Arc::new(SoftwareTimeline::manual(Duration::from_secs(5)));
        let mut fence = FenceManager::new();
        let value = fence.signal(timeline.as_ref()).unwrap();

        let gpu = {
            let timeline = Arc::clone(&timeline);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                timeline.retire_all().unwrap();
            })
        };

        fence.wait(timeline.as_ref(), value).unwrap();
        assert_eq!(timeline.completed_value(), value);
        gpu.join().unwrap();
    }
}
