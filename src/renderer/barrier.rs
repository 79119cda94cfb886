//! 资源状态跟踪与屏障批处理
//!
//! 每个 GPU 资源在任何时刻都处于一个已知状态。使用方式改变时
//! 必须先记录一个状态转换屏障，否则调试层会报错，或者在驱动层产生数据竞争。
//!
//! `ResourceStateTracker` 记录每个已注册资源的当前状态，
//! 在 `transition` 时生成屏障，并在 `flush` 时一次性交给命令列表。
//! 同一资源连续的转换会被合并，来回转换会被消掉。

use std::collections::HashMap;

use bitflags::bitflags;

use crate::core::error::{GraphicsError, Result};

bitflags! {
    /// 资源状态，数值与 `D3D12_RESOURCE_STATES` 一致
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const UNORDERED_ACCESS = 0x8;
        const DEPTH_WRITE = 0x10;
        const DEPTH_READ = 0x20;
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        const PIXEL_SHADER_RESOURCE = 0x80;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        const RESOLVE_DEST = 0x1000;
        const RESOLVE_SOURCE = 0x2000;

        const ALL_SHADER_RESOURCE = Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits();
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits()
            | Self::INDIRECT_ARGUMENT.bits()
            | Self::COPY_SOURCE.bits();
    }
}

impl ResourceState {
    /// 交换链 Present 状态（与 COMMON 相同）
    pub const PRESENT: ResourceState = ResourceState::COMMON;

    /// 只能单独出现的写状态
    pub const WRITE_STATES: ResourceState = ResourceState::RENDER_TARGET
        .union(ResourceState::UNORDERED_ACCESS)
        .union(ResourceState::DEPTH_WRITE)
        .union(ResourceState::COPY_DEST)
        .union(ResourceState::RESOLVE_DEST);

    /// 是否包含写状态
    pub fn is_write(&self) -> bool {
        self.intersects(Self::WRITE_STATES)
    }

    /// 校验状态组合
    ///
    /// 写状态不能与任何其他位组合，读状态之间可以任意组合。
    pub fn validate(&self) -> Result<()> {
        if self.is_write() && self.bits().count_ones() > 1 {
            return Err(GraphicsError::InvalidStateTransition(format!(
                "write state {:?} cannot be combined with other states",
                self
            ))
            .into());
        }
        Ok(())
    }
}

/// 跟踪中的资源标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// 一个待提交的屏障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    /// 状态转换
    Transition {
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    },
    /// 两次 UAV 访问之间的依赖
    Uav { resource: ResourceId },
}

impl Barrier {
    pub fn resource(&self) -> ResourceId {
        match self {
            Barrier::Transition { resource, .. } | Barrier::Uav { resource } => *resource,
        }
    }
}

/// 资源状态跟踪器
#[derive(Debug, Default)]
pub struct ResourceStateTracker {
    states: HashMap<ResourceId, ResourceState>,
    pending: Vec<Barrier>,
    next_id: u64,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册资源及其创建时的状态
    pub fn register(&mut self, initial: ResourceState) -> Result<ResourceId> {
        initial.validate()?;
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        self.states.insert(id, initial);
        Ok(id)
    }

    /// 取消跟踪，同时丢弃该资源尚未提交的屏障
    pub fn unregister(&mut self, id: ResourceId) -> Option<ResourceState> {
        self.pending.retain(|b| b.resource() != id);
        self.states.remove(&id)
    }

    /// 资源的当前（已记录）状态
    pub fn state(&self, id: ResourceId) -> Option<ResourceState> {
        self.states.get(&id).copied()
    }

    pub fn tracked_count(&self) -> usize {
        self.states.len()
    }

    /// 把资源转换到 `after` 状态
    ///
    /// - 状态相同：UAV 生成 UAV 屏障，其他状态不做任何事
    /// - 状态不同：生成转换屏障；若该资源上一条待提交屏障也是转换，则合并
    /// - 合并后回到原状态：屏障消失，UAV 则留下一个 UAV 屏障
    pub fn transition(&mut self, id: ResourceId, after: ResourceState) -> Result<()> {
        after.validate()?;

        let before = self.states.get(&id).copied().ok_or_else(|| {
            GraphicsError::InvalidStateTransition(format!(
                "resource {} is not tracked",
                id.raw()
            ))
        })?;

        if before == after {
            if after == ResourceState::UNORDERED_ACCESS {
                self.pending.push(Barrier::Uav { resource: id });
            }
            return Ok(());
        }

        self.states.insert(id, after);

        let last = self.pending.iter().rposition(|b| b.resource() == id);
        if let Some(index) = last {
            if let Barrier::Transition { before: original, .. } = self.pending[index] {
                if original == after {
                    // UAV 往返之间仍需同步两次写入
                    if after.contains(ResourceState::UNORDERED_ACCESS) {
                        self.pending[index] = Barrier::Uav { resource: id };
                    } else {
                        self.pending.remove(index);
                    }
                } else {
                    self.pending[index] = Barrier::Transition {
                        resource: id,
                        before: original,
                        after,
                    };
                }
                return Ok(());
            }
        }

        self.pending.push(Barrier::Transition {
            resource: id,
            before,
            after,
        });
        Ok(())
    }

    /// 强制设置状态而不生成屏障
    ///
    /// 用于状态在跟踪器之外改变的情况，例如交换链缓冲在 Present 后回到 PRESENT。
    pub fn assume_state(&mut self, id: ResourceId, state: ResourceState) -> Result<()> {
        state.validate()?;
        match self.states.get_mut(&id) {
            Some(current) => {
                *current = state;
                Ok(())
            }
            None => Err(GraphicsError::InvalidStateTransition(format!(
                "resource {} is not tracked",
                id.raw()
            ))
            .into()),
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> &[Barrier] {
        &self.pending
    }

    /// 取出所有待提交屏障，保持记录顺序
    pub fn flush(&mut self) -> Vec<Barrier> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_values_match_d3d12() {
        assert_eq!(ResourceState::GENERIC_READ.bits(), 0xAC3);
        assert_eq!(ResourceState::PRESENT.bits(), 0);
        assert_eq!(ResourceState::ALL_SHADER_RESOURCE.bits(), 0xC0);
    }

    #[test]
    fn test_validate_write_combinations() {
        assert!(ResourceState::GENERIC_READ.validate().is_ok());
        assert!(ResourceState::DEPTH_READ
            .union(ResourceState::PIXEL_SHADER_RESOURCE)
            .validate()
            .is_ok());
        assert!(ResourceState::RENDER_TARGET.validate().is_ok());
        assert!(ResourceState::RENDER_TARGET
            .union(ResourceState::PIXEL_SHADER_RESOURCE)
            .validate()
            .is_err());
        assert!(ResourceState::COPY_DEST
            .union(ResourceState::COPY_SOURCE)
            .validate()
            .is_err());
    }

    #[test]
    fn test_transition_generates_barrier() {
        let mut tracker = ResourceStateTracker::new();
        let rt = tracker.register(ResourceState::PRESENT).unwrap();

        tracker.transition(rt, ResourceState::RENDER_TARGET).unwrap();
        assert_eq!(tracker.state(rt), Some(ResourceState::RENDER_TARGET));

        let barriers = tracker.flush();
        assert_eq!(
            barriers,
            vec![Barrier::Transition {
                resource: rt,
                before: ResourceState::PRESENT,
                after: ResourceState::RENDER_TARGET,
            }]
        );
        assert!(!tracker.has_pending());
    }

    #[test]
    fn test_same_state_is_noop_except_uav() {
        let mut tracker = ResourceStateTracker::new();
        let buffer = tracker.register(ResourceState::GENERIC_READ).unwrap();
        let rw = tracker.register(ResourceState::UNORDERED_ACCESS).unwrap();

        tracker.transition(buffer, ResourceState::GENERIC_READ).unwrap();
        assert!(!tracker.has_pending());

        tracker.transition(rw, ResourceState::UNORDERED_ACCESS).unwrap();
        assert_eq!(tracker.flush(), vec![Barrier::Uav { resource: rw }]);
    }

    #[test]
    fn test_consecutive_transitions_collapse() {
        let mut tracker = ResourceStateTracker::new();
        let tex = tracker.register(ResourceState::COPY_DEST).unwrap();
        let other = tracker.register(ResourceState::COMMON).unwrap();

        tracker.transition(tex, ResourceState::PIXEL_SHADER_RESOURCE).unwrap();
        tracker.transition(other, ResourceState::COPY_SOURCE).unwrap();
        tracker.transition(tex, ResourceState::RENDER_TARGET).unwrap();

        let barriers = tracker.flush();
        assert_eq!(barriers.len(), 2);
        assert_eq!(
            barriers[0],
            Barrier::Transition {
                resource: tex,
                before: ResourceState::COPY_DEST,
                after: ResourceState::RENDER_TARGET,
            }
        );
        assert_eq!(barriers[1].resource(), other);
    }

    #[test]
    fn test_round_trip_cancels() {
        let mut tracker = ResourceStateTracker::new();
        let tex = tracker.register(ResourceState::PIXEL_SHADER_RESOURCE).unwrap();

        tracker.transition(tex, ResourceState::RENDER_TARGET).unwrap();
        tracker.transition(tex, ResourceState::PIXEL_SHADER_RESOURCE).unwrap();

        assert!(tracker.flush().is_empty());
        assert_eq!(tracker.state(tex), Some(ResourceState::PIXEL_SHADER_RESOURCE));
    }

    #[test]
    fn test_uav_round_trip_keeps_uav_barrier() {
        let mut tracker = ResourceStateTracker::new();
        let rw = tracker.register(ResourceState::UNORDERED_ACCESS).unwrap();

        tracker.transition(rw, ResourceState::NON_PIXEL_SHADER_RESOURCE).unwrap();
        tracker.transition(rw, ResourceState::UNORDERED_ACCESS).unwrap();

        assert_eq!(tracker.flush(), vec![Barrier::Uav { resource: rw }]);
        assert_eq!(tracker.state(rw), Some(ResourceState::UNORDERED_ACCESS));
    }

    #[test]
    fn test_uav_barrier_blocks_collapse() {
        let mut tracker = ResourceStateTracker::new();
        let rw = tracker.register(ResourceState::UNORDERED_ACCESS).unwrap();

        tracker.transition(rw, ResourceState::UNORDERED_ACCESS).unwrap();
        tracker.transition(rw, ResourceState::NON_PIXEL_SHADER_RESOURCE).unwrap();

        let barriers = tracker.flush();
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0], Barrier::Uav { resource: rw });
    }

    #[test]
    fn test_untracked_and_invalid() {
        let mut tracker = ResourceStateTracker::new();
        let id = tracker.register(ResourceState::COMMON).unwrap();

        let bad = ResourceState::RENDER_TARGET | ResourceState::DEPTH_READ;
        assert!(tracker.transition(id, bad).is_err());
        assert!(tracker.register(bad).is_err());

        tracker.transition(id, ResourceState::COPY_DEST).unwrap();
        assert_eq!(tracker.unregister(id), Some(ResourceState::COPY_DEST));
        assert!(!tracker.has_pending());
        assert!(tracker.transition(id, ResourceState::COMMON).is_err());
    }

    #[test]
    fn test_assume_state() {
        let mut tracker = ResourceStateTracker::new();
        let id = tracker.register(ResourceState::RENDER_TARGET).unwrap();
        tracker.assume_state(id, ResourceState::PRESENT).unwrap();
        assert_eq!(tracker.state(id), Some(ResourceState::PRESENT));
        assert!(!tracker.has_pending());
    }
}
