//! 资源屏障的 D3D12 表示
//!
//! 生成的 `D3D12_RESOURCE_BARRIER` 不持有资源的引用计数，
//! 资源必须活到 `ResourceBarrier` 调用之后。

use std::mem::ManuallyDrop;

use windows::Win32::Graphics::Direct3D12::*;

use crate::renderer::barrier::{Barrier, ResourceState};

pub fn d3d12_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    D3D12_RESOURCE_STATES(state.bits() as i32)
}

pub fn transition_barrier(
    resource: &ID3D12Resource,
    before: ResourceState,
    after: ResourceState,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: d3d12_state(before),
                StateAfter: d3d12_state(after),
            }),
        },
    }
}

pub fn uav_barrier(resource: &ID3D12Resource) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
            }),
        },
    }
}

/// 把跟踪器产生的屏障翻译成 D3D12 结构
pub fn to_d3d12(barrier: &Barrier, resource: &ID3D12Resource) -> D3D12_RESOURCE_BARRIER {
    match *barrier {
        Barrier::Transition { before, after, .. } => transition_barrier(resource, before, after),
        Barrier::Uav { .. } => uav_barrier(resource),
    }
}
