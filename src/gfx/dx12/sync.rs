//! D3D12 fence 时间线
//!
//! 一个 `ID3D12Fence` 加一个 Win32 事件。命令队列在执行到 signal 时
//! 把 fence 的完成值设为对应的值；CPU 通过事件阻塞等待。

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use crate::core::error::{DxCoreError, GraphicsError, Result};
use crate::renderer::sync::{FenceValue, GpuTimeline};

pub struct Dx12Fence {
    fence: ID3D12Fence,
    queue: ID3D12CommandQueue,
    event: HANDLE,
}

impl Dx12Fence {
    pub fn new(device: &ID3D12Device, queue: &ID3D12CommandQueue) -> Result<Self> {
        unsafe {
            let fence: ID3D12Fence = device.CreateFence(0, D3D12_FENCE_FLAG_NONE).map_err(|e| {
                DxCoreError::Graphics(GraphicsError::Synchronization(format!(
                    "Failed to create fence: {:?}",
                    e
                )))
            })?;

            let event = CreateEventA(None, false, false, None).map_err(|e| {
                DxCoreError::Graphics(GraphicsError::Synchronization(format!(
                    "Failed to create fence event: {:?}",
                    e
                )))
            })?;

            Ok(Self {
                fence,
                queue: queue.clone(),
                event,
            })
        }
    }

    pub fn fence(&self) -> &ID3D12Fence {
        &self.fence
    }
}

impl GpuTimeline for Dx12Fence {
    fn signal(&self, value: FenceValue) -> Result<()> {
        unsafe { self.queue.Signal(&self.fence, value.value()) }.map_err(|e| {
            GraphicsError::Synchronization(format!(
                "Failed to signal fence value {}: {:?}",
                value.value(),
                e
            ))
            .into()
        })
    }

    fn completed_value(&self) -> FenceValue {
        FenceValue::new(unsafe { self.fence.GetCompletedValue() })
    }

    fn wait_for(&self, value: FenceValue) -> Result<()> {
        if self.completed_value() >= value {
            return Ok(());
        }

        unsafe {
            self.fence
                .SetEventOnCompletion(value.value(), self.event)
                .map_err(|e| {
                    DxCoreError::Graphics(GraphicsError::Synchronization(format!(
                        "Failed to set fence event: {:?}",
                        e
                    )))
                })?;

            if WaitForSingleObject(self.event, INFINITE) != WAIT_OBJECT_0 {
                return Err(GraphicsError::Synchronization(format!(
                    "Waiting for fence value {} failed",
                    value.value()
                ))
                .into());
            }
        }
        Ok(())
    }
}

impl Drop for Dx12Fence {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.event);
        }
    }
}
