//! DirectX 12 资源、描述符堆与栅栏

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_ABANDONED, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{Fence, RawDescriptorHeap, Resource};
use crate::gfx::types::{HeapType, ResourceDescriptor};
use crate::renderer::descriptor::{CpuDescriptorHandle, GpuDescriptorHandle};

use super::conv;

/// 提交资源
#[derive(Clone)]
pub struct Dx12Resource {
    pub(super) raw: ID3D12Resource,
    desc: Arc<ResourceDescriptor>,
}

impl Dx12Resource {
    pub(super) fn new(raw: ID3D12Resource, desc: ResourceDescriptor) -> Self {
        Self { raw, desc: Arc::new(desc) }
    }

    pub fn raw(&self) -> &ID3D12Resource {
        &self.raw
    }
}

impl fmt::Debug for Dx12Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dx12Resource").field("name", &self.desc.name).finish()
    }
}

impl Resource for Dx12Resource {
    fn desc(&self) -> &ResourceDescriptor {
        &self.desc
    }

    fn gpu_virtual_address(&self) -> u64 {
        unsafe { self.raw.GetGPUVirtualAddress() }
    }

    unsafe fn map(&self) -> Result<NonNull<u8>> {
        if self.desc.heap != HeapType::Upload {
            return Err(GraphicsError::ResourceCreation(format!(
                "Resource '{}' is not in an upload heap and cannot be mapped",
                self.desc.name
            ))
            .into());
        }

        let mut data: *mut c_void = std::ptr::null_mut();
        self.raw
            .Map(0, None, Some(&mut data))
            .map_err(conv::map_err("Failed to map resource", GraphicsError::ResourceCreation))?;
        NonNull::new(data.cast::<u8>()).ok_or_else(|| {
            GraphicsError::ResourceCreation(format!("Map returned null for '{}'", self.desc.name)).into()
        })
    }

    fn unmap(&self) {
        unsafe { self.raw.Unmap(0, None) };
    }
}

/// 描述符堆
pub struct Dx12DescriptorHeap {
    pub(super) raw: ID3D12DescriptorHeap,
    cpu_start: usize,
    gpu_start: Option<u64>,
}

impl Dx12DescriptorHeap {
    pub(super) fn new(raw: ID3D12DescriptorHeap, shader_visible: bool) -> Self {
        let cpu_start = unsafe { raw.GetCPUDescriptorHandleForHeapStart() }.ptr;
        let gpu_start = shader_visible.then(|| unsafe { raw.GetGPUDescriptorHandleForHeapStart() }.ptr);
        Self { raw, cpu_start, gpu_start }
    }
}

impl fmt::Debug for Dx12DescriptorHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dx12DescriptorHeap")
            .field("cpu_start", &format_args!("{:#x}", self.cpu_start))
            .field("gpu_start", &self.gpu_start)
            .finish()
    }
}

impl RawDescriptorHeap for Dx12DescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptorHandle {
        CpuDescriptorHandle::new(self.cpu_start)
    }

    fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.gpu_start.map(GpuDescriptorHandle::new)
    }
}

/// 栅栏及其等待事件
pub struct Dx12Fence {
    pub(super) raw: ID3D12Fence,
    event: HANDLE,
}

impl Dx12Fence {
    pub(super) fn new(raw: ID3D12Fence) -> Result<Self> {
        let event = unsafe { CreateEventA(None, false, false, None) }
            .map_err(conv::map_err("Failed to create fence event", GraphicsError::ResourceCreation))?;
        Ok(Self { raw, event })
    }
}

impl Fence for Dx12Fence {
    fn completed_value(&self) -> u64 {
        unsafe { self.raw.GetCompletedValue() }
    }

    fn wait_for_value(&self, value: u64, timeout: Option<Duration>) -> Result<bool> {
        if self.completed_value() >= value {
            return Ok(true);
        }

        unsafe {
            self.raw
                .SetEventOnCompletion(value, self.event)
                .map_err(conv::map_err("Failed to set fence event", GraphicsError::CommandExecution))?;

            let millis = timeout.map_or(INFINITE, |t| t.as_millis().min(u128::from(INFINITE - 1)) as u32);
            let status = WaitForSingleObject(self.event, millis);
            if status == WAIT_OBJECT_0 {
                Ok(true)
            } else if status == WAIT_TIMEOUT {
                Ok(self.completed_value() >= value)
            } else if status == WAIT_ABANDONED || status == WAIT_FAILED {
                Err(GraphicsError::DeviceLost(format!("Waiting for fence value {} failed", value)).into())
            } else {
                Ok(self.completed_value() >= value)
            }
        }
    }
}

impl Drop for Dx12Fence {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.event);
        }
    }
}
