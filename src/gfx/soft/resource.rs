//! 软件后端的资源、描述符堆和栅栏

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{Fence, RawDescriptorHeap, Resource};
use crate::gfx::types::{
    mip_extent, HeapType, ResourceDescriptor, ResourceDimension, ResourceState, SubresourceFootprint,
};
use crate::renderer::descriptor::{CpuDescriptorHandle, GpuDescriptorHandle};

use super::gpu::{lock, FenceInner};

struct ResourceInner {
    id: u64,
    desc: ResourceDescriptor,
    /// GPU 时间线上资源的实际状态，用于验证屏障
    gpu_state: Mutex<ResourceState>,
    data: Mutex<Vec<u8>>,
    mapped: AtomicBool,
}

/// 以字节数组模拟的 GPU 资源
#[derive(Clone)]
pub struct SoftResource {
    inner: Arc<ResourceInner>,
}

impl SoftResource {
    pub(crate) fn new(id: u64, desc: ResourceDescriptor) -> Self {
        let size = desc.byte_size() as usize;
        Self {
            inner: Arc::new(ResourceInner {
                id,
                gpu_state: Mutex::new(desc.initial_state),
                desc,
                data: Mutex::new(vec![0; size]),
                mapped: AtomicBool::new(false),
            }),
        }
    }

    /// GPU 时间线上资源当前的状态
    pub fn gpu_state(&self) -> ResourceState {
        *lock(&self.inner.gpu_state)
    }

    pub(crate) fn set_gpu_state(&self, state: ResourceState) {
        *lock(&self.inner.gpu_state) = state;
    }

    pub(crate) fn downgrade(&self) -> WeakSoftResource {
        WeakSoftResource(Arc::downgrade(&self.inner))
    }

    pub(crate) fn desc_name(&self) -> &str {
        &self.inner.desc.name
    }

    /// 除了本句柄之外是否还有别的引用
    pub(crate) fn is_shared(&self) -> bool {
        Arc::strong_count(&self.inner) > 1
    }

    /// 读回一个子资源的内容（紧密排列）；缓冲区只有子资源 0
    pub fn read_subresource(&self, mip: u32) -> Vec<u8> {
        let (offset, len) = self.subresource_range(mip);
        lock(&self.inner.data)[offset..offset + len].to_vec()
    }

    /// 按子资源大小重复写入 `pattern`
    pub(crate) fn fill_mip(&self, mip: u32, pattern: &[u8]) {
        let (offset, len) = self.subresource_range(mip);
        let mut data = lock(&self.inner.data);
        for chunk in data[offset..offset + len].chunks_mut(pattern.len()) {
            chunk.copy_from_slice(&pattern[..chunk.len()]);
        }
    }

    /// 按 `footprint` 从上传缓冲区复制一个 mip
    pub(crate) fn copy_from_footprint(&self, mip: u32, src: &SoftResource, footprint: &SubresourceFootprint) {
        let (offset, _) = self.subresource_range(mip);
        let row_bytes = (footprint.width * footprint.format.bytes_per_pixel()) as usize;
        let src_data = lock(&src.inner.data).clone();
        let mut dst_data = lock(&self.inner.data);

        for row in 0..footprint.height as usize {
            let src_start = footprint.offset as usize + row * footprint.row_pitch as usize;
            let dst_start = offset + row * row_bytes;
            dst_data[dst_start..dst_start + row_bytes]
                .copy_from_slice(&src_data[src_start..src_start + row_bytes]);
        }
    }

    fn subresource_range(&self, mip: u32) -> (usize, usize) {
        match self.inner.desc.dimension {
            ResourceDimension::Buffer { size } => (0, size as usize),
            ResourceDimension::Texture2D { width, height, format, .. } => {
                let bpp = format.bytes_per_pixel() as usize;
                let offset = (0..mip)
                    .map(|m| {
                        let (w, h) = mip_extent(width, height, m);
                        w as usize * h as usize * bpp
                    })
                    .sum();
                let (w, h) = mip_extent(width, height, mip);
                (offset, w as usize * h as usize * bpp)
            }
        }
    }
}

/// 不延长资源生命周期的引用，描述符视图用它指向资源
#[derive(Clone)]
pub(crate) struct WeakSoftResource(Weak<ResourceInner>);

impl WeakSoftResource {
    pub fn upgrade(&self) -> Option<SoftResource> {
        self.0.upgrade().map(|inner| SoftResource { inner })
    }
}

impl fmt::Debug for SoftResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftResource")
            .field("id", &self.inner.id)
            .field("name", &self.inner.desc.name)
            .finish()
    }
}

impl Resource for SoftResource {
    fn desc(&self) -> &ResourceDescriptor {
        &self.inner.desc
    }

    fn gpu_virtual_address(&self) -> u64 {
        self.inner.id << 32
    }

    unsafe fn map(&self) -> Result<NonNull<u8>> {
        if self.inner.desc.heap != HeapType::Upload {
            return Err(GraphicsError::ResourceCreation(format!(
                "Resource '{}' is not on an upload heap and cannot be mapped",
                self.inner.desc.name
            ))
            .into());
        }

        self.inner.mapped.store(true, Ordering::Release);
        // 存储在创建后不再改变长度，指针在资源存活期间一直有效
        let ptr = lock(&self.inner.data).as_mut_ptr();
        NonNull::new(ptr).ok_or_else(|| {
            GraphicsError::ResourceCreation("Mapped a zero-sized resource".to_string()).into()
        })
    }

    fn unmap(&self) {
        self.inner.mapped.store(false, Ordering::Release);
    }
}

/// 软件描述符堆：一段虚拟地址
#[derive(Debug)]
pub struct SoftDescriptorHeap {
    pub(crate) cpu_start: usize,
    pub(crate) gpu_start: Option<u64>,
}

impl RawDescriptorHeap for SoftDescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptorHandle {
        CpuDescriptorHandle::new(self.cpu_start)
    }

    fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.gpu_start.map(GpuDescriptorHandle::new)
    }
}

/// 软件栅栏
#[derive(Clone)]
pub struct SoftFence {
    pub(crate) inner: Arc<FenceInner>,
}

impl Fence for SoftFence {
    fn completed_value(&self) -> u64 {
        self.inner.completed()
    }

    fn wait_for_value(&self, value: u64, timeout: Option<Duration>) -> Result<bool> {
        Ok(self.inner.wait(value, timeout))
    }
}
