//! 交换链管理
//!
//! N 个 flip-discard 后台缓冲区，存储格式 `R8G8B8A8_UNORM`，
//! RTV 以 `R8G8B8A8_UNORM_SRGB` 格式创建在 N 槽 RTV 堆的第 i 个槽位上。
//! 每个后台缓冲区都带有 CPU 端的状态标签，空闲时全部处于 PRESENT。

use tracing::{debug, info, warn};

use crate::core::error::Result;
use crate::gfx::backend::{Backend, Device, SurfaceTarget, SwapChain, SwapChainDescriptor};
use crate::gfx::types::{Format, ResourceState};

use super::descriptor::{CpuDescriptorHandle, DescriptorHeap, DescriptorHeapDescriptor};
use super::state::TrackedResource;

/// 交换链缓冲区存储格式
pub const SWAP_CHAIN_FORMAT: Format = Format::Rgba8Unorm;

/// 渲染目标视图格式（写入时做 sRGB 编码）
pub const RENDER_TARGET_VIEW_FORMAT: Format = Format::Rgba8UnormSrgb;

pub struct SwapChainManager<B: Backend> {
    back_buffers: Vec<TrackedResource<B::Resource>>,
    rtv_heap: DescriptorHeap<B>,
    swap_chain: B::SwapChain,
    width: u32,
    height: u32,
}

impl<B: Backend> SwapChainManager<B> {
    /// 创建交换链、取得全部后台缓冲区并为每个缓冲区创建 RTV
    pub fn new(
        device: &B::Device,
        queue: &B::Queue,
        surface: &SurfaceTarget,
        buffer_count: u32,
    ) -> Result<Self> {
        let desc = SwapChainDescriptor {
            buffer_count,
            width: surface.width,
            height: surface.height,
            format: SWAP_CHAIN_FORMAT,
        };
        let swap_chain = device.create_swap_chain(queue, surface, &desc)?;
        let rtv_heap = DescriptorHeap::new(device, &DescriptorHeapDescriptor::rtv(buffer_count))?;

        let mut manager = Self {
            back_buffers: Vec::with_capacity(buffer_count as usize),
            rtv_heap,
            swap_chain,
            width: surface.width,
            height: surface.height,
        };
        manager.acquire_buffers(device)?;

        info!(
            width = surface.width,
            height = surface.height,
            buffers = buffer_count,
            "Swap chain created"
        );
        Ok(manager)
    }

    fn acquire_buffers(&mut self, device: &B::Device) -> Result<()> {
        self.back_buffers.clear();
        for i in 0..self.swap_chain.buffer_count() {
            let buffer = self.swap_chain.buffer(i)?;
            device.create_render_target_view(&buffer, RENDER_TARGET_VIEW_FORMAT, self.rtv_heap.cpu_handle(i));
            self.back_buffers.push(TrackedResource::new(buffer, ResourceState::Present));
        }
        Ok(())
    }

    pub fn current_back_buffer_index(&self) -> u32 {
        self.swap_chain.current_back_buffer_index()
    }

    pub fn back_buffer_mut(&mut self, index: u32) -> &mut TrackedResource<B::Resource> {
        &mut self.back_buffers[index as usize]
    }

    /// 每个后台缓冲区的 CPU 端状态
    pub fn back_buffer_states(&self) -> Vec<ResourceState> {
        self.back_buffers.iter().map(TrackedResource::state).collect()
    }

    pub fn rtv(&self, index: u32) -> CpuDescriptorHandle {
        self.rtv_heap.cpu_handle(index)
    }

    pub fn present(&self, sync_interval: u32) -> Result<()> {
        self.swap_chain.present(sync_interval)
    }

    /// 调整缓冲区尺寸并在原槽位上重建 RTV
    ///
    /// 调用方必须先排空 GPU。
    pub fn resize(&mut self, device: &B::Device, width: u32, height: u32) -> Result<()> {
        assert!(
            self.back_buffers.iter().all(|b| b.state() == ResourceState::Present),
            "resizing swap chain while a back buffer is not in the PRESENT state"
        );

        // ResizeBuffers 要求先释放全部后台缓冲区引用
        self.back_buffers.clear();
        if let Err(e) = self.swap_chain.resize_buffers(width, height) {
            // 交换链保持原尺寸，重新取回旧缓冲区
            warn!(error = %e, width, height, "Swap chain resize failed, keeping current buffers");
            self.acquire_buffers(device)?;
            return Err(e);
        }
        self.width = width;
        self.height = height;
        self.acquire_buffers(device)?;

        debug!(width, height, "Swap chain buffers resized");
        Ok(())
    }

    /// 是否持有全部后台缓冲区，为假时不能开始新的一帧
    pub fn is_complete(&self) -> bool {
        self.back_buffers.len() == self.swap_chain.buffer_count() as usize
    }

    pub fn buffer_count(&self) -> u32 {
        self.swap_chain.buffer_count()
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn raw(&self) -> &B::SwapChain {
        &self.swap_chain
    }
}
