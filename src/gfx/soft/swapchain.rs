//! 软件交换链：N 个后台缓冲区组成的环

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{SwapChain, SwapChainDescriptor};
use crate::gfx::types::{HeapType, ResourceDescriptor, ResourceDimension, ResourceState};

use super::gpu::{lock, GpuWork, SoftGpu};
use super::resource::SoftResource;
use super::Soft;

struct Ring {
    buffers: Vec<SoftResource>,
    index: u32,
    width: u32,
    height: u32,
    presented: u64,
}

pub struct SoftSwapChain {
    gpu: Arc<SoftGpu>,
    desc: SwapChainDescriptor,
    ring: Mutex<Ring>,
}

impl SoftSwapChain {
    pub(crate) fn new(gpu: Arc<SoftGpu>, desc: SwapChainDescriptor) -> Self {
        let buffers = create_buffers(&gpu, &desc, desc.width, desc.height);
        Self {
            gpu,
            desc,
            ring: Mutex::new(Ring {
                buffers,
                index: 0,
                width: desc.width,
                height: desc.height,
                presented: 0,
            }),
        }
    }

    /// 已呈现的帧数
    pub fn presented_frames(&self) -> u64 {
        lock(&self.ring).presented
    }

    /// 当前缓冲区尺寸
    pub fn extent(&self) -> (u32, u32) {
        let ring = lock(&self.ring);
        (ring.width, ring.height)
    }
}

fn create_buffers(gpu: &SoftGpu, desc: &SwapChainDescriptor, width: u32, height: u32) -> Vec<SoftResource> {
    (0..desc.buffer_count)
        .map(|i| {
            SoftResource::new(
                gpu.next_resource_id(),
                ResourceDescriptor {
                    dimension: ResourceDimension::Texture2D {
                        width,
                        height,
                        mip_levels: 1,
                        format: desc.format,
                    },
                    heap: HeapType::Default,
                    initial_state: ResourceState::Present,
                    allow_depth_stencil: false,
                    clear_value: None,
                    name: format!("Back Buffer {}", i),
                },
            )
        })
        .collect()
}

impl SwapChain<Soft> for SoftSwapChain {
    fn buffer_count(&self) -> u32 {
        self.desc.buffer_count
    }

    fn buffer(&self, index: u32) -> Result<SoftResource> {
        lock(&self.ring)
            .buffers
            .get(index as usize)
            .cloned()
            .ok_or_else(|| {
                GraphicsError::SwapchainError(format!(
                    "Back buffer index {} out of range ({} buffers)",
                    index, self.desc.buffer_count
                ))
                .into()
            })
    }

    fn current_back_buffer_index(&self) -> u32 {
        lock(&self.ring).index
    }

    fn present(&self, _sync_interval: u32) -> Result<()> {
        if self.gpu.is_removed() {
            return Err(GraphicsError::DeviceLost("Device removed during present".to_string()).into());
        }

        let mut ring = lock(&self.ring);
        let buffer = ring.buffers[ring.index as usize].clone();
        self.gpu.submit(GpuWork::PresentCheck { buffer });
        ring.index = (ring.index + 1) % self.desc.buffer_count;
        ring.presented += 1;
        Ok(())
    }

    fn resize_buffers(&self, width: u32, height: u32) -> Result<()> {
        let mut ring = lock(&self.ring);
        if ring.buffers.iter().any(SoftResource::is_shared) {
            return Err(GraphicsError::SwapchainError(
                "ResizeBuffers called while back buffer references are still held".to_string(),
            )
            .into());
        }

        ring.buffers = create_buffers(&self.gpu, &self.desc, width, height);
        ring.index = 0;
        ring.width = width;
        ring.height = height;
        debug!(width, height, "Soft swap chain resized");
        Ok(())
    }
}
