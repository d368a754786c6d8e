//! 深度缓冲

use tracing::debug;

use crate::core::error::Result;
use crate::gfx::backend::{Backend, Device};
use crate::gfx::types::ResourceState;

use super::descriptor::{CpuDescriptorHandle, DescriptorHeap, DescriptorHeapDescriptor};
use super::resource::{create_depth_stencil_texture_resource, DEPTH_FORMAT};
use super::state::TrackedResource;

/// 一张深度模板纹理和它在单槽 DSV 堆中的视图
pub struct DepthTarget<B: Backend> {
    resource: TrackedResource<B::Resource>,
    dsv_heap: DescriptorHeap<B>,
}

impl<B: Backend> DepthTarget<B> {
    pub fn new(device: &B::Device, width: u32, height: u32) -> Result<Self> {
        let dsv_heap = DescriptorHeap::new(device, &DescriptorHeapDescriptor::dsv(1))?;
        let resource = Self::create_resource(device, &dsv_heap, width, height)?;
        Ok(Self { resource, dsv_heap })
    }

    fn create_resource(
        device: &B::Device,
        dsv_heap: &DescriptorHeap<B>,
        width: u32,
        height: u32,
    ) -> Result<TrackedResource<B::Resource>> {
        let resource = create_depth_stencil_texture_resource::<B>(device, width, height)?;
        device.create_depth_stencil_view(&resource, DEPTH_FORMAT, dsv_heap.cpu_handle(0));
        debug!(width, height, "Depth buffer created");
        Ok(TrackedResource::new(resource, ResourceState::DepthWrite))
    }

    /// 以新尺寸重建深度纹理，DSV 留在原槽位
    pub fn resize(&mut self, device: &B::Device, width: u32, height: u32) -> Result<()> {
        self.resource = Self::create_resource(device, &self.dsv_heap, width, height)?;
        Ok(())
    }

    pub fn dsv(&self) -> CpuDescriptorHandle {
        self.dsv_heap.cpu_handle(0)
    }

    pub fn resource(&self) -> &B::Resource {
        self.resource.resource()
    }
}
