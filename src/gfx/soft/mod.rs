//! 软件参考后端
//!
//! 在进程内模拟一块 GPU：资源是字节数组，队列按提交顺序执行录制的命令
//! （屏障、清除、缓冲区到纹理的复制），栅栏用条件变量实现。
//! 绘制调用不做光栅化，只检查根签名、管线、根参数和顶点缓冲区的绑定。
//!
//! 它有两个用途：
//!
//! - 在没有 DirectX 12 的平台上无窗口运行整个帧生命周期
//! - 作为测试里的 GPU：`Manual` 模式可以让 GPU “卡住”，
//!   验证错误（屏障 before 状态不符、呈现非 PRESENT 状态的缓冲区、
//!   GPU 未完成时重置分配器、绑定不全的绘制）可以通过 [`SoftGpuControl`] 读出

mod command;
mod gpu;
mod pipeline;
mod resource;
mod swapchain;

use std::sync::Arc;

use tracing::{debug, info};

pub use command::{SoftCommandAllocator, SoftCommandList, SoftQueue};
pub use gpu::{ExecutionMode, SoftGpuControl};
pub use pipeline::{SoftPipelineState, SoftRootSignature};
pub use resource::{SoftDescriptorHeap, SoftFence, SoftResource};
pub use swapchain::SoftSwapChain;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::adapter::{self, AdapterInfo, FeatureLevel};
use crate::gfx::backend::{Backend, Device, Resource, SurfaceTarget, SwapChainDescriptor};
use crate::gfx::types::{
    Format, GraphicsPipelineDescriptor, ResourceDescriptor, ResourceDimension, RootParameter, RootSignatureDescriptor,
};
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeapDescriptor, DescriptorType};

use gpu::{AllocatorInner, FenceInner, SoftGpu, SoftView, SHADER_VISIBLE_BASE};
use pipeline::{PipelineInner, RootSignatureInner};

/// 软件后端
pub struct Soft;

impl Backend for Soft {
    const NAME: &'static str = "Software";

    type Device = SoftDevice;
    type Queue = SoftQueue;
    type CommandAllocator = SoftCommandAllocator;
    type CommandList = SoftCommandList;
    type SwapChain = SoftSwapChain;
    type Resource = SoftResource;
    type DescriptorHeap = SoftDescriptorHeap;
    type Fence = SoftFence;
    type RootSignature = SoftRootSignature;
    type PipelineState = SoftPipelineState;
}

/// 模拟的适配器环境
#[derive(Debug, Clone)]
pub struct SoftDeviceDescriptor {
    /// 按性能降序排列的适配器
    pub adapters: Vec<AdapterInfo>,
    /// 选中的适配器支持的最高特性等级，`None` 表示都不支持
    pub max_feature_level: Option<FeatureLevel>,
    pub execution: ExecutionMode,
}

impl Default for SoftDeviceDescriptor {
    fn default() -> Self {
        Self {
            adapters: vec![AdapterInfo {
                name: "Lucent Software Rasterizer".to_string(),
                dedicated_video_memory: 256 * 1024 * 1024,
                is_software: false,
            }],
            max_feature_level: Some(FeatureLevel::Level12_2),
            execution: ExecutionMode::Immediate,
        }
    }
}

/// 软件设备
#[derive(Debug)]
pub struct SoftDevice {
    gpu: Arc<SoftGpu>,
    adapter: AdapterInfo,
    feature_level: FeatureLevel,
}

impl SoftDevice {
    /// 按适配器选择规则创建设备
    pub fn new(desc: &SoftDeviceDescriptor) -> Result<Self> {
        let index = adapter::select_adapter(&desc.adapters).ok_or_else(|| {
            GraphicsError::DeviceCreation("No hardware adapter found".to_string())
        })?;

        let (gpu, feature_level) = adapter::create_with_feature_level(|level| {
            let supported = desc.max_feature_level.is_some_and(|max| level <= max);
            supported.then(|| Arc::new(SoftGpu::new(desc.execution)))
        })?;

        Ok(Self {
            gpu,
            adapter: desc.adapters[index].clone(),
            feature_level,
        })
    }

    /// 默认适配器、立即执行
    pub fn headless() -> Self {
        Self::with_mode(ExecutionMode::Immediate)
    }

    /// 默认适配器、指定执行方式
    pub fn with_mode(execution: ExecutionMode) -> Self {
        let desc = SoftDeviceDescriptor {
            execution,
            ..SoftDeviceDescriptor::default()
        };
        Self {
            gpu: Arc::new(SoftGpu::new(execution)),
            adapter: desc.adapters[0].clone(),
            feature_level: FeatureLevel::Level12_2,
        }
    }

    /// 控制 GPU 时间线的句柄
    pub fn control(&self) -> SoftGpuControl {
        SoftGpuControl { gpu: Arc::clone(&self.gpu) }
    }

    fn register_view(&self, resource: &SoftResource, format: Format, handle: CpuDescriptorHandle) {
        self.gpu.register_view(
            handle.ptr,
            SoftView {
                resource: resource.downgrade(),
                format,
            },
        );
    }
}

impl Device<Soft> for SoftDevice {
    fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    fn create_command_queue(&self) -> Result<SoftQueue> {
        Ok(SoftQueue { gpu: Arc::clone(&self.gpu) })
    }

    fn create_command_allocator(&self) -> Result<SoftCommandAllocator> {
        Ok(SoftCommandAllocator {
            inner: Arc::new(AllocatorInner::default()),
            gpu: Arc::clone(&self.gpu),
        })
    }

    fn create_command_list(&self, allocator: &SoftCommandAllocator) -> Result<SoftCommandList> {
        Ok(SoftCommandList::new(allocator))
    }

    fn create_swap_chain(
        &self,
        _queue: &SoftQueue,
        surface: &SurfaceTarget,
        desc: &SwapChainDescriptor,
    ) -> Result<SoftSwapChain> {
        if surface.width == 0 || surface.height == 0 {
            return Err(GraphicsError::SwapchainError(format!(
                "Surface size {}x{} is empty",
                surface.width, surface.height
            ))
            .into());
        }

        debug!(
            width = desc.width,
            height = desc.height,
            buffers = desc.buffer_count,
            "Soft swap chain created"
        );
        Ok(SoftSwapChain::new(Arc::clone(&self.gpu), *desc))
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDescriptor) -> Result<SoftDescriptorHeap> {
        let increment = self.descriptor_increment_size(desc.descriptor_type) as usize;
        let cpu_start = self
            .gpu
            .allocate_address_range(desc.num_descriptors as usize * increment);
        let gpu_start = desc.shader_visible.then(|| SHADER_VISIBLE_BASE + cpu_start as u64);

        Ok(SoftDescriptorHeap { cpu_start, gpu_start })
    }

    fn descriptor_increment_size(&self, ty: DescriptorType) -> u32 {
        match ty {
            DescriptorType::RenderTargetView => 32,
            DescriptorType::DepthStencilView => 8,
            DescriptorType::CbvSrvUav => 64,
            DescriptorType::Sampler => 16,
        }
    }

    fn create_committed_resource(&self, desc: &ResourceDescriptor) -> Result<SoftResource> {
        match desc.dimension {
            ResourceDimension::Buffer { size: 0 } => {
                return Err(GraphicsError::ResourceCreation(format!(
                    "Buffer '{}' has zero size",
                    desc.name
                ))
                .into());
            }
            ResourceDimension::Texture2D { width, height, mip_levels, format } => {
                if width == 0 || height == 0 || mip_levels == 0 {
                    return Err(GraphicsError::ResourceCreation(format!(
                        "Texture '{}' has empty extent {}x{} with {} mips",
                        desc.name, width, height, mip_levels
                    ))
                    .into());
                }
                if desc.allow_depth_stencil != format.is_depth() {
                    return Err(GraphicsError::ResourceCreation(format!(
                        "Texture '{}' depth-stencil flag does not match format {:?}",
                        desc.name, format
                    ))
                    .into());
                }
            }
            ResourceDimension::Buffer { .. } => {}
        }

        Ok(SoftResource::new(self.gpu.next_resource_id(), desc.clone()))
    }

    fn create_render_target_view(&self, resource: &SoftResource, format: Format, handle: CpuDescriptorHandle) {
        self.register_view(resource, format, handle);
    }

    fn create_depth_stencil_view(&self, resource: &SoftResource, format: Format, handle: CpuDescriptorHandle) {
        self.register_view(resource, format, handle);
    }

    fn create_shader_resource_view(&self, resource: &SoftResource, handle: CpuDescriptorHandle) {
        let format = match resource.desc().dimension {
            ResourceDimension::Texture2D { format, .. } => format,
            ResourceDimension::Buffer { .. } => Format::Unknown,
        };
        self.register_view(resource, format, handle);
    }

    fn create_fence(&self, initial_value: u64) -> Result<SoftFence> {
        Ok(SoftFence { inner: Arc::new(FenceInner::new(initial_value)) })
    }

    fn create_root_signature(&self, desc: &RootSignatureDescriptor) -> Result<SoftRootSignature> {
        for (index, parameter) in desc.parameters.iter().enumerate() {
            if let RootParameter::ShaderResourceTable { count: 0, .. } = parameter {
                return Err(GraphicsError::ResourceCreation(format!(
                    "Root signature '{}' parameter {} is an empty descriptor table",
                    desc.name, index
                ))
                .into());
            }
        }

        debug!(name = %desc.name, parameters = desc.parameters.len(), "Soft root signature created");
        Ok(SoftRootSignature {
            inner: Arc::new(RootSignatureInner {
                id: self.gpu.next_resource_id(),
                parameters: desc.parameters.clone(),
            }),
        })
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor<'_, SoftRootSignature>,
    ) -> Result<SoftPipelineState> {
        let fail = |reason: &str| -> crate::core::error::LucentError {
            GraphicsError::ResourceCreation(format!("Pipeline '{}': {}", desc.name, reason)).into()
        };
        if desc.vertex_shader.is_empty() || desc.pixel_shader.is_empty() {
            return Err(fail("missing shader bytecode"));
        }
        if desc.input_layout.is_empty() {
            return Err(fail("empty input layout"));
        }
        if !desc.depth_format.is_depth() || desc.render_target_format.is_depth() {
            return Err(fail("render target and depth formats are swapped or invalid"));
        }

        Ok(SoftPipelineState {
            inner: Arc::new(PipelineInner {
                root_signature_id: desc.root_signature.inner.id,
                vertex_stride: desc.vertex_stride(),
                name: desc.name.to_string(),
            }),
        })
    }

    /// 软件 GPU 不执行着色器，源码原样作为着色器代码，只检查入口点是否存在
    fn compile_shader(&self, source: &[u8], name: &str, entry: &str, profile: &str) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(source)
            .map_err(|_| GraphicsError::ShaderCompilation(format!("{} is not valid UTF-8", name)))?;
        if !(profile.starts_with("vs_") || profile.starts_with("ps_")) {
            return Err(GraphicsError::ShaderCompilation(format!("{}: unsupported profile {}", name, profile)).into());
        }
        if !text.contains(&format!(" {}(", entry)) {
            return Err(GraphicsError::ShaderCompilation(format!(
                "{} ({}): entry point '{}' not found",
                name, profile, entry
            ))
            .into());
        }
        Ok(source.to_vec())
    }
}

impl Drop for SoftDevice {
    fn drop(&mut self) {
        info!(adapter = %self.adapter.name, "Soft device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{CommandList, Queue, SwapChain};
    use crate::gfx::types::{HeapType, ResourceState, TransitionBarrier};

    #[test]
    fn test_device_creation_skips_software_adapters() {
        let desc = SoftDeviceDescriptor {
            adapters: vec![
                AdapterInfo { name: "WARP".into(), dedicated_video_memory: 0, is_software: true },
                AdapterInfo { name: "GPU".into(), dedicated_video_memory: 1 << 30, is_software: false },
            ],
            max_feature_level: Some(FeatureLevel::Level12_1),
            execution: ExecutionMode::Immediate,
        };

        let device = SoftDevice::new(&desc).unwrap();
        assert_eq!(device.adapter_info().name, "GPU");
        assert_eq!(device.feature_level(), FeatureLevel::Level12_1);
    }

    #[test]
    fn test_device_creation_fails_without_hardware_adapter() {
        let desc = SoftDeviceDescriptor {
            adapters: vec![AdapterInfo { name: "WARP".into(), dedicated_video_memory: 0, is_software: true }],
            ..SoftDeviceDescriptor::default()
        };
        assert!(SoftDevice::new(&desc).is_err());

        let desc = SoftDeviceDescriptor {
            max_feature_level: None,
            ..SoftDeviceDescriptor::default()
        };
        assert!(SoftDevice::new(&desc).is_err());
    }

    #[test]
    fn test_barrier_mismatch_is_reported() {
        let device = SoftDevice::headless();
        let queue = device.create_command_queue().unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let list = device.create_command_list(&allocator).unwrap();
        let resource = device
            .create_committed_resource(&ResourceDescriptor::upload_buffer(4, "buf"))
            .unwrap();

        list.resource_barrier(&[TransitionBarrier {
            resource: &resource,
            before: ResourceState::CopyDest,
            after: ResourceState::CopySource,
        }]);
        list.close().unwrap();
        queue.execute(&list);

        let errors = device.control().validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("declares before state"));
        assert_eq!(resource.gpu_state(), ResourceState::CopySource);
    }

    #[test]
    fn test_default_heap_cannot_be_mapped() {
        let device = SoftDevice::headless();
        let mut desc = ResourceDescriptor::upload_buffer(4, "gpu-only");
        desc.heap = HeapType::Default;
        let resource = device.create_committed_resource(&desc).unwrap();
        assert!(unsafe { resource.map() }.is_err());
    }

    #[test]
    fn test_resize_requires_released_buffers() {
        let device = SoftDevice::headless();
        let queue = device.create_command_queue().unwrap();
        let desc = SwapChainDescriptor { buffer_count: 2, width: 4, height: 4, format: Format::Rgba8Unorm };
        let swap_chain = device
            .create_swap_chain(&queue, &SurfaceTarget::headless(4, 4), &desc)
            .unwrap();

        let held = swap_chain.buffer(0).unwrap();
        assert!(swap_chain.resize_buffers(8, 8).is_err());

        drop(held);
        swap_chain.resize_buffers(8, 8).unwrap();
        assert_eq!(swap_chain.extent(), (8, 8));
        assert_eq!(swap_chain.current_back_buffer_index(), 0);
    }
}
