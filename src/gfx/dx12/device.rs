//! DirectX 12 设备初始化
//!
//! # 初始化流程
//!
//! 1. 启用调试层（可选 GPU 侧验证）
//! 2. 创建 DXGI 工厂
//! 3. 按高性能优先枚举适配器，跳过软件适配器，依次尝试特性等级 12.2、12.1、12.0
//! 4. 调试层开启时配置信息队列：严重错误、错误、警告时中断，屏蔽 INFO 级别消息

use tracing::{debug, info, warn};
use windows::core::{Interface, HSTRING};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::adapter::{self, AdapterInfo, FeatureLevel};
use crate::gfx::backend::{Device, Resource, SurfaceTarget, SwapChainDescriptor};
use crate::gfx::types::{
    Format, GraphicsPipelineDescriptor, ResourceDescriptor, ResourceDimension, RootSignatureDescriptor,
};
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeapDescriptor, DescriptorType};

use super::command::{Dx12CommandAllocator, Dx12CommandList, Dx12Queue};
use super::conv;
use super::pipeline::{self, Dx12PipelineState, Dx12RootSignature};
use super::resource::{Dx12DescriptorHeap, Dx12Fence, Dx12Resource};
use super::swapchain::Dx12SwapChain;
use super::Dx12;

/// 设备创建选项
#[derive(Debug, Clone, Copy, Default)]
pub struct Dx12DeviceDescriptor {
    pub debug_layer: bool,
    pub gpu_based_validation: bool,
}

pub struct Dx12Device {
    raw: ID3D12Device,
    factory: IDXGIFactory6,
    adapter: AdapterInfo,
    feature_level: FeatureLevel,
    debug_layer: bool,
}

fn d3d_feature_level(level: FeatureLevel) -> D3D_FEATURE_LEVEL {
    match level {
        FeatureLevel::Level12_0 => D3D_FEATURE_LEVEL_12_0,
        FeatureLevel::Level12_1 => D3D_FEATURE_LEVEL_12_1,
        FeatureLevel::Level12_2 => D3D_FEATURE_LEVEL_12_2,
    }
}

impl Dx12Device {
    pub fn new(desc: &Dx12DeviceDescriptor) -> Result<Self> {
        if desc.debug_layer {
            enable_debug_layer(desc.gpu_based_validation);
        }

        let factory_flags = if desc.debug_layer {
            DXGI_CREATE_FACTORY_DEBUG
        } else {
            DXGI_CREATE_FACTORY_FLAGS(0)
        };
        let factory: IDXGIFactory6 = unsafe { CreateDXGIFactory2(factory_flags) }
            .map_err(conv::map_err("Failed to create DXGI factory", GraphicsError::DeviceCreation))?;

        let (adapters, infos) = enumerate_adapters(&factory);
        for info in &infos {
            debug!(
                name = %info.name,
                vram_mb = info.dedicated_video_memory / (1024 * 1024),
                software = info.is_software,
                "Adapter found"
            );
        }

        let index = adapter::select_adapter(&infos)
            .ok_or_else(|| GraphicsError::DeviceCreation("No hardware adapter found".to_string()))?;

        let (raw, feature_level) = adapter::create_with_feature_level(|level| {
            let mut device: Option<ID3D12Device> = None;
            unsafe { D3D12CreateDevice(&adapters[index], d3d_feature_level(level), &mut device) }
                .ok()
                .and(device)
        })?;

        let adapter = infos[index].clone();
        info!(adapter = %adapter.name, feature_level = %feature_level, "D3D12 device created");

        if desc.debug_layer {
            configure_info_queue(&raw);
        }

        Ok(Self {
            raw,
            factory,
            adapter,
            feature_level,
            debug_layer: desc.debug_layer,
        })
    }

    pub fn raw(&self) -> &ID3D12Device {
        &self.raw
    }
}

fn enable_debug_layer(gpu_based_validation: bool) {
    let mut debug: Option<ID3D12Debug1> = None;
    match unsafe { D3D12GetDebugInterface(&mut debug) } {
        Ok(()) => {
            if let Some(debug) = debug {
                unsafe {
                    debug.EnableDebugLayer();
                    if gpu_based_validation {
                        debug.SetEnableGPUBasedValidation(true);
                    }
                }
                debug!(gpu_based_validation, "DX12 debug layer enabled");
            }
        }
        Err(e) => warn!(error = %e, "Failed to enable DX12 debug layer"),
    }
}

fn enumerate_adapters(factory: &IDXGIFactory6) -> (Vec<IDXGIAdapter4>, Vec<AdapterInfo>) {
    let mut adapters = Vec::new();
    let mut infos = Vec::new();

    for i in 0.. {
        let adapter: IDXGIAdapter4 =
            match unsafe { factory.EnumAdapterByGpuPreference(i, DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE) } {
                Ok(adapter) => adapter,
                Err(_) => break,
            };
        let Ok(desc) = (unsafe { adapter.GetDesc3() }) else {
            continue;
        };

        infos.push(AdapterInfo {
            name: conv::wide_to_string(&desc.Description),
            dedicated_video_memory: desc.DedicatedVideoMemory as u64,
            is_software: desc.Flags.0 & DXGI_ADAPTER_FLAG3_SOFTWARE.0 != 0,
        });
        adapters.push(adapter);
    }

    (adapters, infos)
}

fn configure_info_queue(device: &ID3D12Device) {
    let Ok(queue) = device.cast::<ID3D12InfoQueue>() else {
        warn!("ID3D12InfoQueue unavailable, validation messages will not break");
        return;
    };

    unsafe {
        let _ = queue.SetBreakOnSeverity(D3D12_MESSAGE_SEVERITY_CORRUPTION, true);
        let _ = queue.SetBreakOnSeverity(D3D12_MESSAGE_SEVERITY_ERROR, true);
        let _ = queue.SetBreakOnSeverity(D3D12_MESSAGE_SEVERITY_WARNING, true);

        let mut deny_ids = [D3D12_MESSAGE_ID_RESOURCE_BARRIER_MISMATCHING_COMMAND_LIST_TYPE];
        let mut deny_severities = [D3D12_MESSAGE_SEVERITY_INFO];
        let filter = D3D12_INFO_QUEUE_FILTER {
            DenyList: D3D12_INFO_QUEUE_FILTER_DESC {
                NumIDs: deny_ids.len() as u32,
                pIDList: deny_ids.as_mut_ptr(),
                NumSeverities: deny_severities.len() as u32,
                pSeverityList: deny_severities.as_mut_ptr(),
                ..Default::default()
            },
            ..Default::default()
        };
        if let Err(e) = queue.PushStorageFilter(&filter) {
            warn!(error = %e, "Failed to push info queue filter");
        }
    }
    debug!("D3D12 info queue configured");
}

fn set_name(object: &ID3D12Object, name: &str) {
    if !name.is_empty() {
        let _ = unsafe { object.SetName(&HSTRING::from(name)) };
    }
}

fn resource_desc(desc: &ResourceDescriptor) -> D3D12_RESOURCE_DESC {
    match desc.dimension {
        ResourceDimension::Buffer { size } => D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: D3D12_RESOURCE_FLAG_NONE,
        },
        ResourceDimension::Texture2D { width, height, mip_levels, format } => D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Alignment: 0,
            Width: u64::from(width),
            Height: height,
            DepthOrArraySize: 1,
            MipLevels: mip_levels as u16,
            Format: conv::format(format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: if desc.allow_depth_stencil {
                D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL
            } else {
                D3D12_RESOURCE_FLAG_NONE
            },
        },
    }
}

impl Device<Dx12> for Dx12Device {
    fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    fn create_command_queue(&self) -> Result<Dx12Queue> {
        let desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            ..Default::default()
        };
        let raw: ID3D12CommandQueue = unsafe { self.raw.CreateCommandQueue(&desc) }
            .map_err(conv::map_err("Failed to create command queue", GraphicsError::DeviceCreation))?;
        Ok(Dx12Queue { raw })
    }

    fn create_command_allocator(&self) -> Result<Dx12CommandAllocator> {
        let raw: ID3D12CommandAllocator =
            unsafe { self.raw.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
                .map_err(conv::map_err("Failed to create command allocator", GraphicsError::DeviceCreation))?;
        Ok(Dx12CommandAllocator { raw })
    }

    fn create_command_list(&self, allocator: &Dx12CommandAllocator) -> Result<Dx12CommandList> {
        let raw: ID3D12GraphicsCommandList =
            unsafe { self.raw.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator.raw, None) }
                .map_err(conv::map_err("Failed to create command list", GraphicsError::DeviceCreation))?;
        Ok(Dx12CommandList { raw })
    }

    fn create_swap_chain(
        &self,
        queue: &Dx12Queue,
        surface: &SurfaceTarget,
        desc: &SwapChainDescriptor,
    ) -> Result<Dx12SwapChain> {
        Dx12SwapChain::new(&self.factory, &queue.raw, surface, desc)
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDescriptor) -> Result<Dx12DescriptorHeap> {
        let flags = if desc.shader_visible {
            D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
        } else {
            D3D12_DESCRIPTOR_HEAP_FLAG_NONE
        };
        let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: conv::descriptor_heap_type(desc.descriptor_type),
            NumDescriptors: desc.num_descriptors,
            Flags: flags,
            NodeMask: 0,
        };

        let raw: ID3D12DescriptorHeap = unsafe { self.raw.CreateDescriptorHeap(&heap_desc) }.map_err(|e| {
            GraphicsError::ResourceCreation(format!(
                "Failed to create {} descriptor heap: {}",
                desc.descriptor_type.name(),
                e
            ))
        })?;
        if let Some(name) = &desc.name {
            set_name(&raw, name);
        }

        Ok(Dx12DescriptorHeap::new(raw, desc.shader_visible))
    }

    fn descriptor_increment_size(&self, ty: DescriptorType) -> u32 {
        unsafe { self.raw.GetDescriptorHandleIncrementSize(conv::descriptor_heap_type(ty)) }
    }

    fn create_committed_resource(&self, desc: &ResourceDescriptor) -> Result<Dx12Resource> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: conv::heap_type(desc.heap),
            ..Default::default()
        };
        let raw_desc = resource_desc(desc);
        let clear_value = desc.clear_value.as_ref().map(conv::clear_value);

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.raw.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &raw_desc,
                conv::resource_state(desc.initial_state),
                clear_value.as_ref().map(|c| c as *const _),
                &mut resource,
            )
        }
        .map_err(conv::map_err("Failed to create committed resource", GraphicsError::ResourceCreation))?;

        let resource = resource.ok_or_else(|| {
            GraphicsError::ResourceCreation(format!("CreateCommittedResource returned no resource for '{}'", desc.name))
        })?;
        set_name(&resource, &desc.name);

        Ok(Dx12Resource::new(resource, desc.clone()))
    }

    fn create_render_target_view(&self, resource: &Dx12Resource, format: Format, handle: CpuDescriptorHandle) {
        let view = D3D12_RENDER_TARGET_VIEW_DESC {
            Format: conv::format(format),
            ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
            Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_RTV { MipSlice: 0, PlaneSlice: 0 },
            },
        };
        unsafe {
            self.raw.CreateRenderTargetView(
                &resource.raw,
                Some(&view),
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr },
            );
        }
    }

    fn create_depth_stencil_view(&self, resource: &Dx12Resource, format: Format, handle: CpuDescriptorHandle) {
        let view = D3D12_DEPTH_STENCIL_VIEW_DESC {
            Format: conv::format(format),
            ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
            Flags: D3D12_DSV_FLAG_NONE,
            Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
            },
        };
        unsafe {
            self.raw.CreateDepthStencilView(
                &resource.raw,
                Some(&view),
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr },
            );
        }
    }

    fn create_shader_resource_view(&self, resource: &Dx12Resource, handle: CpuDescriptorHandle) {
        let (format, mip_levels) = match resource.desc().dimension {
            ResourceDimension::Texture2D { format, mip_levels, .. } => (format, mip_levels),
            ResourceDimension::Buffer { .. } => (Format::Unknown, 1),
        };
        let view = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: conv::format(format),
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: mip_levels,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        };
        unsafe {
            self.raw.CreateShaderResourceView(
                &resource.raw,
                Some(&view),
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr },
            );
        }
    }

    fn create_fence(&self, initial_value: u64) -> Result<Dx12Fence> {
        let raw: ID3D12Fence = unsafe { self.raw.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
            .map_err(conv::map_err("Failed to create fence", GraphicsError::DeviceCreation))?;
        Dx12Fence::new(raw)
    }

    fn create_root_signature(&self, desc: &RootSignatureDescriptor) -> Result<Dx12RootSignature> {
        let root_signature = pipeline::create_root_signature(&self.raw, desc)?;
        set_name(&root_signature.raw, &desc.name);
        debug!(name = %desc.name, parameters = desc.parameters.len(), "Root signature created");
        Ok(root_signature)
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor<'_, Dx12RootSignature>,
    ) -> Result<Dx12PipelineState> {
        let pipeline = pipeline::create_graphics_pipeline(&self.raw, desc)?;
        set_name(&pipeline.raw, desc.name);
        debug!(name = desc.name, "Graphics pipeline state created");
        Ok(pipeline)
    }

    fn compile_shader(&self, source: &[u8], name: &str, entry: &str, profile: &str) -> Result<Vec<u8>> {
        super::shader::compile_hlsl(source, name, entry, profile)
    }
}

impl Drop for Dx12Device {
    fn drop(&mut self) {
        if self.debug_layer {
            if let Ok(debug_device) = self.raw.cast::<ID3D12DebugDevice>() {
                let _ = unsafe {
                    debug_device.ReportLiveDeviceObjects(D3D12_RLDO_DETAIL | D3D12_RLDO_IGNORE_INTERNAL)
                };
            }
        }
        info!(adapter = %self.adapter.name, "D3D12 device destroyed");
    }
}
