//! 图形后端的统一抽象接口
//!
//! 渲染核心（`renderer` 模块）只通过这里定义的 trait 与 GPU 交互。
//! 一个 [`Backend`] 用关联类型把设备、队列、命令列表、交换链、栅栏等对象组织在一起，
//! 上层代码对 `B: Backend` 泛型化，因此同一套帧生命周期逻辑既能驱动 DirectX 12，
//! 也能在没有 GPU 的环境中驱动软件后端。
//!
//! # 约定
//!
//! - 所有 GPU 对象都由 [`Device`] 创建，并且必须先于设备销毁
//! - 命令列表创建后即处于录制状态，与 D3D12 的行为一致
//! - 方法都接收 `&self`：原生 API 的对象本身就是内部可变的，
//!   线程模型由上层（单线程录制）保证

use std::fmt;
use std::ptr::NonNull;
use std::time::Duration;

use raw_window_handle::RawWindowHandle;

use crate::core::error::Result;
use crate::renderer::descriptor::{
    CpuDescriptorHandle, DescriptorHeapDescriptor, DescriptorType, GpuDescriptorHandle,
};

use super::adapter::{AdapterInfo, FeatureLevel};
use super::types::{
    Format, GraphicsPipelineDescriptor, PrimitiveTopology, ResourceDescriptor, RootSignatureDescriptor,
    ScissorRect, SubresourceFootprint, TransitionBarrier, VertexBufferView, Viewport,
};

/// 一个图形 API 家族
pub trait Backend: Sized + 'static {
    /// 后端名称，用于日志
    const NAME: &'static str;

    type Device: Device<Self>;
    type Queue: Queue<Self>;
    type CommandAllocator: CommandAllocator;
    type CommandList: CommandList<Self>;
    type SwapChain: SwapChain<Self>;
    type Resource: Resource;
    type DescriptorHeap: RawDescriptorHeap;
    type Fence: Fence;
    type RootSignature: fmt::Debug;
    type PipelineState: fmt::Debug;
}

/// 呈现目标：窗口句柄加客户区尺寸
///
/// `window` 为 `None` 时表示无窗口运行，只有软件后端接受这种目标。
#[derive(Debug, Clone, Copy)]
pub struct SurfaceTarget {
    pub window: Option<RawWindowHandle>,
    pub width: u32,
    pub height: u32,
}

impl SurfaceTarget {
    pub fn headless(width: u32, height: u32) -> Self {
        Self { window: None, width, height }
    }
}

/// 交换链描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDescriptor {
    pub buffer_count: u32,
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

/// 逻辑设备
pub trait Device<B: Backend> {
    fn adapter_info(&self) -> &AdapterInfo;

    fn feature_level(&self) -> FeatureLevel;

    /// 创建直接（graphics）命令队列
    fn create_command_queue(&self) -> Result<B::Queue>;

    fn create_command_allocator(&self) -> Result<B::CommandAllocator>;

    /// 创建命令列表，返回时处于录制状态
    fn create_command_list(&self, allocator: &B::CommandAllocator) -> Result<B::CommandList>;

    fn create_swap_chain(
        &self,
        queue: &B::Queue,
        surface: &SurfaceTarget,
        desc: &SwapChainDescriptor,
    ) -> Result<B::SwapChain>;

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDescriptor) -> Result<B::DescriptorHeap>;

    /// 某类描述符在堆中的步长，由硬件决定，必须查询
    fn descriptor_increment_size(&self, ty: DescriptorType) -> u32;

    fn create_committed_resource(&self, desc: &ResourceDescriptor) -> Result<B::Resource>;

    fn create_render_target_view(&self, resource: &B::Resource, format: Format, handle: CpuDescriptorHandle);

    fn create_depth_stencil_view(&self, resource: &B::Resource, format: Format, handle: CpuDescriptorHandle);

    fn create_shader_resource_view(&self, resource: &B::Resource, handle: CpuDescriptorHandle);

    fn create_fence(&self, initial_value: u64) -> Result<B::Fence>;

    fn create_root_signature(&self, desc: &RootSignatureDescriptor) -> Result<B::RootSignature>;

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor<'_, B::RootSignature>,
    ) -> Result<B::PipelineState>;

    /// 把 HLSL 源码编译为本后端可用的着色器代码
    fn compile_shader(&self, source: &[u8], name: &str, entry: &str, profile: &str) -> Result<Vec<u8>>;
}

/// 命令队列
pub trait Queue<B: Backend> {
    /// 提交一个已关闭的命令列表
    fn execute(&self, list: &B::CommandList);

    /// 在队列上排入一个栅栏信号，GPU 执行到这里时把栅栏设为 `value`
    fn signal(&self, fence: &B::Fence, value: u64) -> Result<()>;
}

/// 命令分配器，命令列表录制内容的实际存储
pub trait CommandAllocator {
    /// 回收存储。调用方必须保证 GPU 已经执行完用它录制的所有命令
    fn reset(&self) -> Result<()>;
}

/// 图形命令列表
pub trait CommandList<B: Backend>: fmt::Debug {
    fn close(&self) -> Result<()>;

    /// 以 `allocator` 重新开始录制
    fn reset(&self, allocator: &B::CommandAllocator) -> Result<()>;

    fn resource_barrier(&self, barriers: &[TransitionBarrier<'_, B::Resource>]);

    fn set_render_targets(&self, rtv: CpuDescriptorHandle, dsv: Option<CpuDescriptorHandle>);

    fn clear_render_target_view(&self, rtv: CpuDescriptorHandle, color: [f32; 4]);

    fn clear_depth_stencil_view(&self, dsv: CpuDescriptorHandle, depth: f32);

    fn set_viewport(&self, viewport: &Viewport);

    fn set_scissor_rect(&self, rect: &ScissorRect);

    fn set_descriptor_heaps(&self, heaps: &[&B::DescriptorHeap]);

    /// 把上传缓冲区中 `footprint` 描述的数据复制到纹理的第 `mip` 级
    fn copy_buffer_to_texture(
        &self,
        dst: &B::Resource,
        mip: u32,
        src: &B::Resource,
        footprint: &SubresourceFootprint,
    );

    fn set_graphics_root_signature(&self, root_signature: &B::RootSignature);

    fn set_pipeline_state(&self, pipeline: &B::PipelineState);

    fn set_primitive_topology(&self, topology: PrimitiveTopology);

    fn set_vertex_buffer(&self, view: &VertexBufferView);

    /// 把常量缓冲区地址绑定到根参数 `index`
    fn set_graphics_root_constant_buffer_view(&self, index: u32, address: u64);

    /// 把 SRV 堆中从 `handle` 开始的描述符表绑定到根参数 `index`
    fn set_graphics_root_descriptor_table(&self, index: u32, handle: GpuDescriptorHandle);

    fn draw_instanced(&self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32);
}

/// 交换链
pub trait SwapChain<B: Backend> {
    fn buffer_count(&self) -> u32;

    /// 取得第 `index` 个后台缓冲区
    fn buffer(&self, index: u32) -> Result<B::Resource>;

    fn current_back_buffer_index(&self) -> u32;

    /// 呈现当前后台缓冲区。设备移除时返回 `GraphicsError::DeviceLost`
    fn present(&self, sync_interval: u32) -> Result<()>;

    /// 调整缓冲区尺寸。调用前必须释放所有后台缓冲区引用
    fn resize_buffers(&self, width: u32, height: u32) -> Result<()>;
}

/// 栅栏
pub trait Fence {
    /// GPU 已完成的值
    fn completed_value(&self) -> u64;

    /// 阻塞直到 `completed_value() >= value`
    ///
    /// 到达返回 `Ok(true)`，超时返回 `Ok(false)`，`timeout` 为 `None` 表示无限等待。
    fn wait_for_value(&self, value: u64, timeout: Option<Duration>) -> Result<bool>;
}

/// GPU 资源（缓冲区或纹理）
pub trait Resource: Clone + fmt::Debug {
    fn desc(&self) -> &ResourceDescriptor;

    fn gpu_virtual_address(&self) -> u64;

    /// 映射 Upload 堆资源
    ///
    /// # Safety
    ///
    /// 返回的指针在 `unmap` 或资源销毁前有效，可访问 `desc().byte_size()` 字节。
    /// GPU 正在读取的区域不得写入。
    unsafe fn map(&self) -> Result<NonNull<u8>>;

    fn unmap(&self);
}

/// 原生描述符堆
pub trait RawDescriptorHeap: fmt::Debug {
    fn cpu_start(&self) -> CpuDescriptorHandle;

    /// 仅着色器可见的堆有 GPU 句柄
    fn gpu_start(&self) -> Option<GpuDescriptorHandle>;
}
