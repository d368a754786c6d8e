//! DirectX 12 后端
//!
//! - `device`：适配器选择、调试层、信息队列和资源创建
//! - `command`：直接队列、命令分配器、图形命令列表
//! - `swapchain`：flip-discard 交换链
//! - `resource`：提交资源、描述符堆、栅栏
//! - `pipeline`：根签名与管线状态对象
//! - `shader`：D3DCompile 编译 HLSL
//! - `conv`：通用类型到 D3D12 类型的转换

mod command;
mod conv;
mod device;
mod pipeline;
mod resource;
mod shader;
mod swapchain;

pub use command::{Dx12CommandAllocator, Dx12CommandList, Dx12Queue};
pub use device::{Dx12Device, Dx12DeviceDescriptor};
pub use pipeline::{Dx12PipelineState, Dx12RootSignature};
pub use resource::{Dx12DescriptorHeap, Dx12Fence, Dx12Resource};
pub use swapchain::Dx12SwapChain;

use crate::gfx::backend::Backend;

/// DirectX 12 后端
pub struct Dx12;

impl Backend for Dx12 {
    const NAME: &'static str = "DirectX 12";

    type Device = Dx12Device;
    type Queue = Dx12Queue;
    type CommandAllocator = Dx12CommandAllocator;
    type CommandList = Dx12CommandList;
    type SwapChain = Dx12SwapChain;
    type Resource = Dx12Resource;
    type DescriptorHeap = Dx12DescriptorHeap;
    type Fence = Dx12Fence;
    type RootSignature = Dx12RootSignature;
    type PipelineState = Dx12PipelineState;
}
