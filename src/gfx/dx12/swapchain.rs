//! DXGI flip-discard 交换链

use tracing::{debug, warn};
use windows::core::Interface;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use raw_window_handle::RawWindowHandle;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{SurfaceTarget, SwapChain, SwapChainDescriptor};
use crate::gfx::types::{HeapType, ResourceDescriptor, ResourceDimension, ResourceState};

use super::conv;
use super::resource::Dx12Resource;
use super::Dx12;

pub struct Dx12SwapChain {
    raw: IDXGISwapChain3,
    desc: SwapChainDescriptor,
}

impl Dx12SwapChain {
    pub(super) fn new(
        factory: &IDXGIFactory6,
        queue: &ID3D12CommandQueue,
        surface: &SurfaceTarget,
        desc: &SwapChainDescriptor,
    ) -> Result<Self> {
        let hwnd = match surface.window {
            Some(RawWindowHandle::Win32(handle)) => HWND(handle.hwnd.get() as *mut core::ffi::c_void),
            Some(_) => {
                return Err(GraphicsError::SwapchainError(
                    "Expected a Win32 window handle".to_string(),
                )
                .into())
            }
            None => {
                return Err(GraphicsError::Unsupported(
                    "DirectX 12 swap chain requires a window".to_string(),
                )
                .into())
            }
        };

        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: conv::format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            ..Default::default()
        };

        let raw: IDXGISwapChain3 = unsafe {
            let swap_chain = factory
                .CreateSwapChainForHwnd(queue, hwnd, &swap_chain_desc, None, None)
                .map_err(conv::map_err("Failed to create swap chain", GraphicsError::SwapchainError))?;
            if let Err(e) = factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER) {
                warn!(error = %e, "Failed to disable Alt+Enter fullscreen toggle");
            }
            swap_chain
                .cast()
                .map_err(conv::map_err("Failed to cast swap chain to IDXGISwapChain3", GraphicsError::SwapchainError))?
        };

        Ok(Self { raw, desc: *desc })
    }
}

impl SwapChain<Dx12> for Dx12SwapChain {
    fn buffer_count(&self) -> u32 {
        self.desc.buffer_count
    }

    fn buffer(&self, index: u32) -> Result<Dx12Resource> {
        let raw: ID3D12Resource = unsafe { self.raw.GetBuffer(index) }
            .map_err(conv::map_err("Failed to get swap chain buffer", GraphicsError::SwapchainError))?;
        let desc = unsafe { raw.GetDesc() };

        Ok(Dx12Resource::new(
            raw,
            ResourceDescriptor {
                dimension: ResourceDimension::Texture2D {
                    width: desc.Width as u32,
                    height: desc.Height,
                    mip_levels: 1,
                    format: self.desc.format,
                },
                heap: HeapType::Default,
                initial_state: ResourceState::Present,
                allow_depth_stencil: false,
                clear_value: None,
                name: format!("Back Buffer {}", index),
            },
        ))
    }

    fn current_back_buffer_index(&self) -> u32 {
        unsafe { self.raw.GetCurrentBackBufferIndex() }
    }

    fn present(&self, sync_interval: u32) -> Result<()> {
        unsafe { self.raw.Present(sync_interval, DXGI_PRESENT(0)) }
            .ok()
            .map_err(conv::map_err("Failed to present", GraphicsError::SwapchainError))
    }

    fn resize_buffers(&self, width: u32, height: u32) -> Result<()> {
        unsafe {
            self.raw.ResizeBuffers(
                self.desc.buffer_count,
                width,
                height,
                conv::format(self.desc.format),
                DXGI_SWAP_CHAIN_FLAG(0),
            )
        }
        .map_err(conv::map_err("Failed to resize swap chain buffers", GraphicsError::SwapchainError))?;

        debug!(width, height, "Swap chain buffers resized");
        Ok(())
    }
}
