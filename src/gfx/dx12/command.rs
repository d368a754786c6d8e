//! DirectX 12 命令队列、分配器与图形命令列表

use std::mem::ManuallyDrop;

use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D::{D3D_PRIMITIVE_TOPOLOGY_LINELIST, D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST};
use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{CommandAllocator, CommandList, Queue};
use crate::gfx::types::{
    PrimitiveTopology, ScissorRect, SubresourceFootprint, TransitionBarrier, VertexBufferView, Viewport,
};
use crate::renderer::descriptor::{CpuDescriptorHandle, GpuDescriptorHandle};

use super::conv;
use super::pipeline::{Dx12PipelineState, Dx12RootSignature};
use super::resource::{Dx12DescriptorHeap, Dx12Fence, Dx12Resource};
use super::Dx12;

#[derive(Debug)]
pub struct Dx12Queue {
    pub(super) raw: ID3D12CommandQueue,
}

impl Queue<Dx12> for Dx12Queue {
    fn execute(&self, list: &Dx12CommandList) {
        let lists = [Some(list.raw.clone().into())];
        unsafe { self.raw.ExecuteCommandLists(&lists) };
    }

    fn signal(&self, fence: &Dx12Fence, value: u64) -> Result<()> {
        unsafe { self.raw.Signal(&fence.raw, value) }
            .map_err(conv::map_err("Failed to signal fence", GraphicsError::CommandExecution))
    }
}

#[derive(Debug)]
pub struct Dx12CommandAllocator {
    pub(super) raw: ID3D12CommandAllocator,
}

impl CommandAllocator for Dx12CommandAllocator {
    fn reset(&self) -> Result<()> {
        unsafe { self.raw.Reset() }
            .map_err(conv::map_err("Failed to reset command allocator", GraphicsError::CommandExecution))
    }
}

#[derive(Debug)]
pub struct Dx12CommandList {
    pub(super) raw: ID3D12GraphicsCommandList,
}

fn cpu_handle(handle: CpuDescriptorHandle) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }
}

impl CommandList<Dx12> for Dx12CommandList {
    fn close(&self) -> Result<()> {
        unsafe { self.raw.Close() }
            .map_err(conv::map_err("Failed to close command list", GraphicsError::CommandExecution))
    }

    fn reset(&self, allocator: &Dx12CommandAllocator) -> Result<()> {
        unsafe { self.raw.Reset(&allocator.raw, None) }
            .map_err(conv::map_err("Failed to reset command list", GraphicsError::CommandExecution))
    }

    fn resource_barrier(&self, barriers: &[TransitionBarrier<'_, Dx12Resource>]) {
        let raw: Vec<D3D12_RESOURCE_BARRIER> = barriers
            .iter()
            .map(|b| D3D12_RESOURCE_BARRIER {
                Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
                Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                Anonymous: D3D12_RESOURCE_BARRIER_0 {
                    Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                        pResource: ManuallyDrop::new(Some(b.resource.raw.clone())),
                        Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                        StateBefore: conv::resource_state(b.before),
                        StateAfter: conv::resource_state(b.after),
                    }),
                },
            })
            .collect();

        unsafe {
            self.raw.ResourceBarrier(&raw);
            // 释放屏障里持有的资源引用
            for barrier in raw {
                let transition = ManuallyDrop::into_inner(barrier.Anonymous.Transition);
                drop(ManuallyDrop::into_inner(transition.pResource));
            }
        }
    }

    fn set_render_targets(&self, rtv: CpuDescriptorHandle, dsv: Option<CpuDescriptorHandle>) {
        let rtv = cpu_handle(rtv);
        let dsv = dsv.map(cpu_handle);
        unsafe {
            self.raw
                .OMSetRenderTargets(1, Some(&rtv), false, dsv.as_ref().map(|d| d as *const _));
        }
    }

    fn clear_render_target_view(&self, rtv: CpuDescriptorHandle, color: [f32; 4]) {
        unsafe { self.raw.ClearRenderTargetView(cpu_handle(rtv), &color, None) };
    }

    fn clear_depth_stencil_view(&self, dsv: CpuDescriptorHandle, depth: f32) {
        unsafe {
            self.raw
                .ClearDepthStencilView(cpu_handle(dsv), D3D12_CLEAR_FLAG_DEPTH, depth, 0, None);
        }
    }

    fn set_viewport(&self, viewport: &Viewport) {
        let raw = D3D12_VIEWPORT {
            TopLeftX: viewport.x,
            TopLeftY: viewport.y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: viewport.min_depth,
            MaxDepth: viewport.max_depth,
        };
        unsafe { self.raw.RSSetViewports(&[raw]) };
    }

    fn set_scissor_rect(&self, rect: &ScissorRect) {
        let raw = RECT {
            left: rect.left,
            top: rect.top,
            right: rect.right,
            bottom: rect.bottom,
        };
        unsafe { self.raw.RSSetScissorRects(&[raw]) };
    }

    fn set_descriptor_heaps(&self, heaps: &[&Dx12DescriptorHeap]) {
        let raw: Vec<Option<ID3D12DescriptorHeap>> = heaps.iter().map(|h| Some(h.raw.clone())).collect();
        unsafe { self.raw.SetDescriptorHeaps(&raw) };
    }

    fn copy_buffer_to_texture(
        &self,
        dst: &Dx12Resource,
        mip: u32,
        src: &Dx12Resource,
        footprint: &SubresourceFootprint,
    ) {
        let dst_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: ManuallyDrop::new(Some(dst.raw.clone())),
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: mip },
        };
        let src_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: ManuallyDrop::new(Some(src.raw.clone())),
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: footprint.offset,
                    Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: conv::format(footprint.format),
                        Width: footprint.width,
                        Height: footprint.height,
                        Depth: 1,
                        RowPitch: footprint.row_pitch,
                    },
                },
            },
        };

        unsafe {
            self.raw.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
            drop(ManuallyDrop::into_inner(dst_location.pResource));
            drop(ManuallyDrop::into_inner(src_location.pResource));
        }
    }

    fn set_graphics_root_signature(&self, root_signature: &Dx12RootSignature) {
        unsafe { self.raw.SetGraphicsRootSignature(&root_signature.raw) };
    }

    fn set_pipeline_state(&self, pipeline: &Dx12PipelineState) {
        unsafe { self.raw.SetPipelineState(&pipeline.raw) };
    }

    fn set_primitive_topology(&self, topology: PrimitiveTopology) {
        let raw = match topology {
            PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
            PrimitiveTopology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        };
        unsafe { self.raw.IASetPrimitiveTopology(raw) };
    }

    fn set_vertex_buffer(&self, view: &VertexBufferView) {
        let raw = D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: view.location,
            SizeInBytes: view.size_in_bytes,
            StrideInBytes: view.stride_in_bytes,
        };
        unsafe { self.raw.IASetVertexBuffers(0, Some(&[raw])) };
    }

    fn set_graphics_root_constant_buffer_view(&self, index: u32, address: u64) {
        unsafe { self.raw.SetGraphicsRootConstantBufferView(index, address) };
    }

    fn set_graphics_root_descriptor_table(&self, index: u32, handle: GpuDescriptorHandle) {
        unsafe {
            self.raw
                .SetGraphicsRootDescriptorTable(index, D3D12_GPU_DESCRIPTOR_HANDLE { ptr: handle.ptr });
        }
    }

    fn draw_instanced(&self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        unsafe {
            self.raw
                .DrawInstanced(vertex_count, instance_count, start_vertex, start_instance);
        }
    }
}
