//! 软件后端的队列、命令分配器和命令列表

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{CommandAllocator, CommandList, Queue};
use crate::gfx::types::{
    PrimitiveTopology, ScissorRect, SubresourceFootprint, TransitionBarrier, VertexBufferView, Viewport,
};
use crate::renderer::descriptor::{CpuDescriptorHandle, GpuDescriptorHandle};

use super::gpu::{lock, AllocatorInner, GpuWork, SoftCommand, SoftGpu};
use super::pipeline::{SoftPipelineState, SoftRootSignature};
use super::resource::{SoftDescriptorHeap, SoftFence, SoftResource};
use super::Soft;

/// 软件直接队列
#[derive(Debug)]
pub struct SoftQueue {
    pub(crate) gpu: Arc<SoftGpu>,
}

impl Queue<Soft> for SoftQueue {
    fn execute(&self, list: &SoftCommandList) {
        let mut recording = lock(&list.recording);
        if !recording.closed {
            self.gpu.report("ExecuteCommandLists called with a command list that is not closed".to_string());
            return;
        }

        let commands = std::mem::take(&mut recording.commands);
        let allocator = Arc::clone(&recording.allocator);
        allocator.in_flight.fetch_add(1, Ordering::AcqRel);
        self.gpu.submit(GpuWork::Execute { commands, allocator });
    }

    fn signal(&self, fence: &SoftFence, value: u64) -> Result<()> {
        self.gpu.submit(GpuWork::Signal {
            fence: Arc::clone(&fence.inner),
            value,
        });
        Ok(())
    }
}

/// 软件命令分配器
#[derive(Debug)]
pub struct SoftCommandAllocator {
    pub(crate) inner: Arc<AllocatorInner>,
    pub(crate) gpu: Arc<SoftGpu>,
}

impl CommandAllocator for SoftCommandAllocator {
    fn reset(&self) -> Result<()> {
        let in_flight = self.inner.in_flight.load(Ordering::Acquire);
        if in_flight > 0 {
            let message = format!(
                "Command allocator reset while {} command list(s) recorded from it are executing",
                in_flight
            );
            self.gpu.report(message.clone());
            return Err(GraphicsError::CommandExecution(message).into());
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct Recording {
    pub commands: Vec<SoftCommand>,
    pub closed: bool,
    pub allocator: Arc<AllocatorInner>,
}

/// 软件命令列表：把命令记录下来，提交时交给时间线执行
#[derive(Debug)]
pub struct SoftCommandList {
    pub(crate) recording: Mutex<Recording>,
}

impl SoftCommandList {
    pub(crate) fn new(allocator: &SoftCommandAllocator) -> Self {
        Self {
            recording: Mutex::new(Recording {
                commands: Vec::new(),
                closed: false,
                allocator: Arc::clone(&allocator.inner),
            }),
        }
    }

    fn record(&self, command: SoftCommand) {
        let mut recording = lock(&self.recording);
        assert!(!recording.closed, "recording into a closed command list");
        recording.commands.push(command);
    }

    /// 当前已录制的命令数
    pub fn recorded_len(&self) -> usize {
        lock(&self.recording).commands.len()
    }
}

impl CommandList<Soft> for SoftCommandList {
    fn close(&self) -> Result<()> {
        let mut recording = lock(&self.recording);
        if recording.closed {
            return Err(GraphicsError::CommandExecution("Command list is already closed".to_string()).into());
        }
        recording.closed = true;
        Ok(())
    }

    fn reset(&self, allocator: &SoftCommandAllocator) -> Result<()> {
        let mut recording = lock(&self.recording);
        if !recording.closed {
            return Err(GraphicsError::CommandExecution(
                "Command list must be closed before reset".to_string(),
            )
            .into());
        }
        recording.commands.clear();
        recording.closed = false;
        recording.allocator = Arc::clone(&allocator.inner);
        Ok(())
    }

    fn resource_barrier(&self, barriers: &[TransitionBarrier<'_, SoftResource>]) {
        for barrier in barriers {
            self.record(SoftCommand::Barrier {
                resource: barrier.resource.clone(),
                before: barrier.before,
                after: barrier.after,
            });
        }
    }

    fn set_render_targets(&self, rtv: CpuDescriptorHandle, dsv: Option<CpuDescriptorHandle>) {
        self.record(SoftCommand::SetRenderTargets {
            rtv: rtv.ptr,
            dsv: dsv.map(|h| h.ptr),
        });
    }

    fn clear_render_target_view(&self, rtv: CpuDescriptorHandle, color: [f32; 4]) {
        self.record(SoftCommand::ClearRenderTarget { rtv: rtv.ptr, color });
    }

    fn clear_depth_stencil_view(&self, dsv: CpuDescriptorHandle, depth: f32) {
        self.record(SoftCommand::ClearDepth { dsv: dsv.ptr, depth });
    }

    fn set_viewport(&self, viewport: &Viewport) {
        self.record(SoftCommand::SetViewport(*viewport));
    }

    fn set_scissor_rect(&self, rect: &ScissorRect) {
        self.record(SoftCommand::SetScissor(*rect));
    }

    fn set_descriptor_heaps(&self, heaps: &[&SoftDescriptorHeap]) {
        self.record(SoftCommand::SetDescriptorHeaps(heaps.len()));
    }

    fn copy_buffer_to_texture(
        &self,
        dst: &SoftResource,
        mip: u32,
        src: &SoftResource,
        footprint: &SubresourceFootprint,
    ) {
        self.record(SoftCommand::CopyBufferToTexture {
            dst: dst.clone(),
            mip,
            src: src.clone(),
            footprint: *footprint,
        });
    }

    fn set_graphics_root_signature(&self, root_signature: &SoftRootSignature) {
        self.record(SoftCommand::SetRootSignature(root_signature.clone()));
    }

    fn set_pipeline_state(&self, pipeline: &SoftPipelineState) {
        self.record(SoftCommand::SetPipelineState(pipeline.clone()));
    }

    fn set_primitive_topology(&self, topology: PrimitiveTopology) {
        self.record(SoftCommand::SetPrimitiveTopology(topology));
    }

    fn set_vertex_buffer(&self, view: &VertexBufferView) {
        self.record(SoftCommand::SetVertexBuffer(*view));
    }

    fn set_graphics_root_constant_buffer_view(&self, index: u32, address: u64) {
        self.record(SoftCommand::SetRootConstantBufferView { index, address });
    }

    fn set_graphics_root_descriptor_table(&self, index: u32, handle: GpuDescriptorHandle) {
        self.record(SoftCommand::SetRootDescriptorTable { index, handle: handle.ptr });
    }

    fn draw_instanced(&self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        self.record(SoftCommand::Draw {
            vertex_count,
            instance_count,
            start_vertex,
            start_instance,
        });
    }
}
