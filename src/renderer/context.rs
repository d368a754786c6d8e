//! 图形上下文
//!
//! [`GraphicsContext`] 显式持有渲染核心的全部 GPU 对象：设备、直接队列、
//! 命令分配器与命令列表、交换链及其 RTV 堆、深度缓冲及其 DSV 堆、
//! 着色器可见的 SRV 堆和帧栅栏。没有全局单例，调用方把它传给需要的地方。
//!
//! 销毁时先排空 GPU，再按与创建相反的顺序释放对象。

use tracing::{error, info, warn};

use crate::core::config::GraphicsConfig;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{Backend, Device, SurfaceTarget};

use super::command::CommandContext;
use super::depth::DepthTarget;
use super::descriptor::{DescriptorAllocator, DescriptorHeap, DescriptorHeapDescriptor};
use super::frame::{FrameController, FramePhase, FrameSettings};
use super::swapchain::SwapChainManager;
use super::sync::FrameFence;

/// SRV 堆中保留给叠加层字体纹理的槽位数
pub const RESERVED_SRV_SLOTS: u32 = 1;

pub struct GraphicsContext<B: Backend> {
    // 字段顺序即释放顺序
    frame: FrameController<B>,
    srv: DescriptorAllocator<B>,
    depth: DepthTarget<B>,
    swap_chain: SwapChainManager<B>,
    device: B::Device,
    device_lost: bool,
}

impl<B: Backend> GraphicsContext<B> {
    /// 在 `device` 上创建完整的渲染核心
    pub fn new(device: B::Device, surface: &SurfaceTarget, config: &GraphicsConfig) -> Result<Self> {
        if surface.width == 0 || surface.height == 0 {
            return Err(GraphicsError::SwapchainError(format!(
                "Cannot create a graphics context for an empty {}x{} surface",
                surface.width, surface.height
            ))
            .into());
        }

        let commands = CommandContext::new(&device)?;
        let swap_chain = SwapChainManager::new(&device, commands.queue(), surface, config.back_buffer_count)?;
        let depth = DepthTarget::new(&device, surface.width, surface.height)?;
        let srv_heap = DescriptorHeap::new(
            &device,
            &DescriptorHeapDescriptor::srv(config.srv_heap_capacity).with_name("SRV Heap"),
        )?;
        let srv = DescriptorAllocator::new(srv_heap, RESERVED_SRV_SLOTS)?;
        let fence = FrameFence::new(&device, config.fence_timeout())?;

        let settings = FrameSettings {
            clear_color: config.clear_color,
            sync_interval: config.sync_interval(),
        };
        let frame = FrameController::new(commands, fence, settings, surface.width, surface.height);

        info!(
            backend = B::NAME,
            adapter = %device.adapter_info().name,
            feature_level = %device.feature_level(),
            width = surface.width,
            height = surface.height,
            "Graphics context created"
        );

        Ok(Self {
            frame,
            srv,
            depth,
            swap_chain,
            device,
            device_lost: false,
        })
    }

    /// 开始一帧
    ///
    /// 设备已经丢失时返回 `GraphicsError::DeviceLost`，
    /// 交换链没能取回后台缓冲区时返回 `GraphicsError::SwapchainError`。
    pub fn pre_draw(&mut self) -> Result<&B::CommandList> {
        if self.device_lost {
            return Err(GraphicsError::DeviceLost("Graphics context must be recreated".to_string()).into());
        }
        if !self.swap_chain.is_complete() {
            return Err(GraphicsError::SwapchainError(
                "Swap chain lost its back buffers in a failed resize".to_string(),
            )
            .into());
        }
        Ok(self
            .frame
            .pre_draw(&mut self.swap_chain, &self.depth, Some(self.srv.heap())))
    }

    /// 结束一帧
    pub fn post_draw(&mut self) -> Result<()> {
        let result = self.frame.post_draw(&mut self.swap_chain);
        self.track(result)
    }

    /// 在两帧之间同步执行一段录制的命令
    pub fn immediate<T>(&mut self, record: impl FnOnce(&B::Device, &B::CommandList) -> Result<T>) -> Result<T> {
        let device = &self.device;
        let result = self.frame.immediate(|list| record(device, list));
        self.track(result)
    }

    /// 窗口客户区尺寸变化
    ///
    /// 0x0（最小化）时什么也不做。
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        if (width, height) == self.swap_chain.extent() {
            return Ok(());
        }
        assert_eq!(self.frame.phase(), FramePhase::Idle, "resize during a frame");

        let result = self.resize_targets(width, height);
        self.track(result)?;
        info!(width, height, "Graphics context resized");
        Ok(())
    }

    fn resize_targets(&mut self, width: u32, height: u32) -> Result<()> {
        self.frame.flush()?;
        self.swap_chain.resize(&self.device, width, height)?;
        self.depth.resize(&self.device, width, height)?;
        self.frame.set_extent(width, height);
        Ok(())
    }

    /// 排空队列上的全部工作
    pub fn flush(&mut self) -> Result<()> {
        let result = self.frame.flush();
        self.track(result)
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_device_lost() && !self.device_lost {
                error!(error = %e, "Graphics device lost");
                self.device_lost = true;
            }
        }
        result
    }

    /// 是否发生过设备丢失，为真时整个上下文需要重建
    pub fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn queue(&self) -> &B::Queue {
        self.frame.queue()
    }

    /// 当前帧正在录制的命令列表
    pub fn command_list(&self) -> &B::CommandList {
        self.frame.command_list()
    }

    pub fn srv_allocator(&self) -> &DescriptorAllocator<B> {
        &self.srv
    }

    pub fn srv_allocator_mut(&mut self) -> &mut DescriptorAllocator<B> {
        &mut self.srv
    }

    pub fn frame(&self) -> &FrameController<B> {
        &self.frame
    }

    pub fn swap_chain(&self) -> &SwapChainManager<B> {
        &self.swap_chain
    }

    pub fn depth(&self) -> &DepthTarget<B> {
        &self.depth
    }

    pub fn extent(&self) -> (u32, u32) {
        self.swap_chain.extent()
    }

    pub fn aspect_ratio(&self) -> f32 {
        let (width, height) = self.extent();
        width as f32 / height as f32
    }
}

impl<B: Backend> Drop for GraphicsContext<B> {
    fn drop(&mut self) {
        if self.device_lost {
            warn!("Destroying graphics context after device loss without draining the GPU");
            return;
        }
        if let Err(e) = self.frame.flush() {
            error!(error = %e, "Failed to drain GPU before destroying graphics context");
        }
        info!(frames = self.frame.frame_count(), "Graphics context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{Resource, SwapChain};
    use crate::gfx::soft::{ExecutionMode, Soft, SoftDevice, SoftGpuControl};
    use crate::gfx::types::ResourceState;
    use std::thread;
    use std::time::{Duration, Instant};

    fn context_with(mode: ExecutionMode, config: GraphicsConfig) -> (GraphicsContext<Soft>, SoftGpuControl) {
        let device = SoftDevice::with_mode(mode);
        let control = device.control();
        let context = GraphicsContext::<Soft>::new(device, &SurfaceTarget::headless(4, 3), &config).unwrap();
        (context, control)
    }

    fn context() -> (GraphicsContext<Soft>, SoftGpuControl) {
        context_with(ExecutionMode::Immediate, GraphicsConfig::default())
    }

    fn render_frame(context: &mut GraphicsContext<Soft>) -> Result<()> {
        context.pre_draw()?;
        context.post_draw()
    }

    #[test]
    fn test_exactly_one_back_buffer_is_render_target_while_recording() {
        let (mut context, _control) = context();
        assert!(context
            .swap_chain()
            .back_buffer_states()
            .iter()
            .all(|s| *s == ResourceState::Present));

        context.pre_draw().unwrap();
        let states = context.swap_chain().back_buffer_states();
        assert_eq!(states.iter().filter(|s| **s == ResourceState::RenderTarget).count(), 1);
        assert_eq!(states[0], ResourceState::RenderTarget);
        assert_eq!(context.frame().phase(), FramePhase::Recording);

        context.post_draw().unwrap();
        assert!(context
            .swap_chain()
            .back_buffer_states()
            .iter()
            .all(|s| *s == ResourceState::Present));
        assert_eq!(context.frame().phase(), FramePhase::Idle);
    }

    #[test]
    fn test_back_buffer_index_alternates() {
        let (mut context, _control) = context();
        let mut indices = Vec::new();
        for _ in 0..3 {
            indices.push(context.swap_chain().current_back_buffer_index());
            render_frame(&mut context).unwrap();
        }
        assert_eq!(indices, vec![0, 1, 0]);
    }

    #[test]
    fn test_fence_advances_by_one_per_frame() {
        let (mut context, control) = context();
        for frame in 1..=4u64 {
            render_frame(&mut context).unwrap();
            assert_eq!(context.frame().requested_fence_value().value(), frame);
            assert!(context.frame().completed_fence_value() >= context.frame().requested_fence_value());
            assert_eq!(context.frame().allocator_reset_count(), frame);
        }
        assert_eq!(context.frame().frame_count(), 4);
        assert_eq!(control.executed_command_lists(), 4);
        assert!(control.validation_errors().is_empty());
    }

    #[test]
    fn test_frame_clears_color_and_depth() {
        let (mut context, _control) = context();
        render_frame(&mut context).unwrap();

        let depth = context.depth().resource().read_subresource(0);
        assert_eq!(depth.len(), 4 * 3 * 4);
        assert!(depth
            .chunks_exact(4)
            .all(|d| f32::from_le_bytes([d[0], d[1], d[2], d[3]]) == 1.0));

        let back_buffer = context.swap_chain().raw().buffer(0).unwrap();
        let pixels = back_buffer.read_subresource(0);
        assert!(pixels.chunks_exact(4).all(|p| p == [89, 137, 188, 255]));
    }

    #[test]
    fn test_stalled_gpu_reports_device_lost_without_resetting_allocator() {
        let config = GraphicsConfig {
            fence_timeout_ms: 20,
            ..GraphicsConfig::default()
        };
        let (mut context, _control) = context_with(ExecutionMode::Manual, config);

        context.pre_draw().unwrap();
        let err = context.post_draw().unwrap_err();

        assert!(err.is_device_lost());
        assert!(context.is_device_lost());
        assert_eq!(context.frame().allocator_reset_count(), 0);
        assert_eq!(context.frame().phase(), FramePhase::Presented);
        assert!(context.pre_draw().err().is_some_and(|e| e.is_device_lost()));
    }

    #[test]
    fn test_post_draw_waits_for_late_gpu() {
        let (mut context, control) = context_with(ExecutionMode::Manual, GraphicsConfig::default());

        context.pre_draw().unwrap();
        let gpu = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            control.retire_all();
            control
        });

        let start = Instant::now();
        context.post_draw().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert!(context.frame().completed_fence_value() >= context.frame().requested_fence_value());

        let control = gpu.join().unwrap();
        assert_eq!(control.pending(), 0);
        assert!(control.validation_errors().is_empty());
    }

    #[test]
    fn test_device_removal_surfaces_on_present() {
        let (mut context, control) = context();
        render_frame(&mut context).unwrap();

        control.remove_device();
        let err = render_frame(&mut context).unwrap_err();
        assert!(err.is_device_lost());
        assert!(context.is_device_lost());
    }

    #[test]
    fn test_resize_recreates_targets() {
        let (mut context, control) = context();
        render_frame(&mut context).unwrap();

        context.resize(0, 0).unwrap();
        assert_eq!(context.extent(), (4, 3));

        context.resize(8, 6).unwrap();
        assert_eq!(context.extent(), (8, 6));
        assert_eq!(context.swap_chain().current_back_buffer_index(), 0);
        assert_eq!(context.frame().viewport().width, 8.0);
        assert_eq!(context.frame().scissor().bottom, 6);
        assert_eq!(context.depth().resource().read_subresource(0).len(), 8 * 6 * 4);

        render_frame(&mut context).unwrap();
        assert!(control.validation_errors().is_empty());
        assert!(context
            .depth()
            .resource()
            .read_subresource(0)
            .chunks_exact(4)
            .all(|d| f32::from_le_bytes([d[0], d[1], d[2], d[3]]) == 1.0));
    }

    #[test]
    fn test_failed_resize_keeps_previous_targets() {
        let (mut context, control) = context();
        let held = context.swap_chain().raw().buffer(0).unwrap();

        let err = context.resize(8, 6).unwrap_err();
        assert!(!err.is_device_lost());
        assert!(!context.is_device_lost());
        assert!(context.swap_chain().is_complete());
        assert_eq!(context.extent(), (4, 3));
        assert_eq!(context.swap_chain().back_buffer_states().len(), 2);

        render_frame(&mut context).unwrap();
        assert!(control.validation_errors().is_empty());

        drop(held);
        context.resize(8, 6).unwrap();
        assert_eq!(context.extent(), (8, 6));
        render_frame(&mut context).unwrap();
    }

    #[test]
    fn test_srv_slot_zero_is_reserved() {
        let (mut context, _control) = context();
        assert_eq!(context.srv_allocator_mut().allocate().unwrap(), 1);
        assert_eq!(context.srv_allocator().heap().capacity(), 128);
    }

    #[test]
    fn test_immediate_submission_between_frames() {
        let (mut context, control) = context();
        let size = context
            .immediate(|device, _list| {
                let buffer = device.create_committed_resource(
                    &crate::gfx::types::ResourceDescriptor::upload_buffer(16, "scratch"),
                )?;
                Ok(buffer.desc().byte_size())
            })
            .unwrap();

        assert_eq!(size, 16);
        assert_eq!(control.executed_command_lists(), 1);
        render_frame(&mut context).unwrap();
        assert!(control.validation_errors().is_empty());
    }

    #[test]
    #[should_panic(expected = "post_draw called out of order")]
    fn test_post_draw_without_pre_draw_panics() {
        let (mut context, _control) = context();
        let _ = context.post_draw();
    }

    #[test]
    #[should_panic(expected = "pre_draw called out of order")]
    fn test_double_pre_draw_panics() {
        let (mut context, _control) = context();
        context.pre_draw().unwrap();
        let _ = context.pre_draw();
    }

    #[test]
    fn test_empty_surface_is_rejected() {
        let device = SoftDevice::headless();
        let result = GraphicsContext::<Soft>::new(device, &SurfaceTarget::headless(0, 0), &GraphicsConfig::default());
        assert!(result.is_err());
    }
}
