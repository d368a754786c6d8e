//! 帧生命周期
//!
//! 每一帧严格按下面的顺序推进，任何偏离都是编程错误：
//!
//! ```text
//! Idle --pre_draw--> Recording --post_draw--> Submitted --> Presented --> Idle
//! ```
//!
//! `pre_draw` 把当前后台缓冲区从 PRESENT 转到 RENDER_TARGET，绑定 RTV/DSV，
//! 清除颜色与深度并设置视口和裁剪矩形；`post_draw` 转回 PRESENT、
//! 关闭并提交命令列表、呈现、signal 栅栏并等待 GPU 完成，最后重置分配器。
//! 等待超时视为设备丢失，此时分配器保持原状。

use tracing::{debug, trace};

use crate::core::error::Result;
use crate::gfx::backend::{Backend, CommandList};
use crate::gfx::types::{ResourceState, ScissorRect, Viewport};

use super::command::{CommandContext, CommandListState};
use super::depth::DepthTarget;
use super::descriptor::DescriptorHeap;
use super::swapchain::SwapChainManager;
use super::sync::{FenceValue, FrameFence};

/// 帧所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// 两帧之间
    Idle,
    /// `pre_draw` 之后，正在录制绘制命令
    Recording,
    /// 命令列表已提交
    Submitted,
    /// 已呈现，正在等待 GPU
    Presented,
}

/// 每帧固定的参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSettings {
    pub clear_color: [f32; 4],
    pub sync_interval: u32,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.1, 0.25, 0.5, 1.0],
            sync_interval: 1,
        }
    }
}

/// 驱动帧状态机
pub struct FrameController<B: Backend> {
    fence: FrameFence<B>,
    commands: CommandContext<B>,
    phase: FramePhase,
    back_buffer_index: u32,
    viewport: Viewport,
    scissor: ScissorRect,
    settings: FrameSettings,
    frame_count: u64,
}

impl<B: Backend> FrameController<B> {
    pub fn new(
        commands: CommandContext<B>,
        fence: FrameFence<B>,
        settings: FrameSettings,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            fence,
            commands,
            phase: FramePhase::Idle,
            back_buffer_index: 0,
            viewport: Viewport::full(width, height),
            scissor: ScissorRect::full(width, height),
            settings,
            frame_count: 0,
        }
    }

    /// 开始一帧，返回可以继续录制绘制命令的命令列表
    ///
    /// # Panics
    ///
    /// 不在 `Idle` 阶段时 panic。
    pub fn pre_draw(
        &mut self,
        swap_chain: &mut SwapChainManager<B>,
        depth: &DepthTarget<B>,
        srv_heap: Option<&DescriptorHeap<B>>,
    ) -> &B::CommandList {
        assert_eq!(self.phase, FramePhase::Idle, "pre_draw called out of order");

        let index = swap_chain.current_back_buffer_index();
        let rtv = swap_chain.rtv(index);
        let list = self.commands.list();

        list.resource_barrier(&[swap_chain
            .back_buffer_mut(index)
            .transition(ResourceState::Present, ResourceState::RenderTarget)]);
        list.set_render_targets(rtv, Some(depth.dsv()));
        list.clear_render_target_view(rtv, self.settings.clear_color);
        list.clear_depth_stencil_view(depth.dsv(), 1.0);
        list.set_viewport(&self.viewport);
        list.set_scissor_rect(&self.scissor);
        if let Some(heap) = srv_heap {
            list.set_descriptor_heaps(&[heap.raw()]);
        }

        self.back_buffer_index = index;
        self.phase = FramePhase::Recording;
        trace!(frame = self.frame_count, back_buffer = index, "Frame recording");
        list
    }

    /// 结束一帧：提交、呈现并等待 GPU 完成
    ///
    /// 返回错误时帧停在出错的阶段，调用方应当重建整个图形上下文。
    ///
    /// # Panics
    ///
    /// 不在 `Recording` 阶段时 panic。
    pub fn post_draw(&mut self, swap_chain: &mut SwapChainManager<B>) -> Result<()> {
        assert_eq!(self.phase, FramePhase::Recording, "post_draw called out of order");

        let index = self.back_buffer_index;
        self.commands.list().resource_barrier(&[swap_chain
            .back_buffer_mut(index)
            .transition(ResourceState::RenderTarget, ResourceState::Present)]);

        self.commands.close()?;
        self.commands.submit();
        self.phase = FramePhase::Submitted;

        swap_chain.present(self.settings.sync_interval)?;
        self.phase = FramePhase::Presented;

        let value = self.fence.signal(self.commands.queue())?;
        self.commands.guard_with(value);
        self.fence.wait_for_gpu()?;

        self.commands.reset(self.fence.completed_value())?;
        self.phase = FramePhase::Idle;
        self.frame_count += 1;
        trace!(frame = self.frame_count, fence = value.value(), "Frame complete");
        Ok(())
    }

    /// 在两帧之间录制一段命令并同步执行完
    ///
    /// 用于加载期的纹理上传，`record` 返回的值（例如中间缓冲区）
    /// 在 GPU 执行完之后才交还给调用方。
    pub fn immediate<T>(&mut self, record: impl FnOnce(&B::CommandList) -> Result<T>) -> Result<T> {
        assert_eq!(self.phase, FramePhase::Idle, "immediate submission during a frame");

        let value = record(self.commands.list())?;
        self.commands.close()?;
        self.commands.submit();

        let fence = self.fence.signal(self.commands.queue())?;
        self.commands.guard_with(fence);
        self.fence.wait_for_gpu()?;
        self.commands.reset(self.fence.completed_value())?;
        debug!(fence = fence.value(), "Immediate command list executed");
        Ok(value)
    }

    /// 排空队列上的全部工作
    pub fn flush(&mut self) -> Result<()> {
        self.fence.flush(self.commands.queue())
    }

    /// 更新视口和裁剪矩形
    pub fn set_extent(&mut self, width: u32, height: u32) {
        self.viewport = Viewport::full(width, height);
        self.scissor = ScissorRect::full(width, height);
    }

    /// 正在录制的命令列表
    pub fn command_list(&self) -> &B::CommandList {
        self.commands.list()
    }

    pub fn queue(&self) -> &B::Queue {
        self.commands.queue()
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn command_list_state(&self) -> CommandListState {
        self.commands.state()
    }

    /// 已完成的帧数
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn allocator_reset_count(&self) -> u64 {
        self.commands.reset_count()
    }

    pub fn requested_fence_value(&self) -> FenceValue {
        self.fence.requested_value()
    }

    pub fn completed_fence_value(&self) -> FenceValue {
        self.fence.completed_value()
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn scissor(&self) -> &ScissorRect {
        &self.scissor
    }

    pub fn settings(&self) -> &FrameSettings {
        &self.settings
    }
}
