//! 命令列表管理模块
//!
//! 渲染核心只有一个直接队列、一个命令分配器和一个命令列表。
//! [`CommandContext`] 把这三者放在一起，并用显式的状态机守护它们的使用顺序。
//!
//! # 设计原则
//!
//! - **先关闭再提交**：只有 `Closed` 的列表可以提交
//! - **GPU 完成后才重置**：分配器重置前，最近一次提交之后 signal 的栅栏值必须已经完成
//! - **违反顺序即编程错误**：直接 panic，而不是返回错误
//!
//! # 状态转换
//!
//! ```text
//! Recording --close--> Closed --submit--> Pending --reset--> Recording
//! ```

use tracing::trace;

use crate::core::error::Result;
use crate::gfx::backend::{Backend, CommandAllocator, CommandList, Device, Queue};

use super::sync::FenceValue;

/// 命令列表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    /// 正在录制
    Recording,
    /// 已关闭，可以提交
    Closed,
    /// 已提交给 GPU
    Pending,
}

/// 单队列、单分配器、单命令列表的命令上下文
pub struct CommandContext<B: Backend> {
    queue: B::Queue,
    allocator: B::CommandAllocator,
    list: B::CommandList,
    state: CommandListState,
    /// 最近一次提交之后 signal 的栅栏值
    guard_value: Option<FenceValue>,
    reset_count: u64,
}

impl<B: Backend> CommandContext<B> {
    /// 创建直接队列、分配器和命令列表，列表处于录制状态
    pub fn new(device: &B::Device) -> Result<Self> {
        let queue = device.create_command_queue()?;
        let allocator = device.create_command_allocator()?;
        let list = device.create_command_list(&allocator)?;

        Ok(Self {
            queue,
            allocator,
            list,
            state: CommandListState::Recording,
            guard_value: None,
            reset_count: 0,
        })
    }

    /// 正在录制的命令列表
    ///
    /// # Panics
    ///
    /// 列表不在录制状态时 panic。
    pub fn list(&self) -> &B::CommandList {
        assert_eq!(
            self.state,
            CommandListState::Recording,
            "command list is not recording"
        );
        &self.list
    }

    pub fn queue(&self) -> &B::Queue {
        &self.queue
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    /// 分配器被成功重置的次数
    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    /// 关闭命令列表
    pub fn close(&mut self) -> Result<()> {
        assert_eq!(
            self.state,
            CommandListState::Recording,
            "closing a command list that is not recording"
        );
        self.list.close()?;
        self.state = CommandListState::Closed;
        Ok(())
    }

    /// 提交已关闭的命令列表
    pub fn submit(&mut self) {
        assert_eq!(
            self.state,
            CommandListState::Closed,
            "submitting a command list that is not closed"
        );
        self.queue.execute(&self.list);
        self.state = CommandListState::Pending;
        self.guard_value = None;
        trace!("Command list submitted");
    }

    /// 记录提交之后 signal 的栅栏值，GPU 完成该值后分配器才能重置
    pub fn guard_with(&mut self, value: FenceValue) {
        self.guard_value = Some(value);
    }

    /// 重置分配器和命令列表，重新开始录制
    ///
    /// # Panics
    ///
    /// - 列表正在录制
    /// - 已提交但没有登记栅栏值
    /// - 登记的栅栏值尚未被 GPU 完成
    pub fn reset(&mut self, completed: FenceValue) -> Result<()> {
        match self.state {
            CommandListState::Recording => panic!("resetting a command list that is still recording"),
            CommandListState::Pending => {
                let guard = self
                    .guard_value
                    .unwrap_or_else(|| panic!("resetting command allocator without a fence guard"));
                assert!(
                    completed >= guard,
                    "resetting command allocator while GPU work is in flight (completed {}, required {})",
                    completed.value(),
                    guard.value()
                );
            }
            CommandListState::Closed => {}
        }

        self.allocator.reset()?;
        self.list.reset(&self.allocator)?;
        self.state = CommandListState::Recording;
        self.reset_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::soft::{Soft, SoftDevice};

    #[test]
    fn test_command_context_state_machine() {
        let device = SoftDevice::headless();
        let mut ctx = CommandContext::<Soft>::new(&device).unwrap();
        assert_eq!(ctx.state(), CommandListState::Recording);

        ctx.close().unwrap();
        assert_eq!(ctx.state(), CommandListState::Closed);

        ctx.submit();
        assert_eq!(ctx.state(), CommandListState::Pending);

        ctx.guard_with(FenceValue::new(1));
        ctx.reset(FenceValue::new(1)).unwrap();
        assert_eq!(ctx.state(), CommandListState::Recording);
        assert_eq!(ctx.reset_count(), 1);
    }

    #[test]
    #[should_panic(expected = "not recording")]
    fn test_double_close_panics() {
        let device = SoftDevice::headless();
        let mut ctx = CommandContext::<Soft>::new(&device).unwrap();
        ctx.close().unwrap();
        let _ = ctx.close();
    }

    #[test]
    #[should_panic(expected = "GPU work is in flight")]
    fn test_reset_before_completion_panics() {
        let device = SoftDevice::headless();
        let mut ctx = CommandContext::<Soft>::new(&device).unwrap();
        ctx.close().unwrap();
        ctx.submit();
        ctx.guard_with(FenceValue::new(3));
        let _ = ctx.reset(FenceValue::new(2));
    }

    #[test]
    #[should_panic(expected = "without a fence guard")]
    fn test_reset_without_guard_panics() {
        let device = SoftDevice::headless();
        let mut ctx = CommandContext::<Soft>::new(&device).unwrap();
        ctx.close().unwrap();
        ctx.submit();
        let _ = ctx.reset(FenceValue::new(100));
    }
}
