//! GPU 同步机制模块
//!
//! 整个渲染核心只有一个全局有序的完成标记：帧栅栏。
//! CPU 侧维护“已请求”的值，GPU 侧的栅栏对象报告“已完成”的值。
//!
//! # 设计原则
//!
//! - **单调递增**：每次 `signal` 恰好加 1
//! - **不提前返回**：`wait_for_gpu` 只有在 `completed >= requested` 时才返回成功
//! - **有界等待**：超时视为设备丢失，返回 `GraphicsError::DeviceLost`
//!
//! # 使用场景
//!
//! 1. **帧同步**：`post_draw` 中每帧 signal + wait，保证下一帧重置分配器是安全的
//! 2. **排空**：窗口尺寸变化和销毁前 `flush`

use std::time::Duration;

use tracing::{debug, error, trace};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{Backend, Device, Fence, Queue};

/// Fence 值
///
/// 用于CPU-GPU同步的单调递增值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// 获取内部值
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 递增Fence值
    pub fn increment(&mut self) {
        self.0 += 1;
    }

    /// 下一个Fence值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// 帧栅栏
///
/// 持有一个后端栅栏和 CPU 侧最近请求的值。
pub struct FrameFence<B: Backend> {
    fence: B::Fence,
    requested: FenceValue,
    timeout: Option<Duration>,
}

impl<B: Backend> FrameFence<B> {
    /// 创建初始值为 0 的栅栏
    pub fn new(device: &B::Device, timeout: Option<Duration>) -> Result<Self> {
        let fence = device.create_fence(0)?;
        debug!(timeout_ms = timeout.map(|t| t.as_millis() as u64), "Frame fence created");

        Ok(Self {
            fence,
            requested: FenceValue::default(),
            timeout,
        })
    }

    /// 请求值加 1 并在队列上排入信号
    pub fn signal(&mut self, queue: &B::Queue) -> Result<FenceValue> {
        self.requested.increment();
        queue.signal(&self.fence, self.requested.value())?;
        trace!(value = self.requested.value(), "Fence signaled");
        Ok(self.requested)
    }

    /// 阻塞直到 GPU 完成最近一次请求的值
    ///
    /// 超时返回 `GraphicsError::DeviceLost`。
    pub fn wait_for_gpu(&self) -> Result<()> {
        self.wait_for_value(self.requested)
    }

    /// 阻塞直到 GPU 完成 `value`
    pub fn wait_for_value(&self, value: FenceValue) -> Result<()> {
        if self.fence.completed_value() >= value.value() {
            return Ok(());
        }

        trace!(value = value.value(), completed = self.fence.completed_value(), "Waiting for GPU");

        if !self.fence.wait_for_value(value.value(), self.timeout)? {
            let completed = self.fence.completed_value();
            error!(
                requested = value.value(),
                completed,
                timeout_ms = self.timeout.map(|t| t.as_millis() as u64),
                "Fence wait timed out"
            );
            return Err(GraphicsError::DeviceLost(format!(
                "GPU did not reach fence value {} (completed {}) within {:?}",
                value.value(),
                completed,
                self.timeout
            ))
            .into());
        }

        debug_assert!(self.fence.completed_value() >= value.value());
        Ok(())
    }

    /// signal 后等待，排空队列中的全部工作
    pub fn flush(&mut self, queue: &B::Queue) -> Result<()> {
        self.signal(queue)?;
        self.wait_for_gpu()
    }

    /// CPU 侧最近请求的值
    pub fn requested_value(&self) -> FenceValue {
        self.requested
    }

    /// GPU 已完成的值
    pub fn completed_value(&self) -> FenceValue {
        FenceValue::new(self.fence.completed_value())
    }

    /// 是否还有已提交但未完成的工作
    pub fn is_idle(&self) -> bool {
        self.completed_value() >= self.requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::Device;
    use crate::gfx::soft::{ExecutionMode, Soft, SoftDevice};
    use std::thread;

    #[test]
    fn test_fence_value() {
        let mut v = FenceValue::new(10);
        assert_eq!(v.next().value(), 11);
        v.increment();
        assert_eq!(v.value(), 11);
        assert!(FenceValue::new(5) < FenceValue::new(10));
    }

    #[test]
    fn test_signal_increments_by_one() {
        let device = SoftDevice::headless();
        let queue = device.create_command_queue().unwrap();
        let mut fence = FrameFence::<Soft>::new(&device, None).unwrap();

        for expected in 1..=5 {
            assert_eq!(fence.signal(&queue).unwrap().value(), expected);
        }
        fence.wait_for_gpu().unwrap();
        assert_eq!(fence.completed_value().value(), 5);
        assert!(fence.is_idle());
    }

    #[test]
    fn test_stalled_gpu_times_out_as_device_lost() {
        let device = SoftDevice::with_mode(ExecutionMode::Manual);
        let queue = device.create_command_queue().unwrap();
        let mut fence =
            FrameFence::<Soft>::new(&device, Some(Duration::from_millis(20))).unwrap();

        fence.signal(&queue).unwrap();
        let err = fence.wait_for_gpu().unwrap_err();

        assert!(err.is_device_lost());
        assert_eq!(fence.completed_value().value(), 0);
        assert!(!fence.is_idle());
    }

    #[test]
    fn test_wait_blocks_until_gpu_completes() {
        let device = SoftDevice::with_mode(ExecutionMode::Manual);
        let control = device.control();
        let queue = device.create_command_queue().unwrap();
        let mut fence = FrameFence::<Soft>::new(&device, None).unwrap();

        fence.signal(&queue).unwrap();
        let gpu = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            control.retire_all();
        });

        fence.wait_for_gpu().unwrap();
        assert!(fence.completed_value() >= fence.requested_value());
        gpu.join().unwrap();
    }
}
