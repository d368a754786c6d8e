//! 渲染核心
//!
//! 与具体图形 API 无关的部分：帧生命周期、交换链与深度缓冲管理、
//! 描述符堆、栅栏同步、资源工厂。所有类型都对 `B: Backend` 泛型化，
//! 具体 API 的实现在 `gfx` 模块中。
//!
//! # 模块结构
//!
//! - `context`：[`GraphicsContext`]，持有全部 GPU 对象
//! - `frame`：`pre_draw` / `post_draw` 帧状态机
//! - `swapchain` / `depth`：呈现目标
//! - `descriptor`：描述符堆与线性分配器
//! - `sync`：帧栅栏
//! - `command`：命令队列、分配器与命令列表
//! - `resource`：缓冲区、深度纹理与采样纹理的创建和上传
//! - `state`：CPU 端资源状态跟踪
//! - `pipeline`：物体着色器的根签名与管线状态

pub mod command;
pub mod context;
pub mod depth;
pub mod descriptor;
pub mod frame;
pub mod pipeline;
pub mod resource;
pub mod state;
pub mod swapchain;
pub mod sync;

pub use context::GraphicsContext;
pub use frame::{FramePhase, FrameSettings};
