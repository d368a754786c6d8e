//! 图形后端模块
//!
//! 本模块封装了具体图形 API 的底层实现：
//! - DirectX 12：Windows 平台的呈现后端
//! - Soft：进程内的软件参考后端，用于无窗口运行和测试
//!
//! 两个后端都实现了 `backend` 中的统一 trait，
//! 渲染核心对 `B: Backend` 泛型化，不关心具体使用的是哪个后端。

pub mod adapter;
pub mod backend;
#[cfg(target_os = "windows")]
pub mod dx12;
pub mod soft;
pub mod types;

pub use backend::Backend;
