//! Lucent - 基于显式图形 API 的实时渲染核心
//!
//! 核心内容是帧生命周期与 GPU 资源/同步模型：设备、队列、交换链、描述符堆的构建，
//! 每帧命令列表的录制协议，以及基于栅栏的 CPU/GPU 同步。
//!
//! # 模块结构
//!
//! - `core`：配置、日志、错误处理、崩溃转储
//! - `gfx`：后端抽象层，DirectX 12（Windows）和软件参考后端
//! - `renderer`：与后端无关的渲染核心，入口是 [`renderer::GraphicsContext`]
//! - `assets`：着色器、模型和纹理加载
//!
//! # 使用示例
//!
//! ```no_run
//! use lucent::core::config::GraphicsConfig;
//! use lucent::gfx::backend::SurfaceTarget;
//! use lucent::gfx::soft::{Soft, SoftDevice};
//! use lucent::renderer::GraphicsContext;
//!
//! let device = SoftDevice::headless();
//! let mut context =
//!     GraphicsContext::<Soft>::new(device, &SurfaceTarget::headless(1280, 720), &GraphicsConfig::default())?;
//!
//! context.pre_draw()?;
//! // 在返回的命令列表中录制绘制命令
//! context.post_draw()?;
//! # Ok::<(), lucent::core::LucentError>(())
//! ```

pub mod assets;
pub mod core;
pub mod gfx;
pub mod renderer;
