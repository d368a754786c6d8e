//! 核心功能模块
//!
//! 与具体图形 API 无关的基础设施：日志系统、配置管理、错误处理和崩溃转储。
//!
//! # 模块组织
//!
//! - `log`：日志系统，基于 `tracing`
//! - `config`：配置管理，支持从 TOML 文件和命令行参数加载
//! - `error`：错误处理，定义统一的错误类型
//! - `crash`：panic 时写出崩溃转储

pub mod config;
pub mod crash;
pub mod error;
pub mod log;

// 重新导出常用类型，方便使用
pub use config::Config;
pub use error::{AssetError, AssetKind, ConfigError, GraphicsError, LucentError, Result};
