//! 错误处理模块
//!
//! 定义了渲染核心中使用的统一错误类型。
//!
//! # 设计原则
//!
//! - 环境性失败（设备创建、交换链、资源分配）以 `Err` 值向上传播
//! - 状态不变量被破坏（重复 Close、GPU 未完成时重置分配器、越界描述符索引）
//!   属于编程错误，直接 panic
//! - 资源文件缺失是可捕获的 [`AssetError`]，并携带工作目录提示
//! - `DeviceLost` 与其他图形错误区分开，调用方据此决定是否整体重建上下文

use std::fmt;
use std::path::PathBuf;

/// 渲染核心统一的 Result 类型
pub type Result<T> = std::result::Result<T, LucentError>;

/// Lucent 的错误类型
#[derive(Debug)]
pub enum LucentError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// 资源文件（着色器、纹理、模型）错误
    Asset(AssetError),

    /// IO 错误
    Io(std::io::Error),

    /// 日志系统错误
    Log(String),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件不存在
    FileNotFound(String),

    /// 解析失败
    ParseError(String),

    /// 字段值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备、适配器或命令队列创建失败
    DeviceCreation(String),

    /// 交换链错误
    SwapchainError(String),

    /// 着色器编译失败
    ShaderCompilation(String),

    /// 资源或描述符堆创建失败
    ResourceCreation(String),

    /// 命令列表关闭、提交或重置失败
    CommandExecution(String),

    /// 设备丢失（设备移除、重置或栅栏等待超时），需要整体重建
    DeviceLost(String),

    /// 当前平台不支持
    Unsupported(String),
}

/// 资源文件种类，用于错误消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Shader,
    Texture,
    Model,
}

/// 资源文件错误
#[derive(Debug)]
pub enum AssetError {
    /// 文件不存在
    FileNotFound { path: PathBuf, kind: AssetKind },

    /// 图像解码失败
    Decode(String),

    /// 模型/材质解析失败
    Parse(String),

    /// 数据校验失败
    InvalidData(String),
}

impl LucentError {
    /// 是否为设备丢失
    pub fn is_device_lost(&self) -> bool {
        matches!(self, LucentError::Graphics(GraphicsError::DeviceLost(_)))
    }
}

impl AssetKind {
    pub fn name(&self) -> &'static str {
        match self {
            AssetKind::Shader => "shader",
            AssetKind::Texture => "texture",
            AssetKind::Model => "model",
        }
    }
}

impl fmt::Display for LucentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LucentError::Config(e) => write!(f, "Configuration error: {}", e),
            LucentError::Graphics(e) => write!(f, "Graphics error: {}", e),
            LucentError::Asset(e) => write!(f, "Asset error: {}", e),
            LucentError::Io(e) => write!(f, "IO error: {}", e),
            LucentError::Log(msg) => write!(f, "Log error: {}", msg),
            LucentError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            LucentError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::SwapchainError(msg) => write!(f, "Swapchain error: {}", msg),
            GraphicsError::ShaderCompilation(msg) => write!(f, "Shader compilation failed: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
            GraphicsError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
        }
    }
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::FileNotFound { path, kind } => write!(
                f,
                "{} file not found: {} (check that the working directory is the project root, \
                 or copy the resources directory next to the executable)",
                kind.name(),
                path.display()
            ),
            AssetError::Decode(msg) => write!(f, "Failed to decode image: {}", msg),
            AssetError::Parse(msg) => write!(f, "Failed to parse asset: {}", msg),
            AssetError::InvalidData(msg) => write!(f, "Invalid asset data: {}", msg),
        }
    }
}

impl std::error::Error for LucentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LucentError::Io(e) => Some(e),
            LucentError::Config(e) => Some(e),
            LucentError::Graphics(e) => Some(e),
            LucentError::Asset(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for AssetError {}

impl From<std::io::Error> for LucentError {
    fn from(err: std::io::Error) -> Self {
        LucentError::Io(err)
    }
}

impl From<ConfigError> for LucentError {
    fn from(err: ConfigError) -> Self {
        LucentError::Config(err)
    }
}

impl From<GraphicsError> for LucentError {
    fn from(err: GraphicsError) -> Self {
        LucentError::Graphics(err)
    }
}

impl From<AssetError> for LucentError {
    fn from(err: AssetError) -> Self {
        LucentError::Asset(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_asset_message_has_hint() {
        let err: LucentError = AssetError::FileNotFound {
            path: PathBuf::from("resources/shaders/object.vs.hlsl"),
            kind: AssetKind::Shader,
        }
        .into();

        let msg = err.to_string();
        assert!(msg.contains("shader file not found"));
        assert!(msg.contains("object.vs.hlsl"));
        assert!(msg.contains("working directory"));
    }

    #[test]
    fn test_device_lost_is_distinguished() {
        let lost: LucentError = GraphicsError::DeviceLost("fence timeout".into()).into();
        let other: LucentError = GraphicsError::CommandExecution("close failed".into()).into();

        assert!(lost.is_device_lost());
        assert!(!other.is_device_lost());
    }
}
