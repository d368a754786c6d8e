//! 配置管理模块
//!
//! 提供渲染核心配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//! title = "Lucent"
//! resizable = true
//!
//! [graphics]
//! backend = "dx12"            # 或 "soft"
//! back_buffer_count = 2
//! vsync = true
//! clear_color = [0.1, 0.25, 0.5, 1.0]
//! fence_timeout_ms = 5000     # 0 表示无限等待
//! srv_heap_capacity = 128
//!
//! [assets]
//! shader_dir = "resources/shaders"
//! model = "resources/plane.obj"
//!
//! [logging]
//! level = "info"              # trace, debug, info, warn, error
//! file_output = true
//!
//! [crash]
//! dump_dir = "Dumps"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{ConfigError, Result};

/// 交换链缓冲区数量的合法范围（DXGI flip 模型的限制）
pub const BACK_BUFFER_COUNT_RANGE: std::ops::RangeInclusive<u32> = 2..=16;

/// 渲染核心配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 资源文件配置
    #[serde(default)]
    pub assets: AssetsConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 崩溃转储配置
    #[serde(default)]
    pub crash: CrashConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// 窗口客户区宽度
    #[serde(default = "default_width")]
    pub width: u32,

    /// 窗口客户区高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// 窗口标题
    #[serde(default = "default_title")]
    pub title: String,

    /// 是否可调整大小
    #[serde(default = "default_resizable")]
    pub resizable: bool,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 交换链后台缓冲区数量
    #[serde(default = "default_back_buffer_count")]
    pub back_buffer_count: u32,

    /// 垂直同步（Present 的 sync interval 为 1）
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// 每帧渲染目标的清屏颜色 (RGBA)
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],

    /// 等待 GPU 栅栏的超时时间（毫秒），0 表示无限等待
    #[serde(default = "default_fence_timeout_ms")]
    pub fence_timeout_ms: u64,

    /// 着色器可见 SRV 堆的容量
    #[serde(default = "default_srv_heap_capacity")]
    pub srv_heap_capacity: u32,

    /// 是否启用调试层
    #[serde(default = "default_debug_layer")]
    pub debug_layer: bool,

    /// 是否启用 GPU 端验证（需要调试层）
    #[serde(default = "default_gpu_based_validation")]
    pub gpu_based_validation: bool,

    /// 软件后端无窗口运行时渲染的帧数
    #[serde(default = "default_headless_frames")]
    pub headless_frames: u32,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// DirectX 12 后端（仅 Windows）
    Dx12,
    /// 软件参考后端（无窗口，任何平台）
    Soft,
}

/// 资源文件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// HLSL 着色器目录
    #[serde(default = "default_shader_dir")]
    pub shader_dir: String,

    /// 演示用 OBJ 模型路径
    #[serde(default)]
    pub model: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 崩溃转储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashConfig {
    /// 转储文件目录
    #[serde(default = "default_dump_dir")]
    pub dump_dir: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_title() -> String { "Lucent".to_string() }
fn default_resizable() -> bool { true }
fn default_backend() -> GraphicsBackend {
    if cfg!(target_os = "windows") { GraphicsBackend::Dx12 } else { GraphicsBackend::Soft }
}
fn default_back_buffer_count() -> u32 { 2 }
fn default_vsync() -> bool { true }
fn default_clear_color() -> [f32; 4] { [0.1, 0.25, 0.5, 1.0] }
fn default_fence_timeout_ms() -> u64 { 5000 }
fn default_srv_heap_capacity() -> u32 { 128 }
fn default_debug_layer() -> bool { cfg!(debug_assertions) }
fn default_gpu_based_validation() -> bool { false }
fn default_headless_frames() -> u32 { 3 }
fn default_shader_dir() -> String { "resources/shaders".to_string() }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "lucent.log".to_string() }
fn default_dump_dir() -> String { "Dumps".to_string() }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            resizable: default_resizable(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            back_buffer_count: default_back_buffer_count(),
            vsync: default_vsync(),
            clear_color: default_clear_color(),
            fence_timeout_ms: default_fence_timeout_ms(),
            srv_heap_capacity: default_srv_heap_capacity(),
            debug_layer: default_debug_layer(),
            gpu_based_validation: default_gpu_based_validation(),
            headless_frames: default_headless_frames(),
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            shader_dir: default_shader_dir(),
            model: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self { dump_dir: default_dump_dir() }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 示例
    ///
    /// ```no_run
    /// use lucent::core::Config;
    ///
    /// let config = Config::from_file("config.toml")?;
    /// # Ok::<(), lucent::core::LucentError>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12`: 使用 DirectX 12 后端
    /// - `--soft`: 使用软件参考后端
    /// - `--width <value>` / `--height <value>`: 窗口尺寸
    /// - `--frames <value>`: 软件后端渲染的帧数
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--soft") {
            self.graphics.backend = GraphicsBackend::Soft;
        }

        if let Some(width) = parse_flag_value(&args, "--width") {
            self.window.width = width;
        }

        if let Some(height) = parse_flag_value(&args, "--height") {
            self.window.height = height;
        }

        if let Some(frames) = parse_flag_value(&args, "--frames") {
            self.graphics.headless_frames = frames;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(invalid(
                "window.width/height",
                "Window dimensions must be greater than 0",
            ));
        }

        if !BACK_BUFFER_COUNT_RANGE.contains(&self.graphics.back_buffer_count) {
            return Err(invalid(
                "graphics.back_buffer_count",
                "Back buffer count must be between 2 and 16",
            ));
        }

        if self.graphics.srv_heap_capacity == 0 {
            return Err(invalid(
                "graphics.srv_heap_capacity",
                "Descriptor heap capacity must be greater than 0",
            ));
        }

        if self.graphics.clear_color.iter().any(|c| !c.is_finite()) {
            return Err(invalid(
                "graphics.clear_color",
                "Clear color components must be finite",
            ));
        }

        if self.graphics.gpu_based_validation && !self.graphics.debug_layer {
            return Err(invalid(
                "graphics.gpu_based_validation",
                "GPU based validation requires the debug layer",
            ));
        }

        Ok(())
    }
}

impl GraphicsConfig {
    /// Present 使用的 sync interval
    pub fn sync_interval(&self) -> u32 {
        if self.vsync { 1 } else { 0 }
    }

    /// 栅栏等待超时，`None` 表示无限等待
    pub fn fence_timeout(&self) -> Option<Duration> {
        match self.fence_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Dx12 => "DirectX 12",
            GraphicsBackend::Soft => "Software",
        }
    }
}

fn parse_flag_value<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    let idx = args.iter().position(|a| a == flag)?;
    args.get(idx + 1)?.parse().ok()
}

fn invalid(field: &str, reason: &str) -> super::error::LucentError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.back_buffer_count, 2);
        assert_eq!(config.graphics.clear_color, [0.1, 0.25, 0.5, 1.0]);
        assert_eq!(config.graphics.sync_interval(), 1);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.graphics.gpu_based_validation = false;
        assert!(config.validate().is_ok());

        config.window.width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.graphics.back_buffer_count = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.graphics.srv_heap_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            backend = "soft"
            fence_timeout_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.backend, GraphicsBackend::Soft);
        assert_eq!(config.graphics.fence_timeout(), None);
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.crash.dump_dir, "Dumps");
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["lucent", "--soft", "--width", "640", "--frames", "10", "--height", "oops"]);

        assert_eq!(config.graphics.backend, GraphicsBackend::Soft);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.headless_frames, 10);
    }
}
