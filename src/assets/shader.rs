//! HLSL 着色器加载
//!
//! 源码从磁盘读入后交给设备编译：DirectX 12 走 D3DCompile，
//! 软件后端只做入口点检查。文件缺失时返回带工作目录提示的 `AssetError::FileNotFound`。

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::core::error::{AssetError, AssetKind, Result};
use crate::gfx::backend::{Backend, Device};

/// 顶点着色器文件名
pub const VERTEX_SHADER_FILE: &str = "object.vs.hlsl";
/// 像素着色器文件名
pub const PIXEL_SHADER_FILE: &str = "object.ps.hlsl";

/// 编译后的着色器代码
#[derive(Debug, Clone)]
pub struct ShaderBlob {
    pub bytecode: Vec<u8>,
    pub entry: String,
    pub profile: String,
    pub path: PathBuf,
}

impl ShaderBlob {
    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }
}

/// 用 `device` 编译一个 HLSL 文件
pub fn compile_shader_file<B: Backend>(
    device: &B::Device,
    path: impl AsRef<Path>,
    entry: &str,
    profile: &str,
) -> Result<ShaderBlob> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(AssetError::FileNotFound {
            path: path.to_path_buf(),
            kind: AssetKind::Shader,
        }
        .into());
    }

    debug!(path = %path.display(), entry, profile, "Begin compiling shader");
    let source = fs::read(path)?;
    let bytecode = device.compile_shader(&source, &path.display().to_string(), entry, profile)?;
    info!(path = %path.display(), profile, bytes = bytecode.len(), "Shader compiled");

    Ok(ShaderBlob {
        bytecode,
        entry: entry.to_string(),
        profile: profile.to_string(),
        path: path.to_path_buf(),
    })
}

/// 编译 `shader_dir` 下的顶点/像素着色器对
pub fn compile_object_shaders<B: Backend>(
    device: &B::Device,
    shader_dir: impl AsRef<Path>,
) -> Result<(ShaderBlob, ShaderBlob)> {
    let dir = shader_dir.as_ref();
    let vs = compile_shader_file::<B>(device, dir.join(VERTEX_SHADER_FILE), "main", "vs_5_0")?;
    let ps = compile_shader_file::<B>(device, dir.join(PIXEL_SHADER_FILE), "main", "ps_5_0")?;
    Ok((vs, ps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{GraphicsError, LucentError};
    use crate::gfx::soft::{Soft, SoftDevice};

    fn bundled_shader_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("resources/shaders")
    }

    #[test]
    fn test_missing_shader_reports_working_directory_hint() {
        let device = SoftDevice::headless();
        let path = std::env::temp_dir().join("lucent-missing-shader.vs.hlsl");
        let err = compile_shader_file::<Soft>(&device, &path, "main", "vs_5_0").unwrap_err();

        assert!(matches!(
            err,
            LucentError::Asset(AssetError::FileNotFound { kind: AssetKind::Shader, .. })
        ));
        assert!(err.to_string().contains("working directory"));
    }

    #[test]
    fn test_bundled_shaders_compile() {
        let device = SoftDevice::headless();
        let (vs, ps) = compile_object_shaders::<Soft>(&device, bundled_shader_dir()).unwrap();

        assert_eq!(vs.profile, "vs_5_0");
        assert_eq!(ps.profile, "ps_5_0");
        assert!(!vs.is_empty() && !ps.is_empty());
    }

    #[test]
    fn test_missing_entry_point_fails() {
        let device = SoftDevice::headless();
        let path = bundled_shader_dir().join(VERTEX_SHADER_FILE);
        let err = compile_shader_file::<Soft>(&device, &path, "VSMain", "vs_5_0").unwrap_err();
        assert!(matches!(err, LucentError::Graphics(GraphicsError::ShaderCompilation(_))));
    }
}
