//! D3DCompile 着色器编译

use std::ffi::CString;

use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::Fxc::*;
use windows::Win32::Graphics::Direct3D::ID3DBlob;

use crate::core::error::{GraphicsError, Result};

fn blob_bytes(blob: &ID3DBlob) -> Vec<u8> {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer().cast::<u8>(), blob.GetBufferSize()).to_vec() }
}

pub fn compile_hlsl(source: &[u8], name: &str, entry: &str, profile: &str) -> Result<Vec<u8>> {
    let to_cstring = |s: &str| {
        CString::new(s).map_err(|_| GraphicsError::ShaderCompilation(format!("Invalid shader argument '{}'", s)))
    };
    let entry_c = to_cstring(entry)?;
    let profile_c = to_cstring(profile)?;
    let name_c = to_cstring(name)?;

    let flags = if cfg!(debug_assertions) {
        D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
    } else {
        D3DCOMPILE_OPTIMIZATION_LEVEL3
    };

    let mut code: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let result = unsafe {
        D3DCompile(
            source.as_ptr().cast(),
            source.len(),
            PCSTR::from_raw(name_c.as_ptr().cast()),
            None,
            None,
            PCSTR::from_raw(entry_c.as_ptr().cast()),
            PCSTR::from_raw(profile_c.as_ptr().cast()),
            flags,
            0,
            &mut code,
            Some(&mut errors),
        )
    };

    if let Err(e) = result {
        let message = errors
            .as_ref()
            .map(|blob| String::from_utf8_lossy(&blob_bytes(blob)).trim_end_matches('\0').to_string())
            .unwrap_or_else(|| e.to_string());
        return Err(GraphicsError::ShaderCompilation(format!("{} ({}): {}", name, profile, message)).into());
    }

    code.map(|blob| blob_bytes(&blob))
        .ok_or_else(|| GraphicsError::ShaderCompilation(format!("{} produced no bytecode", name)).into())
}
