//! 纹理加载
//!
//! 图像解码后一律按 sRGB 的 RGBA8 处理，并生成到 1x1 的完整 mip 链。
//! [`GpuTexture`] 负责把解码结果上传到 GPU 并在 SRV 堆中创建视图。

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::{debug, info};

use crate::core::error::{AssetError, AssetKind, Result};
use crate::gfx::backend::{Backend, Device};
use crate::gfx::types::Format;
use crate::renderer::descriptor::{CpuDescriptorHandle, GpuDescriptorHandle};
use crate::renderer::resource::{create_texture_resource, upload_texture_data, MipLevel, TextureMetadata};
use crate::renderer::state::TrackedResource;
use crate::renderer::GraphicsContext;

/// 解码后的纹理
#[derive(Debug, Clone)]
pub struct TextureData {
    pub metadata: TextureMetadata,
    pub mips: Vec<MipLevel>,
}

/// 完整 mip 链的级数
pub fn mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// 从文件加载纹理
pub fn load_texture(path: impl AsRef<Path>) -> Result<TextureData> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(AssetError::FileNotFound {
            path: path.to_path_buf(),
            kind: AssetKind::Texture,
        }
        .into());
    }

    let image = image::open(path)
        .map_err(|e| AssetError::Decode(format!("{}: {}", path.display(), e)))?
        .to_rgba8();
    let texture = TextureData::from_image(image)?;

    info!(
        path = %path.display(),
        width = texture.metadata.width,
        height = texture.metadata.height,
        mips = texture.metadata.mip_levels,
        "Texture loaded"
    );
    Ok(texture)
}

/// 从内存中的编码图像加载纹理
pub fn load_texture_from_memory(bytes: &[u8]) -> Result<TextureData> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| AssetError::Decode(e.to_string()))?
        .to_rgba8();
    TextureData::from_image(image)
}

impl TextureData {
    /// 1x1 的纯色纹理，模型没有漫反射贴图时使用
    pub fn solid(rgba: [u8; 4]) -> Result<Self> {
        Self::from_image(RgbaImage::from_pixel(1, 1, image::Rgba(rgba)))
    }

    /// 以 `image` 为第 0 级生成 mip 链
    pub fn from_image(image: RgbaImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(AssetError::InvalidData(format!("Image has empty extent {}x{}", width, height)).into());
        }

        let mip_levels = mip_count(width, height);
        let mut mips = Vec::with_capacity(mip_levels as usize);
        let mut current = image;
        for level in 0..mip_levels {
            if level > 0 {
                let w = (current.width() / 2).max(1);
                let h = (current.height() / 2).max(1);
                current = imageops::resize(&current, w, h, FilterType::Triangle);
            }
            mips.push(MipLevel {
                width: current.width(),
                height: current.height(),
                data: current.as_raw().clone(),
            });
        }

        Ok(Self {
            metadata: TextureMetadata {
                width,
                height,
                mip_levels,
                format: Format::Rgba8UnormSrgb,
            },
            mips,
        })
    }
}

/// 已上传到 GPU 并带 SRV 的纹理
pub struct GpuTexture<B: Backend> {
    texture: TrackedResource<B::Resource>,
    srv_index: u32,
    cpu_handle: CpuDescriptorHandle,
    gpu_handle: GpuDescriptorHandle,
}

impl<B: Backend> GpuTexture<B> {
    /// 同步上传纹理数据，GPU 执行完复制后才释放中间缓冲区
    pub fn upload(context: &mut GraphicsContext<B>, data: &TextureData, name: &str) -> Result<Self> {
        let srv_index = context.srv_allocator_mut().allocate()?;
        let cpu_handle = context.srv_allocator().heap().cpu_handle(srv_index);
        let gpu_handle = context.srv_allocator().heap().gpu_handle(srv_index);

        let (texture, intermediate) = context.immediate(|device, list| {
            let mut texture = create_texture_resource::<B>(device, &data.metadata, name)?;
            let intermediate = upload_texture_data::<B>(device, list, &mut texture, &data.mips)?;
            Ok((texture, intermediate))
        })?;
        drop(intermediate);

        context
            .device()
            .create_shader_resource_view(texture.resource(), cpu_handle);
        debug!(name, srv_index, "Texture uploaded");

        Ok(Self {
            texture,
            srv_index,
            cpu_handle,
            gpu_handle,
        })
    }

    pub fn resource(&self) -> &B::Resource {
        self.texture.resource()
    }

    pub fn srv_index(&self) -> u32 {
        self.srv_index
    }

    pub fn cpu_handle(&self) -> CpuDescriptorHandle {
        self.cpu_handle
    }

    pub fn gpu_handle(&self) -> GpuDescriptorHandle {
        self.gpu_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GraphicsConfig;
    use crate::core::error::LucentError;
    use crate::gfx::backend::SurfaceTarget;
    use crate::gfx::soft::{Soft, SoftDevice};
    use crate::gfx::types::ResourceState;
    use image::Rgba;

    #[test]
    fn test_mip_count() {
        assert_eq!(mip_count(1, 1), 1);
        assert_eq!(mip_count(2, 2), 2);
        assert_eq!(mip_count(256, 64), 9);
        assert_eq!(mip_count(5, 3), 3);
    }

    #[test]
    fn test_mip_chain_halves_down_to_one() {
        let image = RgbaImage::from_pixel(8, 2, Rgba([255, 0, 0, 255]));
        let texture = TextureData::from_image(image).unwrap();

        let extents: Vec<_> = texture.mips.iter().map(|m| (m.width, m.height)).collect();
        assert_eq!(extents, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
        assert_eq!(texture.metadata.format, Format::Rgba8UnormSrgb);
        assert!(texture.mips.iter().all(|m| m.data.len() == (m.width * m.height * 4) as usize));
        assert_eq!(&texture.mips[3].data[..], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_load_texture_from_file() {
        let path = std::env::temp_dir().join(format!("lucent-texture-{}.png", std::process::id()));
        RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255])).save(&path).unwrap();

        let texture = load_texture(&path).unwrap();
        assert_eq!(texture.metadata.mip_levels, 3);
        assert_eq!(&texture.mips[0].data[..4], &[10, 20, 30, 255]);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_texture() {
        let err = load_texture(std::env::temp_dir().join("lucent-no-such-texture.png")).unwrap_err();
        assert!(matches!(
            err,
            LucentError::Asset(AssetError::FileNotFound { kind: AssetKind::Texture, .. })
        ));
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let err = load_texture_from_memory(b"definitely not an image").unwrap_err();
        assert!(matches!(err, LucentError::Asset(AssetError::Decode(_))));
    }

    #[test]
    fn test_upload_to_gpu() {
        let device = SoftDevice::headless();
        let control = device.control();
        let mut context =
            GraphicsContext::<Soft>::new(device, &SurfaceTarget::headless(4, 4), &GraphicsConfig::default())
                .unwrap();

        let data = TextureData::from_image(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 4]))).unwrap();
        let texture = GpuTexture::upload(&mut context, &data, "checker").unwrap();

        assert_eq!(texture.srv_index(), 1);
        assert_eq!(texture.resource().gpu_state(), ResourceState::GenericRead);
        assert_eq!(texture.resource().read_subresource(0), data.mips[0].data);
        assert_eq!(texture.resource().read_subresource(1), data.mips[1].data);

        context.pre_draw().unwrap();
        context.post_draw().unwrap();
        assert!(control.validation_errors().is_empty());
    }
}
