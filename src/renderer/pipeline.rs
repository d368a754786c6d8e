//! 物体管线
//!
//! 根签名布局与 `object.vs.hlsl` / `object.ps.hlsl` 对应：
//!
//! | 根参数 | 类型 | 阶段 | 寄存器 |
//! |--------|------|------|--------|
//! | 0 | CBV，材质 | PS | b0 |
//! | 1 | CBV，变换矩阵 | VS | b0 |
//! | 2 | 描述符表，漫反射纹理 | PS | t0 |
//!
//! 另有一个 PS 可见的静态采样器 s0。管线开启背面剔除和 LESS_EQUAL 深度测试，
//! 输出到 sRGB 渲染目标。

use tracing::info;

use crate::assets::shader::ShaderBlob;
use crate::core::error::Result;
use crate::gfx::backend::{Backend, CommandList, Device};
use crate::gfx::types::{
    CompareFunction, CullMode, Format, GraphicsPipelineDescriptor, InputElement, PrimitiveTopology, RootParameter,
    RootSignatureDescriptor, ShaderVisibility, StaticSampler,
};

use super::resource::DEPTH_FORMAT;
use super::swapchain::RENDER_TARGET_VIEW_FORMAT;

pub const ROOT_MATERIAL: u32 = 0;
pub const ROOT_TRANSFORM: u32 = 1;
pub const ROOT_TEXTURE: u32 = 2;

/// 与 `assets::model::Vertex` 的内存布局一致
pub const OBJECT_INPUT_LAYOUT: [InputElement; 3] = [
    InputElement { semantic: "POSITION", semantic_index: 0, format: Format::Rgba32Float, offset: 0 },
    InputElement { semantic: "TEXCOORD", semantic_index: 0, format: Format::Rg32Float, offset: 16 },
    InputElement { semantic: "NORMAL", semantic_index: 0, format: Format::Rgb32Float, offset: 24 },
];

fn object_root_signature() -> RootSignatureDescriptor {
    RootSignatureDescriptor {
        parameters: vec![
            RootParameter::ConstantBufferView { register: 0, visibility: ShaderVisibility::Pixel },
            RootParameter::ConstantBufferView { register: 0, visibility: ShaderVisibility::Vertex },
            RootParameter::ShaderResourceTable { base_register: 0, count: 1, visibility: ShaderVisibility::Pixel },
        ],
        static_samplers: vec![StaticSampler { register: 0, visibility: ShaderVisibility::Pixel }],
        name: "Object Root Signature".to_string(),
    }
}

pub struct ObjectPipeline<B: Backend> {
    pipeline: B::PipelineState,
    root_signature: B::RootSignature,
}

impl<B: Backend> ObjectPipeline<B> {
    pub fn new(device: &B::Device, vs: &ShaderBlob, ps: &ShaderBlob) -> Result<Self> {
        let root_signature = device.create_root_signature(&object_root_signature())?;
        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDescriptor {
            root_signature: &root_signature,
            vertex_shader: &vs.bytecode,
            pixel_shader: &ps.bytecode,
            input_layout: &OBJECT_INPUT_LAYOUT,
            cull_mode: CullMode::Back,
            depth_compare: CompareFunction::LessEqual,
            render_target_format: RENDER_TARGET_VIEW_FORMAT,
            depth_format: DEPTH_FORMAT,
            name: "Object Pipeline",
        })?;

        info!(backend = B::NAME, "Object pipeline created");
        Ok(Self { pipeline, root_signature })
    }

    /// 绑定根签名、管线状态和三角形列表拓扑
    pub fn bind(&self, list: &B::CommandList) {
        list.set_graphics_root_signature(&self.root_signature);
        list.set_pipeline_state(&self.pipeline);
        list.set_primitive_topology(PrimitiveTopology::TriangleList);
    }

    pub fn root_signature(&self) -> &B::RootSignature {
        &self.root_signature
    }

    pub fn pipeline_state(&self) -> &B::PipelineState {
        &self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::model::Vertex;
    use crate::assets::shader;
    use crate::gfx::soft::{Soft, SoftDevice};
    use std::path::Path;

    fn shaders(device: &SoftDevice) -> (ShaderBlob, ShaderBlob) {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("resources/shaders");
        shader::compile_object_shaders::<Soft>(device, dir).unwrap()
    }

    #[test]
    fn test_input_layout_matches_vertex() {
        let stride: u32 = OBJECT_INPUT_LAYOUT
            .iter()
            .map(|e| e.offset + e.format.bytes_per_pixel())
            .max()
            .unwrap();
        assert_eq!(stride as usize, std::mem::size_of::<Vertex>());
        assert_eq!(OBJECT_INPUT_LAYOUT[1].offset as usize, std::mem::offset_of!(Vertex, texcoord));
        assert_eq!(OBJECT_INPUT_LAYOUT[2].offset as usize, std::mem::offset_of!(Vertex, normal));
    }

    #[test]
    fn test_root_signature_layout() {
        let device = SoftDevice::headless();
        let (vs, ps) = shaders(&device);
        let pipeline = ObjectPipeline::<Soft>::new(&device, &vs, &ps).unwrap();

        let parameters = pipeline.root_signature().parameters();
        assert_eq!(parameters.len(), 3);
        assert!(matches!(
            parameters[ROOT_MATERIAL as usize],
            RootParameter::ConstantBufferView { register: 0, visibility: ShaderVisibility::Pixel }
        ));
        assert!(matches!(
            parameters[ROOT_TRANSFORM as usize],
            RootParameter::ConstantBufferView { register: 0, visibility: ShaderVisibility::Vertex }
        ));
        assert!(matches!(
            parameters[ROOT_TEXTURE as usize],
            RootParameter::ShaderResourceTable { base_register: 0, count: 1, .. }
        ));
        assert_eq!(pipeline.pipeline_state().vertex_stride(), 36);
    }

    #[test]
    fn test_pipeline_rejects_missing_bytecode() {
        let device = SoftDevice::headless();
        let (vs, mut ps) = shaders(&device);
        ps.bytecode.clear();
        assert!(ObjectPipeline::<Soft>::new(&device, &vs, &ps).is_err());
    }
}
