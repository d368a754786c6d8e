//! OBJ 模型加载与 GPU 模型
//!
//! OBJ 使用右手坐标系，渲染器使用左手坐标系，加载时做如下转换：
//!
//! - 位置和法线的 X 取反
//! - 纹理坐标 V 翻转（`v = 1 - v`）
//! - 三角形顶点顺序反转，保持正面朝向
//!
//! 材质只取 `map_Kd` 指定的漫反射纹理路径（相对 OBJ 所在目录）。

use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Rotation3, Vector3};
use tracing::{info, warn};

use crate::core::error::{AssetError, AssetKind, Result};
use crate::gfx::backend::{Backend, CommandList, Resource};
use crate::gfx::types::VertexBufferView;
use crate::renderer::descriptor::GpuDescriptorHandle;
use crate::renderer::pipeline::{ROOT_MATERIAL, ROOT_TEXTURE, ROOT_TRANSFORM};
use crate::renderer::resource::{BufferUsageType, UploadBuffer};

/// 顶点格式：位置、纹理坐标、法线
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 4],
    pub texcoord: [f32; 2],
    pub normal: [f32; 3],
}

/// 材质文件中读到的信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialData {
    pub texture_path: Option<PathBuf>,
}

/// 展开为三角形列表的模型
#[derive(Debug, Clone, Default)]
pub struct ModelData {
    pub vertices: Vec<Vertex>,
    pub material: MaterialData,
}

/// 从 OBJ 文件加载模型
pub fn load_obj(path: impl AsRef<Path>) -> Result<ModelData> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(AssetError::FileNotFound {
            path: path.to_path_buf(),
            kind: AssetKind::Model,
        }
        .into());
    }

    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, materials) = tobj::load_obj(path, &options)
        .map_err(|e| AssetError::Parse(format!("{}: {}", path.display(), e)))?;

    let mut vertices = Vec::new();
    for model in &models {
        let mesh = &model.mesh;
        let vertex_at = |index: u32| -> Result<Vertex> {
            let i = index as usize;
            let position = mesh
                .positions
                .get(i * 3..i * 3 + 3)
                .ok_or_else(|| AssetError::InvalidData(format!("Position index {} out of range", index)))?;
            let texcoord = mesh.texcoords.get(i * 2..i * 2 + 2).unwrap_or(&[0.0, 1.0]);
            let normal = mesh.normals.get(i * 3..i * 3 + 3).unwrap_or(&[0.0, 0.0, 0.0]);

            Ok(Vertex {
                position: [-position[0], position[1], position[2], 1.0],
                texcoord: [texcoord[0], 1.0 - texcoord[1]],
                normal: [-normal[0], normal[1], normal[2]],
            })
        };

        for triangle in mesh.indices.chunks_exact(3) {
            for &index in triangle.iter().rev() {
                vertices.push(vertex_at(index)?);
            }
        }
    }

    if vertices.is_empty() {
        return Err(AssetError::InvalidData(format!("{} contains no triangles", path.display())).into());
    }

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let texture_path = match materials {
        Ok(materials) => materials
            .iter()
            .find_map(|m| m.diffuse_texture.as_ref())
            .map(|texture| base_dir.join(texture)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to load material library");
            None
        }
    };

    info!(
        path = %path.display(),
        vertices = vertices.len(),
        texture = ?texture_path,
        "Model loaded"
    );

    Ok(ModelData {
        vertices,
        material: MaterialData { texture_path },
    })
}

/// 像素着色器常量：颜色、是否光照、UV 变换
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Material {
    pub color: [f32; 4],
    pub enable_lighting: i32,
    pub padding: [f32; 3],
    pub uv_transform: [[f32; 4]; 4],
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0, 1.0],
            enable_lighting: 1,
            padding: [0.0; 3],
            uv_transform: Matrix4::<f32>::identity().into(),
        }
    }
}

/// 顶点着色器常量：WVP 与世界矩阵（列主序）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TransformationMatrix {
    pub wvp: [[f32; 4]; 4],
    pub world: [[f32; 4]; 4],
}

impl Default for TransformationMatrix {
    fn default() -> Self {
        let identity: [[f32; 4]; 4] = Matrix4::<f32>::identity().into();
        Self { wvp: identity, world: identity }
    }
}

/// 缩放、欧拉角旋转（X、Y、Z 顺序）、平移
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: Vector3<f32>,
    pub rotate: Vector3<f32>,
    pub translate: Vector3<f32>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            scale: Vector3::new(1.0, 1.0, 1.0),
            rotate: Vector3::zeros(),
            translate: Vector3::zeros(),
        }
    }
}

impl Transform {
    /// 仿射矩阵，先缩放、再旋转、最后平移
    pub fn matrix(&self) -> Matrix4<f32> {
        let rotation = Rotation3::from_euler_angles(self.rotate.x, self.rotate.y, self.rotate.z);
        Matrix4::new_translation(&self.translate)
            * rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&self.scale)
    }
}

/// 左手坐标系透视投影，深度映射到 [0, 1]
pub fn perspective_fov(fov_y: f32, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    let y_scale = 1.0 / (fov_y * 0.5).tan();
    let x_scale = y_scale / aspect;
    let range = far / (far - near);

    #[rustfmt::skip]
    let m = Matrix4::new(
        x_scale, 0.0,     0.0,   0.0,
        0.0,     y_scale, 0.0,   0.0,
        0.0,     0.0,     range, -range * near,
        0.0,     0.0,     1.0,   0.0,
    );
    m
}

/// 顶点缓冲区加材质、变换两个常量缓冲区
pub struct GpuModel<B: Backend> {
    vertices: UploadBuffer<B, Vertex>,
    material: UploadBuffer<B, Material>,
    transform: UploadBuffer<B, TransformationMatrix>,
    vertex_count: u32,
}

impl<B: Backend> GpuModel<B> {
    pub fn new(device: &B::Device, model: &ModelData) -> Result<Self> {
        let mut vertices =
            UploadBuffer::new(device, model.vertices.len(), BufferUsageType::Vertex, "Model Vertices")?;
        vertices.copy_slice(&model.vertices);

        let mut material = UploadBuffer::new(device, 1, BufferUsageType::Constant, "Material")?;
        material.copy_data(0, &Material::default());

        let mut transform = UploadBuffer::new(device, 1, BufferUsageType::Constant, "TransformationMatrix")?;
        transform.copy_data(0, &TransformationMatrix::default());

        Ok(Self {
            vertices,
            material,
            transform,
            vertex_count: model.vertices.len() as u32,
        })
    }

    /// 写入本帧的世界矩阵与观察投影矩阵
    pub fn update_transform(&mut self, world: &Matrix4<f32>, view_projection: &Matrix4<f32>) {
        let wvp = view_projection * world;
        self.transform.copy_data(
            0,
            &TransformationMatrix {
                wvp: wvp.into(),
                world: (*world).into(),
            },
        );
    }

    pub fn update_material(&mut self, material: &Material) {
        self.material.copy_data(0, material);
    }

    pub fn material(&self) -> Material {
        self.material.read_data(0)
    }

    pub fn transformation(&self) -> TransformationMatrix {
        self.transform.read_data(0)
    }

    pub fn vertex_buffer_view(&self) -> VertexBufferView {
        VertexBufferView {
            location: self.vertices.resource().gpu_virtual_address(),
            size_in_bytes: self.vertices.total_size() as u32,
            stride_in_bytes: std::mem::size_of::<Vertex>() as u32,
        }
    }

    pub fn material_address(&self) -> u64 {
        self.material.element_gpu_address(0)
    }

    pub fn transform_address(&self) -> u64 {
        self.transform.element_gpu_address(0)
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// 绑定顶点缓冲区、两个常量缓冲区和纹理并绘制
    ///
    /// 调用前必须已经绑定物体管线（`ObjectPipeline::bind`）。
    pub fn draw(&self, list: &B::CommandList, texture: GpuDescriptorHandle) {
        list.set_vertex_buffer(&self.vertex_buffer_view());
        list.set_graphics_root_constant_buffer_view(ROOT_MATERIAL, self.material_address());
        list.set_graphics_root_constant_buffer_view(ROOT_TRANSFORM, self.transform_address());
        list.set_graphics_root_descriptor_table(ROOT_TEXTURE, texture);
        list.draw_instanced(self.vertex_count, 1, 0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::shader;
    use crate::assets::texture::{GpuTexture, TextureData};
    use crate::core::config::GraphicsConfig;
    use crate::core::error::LucentError;
    use crate::gfx::backend::SurfaceTarget;
    use crate::gfx::soft::{Soft, SoftDevice, SoftGpuControl};
    use crate::renderer::pipeline::ObjectPipeline;
    use crate::renderer::GraphicsContext;
    use nalgebra::Vector4;
    use std::fs;

    const TRIANGLE_OBJ: &str = "\
mtllib triangle.mtl
v 1.0 2.0 3.0
v 4.0 5.0 6.0
v 7.0 8.0 9.0
vt 0.0 0.25
vt 1.0 0.0
vt 0.5 1.0
vn 0.0 0.0 1.0
vn 1.0 0.0 0.0
vn 0.0 1.0 0.0
f 1/1/1 2/2/2 3/3/3
";

    fn write_triangle(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lucent-model-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("triangle.obj"), TRIANGLE_OBJ).unwrap();
        fs::write(dir.join("triangle.mtl"), "newmtl material\nmap_Kd checker.png\n").unwrap();
        dir
    }

    #[test]
    fn test_obj_is_converted_to_left_handed() {
        let dir = write_triangle("convert");
        let model = load_obj(dir.join("triangle.obj")).unwrap();

        assert_eq!(model.vertices.len(), 3);
        // 顶点顺序反转
        assert_eq!(model.vertices[0].position, [-7.0, 8.0, 9.0, 1.0]);
        assert_eq!(model.vertices[2].position, [-1.0, 2.0, 3.0, 1.0]);
        // V 翻转
        assert_eq!(model.vertices[0].texcoord, [0.5, 0.0]);
        assert_eq!(model.vertices[2].texcoord, [0.0, 0.75]);
        // 法线 X 取反
        assert_eq!(model.vertices[1].normal, [-1.0, 0.0, 0.0]);
        assert_eq!(model.material.texture_path, Some(dir.join("checker.png")));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_model() {
        let err = load_obj(std::env::temp_dir().join("lucent-no-such-model.obj")).unwrap_err();
        assert!(matches!(
            err,
            LucentError::Asset(AssetError::FileNotFound { kind: AssetKind::Model, .. })
        ));
    }

    #[test]
    fn test_transform_matrix_order() {
        let transform = Transform {
            scale: Vector3::new(2.0, 2.0, 2.0),
            rotate: Vector3::zeros(),
            translate: Vector3::new(1.0, 0.0, 0.0),
        };
        let p = transform.matrix() * Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert_eq!(p, Vector4::new(3.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_perspective_maps_depth_range() {
        let proj = perspective_fov(0.45, 16.0 / 9.0, 0.1, 100.0);
        let near = proj * Vector4::new(0.0, 0.0, 0.1, 1.0);
        let far = proj * Vector4::new(0.0, 0.0, 100.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_gpu_model_buffers() {
        let device = SoftDevice::headless();
        let dir = write_triangle("gpu");
        let model = load_obj(dir.join("triangle.obj")).unwrap();
        let mut gpu = GpuModel::<Soft>::new(&device, &model).unwrap();

        let view = gpu.vertex_buffer_view();
        assert_eq!(view.stride_in_bytes, 36);
        assert_eq!(view.size_in_bytes, 36 * 3);
        assert_eq!(gpu.vertex_count(), 3);
        assert_eq!(gpu.material(), Material::default());

        let world = Matrix4::new_translation(&Vector3::new(0.0, 0.0, 5.0));
        let view_projection = Matrix4::new_scaling(2.0);
        gpu.update_transform(&world, &view_projection);
        let expected: [[f32; 4]; 4] = (view_projection * world).into();
        assert_eq!(gpu.transformation().wvp, expected);
        assert_eq!(gpu.transform_address() % 256, 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    fn model_scene() -> (GraphicsContext<Soft>, SoftGpuControl, ObjectPipeline<Soft>, GpuModel<Soft>, GpuTexture<Soft>) {
        let device = SoftDevice::headless();
        let control = device.control();
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("resources/shaders");
        let (vs, ps) = shader::compile_object_shaders::<Soft>(&device, dir).unwrap();

        let mut context =
            GraphicsContext::<Soft>::new(device, &SurfaceTarget::headless(4, 4), &GraphicsConfig::default()).unwrap();
        let pipeline = ObjectPipeline::<Soft>::new(context.device(), &vs, &ps).unwrap();

        let data = ModelData {
            vertices: vec![Vertex::default(); 3],
            material: MaterialData::default(),
        };
        let model = GpuModel::<Soft>::new(context.device(), &data).unwrap();
        let texture = GpuTexture::upload(&mut context, &TextureData::solid([255, 255, 255, 255]).unwrap(), "white")
            .unwrap();
        (context, control, pipeline, model, texture)
    }

    #[test]
    fn test_draw_binds_everything_the_pipeline_needs() {
        let (mut context, control, pipeline, model, texture) = model_scene();

        let list = context.pre_draw().unwrap();
        pipeline.bind(list);
        model.draw(list, texture.gpu_handle());
        context.post_draw().unwrap();

        assert_eq!(control.validation_errors(), Vec::<String>::new());
        assert_eq!(control.draw_calls(), 1);
        assert_eq!(control.drawn_vertices(), 3);
    }

    #[test]
    fn test_draw_without_pipeline_is_rejected() {
        let (mut context, control, _pipeline, model, texture) = model_scene();

        let list = context.pre_draw().unwrap();
        model.draw(list, texture.gpu_handle());
        context.post_draw().unwrap();

        assert_eq!(control.draw_calls(), 0);
        let errors = control.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("root signature"));
    }

    #[test]
    fn test_pipeline_binding_does_not_carry_across_frames() {
        let (mut context, control, pipeline, model, texture) = model_scene();

        let list = context.pre_draw().unwrap();
        pipeline.bind(list);
        context.post_draw().unwrap();

        let list = context.pre_draw().unwrap();
        model.draw(list, texture.gpu_handle());
        context.post_draw().unwrap();

        assert_eq!(control.draw_calls(), 0);
        assert!(!control.validation_errors().is_empty());
    }
}
