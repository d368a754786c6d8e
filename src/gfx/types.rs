//! 后端无关的图形数据类型
//!
//! 这些类型是各后端（DX12、软件后端）之间共享的“词汇”：像素格式、资源状态、
//! 资源描述、视口等。后端负责把它们映射为各自的原生结构。

/// 像素 / 深度格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// 未指定（缓冲区）
    Unknown,
    /// 交换链缓冲区存储格式
    Rgba8Unorm,
    /// 交换链 RTV 与纹理采样格式
    Rgba8UnormSrgb,
    /// 深度缓冲格式
    D32Float,
    /// 24 位深度 + 8 位模板
    D24UnormS8Uint,
    /// 顶点属性格式
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
}

impl Format {
    /// 每个像素占用的字节数
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Format::Unknown => 1,
            Format::Rgba8Unorm | Format::Rgba8UnormSrgb => 4,
            Format::D32Float | Format::D24UnormS8Uint => 4,
            Format::Rg32Float => 8,
            Format::Rgb32Float => 12,
            Format::Rgba32Float => 16,
        }
    }

    /// 是否为深度格式
    pub fn is_depth(&self) -> bool {
        matches!(self, Format::D32Float | Format::D24UnormS8Uint)
    }
}

/// 资源状态
///
/// CPU 端为每个资源显式记录的状态标签。屏障的 "before" 必须等于当前记录的状态，
/// 见 [`crate::renderer::state::TrackedResource`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    DepthWrite,
    DepthRead,
    CopySource,
    CopyDest,
    GenericRead,
    PixelShaderResource,
    VertexAndConstantBuffer,
}

/// 堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapType {
    /// GPU 本地显存
    Default,
    /// CPU 可写、GPU 可读
    Upload,
}

/// 资源维度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDimension {
    Buffer { size: u64 },
    Texture2D {
        width: u32,
        height: u32,
        mip_levels: u32,
        format: Format,
    },
}

/// 资源的优化清除值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color { format: Format, color: [f32; 4] },
    DepthStencil { format: Format, depth: f32, stencil: u8 },
}

/// 提交资源（committed resource）描述
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub dimension: ResourceDimension,
    pub heap: HeapType,
    pub initial_state: ResourceState,
    pub allow_depth_stencil: bool,
    pub clear_value: Option<ClearValue>,
    pub name: String,
}

impl ResourceDescriptor {
    /// Upload 堆上的缓冲区，GENERIC_READ 状态
    pub fn upload_buffer(size: u64, name: impl Into<String>) -> Self {
        Self {
            dimension: ResourceDimension::Buffer { size },
            heap: HeapType::Upload,
            initial_state: ResourceState::GenericRead,
            allow_depth_stencil: false,
            clear_value: None,
            name: name.into(),
        }
    }

    /// 资源占用的字节数（纹理按所有 mip 紧密排列计算）
    pub fn byte_size(&self) -> u64 {
        match self.dimension {
            ResourceDimension::Buffer { size } => size,
            ResourceDimension::Texture2D { width, height, mip_levels, format } => {
                (0..mip_levels)
                    .map(|mip| {
                        let (w, h) = mip_extent(width, height, mip);
                        w as u64 * h as u64 * format.bytes_per_pixel() as u64
                    })
                    .sum()
            }
        }
    }
}

/// 第 `mip` 级的尺寸（最小为 1）
pub fn mip_extent(width: u32, height: u32, mip: u32) -> (u32, u32) {
    ((width >> mip).max(1), (height >> mip).max(1))
}

/// 视口
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// 覆盖整个客户区的视口
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 裁剪矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

/// 缓冲区中一个纹理子资源的布局（对应 D3D12_PLACED_SUBRESOURCE_FOOTPRINT）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceFootprint {
    /// 在上传缓冲区中的偏移，512 字节对齐
    pub offset: u64,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    /// 行跨度，256 字节对齐
    pub row_pitch: u32,
}

/// 资源状态转换屏障
#[derive(Debug, Clone, Copy)]
pub struct TransitionBarrier<'a, R> {
    pub resource: &'a R,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// 顶点缓冲区视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub location: u64,
    pub size_in_bytes: u32,
    pub stride_in_bytes: u32,
}

/// 图元拓扑
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    LineList,
}

/// 根参数对哪些着色器阶段可见
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderVisibility {
    All,
    Vertex,
    Pixel,
}

/// 根签名中的一个参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootParameter {
    /// 根 CBV，直接绑定常量缓冲区的 GPU 地址
    ConstantBufferView { register: u32, visibility: ShaderVisibility },
    /// 从着色器可见的 SRV 堆中取连续 `count` 个 SRV
    ShaderResourceTable {
        base_register: u32,
        count: u32,
        visibility: ShaderVisibility,
    },
}

/// 静态采样器：三线性过滤、三个方向都 wrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticSampler {
    pub register: u32,
    pub visibility: ShaderVisibility,
}

/// 根签名描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSignatureDescriptor {
    pub parameters: Vec<RootParameter>,
    pub static_samplers: Vec<StaticSampler>,
    pub name: String,
}

/// 输入布局中的一个顶点属性，全部来自 0 号槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputElement {
    pub semantic: &'static str,
    pub semantic_index: u32,
    pub format: Format,
    pub offset: u32,
}

/// 背面剔除方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// 深度比较函数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Less,
    LessEqual,
    Always,
}

/// 图形管线状态描述
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDescriptor<'a, S> {
    pub root_signature: &'a S,
    pub vertex_shader: &'a [u8],
    pub pixel_shader: &'a [u8],
    pub input_layout: &'a [InputElement],
    pub cull_mode: CullMode,
    pub depth_compare: CompareFunction,
    pub render_target_format: Format,
    pub depth_format: Format,
    pub name: &'a str,
}

impl<S> GraphicsPipelineDescriptor<'_, S> {
    /// 输入布局覆盖的顶点跨度
    pub fn vertex_stride(&self) -> u32 {
        self.input_layout
            .iter()
            .map(|e| e.offset + e.format.bytes_per_pixel())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_extent_clamps_to_one() {
        assert_eq!(mip_extent(256, 64, 0), (256, 64));
        assert_eq!(mip_extent(256, 64, 6), (4, 1));
        assert_eq!(mip_extent(256, 64, 8), (1, 1));
    }

    #[test]
    fn test_texture_byte_size_covers_all_mips() {
        let desc = ResourceDescriptor {
            dimension: ResourceDimension::Texture2D {
                width: 4,
                height: 4,
                mip_levels: 3,
                format: Format::Rgba8UnormSrgb,
            },
            heap: HeapType::Default,
            initial_state: ResourceState::CopyDest,
            allow_depth_stencil: false,
            clear_value: None,
            name: "tex".into(),
        };

        // 16 + 4 + 1 个像素
        assert_eq!(desc.byte_size(), 21 * 4);
    }

    #[test]
    fn test_vertex_stride_follows_last_element() {
        let layout = [
            InputElement { semantic: "POSITION", semantic_index: 0, format: Format::Rgba32Float, offset: 0 },
            InputElement { semantic: "TEXCOORD", semantic_index: 0, format: Format::Rg32Float, offset: 16 },
            InputElement { semantic: "NORMAL", semantic_index: 0, format: Format::Rgb32Float, offset: 24 },
        ];
        let desc = GraphicsPipelineDescriptor {
            root_signature: &(),
            vertex_shader: &[],
            pixel_shader: &[],
            input_layout: &layout,
            cull_mode: CullMode::Back,
            depth_compare: CompareFunction::LessEqual,
            render_target_format: Format::Rgba8UnormSrgb,
            depth_format: Format::D32Float,
            name: "test",
        };
        assert_eq!(desc.vertex_stride(), 36);
    }
}
