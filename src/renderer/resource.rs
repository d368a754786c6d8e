//! 资源工厂模块
//!
//! 创建渲染核心用到的几类提交资源，并提供上传路径：
//!
//! - Upload 堆缓冲区（顶点、常量），持久映射后由 CPU 直接写入
//! - 深度模板纹理（DEPTH_WRITE 初始状态，优化清除值 1.0）
//! - 采样纹理（COPY_DEST 初始状态），通过中间上传缓冲区写入数据
//!
//! # 设计原则
//!
//! - **自动对齐**：常量缓冲区按 256 字节对齐，纹理行跨度按 256 字节、子资源按 512 字节对齐
//! - **越界即编程错误**：映射缓冲区的读写越界时 panic
//! - **生命周期由调用方保证**：`upload_texture_data` 返回中间缓冲区，
//!   调用方必须让它活到 GPU 执行完复制命令

use std::marker::PhantomData;
use std::ptr::NonNull;

use bytemuck::Pod;
use tracing::debug;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{Backend, CommandList, Device, Resource};
use crate::gfx::types::{
    mip_extent, ClearValue, Format, HeapType, ResourceDescriptor, ResourceDimension, ResourceState,
    SubresourceFootprint,
};

use super::state::TrackedResource;

/// 深度缓冲格式，DSV 使用相同格式
pub const DEPTH_FORMAT: Format = Format::D32Float;

/// 常量缓冲区对齐
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 纹理行跨度对齐（D3D12_TEXTURE_DATA_PITCH_ALIGNMENT）
pub const TEXTURE_PITCH_ALIGNMENT: u32 = 256;

/// 子资源在上传缓冲区中的偏移对齐（D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT）
pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;

/// 缓冲区使用类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsageType {
    /// 顶点缓冲区
    Vertex,
    /// 常量缓冲区
    Constant,
    /// 上传缓冲区（CPU -> GPU 的中转）
    Upload,
}

impl BufferUsageType {
    /// 计算对齐后的大小（常量缓冲区要求 256 字节对齐）
    pub fn aligned_size(&self, size: u64) -> u64 {
        match self {
            BufferUsageType::Constant => align_up(size, CONSTANT_BUFFER_ALIGNMENT),
            _ => size,
        }
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// 创建 Upload 堆上的缓冲区
///
/// 堆类型 UPLOAD、维度 BUFFER、行主序布局、GENERIC_READ 状态。
pub fn create_buffer_resource<B: Backend>(
    device: &B::Device,
    size: u64,
    name: &str,
) -> Result<B::Resource> {
    if size == 0 {
        return Err(GraphicsError::ResourceCreation(format!("Buffer '{}' has zero size", name)).into());
    }

    device.create_committed_resource(&ResourceDescriptor::upload_buffer(size, name))
}

/// 创建深度模板纹理
///
/// 默认堆、DEPTH_WRITE 初始状态、优化清除值为深度 1.0。
pub fn create_depth_stencil_texture_resource<B: Backend>(
    device: &B::Device,
    width: u32,
    height: u32,
) -> Result<B::Resource> {
    device.create_committed_resource(&ResourceDescriptor {
        dimension: ResourceDimension::Texture2D {
            width,
            height,
            mip_levels: 1,
            format: DEPTH_FORMAT,
        },
        heap: HeapType::Default,
        initial_state: ResourceState::DepthWrite,
        allow_depth_stencil: true,
        clear_value: Some(ClearValue::DepthStencil {
            format: DEPTH_FORMAT,
            depth: 1.0,
            stencil: 0,
        }),
        name: "Depth Stencil".to_string(),
    })
}

/// 纹理元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureMetadata {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: Format,
}

/// 一个 mip 等级的像素数据（紧密排列）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// 根据元数据创建纹理资源
///
/// 默认堆、COPY_DEST 初始状态，之后用 [`upload_texture_data`] 写入数据。
pub fn create_texture_resource<B: Backend>(
    device: &B::Device,
    metadata: &TextureMetadata,
    name: &str,
) -> Result<TrackedResource<B::Resource>> {
    let resource = device.create_committed_resource(&ResourceDescriptor {
        dimension: ResourceDimension::Texture2D {
            width: metadata.width,
            height: metadata.height,
            mip_levels: metadata.mip_levels,
            format: metadata.format,
        },
        heap: HeapType::Default,
        initial_state: ResourceState::CopyDest,
        allow_depth_stencil: false,
        clear_value: None,
        name: name.to_string(),
    })?;

    Ok(TrackedResource::new(resource, ResourceState::CopyDest))
}

/// 计算各 mip 在上传缓冲区中的布局，返回布局和所需总字节数
pub fn copyable_footprints(metadata: &TextureMetadata) -> (Vec<SubresourceFootprint>, u64) {
    let bpp = metadata.format.bytes_per_pixel();
    let mut offset = 0u64;
    let mut footprints = Vec::with_capacity(metadata.mip_levels as usize);

    for mip in 0..metadata.mip_levels {
        let (width, height) = mip_extent(metadata.width, metadata.height, mip);
        let row_pitch = align_up((width * bpp) as u64, TEXTURE_PITCH_ALIGNMENT as u64) as u32;
        offset = align_up(offset, TEXTURE_PLACEMENT_ALIGNMENT);

        footprints.push(SubresourceFootprint {
            offset,
            format: metadata.format,
            width,
            height,
            row_pitch,
        });

        // 最后一行只需要实际数据长度
        offset += row_pitch as u64 * (height as u64 - 1) + (width * bpp) as u64;
    }

    (footprints, offset)
}

/// 把 mip 数据经由中间上传缓冲区复制到纹理，并转换到 GENERIC_READ
///
/// 返回中间缓冲区，必须保持存活直到 GPU 执行完这段命令。
pub fn upload_texture_data<B: Backend>(
    device: &B::Device,
    list: &B::CommandList,
    texture: &mut TrackedResource<B::Resource>,
    mips: &[MipLevel],
) -> Result<B::Resource> {
    let metadata = match texture.resource().desc().dimension {
        ResourceDimension::Texture2D { width, height, mip_levels, format } => TextureMetadata {
            width,
            height,
            mip_levels,
            format,
        },
        ResourceDimension::Buffer { .. } => {
            return Err(GraphicsError::ResourceCreation(
                "upload_texture_data target is a buffer".to_string(),
            )
            .into());
        }
    };

    if mips.len() != metadata.mip_levels as usize {
        return Err(GraphicsError::ResourceCreation(format!(
            "Texture has {} mip levels but {} were supplied",
            metadata.mip_levels,
            mips.len()
        ))
        .into());
    }

    let (footprints, total_size) = copyable_footprints(&metadata);
    let mut intermediate = MappedBuffer::<B>::new(device, total_size, "Texture Upload")?;
    let bpp = metadata.format.bytes_per_pixel() as usize;

    for (footprint, mip) in footprints.iter().zip(mips) {
        let row_bytes = footprint.width as usize * bpp;
        if mip.width != footprint.width
            || mip.height != footprint.height
            || mip.data.len() != row_bytes * footprint.height as usize
        {
            return Err(GraphicsError::ResourceCreation(format!(
                "Mip data {}x{} ({} bytes) does not match texture level {}x{}",
                mip.width,
                mip.height,
                mip.data.len(),
                footprint.width,
                footprint.height
            ))
            .into());
        }

        for (row, src) in mip.data.chunks_exact(row_bytes).enumerate() {
            let offset = footprint.offset as usize + row * footprint.row_pitch as usize;
            intermediate.write_bytes(offset, src);
        }
    }

    for (mip, footprint) in footprints.iter().enumerate() {
        list.copy_buffer_to_texture(texture.resource(), mip as u32, intermediate.resource(), footprint);
    }
    list.resource_barrier(&[texture.transition(ResourceState::CopyDest, ResourceState::GenericRead)]);

    debug!(
        width = metadata.width,
        height = metadata.height,
        mips = metadata.mip_levels,
        upload_bytes = total_size,
        "Texture upload recorded"
    );

    Ok(intermediate.into_resource())
}

/// 持久映射的 Upload 堆缓冲区
///
/// 创建时映射一次，销毁时解除映射。
pub struct MappedBuffer<B: Backend> {
    resource: B::Resource,
    ptr: NonNull<u8>,
    size: usize,
}

impl<B: Backend> MappedBuffer<B> {
    pub fn new(device: &B::Device, size: u64, name: &str) -> Result<Self> {
        let resource = create_buffer_resource::<B>(device, size, name)?;
        Self::from_resource(resource)
    }

    /// 映射一个已有的 Upload 堆缓冲区
    pub fn from_resource(resource: B::Resource) -> Result<Self> {
        let size = resource.desc().byte_size() as usize;
        // SAFETY: 指针只在本结构体存活期间使用，访问范围由 size 约束
        let ptr = unsafe { resource.map()? };
        Ok(Self { resource, ptr, size })
    }

    /// 在 `offset` 处写入字节
    ///
    /// # Panics
    ///
    /// 写入范围超出缓冲区大小时 panic。
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) {
        self.check_range(offset, data.len());
        // SAFETY: 范围已检查，映射在 self 存活期间有效
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
    }

    /// 在 `offset` 处写入 POD 切片
    pub fn write_slice<T: Pod>(&mut self, offset: usize, data: &[T]) {
        self.write_bytes(offset, bytemuck::cast_slice(data));
    }

    /// 读回 `[offset, offset + len)` 的字节
    pub fn read_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        self.check_range(offset, len);
        // SAFETY: 范围已检查，映射在 self 存活期间有效
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len).to_vec() }
    }

    fn check_range(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.size),
            "mapped buffer access [{}, {}) exceeds size {}",
            offset,
            offset.saturating_add(len),
            self.size
        );
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn resource(&self) -> &B::Resource {
        &self.resource
    }

    pub fn gpu_virtual_address(&self) -> u64 {
        self.resource.gpu_virtual_address()
    }

    /// 解除映射并交出资源
    pub fn into_resource(self) -> B::Resource {
        let this = std::mem::ManuallyDrop::new(self);
        this.resource.unmap();
        // SAFETY: this 不会再被 drop，资源只被读出一次
        unsafe { std::ptr::read(&this.resource) }
    }
}

impl<B: Backend> Drop for MappedBuffer<B> {
    fn drop(&mut self) {
        self.resource.unmap();
    }
}

/// 类型化的上传缓冲区
///
/// 每个元素按使用类型对齐（常量缓冲区 256 字节），用于每帧更新的常量和顶点数据。
pub struct UploadBuffer<B: Backend, T: Pod> {
    buffer: MappedBuffer<B>,
    element_count: usize,
    element_size: u64,
    _phantom: PhantomData<T>,
}

impl<B: Backend, T: Pod> UploadBuffer<B, T> {
    pub fn new(device: &B::Device, element_count: usize, usage: BufferUsageType, name: &str) -> Result<Self> {
        let element_size = usage.aligned_size(std::mem::size_of::<T>() as u64);
        let buffer = MappedBuffer::new(device, element_size * element_count as u64, name)?;

        Ok(Self {
            buffer,
            element_count,
            element_size,
            _phantom: PhantomData,
        })
    }

    /// 写入第 `index` 个元素
    pub fn copy_data(&mut self, index: usize, value: &T) {
        let offset = self.element_offset(index) as usize;
        self.buffer.write_bytes(offset, bytemuck::bytes_of(value));
    }

    /// 从第 0 个元素开始连续写入（仅适用于非对齐的顶点数据）
    pub fn copy_slice(&mut self, values: &[T]) {
        assert_eq!(
            self.element_size,
            std::mem::size_of::<T>() as u64,
            "copy_slice requires tightly packed elements"
        );
        self.buffer.write_slice(0, values);
    }

    /// 读回第 `index` 个元素
    pub fn read_data(&self, index: usize) -> T {
        let offset = self.element_offset(index) as usize;
        bytemuck::pod_read_unaligned(&self.buffer.read_bytes(offset, std::mem::size_of::<T>()))
    }

    /// 计算元素在缓冲区中的偏移量
    pub fn element_offset(&self, index: usize) -> u64 {
        assert!(index < self.element_count, "Index out of bounds");
        self.element_size * index as u64
    }

    /// 第 `index` 个元素的 GPU 虚拟地址
    pub fn element_gpu_address(&self, index: usize) -> u64 {
        self.buffer.gpu_virtual_address() + self.element_offset(index)
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    pub fn total_size(&self) -> u64 {
        self.element_size * self.element_count as u64
    }

    pub fn resource(&self) -> &B::Resource {
        self.buffer.resource()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::Queue;
    use crate::gfx::soft::{Soft, SoftDevice};
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct TestData {
        value: [f32; 4],
    }

    #[test]
    fn test_constant_buffer_alignment() {
        assert_eq!(BufferUsageType::Constant.aligned_size(100), 256);
        assert_eq!(BufferUsageType::Constant.aligned_size(300), 512);
        assert_eq!(BufferUsageType::Vertex.aligned_size(100), 100);
    }

    #[test]
    fn test_zero_size_buffer_is_rejected() {
        let device = SoftDevice::headless();
        assert!(create_buffer_resource::<Soft>(&device, 0, "empty").is_err());
    }

    #[test]
    fn test_mapped_buffer_round_trip() {
        let device = SoftDevice::headless();
        let mut buffer = MappedBuffer::<Soft>::new(&device, 64, "pattern").unwrap();
        let pattern: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(7)).collect();

        buffer.write_bytes(0, &pattern);
        assert_eq!(buffer.read_bytes(0, 64), pattern);
        assert_eq!(buffer.resource().read_subresource(0), pattern);
    }

    #[test]
    #[should_panic(expected = "exceeds size")]
    fn test_mapped_buffer_overflow_panics() {
        let device = SoftDevice::headless();
        let mut buffer = MappedBuffer::<Soft>::new(&device, 8, "small").unwrap();
        buffer.write_bytes(4, &[0u8; 8]);
    }

    #[test]
    fn test_upload_buffer_sizing() {
        let device = SoftDevice::headless();
        let mut buffer =
            UploadBuffer::<Soft, TestData>::new(&device, 4, BufferUsageType::Constant, "cb").unwrap();

        assert_eq!(buffer.element_size(), 256);
        assert_eq!(buffer.total_size(), 1024);
        assert_eq!(
            buffer.element_gpu_address(2) - buffer.element_gpu_address(0),
            512
        );

        buffer.copy_data(1, &TestData { value: [1.0, 2.0, 3.0, 4.0] });
        let bytes = buffer.resource().read_subresource(0);
        assert_eq!(&bytes[256..272], bytemuck::bytes_of(&TestData { value: [1.0, 2.0, 3.0, 4.0] }));
    }

    #[test]
    fn test_depth_texture_descriptor() {
        let device = SoftDevice::headless();
        let depth = create_depth_stencil_texture_resource::<Soft>(&device, 32, 16).unwrap();
        let desc = depth.desc();

        assert_eq!(desc.initial_state, ResourceState::DepthWrite);
        assert!(desc.allow_depth_stencil);
        assert_eq!(
            desc.clear_value,
            Some(ClearValue::DepthStencil { format: DEPTH_FORMAT, depth: 1.0, stencil: 0 })
        );
    }

    #[test]
    fn test_copyable_footprints_alignment() {
        let metadata = TextureMetadata {
            width: 10,
            height: 3,
            mip_levels: 3,
            format: Format::Rgba8UnormSrgb,
        };
        let (footprints, total) = copyable_footprints(&metadata);

        assert_eq!(footprints.len(), 3);
        assert_eq!(footprints[0].offset, 0);
        assert_eq!(footprints[0].row_pitch, 256);
        // mip0 占用 2*256 + 40 字节，mip1 从 1024 开始
        assert_eq!(footprints[1].offset, 1024);
        assert_eq!((footprints[1].width, footprints[1].height), (5, 1));
        assert_eq!(footprints[2].offset, 1536);
        assert_eq!((footprints[2].width, footprints[2].height), (2, 1));
        assert_eq!(total, 1536 + 8);
    }

    #[test]
    fn test_texture_upload_copies_every_mip() {
        let device = SoftDevice::headless();
        let queue = device.create_command_queue().unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let list = device.create_command_list(&allocator).unwrap();

        let metadata = TextureMetadata {
            width: 3,
            height: 2,
            mip_levels: 2,
            format: Format::Rgba8UnormSrgb,
        };
        let mips = vec![
            MipLevel { width: 3, height: 2, data: (0..24).collect() },
            MipLevel { width: 1, height: 1, data: vec![9, 8, 7, 6] },
        ];

        let mut texture = create_texture_resource::<Soft>(&device, &metadata, "tex").unwrap();
        let intermediate = upload_texture_data::<Soft>(&device, &list, &mut texture, &mips).unwrap();
        assert_eq!(texture.state(), ResourceState::GenericRead);

        list.close().unwrap();
        queue.execute(&list);

        assert_eq!(texture.resource().read_subresource(0), mips[0].data);
        assert_eq!(texture.resource().read_subresource(1), mips[1].data);
        assert_eq!(texture.resource().gpu_state(), ResourceState::GenericRead);
        assert!(device.control().validation_errors().is_empty());
        drop(intermediate);
    }

    #[test]
    fn test_texture_upload_rejects_wrong_mip_count() {
        let device = SoftDevice::headless();
        let allocator = device.create_command_allocator().unwrap();
        let list = device.create_command_list(&allocator).unwrap();
        let metadata = TextureMetadata { width: 2, height: 2, mip_levels: 2, format: Format::Rgba8Unorm };
        let mut texture = create_texture_resource::<Soft>(&device, &metadata, "tex").unwrap();

        let mips = vec![MipLevel { width: 2, height: 2, data: vec![0; 16] }];
        assert!(upload_texture_data::<Soft>(&device, &list, &mut texture, &mips).is_err());
    }
}
