//! 描述符堆管理模块
//!
//! 描述符堆是固定容量的类型化数组，槽位 `i` 的句柄为
//! `start + i * increment_size(type)`，步长由设备查询得到。
//!
//! # 设计原则
//!
//! - **容量固定**：容量由配置给定，创建后不再增长
//! - **容量为 0 直接拒绝**：创建时返回错误
//! - **越界即编程错误**：`cpu_handle`/`gpu_handle` 越界时 panic，
//!   需要可恢复检查的调用方使用 `try_` 版本
//! - **只有 CBV/SRV/UAV 与采样器堆可以着色器可见**
//!
//! # DirectX 12 描述符堆类型
//!
//! - **RTV** (Render Target View)：渲染目标视图，每个后台缓冲区一个
//! - **DSV** (Depth Stencil View)：深度模板视图
//! - **CBV/SRV/UAV**：着色器读取的常量缓冲、纹理和无序访问视图
//! - **Sampler**：采样器

use tracing::debug;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{Backend, Device, RawDescriptorHeap};

/// 描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// 渲染目标视图 (RTV)
    RenderTargetView,
    /// 深度模板视图 (DSV)
    DepthStencilView,
    /// 常量缓冲 / 着色资源 / 无序访问视图
    CbvSrvUav,
    /// 采样器
    Sampler,
}

impl DescriptorType {
    /// 该类型的堆是否允许着色器可见
    pub fn can_be_shader_visible(&self) -> bool {
        matches!(self, DescriptorType::CbvSrvUav | DescriptorType::Sampler)
    }

    /// 获取描述符类型名称
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorType::RenderTargetView => "RTV",
            DescriptorType::DepthStencilView => "DSV",
            DescriptorType::CbvSrvUav => "CBV/SRV/UAV",
            DescriptorType::Sampler => "Sampler",
        }
    }
}

/// 描述符堆描述信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorHeapDescriptor {
    /// 描述符类型
    pub descriptor_type: DescriptorType,
    /// 描述符数量
    pub num_descriptors: u32,
    /// 是否着色器可见
    pub shader_visible: bool,
    /// 调试名称
    pub name: Option<String>,
}

impl DescriptorHeapDescriptor {
    pub fn new(descriptor_type: DescriptorType, num_descriptors: u32, shader_visible: bool) -> Self {
        Self {
            descriptor_type,
            num_descriptors,
            shader_visible,
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// RTV 堆，每个后台缓冲区一个槽位
    pub fn rtv(num_descriptors: u32) -> Self {
        Self::new(DescriptorType::RenderTargetView, num_descriptors, false)
            .with_name("RTV Heap")
    }

    /// DSV 堆
    pub fn dsv(num_descriptors: u32) -> Self {
        Self::new(DescriptorType::DepthStencilView, num_descriptors, false)
            .with_name("DSV Heap")
    }

    /// 着色器可见的 SRV/CBV/UAV 堆
    pub fn srv(num_descriptors: u32) -> Self {
        Self::new(DescriptorType::CbvSrvUav, num_descriptors, true)
            .with_name("SRV Heap")
    }

    fn validate(&self) -> Result<()> {
        if self.num_descriptors == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} descriptor heap must have at least one slot",
                self.descriptor_type.name()
            ))
            .into());
        }

        if self.shader_visible && !self.descriptor_type.can_be_shader_visible() {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} descriptor heap cannot be shader visible",
                self.descriptor_type.name()
            ))
            .into());
        }

        Ok(())
    }
}

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: usize,
}

impl CpuDescriptorHandle {
    pub fn new(ptr: usize) -> Self {
        Self { ptr }
    }

    /// 偏移 `count` 个描述符
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as usize * increment_size as usize,
        }
    }
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: u64,
}

impl GpuDescriptorHandle {
    pub fn new(ptr: u64) -> Self {
        Self { ptr }
    }

    /// 偏移 `count` 个描述符
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as u64 * increment_size as u64,
        }
    }
}

/// 描述符堆
///
/// 持有原生堆以及起始句柄和步长，句柄计算是纯函数。
pub struct DescriptorHeap<B: Backend> {
    raw: B::DescriptorHeap,
    descriptor_type: DescriptorType,
    capacity: u32,
    increment_size: u32,
    cpu_start: CpuDescriptorHandle,
    gpu_start: Option<GpuDescriptorHandle>,
}

impl<B: Backend> DescriptorHeap<B> {
    /// 创建描述符堆
    pub fn new(device: &B::Device, desc: &DescriptorHeapDescriptor) -> Result<Self> {
        desc.validate()?;

        let raw = device.create_descriptor_heap(desc)?;
        let increment_size = device.descriptor_increment_size(desc.descriptor_type);
        let cpu_start = raw.cpu_start();
        let gpu_start = if desc.shader_visible { raw.gpu_start() } else { None };

        debug!(
            heap_type = desc.descriptor_type.name(),
            capacity = desc.num_descriptors,
            increment_size,
            shader_visible = desc.shader_visible,
            "Descriptor heap created"
        );

        Ok(Self {
            raw,
            descriptor_type: desc.descriptor_type,
            capacity: desc.num_descriptors,
            increment_size,
            cpu_start,
            gpu_start,
        })
    }

    /// 槽位 `index` 的 CPU 句柄
    ///
    /// # Panics
    ///
    /// `index >= capacity` 时 panic。
    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        assert!(
            index < self.capacity,
            "{} descriptor index {} out of range (capacity {})",
            self.descriptor_type.name(),
            index,
            self.capacity
        );
        self.cpu_start.offset(index, self.increment_size)
    }

    /// 带检查的 CPU 句柄
    pub fn try_cpu_handle(&self, index: u32) -> Result<CpuDescriptorHandle> {
        self.check_index(index)?;
        Ok(self.cpu_start.offset(index, self.increment_size))
    }

    /// 槽位 `index` 的 GPU 句柄
    ///
    /// # Panics
    ///
    /// 堆不是着色器可见的，或 `index >= capacity` 时 panic。
    pub fn gpu_handle(&self, index: u32) -> GpuDescriptorHandle {
        let start = self.gpu_start.unwrap_or_else(|| {
            panic!("{} descriptor heap is not shader visible", self.descriptor_type.name())
        });
        assert!(
            index < self.capacity,
            "{} descriptor index {} out of range (capacity {})",
            self.descriptor_type.name(),
            index,
            self.capacity
        );
        start.offset(index, self.increment_size)
    }

    /// 带检查的 GPU 句柄
    pub fn try_gpu_handle(&self, index: u32) -> Result<GpuDescriptorHandle> {
        self.check_index(index)?;
        let start = self.gpu_start.ok_or_else(|| {
            GraphicsError::ResourceCreation(format!(
                "{} descriptor heap is not shader visible",
                self.descriptor_type.name()
            ))
        })?;
        Ok(start.offset(index, self.increment_size))
    }

    fn check_index(&self, index: u32) -> Result<()> {
        if index >= self.capacity {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} descriptor index {} out of range (capacity {})",
                self.descriptor_type.name(),
                index,
                self.capacity
            ))
            .into());
        }
        Ok(())
    }

    pub fn raw(&self) -> &B::DescriptorHeap {
        &self.raw
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        self.descriptor_type
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn increment_size(&self) -> u32 {
        self.increment_size
    }

    pub fn is_shader_visible(&self) -> bool {
        self.gpu_start.is_some()
    }
}

/// 描述符堆统计信息
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorHeapStats {
    pub descriptor_type: DescriptorType,
    pub capacity: u32,
    pub used: u32,
    pub available: u32,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    pub fn new(descriptor_type: DescriptorType, capacity: u32, used: u32) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };

        Self {
            descriptor_type,
            capacity,
            used,
            available,
            usage_ratio,
        }
    }
}

/// 线性描述符分配器
///
/// 在一个堆上顺序分配槽位，不支持释放单个槽位。
/// 前 `reserved` 个槽位留给外部使用（例如 UI 字体纹理占用 SRV 槽位 0）。
pub struct DescriptorAllocator<B: Backend> {
    heap: DescriptorHeap<B>,
    reserved: u32,
    next: u32,
}

impl<B: Backend> DescriptorAllocator<B> {
    pub fn new(heap: DescriptorHeap<B>, reserved: u32) -> Result<Self> {
        if reserved >= heap.capacity() {
            return Err(GraphicsError::ResourceCreation(format!(
                "Cannot reserve {} of {} {} descriptors",
                reserved,
                heap.capacity(),
                heap.descriptor_type().name()
            ))
            .into());
        }

        Ok(Self { heap, reserved, next: reserved })
    }

    /// 分配下一个槽位，返回其索引
    pub fn allocate(&mut self) -> Result<u32> {
        if self.next >= self.heap.capacity() {
            return Err(GraphicsError::ResourceCreation(format!(
                "Descriptor allocator out of budget: {}/{} for {}",
                self.next,
                self.heap.capacity(),
                self.heap.descriptor_type().name()
            ))
            .into());
        }

        let index = self.next;
        self.next += 1;
        Ok(index)
    }

    /// 回收所有非保留槽位
    pub fn reset(&mut self) {
        self.next = self.reserved;
    }

    pub fn heap(&self) -> &DescriptorHeap<B> {
        &self.heap
    }

    pub fn is_full(&self) -> bool {
        self.next >= self.heap.capacity()
    }

    pub fn stats(&self) -> DescriptorHeapStats {
        DescriptorHeapStats::new(self.heap.descriptor_type(), self.heap.capacity(), self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::soft::{Soft, SoftDevice};

    fn heap(device: &SoftDevice, desc: DescriptorHeapDescriptor) -> DescriptorHeap<Soft> {
        DescriptorHeap::<Soft>::new(device, &desc).unwrap()
    }

    #[test]
    fn test_descriptor_type() {
        assert!(DescriptorType::CbvSrvUav.can_be_shader_visible());
        assert!(!DescriptorType::RenderTargetView.can_be_shader_visible());
        assert_eq!(DescriptorType::RenderTargetView.name(), "RTV");
    }

    #[test]
    fn test_cpu_descriptor_handle_offset() {
        let handle = CpuDescriptorHandle::new(1000);
        assert_eq!(handle.offset(5, 32).ptr, 1160);
    }

    #[test]
    fn test_gpu_descriptor_handle_offset() {
        let handle = GpuDescriptorHandle::new(2000);
        assert_eq!(handle.offset(10, 32).ptr, 2320);
    }

    #[test]
    fn test_handle_arithmetic_for_every_slot() {
        let device = SoftDevice::headless();
        let heap = heap(&device, DescriptorHeapDescriptor::srv(16));
        let inc = device.descriptor_increment_size(DescriptorType::CbvSrvUav);
        let cpu_start = heap.cpu_handle(0).ptr;
        let gpu_start = heap.gpu_handle(0).ptr;

        assert_eq!(heap.increment_size(), inc);
        for i in 0..16 {
            assert_eq!(heap.cpu_handle(i).ptr, cpu_start + (i * inc) as usize);
            assert_eq!(heap.gpu_handle(i).ptr, gpu_start + (i * inc) as u64);
            assert_eq!(heap.try_cpu_handle(i).unwrap(), heap.cpu_handle(i));
        }
    }

    #[test]
    fn test_zero_capacity_heap_is_rejected() {
        let device = SoftDevice::headless();
        let result = DescriptorHeap::<Soft>::new(&device, &DescriptorHeapDescriptor::rtv(0));
        assert!(result.is_err());
    }

    #[test]
    fn test_shader_visible_rtv_heap_is_rejected() {
        let device = SoftDevice::headless();
        let desc = DescriptorHeapDescriptor::new(DescriptorType::RenderTargetView, 2, true);
        assert!(DescriptorHeap::<Soft>::new(&device, &desc).is_err());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_index_at_capacity_panics() {
        let device = SoftDevice::headless();
        let heap = heap(&device, DescriptorHeapDescriptor::rtv(2));
        heap.cpu_handle(2);
    }

    #[test]
    fn test_try_handle_at_capacity_is_err() {
        let device = SoftDevice::headless();
        let heap = heap(&device, DescriptorHeapDescriptor::rtv(2));
        assert!(heap.try_cpu_handle(2).is_err());
        assert!(heap.try_gpu_handle(0).is_err());
    }

    #[test]
    #[should_panic(expected = "not shader visible")]
    fn test_gpu_handle_on_cpu_only_heap_panics() {
        let device = SoftDevice::headless();
        let heap = heap(&device, DescriptorHeapDescriptor::dsv(1));
        heap.gpu_handle(0);
    }

    #[test]
    fn test_descriptor_allocator_budget() {
        let device = SoftDevice::headless();
        let mut allocator =
            DescriptorAllocator::new(heap(&device, DescriptorHeapDescriptor::srv(3)), 1).unwrap();

        assert_eq!(allocator.allocate().unwrap(), 1);
        assert_eq!(allocator.allocate().unwrap(), 2);
        assert!(allocator.is_full());
        assert!(allocator.allocate().is_err());

        let stats = allocator.stats();
        assert_eq!(stats.used, 3);
        assert_eq!(stats.available, 0);

        allocator.reset();
        assert_eq!(allocator.allocate().unwrap(), 1);
    }

    #[test]
    fn test_descriptor_heap_stats() {
        let stats = DescriptorHeapStats::new(DescriptorType::RenderTargetView, 100, 50);
        assert_eq!(stats.available, 50);
        assert_eq!(stats.usage_ratio, 0.5);
    }
}
