//! 软件 GPU 时间线
//!
//! 队列提交的工作（命令列表、栅栏信号、呈现检查）按提交顺序排成一条时间线。
//! `Immediate` 模式下提交即执行；`Manual` 模式下工作留在队列里，
//! 直到 [`SoftGpuControl`] 推进时间线，用来模拟慢速或卡死的 GPU。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{trace, warn};

use crate::gfx::types::{
    Format, PrimitiveTopology, ResourceState, RootParameter, ScissorRect, SubresourceFootprint, VertexBufferView,
    Viewport,
};

use super::pipeline::{SoftPipelineState, SoftRootSignature};
use super::resource::{SoftResource, WeakSoftResource};

/// 着色器可见堆的 GPU 句柄相对 CPU 句柄的偏移
pub(crate) const SHADER_VISIBLE_BASE: u64 = 1 << 40;

/// 常量缓冲区地址的对齐要求
const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 时间线推进方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// 提交即执行
    Immediate,
    /// 只有调用 [`SoftGpuControl::step`] / [`SoftGpuControl::retire_all`] 才执行
    Manual,
}

/// 录制在命令列表里的命令
#[derive(Debug, Clone)]
pub(crate) enum SoftCommand {
    Barrier {
        resource: SoftResource,
        before: ResourceState,
        after: ResourceState,
    },
    SetRenderTargets { rtv: usize, dsv: Option<usize> },
    ClearRenderTarget { rtv: usize, color: [f32; 4] },
    ClearDepth { dsv: usize, depth: f32 },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetDescriptorHeaps(usize),
    CopyBufferToTexture {
        dst: SoftResource,
        mip: u32,
        src: SoftResource,
        footprint: SubresourceFootprint,
    },
    SetRootSignature(SoftRootSignature),
    SetPipelineState(SoftPipelineState),
    SetPrimitiveTopology(PrimitiveTopology),
    SetVertexBuffer(VertexBufferView),
    SetRootConstantBufferView { index: u32, address: u64 },
    SetRootDescriptorTable { index: u32, handle: u64 },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    },
}

#[derive(Debug, Clone, Copy)]
enum RootArgument {
    ConstantBuffer(u64),
    DescriptorTable(u64),
}

/// 一个命令列表执行期间的管线绑定，每个列表从空状态开始
#[derive(Default)]
struct BindingState {
    root_signature: Option<SoftRootSignature>,
    pipeline: Option<SoftPipelineState>,
    topology: Option<PrimitiveTopology>,
    vertex_buffer: Option<VertexBufferView>,
    root_arguments: HashMap<u32, RootArgument>,
    render_target: bool,
}

/// 描述符槽位上创建的视图，视图不持有资源
#[derive(Clone)]
pub(crate) struct SoftView {
    pub resource: WeakSoftResource,
    pub format: Format,
}

/// 命令分配器的共享部分：记录还有多少个用它录制的列表在 GPU 上
#[derive(Debug, Default)]
pub(crate) struct AllocatorInner {
    pub in_flight: AtomicU32,
}

/// 栅栏的共享部分
#[derive(Debug)]
pub(crate) struct FenceInner {
    pub completed: Mutex<u64>,
    pub cond: Condvar,
}

pub(crate) enum GpuWork {
    Execute {
        commands: Vec<SoftCommand>,
        allocator: Arc<AllocatorInner>,
    },
    Signal { fence: Arc<FenceInner>, value: u64 },
    PresentCheck { buffer: SoftResource },
}

/// 整个软件 GPU 的共享状态
pub(crate) struct SoftGpu {
    mode: ExecutionMode,
    pending: Mutex<VecDeque<GpuWork>>,
    views: Mutex<HashMap<usize, SoftView>>,
    validation: Mutex<Vec<String>>,
    next_address: AtomicUsize,
    next_resource_id: AtomicU64,
    executed_lists: AtomicU64,
    draw_calls: AtomicU64,
    drawn_vertices: AtomicU64,
    removed: AtomicBool,
}

impl fmt::Debug for SoftGpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftGpu")
            .field("mode", &self.mode)
            .field("pending", &lock(&self.pending).len())
            .field("removed", &self.is_removed())
            .finish()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SoftGpu {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            pending: Mutex::new(VecDeque::new()),
            views: Mutex::new(HashMap::new()),
            validation: Mutex::new(Vec::new()),
            next_address: AtomicUsize::new(0x1000),
            next_resource_id: AtomicU64::new(1),
            executed_lists: AtomicU64::new(0),
            draw_calls: AtomicU64::new(0),
            drawn_vertices: AtomicU64::new(0),
            removed: AtomicBool::new(false),
        }
    }

    /// 为描述符堆分配一段地址
    pub fn allocate_address_range(&self, bytes: usize) -> usize {
        // 相邻的堆之间留出间隔，越界的句柄不会落到别的堆里
        self.next_address.fetch_add(bytes + 0x1000, Ordering::Relaxed)
    }

    pub fn next_resource_id(&self) -> u64 {
        self.next_resource_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_view(&self, handle: usize, view: SoftView) {
        lock(&self.views).insert(handle, view);
    }

    /// 取得描述符槽位上仍然存活的视图资源
    fn view(&self, handle: usize) -> Option<(SoftResource, Format)> {
        let view = lock(&self.views).get(&handle).cloned()?;
        Some((view.resource.upgrade()?, view.format))
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// 记录一条验证错误
    pub fn report(&self, message: String) {
        warn!(target: "lucent::soft", "{}", message);
        lock(&self.validation).push(message);
    }

    /// 把工作放到时间线上
    pub fn submit(&self, work: GpuWork) {
        match self.mode {
            ExecutionMode::Immediate => self.run(work),
            ExecutionMode::Manual => lock(&self.pending).push_back(work),
        }
    }

    fn step(&self) -> bool {
        let work = lock(&self.pending).pop_front();
        match work {
            Some(work) => {
                self.run(work);
                true
            }
            None => false,
        }
    }

    fn run(&self, work: GpuWork) {
        match work {
            GpuWork::Execute { commands, allocator } => {
                let mut bindings = BindingState::default();
                for command in &commands {
                    self.execute(command, &mut bindings);
                }
                allocator.in_flight.fetch_sub(1, Ordering::AcqRel);
                self.executed_lists.fetch_add(1, Ordering::Relaxed);
            }
            GpuWork::Signal { fence, value } => {
                let mut completed = lock(&fence.completed);
                *completed = (*completed).max(value);
                fence.cond.notify_all();
                trace!(target: "lucent::soft", value, "GPU reached fence value");
            }
            GpuWork::PresentCheck { buffer } => {
                let state = buffer.gpu_state();
                if state != ResourceState::Present {
                    self.report(format!(
                        "Presented back buffer '{}' is in state {:?}, expected Present",
                        buffer.desc_name(),
                        state
                    ));
                }
            }
        }
    }

    fn execute(&self, command: &SoftCommand, bindings: &mut BindingState) {
        match command {
            SoftCommand::Barrier { resource, before, after } => {
                let actual = resource.gpu_state();
                if actual != *before {
                    self.report(format!(
                        "Resource barrier on '{}' declares before state {:?} but resource is in {:?}",
                        resource.desc_name(),
                        before,
                        actual
                    ));
                }
                resource.set_gpu_state(*after);
            }
            SoftCommand::ClearRenderTarget { rtv, color } => {
                let Some((resource, format)) = self.view(*rtv) else {
                    self.report(format!("ClearRenderTargetView on unknown descriptor {:#x}", rtv));
                    return;
                };
                self.expect_state(&resource, ResourceState::RenderTarget, "ClearRenderTargetView");
                resource.fill_mip(0, &encode_color(*color, format));
            }
            SoftCommand::ClearDepth { dsv, depth } => {
                let Some((resource, format)) = self.view(*dsv) else {
                    self.report(format!("ClearDepthStencilView on unknown descriptor {:#x}", dsv));
                    return;
                };
                self.expect_state(&resource, ResourceState::DepthWrite, "ClearDepthStencilView");
                resource.fill_mip(0, &encode_depth(*depth, format));
            }
            SoftCommand::SetRenderTargets { rtv, dsv } => {
                bindings.render_target = true;
                if self.view(*rtv).is_none() {
                    self.report(format!("OMSetRenderTargets with unknown RTV {:#x}", rtv));
                }
                if let Some(dsv) = dsv {
                    if self.view(*dsv).is_none() {
                        self.report(format!("OMSetRenderTargets with unknown DSV {:#x}", dsv));
                    }
                }
            }
            SoftCommand::CopyBufferToTexture { dst, mip, src, footprint } => {
                self.expect_state(dst, ResourceState::CopyDest, "CopyTextureRegion");
                dst.copy_from_footprint(*mip, src, footprint);
            }
            SoftCommand::SetRootSignature(root_signature) => {
                // 切换根签名会使已绑定的根参数失效
                bindings.root_arguments.clear();
                bindings.root_signature = Some(root_signature.clone());
            }
            SoftCommand::SetPipelineState(pipeline) => bindings.pipeline = Some(pipeline.clone()),
            SoftCommand::SetPrimitiveTopology(topology) => bindings.topology = Some(*topology),
            SoftCommand::SetVertexBuffer(view) => bindings.vertex_buffer = Some(*view),
            SoftCommand::SetRootConstantBufferView { index, address } => {
                bindings.root_arguments.insert(*index, RootArgument::ConstantBuffer(*address));
            }
            SoftCommand::SetRootDescriptorTable { index, handle } => {
                bindings.root_arguments.insert(*index, RootArgument::DescriptorTable(*handle));
            }
            SoftCommand::Draw { vertex_count, instance_count, start_vertex, start_instance } => {
                trace!(target: "lucent::soft", vertex_count, instance_count, start_vertex, start_instance, "DrawInstanced");
                if self.validate_draw(bindings, *vertex_count, *start_vertex) {
                    self.draw_calls.fetch_add(1, Ordering::Relaxed);
                    self.drawn_vertices
                        .fetch_add(u64::from(*vertex_count) * u64::from(*instance_count), Ordering::Relaxed);
                }
            }
            SoftCommand::SetViewport(_) | SoftCommand::SetScissor(_) | SoftCommand::SetDescriptorHeaps(_) => {}
        }
    }

    /// 检查一次绘制所需的全部绑定，有问题时逐条报告并返回 `false`
    fn validate_draw(&self, bindings: &BindingState, vertex_count: u32, start_vertex: u32) -> bool {
        let errors_before = lock(&self.validation).len();

        let Some(root_signature) = &bindings.root_signature else {
            self.report("DrawInstanced without a graphics root signature".to_string());
            return false;
        };
        let Some(pipeline) = &bindings.pipeline else {
            self.report("DrawInstanced without a pipeline state".to_string());
            return false;
        };
        if pipeline.inner.root_signature_id != root_signature.inner.id {
            self.report(format!(
                "Pipeline '{}' was created with a different root signature than the one bound",
                pipeline.inner.name
            ));
        }
        if bindings.topology.is_none() {
            self.report("DrawInstanced without a primitive topology".to_string());
        }
        if !bindings.render_target {
            self.report("DrawInstanced without a render target".to_string());
        }

        for (index, parameter) in root_signature.parameters().iter().enumerate() {
            let index = index as u32;
            match (parameter, bindings.root_arguments.get(&index)) {
                (RootParameter::ConstantBufferView { .. }, Some(RootArgument::ConstantBuffer(address))) => {
                    if *address == 0 || address % CONSTANT_BUFFER_ALIGNMENT != 0 {
                        self.report(format!(
                            "Root parameter {} constant buffer address {:#x} is not {}-byte aligned",
                            index, address, CONSTANT_BUFFER_ALIGNMENT
                        ));
                    }
                }
                (RootParameter::ShaderResourceTable { .. }, Some(RootArgument::DescriptorTable(handle))) => {
                    self.validate_shader_resource(index, *handle);
                }
                (_, None) => self.report(format!("Root parameter {} is not bound before DrawInstanced", index)),
                (_, Some(argument)) => self.report(format!(
                    "Root parameter {} is {:?} but was bound as {:?}",
                    index, parameter, argument
                )),
            }
        }

        match &bindings.vertex_buffer {
            None => self.report("DrawInstanced without a vertex buffer".to_string()),
            Some(view) => {
                if view.stride_in_bytes != pipeline.vertex_stride() {
                    self.report(format!(
                        "Vertex buffer stride {} does not match input layout stride {}",
                        view.stride_in_bytes,
                        pipeline.vertex_stride()
                    ));
                }
                let needed = (u64::from(start_vertex) + u64::from(vertex_count)) * u64::from(view.stride_in_bytes);
                if needed > u64::from(view.size_in_bytes) {
                    self.report(format!(
                        "DrawInstanced reads {} bytes but the vertex buffer holds {}",
                        needed, view.size_in_bytes
                    ));
                }
            }
        }

        lock(&self.validation).len() == errors_before
    }

    fn validate_shader_resource(&self, index: u32, handle: u64) {
        let Some(cpu) = handle.checked_sub(SHADER_VISIBLE_BASE) else {
            self.report(format!(
                "Root parameter {} descriptor table {:#x} is not in a shader-visible heap",
                index, handle
            ));
            return;
        };
        let Some((resource, _)) = self.view(cpu as usize) else {
            self.report(format!("Root parameter {} descriptor table {:#x} has no live view", index, handle));
            return;
        };
        let state = resource.gpu_state();
        if !matches!(state, ResourceState::PixelShaderResource | ResourceState::GenericRead) {
            self.report(format!(
                "Texture '{}' is sampled in state {:?}",
                resource.desc_name(),
                state
            ));
        }
    }

    fn expect_state(&self, resource: &SoftResource, expected: ResourceState, command: &str) {
        let actual = resource.gpu_state();
        if actual != expected {
            self.report(format!(
                "{} on '{}' requires state {:?} but resource is in {:?}",
                command,
                resource.desc_name(),
                expected,
                actual
            ));
        }
    }
}

/// 把线性颜色编码为 RGBA8，sRGB 视图会先做 gamma 编码
fn encode_color(color: [f32; 4], format: Format) -> Vec<u8> {
    let srgb = format == Format::Rgba8UnormSrgb;
    color
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let c = c.clamp(0.0, 1.0);
            let c = if srgb && i < 3 { linear_to_srgb(c) } else { c };
            (c * 255.0).round() as u8
        })
        .collect()
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn encode_depth(depth: f32, format: Format) -> Vec<u8> {
    match format {
        Format::D24UnormS8Uint => {
            let d = (depth.clamp(0.0, 1.0) * 0x00FF_FFFF as f32).round() as u32;
            d.to_le_bytes().to_vec()
        }
        _ => depth.to_le_bytes().to_vec(),
    }
}

/// 控制软件 GPU 时间线的句柄，可以跨线程使用
#[derive(Clone)]
pub struct SoftGpuControl {
    pub(crate) gpu: Arc<SoftGpu>,
}

impl SoftGpuControl {
    /// 执行时间线上的下一项工作，没有工作时返回 `false`
    pub fn step(&self) -> bool {
        self.gpu.step()
    }

    /// 执行所有已提交的工作，返回执行的项数
    pub fn retire_all(&self) -> usize {
        let mut count = 0;
        while self.gpu.step() {
            count += 1;
        }
        count
    }

    /// 时间线上尚未执行的工作数
    pub fn pending(&self) -> usize {
        lock(&self.gpu.pending).len()
    }

    /// 已执行完的命令列表数
    pub fn executed_command_lists(&self) -> u64 {
        self.gpu.executed_lists.load(Ordering::Relaxed)
    }

    /// 通过检查并执行了的绘制调用数
    pub fn draw_calls(&self) -> u64 {
        self.gpu.draw_calls.load(Ordering::Relaxed)
    }

    /// 绘制过的顶点总数（含实例）
    pub fn drawn_vertices(&self) -> u64 {
        self.gpu.drawn_vertices.load(Ordering::Relaxed)
    }

    /// 至今记录的验证错误
    pub fn validation_errors(&self) -> Vec<String> {
        lock(&self.gpu.validation).clone()
    }

    /// 模拟设备移除：之后的呈现返回 `DeviceLost`
    pub fn remove_device(&self) {
        self.gpu.removed.store(true, Ordering::Release);
    }
}

impl FenceInner {
    pub fn new(initial_value: u64) -> Self {
        Self {
            completed: Mutex::new(initial_value),
            cond: Condvar::new(),
        }
    }

    pub fn completed(&self) -> u64 {
        *lock(&self.completed)
    }

    /// 等待 `completed >= value`，超时返回 `false`
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> bool {
        let guard = lock(&self.completed);
        match timeout {
            Some(timeout) => {
                let (guard, _) = self
                    .cond
                    .wait_timeout_while(guard, timeout, |completed| *completed < value)
                    .unwrap_or_else(PoisonError::into_inner);
                *guard >= value
            }
            None => {
                let guard = self
                    .cond
                    .wait_while(guard, |completed| *completed < value)
                    .unwrap_or_else(PoisonError::into_inner);
                *guard >= value
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_color_unorm() {
        assert_eq!(encode_color([1.0, 0.0, 0.5, 1.0], Format::Rgba8Unorm), vec![255, 0, 128, 255]);
    }

    #[test]
    fn test_encode_color_srgb_keeps_alpha_linear() {
        let bytes = encode_color([0.5, 0.5, 0.5, 0.5], Format::Rgba8UnormSrgb);
        assert_eq!(bytes[0], 188);
        assert_eq!(bytes[3], 128);
    }

    #[test]
    fn test_fence_wait_times_out() {
        let fence = FenceInner::new(0);
        assert!(!fence.wait(1, Some(Duration::from_millis(5))));
        assert!(fence.wait(0, Some(Duration::from_millis(5))));
    }
}
