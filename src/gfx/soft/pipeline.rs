//! 软件后端的根签名与管线状态
//!
//! 软件 GPU 不执行着色器，这两个对象只保存绘制时做绑定检查所需的信息。

use std::sync::Arc;

use crate::gfx::types::RootParameter;

#[derive(Debug)]
pub(crate) struct RootSignatureInner {
    pub id: u64,
    pub parameters: Vec<RootParameter>,
}

#[derive(Debug, Clone)]
pub struct SoftRootSignature {
    pub(crate) inner: Arc<RootSignatureInner>,
}

impl SoftRootSignature {
    pub fn parameters(&self) -> &[RootParameter] {
        &self.inner.parameters
    }
}

#[derive(Debug)]
pub(crate) struct PipelineInner {
    pub root_signature_id: u64,
    pub vertex_stride: u32,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SoftPipelineState {
    pub(crate) inner: Arc<PipelineInner>,
}

impl SoftPipelineState {
    /// 输入布局要求的顶点跨度
    pub fn vertex_stride(&self) -> u32 {
        self.inner.vertex_stride
    }
}
