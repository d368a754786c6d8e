//! 资源状态跟踪
//!
//! 每个需要转换状态的资源都包在 [`TrackedResource`] 里，CPU 端记录它当前的状态。
//! 生成屏障时断言声明的 "before" 与记录一致，把“状态标签写错”这类错误
//! 在录制时就暴露出来，而不是交给驱动或 GPU 验证层。

use crate::gfx::backend::Resource;
use crate::gfx::types::{ResourceState, TransitionBarrier};

/// 带状态标签的资源
#[derive(Debug, Clone)]
pub struct TrackedResource<R: Resource> {
    resource: R,
    state: ResourceState,
}

impl<R: Resource> TrackedResource<R> {
    /// 以资源创建时的初始状态开始跟踪
    pub fn new(resource: R, initial_state: ResourceState) -> Self {
        Self { resource, state: initial_state }
    }

    /// 从 `before` 转换到 `after`，返回要录制的屏障
    ///
    /// # Panics
    ///
    /// `before` 与当前记录的状态不一致时 panic。
    pub fn transition(&mut self, before: ResourceState, after: ResourceState) -> TransitionBarrier<'_, R> {
        assert_eq!(
            self.state, before,
            "resource '{}' transition expected state {:?} but it is tracked as {:?}",
            self.resource.desc().name, before, self.state
        );
        self.state = after;
        TransitionBarrier {
            resource: &self.resource,
            before,
            after,
        }
    }

    /// 从当前记录的状态转换到 `after`
    pub fn transition_to(&mut self, after: ResourceState) -> TransitionBarrier<'_, R> {
        let before = self.state;
        self.transition(before, after)
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn into_inner(self) -> R {
        self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::Device;
    use crate::gfx::soft::SoftDevice;
    use crate::gfx::types::ResourceDescriptor;

    fn tracked(device: &SoftDevice) -> TrackedResource<crate::gfx::soft::SoftResource> {
        let resource = device
            .create_committed_resource(&ResourceDescriptor::upload_buffer(16, "tracked"))
            .unwrap();
        TrackedResource::new(resource, ResourceState::Present)
    }

    #[test]
    fn test_transition_updates_state() {
        let device = SoftDevice::headless();
        let mut res = tracked(&device);

        let barrier = res.transition(ResourceState::Present, ResourceState::RenderTarget);
        assert_eq!(barrier.before, ResourceState::Present);
        assert_eq!(barrier.after, ResourceState::RenderTarget);
        assert_eq!(res.state(), ResourceState::RenderTarget);

        let barrier = res.transition_to(ResourceState::Present);
        assert_eq!(barrier.before, ResourceState::RenderTarget);
        assert_eq!(res.state(), ResourceState::Present);
    }

    #[test]
    #[should_panic(expected = "transition expected state")]
    fn test_wrong_before_state_panics() {
        let device = SoftDevice::headless();
        let mut res = tracked(&device);
        res.transition(ResourceState::RenderTarget, ResourceState::Present);
    }
}
