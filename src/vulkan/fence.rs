use ash::vk;
use log::debug;

use super::context::Context;
use super::error::{Result, VulkanError};

/// Host-waitable completion signal for work submitted to the compute queue.
pub struct Fence<'ctx> {
    context: &'ctx Context,
    handle: vk::Fence,
}

impl<'ctx> Fence<'ctx> {
    pub(super) fn new(context: &'ctx Context, handle: vk::Fence) -> Self {
        Self { context, handle }
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// Blocks until the fence is signaled. There is no timeout.
    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.context
                .device()
                .wait_for_fences(&[self.handle], true, u64::MAX)
        }
        .map_err(VulkanError::FenceWait)
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.context.device().reset_fences(&[self.handle]) }.map_err(VulkanError::FenceReset)
    }

    pub fn is_signaled(&self) -> Result<bool> {
        unsafe { self.context.device().get_fence_status(self.handle) }.map_err(VulkanError::FenceStatus)
    }
}

impl Drop for Fence<'_> {
    fn drop(&mut self) {
        unsafe { self.context.device().destroy_fence(self.handle, None) };
        debug!("destroyed fence {:?}", self.handle);
    }
}
