//! Per-frame-in-flight command and synchronization objects

use ash::vk;
use log::debug;

use crate::backend::{GpuDevice, VulkanResult};

/// Objects owned by one frame in flight
///
/// The fence is created signaled so the first wait on a fresh slot returns
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    /// Pool the command buffer is allocated from
    pub command_pool: vk::CommandPool,
    /// Primary command buffer reset every frame
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the acquired image is ready
    pub acquire_semaphore: vk::Semaphore,
    /// Signaled when the GPU retires this slot's submission
    pub submit_fence: vk::Fence,
}

impl FrameSlot {
    /// Create every object; on failure nothing is left behind
    pub fn create(device: &dyn GpuDevice) -> VulkanResult<Self> {
        let mut slot = Self {
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            acquire_semaphore: vk::Semaphore::null(),
            submit_fence: vk::Fence::null(),
        };
        if let Err(err) = slot.fill(device) {
            slot.destroy(device);
            return Err(err);
        }
        debug!("Created frame slot with fence {:?}", slot.submit_fence);
        Ok(slot)
    }

    fn fill(&mut self, device: &dyn GpuDevice) -> VulkanResult<()> {
        self.command_pool = device.create_command_pool()?;
        self.command_buffer = device.allocate_command_buffer(self.command_pool)?;
        self.acquire_semaphore = device.create_semaphore()?;
        self.submit_fence = device.create_fence(true)?;
        Ok(())
    }

    /// Destroy every non-null object; the command buffer goes with its pool
    pub fn destroy(&self, device: &dyn GpuDevice) {
        if self.submit_fence != vk::Fence::null() {
            device.destroy_fence(self.submit_fence);
        }
        if self.acquire_semaphore != vk::Semaphore::null() {
            device.destroy_semaphore(self.acquire_semaphore);
        }
        if self.command_pool != vk::CommandPool::null() {
            device.destroy_command_pool(self.command_pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessDevice, ObjectKind};

    #[test]
    fn test_slot_starts_with_signaled_fence() {
        let device = HeadlessDevice::new();
        let slot = FrameSlot::create(&device).unwrap();
        assert_eq!(device.fence_signaled(slot.submit_fence), Some(true));
        slot.destroy(&device);
        assert_eq!(device.live_count(ObjectKind::Fence), 0);
        assert_eq!(device.live_count(ObjectKind::CommandPool), 0);
    }

    #[test]
    fn test_failed_slot_leaves_nothing() {
        let device = HeadlessDevice::new();
        device.fail_nth(ObjectKind::Fence, 0);
        assert!(FrameSlot::create(&device).is_err());
        assert_eq!(device.live_count(ObjectKind::Semaphore), 0);
        assert_eq!(device.live_count(ObjectKind::CommandPool), 0);
    }
}
