//! Shared descriptor pool

use std::sync::Arc;

use ash::vk;
use log::debug;

use crate::backend::{GpuDevice, VulkanError, VulkanResult};
use crate::config::DescriptorPoolConfig;

/// Descriptor pool with per-set free support
///
/// Owned by the material system and shared with every instance allocated from
/// it, so the pool outlives the last set it handed out.
pub struct DescriptorPool {
    device: Arc<dyn GpuDevice>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Create a pool sized from configuration
    pub fn new(device: Arc<dyn GpuDevice>, config: &DescriptorPoolConfig) -> VulkanResult<Self> {
        let pool_sizes = config.vk_pool_sizes();
        if pool_sizes.is_empty() || config.max_sets == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "descriptor pool needs at least one set and one descriptor".to_string(),
            });
        }
        let pool = device.create_descriptor_pool(&pool_sizes, config.max_sets)?;
        debug!(
            "Created descriptor pool {:?}: {} sets, {} pool sizes",
            pool,
            config.max_sets,
            pool_sizes.len()
        );
        Ok(Self {
            device,
            pool,
            max_sets: config.max_sets,
        })
    }

    /// Allocate one set per layout in a single call
    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<Vec<vk::DescriptorSet>> {
        self.device.allocate_descriptor_sets(self.pool, layouts)
    }

    /// Return sets to the pool
    pub fn free(&self, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        self.device.free_descriptor_sets(self.pool, sets)
    }

    /// Device the pool was created on
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// Pool handle
    pub const fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Configured set capacity
    pub const fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        debug!("Destroying descriptor pool {:?}", self.pool);
        self.device.destroy_descriptor_pool(self.pool);
    }
}
