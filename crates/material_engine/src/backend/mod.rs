//! GPU backend seam
//!
//! Every component in this crate talks to the GPU through [`GpuDevice`]
//! (device-level objects, memory, submission) and [`PresentationSurface`]
//! (swapchain creation, acquire and present). Two implementations exist:
//!
//! - [`vulkan`]: the real backend on top of `ash`
//! - [`headless`]: records every call and hands out synthetic handles, used by
//!   the test suite and for GPU-less tooling
//!
//! The traits take and return raw `vk` handles so that ownership rules stay
//! the same regardless of the backend: whoever created a handle destroys it.

pub mod commands;
pub mod error;
pub mod headless;
pub mod vulkan;

use ash::vk;

pub use commands::{DescriptorResource, DescriptorWrite, FrameSubmission, LayoutTransition, UploadStep};
pub use error::{VulkanError, VulkanResult};

/// Host-visible, host-coherent buffer and its backing memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostBuffer {
    /// Buffer handle
    pub buffer: vk::Buffer,
    /// Bound memory
    pub memory: vk::DeviceMemory,
    /// Size in bytes requested at creation
    pub size: vk::DeviceSize,
}

/// Device-local image and its backing memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceImage {
    /// Image handle
    pub image: vk::Image,
    /// Bound memory
    pub memory: vk::DeviceMemory,
}

/// Parameters for a 2D, single-layer, optimally tiled image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Texel format
    pub format: vk::Format,
    /// Number of mip levels
    pub mip_levels: u32,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
}

/// Sampler parameters the registry varies between textures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    /// Whether anisotropic filtering is enabled
    pub anisotropy_enable: bool,
    /// Maximum anisotropy, already clamped to the device limit
    pub max_anisotropy: f32,
    /// Maximum level of detail
    pub max_lod: f32,
}

/// Device limits consulted by the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceCapabilities {
    /// `VkPhysicalDeviceFeatures::samplerAnisotropy`
    pub sampler_anisotropy: bool,
    /// `VkPhysicalDeviceLimits::maxSamplerAnisotropy`
    pub max_sampler_anisotropy: f32,
    /// `VkPhysicalDeviceLimits::minUniformBufferOffsetAlignment`
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    /// `VkPhysicalDeviceLimits::maxBoundDescriptorSets`
    pub max_bound_descriptor_sets: u32,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            sampler_anisotropy: true,
            max_sampler_anisotropy: 16.0,
            min_uniform_buffer_offset_alignment: 16,
            max_bound_descriptor_sets: 8,
        }
    }
}

/// Swapchain handle plus the images the presentation engine gave us
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainImages {
    /// Swapchain handle
    pub handle: vk::SwapchainKHR,
    /// Image format
    pub format: vk::Format,
    /// Image color space
    pub color_space: vk::ColorSpaceKHR,
    /// Presentable images, owned by the swapchain
    pub images: Vec<vk::Image>,
    /// Extent the swapchain was created with
    pub extent: vk::Extent2D,
    /// Presentation mode in use
    pub present_mode: vk::PresentModeKHR,
}

/// Result of `vkAcquireNextImageKHR` with the surface-transience cases split out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired
    Acquired {
        /// Index into the swapchain images
        image_index: u32,
        /// The swapchain no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The swapchain must be recreated before it can be used again
    OutOfDate,
}

/// Result of `vkQueuePresentKHR` with the surface-transience cases split out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally
    Presented,
    /// Presented, but the swapchain should be recreated soon
    Suboptimal,
    /// Not presented; the swapchain must be recreated
    OutOfDate,
}

/// Device-level GPU operations used by the material and frame layers
///
/// All methods take `&self`: implementations are driven from a single
/// submitter thread but are shared between components behind an `Arc`.
pub trait GpuDevice {
    /// Limits relevant to sampler creation
    fn capabilities(&self) -> DeviceCapabilities;

    /// Create a descriptor set layout from explicit bindings
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Create a pipeline layout from set layouts (in set order) and push constant ranges
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout>;

    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    /// Create a descriptor pool that supports freeing individual sets
    fn create_descriptor_pool(
        &self,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> VulkanResult<vk::DescriptorPool>;

    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Allocate one set per layout in a single call
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>>;

    /// Return sets to their pool
    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> VulkanResult<()>;

    /// Apply a batch of descriptor writes in one update call
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    /// Create a host-visible, coherent buffer
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<HostBuffer>;

    /// Map, copy `data` at `offset`, unmap
    fn write_buffer(&self, buffer: &HostBuffer, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&self, buffer: HostBuffer);

    /// Create a device-local image
    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<DeviceImage>;

    /// Destroy an image and free its memory
    fn destroy_image(&self, image: DeviceImage);

    /// Create a 2D color view covering `mip_levels` levels
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        mip_levels: u32,
    ) -> VulkanResult<vk::ImageView>;

    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);

    /// Create a linear, repeating sampler
    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler>;

    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: vk::Sampler);

    /// Record `steps` into a one-shot command buffer, submit, and block until
    /// the queue is idle
    fn upload_image(
        &self,
        staging: &HostBuffer,
        image: vk::Image,
        steps: &[UploadStep],
    ) -> VulkanResult<()>;

    /// Create a resettable command pool on the engine's queue family
    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool>;

    /// Destroy a command pool and its command buffers
    fn destroy_command_pool(&self, pool: vk::CommandPool);

    /// Allocate one primary command buffer
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer>;

    /// Reset and begin a one-time-submit recording
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Finish recording
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Create a binary semaphore
    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore>;

    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Create a fence, optionally already signaled
    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence>;

    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);

    /// Block until the fence is signaled, without timeout
    fn wait_for_fence(&self, fence: vk::Fence) -> VulkanResult<()>;

    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()>;

    /// Submit one command buffer on the engine's queue
    fn submit(&self, submission: &FrameSubmission) -> VulkanResult<()>;

    /// Block until the device has finished all submitted work
    fn wait_idle(&self) -> VulkanResult<()>;

    /// Record `vkCmdBindDescriptorSets`
    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
}

/// Swapchain operations against one presentation surface
pub trait PresentationSurface {
    /// Current framebuffer size reported by the window system
    fn framebuffer_extent(&mut self) -> vk::Extent2D;

    /// Block until the window system delivers more events
    fn wait_for_events(&mut self);

    /// Create a swapchain as close to `extent` as the surface allows, using
    /// mailbox presentation when `prefer_mailbox` is set and it is offered
    fn create_swapchain(&mut self, extent: vk::Extent2D, prefer_mailbox: bool) -> VulkanResult<SwapchainImages>;

    /// Destroy a swapchain created by this surface
    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR);

    /// Acquire the next image, signalling `signal` when it is ready
    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VulkanResult<AcquireOutcome>;

    /// Queue `image_index` for presentation once `wait` is signaled
    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome>;
}
