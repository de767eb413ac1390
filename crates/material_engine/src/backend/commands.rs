//! Backend-neutral command descriptions
//!
//! Descriptor writes, frame submissions and image upload steps are described
//! as plain data so that the component computing them can be tested without a
//! device, and the backend only has to translate them into `vk` calls.

use ash::vk;

/// Resource referenced by one descriptor write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    /// Image view and sampler (sampler ignored for storage and sampled images)
    Image {
        /// Image view
        view: vk::ImageView,
        /// Sampler, may be null
        sampler: vk::Sampler,
        /// Layout the image will be in when accessed
        layout: vk::ImageLayout,
    },
    /// Buffer range
    Buffer {
        /// Buffer handle
        buffer: vk::Buffer,
        /// Byte offset
        offset: vk::DeviceSize,
        /// Byte range
        range: vk::DeviceSize,
    },
}

/// One `VkWriteDescriptorSet` with a single descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// Destination set
    pub set: vk::DescriptorSet,
    /// Destination binding
    pub binding: u32,
    /// First array element written
    pub array_element: u32,
    /// Descriptor type of the binding
    pub descriptor_type: vk::DescriptorType,
    /// Written resource
    pub resource: DescriptorResource,
}

/// One queue submission for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSubmission {
    /// Recorded command buffer
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore signaled by image acquisition
    pub wait_semaphore: vk::Semaphore,
    /// Stage that waits on `wait_semaphore`
    pub wait_stage: vk::PipelineStageFlags,
    /// Semaphore waited on by presentation
    pub signal_semaphore: vk::Semaphore,
    /// Fence signaled when the GPU retires the submission
    pub fence: vk::Fence,
}

/// Image memory barrier over a mip range of a color image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// First mip level affected
    pub base_mip_level: u32,
    /// Number of mip levels affected
    pub level_count: u32,
    /// Layout before the barrier
    pub old_layout: vk::ImageLayout,
    /// Layout after the barrier
    pub new_layout: vk::ImageLayout,
    /// Accesses that must complete first
    pub src_access: vk::AccessFlags,
    /// Accesses that wait
    pub dst_access: vk::AccessFlags,
    /// Producing stage
    pub src_stage: vk::PipelineStageFlags,
    /// Consuming stage
    pub dst_stage: vk::PipelineStageFlags,
}

/// One command in a texture upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    /// Pipeline barrier with one image memory barrier
    Transition(LayoutTransition),
    /// Copy the whole staging buffer into mip 0
    CopyBufferToImage {
        /// Width of mip 0
        width: u32,
        /// Height of mip 0
        height: u32,
    },
    /// Linear-filtered blit from one mip level to the next
    Blit {
        /// Source level (in `TRANSFER_SRC_OPTIMAL`)
        src_mip: u32,
        /// Source width
        src_width: i32,
        /// Source height
        src_height: i32,
        /// Destination level (in `TRANSFER_DST_OPTIMAL`)
        dst_mip: u32,
        /// Destination width
        dst_width: i32,
        /// Destination height
        dst_height: i32,
    },
}
