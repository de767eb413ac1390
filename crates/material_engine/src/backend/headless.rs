//! Recording backend without a GPU
//!
//! [`HeadlessDevice`] hands out unique synthetic handles and records every
//! call so tests can assert on what the engine asked for: which objects are
//! alive, what was written to buffers, which descriptor writes were batched
//! together. [`HeadlessSurface`] plays the window system and swapchain, with
//! scriptable acquire and present outcomes and a settable framebuffer size.
//!
//! Failure injection: [`HeadlessDevice::fail_nth`] makes the n-th next
//! creation of an object kind return `ERROR_OUT_OF_DEVICE_MEMORY`, and
//! [`HeadlessDevice::fail_next_submit`] makes the next queue submission
//! return `ERROR_DEVICE_LOST`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk::{self, Handle};

use super::{
    AcquireOutcome, DescriptorWrite, DeviceCapabilities, DeviceImage, FrameSubmission, GpuDevice,
    HostBuffer, ImageDesc, PresentOutcome, PresentationSurface, SamplerDesc, SwapchainImages,
    UploadStep, VulkanError, VulkanResult,
};
use crate::frame::swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, SurfaceLimits,
};

/// Object categories tracked by the headless device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// `VkDescriptorSetLayout`
    DescriptorSetLayout,
    /// `VkPipelineLayout`
    PipelineLayout,
    /// `VkDescriptorPool`
    DescriptorPool,
    /// `VkDescriptorSet`
    DescriptorSet,
    /// `VkBuffer`
    Buffer,
    /// `VkDeviceMemory`
    Memory,
    /// `VkImage` created by the device
    Image,
    /// `VkImageView`
    ImageView,
    /// `VkSampler`
    Sampler,
    /// `VkCommandPool`
    CommandPool,
    /// `VkCommandBuffer`
    CommandBuffer,
    /// `VkSemaphore`
    Semaphore,
    /// `VkFence`
    Fence,
    /// `VkSwapchainKHR`
    Swapchain,
}

/// Binding recorded at set layout creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedBinding {
    /// Binding index
    pub binding: u32,
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Descriptor count
    pub count: u32,
    /// Stage flags
    pub stages: vk::ShaderStageFlags,
}

/// Pipeline layout recorded at creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPipelineLayout {
    /// Set layouts in pipeline-layout order
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    /// `(stages, offset, size)` per push constant range
    pub push_constant_ranges: Vec<(vk::ShaderStageFlags, u32, u32)>,
}

/// Texture upload recorded by `upload_image`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    /// Destination image
    pub image: vk::Image,
    /// Bytes in the staging buffer at submit time
    pub staging_contents: Vec<u8>,
    /// Commands recorded
    pub steps: Vec<UploadStep>,
}

/// `vkCmdBindDescriptorSets` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBind {
    /// Command buffer
    pub command_buffer: vk::CommandBuffer,
    /// Bind point
    pub bind_point: vk::PipelineBindPoint,
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// First set index
    pub first_set: u32,
    /// Bound sets
    pub sets: Vec<vk::DescriptorSet>,
    /// Dynamic offsets
    pub dynamic_offsets: Vec<u32>,
}

#[derive(Debug, Default)]
struct DeviceState {
    next_handle: u64,
    live: HashMap<ObjectKind, HashSet<u64>>,
    destroyed: HashMap<ObjectKind, Vec<u64>>,
    failures: HashMap<ObjectKind, u32>,
    set_layouts: HashMap<u64, Vec<RecordedBinding>>,
    pipeline_layouts: HashMap<u64, RecordedPipelineLayout>,
    pool_capacity: HashMap<u64, u32>,
    set_owner: HashMap<u64, u64>,
    allocation_calls: Vec<usize>,
    write_batches: Vec<Vec<DescriptorWrite>>,
    buffers: HashMap<u64, Vec<u8>>,
    image_memory: HashMap<u64, u64>,
    samplers: Vec<SamplerDesc>,
    uploads: Vec<RecordedUpload>,
    recording: HashSet<u64>,
    fences: HashMap<u64, bool>,
    submissions: Vec<FrameSubmission>,
    binds: Vec<RecordedBind>,
    wait_idle_calls: usize,
    fail_next_submit: bool,
}

impl DeviceState {
    fn mint(&mut self, kind: ObjectKind) -> u64 {
        self.next_handle += 1;
        let raw = self.next_handle;
        self.live.entry(kind).or_default().insert(raw);
        raw
    }

    fn create(&mut self, kind: ObjectKind) -> VulkanResult<u64> {
        if let Some(remaining) = self.failures.get_mut(&kind) {
            if *remaining == 0 {
                self.failures.remove(&kind);
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            *remaining -= 1;
        }
        Ok(self.mint(kind))
    }

    fn destroy(&mut self, kind: ObjectKind, raw: u64) {
        if raw == 0 {
            return;
        }
        let removed = self.live.get_mut(&kind).map_or(false, |set| set.remove(&raw));
        if removed {
            self.destroyed.entry(kind).or_default().push(raw);
        } else {
            log::warn!("headless: destroy of unknown {kind:?} {raw:#x}");
        }
    }

    fn is_live(&self, kind: ObjectKind, raw: u64) -> bool {
        self.live.get(&kind).map_or(false, |set| set.contains(&raw))
    }
}

/// GPU-less [`GpuDevice`] that records every call
#[derive(Debug)]
pub struct HeadlessDevice {
    capabilities: DeviceCapabilities,
    state: Mutex<DeviceState>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Device reporting [`DeviceCapabilities::default`] limits
    pub fn new() -> Self {
        Self::with_capabilities(DeviceCapabilities::default())
    }

    /// Device reporting the given limits
    pub fn with_capabilities(capabilities: DeviceCapabilities) -> Self {
        Self {
            capabilities,
            state: Mutex::new(DeviceState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make the `nth` next creation of `kind` fail (0 = the very next one)
    pub fn fail_nth(&self, kind: ObjectKind, nth: u32) {
        self.state().failures.insert(kind, nth);
    }

    /// Make the next `submit` fail without signaling its fence
    pub fn fail_next_submit(&self) {
        self.state().fail_next_submit = true;
    }

    /// Number of live objects of `kind`
    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.state().live.get(&kind).map_or(0, HashSet::len)
    }

    /// Whether the raw handle of `kind` is alive
    pub fn is_live(&self, kind: ObjectKind, raw: u64) -> bool {
        self.state().is_live(kind, raw)
    }

    /// Raw handles of `kind` destroyed so far, in destruction order
    pub fn destroyed(&self, kind: ObjectKind) -> Vec<u64> {
        self.state().destroyed.get(&kind).cloned().unwrap_or_default()
    }

    /// Bindings a set layout was created with
    pub fn set_layout_bindings(&self, layout: vk::DescriptorSetLayout) -> Option<Vec<RecordedBinding>> {
        self.state().set_layouts.get(&layout.as_raw()).cloned()
    }

    /// Contents a pipeline layout was created with
    pub fn pipeline_layout(&self, layout: vk::PipelineLayout) -> Option<RecordedPipelineLayout> {
        self.state().pipeline_layouts.get(&layout.as_raw()).cloned()
    }

    /// Number of sets requested by each `allocate_descriptor_sets` call
    pub fn allocation_calls(&self) -> Vec<usize> {
        self.state().allocation_calls.clone()
    }

    /// Each `update_descriptor_sets` batch
    pub fn write_batches(&self) -> Vec<Vec<DescriptorWrite>> {
        self.state().write_batches.clone()
    }

    /// Current contents of a buffer
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state().buffers.get(&buffer.as_raw()).cloned()
    }

    /// Every sampler description passed to `create_sampler`
    pub fn sampler_descs(&self) -> Vec<SamplerDesc> {
        self.state().samplers.clone()
    }

    /// Every texture upload
    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.state().uploads.clone()
    }

    /// Every frame submission
    pub fn submissions(&self) -> Vec<FrameSubmission> {
        self.state().submissions.clone()
    }

    /// Every descriptor bind
    pub fn binds(&self) -> Vec<RecordedBind> {
        self.state().binds.clone()
    }

    /// Number of `wait_idle` calls
    pub fn wait_idle_calls(&self) -> usize {
        self.state().wait_idle_calls
    }

    /// Whether a fence is currently signaled
    pub fn fence_signaled(&self, fence: vk::Fence) -> Option<bool> {
        self.state().fences.get(&fence.as_raw()).copied()
    }

    /// Mint a tracked handle for an object the surface owns
    fn mint(&self, kind: ObjectKind) -> u64 {
        self.state().mint(kind)
    }
}

impl GpuDevice for HeadlessDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let mut state = self.state();
        let raw = state.create(ObjectKind::DescriptorSetLayout)?;
        let recorded = bindings
            .iter()
            .map(|b| RecordedBinding {
                binding: b.binding,
                descriptor_type: b.descriptor_type,
                count: b.descriptor_count,
                stages: b.stage_flags,
            })
            .collect();
        state.set_layouts.insert(raw, recorded);
        Ok(vk::DescriptorSetLayout::from_raw(raw))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state().destroy(ObjectKind::DescriptorSetLayout, layout.as_raw());
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let mut state = self.state();
        if let Some(dead) = set_layouts
            .iter()
            .find(|layout| !state.is_live(ObjectKind::DescriptorSetLayout, layout.as_raw()))
        {
            return Err(VulkanError::InvalidOperation {
                reason: format!("pipeline layout references dead set layout {:#x}", dead.as_raw()),
            });
        }
        let raw = state.create(ObjectKind::PipelineLayout)?;
        state.pipeline_layouts.insert(
            raw,
            RecordedPipelineLayout {
                set_layouts: set_layouts.to_vec(),
                push_constant_ranges: push_constant_ranges
                    .iter()
                    .map(|r| (r.stage_flags, r.offset, r.size))
                    .collect(),
            },
        );
        Ok(vk::PipelineLayout::from_raw(raw))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state().destroy(ObjectKind::PipelineLayout, layout.as_raw());
    }

    fn create_descriptor_pool(
        &self,
        _pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> VulkanResult<vk::DescriptorPool> {
        let mut state = self.state();
        let raw = state.create(ObjectKind::DescriptorPool)?;
        state.pool_capacity.insert(raw, max_sets);
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        let owned: Vec<u64> = state
            .set_owner
            .iter()
            .filter(|(_, owner)| **owner == pool.as_raw())
            .map(|(&set, _)| set)
            .collect();
        for set in owned {
            state.set_owner.remove(&set);
            state.destroy(ObjectKind::DescriptorSet, set);
        }
        state.pool_capacity.remove(&pool.as_raw());
        state.destroy(ObjectKind::DescriptorPool, pool.as_raw());
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state();
        state.allocation_calls.push(layouts.len());
        let requested = u32::try_from(layouts.len()).unwrap_or(u32::MAX);
        let capacity = state
            .pool_capacity
            .get(&pool.as_raw())
            .copied()
            .ok_or(VulkanError::Api(vk::Result::ERROR_UNKNOWN))?;
        if requested > capacity {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }

        let mut sets = Vec::with_capacity(layouts.len());
        for _ in layouts {
            match state.create(ObjectKind::DescriptorSet) {
                Ok(raw) => {
                    state.set_owner.insert(raw, pool.as_raw());
                    sets.push(vk::DescriptorSet::from_raw(raw));
                }
                Err(err) => {
                    for set in &sets {
                        state.set_owner.remove(&set.as_raw());
                        state.destroy(ObjectKind::DescriptorSet, set.as_raw());
                    }
                    return Err(err);
                }
            }
        }
        state.pool_capacity.insert(pool.as_raw(), capacity - requested);
        Ok(sets)
    }

    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> VulkanResult<()> {
        let mut state = self.state();
        for set in sets {
            state.set_owner.remove(&set.as_raw());
            state.destroy(ObjectKind::DescriptorSet, set.as_raw());
        }
        if let Some(capacity) = state.pool_capacity.get_mut(&pool.as_raw()) {
            *capacity += u32::try_from(sets.len()).unwrap_or(0);
        }
        Ok(())
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        self.state().write_batches.push(writes.to_vec());
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
    ) -> VulkanResult<HostBuffer> {
        let mut state = self.state();
        let buffer = state.create(ObjectKind::Buffer)?;
        let memory = match state.create(ObjectKind::Memory) {
            Ok(memory) => memory,
            Err(err) => {
                state.destroy(ObjectKind::Buffer, buffer);
                return Err(err);
            }
        };
        let len = usize::try_from(size).map_err(|_| VulkanError::NoSuitableMemoryType)?;
        state.buffers.insert(buffer, vec![0; len]);
        Ok(HostBuffer {
            buffer: vk::Buffer::from_raw(buffer),
            memory: vk::DeviceMemory::from_raw(memory),
            size,
        })
    }

    fn write_buffer(&self, buffer: &HostBuffer, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let mut state = self.state();
        let contents = state
            .buffers
            .get_mut(&buffer.buffer.as_raw())
            .ok_or(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(data.len());
        if end > contents.len() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes at {start} exceeds buffer of {}", data.len(), contents.len()),
            });
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: HostBuffer) {
        let mut state = self.state();
        state.buffers.remove(&buffer.buffer.as_raw());
        state.destroy(ObjectKind::Buffer, buffer.buffer.as_raw());
        state.destroy(ObjectKind::Memory, buffer.memory.as_raw());
    }

    fn create_image(&self, _desc: &ImageDesc) -> VulkanResult<DeviceImage> {
        let mut state = self.state();
        let image = state.create(ObjectKind::Image)?;
        let memory = match state.create(ObjectKind::Memory) {
            Ok(memory) => memory,
            Err(err) => {
                state.destroy(ObjectKind::Image, image);
                return Err(err);
            }
        };
        state.image_memory.insert(image, memory);
        Ok(DeviceImage {
            image: vk::Image::from_raw(image),
            memory: vk::DeviceMemory::from_raw(memory),
        })
    }

    fn destroy_image(&self, image: DeviceImage) {
        let mut state = self.state();
        state.image_memory.remove(&image.image.as_raw());
        state.destroy(ObjectKind::Image, image.image.as_raw());
        state.destroy(ObjectKind::Memory, image.memory.as_raw());
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _mip_levels: u32,
    ) -> VulkanResult<vk::ImageView> {
        let raw = self.state().create(ObjectKind::ImageView)?;
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state().destroy(ObjectKind::ImageView, view.as_raw());
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        let mut state = self.state();
        let raw = state.create(ObjectKind::Sampler)?;
        state.samplers.push(*desc);
        Ok(vk::Sampler::from_raw(raw))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state().destroy(ObjectKind::Sampler, sampler.as_raw());
    }

    fn upload_image(
        &self,
        staging: &HostBuffer,
        image: vk::Image,
        steps: &[UploadStep],
    ) -> VulkanResult<()> {
        let mut state = self.state();
        let staging_contents = state
            .buffers
            .get(&staging.buffer.as_raw())
            .cloned()
            .ok_or(VulkanError::InvalidOperation {
                reason: "upload from unknown staging buffer".to_string(),
            })?;
        state.uploads.push(RecordedUpload {
            image,
            staging_contents,
            steps: steps.to_vec(),
        });
        Ok(())
    }

    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool> {
        let raw = self.state().create(ObjectKind::CommandPool)?;
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state().destroy(ObjectKind::CommandPool, pool.as_raw());
    }

    fn allocate_command_buffer(&self, _pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer> {
        let raw = self.state().create(ObjectKind::CommandBuffer)?;
        Ok(vk::CommandBuffer::from_raw(raw))
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.state().recording.insert(command_buffer.as_raw());
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        if self.state().recording.remove(&command_buffer.as_raw()) {
            Ok(())
        } else {
            Err(VulkanError::InvalidOperation {
                reason: "end of a command buffer that is not recording".to_string(),
            })
        }
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        let raw = self.state().create(ObjectKind::Semaphore)?;
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().destroy(ObjectKind::Semaphore, semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let mut state = self.state();
        let raw = state.create(ObjectKind::Fence)?;
        state.fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        state.fences.remove(&fence.as_raw());
        state.destroy(ObjectKind::Fence, fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        match self.state().fences.get(&fence.as_raw()).copied() {
            Some(true) => Ok(()),
            // Nothing pending will ever signal it: a real device would hang here
            Some(false) => Err(VulkanError::InvalidOperation {
                reason: format!("wait on unsignaled fence {:#x} with no pending work", fence.as_raw()),
            }),
            None => Err(VulkanError::Api(vk::Result::ERROR_UNKNOWN)),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        let mut state = self.state();
        let signaled = state
            .fences
            .get_mut(&fence.as_raw())
            .ok_or(VulkanError::Api(vk::Result::ERROR_UNKNOWN))?;
        *signaled = false;
        Ok(())
    }

    fn submit(&self, submission: &FrameSubmission) -> VulkanResult<()> {
        let mut state = self.state();
        if state.recording.contains(&submission.command_buffer.as_raw()) {
            return Err(VulkanError::InvalidOperation {
                reason: "submit of a command buffer still recording".to_string(),
            });
        }
        if std::mem::take(&mut state.fail_next_submit) {
            return Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST));
        }
        // Work completes immediately
        if let Some(signaled) = state.fences.get_mut(&submission.fence.as_raw()) {
            *signaled = true;
        }
        state.submissions.push(*submission);
        Ok(())
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        self.state().wait_idle_calls += 1;
        Ok(())
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.state().binds.push(RecordedBind {
            command_buffer,
            bind_point,
            layout,
            first_set,
            sets: sets.to_vec(),
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }
}

/// Scriptable stand-in for a window surface and its swapchains
#[derive(Debug)]
pub struct HeadlessSurface {
    device: Arc<HeadlessDevice>,
    extent: vk::Extent2D,
    pending_extents: VecDeque<vk::Extent2D>,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    min_image_count: u32,
    max_image_count: u32,
    images: HashMap<u64, Vec<vk::Image>>,
    next_image: u32,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    created_extents: Vec<vk::Extent2D>,
    presents: Vec<(vk::SwapchainKHR, u32, vk::Semaphore)>,
    event_waits: usize,
}

impl HeadlessSurface {
    /// Surface of the given size offering `B8G8R8A8_UNORM` and `R8G8B8A8_SRGB`,
    /// with FIFO and mailbox presentation
    pub fn new(device: Arc<HeadlessDevice>, width: u32, height: u32) -> Self {
        Self {
            device,
            extent: vk::Extent2D { width, height },
            pending_extents: VecDeque::new(),
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            min_image_count: 2,
            max_image_count: 0,
            images: HashMap::new(),
            next_image: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            created_extents: Vec::new(),
            presents: Vec::new(),
            event_waits: 0,
        }
    }

    /// Replace the advertised surface formats
    pub fn set_formats(&mut self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.formats = formats;
    }

    /// Replace the advertised presentation modes
    pub fn set_present_modes(&mut self, modes: Vec<vk::PresentModeKHR>) {
        self.present_modes = modes;
    }

    /// Resize the framebuffer immediately
    pub fn set_extent(&mut self, width: u32, height: u32) {
        self.extent = vk::Extent2D { width, height };
    }

    /// Size adopted on each following `wait_for_events`, in order
    pub fn queue_extent_after_events(&mut self, width: u32, height: u32) {
        self.pending_extents.push_back(vk::Extent2D { width, height });
    }

    /// Outcome returned by the next unscripted-otherwise acquire
    pub fn script_acquire(&mut self, outcome: AcquireOutcome) {
        self.acquire_script.push_back(outcome);
    }

    /// Outcome returned by the next present
    pub fn script_present(&mut self, outcome: PresentOutcome) {
        self.present_script.push_back(outcome);
    }

    /// Extents of every swapchain created, in order
    pub fn created_extents(&self) -> &[vk::Extent2D] {
        &self.created_extents
    }

    /// Every present call
    pub fn presents(&self) -> &[(vk::SwapchainKHR, u32, vk::Semaphore)] {
        &self.presents
    }

    /// Number of `wait_for_events` calls
    pub const fn event_waits(&self) -> usize {
        self.event_waits
    }

    fn limits(&self) -> SurfaceLimits {
        SurfaceLimits {
            current_extent: self.extent,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 16384,
                height: 16384,
            },
            min_image_count: self.min_image_count,
            max_image_count: self.max_image_count,
        }
    }
}

impl PresentationSurface for HeadlessSurface {
    fn framebuffer_extent(&mut self) -> vk::Extent2D {
        self.extent
    }

    fn wait_for_events(&mut self) {
        self.event_waits += 1;
        if let Some(extent) = self.pending_extents.pop_front() {
            self.extent = extent;
        }
    }

    fn create_swapchain(&mut self, extent: vk::Extent2D, prefer_mailbox: bool) -> VulkanResult<SwapchainImages> {
        let limits = self.limits();
        let extent = choose_extent(&limits, extent);
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "swapchain with zero extent".to_string(),
            });
        }
        let format = choose_surface_format(&self.formats).ok_or_else(|| {
            VulkanError::InitializationFailed("surface reports no formats".to_string())
        })?;
        let image_count = choose_image_count(&limits);
        let present_mode = choose_present_mode(&self.present_modes, prefer_mailbox);

        let handle = self.device.mint(ObjectKind::Swapchain);
        let images: Vec<vk::Image> = (0..image_count)
            .map(|i| vk::Image::from_raw((handle << 8) | u64::from(i + 1)))
            .collect();
        self.images.insert(handle, images.clone());
        self.next_image = 0;
        self.created_extents.push(extent);

        Ok(SwapchainImages {
            handle: vk::SwapchainKHR::from_raw(handle),
            format: format.format,
            color_space: format.color_space,
            images,
            extent,
            present_mode,
        })
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        self.images.remove(&swapchain.as_raw());
        self.device.state().destroy(ObjectKind::Swapchain, swapchain.as_raw());
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        _signal: vk::Semaphore,
    ) -> VulkanResult<AcquireOutcome> {
        let count = self
            .images
            .get(&swapchain.as_raw())
            .map(Vec::len)
            .ok_or(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR))?;
        if let Some(outcome) = self.acquire_script.pop_front() {
            return Ok(outcome);
        }
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % u32::try_from(count).unwrap_or(1);
        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal: false,
        })
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome> {
        if !self.images.contains_key(&swapchain.as_raw()) {
            return Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR));
        }
        self.presents.push((swapchain, image_index, wait));
        Ok(self.present_script.pop_front().unwrap_or(PresentOutcome::Presented))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injected_failure_hits_the_nth_creation() {
        let device = HeadlessDevice::new();
        device.fail_nth(ObjectKind::Semaphore, 1);
        assert!(device.create_semaphore().is_ok());
        let err = device.create_semaphore().unwrap_err();
        assert!(err.is_exhaustion());
        assert!(device.create_semaphore().is_ok());
        assert_eq!(device.live_count(ObjectKind::Semaphore), 2);
    }

    #[test]
    fn test_pool_capacity_and_free() {
        let device = HeadlessDevice::new();
        let layout = device.create_descriptor_set_layout(&[]).unwrap();
        let pool = device.create_descriptor_pool(&[], 2).unwrap();

        let sets = device.allocate_descriptor_sets(pool, &[layout, layout]).unwrap();
        let err = device.allocate_descriptor_sets(pool, &[layout]).unwrap_err();
        assert_eq!(err, VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));

        device.free_descriptor_sets(pool, &sets[..1]).unwrap();
        assert!(device.allocate_descriptor_sets(pool, &[layout]).is_ok());
        assert_eq!(device.allocation_calls(), vec![2, 1, 1]);

        device.destroy_descriptor_pool(pool);
        assert_eq!(device.live_count(ObjectKind::DescriptorSet), 0);
    }

    #[test]
    fn test_fence_signaled_by_submit() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(true).unwrap();
        device.reset_fence(fence).unwrap();
        assert!(device.wait_for_fence(fence).is_err());

        let pool = device.create_command_pool().unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        device.begin_command_buffer(cmd).unwrap();
        device.end_command_buffer(cmd).unwrap();
        device
            .submit(&FrameSubmission {
                command_buffer: cmd,
                wait_semaphore: vk::Semaphore::null(),
                wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                signal_semaphore: vk::Semaphore::null(),
                fence,
            })
            .unwrap();
        assert!(device.wait_for_fence(fence).is_ok());
    }

    #[test]
    fn test_buffer_writes_are_bounds_checked() {
        let device = HeadlessDevice::new();
        let buffer = device.create_buffer(8, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
        device.write_buffer(&buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert!(device.write_buffer(&buffer, 6, &[1, 2, 3]).is_err());
        assert_eq!(device.buffer_contents(buffer.buffer).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_surface_script_and_default_rotation() {
        let device = Arc::new(HeadlessDevice::new());
        let mut surface = HeadlessSurface::new(device.clone(), 640, 480);
        let swapchain = surface
            .create_swapchain(vk::Extent2D { width: 640, height: 480 }, false)
            .unwrap();
        assert_eq!(swapchain.images.len(), 3);
        assert_eq!(swapchain.format, vk::Format::R8G8B8A8_SRGB);

        surface.script_acquire(AcquireOutcome::OutOfDate);
        let semaphore = device.create_semaphore().unwrap();
        assert_eq!(
            surface.acquire_next_image(swapchain.handle, semaphore).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(
            surface.acquire_next_image(swapchain.handle, semaphore).unwrap(),
            AcquireOutcome::Acquired {
                image_index: 0,
                suboptimal: false
            }
        );

        surface.destroy_swapchain(swapchain.handle);
        assert_eq!(device.live_count(ObjectKind::Swapchain), 0);
    }
}
