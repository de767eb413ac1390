//! Vulkan backend on top of `ash`
//!
//! [`VulkanInstance`] loads the loader and creates the instance, optionally
//! with validation routed into `log`. [`AshDevice`] owns the logical device,
//! one queue that does graphics, compute, and transfer, and a transient
//! command pool for texture uploads. Window-system integration lives in
//! [`surface`].

pub mod surface;

use std::ffi::{c_char, CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr;
use ash::{vk, Device, Entry, Instance};
use log::{debug, info, warn};

pub use surface::{AshSurface, WindowEvents};

use super::{
    DescriptorResource, DescriptorWrite, DeviceCapabilities, DeviceImage, FrameSubmission, GpuDevice, HostBuffer,
    ImageDesc, SamplerDesc, UploadStep, VulkanError, VulkanResult,
};

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Loader entry and instance, destroyed together
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Load Vulkan and create an instance
    ///
    /// `extensions` are the instance extensions the window system needs for
    /// surface creation. With `enable_validation` the Khronos validation
    /// layer is enabled and its messages are forwarded to `log`.
    pub fn new(app_name: &str, extensions: &[&CStr], enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed("application name contains a NUL byte".to_string()))?;
        let engine_name = CString::new(env!("CARGO_PKG_NAME"))
            .map_err(|_| VulkanError::InitializationFailed("engine name contains a NUL byte".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();
        let mut layer_names: Vec<*const c_char> = Vec::new();
        if enable_validation {
            extension_names.push(DebugUtils::name().as_ptr());
            layer_names.push(VALIDATION_LAYER.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);
        let instance = unsafe { entry.create_instance(&create_info, None) }?;

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::create_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(err) => {
                    warn!("Validation enabled but the debug messenger failed: {}", err);
                    None
                }
            }
        } else {
            None
        };

        info!("Created Vulkan instance (validation: {})", enable_validation);
        Ok(Self { entry, instance, debug })
    }

    fn create_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        Ok(unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?)
    }

    /// Loader entry
    pub const fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Instance function table
    pub const fn raw(&self) -> &Instance {
        &self.instance
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();
    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    }
    vk::FALSE
}

/// First physical device with a queue family that does graphics and compute
/// and, when a surface is given, can present to it
///
/// Returns the device and the queue family index.
pub fn select_physical_device(
    instance: &VulkanInstance,
    surface: Option<(&khr::Surface, vk::SurfaceKHR)>,
) -> VulkanResult<(vk::PhysicalDevice, u32)> {
    let instance = instance.raw();
    let devices = unsafe { instance.enumerate_physical_devices() }?;
    let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;

    for device in devices {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        for (index, family) in families.iter().enumerate() {
            let index = u32::try_from(index).unwrap_or(u32::MAX);
            if !family.queue_flags.contains(required) {
                continue;
            }
            let presents = match surface {
                Some((loader, surface)) => {
                    unsafe { loader.get_physical_device_surface_support(device, index, surface) }?
                }
                None => true,
            };
            if presents {
                let properties = unsafe { instance.get_physical_device_properties(device) };
                let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
                info!("Selected GPU: {} (queue family {})", name.to_string_lossy(), index);
                return Ok((device, index));
            }
        }
    }

    Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
}

/// Logical device and the single queue the engine submits to
pub struct AshDevice {
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    device: Device,
    queue: vk::Queue,
    queue_family: u32,
    capabilities: DeviceCapabilities,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    transient_pool: vk::CommandPool,
}

impl AshDevice {
    /// Create the logical device with the swapchain extension enabled and
    /// sampler anisotropy turned on when the hardware has it
    pub fn new(instance: &VulkanInstance, physical_device: vk::PhysicalDevice, queue_family: u32) -> VulkanResult<Self> {
        let raw_instance = instance.raw();
        let features = unsafe { raw_instance.get_physical_device_features(physical_device) };
        let properties = unsafe { raw_instance.get_physical_device_properties(physical_device) };
        let memory_properties = unsafe { raw_instance.get_physical_device_memory_properties(physical_device) };

        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities)
            .build()];
        let extensions = [khr::Swapchain::name().as_ptr()];
        let enabled_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(features.sampler_anisotropy == vk::TRUE)
            .build();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&enabled_features);

        let device = unsafe { raw_instance.create_device(physical_device, &create_info, None) }?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(queue_family);
        let transient_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(err) => {
                unsafe { device.destroy_device(None) };
                return Err(err.into());
            }
        };

        let capabilities = DeviceCapabilities {
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
            min_uniform_buffer_offset_alignment: properties.limits.min_uniform_buffer_offset_alignment,
            max_bound_descriptor_sets: properties.limits.max_bound_descriptor_sets,
        };
        debug!("Logical device ready: {:?}", capabilities);

        Ok(Self {
            instance: raw_instance.clone(),
            physical_device,
            device,
            queue,
            queue_family,
            capabilities,
            memory_properties,
            transient_pool,
        })
    }

    /// Device function table
    pub const fn raw(&self) -> &Device {
        &self.device
    }

    /// Instance function table the device was created from
    pub const fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Physical device the logical device was created on
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Submission and presentation queue
    pub const fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Family of [`Self::queue`]
    pub const fn queue_family(&self) -> u32 {
        self.queue_family
    }

    fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        (0..self.memory_properties.memory_type_count)
            .find(|&i| {
                type_filter & (1 << i) != 0
                    && self.memory_properties.memory_types[i as usize]
                        .property_flags
                        .contains(properties)
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }

    fn allocate(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let memory_type = self.find_memory_type(requirements.memory_type_bits, properties)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        Ok(unsafe { self.device.allocate_memory(&alloc_info, None) }?)
    }

    fn record_step(&self, command_buffer: vk::CommandBuffer, staging: vk::Buffer, image: vk::Image, step: &UploadStep) {
        let color_layers = |mip_level| vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level,
            base_array_layer: 0,
            layer_count: 1,
        };
        match *step {
            UploadStep::Transition(t) => {
                let barrier = vk::ImageMemoryBarrier::builder()
                    .old_layout(t.old_layout)
                    .new_layout(t.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: t.base_mip_level,
                        level_count: t.level_count,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .src_access_mask(t.src_access)
                    .dst_access_mask(t.dst_access)
                    .build();
                unsafe {
                    self.device.cmd_pipeline_barrier(
                        command_buffer,
                        t.src_stage,
                        t.dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    );
                }
            }
            UploadStep::CopyBufferToImage { width, height } => {
                let region = vk::BufferImageCopy::builder()
                    .image_subresource(color_layers(0))
                    .image_extent(vk::Extent3D { width, height, depth: 1 })
                    .build();
                unsafe {
                    self.device.cmd_copy_buffer_to_image(
                        command_buffer,
                        staging,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
            }
            UploadStep::Blit {
                src_mip,
                src_width,
                src_height,
                dst_mip,
                dst_width,
                dst_height,
            } => {
                let blit = vk::ImageBlit::builder()
                    .src_offsets([
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: src_width,
                            y: src_height,
                            z: 1,
                        },
                    ])
                    .src_subresource(color_layers(src_mip))
                    .dst_offsets([
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: dst_width,
                            y: dst_height,
                            z: 1,
                        },
                    ])
                    .dst_subresource(color_layers(dst_mip))
                    .build();
                unsafe {
                    self.device.cmd_blit_image(
                        command_buffer,
                        image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::LINEAR,
                    );
                }
            }
        }
    }

    fn run_upload(
        &self,
        command_buffer: vk::CommandBuffer,
        staging: vk::Buffer,
        image: vk::Image,
        steps: &[UploadStep],
    ) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }?;
        for step in steps {
            self.record_step(command_buffer, staging, image, step);
        }
        unsafe { self.device.end_command_buffer(command_buffer) }?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
        unsafe {
            self.device.queue_submit(self.queue, &[submit_info], vk::Fence::null())?;
            self.device.queue_wait_idle(self.queue)?;
        }
        Ok(())
    }
}

impl GpuDevice for AshDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        Ok(unsafe { self.device.create_descriptor_set_layout(&create_info, None) }?)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        Ok(unsafe { self.device.create_pipeline_layout(&create_info, None) }?)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> VulkanResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .pool_sizes(pool_sizes)
            .max_sets(max_sets);
        Ok(unsafe { self.device.create_descriptor_pool(&create_info, None) }?)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        Ok(unsafe { self.device.allocate_descriptor_sets(&alloc_info) }?)
    }

    fn free_descriptor_sets(&self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        if sets.is_empty() {
            return Ok(());
        }
        Ok(unsafe { self.device.free_descriptor_sets(pool, sets) }?)
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Image { view, sampler, layout } => vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                },
                DescriptorResource::Buffer { .. } => vk::DescriptorImageInfo::default(),
            })
            .collect();
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Buffer { buffer, offset, range } => vk::DescriptorBufferInfo { buffer, offset, range },
                DescriptorResource::Image { .. } => vk::DescriptorBufferInfo::default(),
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, write)| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(write.set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(write.descriptor_type);
                match write.resource {
                    DescriptorResource::Image { .. } => builder.image_info(std::slice::from_ref(&image_infos[i])).build(),
                    DescriptorResource::Buffer { .. } => {
                        builder.buffer_info(std::slice::from_ref(&buffer_infos[i])).build()
                    }
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<HostBuffer> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&create_info, None) }?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory = match self.allocate(
            requirements,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };
        if let Err(err) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(err.into());
        }

        Ok(HostBuffer { buffer, memory, size })
    }

    fn write_buffer(&self, buffer: &HostBuffer, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let len = data.len() as vk::DeviceSize;
        if offset.checked_add(len).map_or(true, |end| end > buffer.size) {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "write of {} bytes at offset {} exceeds buffer size {}",
                    data.len(),
                    offset,
                    buffer.size
                ),
            });
        }
        unsafe {
            let mapped = self
                .device
                .map_memory(buffer.memory, offset, len, vk::MemoryMapFlags::empty())?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast::<u8>(), data.len());
            self.device.unmap_memory(buffer.memory);
        }
        Ok(())
    }

    fn destroy_buffer(&self, buffer: HostBuffer) {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
            self.device.free_memory(buffer.memory, None);
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<DeviceImage> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let image = unsafe { self.device.create_image(&create_info, None) }?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let memory = match self.allocate(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(err);
            }
        };
        if let Err(err) = unsafe { self.device.bind_image_memory(image, memory, 0) } {
            unsafe {
                self.device.destroy_image(image, None);
                self.device.free_memory(memory, None);
            }
            return Err(err.into());
        }

        Ok(DeviceImage { image, memory })
    }

    fn destroy_image(&self, image: DeviceImage) {
        unsafe {
            self.device.destroy_image(image.image, None);
            self.device.free_memory(image.memory, None);
        }
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format, mip_levels: u32) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        Ok(unsafe { self.device.create_image_view(&create_info, None) }?)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(desc.anisotropy_enable)
            .max_anisotropy(desc.max_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(desc.max_lod);
        Ok(unsafe { self.device.create_sampler(&create_info, None) }?)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn upload_image(&self, staging: &HostBuffer, image: vk::Image, steps: &[UploadStep]) -> VulkanResult<()> {
        let command_buffer = self.allocate_command_buffer(self.transient_pool)?;
        let result = self.run_upload(command_buffer, staging.buffer, image, steps);
        unsafe { self.device.free_command_buffers(self.transient_pool, &[command_buffer]) };
        result
    }

    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.queue_family);
        Ok(unsafe { self.device.create_command_pool(&create_info, None) }?)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }?;
        buffers.into_iter().next().ok_or(VulkanError::InvalidOperation {
            reason: "driver returned no command buffer".to_string(),
        })
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            self.device.begin_command_buffer(command_buffer, &begin_info)?;
        }
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        Ok(unsafe { self.device.end_command_buffer(command_buffer) }?)
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        Ok(unsafe { self.device.create_semaphore(&create_info, None) }?)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        Ok(unsafe { self.device.create_fence(&create_info, None) }?)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        Ok(unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }?)
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        Ok(unsafe { self.device.reset_fences(&[fence]) }?)
    }

    fn submit(&self, submission: &FrameSubmission) -> VulkanResult<()> {
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [submission.wait_stage];
        let command_buffers = [submission.command_buffer];
        let signal_semaphores = [submission.signal_semaphore];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        Ok(unsafe { self.device.queue_submit(self.queue, &[submit_info], submission.fence) }?)
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        Ok(unsafe { self.device.device_wait_idle() }?)
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
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(command_buffer, bind_point, layout, first_set, sets, dynamic_offsets);
        }
    }
}

impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                warn!("device_wait_idle failed during teardown: {:?}", err);
            }
            self.device.destroy_command_pool(self.transient_pool, None);
            self.device.destroy_device(None);
        }
    }
}
