//! Window surface and swapchain on top of `VK_KHR_surface` and
//! `VK_KHR_swapchain`

use ash::extensions::khr;
use ash::vk;
use log::{debug, warn};

use super::{AshDevice, VulkanInstance};
use crate::backend::{AcquireOutcome, PresentOutcome, PresentationSurface, SwapchainImages, VulkanError, VulkanResult};
use crate::frame::swapchain::{choose_extent, choose_image_count, choose_present_mode, choose_surface_format, SurfaceLimits};

/// The two things the frame layer needs from a window system
pub trait WindowEvents {
    /// Framebuffer size in pixels, `(0, 0)` while minimized
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until the window system has new events
    fn wait_events(&mut self);
}

/// Surface owned by the engine, plus the window it belongs to
///
/// The `VkSurfaceKHR` is created by the window layer and handed over; it is
/// destroyed when this value is dropped.
pub struct AshSurface<W: WindowEvents> {
    window: W,
    surface_loader: khr::Surface,
    swapchain_loader: khr::Swapchain,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    queue: vk::Queue,
}

impl<W: WindowEvents> AshSurface<W> {
    /// Take ownership of `surface`, checking that the device's queue can
    /// present to it
    pub fn new(
        instance: &VulkanInstance,
        device: &AshDevice,
        surface: vk::SurfaceKHR,
        window: W,
    ) -> VulkanResult<Self> {
        let surface_loader = khr::Surface::new(instance.entry(), instance.raw());
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(device.physical_device(), device.queue_family(), surface)
        };
        match supported {
            Ok(true) => {}
            Ok(false) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(VulkanError::InitializationFailed(
                    "queue family cannot present to this surface".to_string(),
                ));
            }
            Err(err) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(err.into());
            }
        }

        Ok(Self {
            window,
            swapchain_loader: khr::Swapchain::new(instance.raw(), device.raw()),
            surface_loader,
            surface,
            physical_device: device.physical_device(),
            queue: device.queue(),
        })
    }

    /// Window the surface belongs to
    pub const fn window(&self) -> &W {
        &self.window
    }

    /// Mutable access to the window
    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    /// Surface handle
    pub const fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl<W: WindowEvents> PresentationSurface for AshSurface<W> {
    fn framebuffer_extent(&mut self) -> vk::Extent2D {
        let (width, height) = self.window.framebuffer_size();
        vk::Extent2D { width, height }
    }

    fn wait_for_events(&mut self) {
        self.window.wait_events();
    }

    fn create_swapchain(&mut self, extent: vk::Extent2D, prefer_mailbox: bool) -> VulkanResult<SwapchainImages> {
        let (caps, formats, modes) = unsafe {
            (
                self.surface_loader
                    .get_physical_device_surface_capabilities(self.physical_device, self.surface)?,
                self.surface_loader
                    .get_physical_device_surface_formats(self.physical_device, self.surface)?,
                self.surface_loader
                    .get_physical_device_surface_present_modes(self.physical_device, self.surface)?,
            )
        };

        let limits = SurfaceLimits::from_capabilities(&caps);
        let extent = choose_extent(&limits, extent);
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "swapchain with zero extent".to_string(),
            });
        }
        let format = choose_surface_format(&formats)
            .ok_or_else(|| VulkanError::InitializationFailed("surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&modes, prefer_mailbox);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(choose_image_count(&limits))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let handle = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }?;
        let images = match unsafe { self.swapchain_loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(err) => {
                unsafe { self.swapchain_loader.destroy_swapchain(handle, None) };
                return Err(err.into());
            }
        };
        debug!(
            "Created swapchain {:?}: {}x{}, {:?}, {:?}, {} images",
            handle,
            extent.width,
            extent.height,
            format.format,
            present_mode,
            images.len()
        );

        Ok(SwapchainImages {
            handle,
            format: format.format,
            color_space: format.color_space,
            images,
            extent,
            present_mode,
        })
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VulkanResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(self.queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(err) => {
                warn!("Present failed: {:?}", err);
                Err(err.into())
            }
        }
    }
}

impl<W: WindowEvents> Drop for AshSurface<W> {
    fn drop(&mut self) {
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
    }
}
