//! Swapchain parameter selection and swapchain-dependent resources

use ash::vk;
use log::debug;

use crate::backend::{GpuDevice, PresentationSurface, VulkanResult};

/// Surface limits that drive swapchain creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceLimits {
    /// Extent the surface requires, `u32::MAX` width when the window decides
    pub current_extent: vk::Extent2D,
    /// Smallest allowed extent
    pub min_image_extent: vk::Extent2D,
    /// Largest allowed extent
    pub max_image_extent: vk::Extent2D,
    /// Minimum image count
    pub min_image_count: u32,
    /// Maximum image count, 0 when unbounded
    pub max_image_count: u32,
}

impl SurfaceLimits {
    /// Extract the fields used here from the driver's capabilities
    pub const fn from_capabilities(caps: &vk::SurfaceCapabilitiesKHR) -> Self {
        Self {
            current_extent: caps.current_extent,
            min_image_extent: caps.min_image_extent,
            max_image_extent: caps.max_image_extent,
            min_image_count: caps.min_image_count,
            max_image_count: caps.max_image_count,
        }
    }
}

/// `R8G8B8A8_SRGB` when offered, otherwise the first format reported
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::R8G8B8A8_SRGB)
        .or_else(|| formats.first().copied())
}

/// Mailbox when preferred and available, FIFO otherwise
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], prefer_mailbox: bool) -> vk::PresentModeKHR {
    if prefer_mailbox && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Surface-mandated extent, or the window size clamped to the surface limits
pub fn choose_extent(limits: &SurfaceLimits, window: vk::Extent2D) -> vk::Extent2D {
    if limits.current_extent.width != u32::MAX {
        return limits.current_extent;
    }
    vk::Extent2D {
        width: window
            .width
            .max(limits.min_image_extent.width)
            .min(limits.max_image_extent.width),
        height: window
            .height
            .max(limits.min_image_extent.height)
            .min(limits.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum when there is one
pub const fn choose_image_count(limits: &SurfaceLimits) -> u32 {
    let desired = limits.min_image_count + 1;
    if limits.max_image_count > 0 && desired > limits.max_image_count {
        limits.max_image_count
    } else {
        desired
    }
}

/// Swapchain plus one view and one present semaphore per image
///
/// Either fully constructed or absent: a failure part way through creation
/// destroys everything created before returning.
#[derive(Debug)]
pub struct SwapchainState {
    handle: vk::SwapchainKHR,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    present_semaphores: Vec<vk::Semaphore>,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl SwapchainState {
    /// Create the swapchain and its per-image views and semaphores
    pub fn create(
        device: &dyn GpuDevice,
        surface: &mut dyn PresentationSurface,
        extent: vk::Extent2D,
        prefer_mailbox: bool,
    ) -> VulkanResult<Self> {
        let created = surface.create_swapchain(extent, prefer_mailbox)?;
        let mut state = Self {
            handle: created.handle,
            format: created.format,
            color_space: created.color_space,
            images: created.images,
            image_views: Vec::new(),
            present_semaphores: Vec::new(),
            extent: created.extent,
            present_mode: created.present_mode,
        };

        if let Err(err) = state.create_per_image(device) {
            state.destroy(device, surface);
            return Err(err);
        }

        debug!(
            "Created swapchain {:?}: {} images, {:?}, {}x{}",
            state.handle,
            state.images.len(),
            state.format,
            state.extent.width,
            state.extent.height
        );
        Ok(state)
    }

    fn create_per_image(&mut self, device: &dyn GpuDevice) -> VulkanResult<()> {
        for &image in &self.images {
            self.image_views.push(device.create_image_view(image, self.format, 1)?);
            self.present_semaphores.push(device.create_semaphore()?);
        }
        Ok(())
    }

    /// Destroy views, present semaphores and the swapchain, in that order
    pub fn destroy(self, device: &dyn GpuDevice, surface: &mut dyn PresentationSurface) {
        for view in self.image_views {
            device.destroy_image_view(view);
        }
        for semaphore in self.present_semaphores {
            device.destroy_semaphore(semaphore);
        }
        surface.destroy_swapchain(self.handle);
        debug!("Destroyed swapchain {:?}", self.handle);
    }

    /// Swapchain handle
    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    /// Image format
    pub const fn format(&self) -> vk::Format {
        self.format
    }

    /// Image color space
    pub const fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    /// Swapchain images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One view per image
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// One semaphore per image, signaled by the frame's submission
    pub fn present_semaphores(&self) -> &[vk::Semaphore] {
        &self.present_semaphores
    }

    /// Extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Presentation mode
    pub const fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::headless::{HeadlessDevice, HeadlessSurface, ObjectKind};

    fn limits(current: vk::Extent2D) -> SurfaceLimits {
        SurfaceLimits {
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            min_image_count: 2,
            max_image_count: 3,
        }
    }

    #[test]
    fn test_format_prefers_srgb_rgba() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]).unwrap().format, vk::Format::R8G8B8A8_SRGB);
        assert_eq!(choose_surface_format(&[unorm]).unwrap().format, vk::Format::B8G8R8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE], true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_clamps_only_when_window_decides() {
        let fixed = limits(vk::Extent2D { width: 800, height: 600 });
        assert_eq!(choose_extent(&fixed, vk::Extent2D { width: 1, height: 1 }).width, 800);

        let free = limits(vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        });
        let extent = choose_extent(&free, vk::Extent2D { width: 8, height: 9000 });
        assert_eq!((extent.width, extent.height), (16, 4096));
    }

    #[test]
    fn test_image_count_respects_maximum() {
        let mut l = limits(vk::Extent2D::default());
        assert_eq!(choose_image_count(&l), 3);
        l.min_image_count = 3;
        assert_eq!(choose_image_count(&l), 3);
        l.max_image_count = 0;
        assert_eq!(choose_image_count(&l), 4);
    }

    #[test]
    fn test_partial_creation_is_rolled_back() {
        let device = Arc::new(HeadlessDevice::new());
        let mut surface = HeadlessSurface::new(device.clone(), 640, 480);
        device.fail_nth(ObjectKind::Semaphore, 2);

        let extent = vk::Extent2D { width: 640, height: 480 };
        let result = SwapchainState::create(device.as_ref(), &mut surface, extent, true);
        assert!(result.is_err());
        assert_eq!(device.live_count(ObjectKind::ImageView), 0);
        assert_eq!(device.live_count(ObjectKind::Semaphore), 0);
        assert_eq!(device.live_count(ObjectKind::Swapchain), 0);
    }
}
