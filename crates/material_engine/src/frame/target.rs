//! Offscreen render target sized to the surface

use ash::vk;
use log::debug;

use crate::backend::{DeviceImage, GpuDevice, ImageDesc, VulkanResult};

/// Usage of the offscreen image: rendered to, written by compute, blitted out
pub const RENDER_TARGET_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw()
        | vk::ImageUsageFlags::STORAGE.as_raw()
        | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw(),
);

/// Offscreen image and view, recreated with the swapchain
#[derive(Debug)]
pub struct RenderTarget {
    image: DeviceImage,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl RenderTarget {
    /// Create a single-mip target of `format` at `extent`
    pub fn create(device: &dyn GpuDevice, format: vk::Format, extent: vk::Extent2D) -> VulkanResult<Self> {
        let image = device.create_image(&ImageDesc {
            width: extent.width,
            height: extent.height,
            format,
            mip_levels: 1,
            usage: RENDER_TARGET_USAGE,
        })?;
        let view = match device.create_image_view(image.image, format, 1) {
            Ok(view) => view,
            Err(err) => {
                device.destroy_image(image);
                return Err(err);
            }
        };
        debug!("Created {:?} render target {}x{}", format, extent.width, extent.height);
        Ok(Self {
            image,
            view,
            format,
            extent,
        })
    }

    /// Destroy the view and the image
    pub fn destroy(self, device: &dyn GpuDevice) {
        device.destroy_image_view(self.view);
        device.destroy_image(self.image);
    }

    /// Image handle
    pub const fn image(&self) -> vk::Image {
        self.image.image
    }

    /// View for storage or attachment use
    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Format
    pub const fn format(&self) -> vk::Format {
        self.format
    }

    /// Extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}
