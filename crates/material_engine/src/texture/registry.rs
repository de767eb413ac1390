//! Reference-counted texture registry
//!
//! Textures live in a slot map addressed by [`TextureHandle`]; named textures
//! are deduplicated through a name index so loading the same name twice
//! returns the first handle and bumps its count.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use log::{debug, warn};
use slotmap::{new_key_type, SlotMap};
use thiserror::Error;

use super::upload::{build_upload_plan, format_for_channels, mip_level_count};
use crate::backend::{DeviceImage, GpuDevice, HostBuffer, ImageDesc, SamplerDesc, VulkanError, VulkanResult};

new_key_type! {
    /// Stable key of a registered texture
    pub struct TextureHandle;
}

/// Texture errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TextureError {
    /// Channel count outside 1..=4
    #[error("Unsupported channel count {0}, expected 1 to 4")]
    UnsupportedChannelCount(u32),

    /// Zero width or height
    #[error("Invalid texture dimensions {width}x{height}")]
    InvalidDimensions {
        /// Width
        width: u32,
        /// Height
        height: u32,
    },

    /// Pixel buffer length disagrees with `width * height * channels`
    #[error("Pixel buffer holds {actual} bytes, expected {expected}")]
    PixelSizeMismatch {
        /// `width * height * channels`
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// GPU object creation or upload failed
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

/// A sampled 2D texture owned by the registry
#[derive(Debug)]
pub struct Texture {
    image: DeviceImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
    width: u32,
    height: u32,
    mip_levels: u32,
    format: vk::Format,
    name: Option<String>,
    ref_count: u32,
}

impl Texture {
    /// Image handle
    pub const fn image(&self) -> vk::Image {
        self.image.image
    }

    /// Memory bound to the image
    pub const fn memory(&self) -> vk::DeviceMemory {
        self.image.memory
    }

    /// View over every mip level
    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Linear, repeating sampler
    pub const fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Width of mip 0
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height of mip 0
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Number of mip levels
    pub const fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Texel format
    pub const fn format(&self) -> vk::Format {
        self.format
    }

    /// Deduplication name, if the texture was loaded with one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Registry entry plus every deduplicated load
    pub const fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

/// Owner of every texture the material system can bind
pub struct TextureRegistry {
    device: Arc<dyn GpuDevice>,
    textures: SlotMap<TextureHandle, Texture>,
    by_name: HashMap<String, TextureHandle>,
    max_anisotropy_cap: f32,
}

impl TextureRegistry {
    /// Empty registry; sampler anisotropy is clamped to `max_anisotropy_cap`
    /// as well as to the device limit
    pub fn new(device: Arc<dyn GpuDevice>, max_anisotropy_cap: f32) -> Self {
        Self {
            device,
            textures: SlotMap::with_key(),
            by_name: HashMap::new(),
            max_anisotropy_cap,
        }
    }

    /// Register a texture from raw row-major pixels
    ///
    /// A non-empty `name` already in the registry returns the existing handle
    /// with its count incremented; the new pixels are not uploaded.
    pub fn load(
        &mut self,
        name: Option<&str>,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u32,
        generate_mips: bool,
    ) -> Result<TextureHandle, TextureError> {
        let name = name.filter(|name| !name.is_empty());
        if let Some(handle) = name.and_then(|name| self.by_name.get(name).copied()) {
            if let Some(texture) = self.textures.get_mut(handle) {
                texture.ref_count += 1;
                debug!("Texture '{}' reused, ref_count {}", name.unwrap_or_default(), texture.ref_count);
                return Ok(handle);
            }
        }

        let format = format_for_channels(channels).ok_or(TextureError::UnsupportedChannelCount(channels))?;
        if width == 0 || height == 0 {
            return Err(TextureError::InvalidDimensions { width, height });
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|texels| texels.checked_mul(channels as usize))
            .unwrap_or(usize::MAX);
        if pixels.len() != expected {
            return Err(TextureError::PixelSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        let mip_levels = if generate_mips { mip_level_count(width, height) } else { 1 };
        let mut usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        if mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let desc = ImageDesc {
            width,
            height,
            format,
            mip_levels,
            usage,
        };

        let (image, view, sampler) = self.create_gpu_objects(pixels, &desc)?;
        let handle = self.textures.insert(Texture {
            image,
            view,
            sampler,
            width,
            height,
            mip_levels,
            format,
            name: name.map(str::to_string),
            ref_count: 1,
        });
        if let Some(name) = name {
            self.by_name.insert(name.to_string(), handle);
        }

        debug!(
            "Loaded texture {:?} '{}': {}x{} {:?}, {} mips",
            handle,
            name.unwrap_or_default(),
            width,
            height,
            format,
            mip_levels
        );
        Ok(handle)
    }

    fn create_gpu_objects(
        &self,
        pixels: &[u8],
        desc: &ImageDesc,
    ) -> VulkanResult<(DeviceImage, vk::ImageView, vk::Sampler)> {
        let staging = self
            .device
            .create_buffer(pixels.len() as vk::DeviceSize, vk::BufferUsageFlags::TRANSFER_SRC)?;
        let uploaded = self.upload(&staging, pixels, desc);
        self.device.destroy_buffer(staging);
        let image = uploaded?;

        let view = match self.device.create_image_view(image.image, desc.format, desc.mip_levels) {
            Ok(view) => view,
            Err(err) => {
                self.device.destroy_image(image);
                return Err(err);
            }
        };

        let sampler = match self.device.create_sampler(&self.sampler_desc(desc.mip_levels)) {
            Ok(sampler) => sampler,
            Err(err) => {
                self.device.destroy_image_view(view);
                self.device.destroy_image(image);
                return Err(err);
            }
        };

        Ok((image, view, sampler))
    }

    fn upload(&self, staging: &HostBuffer, pixels: &[u8], desc: &ImageDesc) -> VulkanResult<DeviceImage> {
        self.device.write_buffer(staging, 0, pixels)?;
        let image = self.device.create_image(desc)?;
        let plan = build_upload_plan(desc.width, desc.height, desc.mip_levels);
        if let Err(err) = self.device.upload_image(staging, image.image, &plan) {
            self.device.destroy_image(image);
            return Err(err);
        }
        Ok(image)
    }

    fn sampler_desc(&self, mip_levels: u32) -> SamplerDesc {
        let caps = self.device.capabilities();
        SamplerDesc {
            anisotropy_enable: caps.sampler_anisotropy,
            max_anisotropy: if caps.sampler_anisotropy {
                caps.max_sampler_anisotropy.min(self.max_anisotropy_cap).max(1.0)
            } else {
                1.0
            },
            max_lod: mip_levels as f32,
        }
    }

    /// Drop one reference; the texture is destroyed when the count reaches zero
    ///
    /// Returns the remaining count, or `None` for a handle that no longer
    /// resolves.
    pub fn release(&mut self, handle: TextureHandle) -> Option<u32> {
        let texture = self.textures.get_mut(handle)?;
        texture.ref_count = texture.ref_count.saturating_sub(1);
        if texture.ref_count > 0 {
            return Some(texture.ref_count);
        }

        let texture = self.textures.remove(handle)?;
        if let Some(name) = &texture.name {
            self.by_name.remove(name);
        }
        debug!("Destroying texture {:?} '{}'", handle, texture.name().unwrap_or_default());
        self.destroy_texture(texture);
        Some(0)
    }

    fn destroy_texture(&self, texture: Texture) {
        self.device.destroy_sampler(texture.sampler);
        self.device.destroy_image_view(texture.view);
        self.device.destroy_image(texture.image);
    }

    /// Texture behind a handle
    pub fn get(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(handle)
    }

    /// Current count of a handle
    pub fn ref_count(&self, handle: TextureHandle) -> Option<u32> {
        self.textures.get(handle).map(Texture::ref_count)
    }

    /// Handle registered under `name`
    pub fn find_by_name(&self, name: &str) -> Option<TextureHandle> {
        self.by_name.get(name).copied()
    }

    /// Number of registered textures
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// Whether no texture is registered
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

impl Drop for TextureRegistry {
    fn drop(&mut self) {
        if !self.textures.is_empty() {
            warn!("Destroying {} textures still registered", self.textures.len());
        }
        for (_, texture) in self.textures.drain() {
            self.device.destroy_sampler(texture.sampler);
            self.device.destroy_image_view(texture.view);
            self.device.destroy_image(texture.image);
        }
        self.by_name.clear();
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ash::vk::Handle;

    use super::*;
    use crate::backend::headless::{HeadlessDevice, ObjectKind};
    use crate::backend::DeviceCapabilities;

    fn registry() -> (Arc<HeadlessDevice>, TextureRegistry) {
        let device = Arc::new(HeadlessDevice::new());
        let registry = TextureRegistry::new(device.clone(), 16.0);
        (device, registry)
    }

    fn checker(width: u32, height: u32, channels: u32) -> Vec<u8> {
        (0..width * height * channels).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_named_load_deduplicates_and_counts() {
        let (device, mut registry) = registry();
        let pixels = checker(4, 4, 4);

        let first = registry.load(Some("x"), &pixels, 4, 4, 4, false).unwrap();
        let second = registry.load(Some("x"), &checker(2, 2, 1), 2, 2, 1, false).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.ref_count(first), Some(2));
        assert_eq!(registry.len(), 1);
        assert_eq!(device.uploads().len(), 1);
        assert_eq!(device.uploads()[0].staging_contents, pixels);

        let texture = registry.get(first).unwrap();
        let (image, view, sampler) = (texture.image(), texture.view(), texture.sampler());

        assert_eq!(registry.release(first), Some(1));
        assert!(registry.get(first).is_some());
        assert_eq!(registry.release(first), Some(0));
        assert!(registry.get(first).is_none());
        assert!(registry.find_by_name("x").is_none());
        assert_eq!(registry.release(first), None);

        assert!(!device.is_live(ObjectKind::Image, image.as_raw()));
        assert!(!device.is_live(ObjectKind::ImageView, view.as_raw()));
        assert!(!device.is_live(ObjectKind::Sampler, sampler.as_raw()));
        assert_eq!(device.live_count(ObjectKind::Memory), 0);
        assert_eq!(device.live_count(ObjectKind::Buffer), 0);
    }

    #[test]
    fn test_unnamed_and_empty_names_never_deduplicate() {
        let (_device, mut registry) = registry();
        let pixels = checker(2, 2, 2);
        let a = registry.load(None, &pixels, 2, 2, 2, false).unwrap();
        let b = registry.load(Some(""), &pixels, 2, 2, 2, false).unwrap();
        let c = registry.load(Some(""), &pixels, 2, 2, 2, false).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(registry.len(), 3);
        assert!(registry.find_by_name("").is_none());
    }

    #[test]
    fn test_validation_happens_before_any_gpu_work() {
        let (device, mut registry) = registry();
        assert_eq!(
            registry.load(None, &[0; 5], 1, 1, 5, false),
            Err(TextureError::UnsupportedChannelCount(5))
        );
        assert_eq!(
            registry.load(None, &[], 0, 4, 4, false),
            Err(TextureError::InvalidDimensions { width: 0, height: 4 })
        );
        assert_eq!(
            registry.load(None, &[0; 15], 2, 2, 4, false),
            Err(TextureError::PixelSizeMismatch {
                expected: 16,
                actual: 15
            })
        );
        assert_eq!(device.live_count(ObjectKind::Buffer), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_mipmapped_load_and_sampler_limits() {
        let device = Arc::new(HeadlessDevice::with_capabilities(DeviceCapabilities {
            sampler_anisotropy: true,
            max_sampler_anisotropy: 8.0,
            ..DeviceCapabilities::default()
        }));
        let mut registry = TextureRegistry::new(device.clone(), 4.0);
        let handle = registry.load(Some("ground"), &checker(256, 64, 3), 256, 64, 3, true).unwrap();

        let texture = registry.get(handle).unwrap();
        assert_eq!(texture.mip_levels(), 9);
        assert_eq!(texture.format(), vk::Format::R8G8B8_UNORM);
        assert_eq!(texture.name(), Some("ground"));

        let sampler = device.sampler_descs()[0];
        assert!(sampler.anisotropy_enable);
        assert_relative_eq!(sampler.max_anisotropy, 4.0);
        assert_relative_eq!(sampler.max_lod, 9.0);

        let uploads = device.uploads();
        assert_eq!(uploads[0].image, texture.image());
        assert_eq!(uploads[0].steps, build_upload_plan(256, 64, 9));
    }

    #[test]
    fn test_device_without_anisotropy() {
        let device = Arc::new(HeadlessDevice::with_capabilities(DeviceCapabilities {
            sampler_anisotropy: false,
            max_sampler_anisotropy: 16.0,
            ..DeviceCapabilities::default()
        }));
        let mut registry = TextureRegistry::new(device.clone(), 16.0);
        registry.load(None, &[255], 1, 1, 1, true).unwrap();
        let sampler = device.sampler_descs()[0];
        assert!(!sampler.anisotropy_enable);
        assert_relative_eq!(sampler.max_anisotropy, 1.0);
        assert_relative_eq!(sampler.max_lod, 1.0);
    }

    #[test]
    fn test_partial_failure_destroys_created_objects() {
        let (device, mut registry) = registry();
        device.fail_nth(ObjectKind::Sampler, 0);
        let err = registry.load(Some("broken"), &checker(4, 4, 4), 4, 4, 4, true).unwrap_err();
        assert!(matches!(err, TextureError::Vulkan(_)));

        for kind in [ObjectKind::Image, ObjectKind::ImageView, ObjectKind::Buffer, ObjectKind::Memory] {
            assert_eq!(device.live_count(kind), 0, "{kind:?} leaked");
        }
        assert!(registry.find_by_name("broken").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drop_destroys_regardless_of_count() {
        let (device, mut registry) = registry();
        let pixels = checker(2, 2, 4);
        registry.load(Some("a"), &pixels, 2, 2, 4, false).unwrap();
        registry.load(Some("a"), &pixels, 2, 2, 4, false).unwrap();
        registry.load(None, &pixels, 2, 2, 4, false).unwrap();
        drop(registry);

        for kind in [ObjectKind::Image, ObjectKind::ImageView, ObjectKind::Sampler, ObjectKind::Memory] {
            assert_eq!(device.live_count(kind), 0, "{kind:?} leaked");
        }
    }
}
