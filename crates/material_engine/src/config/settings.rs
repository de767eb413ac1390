//! # Engine Settings
//!
//! Tunables for the material system and the frame controller, grouped the way
//! the components consume them:
//!
//! - **Logging**: default filter used when `RUST_LOG` is unset
//! - **Materials**: descriptor pool sizing, merge strictness, sampler limits
//! - **Frames**: frames in flight, present mode preference, offscreen target
//!
//! Every struct has a `Default` that matches the engine's built-in behaviour,
//! and missing fields in a file fall back to those defaults.

use ash::vk;
use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};
use crate::reflect::BindingKind;

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `env_logger` filter, e.g. `"info"` or `"material_engine=debug"`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Number of descriptors of one kind the pool can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSize {
    /// Descriptor kind
    pub kind: BindingKind,
    /// Descriptor count
    pub count: u32,
}

/// Shared descriptor pool sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorPoolConfig {
    /// Maximum number of sets allocated at once
    pub max_sets: u32,
    /// Per-kind descriptor capacity
    pub pool_sizes: Vec<PoolSize>,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            max_sets: 256,
            pool_sizes: vec![
                PoolSize {
                    kind: BindingKind::UniformBuffer,
                    count: 128,
                },
                PoolSize {
                    kind: BindingKind::CombinedImageSampler,
                    count: 256,
                },
                PoolSize {
                    kind: BindingKind::StorageBuffer,
                    count: 32,
                },
                PoolSize {
                    kind: BindingKind::StorageImage,
                    count: 16,
                },
            ],
        }
    }
}

impl DescriptorPoolConfig {
    /// Pool sizes in Vulkan form, skipping zero counts
    pub fn vk_pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        self.pool_sizes
            .iter()
            .filter(|size| size.count > 0)
            .map(|size| vk::DescriptorPoolSize {
                ty: size.kind.to_vk(),
                descriptor_count: size.count,
            })
            .collect()
    }
}

/// Material system settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialSystemConfig {
    /// Fail layout builds whose stages disagree on a binding instead of warning
    pub strict_binding_merge: bool,
    /// Upper bound on sampler anisotropy, applied on top of the device limit
    pub max_anisotropy_cap: f32,
    /// Shared pool sizing
    pub descriptor_pool: DescriptorPoolConfig,
}

impl Default for MaterialSystemConfig {
    fn default() -> Self {
        Self {
            strict_binding_merge: false,
            max_anisotropy_cap: 16.0,
            descriptor_pool: DescriptorPoolConfig::default(),
        }
    }
}

/// Offscreen target formats the frame controller can allocate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffscreenFormat {
    /// `R16G16B16A16_SFLOAT`
    Rgba16Float,
    /// `R32G32B32A32_SFLOAT`
    Rgba32Float,
    /// `R8G8B8A8_UNORM`
    Rgba8Unorm,
}

impl OffscreenFormat {
    /// Vulkan format
    pub const fn to_vk(self) -> vk::Format {
        match self {
            Self::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            Self::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
            Self::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        }
    }
}

/// Frame controller settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Offscreen target recreated with the swapchain, `None` for no target
    pub offscreen_target: Option<OffscreenFormat>,
    /// Use mailbox presentation when the surface supports it
    pub prefer_mailbox: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            offscreen_target: Some(OffscreenFormat::Rgba16Float),
            prefer_mailbox: true,
        }
    }
}

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Logging
    pub logging: LoggingConfig,
    /// Material system
    pub materials: MaterialSystemConfig,
    /// Frame controller
    pub frames: FrameConfig,
}

impl Config for EngineConfig {}
impl Config for MaterialSystemConfig {}
impl Config for FrameConfig {}

impl EngineConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames.frames_in_flight == 0 {
            return Err(ConfigError::Invalid("frames_in_flight must be at least 1".to_string()));
        }
        let pool = &self.materials.descriptor_pool;
        if pool.max_sets == 0 {
            return Err(ConfigError::Invalid("descriptor pool max_sets must be at least 1".to_string()));
        }
        if pool.vk_pool_sizes().is_empty() {
            return Err(ConfigError::Invalid("descriptor pool has no descriptor capacity".to_string()));
        }
        let cap = self.materials.max_anisotropy_cap;
        if cap.is_nan() || cap < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "max_anisotropy_cap must be at least 1.0, got {cap}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.frames.frames_in_flight, 2);
        assert_eq!(config.materials.descriptor_pool.max_sets, 256);
        assert_eq!(config.materials.descriptor_pool.vk_pool_sizes().len(), 4);
    }

    #[test]
    fn test_validation_rejects_unusable_values() {
        let mut config = EngineConfig::default();
        config.frames.frames_in_flight = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EngineConfig::default();
        config.materials.descriptor_pool.pool_sizes.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EngineConfig::default();
        config.materials.max_anisotropy_cap = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");

        let mut config = EngineConfig::default();
        config.materials.strict_binding_merge = true;
        config.materials.max_anisotropy_cap = 4.0;
        config.frames.offscreen_target = Some(OffscreenFormat::Rgba8Unorm);
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.frames, config.frames);
        assert!(loaded.materials.strict_binding_merge);
        assert_relative_eq!(loaded.materials.max_anisotropy_cap, 4.0);
    }

    #[test]
    fn test_ron_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.ron");

        let mut config = EngineConfig::default();
        config.materials.descriptor_pool.pool_sizes.push(PoolSize {
            kind: BindingKind::TexelBuffer { storage: true },
            count: 8,
        });
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frames.toml");
        std::fs::write(&path, "[frames]\nframes_in_flight = 3\n").unwrap();

        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.frames.frames_in_flight, 3);
        assert!(loaded.frames.prefer_mailbox);
        assert_eq!(loaded.materials, MaterialSystemConfig::default());
    }

    #[test]
    fn test_unknown_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "{}").unwrap();
        assert!(matches!(
            EngineConfig::load_from_file(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
