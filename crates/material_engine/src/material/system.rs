//! Material system: the descriptor pool, texture registry, and instance
//! manager behind one owner

use std::sync::Arc;

use ash::vk;
use log::info;

use super::{
    DescriptorPool, MaterialDefinition, MaterialInstance, MaterialInstanceManager, MaterialLayoutBuilder,
    MaterialResult,
};
use crate::backend::GpuDevice;
use crate::config::MaterialSystemConfig;
use crate::texture::{TextureError, TextureHandle, TextureRegistry};

/// Owner of the material-side GPU state of one device
pub struct MaterialSystem {
    device: Arc<dyn GpuDevice>,
    strict_binding_merge: bool,
    instances: MaterialInstanceManager,
    textures: TextureRegistry,
}

impl MaterialSystem {
    /// Create the descriptor pool and an empty texture registry
    pub fn new(device: Arc<dyn GpuDevice>, config: &MaterialSystemConfig) -> MaterialResult<Self> {
        let pool = DescriptorPool::new(device.clone(), &config.descriptor_pool)?;
        info!(
            "Material system ready: {} descriptor sets, strict merge {}",
            pool.max_sets(),
            config.strict_binding_merge
        );
        Ok(Self {
            textures: TextureRegistry::new(device.clone(), config.max_anisotropy_cap),
            instances: MaterialInstanceManager::new(Arc::new(pool)),
            strict_binding_merge: config.strict_binding_merge,
            device,
        })
    }

    /// Layout builder honouring the configured merge strictness
    pub fn layout_builder<'a>(&self, name: impl Into<String>) -> MaterialLayoutBuilder<'a> {
        MaterialLayoutBuilder::new(name).strict(self.strict_binding_merge)
    }

    /// Reflect and build a definition on this system's device
    pub fn create_definition(&self, builder: MaterialLayoutBuilder<'_>) -> MaterialResult<Arc<MaterialDefinition>> {
        builder.build(self.device.clone())
    }

    /// See [`MaterialInstanceManager::create_instance`]
    pub fn create_instance(&self, definition: &Arc<MaterialDefinition>) -> MaterialResult<MaterialInstance> {
        self.instances.create_instance(definition)
    }

    /// See [`MaterialInstanceManager::destroy_instance`]
    pub fn destroy_instance(&self, instance: MaterialInstance) {
        self.instances.destroy_instance(instance);
    }

    /// Flush an instance against this system's textures
    pub fn flush(&self, instance: &mut MaterialInstance) -> MaterialResult<usize> {
        instance.flush_descriptors(&self.textures)
    }

    /// See [`TextureRegistry::load`]
    pub fn load_texture(
        &mut self,
        name: Option<&str>,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u32,
        generate_mips: bool,
    ) -> Result<TextureHandle, TextureError> {
        self.textures.load(name, pixels, width, height, channels, generate_mips)
    }

    /// See [`TextureRegistry::release`]
    pub fn release_texture(&mut self, handle: TextureHandle) -> Option<u32> {
        self.textures.release(handle)
    }

    /// Texture registry
    pub const fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    /// Descriptor pool handle
    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.instances.pool().handle()
    }

    /// Device the system was created on
    pub const fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessDevice, ObjectKind};
    use crate::material::MaterialError;
    use crate::reflect::builder::SpirvBuilder;

    fn bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_textured_material_end_to_end() {
        let device = Arc::new(HeadlessDevice::new());
        let mut system = MaterialSystem::new(device.clone(), &MaterialSystemConfig::default()).unwrap();

        let mut vert = SpirvBuilder::new().vertex("main");
        vert.uniform_floats(0, 0, "camera", 128);
        let mut frag = SpirvBuilder::new().fragment("main");
        frag.combined_image_sampler(1, 0, "albedo");
        let (vert, frag) = (bytes(&vert.finish()), bytes(&frag.finish()));

        let definition = system
            .create_definition(system.layout_builder("textured").vertex(&vert).fragment(&frag))
            .unwrap();
        let mut instance = system.create_instance(&definition).unwrap();
        let albedo = system.load_texture(Some("brick"), &[128; 64], 4, 4, 4, true).unwrap();
        instance.bind_texture(1, 0, albedo).unwrap();
        assert_eq!(system.flush(&mut instance), Ok(2));

        system.destroy_instance(instance);
        drop(definition);
        assert_eq!(system.release_texture(albedo), Some(0));
        assert_eq!(device.live_count(ObjectKind::DescriptorSet), 0);
        assert_eq!(device.live_count(ObjectKind::DescriptorSetLayout), 0);
        assert_eq!(device.live_count(ObjectKind::Image), 0);

        drop(system);
        assert_eq!(device.live_count(ObjectKind::DescriptorPool), 0);
    }

    #[test]
    fn test_configured_strict_merge() {
        let device = Arc::new(HeadlessDevice::new());
        let config = MaterialSystemConfig {
            strict_binding_merge: true,
            ..MaterialSystemConfig::default()
        };
        let system = MaterialSystem::new(device, &config).unwrap();

        let mut vert = SpirvBuilder::new().vertex("main");
        vert.uniform_floats(0, 0, "data", 16);
        let mut frag = SpirvBuilder::new().fragment("main");
        frag.uniform_floats(0, 0, "data", 32);
        let (vert, frag) = (bytes(&vert.finish()), bytes(&frag.finish()));

        let err = system
            .create_definition(system.layout_builder("clash").vertex(&vert).fragment(&frag))
            .unwrap_err();
        assert!(matches!(err, MaterialError::BindingConflict(_)));
    }
}
