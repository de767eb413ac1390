//! Material instances: descriptor sets, uniform data, and bound resources

use std::fmt;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use log::{debug, warn};

use super::{DescriptorPool, MaterialDefinition, MaterialError, MaterialResult};
use crate::backend::{DescriptorResource, DescriptorWrite, GpuDevice, HostBuffer};
use crate::reflect::BindingDescriptor;
use crate::texture::{TextureHandle, TextureRegistry};

/// Resource recorded against a non-uniform binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundResource {
    Unbound,
    Texture(TextureHandle),
    StorageImage(vk::ImageView),
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
}

/// One use of a material with its own descriptor sets and uniform data
///
/// Bindings are recorded on the CPU and only reach the descriptor sets on
/// [`Self::flush_descriptors`]. Array bindings are written at element 0.
/// Dropping the instance returns its sets to the pool and frees its uniform
/// buffer; bound textures are left to their registry.
pub struct MaterialInstance {
    device: Arc<dyn GpuDevice>,
    pool: Arc<DescriptorPool>,
    definition: Arc<MaterialDefinition>,
    descriptor_sets: Vec<Option<vk::DescriptorSet>>,
    uniform_data: Vec<u8>,
    uniform_buffer: Option<HostBuffer>,
    resources: Vec<BoundResource>,
}

impl MaterialInstance {
    fn new(pool: Arc<DescriptorPool>, definition: Arc<MaterialDefinition>) -> MaterialResult<Self> {
        let device = pool.device().clone();
        let layouts: Vec<vk::DescriptorSetLayout> = definition.set_layouts().iter().flatten().copied().collect();
        let allocated = if layouts.is_empty() {
            Vec::new()
        } else {
            pool.allocate(&layouts)?
        };

        let uniform_size = definition.reflection().uniform_data_size;
        let uniform_buffer = if uniform_size == 0 {
            None
        } else {
            match device.create_buffer(uniform_size.into(), vk::BufferUsageFlags::UNIFORM_BUFFER) {
                Ok(buffer) => Some(buffer),
                Err(err) => {
                    if let Err(free_err) = pool.free(&allocated) {
                        warn!("Failed to return descriptor sets after buffer failure: {}", free_err);
                    }
                    return Err(err.into());
                }
            }
        };

        let mut sets = allocated.into_iter();
        let descriptor_sets = definition
            .set_layouts()
            .iter()
            .map(|layout| layout.and_then(|_| sets.next()))
            .collect();

        Ok(Self {
            device,
            pool,
            descriptor_sets,
            uniform_data: vec![0; uniform_size as usize],
            uniform_buffer,
            resources: vec![BoundResource::Unbound; definition.reflection().bindings.len()],
            definition,
        })
    }

    /// Definition this instance was created from
    pub const fn definition(&self) -> &Arc<MaterialDefinition> {
        &self.definition
    }

    /// Descriptor set of one set index, `None` for unpopulated sets
    pub fn descriptor_set(&self, set: u32) -> Option<vk::DescriptorSet> {
        self.descriptor_sets.get(set as usize).copied().flatten()
    }

    /// Descriptor sets by set index
    pub fn descriptor_sets(&self) -> &[Option<vk::DescriptorSet>] {
        &self.descriptor_sets
    }

    /// CPU copy of the uniform data
    pub fn uniform_data(&self) -> &[u8] {
        &self.uniform_data
    }

    /// GPU uniform buffer, absent when the material has no uniform blocks
    pub const fn uniform_buffer(&self) -> Option<vk::Buffer> {
        match &self.uniform_buffer {
            Some(buffer) => Some(buffer.buffer),
            None => None,
        }
    }

    /// Offset of the uniform block at `(set, binding)` in the uniform data
    pub fn uniform_offset(&self, set: u32, binding: u32) -> Option<u32> {
        let reflection = self.definition.reflection();
        let (index, _) = reflection.find(set, binding)?;
        reflection.uniform_offset(index)
    }

    /// Copy bytes into the uniform data at `offset`
    ///
    /// Returns `false` and leaves the data untouched if the write would run
    /// past the end.
    pub fn update_uniform(&mut self, offset: usize, data: &[u8]) -> bool {
        let Some(end) = offset.checked_add(data.len()) else {
            return false;
        };
        let Some(target) = self.uniform_data.get_mut(offset..end) else {
            return false;
        };
        target.copy_from_slice(data);
        true
    }

    /// Copy a plain-data value into the uniform data at `offset`
    pub fn update_uniform_pod<T: Pod>(&mut self, offset: usize, value: &T) -> bool {
        self.update_uniform(offset, bytemuck::bytes_of(value))
    }

    fn binding(&self, set: u32, binding: u32) -> MaterialResult<(usize, &BindingDescriptor)> {
        self.definition
            .reflection()
            .find(set, binding)
            .ok_or(MaterialError::BindingNotFound { set, binding })
    }

    /// Bind a registry texture to a sampler, sampled image, or combined
    /// image sampler binding
    pub fn bind_texture(&mut self, set: u32, binding: u32, texture: TextureHandle) -> MaterialResult<()> {
        let (index, descriptor) = self.binding(set, binding)?;
        if !descriptor.kind.accepts_texture() {
            return Err(MaterialError::NotAnImageBinding {
                set,
                binding,
                kind: descriptor.kind,
            });
        }
        self.resources[index] = BoundResource::Texture(texture);
        Ok(())
    }

    /// Bind an image view in `GENERAL` layout to a storage image binding
    pub fn bind_storage_image(&mut self, set: u32, binding: u32, view: vk::ImageView) -> MaterialResult<()> {
        let (index, descriptor) = self.binding(set, binding)?;
        if descriptor.kind != crate::reflect::BindingKind::StorageImage {
            return Err(MaterialError::WrongBindingKind {
                set,
                binding,
                kind: descriptor.kind,
                expected: "a storage image",
            });
        }
        self.resources[index] = BoundResource::StorageImage(view);
        Ok(())
    }

    /// Bind a range of an external buffer to a storage buffer binding
    pub fn bind_buffer(
        &mut self,
        set: u32,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> MaterialResult<()> {
        let (index, descriptor) = self.binding(set, binding)?;
        if !descriptor.kind.is_storage_block() {
            return Err(MaterialError::WrongBindingKind {
                set,
                binding,
                kind: descriptor.kind,
                expected: "a storage buffer",
            });
        }
        self.resources[index] = BoundResource::Buffer { buffer, offset, range };
        Ok(())
    }

    /// Upload the uniform data and write every populated binding in one batch
    ///
    /// Textures no longer in `textures` are skipped with a warning. Returns
    /// the number of descriptor writes issued.
    pub fn flush_descriptors(&mut self, textures: &TextureRegistry) -> MaterialResult<usize> {
        if let Some(buffer) = &self.uniform_buffer {
            self.device.write_buffer(buffer, 0, &self.uniform_data)?;
        }

        let reflection = self.definition.reflection();
        let mut writes = Vec::with_capacity(reflection.bindings.len());
        for (index, descriptor) in reflection.bindings.iter().enumerate() {
            let Some(set) = self.descriptor_set(descriptor.set) else {
                continue;
            };

            let resource = if descriptor.kind.is_uniform_block() {
                match (&self.uniform_buffer, reflection.uniform_offset(index)) {
                    (Some(buffer), Some(offset)) if descriptor.byte_size > 0 => DescriptorResource::Buffer {
                        buffer: buffer.buffer,
                        offset: offset.into(),
                        range: descriptor.byte_size.into(),
                    },
                    _ => continue,
                }
            } else {
                match self.resources[index] {
                    BoundResource::Unbound => continue,
                    BoundResource::Texture(handle) => match textures.get(handle) {
                        Some(texture) => DescriptorResource::Image {
                            view: texture.view(),
                            sampler: texture.sampler(),
                            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        },
                        None => {
                            warn!(
                                "Material '{}': texture {:?} at set {} binding {} is gone, skipping",
                                self.definition.name(),
                                handle,
                                descriptor.set,
                                descriptor.binding
                            );
                            continue;
                        }
                    },
                    BoundResource::StorageImage(view) => DescriptorResource::Image {
                        view,
                        sampler: vk::Sampler::null(),
                        layout: vk::ImageLayout::GENERAL,
                    },
                    BoundResource::Buffer { buffer, offset, range } => {
                        DescriptorResource::Buffer { buffer, offset, range }
                    }
                }
            };

            writes.push(DescriptorWrite {
                set,
                binding: descriptor.binding,
                array_element: 0,
                descriptor_type: descriptor.kind.to_vk(),
                resource,
            });
        }

        if !writes.is_empty() {
            self.device.update_descriptor_sets(&writes);
        }
        Ok(writes.len())
    }

    /// Record the descriptor set bind for a draw or dispatch
    ///
    /// Populated sets are bound in one call from pipeline-layout index 0,
    /// matching a pipeline layout that omits unpopulated sets. Dynamic
    /// bindings receive zero offsets.
    pub fn bind_for_draw(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint) {
        let sets: Vec<vk::DescriptorSet> = self.descriptor_sets.iter().flatten().copied().collect();
        if sets.is_empty() {
            return;
        }
        let dynamic_count: u32 = self
            .definition
            .reflection()
            .bindings
            .iter()
            .filter(|b| b.kind.is_dynamic())
            .map(|b| b.array_count)
            .sum();
        let dynamic_offsets = vec![0u32; dynamic_count as usize];
        self.device.cmd_bind_descriptor_sets(
            command_buffer,
            bind_point,
            self.definition.pipeline_layout(),
            0,
            &sets,
            &dynamic_offsets,
        );
    }
}

impl fmt::Debug for MaterialInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterialInstance")
            .field("material", &self.definition.name())
            .field("descriptor_sets", &self.descriptor_sets)
            .field("uniform_size", &self.uniform_data.len())
            .finish_non_exhaustive()
    }
}

impl Drop for MaterialInstance {
    fn drop(&mut self) {
        let sets: Vec<vk::DescriptorSet> = self.descriptor_sets.iter().flatten().copied().collect();
        if !sets.is_empty() {
            if let Err(err) = self.pool.free(&sets) {
                warn!("Failed to free descriptor sets of '{}': {}", self.definition.name(), err);
            }
        }
        if let Some(buffer) = self.uniform_buffer.take() {
            self.device.destroy_buffer(buffer);
        }
    }
}

/// Creates instances from a shared descriptor pool
pub struct MaterialInstanceManager {
    pool: Arc<DescriptorPool>,
}

impl MaterialInstanceManager {
    /// Manager allocating from `pool`
    pub const fn new(pool: Arc<DescriptorPool>) -> Self {
        Self { pool }
    }

    /// Allocate the descriptor sets and uniform buffer of a new instance
    ///
    /// All sets are allocated in one call. If the uniform buffer cannot be
    /// created the sets go back to the pool before the error is returned.
    pub fn create_instance(&self, definition: &Arc<MaterialDefinition>) -> MaterialResult<MaterialInstance> {
        let instance = MaterialInstance::new(self.pool.clone(), definition.clone())?;
        debug!(
            "Created instance of '{}': {} sets, {} uniform bytes",
            definition.name(),
            instance.descriptor_sets.iter().flatten().count(),
            instance.uniform_data.len()
        );
        Ok(instance)
    }

    /// Free an instance's sets and uniform buffer
    pub fn destroy_instance(&self, instance: MaterialInstance) {
        debug!("Destroying instance of '{}'", instance.definition.name());
        drop(instance);
    }

    /// Pool instances allocate from
    pub const fn pool(&self) -> &Arc<DescriptorPool> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::backend::headless::{HeadlessDevice, ObjectKind};
    use crate::backend::DeviceCapabilities;
    use crate::config::DescriptorPoolConfig;
    use crate::material::MaterialLayoutBuilder;
    use crate::reflect::builder::SpirvBuilder;

    fn bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    struct Fixture {
        device: Arc<HeadlessDevice>,
        manager: MaterialInstanceManager,
        textures: TextureRegistry,
    }

    fn fixture() -> Fixture {
        let device = Arc::new(HeadlessDevice::new());
        let pool = DescriptorPool::new(device.clone(), &DescriptorPoolConfig::default()).unwrap();
        Fixture {
            textures: TextureRegistry::new(device.clone(), 16.0),
            manager: MaterialInstanceManager::new(Arc::new(pool)),
            device,
        }
    }

    /// Uniform block of 64 bytes at set 0, texture at set 2 binding 0, storage
    /// buffer at set 2 binding 1
    fn sparse_material(device: &Arc<HeadlessDevice>) -> Arc<MaterialDefinition> {
        let mut b = SpirvBuilder::new().fragment("main");
        b.uniform_floats(0, 0, "globals", 64);
        b.combined_image_sampler(2, 0, "albedo");
        let float = b.type_float(32);
        b.storage_buffer(2, 1, "lights", &[(float, 0)]);
        let code = bytes(&b.finish());
        MaterialLayoutBuilder::new("sparse").fragment(&code).build(device.clone()).unwrap()
    }

    #[test]
    fn test_sets_are_allocated_in_one_call() {
        let f = fixture();
        let definition = sparse_material(&f.device);
        let instance = f.manager.create_instance(&definition).unwrap();

        assert_eq!(f.device.allocation_calls(), vec![2]);
        assert!(instance.descriptor_set(0).is_some());
        assert!(instance.descriptor_set(1).is_none());
        assert!(instance.descriptor_set(2).is_some());
        assert_eq!(instance.uniform_data().len(), 64);
        assert!(instance.uniform_buffer().is_some());
    }

    #[test]
    fn test_uniform_update_bounds() {
        let f = fixture();
        let definition = sparse_material(&f.device);
        let mut instance = f.manager.create_instance(&definition).unwrap();

        assert!(instance.update_uniform(60, &[1, 2, 3, 4]));
        assert!(instance.update_uniform(62, &[9, 9]));
        assert_eq!(&instance.uniform_data()[60..], &[1, 2, 9, 9]);
        assert!(!instance.update_uniform(62, &[0, 0, 0, 0]));
        assert!(!instance.update_uniform(usize::MAX, &[0]));
        assert!(instance.update_uniform_pod(0, &1.5f32));
        assert_eq!(&instance.uniform_data()[..4], &1.5f32.to_le_bytes());
        assert_eq!(&instance.uniform_data()[60..], &[1, 2, 9, 9]);
        assert_eq!(instance.uniform_offset(0, 0), Some(0));
    }

    #[test]
    fn test_bind_texture_checks_the_binding() {
        let mut f = fixture();
        let definition = sparse_material(&f.device);
        let mut instance = f.manager.create_instance(&definition).unwrap();
        let texture = f.textures.load(None, &[255; 16], 2, 2, 4, false).unwrap();

        assert_eq!(
            instance.bind_texture(1, 0, texture),
            Err(MaterialError::BindingNotFound { set: 1, binding: 0 })
        );
        assert!(matches!(
            instance.bind_texture(0, 0, texture),
            Err(MaterialError::NotAnImageBinding { set: 0, binding: 0, .. })
        ));
        assert!(matches!(
            instance.bind_storage_image(2, 0, vk::ImageView::from_raw(7)),
            Err(MaterialError::WrongBindingKind { set: 2, binding: 0, .. })
        ));
        assert!(instance.bind_texture(2, 0, texture).is_ok());
    }

    #[test]
    fn test_flush_writes_one_batch() {
        let mut f = fixture();
        let definition = sparse_material(&f.device);
        let mut instance = f.manager.create_instance(&definition).unwrap();
        let texture = f.textures.load(None, &[255; 16], 2, 2, 4, false).unwrap();
        let lights = vk::Buffer::from_raw(0xdead);

        instance.bind_texture(2, 0, texture).unwrap();
        instance.bind_buffer(2, 1, lights, 16, 256).unwrap();
        instance.update_uniform(0, &[7; 4]);
        assert_eq!(instance.flush_descriptors(&f.textures), Ok(3));

        let batches = f.device.write_batches();
        assert_eq!(batches.len(), 1);
        let writes = &batches[0];
        assert_eq!(writes[0].set, instance.descriptor_set(0).unwrap());
        assert_eq!(
            writes[0].resource,
            DescriptorResource::Buffer {
                buffer: instance.uniform_buffer().unwrap(),
                offset: 0,
                range: 64
            }
        );
        let albedo = f.textures.get(texture).unwrap();
        assert_eq!(
            writes[1].resource,
            DescriptorResource::Image {
                view: albedo.view(),
                sampler: albedo.sampler(),
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            }
        );
        assert_eq!(writes[2].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(
            writes[2].resource,
            DescriptorResource::Buffer {
                buffer: lights,
                offset: 16,
                range: 256
            }
        );

        let contents = f.device.buffer_contents(instance.uniform_buffer().unwrap()).unwrap();
        assert_eq!(&contents[..4], &[7; 4]);
    }

    #[test]
    fn test_flush_uses_aligned_uniform_offsets() {
        let device = Arc::new(HeadlessDevice::with_capabilities(DeviceCapabilities {
            min_uniform_buffer_offset_alignment: 256,
            ..DeviceCapabilities::default()
        }));
        let pool = DescriptorPool::new(device.clone(), &DescriptorPoolConfig::default()).unwrap();
        let manager = MaterialInstanceManager::new(Arc::new(pool));
        let textures = TextureRegistry::new(device.clone(), 16.0);

        let mut b = SpirvBuilder::new().fragment("main");
        b.uniform_floats(0, 0, "camera", 16);
        b.uniform_floats(0, 1, "tint", 16);
        let code = bytes(&b.finish());
        let definition = MaterialLayoutBuilder::new("two_blocks").fragment(&code).build(device.clone()).unwrap();
        let mut instance = manager.create_instance(&definition).unwrap();

        assert_eq!(instance.uniform_data().len(), 272);
        assert_eq!(instance.uniform_offset(0, 1), Some(256));
        assert!(instance.update_uniform(256, &[3; 16]));
        assert_eq!(instance.flush_descriptors(&textures), Ok(2));

        let buffer = instance.uniform_buffer().unwrap();
        let offsets: Vec<_> = device.write_batches()[0]
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Buffer { offset, range, .. } => (offset, range),
                DescriptorResource::Image { .. } => panic!("unexpected image write"),
            })
            .collect();
        assert_eq!(offsets, vec![(0, 16), (256, 16)]);
        assert_eq!(&device.buffer_contents(buffer).unwrap()[256..], &[3; 16]);
    }

    #[test]
    fn test_flush_skips_a_released_texture() {
        let mut f = fixture();
        let definition = sparse_material(&f.device);
        let mut instance = f.manager.create_instance(&definition).unwrap();
        let texture = f.textures.load(None, &[255; 16], 2, 2, 4, false).unwrap();

        instance.bind_texture(2, 0, texture).unwrap();
        f.textures.release(texture);
        assert_eq!(instance.flush_descriptors(&f.textures), Ok(1));
        assert_eq!(f.device.write_batches()[0][0].binding, 0);
    }

    #[test]
    fn test_storage_image_uses_general_layout() {
        let f = fixture();
        let mut b = SpirvBuilder::new().compute("main");
        b.storage_image(0, 0, "output");
        let code = bytes(&b.finish());
        let definition = MaterialLayoutBuilder::new("blur").compute(&code).build(f.device.clone()).unwrap();
        let mut instance = f.manager.create_instance(&definition).unwrap();
        assert!(instance.uniform_buffer().is_none());

        let view = vk::ImageView::from_raw(42);
        instance.bind_storage_image(0, 0, view).unwrap();
        assert_eq!(instance.flush_descriptors(&f.textures), Ok(1));
        assert_eq!(
            f.device.write_batches()[0][0].resource,
            DescriptorResource::Image {
                view,
                sampler: vk::Sampler::null(),
                layout: vk::ImageLayout::GENERAL
            }
        );
    }

    #[test]
    fn test_bind_for_draw_binds_populated_sets_in_one_call() {
        let f = fixture();
        let mut b = SpirvBuilder::new().fragment("main");
        b.combined_image_sampler(0, 0, "a");
        b.combined_image_sampler(1, 0, "b");
        b.uniform_floats(3, 0, "c", 16);
        let code = bytes(&b.finish());
        let definition = MaterialLayoutBuilder::new("sets")
            .fragment(&code)
            .dynamic(3, 0)
            .build(f.device.clone())
            .unwrap();
        let instance = f.manager.create_instance(&definition).unwrap();

        let cmd = vk::CommandBuffer::from_raw(99);
        instance.bind_for_draw(cmd, vk::PipelineBindPoint::GRAPHICS);
        let binds = f.device.binds();
        assert_eq!(binds.len(), 1);
        assert_eq!(binds[0].first_set, 0);
        assert_eq!(
            binds[0].sets,
            vec![
                instance.descriptor_set(0).unwrap(),
                instance.descriptor_set(1).unwrap(),
                instance.descriptor_set(3).unwrap()
            ]
        );
        assert_eq!(binds[0].dynamic_offsets, vec![0]);
        assert_eq!(binds[0].layout, definition.pipeline_layout());
        assert_eq!(binds[0].command_buffer, cmd);

        let pipeline = f.device.pipeline_layout(definition.pipeline_layout()).unwrap();
        assert_eq!(pipeline.set_layouts.len(), binds[0].sets.len());
        assert_eq!(definition.pipeline_set_index(3), Some(2));
    }

    #[test]
    fn test_destroy_frees_sets_but_not_textures() {
        let mut f = fixture();
        let definition = sparse_material(&f.device);
        let mut instance = f.manager.create_instance(&definition).unwrap();
        let texture = f.textures.load(Some("albedo"), &[255; 16], 2, 2, 4, false).unwrap();
        instance.bind_texture(2, 0, texture).unwrap();

        f.manager.destroy_instance(instance);
        assert_eq!(f.device.live_count(ObjectKind::DescriptorSet), 0);
        assert_eq!(f.device.live_count(ObjectKind::Buffer), 0);
        assert_eq!(f.textures.ref_count(texture), Some(1));
    }

    #[test]
    fn test_buffer_failure_returns_the_sets() {
        let f = fixture();
        let definition = sparse_material(&f.device);

        f.device.fail_nth(ObjectKind::Buffer, 0);
        let err = f.manager.create_instance(&definition).unwrap_err();
        assert!(matches!(err, MaterialError::Vulkan(e) if e.is_exhaustion()));
        assert_eq!(f.device.live_count(ObjectKind::DescriptorSet), 0);

        let instance = f.manager.create_instance(&definition).unwrap();
        assert_eq!(instance.descriptor_sets().iter().flatten().count(), 2);
    }

    #[test]
    fn test_pool_exhaustion_is_reported() {
        let device = Arc::new(HeadlessDevice::new());
        let config = DescriptorPoolConfig {
            max_sets: 1,
            ..DescriptorPoolConfig::default()
        };
        let manager = MaterialInstanceManager::new(Arc::new(DescriptorPool::new(device.clone(), &config).unwrap()));
        let definition = sparse_material(&device);

        let err = manager.create_instance(&definition).unwrap_err();
        assert_eq!(err, MaterialError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY.into()));
    }
}
