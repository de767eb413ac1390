//! Material layouts built from merged shader reflection

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ash::vk;
use log::{debug, warn};

use super::{BindingConflict, MaterialError, MaterialResult};
use crate::backend::{GpuDevice, VulkanResult};
use crate::reflect::{self, BindingDescriptor, PushConstantRange, ShaderReflection, ShaderStage};

/// Bindings of every stage of a material merged into one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialReflection {
    /// Merged bindings in first-seen order
    pub bindings: Vec<BindingDescriptor>,
    /// Push constant ranges of every stage, concatenated
    pub push_constants: Vec<PushConstantRange>,
    /// Bytes the uniform mirror needs, up to the end of the last uniform block
    pub uniform_data_size: u32,
    /// Conflicts resolved in favour of the first declaration
    pub conflicts: Vec<BindingConflict>,
    uniform_offsets: Vec<Option<u32>>,
}

impl MaterialReflection {
    /// Merge per-stage reflections, first declaration of a slot winning
    ///
    /// Identical redeclarations widen the stage mask. Declarations that differ
    /// in kind, array count, or block size are logged and recorded in
    /// [`Self::conflicts`], or rejected when `strict` is set. Each entry of
    /// `dynamic` promotes the buffer binding at that `(set, binding)` to its
    /// dynamic-offset kind.
    ///
    /// Uniform blocks are laid out in merged order, each starting at a
    /// multiple of `uniform_alignment`.
    pub fn merge(
        stages: &[ShaderReflection],
        dynamic: &[(u32, u32)],
        strict: bool,
        uniform_alignment: u32,
    ) -> MaterialResult<Self> {
        if stages.is_empty() {
            return Err(MaterialError::NoShaderStages);
        }

        let mut bindings: Vec<BindingDescriptor> = Vec::new();
        let mut by_slot: HashMap<(u32, u32), usize> = HashMap::new();
        let mut conflicts = Vec::new();
        let mut push_constants = Vec::new();

        for stage in stages {
            for binding in &stage.bindings {
                let Some(&index) = by_slot.get(&binding.slot()) else {
                    by_slot.insert(binding.slot(), bindings.len());
                    bindings.push(binding.clone());
                    continue;
                };

                let kept = &mut bindings[index];
                if kept.kind == binding.kind
                    && kept.array_count == binding.array_count
                    && kept.byte_size == binding.byte_size
                {
                    kept.stages |= binding.stages;
                    continue;
                }

                let conflict = BindingConflict {
                    kept: kept.clone(),
                    discarded: binding.clone(),
                };
                warn!("Conflicting declarations in {} stage, {}", stage.stage, conflict);
                if strict {
                    return Err(MaterialError::BindingConflict(conflict));
                }
                conflicts.push(conflict);
            }
            push_constants.extend_from_slice(&stage.push_constants);
        }

        for &(set, binding) in dynamic {
            let index = *by_slot
                .get(&(set, binding))
                .ok_or(MaterialError::BindingNotFound { set, binding })?;
            let descriptor = &mut bindings[index];
            descriptor.kind = descriptor.kind.to_dynamic().ok_or(MaterialError::WrongBindingKind {
                set,
                binding,
                kind: descriptor.kind,
                expected: "a uniform or storage buffer",
            })?;
        }

        let mut uniform_data_size = 0u32;
        let uniform_offsets: Vec<Option<u32>> = bindings
            .iter()
            .map(|binding| {
                binding.kind.is_uniform_block().then(|| {
                    let offset = align_up(uniform_data_size, uniform_alignment);
                    uniform_data_size = offset.saturating_add(binding.byte_size);
                    offset
                })
            })
            .collect();

        Ok(Self {
            bindings,
            push_constants,
            uniform_data_size,
            conflicts,
            uniform_offsets,
        })
    }

    /// Index and descriptor of the binding at `(set, binding)`
    pub fn find(&self, set: u32, binding: u32) -> Option<(usize, &BindingDescriptor)> {
        self.bindings
            .iter()
            .enumerate()
            .find(|(_, descriptor)| descriptor.slot() == (set, binding))
    }

    /// Offset of a uniform block binding's data in the instance mirror
    pub fn uniform_offset(&self, index: usize) -> Option<u32> {
        self.uniform_offsets.get(index).copied().flatten()
    }

    /// Highest set index declared, plus one
    pub fn set_count(&self) -> u32 {
        self.bindings
            .iter()
            .map(|b| b.set.checked_add(1).unwrap_or(u32::MAX))
            .max()
            .unwrap_or(0)
    }

    /// Bindings of one set, in merged order
    pub fn bindings_in_set(&self, set: u32) -> impl Iterator<Item = &BindingDescriptor> + '_ {
        self.bindings.iter().filter(move |b| b.set == set)
    }
}

fn align_up(value: u32, alignment: u32) -> u32 {
    let alignment = alignment.max(1);
    match value % alignment {
        0 => value,
        rem => value.saturating_add(alignment - rem),
    }
}

/// Reflects shader stages and synthesizes the layouts of a material
///
/// ```ignore
/// let definition = MaterialLayoutBuilder::new("lit")
///     .vertex(&vert_spv)
///     .fragment(&frag_spv)
///     .build(device.clone())?;
/// ```
#[derive(Debug, Clone)]
pub struct MaterialLayoutBuilder<'a> {
    name: String,
    vertex: Option<&'a [u8]>,
    fragment: Option<&'a [u8]>,
    compute: Option<&'a [u8]>,
    dynamic: Vec<(u32, u32)>,
    strict: bool,
    uniform_alignment: u32,
}

impl<'a> MaterialLayoutBuilder<'a> {
    /// Builder with no stages
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vertex: None,
            fragment: None,
            compute: None,
            dynamic: Vec::new(),
            strict: false,
            uniform_alignment: 1,
        }
    }

    /// Vertex stage SPIR-V bytes
    pub fn vertex(mut self, code: &'a [u8]) -> Self {
        self.vertex = Some(code);
        self
    }

    /// Fragment stage SPIR-V bytes
    pub fn fragment(mut self, code: &'a [u8]) -> Self {
        self.fragment = Some(code);
        self
    }

    /// Compute stage SPIR-V bytes
    pub fn compute(mut self, code: &'a [u8]) -> Self {
        self.compute = Some(code);
        self
    }

    /// Use a dynamic-offset descriptor for the buffer at `(set, binding)`
    pub fn dynamic(mut self, set: u32, binding: u32) -> Self {
        self.dynamic.push((set, binding));
        self
    }

    /// Reject conflicting declarations instead of keeping the first
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Start every uniform block at a multiple of `alignment` bytes
    ///
    /// [`Self::build`] raises this to the device's
    /// `minUniformBufferOffsetAlignment`.
    pub fn uniform_alignment(mut self, alignment: u32) -> Self {
        self.uniform_alignment = alignment.max(1);
        self
    }

    /// Reflect and merge without touching the device
    ///
    /// Stages merge in fragment, vertex, compute order.
    pub fn reflect(&self) -> MaterialResult<MaterialReflection> {
        let mut stages = Vec::with_capacity(3);
        for (stage, code) in [
            (ShaderStage::Fragment, self.fragment),
            (ShaderStage::Vertex, self.vertex),
            (ShaderStage::Compute, self.compute),
        ] {
            let Some(code) = code else { continue };
            let reflection =
                reflect::reflect(code, code.len() / 4).map_err(|source| MaterialError::Reflect { stage, source })?;
            debug!(
                "Reflected {} stage '{}': {} bindings, {} push constant ranges",
                stage,
                reflection.entry_point,
                reflection.bindings.len(),
                reflection.push_constants.len()
            );
            stages.push(reflection);
        }
        MaterialReflection::merge(&stages, &self.dynamic, self.strict, self.uniform_alignment)
    }

    /// Reflect, merge, and create the layouts
    pub fn build(mut self, device: Arc<dyn GpuDevice>) -> MaterialResult<Arc<MaterialDefinition>> {
        let device_alignment =
            u32::try_from(device.capabilities().min_uniform_buffer_offset_alignment).unwrap_or(u32::MAX);
        self.uniform_alignment = self.uniform_alignment.max(device_alignment);
        let reflection = self.reflect()?;
        MaterialDefinition::create(device, self.name, reflection)
    }
}

/// Set layouts and pipeline layout shared by every instance of a material
pub struct MaterialDefinition {
    device: Arc<dyn GpuDevice>,
    name: String,
    reflection: MaterialReflection,
    set_layouts: Vec<Option<vk::DescriptorSetLayout>>,
    pipeline_layout: vk::PipelineLayout,
}

impl MaterialDefinition {
    /// Create one set layout per populated set and a pipeline layout over them
    ///
    /// Unpopulated set indices get no layout and are left out of the pipeline
    /// layout, so pipeline-layout index `i` is the `i`-th populated set.
    /// Everything created so far is destroyed if any creation fails.
    pub fn create(
        device: Arc<dyn GpuDevice>,
        name: impl Into<String>,
        reflection: MaterialReflection,
    ) -> MaterialResult<Arc<Self>> {
        let name = name.into();
        let count = reflection.set_count();
        let limit = device.capabilities().max_bound_descriptor_sets;
        if count > limit {
            warn!("Material '{}' declares {} sets, device limit is {}", name, count, limit);
            return Err(MaterialError::TooManyDescriptorSets { count, limit });
        }

        let mut created = Vec::new();
        match Self::create_layouts(device.as_ref(), &reflection, &mut created) {
            Ok((set_layouts, pipeline_layout)) => {
                debug!(
                    "Material '{}': {} sets, {} bindings, {} uniform bytes",
                    name,
                    set_layouts.len(),
                    reflection.bindings.len(),
                    reflection.uniform_data_size
                );
                Ok(Arc::new(Self {
                    device,
                    name,
                    reflection,
                    set_layouts,
                    pipeline_layout,
                }))
            }
            Err(err) => {
                warn!("Material '{}' layout creation failed: {}", name, err);
                for layout in created {
                    device.destroy_descriptor_set_layout(layout);
                }
                Err(err.into())
            }
        }
    }

    fn create_layouts(
        device: &dyn GpuDevice,
        reflection: &MaterialReflection,
        created: &mut Vec<vk::DescriptorSetLayout>,
    ) -> VulkanResult<(Vec<Option<vk::DescriptorSetLayout>>, vk::PipelineLayout)> {
        let mut set_layouts = Vec::new();
        for set in 0..reflection.set_count() {
            let bindings: Vec<vk::DescriptorSetLayoutBinding> = reflection
                .bindings_in_set(set)
                .map(|b| {
                    vk::DescriptorSetLayoutBinding::builder()
                        .binding(b.binding)
                        .descriptor_type(b.kind.to_vk())
                        .descriptor_count(b.array_count)
                        .stage_flags(b.stages)
                        .build()
                })
                .collect();
            if bindings.is_empty() {
                set_layouts.push(None);
                continue;
            }
            let layout = device.create_descriptor_set_layout(&bindings)?;
            created.push(layout);
            set_layouts.push(Some(layout));
        }

        let populated: Vec<vk::DescriptorSetLayout> = set_layouts.iter().flatten().copied().collect();
        let push_constants: Vec<vk::PushConstantRange> =
            reflection.push_constants.iter().map(|range| range.to_vk()).collect();
        let pipeline_layout = device.create_pipeline_layout(&populated, &push_constants)?;

        Ok((set_layouts, pipeline_layout))
    }

    /// Material name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merged reflection the layouts were built from
    pub const fn reflection(&self) -> &MaterialReflection {
        &self.reflection
    }

    /// Layout per set index, `None` for sets with no bindings
    pub fn set_layouts(&self) -> &[Option<vk::DescriptorSetLayout>] {
        &self.set_layouts
    }

    /// Layout of one set
    pub fn set_layout(&self, set: u32) -> Option<vk::DescriptorSetLayout> {
        self.set_layouts.get(set as usize).copied().flatten()
    }

    /// Index of a populated set within the pipeline layout
    pub fn pipeline_set_index(&self, set: u32) -> Option<u32> {
        self.set_layout(set)?;
        let before = self.set_layouts.iter().take(set as usize).flatten().count();
        u32::try_from(before).ok()
    }

    /// Pipeline layout covering every set and push constant range
    pub const fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }
}

impl fmt::Debug for MaterialDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterialDefinition")
            .field("name", &self.name)
            .field("set_layouts", &self.set_layouts)
            .field("pipeline_layout", &self.pipeline_layout)
            .finish_non_exhaustive()
    }
}

impl Drop for MaterialDefinition {
    fn drop(&mut self) {
        debug!("Destroying layouts of material '{}'", self.name);
        self.device.destroy_pipeline_layout(self.pipeline_layout);
        for layout in self.set_layouts.iter().flatten() {
            self.device.destroy_descriptor_set_layout(*layout);
        }
    }
}
