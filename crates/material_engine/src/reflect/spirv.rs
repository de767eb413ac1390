//! SPIR-V binary walker
//!
//! Only the instructions that matter for resource interfaces are decoded:
//! entry points, names, decorations, type declarations, scalar constants and
//! global variables. Everything else is skipped by word count.

use std::collections::HashMap;

use super::{
    BindingDescriptor, BindingKind, EnumerationFailure, ParseFailure, PushConstantRange,
    ReflectError, ShaderReflection, ShaderStage, MAX_DESCRIPTOR_SETS,
};

/// First word of every module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Magic, version, generator, bound, schema
pub(crate) const HEADER_WORDS: usize = 5;

const MAX_TYPE_DEPTH: u32 = 32;

pub(crate) mod op {
    pub const NAME: u16 = 5;
    pub const ENTRY_POINT: u16 = 15;
    pub const TYPE_VOID: u16 = 19;
    pub const TYPE_BOOL: u16 = 20;
    pub const TYPE_INT: u16 = 21;
    pub const TYPE_FLOAT: u16 = 22;
    pub const TYPE_VECTOR: u16 = 23;
    pub const TYPE_MATRIX: u16 = 24;
    pub const TYPE_IMAGE: u16 = 25;
    pub const TYPE_SAMPLER: u16 = 26;
    pub const TYPE_SAMPLED_IMAGE: u16 = 27;
    pub const TYPE_ARRAY: u16 = 28;
    pub const TYPE_RUNTIME_ARRAY: u16 = 29;
    pub const TYPE_STRUCT: u16 = 30;
    pub const TYPE_POINTER: u16 = 32;
    pub const CONSTANT: u16 = 43;
    pub const VARIABLE: u16 = 59;
    pub const DECORATE: u16 = 71;
    pub const MEMBER_DECORATE: u16 = 72;
}

pub(crate) mod decoration {
    pub const BLOCK: u32 = 2;
    pub const BUFFER_BLOCK: u32 = 3;
    pub const ARRAY_STRIDE: u32 = 6;
    pub const MATRIX_STRIDE: u32 = 7;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
}

pub(crate) mod storage_class {
    pub const UNIFORM_CONSTANT: u32 = 0;
    pub const UNIFORM: u32 = 2;
    pub const PUSH_CONSTANT: u32 = 9;
    pub const STORAGE_BUFFER: u32 = 12;
}

pub(crate) mod execution_model {
    pub const VERTEX: u32 = 0;
    pub const FRAGMENT: u32 = 4;
    pub const GL_COMPUTE: u32 = 5;
}

pub(crate) const DIM_BUFFER: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SpirvType {
    Void,
    Bool,
    Int { width: u32 },
    Float { width: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, columns: u32 },
    Image { dim: u32, sampled: u32 },
    Sampler,
    SampledImage,
    Array { element: u32, length: u32 },
    RuntimeArray,
    Struct { members: Vec<u32> },
    Pointer { pointee: u32 },
}

#[derive(Debug, Default, Clone, Copy)]
struct Decorations {
    block: bool,
    buffer_block: bool,
    binding: Option<u32>,
    set: Option<u32>,
    array_stride: Option<u32>,
}

#[derive(Debug, Default, Clone, Copy)]
struct MemberDecorations {
    offset: Option<u32>,
    matrix_stride: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct Variable {
    id: u32,
    pointer_type: u32,
    storage_class: u32,
}

/// Decoded instruction view
struct Instruction<'a> {
    offset: usize,
    opcode: u16,
    operands: &'a [u32],
}

impl Instruction<'_> {
    fn operand(&self, index: usize) -> Result<u32, ReflectError> {
        self.operands.get(index).copied().ok_or(ReflectError::Parse {
            offset: self.offset,
            failure: ParseFailure::TruncatedOperands { opcode: self.opcode },
        })
    }

    fn string(&self, index: usize) -> Result<String, ReflectError> {
        let words = self.operands.get(index..).unwrap_or_default();
        literal_string(words).ok_or(ReflectError::Parse {
            offset: self.offset,
            failure: ParseFailure::UnterminatedString,
        })
    }
}

/// Decode a nul-terminated UTF-8 literal packed into words
fn literal_string(words: &[u32]) -> Option<String> {
    let mut bytes = Vec::new();
    for word in words {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                return Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.push(byte);
        }
    }
    None
}

fn enumeration(failure: EnumerationFailure) -> ReflectError {
    ReflectError::Enumeration(failure)
}

/// Interface-relevant contents of one module
#[derive(Debug, Default)]
pub(crate) struct Module {
    entry_point: Option<(u32, String)>,
    names: HashMap<u32, String>,
    decorations: HashMap<u32, Decorations>,
    member_decorations: HashMap<(u32, u32), MemberDecorations>,
    types: HashMap<u32, SpirvType>,
    constants: HashMap<u32, u32>,
    variables: Vec<Variable>,
}

impl Module {
    /// Walk every instruction and collect declarations
    pub(crate) fn parse(words: &[u32]) -> Result<Self, ReflectError> {
        if words[0] != SPIRV_MAGIC {
            return Err(ReflectError::Parse {
                offset: 0,
                failure: ParseFailure::BadMagic(words[0]),
            });
        }

        let mut module = Self::default();
        let mut offset = HEADER_WORDS;
        while offset < words.len() {
            let header = words[offset];
            let word_count = (header >> 16) as usize;
            if word_count == 0 {
                return Err(ReflectError::Parse {
                    offset,
                    failure: ParseFailure::ZeroLengthInstruction,
                });
            }
            if offset + word_count > words.len() {
                return Err(ReflectError::Parse {
                    offset,
                    failure: ParseFailure::Overrun { word_count },
                });
            }

            let instruction = Instruction {
                offset,
                opcode: (header & 0xffff) as u16,
                operands: &words[offset + 1..offset + word_count],
            };
            module.record(&instruction)?;
            offset += word_count;
        }
        Ok(module)
    }

    fn record(&mut self, inst: &Instruction<'_>) -> Result<(), ReflectError> {
        match inst.opcode {
            op::ENTRY_POINT => {
                let model = inst.operand(0)?;
                inst.operand(1)?;
                let name = inst.string(2)?;
                if self.entry_point.is_none() {
                    self.entry_point = Some((model, name));
                }
            }
            op::NAME => {
                let target = inst.operand(0)?;
                let name = inst.string(1)?;
                self.names.insert(target, name);
            }
            op::DECORATE => {
                let target = inst.operand(0)?;
                let kind = inst.operand(1)?;
                let entry = self.decorations.entry(target).or_default();
                match kind {
                    decoration::BLOCK => entry.block = true,
                    decoration::BUFFER_BLOCK => entry.buffer_block = true,
                    decoration::BINDING => entry.binding = Some(inst.operand(2)?),
                    decoration::DESCRIPTOR_SET => entry.set = Some(inst.operand(2)?),
                    decoration::ARRAY_STRIDE => entry.array_stride = Some(inst.operand(2)?),
                    _ => {}
                }
            }
            op::MEMBER_DECORATE => {
                let target = inst.operand(0)?;
                let member = inst.operand(1)?;
                let kind = inst.operand(2)?;
                let entry = self.member_decorations.entry((target, member)).or_default();
                match kind {
                    decoration::OFFSET => entry.offset = Some(inst.operand(3)?),
                    decoration::MATRIX_STRIDE => entry.matrix_stride = Some(inst.operand(3)?),
                    _ => {}
                }
            }
            op::TYPE_VOID => self.declare(inst.operand(0)?, SpirvType::Void),
            op::TYPE_BOOL => self.declare(inst.operand(0)?, SpirvType::Bool),
            op::TYPE_INT => {
                let width = inst.operand(1)?;
                self.declare(inst.operand(0)?, SpirvType::Int { width });
            }
            op::TYPE_FLOAT => {
                let width = inst.operand(1)?;
                self.declare(inst.operand(0)?, SpirvType::Float { width });
            }
            op::TYPE_VECTOR => {
                let ty = SpirvType::Vector {
                    component: inst.operand(1)?,
                    count: inst.operand(2)?,
                };
                self.declare(inst.operand(0)?, ty);
            }
            op::TYPE_MATRIX => {
                let ty = SpirvType::Matrix {
                    column: inst.operand(1)?,
                    columns: inst.operand(2)?,
                };
                self.declare(inst.operand(0)?, ty);
            }
            op::TYPE_IMAGE => {
                let ty = SpirvType::Image {
                    dim: inst.operand(2)?,
                    sampled: inst.operand(6)?,
                };
                self.declare(inst.operand(0)?, ty);
            }
            op::TYPE_SAMPLER => self.declare(inst.operand(0)?, SpirvType::Sampler),
            op::TYPE_SAMPLED_IMAGE => {
                inst.operand(1)?;
                self.declare(inst.operand(0)?, SpirvType::SampledImage);
            }
            op::TYPE_ARRAY => {
                let ty = SpirvType::Array {
                    element: inst.operand(1)?,
                    length: inst.operand(2)?,
                };
                self.declare(inst.operand(0)?, ty);
            }
            op::TYPE_RUNTIME_ARRAY => {
                inst.operand(1)?;
                self.declare(inst.operand(0)?, SpirvType::RuntimeArray);
            }
            op::TYPE_STRUCT => {
                let members = inst.operands.get(1..).unwrap_or_default().to_vec();
                self.declare(inst.operand(0)?, SpirvType::Struct { members });
            }
            op::TYPE_POINTER => {
                let pointee = inst.operand(2)?;
                self.declare(inst.operand(0)?, SpirvType::Pointer { pointee });
            }
            op::CONSTANT => {
                let id = inst.operand(1)?;
                let value = inst.operand(2)?;
                self.constants.insert(id, value);
            }
            op::VARIABLE => {
                self.variables.push(Variable {
                    pointer_type: inst.operand(0)?,
                    id: inst.operand(1)?,
                    storage_class: inst.operand(2)?,
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn declare(&mut self, id: u32, ty: SpirvType) {
        self.types.insert(id, ty);
    }

    fn ty(&self, id: u32) -> Result<&SpirvType, ReflectError> {
        self.types
            .get(&id)
            .ok_or_else(|| enumeration(EnumerationFailure::UnknownType(id)))
    }

    fn decorations(&self, id: u32) -> Decorations {
        self.decorations.get(&id).copied().unwrap_or_default()
    }

    fn constant(&self, id: u32) -> Result<u32, ReflectError> {
        self.constants
            .get(&id)
            .copied()
            .ok_or_else(|| enumeration(EnumerationFailure::ArrayLengthNotConstant(id)))
    }

    /// Byte size of a type as laid out in a block
    fn type_size(&self, id: u32, matrix_stride: Option<u32>, depth: u32) -> Result<u32, ReflectError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(enumeration(EnumerationFailure::TypeNestingTooDeep));
        }
        let size = match self.ty(id)? {
            SpirvType::Bool => 4,
            SpirvType::Int { width } | SpirvType::Float { width } => width / 8,
            SpirvType::Vector { component, count } => {
                self.type_size(*component, None, depth + 1)?.saturating_mul(*count)
            }
            SpirvType::Matrix { column, columns } => match matrix_stride {
                Some(stride) => stride.saturating_mul(*columns),
                None => self.type_size(*column, None, depth + 1)?.saturating_mul(*columns),
            },
            SpirvType::Array { element, length } => {
                let length = self.constant(*length)?;
                let stride = match self.decorations(id).array_stride {
                    Some(stride) => stride,
                    None => self.type_size(*element, matrix_stride, depth + 1)?,
                };
                stride.saturating_mul(length)
            }
            SpirvType::Struct { members } => self.block_extent(id, members, depth)?.1,
            SpirvType::RuntimeArray
            | SpirvType::Void
            | SpirvType::Image { .. }
            | SpirvType::Sampler
            | SpirvType::SampledImage
            | SpirvType::Pointer { .. } => 0,
        };
        Ok(size)
    }

    /// `(smallest member offset, end of last member)` of a struct
    fn block_extent(&self, id: u32, members: &[u32], depth: u32) -> Result<(u32, u32), ReflectError> {
        let mut start = u32::MAX;
        let mut end = 0u32;
        let mut cursor = 0u32;
        for (index, &member) in members.iter().enumerate() {
            let deco = self
                .member_decorations
                .get(&(id, index as u32))
                .copied()
                .unwrap_or_default();
            let offset = deco.offset.unwrap_or(cursor);
            let size = self.type_size(member, deco.matrix_stride, depth + 1)?;
            start = start.min(offset);
            cursor = offset.saturating_add(size);
            end = end.max(cursor);
        }
        if members.is_empty() {
            start = 0;
        }
        Ok((start, end))
    }

    fn stage(&self) -> Result<(ShaderStage, String), ReflectError> {
        let (model, name) = self
            .entry_point
            .as_ref()
            .ok_or_else(|| enumeration(EnumerationFailure::NoEntryPoint))?;
        let stage = match *model {
            execution_model::VERTEX => ShaderStage::Vertex,
            execution_model::FRAGMENT => ShaderStage::Fragment,
            execution_model::GL_COMPUTE => ShaderStage::Compute,
            other => return Err(enumeration(EnumerationFailure::UnsupportedExecutionModel(other))),
        };
        Ok((stage, name.clone()))
    }

    /// Resolve every interface variable into bindings and push ranges
    pub(crate) fn reflect(&self) -> Result<ShaderReflection, ReflectError> {
        let (stage, entry_point) = self.stage()?;
        let mut bindings = Vec::new();
        let mut push_constants = Vec::new();

        for variable in &self.variables {
            match variable.storage_class {
                storage_class::PUSH_CONSTANT => {
                    if let Some(range) = self.push_constant_range(variable, stage)? {
                        push_constants.push(range);
                    }
                }
                storage_class::UNIFORM_CONSTANT | storage_class::UNIFORM | storage_class::STORAGE_BUFFER => {
                    bindings.push(self.binding(variable, stage)?);
                }
                _ => {}
            }
        }

        Ok(ShaderReflection {
            stage,
            entry_point,
            bindings,
            push_constants,
        })
    }

    fn pointee(&self, variable: &Variable) -> Result<u32, ReflectError> {
        match self.ty(variable.pointer_type)? {
            SpirvType::Pointer { pointee } => Ok(*pointee),
            _ => Err(enumeration(EnumerationFailure::UnknownType(variable.pointer_type))),
        }
    }

    fn push_constant_range(
        &self,
        variable: &Variable,
        stage: ShaderStage,
    ) -> Result<Option<PushConstantRange>, ReflectError> {
        let block = self.pointee(variable)?;
        let SpirvType::Struct { members } = self.ty(block)? else {
            return Err(enumeration(EnumerationFailure::UnsupportedResource { id: variable.id }));
        };
        let (start, end) = self.block_extent(block, members, 0)?;
        if end <= start {
            return Ok(None);
        }
        Ok(Some(PushConstantRange {
            stages: stage.to_vk(),
            offset: start,
            size: end - start,
        }))
    }

    fn binding(&self, variable: &Variable, stage: ShaderStage) -> Result<BindingDescriptor, ReflectError> {
        let pointee = self.pointee(variable)?;
        let (base, array_count) = match self.ty(pointee)? {
            SpirvType::Array { element, length } => (*element, self.constant(*length)?),
            SpirvType::RuntimeArray => {
                return Err(enumeration(EnumerationFailure::RuntimeDescriptorArray { id: variable.id }))
            }
            _ => (pointee, 1),
        };

        let base_decorations = self.decorations(base);
        let unsupported = || enumeration(EnumerationFailure::UnsupportedResource { id: variable.id });
        let kind = match (variable.storage_class, self.ty(base)?) {
            (storage_class::UNIFORM_CONSTANT, SpirvType::Sampler) => BindingKind::Sampler,
            (storage_class::UNIFORM_CONSTANT, SpirvType::SampledImage) => BindingKind::CombinedImageSampler,
            (storage_class::UNIFORM_CONSTANT, SpirvType::Image { dim: DIM_BUFFER, sampled }) => {
                BindingKind::TexelBuffer { storage: *sampled == 2 }
            }
            (storage_class::UNIFORM_CONSTANT, SpirvType::Image { sampled: 1, .. }) => BindingKind::SampledImage,
            (storage_class::UNIFORM_CONSTANT, SpirvType::Image { sampled: 2, .. }) => BindingKind::StorageImage,
            (storage_class::UNIFORM, SpirvType::Struct { .. }) if base_decorations.block => {
                BindingKind::UniformBuffer
            }
            (storage_class::UNIFORM, SpirvType::Struct { .. }) if base_decorations.buffer_block => {
                BindingKind::StorageBuffer
            }
            (storage_class::STORAGE_BUFFER, SpirvType::Struct { .. }) => BindingKind::StorageBuffer,
            _ => return Err(unsupported()),
        };

        let byte_size = if matches!(kind, BindingKind::UniformBuffer | BindingKind::StorageBuffer) {
            self.type_size(base, None, 0)?
        } else {
            0
        };

        let var_decorations = self.decorations(variable.id);
        let binding = var_decorations
            .binding
            .ok_or_else(|| enumeration(EnumerationFailure::MissingBinding { id: variable.id }))?;

        let name = self
            .names
            .get(&variable.id)
            .filter(|name| !name.is_empty())
            .or_else(|| self.names.get(&base))
            .cloned()
            .unwrap_or_default();

        let set = var_decorations.set.unwrap_or(0);
        if set >= MAX_DESCRIPTOR_SETS {
            return Err(enumeration(EnumerationFailure::DescriptorSetOutOfRange { id: variable.id, set }));
        }

        Ok(BindingDescriptor {
            set,
            binding,
            kind,
            array_count,
            byte_size,
            name,
            stages: stage.to_vk(),
        })
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;
    use crate::reflect::builder::SpirvBuilder;
    use crate::reflect::reflect_words;

    #[test]
    fn test_literal_string_needs_terminator() {
        // "abcd" followed by a zero word
        let words = [u32::from_le_bytes(*b"abcd"), 0];
        assert_eq!(literal_string(&words).as_deref(), Some("abcd"));
        assert_eq!(literal_string(&words[..1]), None);
    }

    #[test]
    fn test_zero_length_instruction() {
        let mut words = SpirvBuilder::new().fragment("main").finish();
        words.push(0);
        let err = reflect_words(&words).unwrap_err();
        assert!(matches!(
            err,
            ReflectError::Parse {
                failure: ParseFailure::ZeroLengthInstruction,
                ..
            }
        ));
    }

    #[test]
    fn test_overrunning_instruction() {
        let mut words = SpirvBuilder::new().fragment("main").finish();
        let at = words.len();
        words.push((9 << 16) | u32::from(op::NAME));
        words.push(1);
        let err = reflect_words(&words).unwrap_err();
        assert_eq!(
            err,
            ReflectError::Parse {
                offset: at,
                failure: ParseFailure::Overrun { word_count: 9 }
            }
        );
    }

    #[test]
    fn test_truncated_operands() {
        let mut words = SpirvBuilder::new().fragment("main").finish();
        // OpDecorate with only a target
        words.push((2 << 16) | u32::from(op::DECORATE));
        words.push(1);
        let err = reflect_words(&words).unwrap_err();
        assert!(matches!(
            err,
            ReflectError::Parse {
                failure: ParseFailure::TruncatedOperands { opcode: op::DECORATE },
                ..
            }
        ));
    }

    #[test]
    fn test_missing_entry_point() {
        let words = SpirvBuilder::new().finish();
        let err = reflect_words(&words).unwrap_err();
        assert_eq!(err, ReflectError::Enumeration(EnumerationFailure::NoEntryPoint));
        assert_eq!(err.code(), -3);
    }

    #[test]
    fn test_unsupported_execution_model() {
        // Geometry
        let words = SpirvBuilder::with_model(3, "main").finish();
        let err = reflect_words(&words).unwrap_err();
        assert_eq!(
            err,
            ReflectError::Enumeration(EnumerationFailure::UnsupportedExecutionModel(3))
        );
    }

    #[test]
    fn test_uniform_block_size_and_names() {
        let mut b = SpirvBuilder::new().vertex("main");
        let float = b.type_float(32);
        let vec4 = b.type_vector(float, 4);
        let mat4 = b.type_matrix(vec4, 4);
        let var = b.uniform_block(1, 0, "", "Transforms", &[(mat4, 0), (vec4, 64), (float, 80)]);
        b.member_decorate_value(var.block, 0, decoration::MATRIX_STRIDE, 16);
        let reflection = reflect_words(&b.finish()).unwrap();

        assert_eq!(reflection.stage, ShaderStage::Vertex);
        let binding = &reflection.bindings[0];
        assert_eq!(binding.slot(), (1, 0));
        assert_eq!(binding.kind, BindingKind::UniformBuffer);
        assert_eq!(binding.byte_size, 84);
        assert_eq!(binding.name, "Transforms");
        assert_eq!(binding.stages, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_array_stride_and_descriptor_arrays() {
        let mut b = SpirvBuilder::new().fragment("main");
        let float = b.type_float(32);
        let uint = b.type_int(32, false);
        let four = b.constant_u32(uint, 4);
        let floats = b.type_array(float, four);
        b.decorate_value(floats, decoration::ARRAY_STRIDE, 16);
        b.uniform_block(0, 0, "lights", "Lights", &[(floats, 0)]);

        let three = b.constant_u32(uint, 3);
        b.combined_image_sampler_array(0, 1, "shadows", three);
        let reflection = reflect_words(&b.finish()).unwrap();

        assert_eq!(reflection.bindings[0].byte_size, 64);
        assert_eq!(reflection.bindings[0].name, "lights");
        assert_eq!(reflection.bindings[1].kind, BindingKind::CombinedImageSampler);
        assert_eq!(reflection.bindings[1].array_count, 3);
        assert_eq!(reflection.bindings[1].byte_size, 0);
    }

    #[test]
    fn test_runtime_descriptor_array_is_rejected() {
        let mut b = SpirvBuilder::new().fragment("main");
        let id = b.runtime_sampler_array(0, 0);
        let err = reflect_words(&b.finish()).unwrap_err();
        assert_eq!(
            err,
            ReflectError::Enumeration(EnumerationFailure::RuntimeDescriptorArray { id })
        );
    }

    #[test]
    fn test_image_kinds() {
        let mut b = SpirvBuilder::new().compute("main");
        b.sampler(0, 0, "linear");
        b.sampled_image(0, 1, "albedo");
        b.storage_image(0, 2, "target");
        b.texel_buffer(0, 3, false);
        b.texel_buffer(0, 4, true);
        let kinds: Vec<_> = reflect_words(&b.finish())
            .unwrap()
            .bindings
            .iter()
            .map(|binding| binding.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                BindingKind::Sampler,
                BindingKind::SampledImage,
                BindingKind::StorageImage,
                BindingKind::TexelBuffer { storage: false },
                BindingKind::TexelBuffer { storage: true },
            ]
        );
    }

    #[test]
    fn test_missing_set_defaults_to_zero() {
        let mut b = SpirvBuilder::new().fragment("main");
        b.combined_image_sampler_unset(3, "albedo");
        let reflection = reflect_words(&b.finish()).unwrap();
        assert_eq!(reflection.bindings[0].slot(), (0, 3));
    }

    #[test]
    fn test_descriptor_set_beyond_limit_is_rejected() {
        let mut b = SpirvBuilder::new().fragment("main");
        b.combined_image_sampler(u32::MAX, 0, "albedo");
        let err = reflect_words(&b.finish()).unwrap_err();
        assert!(matches!(
            err,
            ReflectError::Enumeration(EnumerationFailure::DescriptorSetOutOfRange { set: u32::MAX, .. })
        ));
        assert_eq!(err.code(), -3);

        let mut b = SpirvBuilder::new().fragment("main");
        b.combined_image_sampler(MAX_DESCRIPTOR_SETS - 1, 0, "last");
        let reflection = reflect_words(&b.finish()).unwrap();
        assert_eq!(reflection.bindings[0].set, MAX_DESCRIPTOR_SETS - 1);
    }

    #[test]
    fn test_buffer_block_and_storage_class_buffers() {
        let mut b = SpirvBuilder::new().compute("main");
        let float = b.type_float(32);
        b.legacy_buffer_block(0, 0, &[(float, 0), (float, 4)]);
        b.storage_buffer(0, 1, "particles", &[(float, 0), (float, 12)]);
        let reflection = reflect_words(&b.finish()).unwrap();
        assert_eq!(reflection.bindings[0].kind, BindingKind::StorageBuffer);
        assert_eq!(reflection.bindings[0].byte_size, 8);
        assert_eq!(reflection.bindings[1].kind, BindingKind::StorageBuffer);
        assert_eq!(reflection.bindings[1].byte_size, 16);
    }

    #[test]
    fn test_push_constant_range_spans_members() {
        let mut b = SpirvBuilder::new().vertex("main");
        let float = b.type_float(32);
        let vec4 = b.type_vector(float, 4);
        b.push_constant_block(&[(vec4, 16), (float, 32)]);
        let reflection = reflect_words(&b.finish()).unwrap();
        assert_eq!(
            reflection.push_constants,
            vec![PushConstantRange {
                stages: vk::ShaderStageFlags::VERTEX,
                offset: 16,
                size: 20,
            }]
        );
        assert!(reflection.bindings.is_empty());
    }

    #[test]
    fn test_missing_binding_decoration() {
        let mut b = SpirvBuilder::new().fragment("main");
        let id = b.undecorated_sampler();
        let err = reflect_words(&b.finish()).unwrap_err();
        assert_eq!(err, ReflectError::Enumeration(EnumerationFailure::MissingBinding { id }));
    }
}
