//! SPIR-V binding reflection
//!
//! Extracts descriptor bindings and push constant ranges from a compiled
//! shader module. Reflection is a pure function of the bytecode: no GPU state
//! is touched, and results may be computed on any thread.
//!
//! ```no_run
//! use material_engine::reflect::{reflect, BindingKind};
//!
//! let code = std::fs::read("shaders/frag.spv")?;
//! let reflection = reflect(&code, code.len() / 4)?;
//! for binding in &reflection.bindings {
//!     if binding.kind == BindingKind::CombinedImageSampler {
//!         println!("texture {} at {}:{}", binding.name, binding.set, binding.binding);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod spirv;

#[cfg(test)]
pub(crate) mod builder;

use std::fmt;

use ash::vk;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use spirv::SPIRV_MAGIC;

/// Descriptor set indices the reflector accepts, `0..MAX_DESCRIPTOR_SETS`
///
/// Matches the largest `maxBoundDescriptorSets` drivers report. Device limits
/// below this are enforced when a material's layouts are created.
pub const MAX_DESCRIPTOR_SETS: u32 = 32;

/// Descriptor kind of one binding, one-to-one with `vk::DescriptorType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    /// Standalone sampler
    Sampler,
    /// Sampled image with its sampler
    CombinedImageSampler,
    /// Sampled image without a sampler
    SampledImage,
    /// Read/write image
    StorageImage,
    /// Uniform block
    UniformBuffer,
    /// Shader storage block
    StorageBuffer,
    /// Uniform block bound with a dynamic offset
    UniformBufferDynamic,
    /// Storage block bound with a dynamic offset
    StorageBufferDynamic,
    /// Buffer-dimensioned image; `storage` selects the storage variant
    TexelBuffer {
        /// Storage texel buffer rather than uniform texel buffer
        storage: bool,
    },
}

impl BindingKind {
    /// Vulkan descriptor type for this kind
    pub const fn to_vk(self) -> vk::DescriptorType {
        match self {
            Self::Sampler => vk::DescriptorType::SAMPLER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            Self::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            Self::TexelBuffer { storage: false } => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            Self::TexelBuffer { storage: true } => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        }
    }

    /// Kinds a registry texture can be bound to
    pub const fn accepts_texture(self) -> bool {
        matches!(self, Self::Sampler | Self::CombinedImageSampler | Self::SampledImage)
    }

    /// Kinds backed by the instance's uniform mirror
    pub const fn is_uniform_block(self) -> bool {
        matches!(self, Self::UniformBuffer | Self::UniformBufferDynamic)
    }

    /// Kinds backed by a caller-provided storage buffer
    pub const fn is_storage_block(self) -> bool {
        matches!(self, Self::StorageBuffer | Self::StorageBufferDynamic)
    }

    /// Kinds consuming a dynamic offset at bind time
    pub const fn is_dynamic(self) -> bool {
        matches!(self, Self::UniformBufferDynamic | Self::StorageBufferDynamic)
    }

    /// Dynamic counterpart of a buffer kind, `None` for kinds without one
    pub const fn to_dynamic(self) -> Option<Self> {
        match self {
            Self::UniformBuffer | Self::UniformBufferDynamic => Some(Self::UniformBufferDynamic),
            Self::StorageBuffer | Self::StorageBufferDynamic => Some(Self::StorageBufferDynamic),
            _ => None,
        }
    }
}

/// Pipeline stage a module was compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader
    Vertex,
    /// Fragment shader
    Fragment,
    /// Compute shader
    Compute,
}

impl ShaderStage {
    /// Stage flag for layout bindings and push constant ranges
    pub const fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => write!(f, "vertex"),
            Self::Fragment => write!(f, "fragment"),
            Self::Compute => write!(f, "compute"),
        }
    }
}

/// One reflected descriptor binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDescriptor {
    /// Descriptor set index
    pub set: u32,
    /// Binding index within the set
    pub binding: u32,
    /// Descriptor kind
    pub kind: BindingKind,
    /// First array dimension, 1 for non-arrays
    pub array_count: u32,
    /// Block size in bytes for uniform and storage blocks, 0 otherwise
    pub byte_size: u32,
    /// Variable name, or the block type name when the variable is unnamed
    pub name: String,
    /// Stages that declare this binding
    pub stages: vk::ShaderStageFlags,
}

impl BindingDescriptor {
    /// `(set, binding)` pair identifying this binding
    pub const fn slot(&self) -> (u32, u32) {
        (self.set, self.binding)
    }
}

/// Push constant range declared by one or more stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    /// Stages that read the range
    pub stages: vk::ShaderStageFlags,
    /// Byte offset of the first member
    pub offset: u32,
    /// Bytes from `offset` to the end of the block
    pub size: u32,
}

impl PushConstantRange {
    /// Vulkan form for pipeline layout creation
    pub fn to_vk(self) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: self.stages,
            offset: self.offset,
            size: self.size,
        }
    }
}

/// Reflection of one shader module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderReflection {
    /// Stage of the module's entry point
    pub stage: ShaderStage,
    /// Entry point name
    pub entry_point: String,
    /// Bindings in module declaration order
    pub bindings: Vec<BindingDescriptor>,
    /// One range per push constant block
    pub push_constants: Vec<PushConstantRange>,
}

/// Malformed bytecode detail
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// First word is not the SPIR-V magic number
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    /// Instruction header with a word count of zero
    #[error("instruction with zero word count")]
    ZeroLengthInstruction,

    /// Instruction extends past the end of the module
    #[error("instruction of {word_count} words runs past the end of the module")]
    Overrun {
        /// Declared instruction length
        word_count: usize,
    },

    /// Literal string without a nul terminator
    #[error("unterminated literal string")]
    UnterminatedString,

    /// Instruction shorter than its fixed operands
    #[error("opcode {opcode} is missing operands")]
    TruncatedOperands {
        /// Offending opcode
        opcode: u16,
    },
}

/// Well-formed bytecode that cannot be turned into bindings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnumerationFailure {
    /// Module declares no entry point
    #[error("module has no entry point")]
    NoEntryPoint,

    /// Entry point is not a vertex, fragment or compute shader
    #[error("unsupported execution model {0}")]
    UnsupportedExecutionModel(u32),

    /// Reference to an id that is not a declared type
    #[error("id {0} does not name a type")]
    UnknownType(u32),

    /// Resource variable whose type has no descriptor equivalent
    #[error("variable {id} has no descriptor equivalent")]
    UnsupportedResource {
        /// Variable id
        id: u32,
    },

    /// Unsized array of descriptors
    #[error("variable {id} is a runtime descriptor array")]
    RuntimeDescriptorArray {
        /// Variable id
        id: u32,
    },

    /// Array length that is not a scalar constant
    #[error("array length {0} is not a constant")]
    ArrayLengthNotConstant(u32),

    /// Resource variable without a `Binding` decoration
    #[error("variable {id} has no binding decoration")]
    MissingBinding {
        /// Variable id
        id: u32,
    },

    /// Type graph deeper than the reflector follows
    #[error("type nesting too deep")]
    TypeNestingTooDeep,

    /// `DescriptorSet` decoration at or above [`MAX_DESCRIPTOR_SETS`]
    #[error("variable {id} uses out-of-range descriptor set {set}")]
    DescriptorSetOutOfRange {
        /// Variable id
        id: u32,
        /// Decorated set index
        set: u32,
    },
}

/// Reflection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReflectError {
    /// Byte length disagrees with the word count or is not a whole module
    #[error("SPIR-V size mismatch: {bytes} bytes for {word_count} words")]
    SizeMismatch {
        /// Bytes supplied
        bytes: usize,
        /// Words claimed
        word_count: usize,
    },

    /// Malformed bytecode
    #[error("SPIR-V parse error at word {offset}: {failure}")]
    Parse {
        /// Word offset of the offending instruction
        offset: usize,
        /// What was wrong
        failure: ParseFailure,
    },

    /// Bindings could not be enumerated
    #[error("SPIR-V enumeration error: {0}")]
    Enumeration(EnumerationFailure),
}

impl ReflectError {
    /// Stable numeric code for the failure class
    pub const fn code(&self) -> i32 {
        match self {
            Self::SizeMismatch { .. } => -1,
            Self::Parse { .. } => -2,
            Self::Enumeration(_) => -3,
        }
    }
}

/// Reflect a module given as little-endian bytes
///
/// `word_count` must be `code.len() / 4`; any disagreement is reported as
/// [`ReflectError::SizeMismatch`] before the bytes are looked at.
pub fn reflect(code: &[u8], word_count: usize) -> Result<ShaderReflection, ReflectError> {
    let size_mismatch = || ReflectError::SizeMismatch {
        bytes: code.len(),
        word_count,
    };
    if word_count.checked_mul(4) != Some(code.len()) || word_count < spirv::HEADER_WORDS {
        return Err(size_mismatch());
    }

    match bytemuck::try_cast_slice::<u8, u32>(code) {
        Ok(words) => reflect_words(words),
        Err(_) => {
            let words: Vec<u32> = code.chunks_exact(4).map(bytemuck::pod_read_unaligned).collect();
            reflect_words(&words)
        }
    }
}

/// Reflect a module given as words
pub fn reflect_words(words: &[u32]) -> Result<ShaderReflection, ReflectError> {
    if words.len() < spirv::HEADER_WORDS {
        return Err(ReflectError::SizeMismatch {
            bytes: words.len() * 4,
            word_count: words.len(),
        });
    }
    let module = spirv::Module::parse(words)?;
    module.reflect()
}
