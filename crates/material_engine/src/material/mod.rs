//! Materials: layouts derived from shader reflection and the instances bound
//! against them
//!
//! A [`MaterialDefinition`] is built once per shader combination by
//! [`MaterialLayoutBuilder`] and shared by `Arc`. Each [`MaterialInstance`]
//! allocates its own descriptor sets and uniform buffer from the
//! [`MaterialSystem`]'s pool, records resource bindings, and writes them all
//! in one batch on [`MaterialInstance::flush_descriptors`].

pub mod descriptor;
pub mod instance;
pub mod layout;
pub mod system;

use std::fmt;

use thiserror::Error;

pub use descriptor::DescriptorPool;
pub use instance::{MaterialInstance, MaterialInstanceManager};
pub use layout::{MaterialDefinition, MaterialLayoutBuilder, MaterialReflection};
pub use system::MaterialSystem;

use crate::backend::VulkanError;
use crate::reflect::{BindingDescriptor, BindingKind, ReflectError, ShaderStage};

/// Two stages declaring the same `(set, binding)` differently
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingConflict {
    /// Descriptor that stayed in the merged reflection
    pub kept: BindingDescriptor,
    /// Descriptor that was discarded
    pub discarded: BindingDescriptor,
}

impl fmt::Display for BindingConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "set {} binding {}: kept {:?}[{}] ({} bytes), discarded {:?}[{}] ({} bytes)",
            self.kept.set,
            self.kept.binding,
            self.kept.kind,
            self.kept.array_count,
            self.kept.byte_size,
            self.discarded.kind,
            self.discarded.array_count,
            self.discarded.byte_size
        )
    }
}

/// Material errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterialError {
    /// Neither graphics nor compute stages were supplied
    #[error("No shader stages supplied")]
    NoShaderStages,

    /// A stage failed to reflect
    #[error("Reflection of the {stage} stage failed: {source}")]
    Reflect {
        /// Stage slot the bytecode was supplied in
        stage: ShaderStage,
        /// Reflection failure
        source: ReflectError,
    },

    /// Stages disagree on a binding and strict merging is enabled
    #[error("Binding conflict at {0}")]
    BindingConflict(BindingConflict),

    /// No reflected binding at the requested slot
    #[error("No binding at set {set}, binding {binding}")]
    BindingNotFound {
        /// Set index
        set: u32,
        /// Binding index
        binding: u32,
    },

    /// Texture bound to a binding that cannot sample it
    #[error("Binding at set {set}, binding {binding} is {kind:?}, not a texture binding")]
    NotAnImageBinding {
        /// Set index
        set: u32,
        /// Binding index
        binding: u32,
        /// Reflected kind
        kind: BindingKind,
    },

    /// Resource of the wrong class for the binding
    #[error("Binding at set {set}, binding {binding} is {kind:?}, expected {expected}")]
    WrongBindingKind {
        /// Set index
        set: u32,
        /// Binding index
        binding: u32,
        /// Reflected kind
        kind: BindingKind,
        /// What the operation needs
        expected: &'static str,
    },

    /// Highest declared set is beyond what the device can bind
    #[error("Material uses {count} descriptor sets, device binds at most {limit}")]
    TooManyDescriptorSets {
        /// Highest declared set index plus one
        count: u32,
        /// `maxBoundDescriptorSets`
        limit: u32,
    },

    /// GPU object creation or allocation failed
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

/// Result type for material operations
pub type MaterialResult<T> = Result<T, MaterialError>;
