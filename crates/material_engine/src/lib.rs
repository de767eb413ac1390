//! # Material Engine
//!
//! Shader-reflected material layouts, descriptor lifecycle, and
//! frames-in-flight management for Vulkan renderers built on `ash`.
//!
//! ## Features
//!
//! - **SPIR-V Reflection**: descriptor bindings and push constant ranges read
//!   straight from shader bytecode
//! - **Material Layouts**: per-stage reflections merged into set layouts and a
//!   pipeline layout, with reflection-accurate stage masks
//! - **Material Instances**: batched descriptor allocation, a CPU uniform
//!   mirror, and single-call descriptor flushes
//! - **Texture Registry**: reference-counted, name-deduplicated textures with
//!   generated mip chains
//! - **Frame Controller**: N frames in flight with swapchain rebuilds on resize
//!   and out-of-date surfaces
//! - **Headless Backend**: every GPU call recorded, for tests and tooling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use material_engine::prelude::*;
//! use material_engine::backend::headless::HeadlessDevice;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::load_from_file("engine.toml").unwrap_or_default();
//!     material_engine::foundation::logging::init_from_config(&config.logging);
//!
//!     let device: Arc<dyn GpuDevice> = Arc::new(HeadlessDevice::new());
//!     let mut materials = MaterialSystem::new(device, &config.materials)?;
//!
//!     let vert = std::fs::read("shaders/lit.vert.spv")?;
//!     let frag = std::fs::read("shaders/lit.frag.spv")?;
//!     let definition = materials.create_definition(
//!         materials.layout_builder("lit").vertex(&vert).fragment(&frag),
//!     )?;
//!
//!     let mut instance = materials.create_instance(&definition)?;
//!     let albedo = materials.load_texture(Some("white"), &[255; 4], 1, 1, 4, false)?;
//!     instance.bind_texture(1, 0, albedo)?;
//!     materials.flush(&mut instance)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod backend;
pub mod config;
pub mod foundation;
pub mod frame;
pub mod material;
pub mod reflect;
pub mod texture;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        backend::{GpuDevice, PresentationSurface, VulkanError, VulkanResult},
        config::{Config, ConfigError, EngineConfig, FrameConfig, MaterialSystemConfig},
        frame::{FrameContext, FrameController, FrameState, FrameStatus},
        material::{
            MaterialDefinition, MaterialError, MaterialInstance, MaterialLayoutBuilder, MaterialResult,
            MaterialSystem,
        },
        reflect::{reflect, BindingDescriptor, BindingKind, ShaderReflection, ShaderStage},
        texture::{TextureError, TextureHandle, TextureRegistry},
    };
}
