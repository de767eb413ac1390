//! Sampled textures: registry and upload planning

pub mod registry;
pub mod upload;

pub use registry::{Texture, TextureError, TextureHandle, TextureRegistry};
pub use upload::{build_upload_plan, format_for_channels, mip_level_count};
