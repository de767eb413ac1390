//! Frames in flight and swapchain lifecycle
//!
//! - [`controller`]: the `begin_frame` / `end_frame` loop and resize state machine
//! - [`swapchain`]: parameter selection and per-image views and semaphores
//! - [`slot`]: command pool, command buffer, acquire semaphore and fence per frame
//! - [`target`]: optional offscreen image recreated with the swapchain

pub mod controller;
pub mod slot;
pub mod swapchain;
pub mod target;

pub use controller::{FrameContext, FrameController, FrameState, FrameStatus};
pub use slot::FrameSlot;
pub use swapchain::{SurfaceLimits, SwapchainState};
pub use target::RenderTarget;
