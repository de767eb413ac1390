//! Frame pacing and swapchain recreation
//!
//! [`FrameController`] owns the frames in flight and everything that depends
//! on the swapchain. Callers drive it with `begin_frame` / `end_frame` and
//! record their own commands in between:
//!
//! ```text
//! loop {
//!     match controller.begin_frame()? {
//!         FrameStatus::Ready(frame) => {
//!             record(frame.command_buffer, frame.image_index);
//!             controller.end_frame()?;
//!         }
//!         FrameStatus::Skipped => continue,
//!     }
//! }
//! ```
//!
//! Surface changes never surface as errors. An out-of-date acquire skips the
//! frame, an out-of-date or suboptimal present is absorbed, and the rebuild
//! runs synchronously at the start of the next frame.

use std::sync::Arc;

use ash::vk;
use log::{info, trace, warn};

use super::slot::FrameSlot;
use super::swapchain::SwapchainState;
use super::target::RenderTarget;
use crate::backend::{
    AcquireOutcome, FrameSubmission, GpuDevice, PresentOutcome, PresentationSurface, VulkanError,
    VulkanResult,
};
use crate::config::FrameConfig;

/// Lifecycle state of the swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Frames are produced normally
    Running,
    /// The surface changed size; rebuild before the next frame
    Resizing,
    /// Presentation reported the swapchain out of date; rebuild before the next frame
    OutOfDate,
}

/// Everything draw code needs to record one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    /// Command buffer in the recording state
    pub command_buffer: vk::CommandBuffer,
    /// Index of the acquired swapchain image
    pub image_index: u32,
    /// Index of the frame slot in use
    pub slot_index: usize,
    /// Acquired swapchain image
    pub image: vk::Image,
    /// View of the acquired image
    pub image_view: vk::ImageView,
    /// Swapchain extent
    pub extent: vk::Extent2D,
    /// Offscreen image and view, when configured
    pub render_target: Option<(vk::Image, vk::ImageView)>,
}

/// Outcome of [`FrameController::begin_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame is ready for recording
    Ready(FrameContext),
    /// The swapchain went out of date; nothing to record this time
    Skipped,
}

/// Frames in flight plus swapchain-dependent resources
pub struct FrameController<S: PresentationSurface> {
    device: Arc<dyn GpuDevice>,
    surface: S,
    offscreen_format: Option<vk::Format>,
    prefer_mailbox: bool,
    slots: Vec<FrameSlot>,
    current_slot: usize,
    swapchain: Option<SwapchainState>,
    render_target: Option<RenderTarget>,
    state: FrameState,
    rebuild_pending: bool,
    rebuild_count: u64,
    active_image: Option<u32>,
}

impl<S: PresentationSurface> FrameController<S> {
    /// Create the frame slots and the initial swapchain
    ///
    /// Blocks on window events while the framebuffer has a zero extent.
    pub fn new(device: Arc<dyn GpuDevice>, surface: S, config: &FrameConfig) -> VulkanResult<Self> {
        if config.frames_in_flight == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "at least one frame in flight is required".to_string(),
            });
        }

        let mut controller = Self {
            device,
            surface,
            offscreen_format: config.offscreen_target.map(|format| format.to_vk()),
            prefer_mailbox: config.prefer_mailbox,
            slots: Vec::with_capacity(config.frames_in_flight),
            current_slot: 0,
            swapchain: None,
            render_target: None,
            state: FrameState::Running,
            rebuild_pending: false,
            rebuild_count: 0,
            active_image: None,
        };

        // Partially built controllers are cleaned up by Drop
        for _ in 0..config.frames_in_flight {
            let slot = FrameSlot::create(controller.device.as_ref())?;
            controller.slots.push(slot);
        }
        let extent = controller.wait_for_usable_extent();
        controller.create_swapchain_resources(extent)?;

        info!(
            "Frame controller ready: {} frames in flight, {}x{}",
            controller.slots.len(),
            extent.width,
            extent.height
        );
        Ok(controller)
    }

    /// Current lifecycle state
    pub const fn state(&self) -> FrameState {
        self.state
    }

    /// Number of completed rebuilds; changes whenever swapchain-sized
    /// resources (image views, the render target) are replaced
    pub const fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    /// Number of frames in flight
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Frame slots in order
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Live swapchain state
    pub const fn swapchain(&self) -> Option<&SwapchainState> {
        self.swapchain.as_ref()
    }

    /// Offscreen target, if configured
    pub const fn render_target(&self) -> Option<&RenderTarget> {
        self.render_target.as_ref()
    }

    /// Presentation surface
    pub const fn surface(&self) -> &S {
        &self.surface
    }

    /// Presentation surface, mutably
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Window-system resize notification
    pub fn notify_resized(&mut self) {
        if self.state == FrameState::Running {
            trace!("Resize notified");
            self.state = FrameState::Resizing;
        }
    }

    /// Wait for this slot's previous submission, acquire an image and start
    /// recording
    pub fn begin_frame(&mut self) -> VulkanResult<FrameStatus> {
        if self.active_image.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "begin_frame called while a frame is being recorded".to_string(),
            });
        }
        if self.state != FrameState::Running || self.rebuild_pending {
            self.rebuild()?;
        }

        let slot = self.slots[self.current_slot];
        self.device.wait_for_fence(slot.submit_fence)?;

        let swapchain = self.swapchain.as_ref().ok_or_else(missing_swapchain)?;
        let outcome = self
            .surface
            .acquire_next_image(swapchain.handle(), slot.acquire_semaphore)?;

        let (image_index, suboptimal) = match outcome {
            AcquireOutcome::OutOfDate => {
                trace!("Acquire out of date, skipping frame");
                self.state = FrameState::Resizing;
                return Ok(FrameStatus::Skipped);
            }
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
        };
        if suboptimal {
            trace!("Acquire suboptimal, rebuild deferred");
            self.rebuild_pending = true;
        }

        let index = image_index as usize;
        let (Some(&image), Some(&image_view)) = (swapchain.images().get(index), swapchain.image_views().get(index))
        else {
            return Err(VulkanError::InvalidOperation {
                reason: format!("acquired image index {image_index} out of range"),
            });
        };
        let extent = swapchain.extent();

        // Only reset once an image is guaranteed to be submitted this frame
        self.device.reset_fence(slot.submit_fence)?;
        if let Err(err) = self.device.begin_command_buffer(slot.command_buffer) {
            self.restore_slot_fence();
            return Err(err);
        }
        self.active_image = Some(image_index);

        Ok(FrameStatus::Ready(FrameContext {
            command_buffer: slot.command_buffer,
            image_index,
            slot_index: self.current_slot,
            image,
            image_view,
            extent,
            render_target: self.render_target.as_ref().map(|t| (t.image(), t.view())),
        }))
    }

    /// Finish recording, submit, present and advance to the next slot
    ///
    /// If the submission does not happen, the slot gets a new signaled fence
    /// so the next `begin_frame` on it does not wait forever.
    pub fn end_frame(&mut self) -> VulkanResult<()> {
        let image_index = self.active_image.take().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "end_frame called without begin_frame".to_string(),
        })?;
        let present_semaphore = match self.submit_frame(image_index) {
            Ok(semaphore) => semaphore,
            Err(err) => {
                warn!("Frame submission failed: {}", err);
                self.restore_slot_fence();
                return Err(err);
            }
        };

        let swapchain = self.swapchain.as_ref().ok_or_else(missing_swapchain)?;
        match self.surface.present(swapchain.handle(), image_index, present_semaphore)? {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal => {
                trace!("Present suboptimal, rebuild deferred");
                self.rebuild_pending = true;
            }
            PresentOutcome::OutOfDate => {
                trace!("Present out of date");
                self.state = FrameState::OutOfDate;
            }
        }

        self.current_slot = (self.current_slot + 1) % self.slots.len();
        Ok(())
    }

    fn submit_frame(&self, image_index: u32) -> VulkanResult<vk::Semaphore> {
        let slot = self.slots[self.current_slot];
        self.device.end_command_buffer(slot.command_buffer)?;

        let present_semaphore = self
            .swapchain
            .as_ref()
            .and_then(|swapchain| swapchain.present_semaphores().get(image_index as usize))
            .copied()
            .ok_or_else(missing_swapchain)?;

        self.device.submit(&FrameSubmission {
            command_buffer: slot.command_buffer,
            wait_semaphore: slot.acquire_semaphore,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: present_semaphore,
            fence: slot.submit_fence,
        })?;
        Ok(present_semaphore)
    }

    /// Swap the current slot's reset fence for a new signaled one
    fn restore_slot_fence(&mut self) {
        let slot = &mut self.slots[self.current_slot];
        match self.device.create_fence(true) {
            Ok(fence) => {
                self.device.destroy_fence(slot.submit_fence);
                slot.submit_fence = fence;
            }
            Err(err) => warn!("Could not replace the fence of frame slot {}: {}", self.current_slot, err),
        }
    }

    /// Recreate the swapchain and everything sized to it
    ///
    /// Waits for a non-zero framebuffer and for the device to go idle. Frame
    /// slots are left untouched.
    pub fn rebuild(&mut self) -> VulkanResult<()> {
        if self.active_image.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "rebuild requested while a frame is being recorded".to_string(),
            });
        }
        let extent = self.wait_for_usable_extent();
        self.device.wait_idle()?;

        self.destroy_swapchain_resources();
        self.create_swapchain_resources(extent)?;

        self.state = FrameState::Running;
        self.rebuild_pending = false;
        self.rebuild_count += 1;
        info!(
            "Swapchain rebuilt at {}x{} (rebuild {})",
            extent.width, extent.height, self.rebuild_count
        );
        Ok(())
    }

    fn wait_for_usable_extent(&mut self) -> vk::Extent2D {
        let mut extent = self.surface.framebuffer_extent();
        while extent.width == 0 || extent.height == 0 {
            self.surface.wait_for_events();
            extent = self.surface.framebuffer_extent();
        }
        extent
    }

    fn create_swapchain_resources(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        let swapchain =
            SwapchainState::create(self.device.as_ref(), &mut self.surface, extent, self.prefer_mailbox)?;
        let extent = swapchain.extent();
        self.swapchain = Some(swapchain);

        if let Some(format) = self.offscreen_format {
            self.render_target = Some(RenderTarget::create(self.device.as_ref(), format, extent)?);
        }
        Ok(())
    }

    fn destroy_swapchain_resources(&mut self) {
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy(self.device.as_ref(), &mut self.surface);
        }
        if let Some(target) = self.render_target.take() {
            target.destroy(self.device.as_ref());
        }
    }
}

impl<S: PresentationSurface> Drop for FrameController<S> {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            warn!("wait_idle failed while destroying frame controller: {err}");
        }
        self.destroy_swapchain_resources();
        for slot in self.slots.drain(..) {
            slot.destroy(self.device.as_ref());
        }
    }
}

fn missing_swapchain() -> VulkanError {
    VulkanError::InvalidOperation {
        reason: "no live swapchain".to_string(),
    }
}
