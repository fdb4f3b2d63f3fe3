//! Frames in flight.
//!
//! The [`FrameScheduler`] keeps one [`FrameSync`] per frame slot and cycles
//! through them. A slot moves `Idle -> Acquiring -> Submitted -> Presenting`
//! and back to `Idle` when the scheduler advances.
//!
//! ```text
//! 1. wait on the slot's in-flight fence
//! 2. acquire an image (signals image-available)
//! 3. if another slot's fence last rendered into that image, wait on it too
//! 4. record the slot's fence as the image's owner
//! 5. reset the fence and submit (waits image-available, signals
//!    render-finished and the fence)
//! 6. present (waits render-finished)
//! 7. advance to the next slot
//! ```
//!
//! Step 3 matters whenever there are more slots than swapchain images, or
//! the presentation engine hands images back out of order.

use ash::vk::{self, Handle};
use tracing::{error, trace};

use vkinterop_rhi::sync::FrameSync;
use vkinterop_rhi::{AcquireOutcome, FrameSubmit, GpuContext, PresentOutcome, RhiError};

use crate::error::{RendererError, RendererResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotState {
    #[default]
    Idle,
    Acquiring,
    Submitted,
    Presenting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquiredFrame {
    Ready { image_index: usize, suboptimal: bool },
    /// The swapchain must be rebuilt before anything can be drawn. The slot
    /// does not advance.
    OutOfDate,
}

pub struct FrameScheduler {
    slots: Vec<FrameSync>,
    states: Vec<SlotState>,
    current: usize,
    /// Fence of the slot that last submitted work for each swapchain image
    images_in_flight: Vec<Option<vk::Fence>>,
    timeout_ns: u64,
}

impl FrameScheduler {
    pub fn new<G: GpuContext + ?Sized>(
        gpu: &G,
        frames_in_flight: usize,
        timeout_ns: u64,
    ) -> RendererResult<Self> {
        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            match FrameSync::new(gpu) {
                Ok(sync) => slots.push(sync),
                Err(e) => {
                    for sync in slots {
                        sync.destroy(gpu);
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(Self {
            states: vec![SlotState::Idle; frames_in_flight],
            slots,
            current: 0,
            images_in_flight: Vec::new(),
            timeout_ns,
        })
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.states.get(slot).copied()
    }

    /// Owner fences per swapchain image.
    pub fn images_in_flight(&self) -> &[Option<vk::Fence>] {
        &self.images_in_flight
    }

    pub fn in_flight_fences(&self) -> Vec<vk::Fence> {
        self.slots.iter().map(FrameSync::in_flight_fence).collect()
    }

    /// Forgets image ownership after a rebuild produced `image_count` images.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight = vec![None; image_count];
    }

    /// Waits for the current slot, then acquires the next swapchain image.
    pub fn acquire<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &G,
        swapchain: vk::SwapchainKHR,
    ) -> RendererResult<AcquiredFrame> {
        let slot = self.current;
        let sync = self.sync()?;
        self.states[slot] = SlotState::Acquiring;

        let fence = sync.in_flight_fence();
        self.wait_owned(gpu, fence, slot)?;

        let (image_index, suboptimal) =
            match gpu.acquire_next_image(swapchain, sync.image_available(), self.timeout_ns)? {
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal,
                } => (image_index as usize, suboptimal),
                AcquireOutcome::OutOfDate => {
                    self.states[slot] = SlotState::Idle;
                    trace!(slot, "Acquire reported out of date");
                    return Ok(AcquiredFrame::OutOfDate);
                }
            };

        let owner = self
            .images_in_flight
            .get(image_index)
            .copied()
            .ok_or_else(|| {
                RendererError::InvalidState(format!(
                    "acquired image {image_index} but only {} are tracked",
                    self.images_in_flight.len()
                ))
            })?;
        if let Some(owner) = owner
            && owner != fence
        {
            let owner_slot = self
                .slots
                .iter()
                .position(|s| s.in_flight_fence() == owner)
                .unwrap_or(usize::MAX);
            trace!(image_index, slot, owner_slot, "Image still in flight");
            self.wait_owned(gpu, owner, owner_slot)?;
        }
        self.images_in_flight[image_index] = Some(fence);

        trace!(slot, image_index, suboptimal, "Image acquired");
        Ok(AcquiredFrame::Ready {
            image_index,
            suboptimal,
        })
    }

    /// Resets the slot fence and submits `command_buffer`.
    pub fn submit<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &G,
        command_buffer: vk::CommandBuffer,
    ) -> RendererResult<()> {
        let sync = self.sync()?;
        gpu.reset_fence(sync.in_flight_fence())?;
        gpu.queue_submit(&FrameSubmit {
            command_buffer,
            wait_semaphore: sync.image_available(),
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: sync.render_finished(),
            fence: sync.in_flight_fence(),
        })?;
        self.states[self.current] = SlotState::Submitted;
        Ok(())
    }

    pub fn present<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &G,
        swapchain: vk::SwapchainKHR,
        image_index: usize,
    ) -> RendererResult<PresentOutcome> {
        let sync = self.sync()?;
        self.states[self.current] = SlotState::Presenting;
        let outcome = gpu.queue_present(swapchain, image_index as u32, sync.render_finished())?;
        trace!(slot = self.current, image_index, ?outcome, "Presented");
        Ok(outcome)
    }

    /// Returns the finished slot to idle and moves to the next one.
    pub fn advance(&mut self) {
        if let Some(state) = self.states.get_mut(self.current) {
            *state = SlotState::Idle;
        }
        self.current = (self.current + 1) % self.slots.len().max(1);
    }

    /// Destroys every slot's objects. Their fences must not be pending.
    pub fn destroy<G: GpuContext + ?Sized>(&mut self, gpu: &G) {
        for sync in self.slots.drain(..) {
            sync.destroy(gpu);
        }
        self.states.clear();
        self.images_in_flight.clear();
        self.current = 0;
    }

    fn sync(&self) -> RendererResult<FrameSync> {
        self.slots.get(self.current).copied().ok_or_else(|| {
            RendererError::InvalidState("frame scheduler has no slots".to_string())
        })
    }

    fn wait_owned<G: GpuContext + ?Sized>(
        &self,
        gpu: &G,
        fence: vk::Fence,
        slot: usize,
    ) -> RendererResult<()> {
        gpu.wait_for_fence(fence, self.timeout_ns).map_err(|e| match e {
            RhiError::Timeout { timeout_ns, .. } => {
                error!(
                    slot,
                    fence = format_args!("{:#x}", fence.as_raw()),
                    timeout_ns,
                    "In-flight fence did not signal"
                );
                RhiError::Timeout {
                    what: format!("in-flight fence {:#x} of frame slot {slot}", fence.as_raw()),
                    timeout_ns,
                }
                .into()
            }
            other => other.into(),
        })
    }
}
