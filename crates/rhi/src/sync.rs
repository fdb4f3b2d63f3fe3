//! Per-frame synchronization primitives.
//!
//! Each frame slot owns a [`FrameSync`]:
//!
//! - **image available** semaphore, signaled by swapchain acquisition and
//!   waited on by the color-attachment stage of the frame's submission
//! - **render finished** semaphore, signaled by the submission and waited on
//!   by presentation
//! - **in flight** fence, signaled when the submission completes; the CPU
//!   waits on it before reusing the slot
//!
//! # Example
//!
//! ```no_run
//! use vkinterop_rhi::GpuContext;
//! use vkinterop_rhi::sync::{FrameSync, timeout_ns};
//!
//! # fn example<G: GpuContext>(gpu: &G) -> Result<(), vkinterop_rhi::RhiError> {
//! let sync = FrameSync::new(gpu)?;
//! gpu.wait_for_fence(sync.in_flight_fence(), timeout_ns(None))?;
//! sync.destroy(gpu);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::gpu::GpuContext;

/// Synchronization objects for one frame slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSync {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

impl FrameSync {
    /// Creates the slot's semaphores and its fence. The fence starts signaled
    /// so the first wait on a fresh slot returns immediately.
    pub fn new<G: GpuContext + ?Sized>(gpu: &G) -> RhiResult<Self> {
        let image_available = gpu.create_semaphore()?;
        let render_finished = match gpu.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                gpu.destroy_semaphore(image_available);
                return Err(e);
            }
        };
        let in_flight = match gpu.create_fence(true) {
            Ok(fence) => fence,
            Err(e) => {
                gpu.destroy_semaphore(render_finished);
                gpu.destroy_semaphore(image_available);
                return Err(e);
            }
        };

        debug!("Created frame synchronization primitives");

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available
    }

    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished
    }

    #[inline]
    pub fn in_flight_fence(&self) -> vk::Fence {
        self.in_flight
    }

    /// Destroys all three objects. The fence must not be pending.
    pub fn destroy<G: GpuContext + ?Sized>(self, gpu: &G) {
        gpu.destroy_fence(self.in_flight);
        gpu.destroy_semaphore(self.render_finished);
        gpu.destroy_semaphore(self.image_available);
    }
}

/// Converts an optional wait limit to the nanosecond value Vulkan expects;
/// `None` waits forever.
pub fn timeout_ns(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
}
