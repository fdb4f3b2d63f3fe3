//! Cross-API image sharing.
//!
//! The [`ImageBridge`] exports the memory behind each render target of one
//! offscreen pass as an OS handle and hands it to an
//! [`ExternalImageConsumer`], typically a video encoder running on another
//! API. Targets are re-exported after every swapchain rebuild, and the
//! consumer is told which image to encode after every submit.
//!
//! No queue-family ownership transfer or layout transition is performed on
//! the consumer's behalf. Images stay in `SHADER_READ_ONLY_OPTIMAL` and the
//! consumer synchronizes on its own side.

use ash::vk;
use tracing::{debug, warn};

use vkinterop_rhi::{ExternalMemoryHandle, GpuContext};

use crate::error::{RendererError, RendererResult};
use crate::offscreen::OffscreenPass;
use crate::registry::OffscreenId;
use crate::texture::SAMPLED_LAYOUT;

/// One render target as seen from the importing API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExternalImage {
    pub image_index: usize,
    pub handle: ExternalMemoryHandle,
    pub width: u32,
    pub height: u32,
    pub allocation_size: vk::DeviceSize,
    pub format: vk::Format,
    pub layout: vk::ImageLayout,
}

/// Receives exported render targets and per-frame encode requests.
pub trait ExternalImageConsumer {
    /// Called once per render target after every rebuild. The consumer owns
    /// `image.handle` from here on.
    fn register_external_image(&mut self, image: &ExternalImage) -> RendererResult<()>;

    /// Called after the frame that rendered into target `image_index` has
    /// been submitted.
    fn encode_frame(&mut self, image_index: usize) -> RendererResult<()>;
}

pub struct ImageBridge {
    offscreen: OffscreenId,
    consumer: Box<dyn ExternalImageConsumer>,
    imported: usize,
    warned: bool,
}

impl ImageBridge {
    pub fn new(offscreen: OffscreenId, consumer: Box<dyn ExternalImageConsumer>) -> Self {
        Self {
            offscreen,
            consumer,
            imported: 0,
            warned: false,
        }
    }

    #[inline]
    pub fn offscreen(&self) -> OffscreenId {
        self.offscreen
    }

    /// Render targets registered by the latest import.
    #[inline]
    pub fn imported(&self) -> usize {
        self.imported
    }

    /// Exports every render target of `pass` and registers it with the
    /// consumer. Returns how many were registered.
    pub fn import_render_targets<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &G,
        pass: &OffscreenPass,
    ) -> RendererResult<usize> {
        if !pass.is_exportable() {
            return Err(RendererError::Interop(format!(
                "{} does not allocate exportable memory",
                self.offscreen
            )));
        }
        if !self.warned {
            warn!(
                "Shared render targets stay in SHADER_READ_ONLY_OPTIMAL with no ownership \
                 transfer; the consumer must synchronize access itself"
            );
            self.warned = true;
        }

        for (image_index, target) in pass.render_targets().iter().enumerate() {
            let handle = gpu.export_memory_handle(target.memory())?;
            let extent = target.extent();
            self.consumer.register_external_image(&ExternalImage {
                image_index,
                handle,
                width: extent.width,
                height: extent.height,
                allocation_size: target.allocation_size(),
                format: target.format(),
                layout: SAMPLED_LAYOUT,
            })?;
        }
        self.imported = pass.image_count();

        debug!(count = self.imported, "Render targets imported into consumer");
        Ok(self.imported)
    }

    pub fn encode(&mut self, image_index: usize) -> RendererResult<()> {
        if image_index >= self.imported {
            return Err(RendererError::Interop(format!(
                "image {image_index} was never imported ({} imported)",
                self.imported
            )));
        }
        self.consumer.encode_frame(image_index)
    }
}
