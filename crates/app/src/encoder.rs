//! Stand-in video encoder for the `encode` scene.
//!
//! Logs every imported render target and counts how many frames were
//! encoded from each. When running on a real device it also takes ownership
//! of the exported handles and closes them when they are replaced.

use tracing::{debug, info, warn};

use vkinterop_renderer::{ExternalImage, ExternalImageConsumer, RendererError, RendererResult};
use vkinterop_rhi::ExternalMemoryHandle;

const SUMMARY_INTERVAL: u64 = 300;

pub struct LoggingEncoder {
    images: Vec<ExternalImage>,
    frames_per_image: Vec<u64>,
    encoded: u64,
    imports: u64,
    close_handles: bool,
}

impl LoggingEncoder {
    /// `close_handles` must only be set when the handles are real OS
    /// handles, never for the headless context's synthetic ones.
    pub fn new(close_handles: bool) -> Self {
        Self {
            images: Vec::new(),
            frames_per_image: Vec::new(),
            encoded: 0,
            imports: 0,
            close_handles,
        }
    }

    fn release_images(&mut self) {
        for image in self.images.drain(..) {
            if self.close_handles {
                close_handle(image.handle);
            }
        }
    }
}

impl ExternalImageConsumer for LoggingEncoder {
    fn register_external_image(&mut self, image: &ExternalImage) -> RendererResult<()> {
        if image.image_index == 0 {
            // A fresh import after a rebuild replaces the previous set.
            self.release_images();
            self.frames_per_image.clear();
            self.imports += 1;
        }
        if image.image_index != self.images.len() {
            return Err(RendererError::Interop(format!(
                "expected image {} next, got {}",
                self.images.len(),
                image.image_index
            )));
        }

        info!(
            image_index = image.image_index,
            handle = ?image.handle,
            width = image.width,
            height = image.height,
            size = image.allocation_size,
            format = ?image.format,
            import = self.imports,
            "Encoder imported render target"
        );
        self.images.push(*image);
        self.frames_per_image.push(0);
        Ok(())
    }

    fn encode_frame(&mut self, image_index: usize) -> RendererResult<()> {
        let count = self.frames_per_image.get_mut(image_index).ok_or_else(|| {
            RendererError::Interop(format!("encoder has no image {image_index}"))
        })?;
        *count += 1;
        self.encoded += 1;

        debug!(image_index, "Frame encoded");
        if self.encoded % SUMMARY_INTERVAL == 0 {
            info!(
                encoded = self.encoded,
                per_image = ?self.frames_per_image,
                "Encoder progress"
            );
        }
        Ok(())
    }
}

impl Drop for LoggingEncoder {
    fn drop(&mut self) {
        info!(
            encoded = self.encoded,
            imports = self.imports,
            per_image = ?self.frames_per_image,
            "Encoder finished"
        );
        self.release_images();
    }
}

#[cfg(unix)]
fn close_handle(handle: ExternalMemoryHandle) {
    use std::os::fd::{FromRawFd, OwnedFd};

    match handle {
        // SAFETY: vkGetMemoryFdKHR hands ownership of a fresh descriptor to
        // the caller, and the encoder is its only holder.
        ExternalMemoryHandle::Fd(fd) if fd >= 0 => drop(unsafe { OwnedFd::from_raw_fd(fd) }),
        other => warn!(handle = ?other, "Not closing unexpected handle"),
    }
}

#[cfg(not(unix))]
fn close_handle(handle: ExternalMemoryHandle) {
    // Closing NT handles needs the Win32 API, which this demo does not link.
    warn!(handle = ?handle, "Leaving exported handle open");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    fn image(image_index: usize) -> ExternalImage {
        ExternalImage {
            image_index,
            handle: ExternalMemoryHandle::Fd(100 + image_index as i32),
            width: 512,
            height: 512,
            allocation_size: 1 << 20,
            format: vk::Format::R8G8B8A8_UNORM,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    #[test]
    fn test_counts_frames_per_image() {
        let mut encoder = LoggingEncoder::new(false);
        for i in 0..3 {
            encoder.register_external_image(&image(i)).unwrap();
        }
        for i in [0, 1, 2, 0, 1, 0] {
            encoder.encode_frame(i).unwrap();
        }
        assert_eq!(encoder.frames_per_image, vec![3, 2, 1]);
        assert_eq!(encoder.encoded, 6);
    }

    #[test]
    fn test_reimport_replaces_images() {
        let mut encoder = LoggingEncoder::new(false);
        for i in 0..3 {
            encoder.register_external_image(&image(i)).unwrap();
        }
        for i in 0..2 {
            encoder.register_external_image(&image(i)).unwrap();
        }
        assert_eq!(encoder.images.len(), 2);
        assert_eq!(encoder.imports, 2);
        assert!(encoder.encode_frame(2).is_err());
    }

    #[test]
    fn test_out_of_order_registration_rejected() {
        let mut encoder = LoggingEncoder::new(false);
        encoder.register_external_image(&image(0)).unwrap();
        assert!(matches!(
            encoder.register_external_image(&image(2)),
            Err(RendererError::Interop(_))
        ));
    }
}
