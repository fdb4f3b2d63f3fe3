//! Sampled images.
//!
//! A [`Texture`] bundles an image, its memory, a view and a sampler. There
//! are two flavors:
//!
//! - **static**, uploaded once from decoded RGBA8 pixels and sampled only
//! - **render target**, a color attachment that a later pass samples; one
//!   exists per swapchain image index inside an offscreen pass

use ash::vk;
use tracing::debug;

use vkinterop_resources::DecodedImage;
use vkinterop_rhi::descriptor::DescriptorWrite;
use vkinterop_rhi::factory::{self, ImageAllocation};
use vkinterop_rhi::{GpuContext, ImageDesc, RhiResult};

use crate::error::RendererResult;

/// Format static textures are uploaded in.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Layout every texture is in whenever a shader samples it.
pub const SAMPLED_LAYOUT: vk::ImageLayout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

#[derive(Debug)]
pub struct Texture {
    allocation: ImageAllocation,
    view: vk::ImageView,
    sampler: vk::Sampler,
}

impl Texture {
    /// Uploads decoded pixels and leaves the image ready for sampling.
    ///
    /// Pixels whose length does not match their dimensions are rejected
    /// before any GPU object is created.
    pub fn from_pixels<G: GpuContext + ?Sized>(
        gpu: &G,
        pixels: &DecodedImage,
    ) -> RendererResult<Self> {
        pixels.validate()?;
        let extent = vk::Extent2D {
            width: pixels.width,
            height: pixels.height,
        };
        let staging = factory::create_staging_buffer(gpu, &pixels.pixels)?;

        let desc = ImageDesc::new(
            extent,
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        );
        let allocation = match factory::create_image(gpu, &desc) {
            Ok(allocation) => allocation,
            Err(e) => {
                factory::destroy_buffer(gpu, staging);
                return Err(e.into());
            }
        };

        let upload = factory::transition_image_layout(
            gpu,
            allocation.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .and_then(|()| factory::copy_buffer_to_image(gpu, staging.buffer, allocation.image, extent))
        .and_then(|()| {
            factory::transition_image_layout(
                gpu,
                allocation.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                SAMPLED_LAYOUT,
            )
        });
        factory::destroy_buffer(gpu, staging);
        if let Err(e) = upload {
            factory::destroy_image(gpu, allocation);
            return Err(e.into());
        }

        let texture = Self::with_view_and_sampler(gpu, allocation)?;
        debug!(
            width = extent.width,
            height = extent.height,
            "Static texture uploaded"
        );
        Ok(texture)
    }

    /// Creates a color attachment that can also be sampled. `exportable`
    /// allocates memory another API can import.
    pub fn render_target<G: GpuContext + ?Sized>(
        gpu: &G,
        extent: vk::Extent2D,
        format: vk::Format,
        exportable: bool,
    ) -> RhiResult<Self> {
        let desc = ImageDesc::new(
            extent,
            format,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )
        .exportable(exportable);
        let allocation = factory::create_image(gpu, &desc)?;
        Self::with_view_and_sampler(gpu, allocation)
    }

    fn with_view_and_sampler<G: GpuContext + ?Sized>(
        gpu: &G,
        allocation: ImageAllocation,
    ) -> RhiResult<Self> {
        let view = match factory::create_image_view(gpu, allocation.image, allocation.format) {
            Ok(view) => view,
            Err(e) => {
                factory::destroy_image(gpu, allocation);
                return Err(e);
            }
        };
        let sampler = match gpu.create_sampler() {
            Ok(sampler) => sampler,
            Err(e) => {
                gpu.destroy_image_view(view);
                factory::destroy_image(gpu, allocation);
                return Err(e);
            }
        };
        Ok(Self {
            allocation,
            view,
            sampler,
        })
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.allocation.image
    }

    #[inline]
    pub fn memory(&self) -> vk::DeviceMemory {
        self.allocation.memory
    }

    #[inline]
    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.allocation.size
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.allocation.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.allocation.format
    }

    #[inline]
    pub fn is_exportable(&self) -> bool {
        self.allocation.exportable
    }

    /// Combined image sampler write for `binding`.
    pub fn descriptor_write(&self, binding: u32) -> DescriptorWrite {
        DescriptorWrite::CombinedImageSampler {
            binding,
            view: self.view,
            sampler: self.sampler,
            layout: SAMPLED_LAYOUT,
        }
    }

    pub fn destroy<G: GpuContext + ?Sized>(self, gpu: &G) {
        gpu.destroy_sampler(self.sampler);
        gpu.destroy_image_view(self.view);
        factory::destroy_image(gpu, self.allocation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RendererError;
    use vkinterop_resources::{ResourceError, checkerboard};
    use vkinterop_rhi::{GpuEvent, HeadlessContext};

    #[test]
    fn test_static_texture_upload_sequence() {
        let gpu = HeadlessContext::default();
        let pixels = checkerboard(8, 2, [255; 4], [0, 0, 0, 255]);
        let texture = Texture::from_pixels(&gpu, &pixels).unwrap();

        let layouts: Vec<_> = gpu
            .events()
            .into_iter()
            .filter_map(|e| match e {
                GpuEvent::ImageBarrier {
                    old_layout,
                    new_layout,
                    ..
                } => Some((old_layout, new_layout)),
                GpuEvent::CopyBufferToImage { .. } => {
                    Some((vk::ImageLayout::UNDEFINED, vk::ImageLayout::UNDEFINED))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            layouts,
            vec![
                (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
                // the copy sits between the two transitions
                (vk::ImageLayout::UNDEFINED, vk::ImageLayout::UNDEFINED),
                (vk::ImageLayout::TRANSFER_DST_OPTIMAL, SAMPLED_LAYOUT),
            ]
        );
        assert_eq!(texture.extent(), vk::Extent2D { width: 8, height: 8 });
        assert!(!texture.is_exportable());

        texture.destroy(&gpu);
        assert!(gpu.live_objects().is_empty());
    }

    #[test]
    fn test_mismatched_pixels_rejected_before_upload() {
        let gpu = HeadlessContext::default();
        let mut pixels = checkerboard(8, 2, [255; 4], [0, 0, 0, 255]);
        pixels.height = 16;

        assert!(matches!(
            Texture::from_pixels(&gpu, &pixels),
            Err(RendererError::Resource(ResourceError::InvalidDimensions {
                width: 8,
                height: 16
            }))
        ));
        assert!(gpu.events().is_empty());
    }

    #[test]
    fn test_render_target_descriptor_write() {
        let gpu = HeadlessContext::default();
        let target = Texture::render_target(
            &gpu,
            vk::Extent2D {
                width: 64,
                height: 32,
            },
            vk::Format::R8G8B8A8_UNORM,
            true,
        )
        .unwrap();

        assert!(target.is_exportable());
        assert_eq!(
            target.descriptor_write(1),
            DescriptorWrite::CombinedImageSampler {
                binding: 1,
                view: target.view(),
                sampler: target.sampler(),
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }
        );

        target.destroy(&gpu);
        assert!(gpu.live_objects().is_empty());
    }
}
