//! Offscreen render passes.
//!
//! An [`OffscreenPass`] renders into one color target per swapchain image at
//! a fixed extent; a later pass samples target `i` while drawing into
//! swapchain image `i`. The render pass is created on first use and lives
//! until shutdown. The per-image arrays only change size when the swapchain
//! image count does, so a rebuild at an unchanged count touches nothing.

use ash::vk;
use tracing::{debug, info};

use vkinterop_rhi::{GpuContext, RenderPassBegin, RenderPassDesc};

use crate::error::{RendererError, RendererResult};
use crate::texture::{SAMPLED_LAYOUT, Texture};

/// Default color format of offscreen targets.
pub const OFFSCREEN_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Render pass description for an offscreen color target: cleared, stored,
/// left ready for sampling, with by-region dependencies against earlier and
/// later fragment-shader reads.
pub fn render_pass_desc(format: vk::Format) -> RenderPassDesc {
    RenderPassDesc {
        color_format: format,
        load_op: vk::AttachmentLoadOp::CLEAR,
        final_layout: SAMPLED_LAYOUT,
        dependencies: vec![
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                src_access_mask: vk::AccessFlags::SHADER_READ,
                dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::SHADER_READ,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
        ],
    }
}

#[derive(Debug)]
pub struct OffscreenPass {
    extent: vk::Extent2D,
    format: vk::Format,
    exportable: bool,
    render_pass: vk::RenderPass,
    targets: Vec<Texture>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl OffscreenPass {
    /// Describes the pass. No GPU work happens until the first resize.
    pub fn new(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
            format,
            exportable: false,
            render_pass: vk::RenderPass::null(),
            targets: Vec::new(),
            framebuffers: Vec::new(),
        }
    }

    /// Allocate future render targets with exportable memory.
    pub fn set_exportable(&mut self, exportable: bool) -> RendererResult<()> {
        if !self.targets.is_empty() {
            return Err(RendererError::Interop(
                "render targets already exist; export must be requested before the first build"
                    .to_string(),
            ));
        }
        self.exportable = exportable;
        Ok(())
    }

    #[inline]
    pub fn is_exportable(&self) -> bool {
        self.exportable
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.targets.len()
    }

    pub fn render_target(&self, image_index: usize) -> RendererResult<&Texture> {
        self.targets.get(image_index).ok_or_else(|| {
            RendererError::InvalidState(format!(
                "offscreen pass has {} render targets, asked for #{image_index}",
                self.targets.len()
            ))
        })
    }

    pub fn render_targets(&self) -> &[Texture] {
        &self.targets
    }

    pub fn framebuffer(&self, image_index: usize) -> RendererResult<vk::Framebuffer> {
        self.framebuffers.get(image_index).copied().ok_or_else(|| {
            RendererError::InvalidState(format!(
                "offscreen pass has {} framebuffers, asked for #{image_index}",
                self.framebuffers.len()
            ))
        })
    }

    /// Matches the per-image arrays to `image_count`, creating the render
    /// pass on first use. Shrinking destroys the highest indices first;
    /// growing appends. An unchanged count does nothing.
    pub fn recreate_swapchain_objects<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &G,
        image_count: usize,
    ) -> RendererResult<()> {
        if self.render_pass == vk::RenderPass::null() {
            self.render_pass = gpu.create_render_pass(&render_pass_desc(self.format))?;
            info!(
                width = self.extent.width,
                height = self.extent.height,
                format = ?self.format,
                "Offscreen render pass created"
            );
        }

        let current = self.targets.len();
        if current == image_count {
            return Ok(());
        }

        self.trim_swapchain_objects(gpu, image_count);
        while self.targets.len() < image_count {
            let target = Texture::render_target(gpu, self.extent, self.format, self.exportable)?;
            let framebuffer = match gpu.create_framebuffer(self.render_pass, target.view(), self.extent)
            {
                Ok(framebuffer) => framebuffer,
                Err(e) => {
                    target.destroy(gpu);
                    return Err(e.into());
                }
            };
            self.targets.push(target);
            self.framebuffers.push(framebuffer);
        }

        debug!(from = current, to = image_count, "Offscreen targets resized");
        Ok(())
    }

    /// Destroys the per-image objects at `image_count` and above, highest
    /// index first. Creates nothing, so a rebuild can run it during teardown.
    pub fn trim_swapchain_objects<G: GpuContext + ?Sized>(&mut self, gpu: &G, image_count: usize) {
        if self.targets.len() <= image_count {
            return;
        }
        let current = self.targets.len();
        while self.targets.len() > image_count {
            if let Some(framebuffer) = self.framebuffers.pop() {
                gpu.destroy_framebuffer(framebuffer);
            }
            if let Some(target) = self.targets.pop() {
                target.destroy(gpu);
            }
        }
        debug!(from = current, to = image_count, "Offscreen targets trimmed");
    }

    pub fn begin<G: GpuContext + ?Sized>(
        &self,
        gpu: &G,
        command_buffer: vk::CommandBuffer,
        image_index: usize,
        clear_color: [f32; 4],
    ) -> RendererResult<()> {
        let framebuffer = self.framebuffer(image_index)?;
        gpu.cmd_begin_render_pass(
            command_buffer,
            &RenderPassBegin {
                render_pass: self.render_pass,
                framebuffer,
                extent: self.extent,
                clear_color,
            },
        );
        Ok(())
    }

    pub fn end<G: GpuContext + ?Sized>(&self, gpu: &G, command_buffer: vk::CommandBuffer) {
        gpu.cmd_end_render_pass(command_buffer);
    }

    /// Destroys every per-image object and the render pass.
    pub fn destroy<G: GpuContext + ?Sized>(&mut self, gpu: &G) {
        for framebuffer in self.framebuffers.drain(..).rev() {
            gpu.destroy_framebuffer(framebuffer);
        }
        for target in self.targets.drain(..).rev() {
            target.destroy(gpu);
        }
        gpu.destroy_render_pass(self.render_pass);
        self.render_pass = vk::RenderPass::null();
    }
}
