//! Scene construction and pass recording.
//!
//! A [`Scene`] declares its long-lived objects once through a
//! [`SceneBuilder`] and records each swapchain image's command buffer
//! through a [`PassRecorder`] on every rebuild. Offscreen passes must be
//! recorded before the main pass, and the main pass exactly once.

use ash::vk;
use glam::Vec3;
use tracing::info;

use vkinterop_resources::DecodedImage;
use vkinterop_rhi::vertex::VertexFormat;
use vkinterop_rhi::{GpuContext, RenderPassBegin, RhiResult};

use crate::drawable::{Drawable, SampledSource};
use crate::error::{RendererError, RendererResult};
use crate::interop::{ExternalImageConsumer, ImageBridge};
use crate::mesh::{IndexElement, Mesh};
use crate::offscreen::OffscreenPass;
use crate::pipeline::{DescriptorLayoutKind, PassTarget, Pipeline, PipelineDesc};
use crate::registry::{DrawableId, MeshId, OffscreenId, PipelineId, ResourceRegistry, TextureId};
use crate::texture::Texture;

/// A renderable scene.
pub trait Scene {
    /// Creates meshes, textures, passes, pipelines and drawables.
    fn build_scene(&mut self, builder: &mut SceneBuilder<'_>) -> RendererResult<()>;

    /// Records one swapchain image's passes. The default records every
    /// offscreen pass in registration order, then the main pass.
    fn record_passes(&self, recorder: &mut PassRecorder<'_>) -> RendererResult<()> {
        recorder.record_offscreen_passes()?;
        recorder.record_main_pass()
    }
}

/// The two descriptor set layouts every pipeline chooses between.
#[derive(Debug)]
pub struct SetLayouts {
    uniform_only: vk::DescriptorSetLayout,
    uniform_and_sampler: vk::DescriptorSetLayout,
}

impl SetLayouts {
    pub fn new<G: GpuContext + ?Sized>(gpu: &G) -> RhiResult<Self> {
        let uniform_only =
            gpu.create_descriptor_set_layout(&DescriptorLayoutKind::UniformOnly.bindings())?;
        let uniform_and_sampler = match gpu
            .create_descriptor_set_layout(&DescriptorLayoutKind::UniformAndSampler.bindings())
        {
            Ok(layout) => layout,
            Err(e) => {
                gpu.destroy_descriptor_set_layout(uniform_only);
                return Err(e);
            }
        };
        Ok(Self {
            uniform_only,
            uniform_and_sampler,
        })
    }

    pub fn get(&self, kind: DescriptorLayoutKind) -> vk::DescriptorSetLayout {
        match kind {
            DescriptorLayoutKind::UniformOnly => self.uniform_only,
            DescriptorLayoutKind::UniformAndSampler => self.uniform_and_sampler,
        }
    }

    pub fn destroy<G: GpuContext + ?Sized>(&mut self, gpu: &G) {
        gpu.destroy_descriptor_set_layout(self.uniform_and_sampler);
        gpu.destroy_descriptor_set_layout(self.uniform_only);
        self.uniform_and_sampler = vk::DescriptorSetLayout::null();
        self.uniform_only = vk::DescriptorSetLayout::null();
    }
}

/// Registers a scene's objects with the renderer.
pub struct SceneBuilder<'a> {
    gpu: &'a dyn GpuContext,
    registry: &'a mut ResourceRegistry,
    set_layouts: &'a SetLayouts,
    bridge: &'a mut Option<ImageBridge>,
    extent: vk::Extent2D,
}

impl<'a> SceneBuilder<'a> {
    pub fn new(
        gpu: &'a dyn GpuContext,
        registry: &'a mut ResourceRegistry,
        set_layouts: &'a SetLayouts,
        bridge: &'a mut Option<ImageBridge>,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            gpu,
            registry,
            set_layouts,
            bridge,
            extent,
        }
    }

    /// Window extent at build time.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn add_mesh<V: VertexFormat, I: IndexElement>(
        &mut self,
        vertices: &[V],
        indices: &[I],
    ) -> RendererResult<MeshId> {
        let mesh = Mesh::new(self.gpu, vertices, indices)?;
        Ok(self.registry.meshes.insert(mesh))
    }

    pub fn add_texture(&mut self, pixels: &DecodedImage) -> RendererResult<TextureId> {
        let texture = Texture::from_pixels(self.gpu, pixels)?;
        Ok(self.registry.textures.insert(texture))
    }

    pub fn add_offscreen_pass(&mut self, width: u32, height: u32, format: vk::Format) -> OffscreenId {
        self.registry
            .offscreen_passes
            .insert(OffscreenPass::new(width, height, format))
    }

    pub fn add_pipeline(&mut self, desc: &PipelineDesc) -> RendererResult<PipelineId> {
        if let PassTarget::Offscreen(id) = desc.target {
            self.registry.offscreen_pass(id)?;
        }
        let set_layout = self.set_layouts.get(desc.layout_kind);
        let gpu = self.gpu;
        self.registry
            .pipelines
            .try_insert_with(|id| Pipeline::init(gpu, id, desc, set_layout))
    }

    /// Creates a drawable bound to `mesh` and at most one sampled source.
    pub fn add_drawable(
        &mut self,
        position: Vec3,
        rotation_speed: f32,
        mesh: MeshId,
        texture: Option<TextureId>,
        offscreen: Option<OffscreenId>,
    ) -> RendererResult<DrawableId> {
        let source = SampledSource::from_options(texture, offscreen)?;
        self.registry.mesh(mesh)?;
        match source {
            SampledSource::Texture(id) => {
                self.registry.texture(id)?;
            }
            SampledSource::Offscreen(id) => {
                self.registry.offscreen_pass(id)?;
            }
            SampledSource::None => {}
        }

        let mut drawable = Drawable::new(position, rotation_speed);
        drawable.init(mesh, source)?;
        Ok(self.registry.drawables.insert(drawable))
    }

    pub fn add_draw_object(&mut self, pipeline: PipelineId, drawable: DrawableId) -> RendererResult<()> {
        self.registry.add_draw_object(pipeline, drawable)
    }

    /// Shares the render targets of `offscreen` with `consumer`. Must run
    /// before the first build so the targets get exportable memory.
    pub fn attach_image_bridge(
        &mut self,
        offscreen: OffscreenId,
        consumer: Box<dyn ExternalImageConsumer>,
    ) -> RendererResult<()> {
        if self.bridge.is_some() {
            return Err(RendererError::Interop(
                "an image bridge is already attached".to_string(),
            ));
        }
        self.registry
            .offscreen_passes
            .get_mut(offscreen)?
            .set_exportable(true)?;
        *self.bridge = Some(ImageBridge::new(offscreen, consumer));
        info!(%offscreen, "Image bridge attached");
        Ok(())
    }
}

/// Clear colors of the main and offscreen passes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearColors {
    pub main: [f32; 4],
    pub offscreen: [f32; 4],
}

/// The swapchain pass instance one command buffer draws into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MainPassTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

/// Records the passes of one swapchain image into one command buffer.
pub struct PassRecorder<'a> {
    gpu: &'a dyn GpuContext,
    registry: &'a ResourceRegistry,
    command_buffer: vk::CommandBuffer,
    image_index: usize,
    main: MainPassTarget,
    clear: ClearColors,
    main_recorded: bool,
}

impl<'a> PassRecorder<'a> {
    pub fn new(
        gpu: &'a dyn GpuContext,
        registry: &'a ResourceRegistry,
        command_buffer: vk::CommandBuffer,
        image_index: usize,
        main: MainPassTarget,
        clear: ClearColors,
    ) -> Self {
        Self {
            gpu,
            registry,
            command_buffer,
            image_index,
            main,
            clear,
            main_recorded: false,
        }
    }

    #[inline]
    pub fn image_index(&self) -> usize {
        self.image_index
    }

    /// Records `id` and every pipeline targeting it, in registration order.
    pub fn record_offscreen_pass(&mut self, id: OffscreenId) -> RendererResult<()> {
        if self.main_recorded {
            return Err(RendererError::PassOrder(format!(
                "{id} recorded after the main pass"
            )));
        }
        let pass = self.registry.offscreen_pass(id)?;
        pass.begin(self.gpu, self.command_buffer, self.image_index, self.clear.offscreen)?;
        self.draw_pipelines(PassTarget::Offscreen(id))?;
        pass.end(self.gpu, self.command_buffer);
        Ok(())
    }

    pub fn record_offscreen_passes(&mut self) -> RendererResult<()> {
        for id in self.registry.offscreen_passes.ids() {
            self.record_offscreen_pass(id)?;
        }
        Ok(())
    }

    pub fn record_main_pass(&mut self) -> RendererResult<()> {
        if self.main_recorded {
            return Err(RendererError::PassOrder(
                "main pass recorded twice".to_string(),
            ));
        }
        self.gpu.cmd_begin_render_pass(
            self.command_buffer,
            &RenderPassBegin {
                render_pass: self.main.render_pass,
                framebuffer: self.main.framebuffer,
                extent: self.main.extent,
                clear_color: self.clear.main,
            },
        );
        self.draw_pipelines(PassTarget::Main)?;
        self.gpu.cmd_end_render_pass(self.command_buffer);
        self.main_recorded = true;
        Ok(())
    }

    /// Fails unless the main pass was recorded.
    pub fn finish(self) -> RendererResult<()> {
        if self.main_recorded {
            Ok(())
        } else {
            Err(RendererError::PassOrder(format!(
                "command buffer for image {} has no main pass",
                self.image_index
            )))
        }
    }

    fn draw_pipelines(&self, target: PassTarget) -> RendererResult<()> {
        for (_, pipeline) in self.registry.pipelines.iter() {
            if pipeline.target() == target {
                pipeline.draw_to_command_buffer(
                    self.gpu,
                    self.command_buffer,
                    self.image_index,
                    self.registry,
                )?;
            }
        }
        Ok(())
    }
}
