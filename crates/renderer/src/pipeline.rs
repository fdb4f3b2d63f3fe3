//! Graphics pipelines and their draw lists.
//!
//! A [`Pipeline`] owns its shader modules for the application lifetime and
//! rebuilds its `vk::Pipeline` and layout on every swapchain rebuild. It
//! also owns the order in which its drawables are drawn: insertion order,
//! preserved across rebuilds.

use ash::vk;
use tracing::{debug, info};

use vkinterop_rhi::GpuContext;
use vkinterop_rhi::descriptor::DescriptorBinding;
use vkinterop_rhi::pipeline::{
    ColorBlendAttachment, CullMode, FrontFace, GraphicsPipelineBuilder, PrimitiveTopology,
};
use vkinterop_rhi::vertex::{VertexFormat, VertexLayout};

use crate::drawable::{Drawable, SAMPLER_BINDING, SourceLookup, UNIFORM_BINDING};
use crate::error::{RendererError, RendererResult};
use crate::registry::{DrawableId, OffscreenId, PipelineId, ResourceRegistry, Slots};

/// The descriptor set layout a pipeline's drawables are bound with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorLayoutKind {
    /// Binding 0: transform block
    UniformOnly,
    /// Binding 0: transform block, binding 1: combined image sampler
    UniformAndSampler,
}

impl DescriptorLayoutKind {
    pub fn bindings(self) -> Vec<DescriptorBinding> {
        let uniform = DescriptorBinding::uniform_buffer(UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX);
        match self {
            Self::UniformOnly => vec![uniform],
            Self::UniformAndSampler => vec![
                uniform,
                DescriptorBinding::combined_image_sampler(
                    SAMPLER_BINDING,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
            ],
        }
    }

    /// The layout a drawable with this sampled-ness needs.
    pub fn for_sampled(sampled: bool) -> Self {
        if sampled {
            Self::UniformAndSampler
        } else {
            Self::UniformOnly
        }
    }
}

/// The render pass a pipeline draws in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassTarget {
    /// The swapchain pass
    Main,
    Offscreen(OffscreenId),
}

/// Application-lifetime inputs of a pipeline.
#[derive(Clone, Debug)]
pub struct PipelineDesc {
    pub vertex_spirv: Vec<u8>,
    pub fragment_spirv: Vec<u8>,
    pub vertex_layout: VertexLayout,
    pub layout_kind: DescriptorLayoutKind,
    pub target: PassTarget,
}

impl PipelineDesc {
    pub fn new<V: VertexFormat>(
        vertex_spirv: Vec<u8>,
        fragment_spirv: Vec<u8>,
        layout_kind: DescriptorLayoutKind,
        target: PassTarget,
    ) -> Self {
        Self {
            vertex_spirv,
            fragment_spirv,
            vertex_layout: V::layout(),
            layout_kind,
            target,
        }
    }
}

#[derive(Debug)]
pub struct Pipeline {
    id: PipelineId,
    vertex_shader: vk::ShaderModule,
    fragment_shader: vk::ShaderModule,
    vertex_layout: VertexLayout,
    layout_kind: DescriptorLayoutKind,
    /// Borrowed from the renderer's set layouts
    set_layout: vk::DescriptorSetLayout,
    target: PassTarget,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    draw_list: Vec<DrawableId>,
}

impl Pipeline {
    /// Creates the shader modules. The pipeline itself is built by the first
    /// swapchain rebuild.
    pub fn init<G: GpuContext + ?Sized>(
        gpu: &G,
        id: PipelineId,
        desc: &PipelineDesc,
        set_layout: vk::DescriptorSetLayout,
    ) -> RendererResult<Self> {
        let vertex_shader = gpu.create_shader_module(&desc.vertex_spirv)?;
        let fragment_shader = match gpu.create_shader_module(&desc.fragment_spirv) {
            Ok(module) => module,
            Err(e) => {
                gpu.destroy_shader_module(vertex_shader);
                return Err(e.into());
            }
        };

        debug!(%id, layout = ?desc.layout_kind, target = ?desc.target, "Pipeline shaders loaded");

        Ok(Self {
            id,
            vertex_shader,
            fragment_shader,
            vertex_layout: desc.vertex_layout.clone(),
            layout_kind: desc.layout_kind,
            set_layout,
            target: desc.target,
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            draw_list: Vec::new(),
        })
    }

    #[inline]
    pub fn id(&self) -> PipelineId {
        self.id
    }

    #[inline]
    pub fn layout_kind(&self) -> DescriptorLayoutKind {
        self.layout_kind
    }

    #[inline]
    pub fn target(&self) -> PassTarget {
        self.target
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Drawables in draw order.
    #[inline]
    pub fn draw_list(&self) -> &[DrawableId] {
        &self.draw_list
    }

    /// Appends `id` to the draw list.
    ///
    /// # Errors
    ///
    /// - [`RendererError::AlreadyRegistered`] if the list already holds it
    /// - [`RendererError::InvalidState`] if the drawable was never initialized
    /// - [`RendererError::LayoutMismatch`] if its sampled-ness does not fit
    ///   this pipeline's descriptor layout
    pub fn add_draw_object(&mut self, id: DrawableId, drawable: &Drawable) -> RendererResult<()> {
        if self.draw_list.contains(&id) {
            return Err(RendererError::AlreadyRegistered {
                drawable: id,
                pipeline: self.id,
            });
        }
        if drawable.mesh().is_none() {
            return Err(RendererError::InvalidState(format!(
                "{id} has no mesh bound"
            )));
        }
        let needed = DescriptorLayoutKind::for_sampled(drawable.source().is_sampled());
        if needed != self.layout_kind {
            return Err(RendererError::LayoutMismatch {
                drawable: id,
                needed,
                pipeline: self.layout_kind,
            });
        }
        self.draw_list.push(id);
        Ok(())
    }

    /// Builds the layout and pipeline for `render_pass`, then the swapchain
    /// objects and projection of every drawable in the list.
    #[allow(clippy::too_many_arguments)]
    pub fn recreate_swapchain_objects<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &G,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        image_count: usize,
        pool: vk::DescriptorPool,
        drawables: &mut Slots<DrawableId, Drawable>,
        sources: SourceLookup<'_>,
    ) -> RendererResult<()> {
        let layout = gpu.create_pipeline_layout(self.set_layout)?;
        let desc = match GraphicsPipelineBuilder::new()
            .vertex_shader(self.vertex_shader)
            .fragment_shader(self.fragment_shader)
            .vertex_layout(&self.vertex_layout)
            .topology(PrimitiveTopology::TriangleList)
            .cull_mode(CullMode::Back)
            .front_face(FrontFace::CounterClockwise)
            .depth_test_enable(false)
            .color_blend_attachment(ColorBlendAttachment::alpha_blend())
            .viewport_extent(extent)
            .build(layout, render_pass)
        {
            Ok(desc) => desc,
            Err(e) => {
                gpu.destroy_pipeline_layout(layout);
                return Err(e.into());
            }
        };
        let pipeline = match gpu.create_graphics_pipeline(&desc) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                gpu.destroy_pipeline_layout(layout);
                return Err(e.into());
            }
        };
        self.layout = layout;
        self.pipeline = pipeline;

        let aspect = extent.width as f32 / extent.height as f32;
        for &id in &self.draw_list {
            let drawable = drawables.get_mut(id)?;
            let source = sources.resolve(drawable.source())?;
            drawable.recreate_swapchain_objects(gpu, image_count, pool, self.set_layout, source)?;
            drawable.set_proj(aspect);
        }

        info!(
            id = %self.id,
            width = extent.width,
            height = extent.height,
            drawables = self.draw_list.len(),
            "Pipeline built"
        );
        Ok(())
    }

    /// Binds the pipeline and draws every drawable in list order.
    pub fn draw_to_command_buffer<G: GpuContext + ?Sized>(
        &self,
        gpu: &G,
        command_buffer: vk::CommandBuffer,
        image_index: usize,
        registry: &ResourceRegistry,
    ) -> RendererResult<()> {
        gpu.cmd_bind_pipeline(command_buffer, self.pipeline);
        for &id in &self.draw_list {
            let drawable = registry.drawable(id)?;
            let mesh_id = drawable.mesh().ok_or_else(|| {
                RendererError::InvalidState(format!("{id} lost its mesh"))
            })?;
            drawable.record_draw(
                gpu,
                command_buffer,
                self.layout,
                image_index,
                registry.mesh(mesh_id)?,
            )?;
        }
        Ok(())
    }

    /// Destroys pipeline, then layout, then the drawables' swapchain objects.
    pub fn cleanup_swapchain_objects<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &G,
        drawables: &mut Slots<DrawableId, Drawable>,
    ) {
        gpu.destroy_pipeline(self.pipeline);
        gpu.destroy_pipeline_layout(self.layout);
        self.pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();

        for &id in &self.draw_list {
            if let Ok(drawable) = drawables.get_mut(id) {
                drawable.cleanup_swapchain_objects(gpu);
            }
        }
    }

    /// Destroys the shader modules. Swapchain objects must already be gone.
    pub fn destroy<G: GpuContext + ?Sized>(self, gpu: &G) {
        gpu.destroy_pipeline(self.pipeline);
        gpu.destroy_pipeline_layout(self.layout);
        gpu.destroy_shader_module(self.fragment_shader);
        gpu.destroy_shader_module(self.vertex_shader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use vkinterop_rhi::vertex::ColorVertex;
    use vkinterop_rhi::{HeadlessContext, ObjectKind};

    use crate::drawable::SampledSource;
    use crate::registry::{MeshId, SlotId, TextureId};

    const SPIRV_HEADER: [u8; 20] = [
        0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    fn desc(kind: DescriptorLayoutKind) -> PipelineDesc {
        PipelineDesc::new::<ColorVertex>(
            SPIRV_HEADER.to_vec(),
            SPIRV_HEADER.to_vec(),
            kind,
            PassTarget::Main,
        )
    }

    fn drawable(source: SampledSource) -> Drawable {
        let mut meshes: Slots<MeshId, ()> = Slots::default();
        let mut drawable = Drawable::new(Vec3::ZERO, 0.0);
        drawable.init(meshes.insert(()), source).unwrap();
        drawable
    }

    #[test]
    fn test_layout_bindings() {
        let uniform_only = DescriptorLayoutKind::UniformOnly.bindings();
        assert_eq!(uniform_only.len(), 1);
        assert_eq!(uniform_only[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);

        let sampled = DescriptorLayoutKind::UniformAndSampler.bindings();
        assert_eq!(sampled.len(), 2);
        assert_eq!(sampled[1].binding, SAMPLER_BINDING);
        assert_eq!(
            sampled[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn test_add_draw_object_rules() {
        let gpu = HeadlessContext::default();
        let mut ids: Slots<DrawableId, ()> = Slots::default();
        let mut textures: Slots<TextureId, ()> = Slots::default();
        let mut pipeline = Pipeline::init(
            &gpu,
            PipelineId::from_index(0),
            &desc(DescriptorLayoutKind::UniformOnly),
            vk::DescriptorSetLayout::null(),
        )
        .unwrap();

        let flat = ids.insert(());
        pipeline.add_draw_object(flat, &drawable(SampledSource::None)).unwrap();
        assert!(matches!(
            pipeline.add_draw_object(flat, &drawable(SampledSource::None)),
            Err(RendererError::AlreadyRegistered { .. })
        ));

        let textured = ids.insert(());
        let source = SampledSource::Texture(textures.insert(()));
        assert!(matches!(
            pipeline.add_draw_object(textured, &drawable(source)),
            Err(RendererError::LayoutMismatch {
                needed: DescriptorLayoutKind::UniformAndSampler,
                pipeline: DescriptorLayoutKind::UniformOnly,
                ..
            })
        ));

        let bare = ids.insert(());
        assert!(matches!(
            pipeline.add_draw_object(bare, &Drawable::new(Vec3::ZERO, 0.0)),
            Err(RendererError::InvalidState(_))
        ));

        assert_eq!(pipeline.draw_list(), &[flat]);
        pipeline.destroy(&gpu);
        assert_eq!(gpu.live_count(ObjectKind::ShaderModule), 0);
    }

    #[test]
    fn test_invalid_spirv_cleans_up() {
        let gpu = HeadlessContext::default();
        let mut bad = desc(DescriptorLayoutKind::UniformOnly);
        bad.fragment_spirv = vec![0; 8];

        assert!(
            Pipeline::init(&gpu, PipelineId::from_index(0), &bad, vk::DescriptorSetLayout::null())
                .is_err()
        );
        assert!(gpu.live_objects().is_empty());
    }
}
