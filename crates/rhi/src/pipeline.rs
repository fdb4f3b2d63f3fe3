//! Graphics pipeline state.
//!
//! A pipeline is described by a [`GraphicsPipelineDesc`], a plain value built
//! with [`GraphicsPipelineBuilder`] and handed to
//! [`GpuContext::create_graphics_pipeline`](crate::GpuContext::create_graphics_pipeline).
//! Pipelines target a classic render pass and bake the viewport and scissor
//! in as static state, so they are rebuilt whenever the target extent changes.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use vkinterop_rhi::pipeline::{ColorBlendAttachment, GraphicsPipelineBuilder};
//! use vkinterop_rhi::vertex::{TexturedVertex, VertexFormat};
//!
//! # fn example(
//! #     vert: vk::ShaderModule,
//! #     frag: vk::ShaderModule,
//! #     layout: vk::PipelineLayout,
//! #     render_pass: vk::RenderPass,
//! # ) -> Result<(), vkinterop_rhi::RhiError> {
//! let desc = GraphicsPipelineBuilder::new()
//!     .vertex_shader(vert)
//!     .fragment_shader(frag)
//!     .vertex_layout(&TexturedVertex::layout())
//!     .color_blend_attachment(ColorBlendAttachment::alpha_blend())
//!     .viewport_extent(vk::Extent2D { width: 1280, height: 720 })
//!     .build(layout, render_pass)?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::shader::{ENTRY_POINT, ShaderStage};
use crate::vertex::VertexLayout;

/// Primitive topology for input assembly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrimitiveTopology {
    LineList,
    #[default]
    TriangleList,
    TriangleStrip,
}

impl PrimitiveTopology {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Front face winding order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Blend factor for color blending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

impl BlendFactor {
    pub fn to_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        }
    }
}

/// Color blend state for the single color attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorBlendAttachment {
    pub blend_enable: bool,
    pub src_color_blend_factor: BlendFactor,
    pub dst_color_blend_factor: BlendFactor,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
    pub color_write_mask: vk::ColorComponentFlags,
}

impl Default for ColorBlendAttachment {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::Zero,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl ColorBlendAttachment {
    /// `srcAlpha * src + (1 - srcAlpha) * dst` for color, alpha passed through.
    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            src_color_blend_factor: BlendFactor::SrcAlpha,
            dst_color_blend_factor: BlendFactor::OneMinusSrcAlpha,
            ..Self::default()
        }
    }

    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.blend_enable.into(),
            src_color_blend_factor: self.src_color_blend_factor.to_vk(),
            dst_color_blend_factor: self.dst_color_blend_factor.to_vk(),
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: self.src_alpha_blend_factor.to_vk(),
            dst_alpha_blend_factor: self.dst_alpha_blend_factor.to_vk(),
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: self.color_write_mask,
        }
    }
}

/// Everything needed to compile one graphics pipeline.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineDesc {
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    pub vertex_layout: VertexLayout,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub samples: vk::SampleCountFlags,
    pub depth_test: bool,
    pub blend: ColorBlendAttachment,
    pub viewport_extent: vk::Extent2D,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

impl GraphicsPipelineDesc {
    /// Compiles the description on a live device.
    pub(crate) fn create(
        &self,
        device: &ash::Device,
        allocation_callbacks: Option<&vk::AllocationCallbacks<'_>>,
    ) -> RhiResult<vk::Pipeline> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(ShaderStage::Vertex.to_vk_stage())
                .module(self.vertex_shader)
                .name(ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(ShaderStage::Fragment.to_vk_stage())
                .module(self.fragment_shader)
                .name(ENTRY_POINT),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_layout.bindings)
            .vertex_attribute_descriptions(&self.vertex_layout.attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology.to_vk())
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.viewport_extent.width as f32,
            height: self.viewport_extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.viewport_extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(self.front_face.to_vk());

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(self.samples)
            .min_sample_shading(1.0);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_test)
            .depth_compare_op(vk::CompareOp::LESS)
            .max_depth_bounds(1.0);

        let color_blend_attachments = [self.blend.to_vk()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .layout(self.layout)
            .render_pass(self.render_pass)
            .subpass(self.subpass);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(
                    vk::PipelineCache::null(),
                    &[pipeline_info],
                    allocation_callbacks,
                )
                .map_err(|(_, result)| {
                    RhiError::Pipeline(format!("vkCreateGraphicsPipelines failed: {result}"))
                })?
        };

        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::Pipeline("driver returned no pipeline".to_string()))?;

        debug!(
            width = self.viewport_extent.width,
            height = self.viewport_extent.height,
            "Graphics pipeline created"
        );

        Ok(pipeline)
    }
}

/// Builder for [`GraphicsPipelineDesc`].
///
/// Defaults: triangle list, back-face culling, counter-clockwise front face,
/// one sample, no depth test, blending disabled.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineBuilder {
    vertex_shader: Option<vk::ShaderModule>,
    fragment_shader: Option<vk::ShaderModule>,
    vertex_layout: VertexLayout,
    topology: PrimitiveTopology,
    cull_mode: CullMode,
    front_face: FrontFace,
    samples: vk::SampleCountFlags,
    depth_test: bool,
    blend: ColorBlendAttachment,
    viewport_extent: vk::Extent2D,
    subpass: u32,
}

impl Default for GraphicsPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsPipelineBuilder {
    pub fn new() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            vertex_layout: VertexLayout {
                bindings: Vec::new(),
                attributes: Vec::new(),
            },
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_test: false,
            blend: ColorBlendAttachment::default(),
            viewport_extent: vk::Extent2D::default(),
            subpass: 0,
        }
    }

    pub fn vertex_shader(mut self, module: vk::ShaderModule) -> Self {
        self.vertex_shader = Some(module);
        self
    }

    pub fn fragment_shader(mut self, module: vk::ShaderModule) -> Self {
        self.fragment_shader = Some(module);
        self
    }

    pub fn vertex_layout(mut self, layout: &VertexLayout) -> Self {
        self.vertex_layout = layout.clone();
        self
    }

    pub fn topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: FrontFace) -> Self {
        self.front_face = face;
        self
    }

    pub fn depth_test_enable(mut self, enable: bool) -> Self {
        self.depth_test = enable;
        self
    }

    pub fn color_blend_attachment(mut self, attachment: ColorBlendAttachment) -> Self {
        self.blend = attachment;
        self
    }

    pub fn viewport_extent(mut self, extent: vk::Extent2D) -> Self {
        self.viewport_extent = extent;
        self
    }

    pub fn subpass(mut self, subpass: u32) -> Self {
        self.subpass = subpass;
        self
    }

    /// Validates the configuration and binds it to `layout` and `render_pass`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Pipeline`] if a shader stage is missing, no vertex
    /// binding was given or the viewport has zero area.
    pub fn build(
        self,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> RhiResult<GraphicsPipelineDesc> {
        let vertex_shader = self
            .vertex_shader
            .ok_or_else(|| RhiError::Pipeline("Vertex shader is required".to_string()))?;

        let fragment_shader = self
            .fragment_shader
            .ok_or_else(|| RhiError::Pipeline("Fragment shader is required".to_string()))?;

        if self.vertex_layout.bindings.is_empty() {
            return Err(RhiError::Pipeline(
                "At least one vertex binding is required".to_string(),
            ));
        }

        if self.viewport_extent.width == 0 || self.viewport_extent.height == 0 {
            return Err(RhiError::Pipeline(format!(
                "viewport extent {}x{} has zero area",
                self.viewport_extent.width, self.viewport_extent.height
            )));
        }

        Ok(GraphicsPipelineDesc {
            vertex_shader,
            fragment_shader,
            vertex_layout: self.vertex_layout,
            topology: self.topology,
            cull_mode: self.cull_mode,
            front_face: self.front_face,
            samples: self.samples,
            depth_test: self.depth_test,
            blend: self.blend,
            viewport_extent: self.viewport_extent,
            layout,
            render_pass,
            subpass: self.subpass,
        })
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::vertex::{ColorVertex, VertexFormat};

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 800,
            height: 600,
        }
    }

    fn complete_builder() -> GraphicsPipelineBuilder {
        GraphicsPipelineBuilder::new()
            .vertex_shader(vk::ShaderModule::from_raw(1))
            .fragment_shader(vk::ShaderModule::from_raw(2))
            .vertex_layout(&ColorVertex::layout())
            .viewport_extent(extent())
    }

    #[test]
    fn test_topology_to_vk() {
        assert_eq!(
            PrimitiveTopology::TriangleList.to_vk(),
            vk::PrimitiveTopology::TRIANGLE_LIST
        );
        assert_eq!(
            PrimitiveTopology::LineList.to_vk(),
            vk::PrimitiveTopology::LINE_LIST
        );
    }

    #[test]
    fn test_cull_and_front_face_to_vk() {
        assert_eq!(CullMode::Back.to_vk(), vk::CullModeFlags::BACK);
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(
            FrontFace::CounterClockwise.to_vk(),
            vk::FrontFace::COUNTER_CLOCKWISE
        );
    }

    #[test]
    fn test_alpha_blend_factors() {
        let blend = ColorBlendAttachment::alpha_blend().to_vk();
        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            blend.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
        assert_eq!(blend.color_blend_op, vk::BlendOp::ADD);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_default_blend_disabled() {
        assert_eq!(ColorBlendAttachment::default().to_vk().blend_enable, vk::FALSE);
    }

    #[test]
    fn test_builder_defaults() {
        let desc = complete_builder()
            .build(vk::PipelineLayout::from_raw(3), vk::RenderPass::from_raw(4))
            .unwrap();

        assert_eq!(desc.topology, PrimitiveTopology::TriangleList);
        assert_eq!(desc.cull_mode, CullMode::Back);
        assert_eq!(desc.front_face, FrontFace::CounterClockwise);
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_1);
        assert!(!desc.depth_test);
        assert_eq!(desc.viewport_extent, extent());
        assert_eq!(desc.render_pass, vk::RenderPass::from_raw(4));
        assert_eq!(desc.subpass, 0);
    }

    #[test]
    fn test_builder_requires_shaders() {
        let result = GraphicsPipelineBuilder::new()
            .vertex_layout(&ColorVertex::layout())
            .viewport_extent(extent())
            .build(vk::PipelineLayout::null(), vk::RenderPass::null());
        assert!(matches!(result, Err(RhiError::Pipeline(_))));
    }

    #[test]
    fn test_builder_rejects_zero_viewport() {
        let result = complete_builder()
            .viewport_extent(vk::Extent2D {
                width: 0,
                height: 600,
            })
            .build(vk::PipelineLayout::null(), vk::RenderPass::null());
        assert!(result.is_err());
    }
}
