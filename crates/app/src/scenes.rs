//! The demo scenes selectable with `--scene`.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use glam::{Vec2, Vec3};
use tracing::{info, warn};

use vkinterop_renderer::{
    DescriptorLayoutKind, ExternalImageConsumer, OFFSCREEN_FORMAT, PassTarget, PipelineDesc,
    RendererResult, Scene, SceneBuilder,
};
use vkinterop_resources::{DecodedImage, SPIRV_MAGIC, checkerboard, load_pixels, load_spirv};
use vkinterop_rhi::vertex::{ColorVertex, TexturedVertex};

const OFFSCREEN_SIZE: u32 = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SceneKind {
    /// One spinning vertex-colored quad
    Triangle,
    /// Two textured quads and one flat-colored quad
    MultipleObjects,
    /// A textured quad rendered offscreen, shown on a second quad
    RenderToTexture,
    /// Render-to-texture with every offscreen target handed to the encoder
    Encode,
}

impl SceneKind {
    pub fn needs_interop(self) -> bool {
        self == SceneKind::Encode
    }
}

/// Compiled SPIR-V for the two shader pairs the scenes use.
pub struct Shaders {
    color_vert: Vec<u8>,
    color_frag: Vec<u8>,
    textured_vert: Vec<u8>,
    textured_frag: Vec<u8>,
}

impl Shaders {
    /// Loads `color.{vert,frag}.spv` and `textured.{vert,frag}.spv` from
    /// `dir`. With `allow_placeholder` a missing or invalid file is replaced
    /// by an empty module header, which is enough for the headless context.
    pub fn load(dir: &Path, allow_placeholder: bool) -> Result<Self> {
        let load = |name: &str| -> Result<Vec<u8>> {
            let path = dir.join(name);
            match load_spirv(&path) {
                Ok(bytes) => Ok(bytes),
                Err(e) if allow_placeholder => {
                    warn!(path = %path.display(), error = %e, "Using placeholder shader");
                    Ok(placeholder_spirv())
                }
                Err(e) => Err(e).with_context(|| {
                    format!("failed to load shader {} (compile shaders/ with glslc)", path.display())
                }),
            }
        };

        Ok(Self {
            color_vert: load("color.vert.spv")?,
            color_frag: load("color.frag.spv")?,
            textured_vert: load("textured.vert.spv")?,
            textured_frag: load("textured.frag.spv")?,
        })
    }

    fn color(&self, layout: DescriptorLayoutKind, target: PassTarget) -> PipelineDesc {
        PipelineDesc::new::<ColorVertex>(
            self.color_vert.clone(),
            self.color_frag.clone(),
            layout,
            target,
        )
    }

    fn textured(&self, target: PassTarget) -> PipelineDesc {
        PipelineDesc::new::<TexturedVertex>(
            self.textured_vert.clone(),
            self.textured_frag.clone(),
            DescriptorLayoutKind::UniformAndSampler,
            target,
        )
    }
}

/// Module header with no instructions.
fn placeholder_spirv() -> Vec<u8> {
    [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect()
}

/// Reads `path` if given, otherwise generates a checkerboard.
pub fn load_texture(path: Option<&PathBuf>) -> Result<DecodedImage> {
    match path {
        Some(path) => {
            let image = load_pixels(path)
                .with_context(|| format!("failed to load texture {}", path.display()))?;
            info!(
                path = %path.display(),
                width = image.width,
                height = image.height,
                "Loaded texture"
            );
            Ok(image)
        }
        None => Ok(checkerboard(256, 32, [235, 235, 235, 255], [40, 90, 200, 255])),
    }
}

fn color_quad(color: Vec3) -> (Vec<ColorVertex>, Vec<u16>) {
    (
        vec![
            ColorVertex::new(Vec3::new(-0.5, -0.5, 0.0), Vec3::new(1.0, 0.0, 0.0)),
            ColorVertex::new(Vec3::new(0.5, -0.5, 0.0), Vec3::new(0.0, 1.0, 0.0)),
            ColorVertex::new(Vec3::new(0.5, 0.5, 0.0), Vec3::new(0.0, 0.0, 1.0)),
            ColorVertex::new(Vec3::new(-0.5, 0.5, 0.0), color),
        ],
        vec![0, 1, 2, 2, 3, 0],
    )
}

fn flat_quad(color: Vec3) -> (Vec<ColorVertex>, Vec<u16>) {
    let (mut vertices, indices) = color_quad(color);
    for vertex in &mut vertices {
        vertex.color = color;
    }
    (vertices, indices)
}

fn textured_quad() -> (Vec<TexturedVertex>, Vec<u32>) {
    let white = Vec3::ONE;
    (
        vec![
            TexturedVertex::new(Vec3::new(-0.5, -0.5, 0.0), white, Vec2::new(1.0, 0.0)),
            TexturedVertex::new(Vec3::new(0.5, -0.5, 0.0), white, Vec2::new(0.0, 0.0)),
            TexturedVertex::new(Vec3::new(0.5, 0.5, 0.0), white, Vec2::new(0.0, 1.0)),
            TexturedVertex::new(Vec3::new(-0.5, 0.5, 0.0), white, Vec2::new(1.0, 1.0)),
        ],
        vec![0, 1, 2, 2, 3, 0],
    )
}

/// One of the [`SceneKind`] scenes with the assets it needs.
pub struct DemoScene {
    kind: SceneKind,
    shaders: Shaders,
    texture: DecodedImage,
    encoder: Option<Box<dyn ExternalImageConsumer>>,
}

impl DemoScene {
    /// `encoder` is attached only by [`SceneKind::Encode`].
    pub fn new(
        kind: SceneKind,
        shaders: Shaders,
        texture: DecodedImage,
        encoder: Option<Box<dyn ExternalImageConsumer>>,
    ) -> Self {
        Self {
            kind,
            shaders,
            texture,
            encoder,
        }
    }

    fn build_triangle(&mut self, builder: &mut SceneBuilder<'_>) -> RendererResult<()> {
        let (vertices, indices) = color_quad(Vec3::ONE);
        let mesh = builder.add_mesh(&vertices, &indices)?;
        let pipeline = builder.add_pipeline(
            &self
                .shaders
                .color(DescriptorLayoutKind::UniformOnly, PassTarget::Main),
        )?;
        let quad = builder.add_drawable(Vec3::ZERO, FRAC_PI_2, mesh, None, None)?;
        builder.add_draw_object(pipeline, quad)
    }

    fn build_multiple_objects(&mut self, builder: &mut SceneBuilder<'_>) -> RendererResult<()> {
        let texture = builder.add_texture(&self.texture)?;
        let (vertices, indices) = textured_quad();
        let textured_mesh = builder.add_mesh(&vertices, &indices)?;
        let (vertices, indices) = flat_quad(Vec3::new(0.9, 0.6, 0.1));
        let flat_mesh = builder.add_mesh(&vertices, &indices)?;

        let textured = builder.add_pipeline(&self.shaders.textured(PassTarget::Main))?;
        let flat = builder.add_pipeline(
            &self
                .shaders
                .color(DescriptorLayoutKind::UniformOnly, PassTarget::Main),
        )?;

        let left = builder.add_drawable(
            Vec3::new(-1.2, 0.0, 0.0),
            FRAC_PI_2,
            textured_mesh,
            Some(texture),
            None,
        )?;
        builder.add_draw_object(textured, left)?;
        let middle = builder.add_drawable(Vec3::ZERO, -FRAC_PI_4, flat_mesh, None, None)?;
        builder.add_draw_object(flat, middle)?;
        let right = builder.add_drawable(
            Vec3::new(1.2, 0.0, 0.0),
            FRAC_PI_4,
            textured_mesh,
            Some(texture),
            None,
        )?;
        builder.add_draw_object(textured, right)
    }

    fn build_render_to_texture(&mut self, builder: &mut SceneBuilder<'_>) -> RendererResult<()> {
        let texture = builder.add_texture(&self.texture)?;
        let (vertices, indices) = textured_quad();
        let mesh = builder.add_mesh(&vertices, &indices)?;
        let offscreen = builder.add_offscreen_pass(OFFSCREEN_SIZE, OFFSCREEN_SIZE, OFFSCREEN_FORMAT);

        let inner_pipeline =
            builder.add_pipeline(&self.shaders.textured(PassTarget::Offscreen(offscreen)))?;
        let outer_pipeline = builder.add_pipeline(&self.shaders.textured(PassTarget::Main))?;

        let inner = builder.add_drawable(Vec3::ZERO, FRAC_PI_2, mesh, Some(texture), None)?;
        builder.add_draw_object(inner_pipeline, inner)?;
        let outer = builder.add_drawable(Vec3::ZERO, -FRAC_PI_4, mesh, None, Some(offscreen))?;
        builder.add_draw_object(outer_pipeline, outer)?;

        if self.kind == SceneKind::Encode
            && let Some(encoder) = self.encoder.take()
        {
            builder.attach_image_bridge(offscreen, encoder)?;
        }
        Ok(())
    }
}

impl Scene for DemoScene {
    fn build_scene(&mut self, builder: &mut SceneBuilder<'_>) -> RendererResult<()> {
        info!(scene = ?self.kind, "Building scene");
        match self.kind {
            SceneKind::Triangle => self.build_triangle(builder),
            SceneKind::MultipleObjects => self.build_multiple_objects(builder),
            SceneKind::RenderToTexture | SceneKind::Encode => self.build_render_to_texture(builder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkinterop_core::RendererConfig;
    use vkinterop_renderer::Renderer;
    use vkinterop_rhi::{GpuEvent, HeadlessContext, ObjectKind, vk};

    use crate::encoder::LoggingEncoder;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 640,
        height: 480,
    };

    fn placeholder_shaders() -> Shaders {
        Shaders::load(Path::new("does/not/exist"), true).unwrap()
    }

    fn run(kind: SceneKind, frames: u32) -> HeadlessContext {
        let gpu = HeadlessContext::default();
        let encoder: Option<Box<dyn ExternalImageConsumer>> =
            kind.needs_interop().then(|| Box::new(LoggingEncoder::new(false)) as _);
        let scene = DemoScene::new(kind, placeholder_shaders(), load_texture(None).unwrap(), encoder);
        let config = RendererConfig {
            enable_interop: kind.needs_interop(),
            ..RendererConfig::default()
        };

        let mut renderer = Renderer::new(gpu.clone(), scene, config, EXTENT).unwrap();
        for frame in 0..frames {
            renderer.draw_frame_at(frame as f32 / 60.0).unwrap();
        }
        renderer.shutdown().unwrap();
        gpu
    }

    #[test]
    fn test_missing_shaders_rejected_without_placeholder() {
        assert!(Shaders::load(Path::new("does/not/exist"), false).is_err());
    }

    #[test]
    fn test_every_scene_runs_and_shuts_down_cleanly() {
        for kind in SceneKind::value_variants() {
            let gpu = run(*kind, 5);
            assert!(gpu.live_objects().is_empty(), "{kind:?} leaked objects");
            assert!(gpu.violations().is_empty(), "{kind:?}: {:?}", gpu.violations());
        }
    }

    #[test]
    fn test_multiple_objects_draws_three_quads() {
        let gpu = run(SceneKind::MultipleObjects, 1);
        let textures = gpu
            .events()
            .iter()
            .filter(|e| matches!(e, GpuEvent::Create { kind: ObjectKind::Sampler, .. }))
            .count();
        assert_eq!(textures, 1);

        let draws = gpu
            .events()
            .iter()
            .filter(|e| matches!(e, GpuEvent::DrawIndexed { .. }))
            .count();
        // Three quads recorded once per swapchain image.
        assert_eq!(draws % 3, 0);
        assert!(draws > 0);
    }

    #[test]
    fn test_only_encode_scene_exports_memory() {
        let exports = |kind| {
            run(kind, 2)
                .events()
                .iter()
                .filter(|e| matches!(e, GpuEvent::ExportMemory { .. }))
                .count()
        };
        assert_eq!(exports(SceneKind::RenderToTexture), 0);
        assert!(exports(SceneKind::Encode) > 0);
    }
}
