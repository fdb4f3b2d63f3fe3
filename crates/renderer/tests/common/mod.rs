//! Shared fixtures for renderer integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use ash::vk;
use glam::{Vec2, Vec3};

use vkinterop_core::RendererConfig;
use vkinterop_renderer::{
    DescriptorLayoutKind, DrawableId, ExternalImage, ExternalImageConsumer, OFFSCREEN_FORMAT,
    OffscreenId, PassTarget, PipelineDesc, PipelineId, RendererResult, Scene, SceneBuilder,
};
use vkinterop_resources::checkerboard;
use vkinterop_rhi::vertex::{ColorVertex, TexturedVertex};
use vkinterop_rhi::{GpuEvent, HeadlessConfig, HeadlessContext, ObjectKind};

pub const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 800,
    height: 600,
};

/// Smallest buffer the SPIR-V checks accept: magic, version, generator,
/// bound, schema.
pub fn spirv() -> Vec<u8> {
    vec![
        0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00,
    ]
}

pub fn headless(image_count: u32) -> HeadlessContext {
    HeadlessContext::new(HeadlessConfig {
        image_count,
        ..HeadlessConfig::default()
    })
}

pub fn config(frames_in_flight: usize) -> RendererConfig {
    RendererConfig {
        max_frames_in_flight: frames_in_flight,
        enable_interop: true,
        ..RendererConfig::default()
    }
}

pub fn color_quad() -> (Vec<ColorVertex>, Vec<u16>) {
    let white = Vec3::ONE;
    (
        vec![
            ColorVertex::new(Vec3::new(-0.5, -0.5, 0.0), white),
            ColorVertex::new(Vec3::new(0.5, -0.5, 0.0), white),
            ColorVertex::new(Vec3::new(0.5, 0.5, 0.0), white),
            ColorVertex::new(Vec3::new(-0.5, 0.5, 0.0), white),
        ],
        vec![0, 1, 2, 2, 3, 0],
    )
}

pub fn textured_quad() -> (Vec<TexturedVertex>, Vec<u32>) {
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

/// `count` flat-colored quads drawn by one main-pass pipeline.
#[derive(Default)]
pub struct FlatScene {
    pub count: usize,
    pub pipeline: Option<PipelineId>,
    pub drawables: Vec<DrawableId>,
}

impl FlatScene {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }
}

impl Scene for FlatScene {
    fn build_scene(&mut self, builder: &mut SceneBuilder<'_>) -> RendererResult<()> {
        let (vertices, indices) = color_quad();
        let mesh = builder.add_mesh(&vertices, &indices)?;
        let pipeline = builder.add_pipeline(&PipelineDesc::new::<ColorVertex>(
            spirv(),
            spirv(),
            DescriptorLayoutKind::UniformOnly,
            PassTarget::Main,
        ))?;
        for i in 0..self.count {
            let drawable =
                builder.add_drawable(Vec3::new(i as f32, 0.0, 0.0), 1.0, mesh, None, None)?;
            builder.add_draw_object(pipeline, drawable)?;
            self.drawables.push(drawable);
        }
        self.pipeline = Some(pipeline);
        Ok(())
    }
}

/// A textured quad rendered offscreen, then sampled by a quad in the main
/// pass. Optionally shares the offscreen targets with a consumer.
#[derive(Default)]
pub struct RenderToTextureScene {
    pub consumer: Option<Box<dyn ExternalImageConsumer>>,
    pub offscreen: Option<OffscreenId>,
    pub inner: Option<DrawableId>,
    pub outer: Option<DrawableId>,
}

impl RenderToTextureScene {
    pub fn with_consumer(consumer: impl ExternalImageConsumer + 'static) -> Self {
        Self {
            consumer: Some(Box::new(consumer)),
            ..Self::default()
        }
    }
}

impl Scene for RenderToTextureScene {
    fn build_scene(&mut self, builder: &mut SceneBuilder<'_>) -> RendererResult<()> {
        let texture = builder.add_texture(&checkerboard(64, 8, [255; 4], [0, 0, 0, 255]))?;
        let (vertices, indices) = textured_quad();
        let mesh = builder.add_mesh(&vertices, &indices)?;
        let offscreen = builder.add_offscreen_pass(256, 256, OFFSCREEN_FORMAT);

        let inner_pipeline = builder.add_pipeline(&PipelineDesc::new::<TexturedVertex>(
            spirv(),
            spirv(),
            DescriptorLayoutKind::UniformAndSampler,
            PassTarget::Offscreen(offscreen),
        ))?;
        let outer_pipeline = builder.add_pipeline(&PipelineDesc::new::<TexturedVertex>(
            spirv(),
            spirv(),
            DescriptorLayoutKind::UniformAndSampler,
            PassTarget::Main,
        ))?;

        let inner = builder.add_drawable(Vec3::ZERO, 1.0, mesh, Some(texture), None)?;
        builder.add_draw_object(inner_pipeline, inner)?;
        let outer = builder.add_drawable(Vec3::ZERO, 0.0, mesh, None, Some(offscreen))?;
        builder.add_draw_object(outer_pipeline, outer)?;

        if let Some(consumer) = self.consumer.take() {
            builder.attach_image_bridge(offscreen, consumer)?;
        }

        self.offscreen = Some(offscreen);
        self.inner = Some(inner);
        self.outer = Some(outer);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConsumerLog {
    pub registered: Vec<ExternalImage>,
    pub encoded: Vec<usize>,
}

/// Consumer that records every call into a shared log.
#[derive(Clone, Default)]
pub struct RecordingConsumer(pub Arc<Mutex<ConsumerLog>>);

impl ExternalImageConsumer for RecordingConsumer {
    fn register_external_image(&mut self, image: &ExternalImage) -> RendererResult<()> {
        self.0.lock().unwrap().registered.push(*image);
        Ok(())
    }

    fn encode_frame(&mut self, image_index: usize) -> RendererResult<()> {
        self.0.lock().unwrap().encoded.push(image_index);
        Ok(())
    }
}

/// Kinds of every destroy event, in order.
pub fn destroyed_kinds(events: &[GpuEvent]) -> Vec<ObjectKind> {
    events
        .iter()
        .filter_map(|e| match e {
            GpuEvent::Destroy { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect()
}

pub fn created(events: &[GpuEvent], kind: ObjectKind) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, GpuEvent::Create { kind: k, .. } if *k == kind))
        .count()
}

pub fn destroyed(events: &[GpuEvent], kind: ObjectKind) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, GpuEvent::Destroy { kind: k, .. } if *k == kind))
        .count()
}

/// Descriptor sets bound in a command stream, in order.
pub fn bound_sets(stream: &[GpuEvent]) -> Vec<u64> {
    stream
        .iter()
        .filter_map(|e| match e {
            GpuEvent::BindDescriptorSet { set, .. } => Some(*set),
            _ => None,
        })
        .collect()
}
