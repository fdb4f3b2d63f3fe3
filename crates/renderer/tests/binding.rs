//! Drawable binding rules enforced while a scene is built.

mod common;

use glam::Vec3;

use common::{RenderToTextureScene, color_quad, spirv, textured_quad};
use vkinterop_renderer::drawable::{SAMPLER_BINDING, UNIFORM_BINDING};
use vkinterop_renderer::{
    DescriptorLayoutKind, OFFSCREEN_FORMAT, PassTarget, PipelineDesc, Renderer, RendererError,
    RendererResult, Scene, SceneBuilder,
};
use vkinterop_resources::checkerboard;
use vkinterop_rhi::GpuEvent;
use vkinterop_rhi::descriptor::DescriptorWrite;
use vkinterop_rhi::vertex::{ColorVertex, TexturedVertex};

/// Runs `build` as a scene's build step.
struct ClosureScene<F>(F);

impl<F> Scene for ClosureScene<F>
where
    F: FnMut(&mut SceneBuilder<'_>) -> RendererResult<()>,
{
    fn build_scene(&mut self, builder: &mut SceneBuilder<'_>) -> RendererResult<()> {
        (self.0)(builder)
    }
}

fn build<F>(scene: F) -> RendererResult<()>
where
    F: FnMut(&mut SceneBuilder<'_>) -> RendererResult<()>,
{
    let gpu = common::headless(3);
    Renderer::new(gpu, ClosureScene(scene), common::config(2), common::EXTENT).map(drop)
}

#[test]
fn test_both_sampled_sources_rejected() {
    let result = build(|builder| {
        let texture = builder.add_texture(&checkerboard(8, 2, [255; 4], [0; 4]))?;
        let offscreen = builder.add_offscreen_pass(64, 64, OFFSCREEN_FORMAT);
        let (vertices, indices) = textured_quad();
        let mesh = builder.add_mesh(&vertices, &indices)?;
        builder.add_drawable(Vec3::ZERO, 0.0, mesh, Some(texture), Some(offscreen))?;
        Ok(())
    });
    assert!(matches!(result, Err(RendererError::ConflictingSampledSource)));
}

#[test]
fn test_sampled_drawable_in_uniform_only_pipeline_rejected() {
    let result = build(|builder| {
        let texture = builder.add_texture(&checkerboard(8, 2, [255; 4], [0; 4]))?;
        let (vertices, indices) = textured_quad();
        let mesh = builder.add_mesh(&vertices, &indices)?;
        let pipeline = builder.add_pipeline(&PipelineDesc::new::<TexturedVertex>(
            spirv(),
            spirv(),
            DescriptorLayoutKind::UniformOnly,
            PassTarget::Main,
        ))?;
        let drawable = builder.add_drawable(Vec3::ZERO, 0.0, mesh, Some(texture), None)?;
        builder.add_draw_object(pipeline, drawable)
    });
    assert!(matches!(
        result,
        Err(RendererError::LayoutMismatch {
            needed: DescriptorLayoutKind::UniformAndSampler,
            pipeline: DescriptorLayoutKind::UniformOnly,
            ..
        })
    ));
}

#[test]
fn test_drawable_belongs_to_one_draw_list() {
    let result = build(|builder| {
        let (vertices, indices) = color_quad();
        let mesh = builder.add_mesh(&vertices, &indices)?;
        let desc = PipelineDesc::new::<ColorVertex>(
            spirv(),
            spirv(),
            DescriptorLayoutKind::UniformOnly,
            PassTarget::Main,
        );
        let first = builder.add_pipeline(&desc)?;
        let second = builder.add_pipeline(&desc)?;
        let drawable = builder.add_drawable(Vec3::ZERO, 0.0, mesh, None, None)?;
        builder.add_draw_object(first, drawable)?;
        builder.add_draw_object(second, drawable)
    });
    assert!(matches!(
        result,
        Err(RendererError::AlreadyRegistered { .. })
    ));
}

#[test]
fn test_pipeline_for_unknown_offscreen_pass_rejected() {
    let result = build(|builder| {
        let offscreen = builder.add_offscreen_pass(64, 64, OFFSCREEN_FORMAT);
        let (vertices, indices) = color_quad();
        builder.add_mesh(&vertices, &indices)?;
        // Ids are per kind, so a fresh pass id one past the last is unknown.
        let ghost = {
            use vkinterop_renderer::registry::SlotId;
            vkinterop_renderer::OffscreenId::from_index(offscreen.index() + 1)
        };
        builder.add_pipeline(&PipelineDesc::new::<ColorVertex>(
            spirv(),
            spirv(),
            DescriptorLayoutKind::UniformOnly,
            PassTarget::Offscreen(ghost),
        ))?;
        Ok(())
    });
    assert!(matches!(
        result,
        Err(RendererError::UnknownHandle {
            kind: "offscreen pass",
            ..
        })
    ));
}

#[test]
fn test_sampler_binding_written_only_for_sampled_drawables() {
    let renderer = Renderer::new(
        common::headless(3),
        RenderToTextureScene::default(),
        common::config(2),
        common::EXTENT,
    )
    .unwrap();
    let scene = renderer.scene();
    let registry = renderer.registry();
    let offscreen = registry.offscreen_pass(scene.offscreen.unwrap()).unwrap();
    let outer_sets = registry
        .drawable(scene.outer.unwrap())
        .unwrap()
        .descriptor_sets()
        .to_vec();

    let events = renderer.gpu().events();
    let updates: Vec<(u64, Vec<DescriptorWrite>)> = events
        .into_iter()
        .filter_map(|e| match e {
            GpuEvent::UpdateDescriptorSet { set, writes } => Some((set, writes)),
            _ => None,
        })
        .collect();
    // Two drawables, three images each.
    assert_eq!(updates.len(), 6);

    for (set, writes) in &updates {
        let bindings: Vec<u32> = writes.iter().map(DescriptorWrite::binding).collect();
        assert_eq!(bindings, vec![UNIFORM_BINDING, SAMPLER_BINDING]);

        // Sets of the on-screen quad sample offscreen target i.
        if let Some(image_index) = outer_sets.iter().position(|s| {
            use ash::vk::Handle;
            s.as_raw() == *set
        }) {
            let DescriptorWrite::CombinedImageSampler { view, .. } = writes[1] else {
                panic!("binding 1 must be a combined image sampler");
            };
            assert_eq!(view, offscreen.render_target(image_index).unwrap().view());
        }
    }
}

#[test]
fn test_flat_drawables_write_uniform_binding_only() {
    let renderer = Renderer::new(
        common::headless(2),
        common::FlatScene::new(2),
        common::config(2),
        common::EXTENT,
    )
    .unwrap();

    let updates: Vec<Vec<DescriptorWrite>> = renderer
        .gpu()
        .events()
        .into_iter()
        .filter_map(|e| match e {
            GpuEvent::UpdateDescriptorSet { writes, .. } => Some(writes),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 4);
    assert!(updates.iter().all(|writes| {
        writes.len() == 1 && matches!(writes[0], DescriptorWrite::UniformBuffer { binding: 0, .. })
    }));
}
