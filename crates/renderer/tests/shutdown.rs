//! Orderly teardown leaves no live GPU objects.

mod common;

use ash::vk;

use common::{FlatScene, RecordingConsumer, RenderToTextureScene};
use vkinterop_renderer::{LifecycleState, Renderer};

#[test]
fn test_flat_scene_leaves_nothing_alive() {
    let mut renderer =
        Renderer::new(common::headless(3), FlatScene::new(3), common::config(2), common::EXTENT)
            .unwrap();
    for frame in 0..5 {
        renderer.draw_frame_at(frame as f32).unwrap();
    }
    renderer.shutdown().unwrap();

    assert_eq!(renderer.lifecycle().state(), LifecycleState::Uninitialized);
    assert!(renderer.registry().drawables.is_empty());
    assert_eq!(renderer.gpu().live_objects(), vec![]);
    assert!(renderer.gpu().violations().is_empty());
}

#[test]
fn test_resized_render_to_texture_scene_leaves_nothing_alive() {
    let mut renderer = Renderer::new(
        common::headless(3),
        RenderToTextureScene::with_consumer(RecordingConsumer::default()),
        common::config(3),
        common::EXTENT,
    )
    .unwrap();

    for (frame, image_count) in [4, 2, 3].into_iter().enumerate() {
        renderer.gpu().set_image_count(image_count);
        renderer.resize(vk::Extent2D {
            width: 400 + frame as u32 * 100,
            height: 300,
        });
        renderer.draw_frame_at(frame as f32).unwrap();
        renderer.draw_frame_at(frame as f32 + 0.5).unwrap();
    }
    renderer.shutdown().unwrap();

    assert_eq!(renderer.gpu().live_objects(), vec![]);
    assert!(renderer.gpu().violations().is_empty());
}

#[test]
fn test_failed_build_releases_partial_scene() {
    struct Failing;

    impl vkinterop_renderer::Scene for Failing {
        fn build_scene(
            &mut self,
            builder: &mut vkinterop_renderer::SceneBuilder<'_>,
        ) -> vkinterop_renderer::RendererResult<()> {
            let (vertices, indices) = common::color_quad();
            builder.add_mesh(&vertices, &indices)?;
            builder.add_offscreen_pass(32, 32, vkinterop_renderer::OFFSCREEN_FORMAT);
            Err(vkinterop_renderer::RendererError::InvalidState(
                "scene refused to build".to_string(),
            ))
        }
    }

    let gpu = common::headless(3);
    let result = Renderer::new(gpu.clone(), Failing, common::config(2), common::EXTENT);
    assert!(matches!(
        result,
        Err(vkinterop_renderer::RendererError::InvalidState(_))
    ));

    assert_eq!(gpu.live_objects(), vec![]);
    assert!(gpu.violations().is_empty());
}

#[test]
fn test_drop_without_shutdown_releases_everything() {
    let gpu = common::headless(2);
    {
        let mut renderer =
            Renderer::new(gpu.clone(), FlatScene::new(2), common::config(2), common::EXTENT)
                .unwrap();
        renderer.draw_frame_at(0.0).unwrap();
        assert!(!gpu.live_objects().is_empty());
    }
    assert_eq!(gpu.live_objects(), vec![]);
}
