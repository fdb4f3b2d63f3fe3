//! Swapchain rebuild behavior against the headless context.

mod common;

use ash::vk::{self, Handle};

use common::{FlatScene, RenderToTextureScene, bound_sets, created, destroyed, destroyed_kinds};
use vkinterop_renderer::{FrameStatus, LifecycleState, RebuildOutcome, Renderer};
use vkinterop_rhi::{AcquireOutcome, GpuEvent, ObjectKind};

fn assert_draw_order<S: vkinterop_renderer::Scene>(
    renderer: &Renderer<vkinterop_rhi::HeadlessContext, S>,
    order: &[vkinterop_renderer::DrawableId],
) {
    let registry = renderer.registry();
    for image_index in 0..renderer.lifecycle().image_count() {
        let command_buffer = renderer.lifecycle().command_buffer(image_index).unwrap();
        let stream = renderer.gpu().command_stream(command_buffer);
        let expected: Vec<u64> = order
            .iter()
            .map(|id| registry.drawable(*id).unwrap().descriptor_sets()[image_index].as_raw())
            .collect();
        assert_eq!(bound_sets(&stream), expected, "image {image_index}");
    }
}

#[test]
fn test_first_build_records_every_image() {
    let renderer =
        Renderer::new(common::headless(3), FlatScene::new(2), common::config(2), common::EXTENT)
            .unwrap();

    assert_eq!(renderer.lifecycle().state(), LifecycleState::Live);
    assert_eq!(renderer.lifecycle().image_count(), 3);
    assert_eq!(renderer.lifecycle().rebuild_count(), 1);
    assert_eq!(renderer.lifecycle().extent(), Some(common::EXTENT));

    for image_index in 0..3 {
        let command_buffer = renderer.lifecycle().command_buffer(image_index).unwrap();
        let stream = renderer.gpu().command_stream(command_buffer);
        assert!(matches!(stream.first(), Some(GpuEvent::BeginRenderPass { .. })));
        assert!(matches!(stream.last(), Some(GpuEvent::EndRenderPass { .. })));
        let draws = stream
            .iter()
            .filter(|e| matches!(e, GpuEvent::DrawIndexed { index_count: 6, .. }))
            .count();
        assert_eq!(draws, 2);
    }
    assert!(renderer.gpu().violations().is_empty());
}

#[test]
fn test_draw_order_preserved_across_rebuilds() {
    let mut renderer =
        Renderer::new(common::headless(3), FlatScene::new(3), common::config(2), common::EXTENT)
            .unwrap();
    let order = renderer.scene().drawables.clone();
    let pipeline = renderer.scene().pipeline.unwrap();
    assert_eq!(renderer.registry().pipeline(pipeline).unwrap().draw_list(), &order[..]);
    assert_draw_order(&renderer, &order);

    for size in [(640, 480), (1024, 768), (800, 600)] {
        renderer.resize(vk::Extent2D {
            width: size.0,
            height: size.1,
        });
        renderer.draw_frame_at(0.0).unwrap();
        assert_eq!(renderer.registry().pipeline(pipeline).unwrap().draw_list(), &order[..]);
        assert_draw_order(&renderer, &order);
    }
    assert_eq!(renderer.lifecycle().rebuild_count(), 4);
}

#[test]
fn test_rebuild_destroys_everything_before_creating() {
    let mut renderer =
        Renderer::new(common::headless(3), FlatScene::new(2), common::config(2), common::EXTENT)
            .unwrap();
    renderer.draw_frame_at(0.0).unwrap();

    renderer.gpu().clear_events();
    assert_eq!(
        renderer.rebuild().unwrap(),
        RebuildOutcome::Rebuilt { image_count: 3 }
    );
    let events = renderer.gpu().events();

    let last_destroy = events.iter().rposition(GpuEvent::is_destroy).unwrap();
    let first_create = events.iter().position(GpuEvent::is_create).unwrap();
    assert!(last_destroy < first_create);

    let idle = events.iter().position(|e| *e == GpuEvent::WaitIdle).unwrap();
    let first_destroy = events.iter().position(GpuEvent::is_destroy).unwrap();
    assert!(idle < first_destroy);

    let kinds = destroyed_kinds(&events);
    let order = [
        ObjectKind::CommandBuffer,
        ObjectKind::Pipeline,
        ObjectKind::PipelineLayout,
        ObjectKind::DescriptorPool,
        ObjectKind::Framebuffer,
        ObjectKind::ImageView,
        ObjectKind::RenderPass,
        ObjectKind::Swapchain,
    ];
    for pair in order.windows(2) {
        let last_before = kinds.iter().rposition(|k| *k == pair[0]).unwrap();
        let first_after = kinds.iter().position(|k| *k == pair[1]).unwrap();
        assert!(
            last_before < first_after,
            "{:?} must be destroyed before {:?}",
            pair[0],
            pair[1]
        );
    }
    // Uniform buffers go with their pipeline, before the pool.
    let last_buffer = kinds.iter().rposition(|k| *k == ObjectKind::Buffer).unwrap();
    let pool = kinds.iter().position(|k| *k == ObjectKind::DescriptorPool).unwrap();
    assert!(last_buffer < pool);

    assert_eq!(destroyed(&events, ObjectKind::CommandBuffer), 3);
    assert_eq!(created(&events, ObjectKind::CommandBuffer), 3);
    assert_eq!(destroyed(&events, ObjectKind::Buffer), 6);
    assert_eq!(created(&events, ObjectKind::Buffer), 6);
    assert!(renderer.gpu().violations().is_empty());
}

#[test]
fn test_zero_extent_defers_rebuild() {
    let mut renderer =
        Renderer::new(common::headless(3), FlatScene::new(1), common::config(2), common::EXTENT)
            .unwrap();
    let swapchain = renderer.lifecycle().swapchain();

    renderer.resize(vk::Extent2D {
        width: 0,
        height: 0,
    });
    renderer.gpu().clear_events();
    assert_eq!(renderer.draw_frame_at(0.0).unwrap(), FrameStatus::Skipped);
    assert_eq!(renderer.draw_frame_at(0.1).unwrap(), FrameStatus::Skipped);

    let events = renderer.gpu().events();
    assert!(!events.iter().any(|e| e.is_create() || e.is_destroy()));
    assert_eq!(renderer.lifecycle().state(), LifecycleState::Invalidated);
    assert_eq!(renderer.lifecycle().swapchain(), swapchain);

    renderer.resize(vk::Extent2D {
        width: 320,
        height: 200,
    });
    assert!(matches!(
        renderer.draw_frame_at(0.2).unwrap(),
        FrameStatus::Presented { .. }
    ));
    assert_eq!(renderer.lifecycle().state(), LifecycleState::Live);
    assert_ne!(renderer.lifecycle().swapchain(), swapchain);
}

#[test]
fn test_fewer_images_destroys_offscreen_targets_before_creating() {
    let mut renderer = Renderer::new(
        common::headless(3),
        RenderToTextureScene::default(),
        common::config(2),
        common::EXTENT,
    )
    .unwrap();
    let offscreen = renderer.scene().offscreen.unwrap();
    renderer.draw_frame_at(0.0).unwrap();

    renderer.gpu().set_image_count(2);
    renderer.gpu().clear_events();
    assert_eq!(
        renderer.rebuild().unwrap(),
        RebuildOutcome::Rebuilt { image_count: 2 }
    );
    let events = renderer.gpu().events();

    let last_destroy = events.iter().rposition(GpuEvent::is_destroy).unwrap();
    let first_create = events.iter().position(GpuEvent::is_create).unwrap();
    assert!(last_destroy < first_create);

    // The third offscreen target goes, the other two stay.
    assert_eq!(destroyed(&events, ObjectKind::Image), 1);
    assert_eq!(created(&events, ObjectKind::Image), 0);
    let kinds = destroyed_kinds(&events);
    let image = kinds.iter().position(|k| *k == ObjectKind::Image).unwrap();
    let swapchain = kinds.iter().position(|k| *k == ObjectKind::Swapchain).unwrap();
    assert!(image < swapchain);

    assert_eq!(renderer.registry().offscreen_pass(offscreen).unwrap().image_count(), 2);
    assert!(matches!(
        renderer.draw_frame_at(0.1).unwrap(),
        FrameStatus::Presented { .. }
    ));
    assert!(renderer.gpu().violations().is_empty());
}

#[test]
fn test_minimized_surface_defers_out_of_date_rebuild() {
    let mut renderer =
        Renderer::new(common::headless(3), FlatScene::new(1), common::config(2), common::EXTENT)
            .unwrap();
    renderer.draw_frame_at(0.0).unwrap();
    let swapchain = renderer.lifecycle().swapchain();

    // The window keeps its last size while the surface reports 0x0.
    renderer.gpu().set_surface_extent(Some(vk::Extent2D {
        width: 0,
        height: 0,
    }));
    renderer.gpu().script_acquire([AcquireOutcome::OutOfDate]);
    renderer.gpu().clear_events();
    assert_eq!(renderer.draw_frame_at(0.1).unwrap(), FrameStatus::Skipped);
    assert_eq!(renderer.draw_frame_at(0.2).unwrap(), FrameStatus::Skipped);
    assert_eq!(renderer.draw_frame_at(0.3).unwrap(), FrameStatus::Skipped);

    let events = renderer.gpu().events();
    assert!(!events.iter().any(|e| e.is_create() || e.is_destroy()));
    assert!(!events.contains(&GpuEvent::WaitIdle));
    assert_eq!(renderer.lifecycle().state(), LifecycleState::Invalidated);
    assert_eq!(renderer.lifecycle().swapchain(), swapchain);

    renderer.gpu().set_surface_extent(None);
    assert!(matches!(
        renderer.draw_frame_at(0.4).unwrap(),
        FrameStatus::Presented { .. }
    ));
    assert_eq!(renderer.lifecycle().state(), LifecycleState::Live);
    assert_ne!(renderer.lifecycle().swapchain(), swapchain);
    assert!(renderer.gpu().violations().is_empty());
}

#[test]
fn test_offscreen_targets_untouched_at_same_image_count() {
    let mut renderer = Renderer::new(
        common::headless(3),
        RenderToTextureScene::default(),
        common::config(2),
        common::EXTENT,
    )
    .unwrap();
    let offscreen = renderer.scene().offscreen.unwrap();
    let before: Vec<_> = renderer
        .registry()
        .offscreen_pass(offscreen)
        .unwrap()
        .render_targets()
        .iter()
        .map(|t| (t.image(), t.view()))
        .collect();
    let render_pass = renderer.registry().offscreen_pass(offscreen).unwrap().render_pass();

    renderer.gpu().clear_events();
    renderer.rebuild().unwrap();
    let events = renderer.gpu().events();

    let after: Vec<_> = renderer
        .registry()
        .offscreen_pass(offscreen)
        .unwrap()
        .render_targets()
        .iter()
        .map(|t| (t.image(), t.view()))
        .collect();
    assert_eq!(before, after);
    assert_eq!(
        renderer.registry().offscreen_pass(offscreen).unwrap().render_pass(),
        render_pass
    );
    assert_eq!(created(&events, ObjectKind::Image), 0);
    assert_eq!(destroyed(&events, ObjectKind::Image), 0);
    // One render pass per rebuild: the main pass.
    assert_eq!(created(&events, ObjectKind::RenderPass), 1);
}

#[test]
fn test_image_count_changes_conserve_offscreen_targets() {
    let mut renderer = Renderer::new(
        common::headless(3),
        RenderToTextureScene::default(),
        common::config(2),
        common::EXTENT,
    )
    .unwrap();
    let offscreen = renderer.scene().offscreen.unwrap();

    // One image belongs to the checkerboard texture.
    for image_count in [2, 4, 5, 1, 3] {
        renderer.gpu().set_image_count(image_count);
        renderer.request_rebuild();
        renderer.draw_frame_at(0.0).unwrap();

        let count = image_count as usize;
        let pass = renderer.registry().offscreen_pass(offscreen).unwrap();
        assert_eq!(pass.image_count(), count);
        assert!(pass.framebuffer(count - 1).is_ok());
        assert!(pass.framebuffer(count).is_err());
        assert_eq!(renderer.gpu().live_count(ObjectKind::Image), count + 1);
        assert_eq!(renderer.scheduler().images_in_flight().len(), count);
    }
    assert!(renderer.gpu().violations().is_empty());
}
