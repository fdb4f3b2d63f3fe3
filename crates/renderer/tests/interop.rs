//! Image bridge wiring through the renderer.

mod common;

use common::{RecordingConsumer, RenderToTextureScene};
use vkinterop_renderer::{FrameStatus, Renderer, RendererError};
use vkinterop_rhi::{ExternalMemoryHandle, GpuEvent, ObjectKind};

#[test]
fn test_targets_imported_and_every_frame_encoded() {
    let consumer = RecordingConsumer::default();
    let log = consumer.0.clone();
    let mut renderer = Renderer::new(
        common::headless(3),
        RenderToTextureScene::with_consumer(consumer),
        common::config(2),
        common::EXTENT,
    )
    .unwrap();

    {
        let log = log.lock().unwrap();
        assert_eq!(log.registered.len(), 3);
        let indices: Vec<_> = log.registered.iter().map(|i| i.image_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(log.registered.iter().all(|i| i.width == 256 && i.height == 256));
        assert!(
            log.registered
                .iter()
                .all(|i| matches!(i.handle, ExternalMemoryHandle::Fd(_) | ExternalMemoryHandle::Win32(_)))
        );
    }
    let exports = renderer
        .gpu()
        .events()
        .iter()
        .filter(|e| matches!(e, GpuEvent::ExportMemory { .. }))
        .count();
    assert_eq!(exports, 3);

    let mut presented = Vec::new();
    for frame in 0..6 {
        if let FrameStatus::Presented { image_index, .. } =
            renderer.draw_frame_at(frame as f32 * 0.05).unwrap()
        {
            presented.push(image_index);
        }
    }
    assert_eq!(log.lock().unwrap().encoded, presented);
}

#[test]
fn test_targets_reimported_after_image_count_change() {
    let consumer = RecordingConsumer::default();
    let log = consumer.0.clone();
    let mut renderer = Renderer::new(
        common::headless(3),
        RenderToTextureScene::with_consumer(consumer),
        common::config(2),
        common::EXTENT,
    )
    .unwrap();

    renderer.gpu().set_image_count(2);
    renderer.request_rebuild();
    renderer.draw_frame_at(0.0).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.registered.len(), 5);
    let latest: Vec<_> = log.registered[3..].iter().map(|i| i.image_index).collect();
    assert_eq!(latest, vec![0, 1]);

    let offscreen = renderer.scene().offscreen.unwrap();
    let pass = renderer.registry().offscreen_pass(offscreen).unwrap();
    assert!(pass.is_exportable());
    assert_eq!(
        log.registered[4].allocation_size,
        pass.render_target(1).unwrap().allocation_size()
    );
}

#[test]
fn test_bridge_requires_interop_enabled() {
    let mut config = common::config(2);
    config.enable_interop = false;
    let gpu = common::headless(3);

    let result = Renderer::new(
        gpu,
        RenderToTextureScene::with_consumer(RecordingConsumer::default()),
        config,
        common::EXTENT,
    );
    assert!(matches!(result, Err(RendererError::Interop(_))));
}

#[test]
fn test_shared_targets_released_on_shutdown() {
    let mut renderer = Renderer::new(
        common::headless(3),
        RenderToTextureScene::with_consumer(RecordingConsumer::default()),
        common::config(2),
        common::EXTENT,
    )
    .unwrap();
    renderer.draw_frame_at(0.0).unwrap();
    renderer.shutdown().unwrap();

    assert_eq!(renderer.gpu().live_count(ObjectKind::Image), 0);
    assert_eq!(renderer.gpu().live_count(ObjectKind::Memory), 0);
}
