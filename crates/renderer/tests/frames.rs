//! Frame scheduling through the full renderer.

mod common;

use std::time::Duration;

use ash::vk::Handle;

use common::FlatScene;
use vkinterop_renderer::{FrameStatus, Renderer, RendererError};
use vkinterop_rhi::{AcquireOutcome, GpuEvent, PresentOutcome, RhiError};

#[test]
fn test_uniform_writes_precede_submit_for_ten_frames() {
    let mut renderer =
        Renderer::new(common::headless(3), FlatScene::new(2), common::config(2), common::EXTENT)
            .unwrap();
    let drawables = renderer.scene().drawables.clone();

    let mut slots = Vec::new();
    for frame in 0..10 {
        renderer.gpu().clear_events();
        let FrameStatus::Presented { image_index, slot } =
            renderer.draw_frame_at(frame as f32 * 0.1).unwrap()
        else {
            panic!("frame {frame} was skipped");
        };
        slots.push(slot);

        let events = renderer.gpu().events();
        let command_buffer = renderer.lifecycle().command_buffer(image_index).unwrap();
        let submit = events
            .iter()
            .position(|e| {
                matches!(e, GpuEvent::Submit { command_buffer: cb, .. } if *cb == command_buffer.as_raw())
            })
            .unwrap_or_else(|| panic!("frame {frame} did not submit image {image_index}"));

        for id in &drawables {
            let memory = renderer.registry().drawable(*id).unwrap().uniform_buffers()[image_index]
                .memory
                .as_raw();
            let write = events
                .iter()
                .position(|e| matches!(e, GpuEvent::WriteMemory { memory: m, .. } if *m == memory))
                .unwrap_or_else(|| panic!("frame {frame}: {id} not updated"));
            assert!(write < submit, "frame {frame}: {id} written after submit");
        }

        let present = events
            .iter()
            .position(|e| matches!(e, GpuEvent::Present { .. }))
            .unwrap();
        assert!(submit < present);
    }

    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    assert_eq!(renderer.timer().frames(), 10);
    assert_eq!(renderer.lifecycle().rebuild_count(), 1);
    assert!(renderer.gpu().violations().is_empty());
}

#[test]
fn test_more_slots_than_images_waits_on_image_owner() {
    let mut renderer =
        Renderer::new(common::headless(2), FlatScene::new(1), common::config(3), common::EXTENT)
            .unwrap();
    let fences = renderer.scheduler().in_flight_fences();

    let same = AcquireOutcome::Acquired {
        image_index: 0,
        suboptimal: false,
    };
    renderer.gpu().script_acquire([same, same]);

    renderer.draw_frame_at(0.0).unwrap();
    renderer.gpu().clear_events();
    assert_eq!(
        renderer.draw_frame_at(0.1).unwrap(),
        FrameStatus::Presented {
            image_index: 0,
            slot: 1
        }
    );

    let events = renderer.gpu().events();
    let own_wait = events
        .iter()
        .position(|e| *e == GpuEvent::WaitFence { fence: fences[1].as_raw(), pending: false })
        .unwrap();
    let owner_wait = events
        .iter()
        .position(|e| *e == GpuEvent::WaitFence { fence: fences[0].as_raw(), pending: true })
        .expect("slot 1 must wait for slot 0's work on image 0");
    let submit = events
        .iter()
        .position(|e| matches!(e, GpuEvent::Submit { .. }))
        .unwrap();
    assert!(own_wait < owner_wait);
    assert!(owner_wait < submit);
    assert_eq!(renderer.scheduler().images_in_flight()[0], Some(fences[1]));
}

#[test]
fn test_out_of_date_acquire_skips_and_rebuilds() {
    let mut renderer =
        Renderer::new(common::headless(3), FlatScene::new(1), common::config(2), common::EXTENT)
            .unwrap();
    renderer.gpu().script_acquire([AcquireOutcome::OutOfDate]);

    assert_eq!(renderer.draw_frame_at(0.0).unwrap(), FrameStatus::Skipped);
    assert_eq!(renderer.scheduler().current_slot(), 0);
    assert!(renderer.lifecycle().needs_rebuild());

    assert_eq!(
        renderer.draw_frame_at(0.1).unwrap(),
        FrameStatus::Presented {
            image_index: 0,
            slot: 0
        }
    );
    assert_eq!(renderer.lifecycle().rebuild_count(), 2);
}

#[test]
fn test_suboptimal_and_out_of_date_present_rebuild_after_frame() {
    let mut renderer =
        Renderer::new(common::headless(3), FlatScene::new(1), common::config(2), common::EXTENT)
            .unwrap();
    renderer
        .gpu()
        .script_present([PresentOutcome::Suboptimal, PresentOutcome::OutOfDate]);

    assert!(matches!(
        renderer.draw_frame_at(0.0).unwrap(),
        FrameStatus::Presented { .. }
    ));
    assert_eq!(renderer.lifecycle().rebuild_count(), 2);
    assert!(!renderer.lifecycle().needs_rebuild());

    renderer.draw_frame_at(0.1).unwrap();
    assert_eq!(renderer.lifecycle().rebuild_count(), 3);

    renderer.draw_frame_at(0.2).unwrap();
    assert_eq!(renderer.lifecycle().rebuild_count(), 3);
}

#[test]
fn test_suboptimal_acquire_still_draws() {
    let mut renderer =
        Renderer::new(common::headless(3), FlatScene::new(1), common::config(2), common::EXTENT)
            .unwrap();
    renderer.gpu().script_acquire([AcquireOutcome::Acquired {
        image_index: 2,
        suboptimal: true,
    }]);

    assert_eq!(
        renderer.draw_frame_at(0.0).unwrap(),
        FrameStatus::Presented {
            image_index: 2,
            slot: 0
        }
    );
    assert_eq!(renderer.lifecycle().rebuild_count(), 2);
}

#[test]
fn test_hung_gpu_times_out_with_slot_diagnostic() {
    let mut config = common::config(2);
    config.fence_timeout = Some(Duration::from_millis(5));
    let mut renderer =
        Renderer::new(common::headless(3), FlatScene::new(1), config, common::EXTENT).unwrap();

    renderer.draw_frame_at(0.0).unwrap();
    renderer.gpu().set_hang_fences(true);
    // Slot 1 has never been used, so its fence is already signaled.
    renderer.draw_frame_at(0.1).unwrap();

    match renderer.draw_frame_at(0.2) {
        Err(RendererError::Rhi(RhiError::Timeout { what, timeout_ns })) => {
            assert!(what.contains("frame slot 0"), "{what}");
            assert_eq!(timeout_ns, 5_000_000);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }

    // Let shutdown drain the queue.
    renderer.gpu().set_hang_fences(false);
    renderer.shutdown().unwrap();
    assert!(renderer.gpu().live_objects().is_empty());
}

#[test]
fn test_draw_after_shutdown_is_rejected() {
    let mut renderer =
        Renderer::new(common::headless(3), FlatScene::new(1), common::config(2), common::EXTENT)
            .unwrap();
    renderer.shutdown().unwrap();
    renderer.shutdown().unwrap();
    assert!(matches!(
        renderer.draw_frame_at(0.0),
        Err(RendererError::InvalidState(_))
    ));
}
