//! Application shell.
//!
//! [`Renderer`] ties a GPU context and a [`Scene`] to the swapchain
//! lifecycle and the frame scheduler, and owns everything the scene
//! creates.
//!
//! # Resource Destruction Order
//!
//! [`Renderer::shutdown`] (also run on drop) waits for the device to go
//! idle, then destroys:
//!
//! 1. swapchain objects (same order as a rebuild teardown)
//! 2. pipelines, drawables, offscreen passes, textures, meshes
//! 3. descriptor set layouts
//! 4. frame slot semaphores and fences

use ash::vk;
use tracing::{debug, error, info};

use vkinterop_core::{RendererConfig, Timer};
use vkinterop_rhi::GpuContext;

use crate::drawable::DrawableState;
use crate::error::{RendererError, RendererResult};
use crate::frame_scheduler::{AcquiredFrame, FrameScheduler};
use crate::interop::ImageBridge;
use crate::lifecycle::{InFlightWait, RebuildOutcome, SwapchainLifecycle};
use crate::registry::ResourceRegistry;
use crate::scene::{ClearColors, Scene, SceneBuilder, SetLayouts};

/// What one call to [`Renderer::draw_frame`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { image_index: usize, slot: usize },
    /// Nothing drawn: the swapchain went out of date, or the surface has
    /// zero area.
    Skipped,
}

pub struct Renderer<G: GpuContext, S: Scene> {
    gpu: G,
    scene: S,
    config: RendererConfig,
    registry: ResourceRegistry,
    set_layouts: SetLayouts,
    lifecycle: SwapchainLifecycle,
    scheduler: FrameScheduler,
    bridge: Option<ImageBridge>,
    extent: vk::Extent2D,
    timer: Timer,
    rebuild_requested: bool,
    shut_down: bool,
}

impl<G: GpuContext, S: Scene> Renderer<G, S> {
    /// Builds `scene` and the first swapchain at `extent`.
    ///
    /// A zero-area `extent` is accepted; the first frame drawn at a real
    /// size builds the swapchain.
    pub fn new(
        gpu: G,
        scene: S,
        config: RendererConfig,
        extent: vk::Extent2D,
    ) -> RendererResult<Self> {
        config.validate()?;

        let mut set_layouts = SetLayouts::new(&gpu)?;
        let scheduler =
            match FrameScheduler::new(&gpu, config.max_frames_in_flight, config.fence_timeout_ns())
            {
                Ok(scheduler) => scheduler,
                Err(e) => {
                    set_layouts.destroy(&gpu);
                    return Err(e);
                }
            };

        let mut renderer = Self {
            gpu,
            scene,
            config,
            registry: ResourceRegistry::new(),
            set_layouts,
            lifecycle: SwapchainLifecycle::new(),
            scheduler,
            bridge: None,
            extent,
            timer: Timer::new(),
            rebuild_requested: false,
            shut_down: false,
        };

        // Anything created before a failure is released by Drop.
        renderer.scene.build_scene(&mut SceneBuilder::new(
            &renderer.gpu,
            &mut renderer.registry,
            &renderer.set_layouts,
            &mut renderer.bridge,
            extent,
        ))?;
        if renderer.bridge.is_some() && !renderer.config.enable_interop {
            return Err(RendererError::Interop(
                "scene attached an image bridge but interop is disabled in the config".to_string(),
            ));
        }

        info!(
            meshes = renderer.registry.meshes.len(),
            textures = renderer.registry.textures.len(),
            offscreen_passes = renderer.registry.offscreen_passes.len(),
            pipelines = renderer.registry.pipelines.len(),
            drawables = renderer.registry.drawables.len(),
            "Scene built"
        );

        renderer.rebuild()?;
        Ok(renderer)
    }

    #[inline]
    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    #[inline]
    pub fn scene(&self) -> &S {
        &self.scene
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[inline]
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    #[inline]
    pub fn lifecycle(&self) -> &SwapchainLifecycle {
        &self.lifecycle
    }

    #[inline]
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Schedules a rebuild before or after the next frame.
    pub fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
    }

    /// Records a new surface size and schedules a rebuild.
    pub fn resize(&mut self, extent: vk::Extent2D) {
        debug!(width = extent.width, height = extent.height, "Resize requested");
        self.extent = extent;
        self.request_rebuild();
    }

    /// Rebuilds every swapchain-dependent object now, then re-imports the
    /// bridged render targets.
    pub fn rebuild(&mut self) -> RendererResult<RebuildOutcome> {
        let fences = self.scheduler.in_flight_fences();
        let clear = ClearColors {
            main: self.config.clear_color,
            offscreen: self.config.offscreen_clear_color,
        };
        let outcome = self.lifecycle.rebuild(
            &self.gpu,
            self.extent,
            &mut self.registry,
            &self.scene,
            clear,
            InFlightWait {
                fences: &fences,
                timeout_ns: self.config.fence_timeout_ns(),
            },
        )?;

        if let RebuildOutcome::Rebuilt { image_count } = outcome {
            self.scheduler.reset_images(image_count);
            self.rebuild_requested = false;
            if let Some(bridge) = self.bridge.as_mut() {
                let pass = self.registry.offscreen_pass(bridge.offscreen())?;
                bridge.import_render_targets(&self.gpu, pass)?;
            }
        }
        Ok(outcome)
    }

    /// Draws one frame with the time elapsed since the renderer started.
    pub fn draw_frame(&mut self) -> RendererResult<FrameStatus> {
        let elapsed = self.timer.elapsed_secs();
        self.draw_frame_at(elapsed)
    }

    /// Draws one frame, animating drawables to `elapsed_secs`.
    pub fn draw_frame_at(&mut self, elapsed_secs: f32) -> RendererResult<FrameStatus> {
        if self.shut_down {
            return Err(RendererError::InvalidState(
                "renderer is shut down".to_string(),
            ));
        }
        if (self.rebuild_requested || self.lifecycle.needs_rebuild())
            && self.rebuild()? == RebuildOutcome::Deferred
        {
            return Ok(FrameStatus::Skipped);
        }

        let swapchain = self.lifecycle.swapchain();
        let slot = self.scheduler.current_slot();
        let image_index = match self.scheduler.acquire(&self.gpu, swapchain)? {
            AcquiredFrame::Ready {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    debug!("Acquired a suboptimal image, rebuilding after present");
                    self.rebuild_requested = true;
                }
                image_index
            }
            AcquiredFrame::OutOfDate => {
                debug!("Swapchain out of date, frame skipped");
                self.lifecycle.invalidate();
                return Ok(FrameStatus::Skipped);
            }
        };

        for (_, drawable) in self.registry.drawables.iter_mut() {
            if drawable.state() == DrawableState::FrameReady {
                drawable.update_uniform_buffer(&self.gpu, image_index, elapsed_secs)?;
            }
        }

        let command_buffer = self.lifecycle.command_buffer(image_index)?;
        self.scheduler.submit(&self.gpu, command_buffer)?;
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.encode(image_index)?;
        }

        let presented = self.scheduler.present(&self.gpu, swapchain, image_index)?;
        self.scheduler.advance();
        self.timer.tick();

        if presented.needs_rebuild() {
            debug!(outcome = ?presented, "Present asked for a rebuild");
            self.lifecycle.invalidate();
        }
        if self.rebuild_requested || self.lifecycle.needs_rebuild() {
            self.rebuild()?;
        }

        Ok(FrameStatus::Presented { image_index, slot })
    }

    /// Waits for the device and destroys everything the renderer owns.
    /// Later calls do nothing.
    pub fn shutdown(&mut self) -> RendererResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.gpu.wait_idle()?;
        self.shut_down = true;

        self.lifecycle.shutdown(&self.gpu, &mut self.registry);

        let gpu = &self.gpu;
        for pipeline in self.registry.pipelines.drain() {
            pipeline.destroy(gpu);
        }
        for mut drawable in self.registry.drawables.drain() {
            drawable.cleanup(gpu);
        }
        for mut pass in self.registry.offscreen_passes.drain() {
            pass.destroy(gpu);
        }
        for texture in self.registry.textures.drain() {
            texture.destroy(gpu);
        }
        for mesh in self.registry.meshes.drain() {
            mesh.destroy(gpu);
        }

        self.set_layouts.destroy(gpu);
        self.scheduler.destroy(gpu);
        self.bridge = None;

        info!(
            frames = self.timer.frames(),
            average_fps = self.timer.average_fps(),
            "Renderer shut down"
        );
        Ok(())
    }
}

impl<G: GpuContext, S: Scene> Drop for Renderer<G, S> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Failed to shut down renderer during drop: {e}");
        }
    }
}
