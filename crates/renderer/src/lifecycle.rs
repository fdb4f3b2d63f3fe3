//! Swapchain lifecycle.
//!
//! [`SwapchainLifecycle`] owns every object whose existence depends on the
//! swapchain: the swapchain itself, its image views, the main render pass,
//! framebuffers, the descriptor pool and the prerecorded command buffers.
//! It also drives the per-pipeline and per-offscreen-pass swapchain objects
//! held in the [`ResourceRegistry`].
//!
//! # Rebuild sequence
//!
//! ```text
//! plan the new swapchain, defer if the surface has zero area
//! wait in-flight fences, wait idle
//! destroy: command buffers -> pipeline objects -> excess offscreen targets
//!          -> descriptor pool -> framebuffers -> image views
//!          -> main render pass -> swapchain
//! create:  swapchain -> image views -> main render pass -> framebuffers
//!          -> descriptor pool -> missing offscreen targets -> pipeline objects
//!          -> command buffers
//! ```
//!
//! Offscreen targets have a fixed extent, so only the ones beyond the new
//! image count are destroyed and only missing ones are created. At an
//! unchanged count they are left alone.

use ash::vk;
use tracing::{debug, info};

use vkinterop_rhi::{GpuContext, RenderPassDesc};
use vkinterop_rhi::descriptor::pool_sizes;

use crate::drawable::SourceLookup;
use crate::error::{RendererError, RendererResult};
use crate::pipeline::PassTarget;
use crate::registry::ResourceRegistry;
use crate::scene::{ClearColors, MainPassTarget, PassRecorder, Scene};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing built yet, or shut down
    #[default]
    Uninitialized,
    Live,
    /// Swapchain objects exist but no longer match the surface
    Invalidated,
    Rebuilding,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt { image_count: usize },
    /// The surface has zero area; try again once it has a size.
    Deferred,
}

/// What a rebuild waits on before destroying anything.
#[derive(Clone, Copy, Debug)]
pub struct InFlightWait<'a> {
    pub fences: &'a [vk::Fence],
    pub timeout_ns: u64,
}

/// Render pass for swapchain images: cleared, then handed to presentation.
pub fn main_render_pass_desc(format: vk::Format) -> RenderPassDesc {
    RenderPassDesc {
        color_format: format,
        load_op: vk::AttachmentLoadOp::CLEAR,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        dependencies: vec![vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        }],
    }
}

/// Descriptor pool capacity for `drawables` registered drawables, `sampled`
/// of which sample an image, over `image_count` swapchain images.
///
/// Returns `(max_sets, pool sizes)`. Vulkan rejects empty pools, so a scene
/// without drawables still gets room for one set.
pub fn descriptor_pool_layout(
    drawables: u32,
    sampled: u32,
    image_count: usize,
) -> (u32, Vec<vk::DescriptorPoolSize>) {
    let images = u32::try_from(image_count).unwrap_or(u32::MAX);
    let sets = drawables.saturating_mul(images).max(1);
    (sets, pool_sizes(sets, sampled.saturating_mul(images)))
}

#[derive(Debug)]
struct SwapchainObjects {
    handle: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    pool: vk::DescriptorPool,
    command_buffers: Vec<vk::CommandBuffer>,
}

#[derive(Debug, Default)]
pub struct SwapchainLifecycle {
    state: LifecycleState,
    objects: Option<SwapchainObjects>,
    rebuilds: u64,
}

impl SwapchainLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// True until the next successful rebuild.
    #[inline]
    pub fn needs_rebuild(&self) -> bool {
        self.state != LifecycleState::Live
    }

    /// Marks the swapchain stale. Has no effect before the first build.
    pub fn invalidate(&mut self) {
        if self.state == LifecycleState::Live {
            debug!("Swapchain invalidated");
            self.state = LifecycleState::Invalidated;
        }
    }

    /// Completed rebuilds, the first build included.
    #[inline]
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.objects
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |objects| objects.handle)
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.objects.as_ref().map(|objects| objects.extent)
    }

    pub fn image_count(&self) -> usize {
        self.objects.as_ref().map_or(0, |objects| objects.images.len())
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.objects
            .as_ref()
            .map_or(vk::RenderPass::null(), |objects| objects.render_pass)
    }

    pub fn command_buffer(&self, image_index: usize) -> RendererResult<vk::CommandBuffer> {
        self.objects
            .as_ref()
            .and_then(|objects| objects.command_buffers.get(image_index).copied())
            .ok_or_else(|| {
                RendererError::InvalidState(format!(
                    "no command buffer for image {image_index} ({} images)",
                    self.image_count()
                ))
            })
    }

    /// Tears down and recreates every swapchain-dependent object.
    ///
    /// A zero-area `desired_extent`, or a surface that currently reports
    /// zero area (a minimized window), defers the rebuild and leaves existing
    /// objects untouched. Any failure after the teardown starts is fatal;
    /// whatever was created is still released by [`Self::shutdown`].
    pub fn rebuild<S: Scene + ?Sized>(
        &mut self,
        gpu: &dyn GpuContext,
        desired_extent: vk::Extent2D,
        registry: &mut ResourceRegistry,
        scene: &S,
        clear: ClearColors,
        wait: InFlightWait<'_>,
    ) -> RendererResult<RebuildOutcome> {
        if desired_extent.width == 0 || desired_extent.height == 0 {
            debug!("Window has zero area, rebuild deferred");
            self.invalidate();
            return Ok(RebuildOutcome::Deferred);
        }
        let plan = gpu.swapchain_plan(desired_extent)?;
        if plan.is_zero_area() {
            debug!(
                width = plan.extent.width,
                height = plan.extent.height,
                "Surface has zero area, rebuild deferred"
            );
            self.invalidate();
            return Ok(RebuildOutcome::Deferred);
        }

        self.state = LifecycleState::Rebuilding;
        for &fence in wait.fences {
            gpu.wait_for_fence(fence, wait.timeout_ns)?;
        }
        gpu.wait_idle()?;

        let planned_images = usize::try_from(plan.image_count).unwrap_or(usize::MAX);
        self.teardown(gpu, registry, Some(planned_images));
        let image_count = self.create(gpu, desired_extent, registry, scene, clear)?;

        self.state = LifecycleState::Live;
        self.rebuilds += 1;
        info!(
            image_count,
            width = self.extent().map_or(0, |e| e.width),
            height = self.extent().map_or(0, |e| e.height),
            rebuild = self.rebuilds,
            "Swapchain rebuilt"
        );
        Ok(RebuildOutcome::Rebuilt { image_count })
    }

    /// Destroys every swapchain-dependent object. The device must be idle.
    ///
    /// Offscreen passes keep their targets; the owner destroys them.
    pub fn shutdown(&mut self, gpu: &dyn GpuContext, registry: &mut ResourceRegistry) {
        self.teardown(gpu, registry, None);
        self.state = LifecycleState::Uninitialized;
    }

    /// `offscreen_images` trims every offscreen pass to that many targets.
    fn teardown(
        &mut self,
        gpu: &dyn GpuContext,
        registry: &mut ResourceRegistry,
        offscreen_images: Option<usize>,
    ) {
        let ResourceRegistry {
            pipelines,
            drawables,
            offscreen_passes,
            ..
        } = registry;

        let Some(objects) = self.objects.take() else {
            return;
        };

        gpu.free_command_buffers(&objects.command_buffers);

        for (_, pipeline) in pipelines.iter_mut() {
            pipeline.cleanup_swapchain_objects(gpu, drawables);
        }
        if let Some(count) = offscreen_images {
            for (_, pass) in offscreen_passes.iter_mut() {
                pass.trim_swapchain_objects(gpu, count);
            }
        }

        gpu.destroy_descriptor_pool(objects.pool);
        for framebuffer in objects.framebuffers {
            gpu.destroy_framebuffer(framebuffer);
        }
        for view in objects.views {
            gpu.destroy_image_view(view);
        }
        gpu.destroy_render_pass(objects.render_pass);
        gpu.destroy_swapchain(objects.handle);

        debug!("Swapchain objects destroyed");
    }

    fn create<S: Scene + ?Sized>(
        &mut self,
        gpu: &dyn GpuContext,
        desired_extent: vk::Extent2D,
        registry: &mut ResourceRegistry,
        scene: &S,
        clear: ClearColors,
    ) -> RendererResult<usize> {
        let swapchain = gpu.create_swapchain(desired_extent)?;
        let extent = swapchain.extent;
        let image_count = swapchain.images.len();

        // Stored before anything else is created so a failure part way
        // through leaves every handle reachable for teardown.
        let objects = self.objects.insert(SwapchainObjects {
            handle: swapchain.handle,
            format: swapchain.format,
            extent,
            images: swapchain.images,
            views: Vec::with_capacity(image_count),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::with_capacity(image_count),
            pool: vk::DescriptorPool::null(),
            command_buffers: Vec::new(),
        });

        for &image in &objects.images {
            objects.views.push(gpu.create_image_view(image, objects.format)?);
        }
        objects.render_pass = gpu.create_render_pass(&main_render_pass_desc(objects.format))?;
        for &view in &objects.views {
            objects
                .framebuffers
                .push(gpu.create_framebuffer(objects.render_pass, view, extent)?);
        }

        let (drawables, sampled) = registry.descriptor_demand();
        let (max_sets, sizes) = descriptor_pool_layout(drawables, sampled, image_count);
        objects.pool = gpu.create_descriptor_pool(max_sets, &sizes)?;
        debug!(max_sets, drawables, sampled, "Descriptor pool created");

        for (_, pass) in registry.offscreen_passes.iter_mut() {
            pass.recreate_swapchain_objects(gpu, image_count)?;
        }

        {
            let ResourceRegistry {
                textures,
                offscreen_passes,
                drawables,
                pipelines,
                ..
            } = &mut *registry;
            let sources = SourceLookup {
                textures,
                offscreen_passes,
            };
            for (_, pipeline) in pipelines.iter_mut() {
                let (render_pass, pass_extent) = match pipeline.target() {
                    PassTarget::Main => (objects.render_pass, extent),
                    PassTarget::Offscreen(id) => {
                        let pass = offscreen_passes.get(id)?;
                        (pass.render_pass(), pass.extent())
                    }
                };
                pipeline.recreate_swapchain_objects(
                    gpu,
                    render_pass,
                    pass_extent,
                    image_count,
                    objects.pool,
                    drawables,
                    sources,
                )?;
            }
        }

        objects.command_buffers = gpu.allocate_command_buffers(image_count)?;
        for (image_index, (&command_buffer, &framebuffer)) in objects
            .command_buffers
            .iter()
            .zip(&objects.framebuffers)
            .enumerate()
        {
            gpu.begin_command_buffer(command_buffer, false)?;
            let mut recorder = PassRecorder::new(
                gpu,
                registry,
                command_buffer,
                image_index,
                MainPassTarget {
                    render_pass: objects.render_pass,
                    framebuffer,
                    extent,
                },
                clear,
            );
            scene.record_passes(&mut recorder)?;
            recorder.finish()?;
            gpu.end_command_buffer(command_buffer)?;
        }

        Ok(image_count)
    }
}
