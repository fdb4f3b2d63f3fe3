//! The GPU context seam.
//!
//! [`GpuContext`] is the narrow set of device operations the renderer needs.
//! Handles are plain `vk` handle types, so the real backend passes them
//! through untouched while the headless backend mints its own.

use ash::vk;

use crate::descriptor::{DescriptorBinding, DescriptorWrite};
use crate::error::RhiResult;
use crate::pipeline::GraphicsPipelineDesc;

/// Parameters for a 2D, single-mip, single-layer image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub tiling: vk::ImageTiling,
    /// Create the image (and later its memory) with an external-memory handle type
    pub exportable: bool,
}

impl ImageDesc {
    pub fn new(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            tiling: vk::ImageTiling::OPTIMAL,
            exportable: false,
        }
    }

    pub fn exportable(mut self, exportable: bool) -> Self {
        self.exportable = exportable;
        self
    }
}

/// A render pass with one color attachment and one subpass.
#[derive(Clone, Debug)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub final_layout: vk::ImageLayout,
    pub dependencies: Vec<vk::SubpassDependency>,
}

/// Arguments for beginning a render pass instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// A color image layout transition recorded as a pipeline barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// One per-frame submission to the graphics queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSubmit {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

/// A freshly created swapchain and the images it owns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapchainImages {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
}

/// What [`GpuContext::create_swapchain`] would produce for the surface as it
/// is right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl SwapchainPlan {
    /// A minimized window reports a zero-area surface.
    #[inline]
    pub fn is_zero_area(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }
}

/// Result of asking the swapchain for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// Suboptimal and out-of-date both call for a swapchain rebuild.
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// OS handle exported from a device memory allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExternalMemoryHandle {
    /// POSIX file descriptor (`VK_KHR_external_memory_fd`)
    Fd(i32),
    /// Windows NT handle (`VK_KHR_external_memory_win32`)
    Win32(isize),
}

/// Device operations used by the renderer.
///
/// Destroy/free calls accept null handles and ignore them. `cmd_*` calls
/// record into a command buffer that is between `begin_command_buffer` and
/// `end_command_buffer`.
pub trait GpuContext {
    // ---- memory, buffers, images ----

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RhiResult<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;

    /// Allocate `size` bytes from `memory_type_index`; `exportable` requests
    /// the platform's external-memory handle type.
    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
        exportable: bool,
    ) -> RhiResult<vk::DeviceMemory>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> RhiResult<()>;
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> RhiResult<()>;

    /// Map, copy `bytes` to offset 0, unmap.
    fn write_memory(&self, memory: vk::DeviceMemory, bytes: &[u8]) -> RhiResult<()>;
    fn export_memory_handle(&self, memory: vk::DeviceMemory) -> RhiResult<ExternalMemoryHandle>;

    // ---- views, samplers, shaders, layouts ----

    fn create_image_view(&self, image: vk::Image, format: vk::Format)
    -> RhiResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_sampler(&self) -> RhiResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);
    fn create_shader_module(&self, spirv: &[u8]) -> RhiResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> RhiResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_pipeline_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    // ---- pipelines, passes, descriptors ----

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachment: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool>;
    /// Destroys the pool and every set allocated from it.
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> RhiResult<Vec<vk::DescriptorSet>>;
    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);

    // ---- command buffers ----

    fn allocate_command_buffers(&self, count: usize) -> RhiResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);
    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        one_time_submit: bool,
    ) -> RhiResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin);
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    );
    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );
    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32);
    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    );
    /// Copy tightly packed texels into a color image in `TRANSFER_DST_OPTIMAL`.
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    );
    fn cmd_image_barrier(&self, command_buffer: vk::CommandBuffer, barrier: &ImageBarrier);

    /// Submit a recorded command buffer and block until the queue drains.
    fn submit_one_shot(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    // ---- synchronization ----

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Returns [`RhiError::Timeout`](crate::RhiError::Timeout) when the fence
    /// does not signal within `timeout_ns`.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RhiResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;
    fn wait_idle(&self) -> RhiResult<()>;

    // ---- presentation ----

    /// Create a swapchain for the context's surface. `desired_extent` is used
    /// only when the surface leaves the extent up to the application.
    fn create_swapchain(&self, desired_extent: vk::Extent2D) -> RhiResult<SwapchainImages>;
    /// Query the extent and image count `create_swapchain` would use for
    /// `desired_extent`, without creating anything.
    fn swapchain_plan(&self, desired_extent: vk::Extent2D) -> RhiResult<SwapchainPlan>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> RhiResult<AcquireOutcome>;
    fn queue_submit(&self, submit: &FrameSubmit) -> RhiResult<()>;
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RhiResult<PresentOutcome>;
}
