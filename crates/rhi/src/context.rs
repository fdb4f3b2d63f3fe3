//! The Vulkan implementation of [`GpuContext`].
//!
//! [`VulkanContext`] owns the instance, the surface, the logical device and
//! one resettable command pool. Every trait call maps onto the matching
//! `ash` call with the context's allocation callbacks; the renderer owns
//! everything created through it and destroys it before the context drops.

use std::ffi::{CString, c_char};

use ash::vk;
use tracing::{debug, info};

use crate::descriptor::{DescriptorBinding, DescriptorWrite};
use crate::device::{Device, required_device_extensions};
use crate::error::{RhiError, RhiResult};
use crate::gpu::{
    AcquireOutcome, ExternalMemoryHandle, FrameSubmit, GpuContext, ImageBarrier, ImageDesc,
    PresentOutcome, RenderPassBegin, RenderPassDesc, SwapchainImages, SwapchainPlan,
};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, select_physical_device};
use crate::pipeline::GraphicsPipelineDesc;
use crate::shader::spirv_words;
use crate::swapchain;

#[cfg(unix)]
const EXTERNAL_HANDLE_TYPE: vk::ExternalMemoryHandleTypeFlags =
    vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD;
#[cfg(windows)]
const EXTERNAL_HANDLE_TYPE: vk::ExternalMemoryHandleTypeFlags =
    vk::ExternalMemoryHandleTypeFlags::OPAQUE_WIN32;
#[cfg(not(any(unix, windows)))]
const EXTERNAL_HANDLE_TYPE: vk::ExternalMemoryHandleTypeFlags =
    vk::ExternalMemoryHandleTypeFlags::empty();

const COLOR_SUBRESOURCE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Options for [`VulkanContext::new`].
#[derive(Clone, Debug)]
pub struct VulkanContextDesc {
    pub app_name: CString,
    pub enable_validation: bool,
    /// Require the platform's external-memory extension so render targets
    /// can be exported
    pub enable_interop: bool,
    pub preferred_present_mode: vk::PresentModeKHR,
    /// Passed to every create/destroy call
    pub allocation_callbacks: Option<vk::AllocationCallbacks<'static>>,
}

impl Default for VulkanContextDesc {
    fn default() -> Self {
        Self {
            app_name: c"vkinterop".to_owned(),
            enable_validation: cfg!(debug_assertions),
            enable_interop: false,
            preferred_present_mode: vk::PresentModeKHR::MAILBOX,
            allocation_callbacks: None,
        }
    }
}

enum ExternalMemoryLoader {
    #[cfg(unix)]
    Fd(ash::khr::external_memory_fd::Device),
    #[cfg(windows)]
    Win32(ash::khr::external_memory_win32::Device),
}

/// A live Vulkan device bound to one presentation surface.
pub struct VulkanContext {
    allocation_callbacks: Option<vk::AllocationCallbacks<'static>>,
    preferred_present_mode: vk::PresentModeKHR,
    physical_device: PhysicalDeviceInfo,
    command_pool: vk::CommandPool,
    external_memory: Option<ExternalMemoryLoader>,
    swapchain_loader: ash::khr::swapchain::Device,
    device: Device,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    // Dropped last, after `Drop::drop` has torn down everything above
    instance: Instance,
}

impl VulkanContext {
    /// Brings up the instance, surface, device and command pool.
    ///
    /// `create_surface` is handed the loaded entry and instance; the window
    /// layer uses it to create a surface for its native window.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. Objects created before the
    /// failure are destroyed.
    pub fn new<F>(
        desc: VulkanContextDesc,
        surface_extensions: &[*const c_char],
        create_surface: F,
    ) -> RhiResult<Self>
    where
        F: FnOnce(&ash::Entry, &ash::Instance) -> RhiResult<vk::SurfaceKHR>,
    {
        let instance = Instance::new(&desc.app_name, desc.enable_validation, surface_extensions)?;
        let callbacks = desc.allocation_callbacks.as_ref();

        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let surface = create_surface(instance.entry(), instance.handle())?;

        let extensions = required_device_extensions(desc.enable_interop);
        let device_result = select_physical_device(
            instance.handle(),
            surface,
            &surface_loader,
            &extensions,
        )
        .and_then(|info| {
            Device::new(&instance, &info, &extensions, callbacks).map(|device| (info, device))
        });
        let (physical_device, mut device) = match device_result {
            Ok(pair) => pair,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(physical_device.queue_families.graphics_family.unwrap_or_default());
        let command_pool = match unsafe { device.handle().create_command_pool(&pool_info, callbacks) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe {
                    device.destroy(callbacks);
                    surface_loader.destroy_surface(surface, None);
                }
                return Err(e.into());
            }
        };

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let external_memory = if desc.enable_interop {
            external_memory_loader(&instance, &device)
        } else {
            None
        };

        info!(
            gpu = physical_device.device_name(),
            interop = external_memory.is_some(),
            "Vulkan context ready"
        );

        Ok(Self {
            allocation_callbacks: desc.allocation_callbacks,
            preferred_present_mode: desc.preferred_present_mode,
            physical_device,
            command_pool,
            external_memory,
            swapchain_loader,
            device,
            surface,
            surface_loader,
            instance,
        })
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    #[inline]
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    #[inline]
    pub fn has_validation(&self) -> bool {
        self.instance.has_validation()
    }

    #[inline]
    pub fn interop_enabled(&self) -> bool {
        self.external_memory.is_some()
    }

    #[inline]
    fn callbacks(&self) -> Option<&vk::AllocationCallbacks<'static>> {
        self.allocation_callbacks.as_ref()
    }

    #[inline]
    fn raw(&self) -> &ash::Device {
        self.device.handle()
    }

    fn require_interop(&self) -> RhiResult<&ExternalMemoryLoader> {
        self.external_memory.as_ref().ok_or_else(|| {
            RhiError::ExternalMemory("external memory was not enabled for this context".into())
        })
    }
}

fn external_memory_loader(instance: &Instance, device: &Device) -> Option<ExternalMemoryLoader> {
    #[cfg(unix)]
    {
        Some(ExternalMemoryLoader::Fd(
            ash::khr::external_memory_fd::Device::new(instance.handle(), device.handle()),
        ))
    }
    #[cfg(windows)]
    {
        Some(ExternalMemoryLoader::Win32(
            ash::khr::external_memory_win32::Device::new(instance.handle(), device.handle()),
        ))
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (instance, device);
        None
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        let callbacks = self.allocation_callbacks;
        unsafe {
            if let Err(e) = self.device.wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {e}");
            }
            self.device
                .handle()
                .destroy_command_pool(self.command_pool, callbacks.as_ref());
            self.device.destroy(callbacks.as_ref());
            self.surface_loader.destroy_surface(self.surface, None);
        }
        debug!("Vulkan context torn down");
    }
}

impl GpuContext for VulkanContext {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.physical_device.memory_properties
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RhiResult<vk::Buffer> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        Ok(unsafe { self.raw().create_buffer(&info, self.callbacks())? })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.raw().destroy_buffer(buffer, self.callbacks()) };
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.raw().get_buffer_memory_requirements(buffer) }
    }

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image> {
        let mut external_info =
            vk::ExternalMemoryImageCreateInfo::default().handle_types(EXTERNAL_HANDLE_TYPE);
        let mut info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        if desc.exportable {
            self.require_interop()?;
            info = info.push_next(&mut external_info);
        }
        Ok(unsafe { self.raw().create_image(&info, self.callbacks())? })
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.raw().destroy_image(image, self.callbacks()) };
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.raw().get_image_memory_requirements(image) }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
        exportable: bool,
    ) -> RhiResult<vk::DeviceMemory> {
        let mut export_info =
            vk::ExportMemoryAllocateInfo::default().handle_types(EXTERNAL_HANDLE_TYPE);
        let mut info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        if exportable {
            self.require_interop()?;
            info = info.push_next(&mut export_info);
        }
        Ok(unsafe { self.raw().allocate_memory(&info, self.callbacks())? })
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.raw().free_memory(memory, self.callbacks()) };
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> RhiResult<()> {
        unsafe { self.raw().bind_buffer_memory(buffer, memory, 0)? };
        Ok(())
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> RhiResult<()> {
        unsafe { self.raw().bind_image_memory(image, memory, 0)? };
        Ok(())
    }

    fn write_memory(&self, memory: vk::DeviceMemory, bytes: &[u8]) -> RhiResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        unsafe {
            let ptr = self.raw().map_memory(
                memory,
                0,
                bytes.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.raw().unmap_memory(memory);
        }
        Ok(())
    }

    fn export_memory_handle(&self, memory: vk::DeviceMemory) -> RhiResult<ExternalMemoryHandle> {
        match self.require_interop()? {
            #[cfg(unix)]
            ExternalMemoryLoader::Fd(loader) => {
                let info = vk::MemoryGetFdInfoKHR::default()
                    .memory(memory)
                    .handle_type(EXTERNAL_HANDLE_TYPE);
                let fd = unsafe { loader.get_memory_fd(&info) }
                    .map_err(|e| RhiError::ExternalMemory(format!("vkGetMemoryFdKHR: {e}")))?;
                Ok(ExternalMemoryHandle::Fd(fd))
            }
            #[cfg(windows)]
            ExternalMemoryLoader::Win32(loader) => {
                let info = vk::MemoryGetWin32HandleInfoKHR::default()
                    .memory(memory)
                    .handle_type(EXTERNAL_HANDLE_TYPE);
                let handle = unsafe { loader.get_memory_win32_handle(&info) }.map_err(|e| {
                    RhiError::ExternalMemory(format!("vkGetMemoryWin32HandleKHR: {e}"))
                })?;
                Ok(ExternalMemoryHandle::Win32(handle as isize))
            }
        }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> RhiResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(COLOR_SUBRESOURCE);
        Ok(unsafe { self.raw().create_image_view(&info, self.callbacks())? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.raw().destroy_image_view(view, self.callbacks()) };
    }

    fn create_sampler(&self) -> RhiResult<vk::Sampler> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(self.physical_device.sampler_anisotropy())
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(0.0);
        Ok(unsafe { self.raw().create_sampler(&info, self.callbacks())? })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.raw().destroy_sampler(sampler, self.callbacks()) };
    }

    fn create_shader_module(&self, spirv: &[u8]) -> RhiResult<vk::ShaderModule> {
        let words = spirv_words(spirv)?;
        let info = vk::ShaderModuleCreateInfo::default().code(&words);
        unsafe { self.raw().create_shader_module(&info, self.callbacks()) }
            .map_err(|e| RhiError::Shader(format!("Failed to create shader module: {e}")))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.raw().destroy_shader_module(module, self.callbacks()) };
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let vk_bindings: Vec<_> = bindings.iter().map(|b| b.to_vk()).collect();
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        Ok(unsafe {
            self.raw()
                .create_descriptor_set_layout(&info, self.callbacks())?
        })
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe {
            self.raw()
                .destroy_descriptor_set_layout(layout, self.callbacks())
        };
    }

    fn create_pipeline_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::PipelineLayout> {
        let set_layouts = [set_layout];
        let info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        Ok(unsafe { self.raw().create_pipeline_layout(&info, self.callbacks())? })
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.raw().destroy_pipeline_layout(layout, self.callbacks()) };
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<vk::Pipeline> {
        desc.create(self.raw(), self.callbacks())
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.raw().destroy_pipeline(pipeline, self.callbacks()) };
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass> {
        let attachments = [vk::AttachmentDescription::default()
            .format(desc.color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(desc.load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(desc.final_layout)];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&desc.dependencies);
        Ok(unsafe { self.raw().create_render_pass(&info, self.callbacks())? })
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.raw().destroy_render_pass(render_pass, self.callbacks()) };
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachment: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer> {
        let attachments = [attachment];
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        Ok(unsafe { self.raw().create_framebuffer(&info, self.callbacks())? })
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.raw().destroy_framebuffer(framebuffer, self.callbacks()) };
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(sizes);
        Ok(unsafe { self.raw().create_descriptor_pool(&info, self.callbacks())? })
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.raw().destroy_descriptor_pool(pool, self.callbacks()) };
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let layouts = vec![layout; count];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        Ok(unsafe { self.raw().allocate_descriptor_sets(&info)? })
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::UniformBuffer { buffer, range, .. } => {
                    vk::DescriptorBufferInfo::default()
                        .buffer(buffer)
                        .offset(0)
                        .range(range)
                }
                DescriptorWrite::CombinedImageSampler { .. } => {
                    vk::DescriptorBufferInfo::default()
                }
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::CombinedImageSampler {
                    view,
                    sampler,
                    layout,
                    ..
                } => vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .sampler(sampler)
                    .image_layout(layout),
                DescriptorWrite::UniformBuffer { .. } => vk::DescriptorImageInfo::default(),
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, write)| {
                let base = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding())
                    .dst_array_element(0)
                    .descriptor_type(write.descriptor_type());
                match write {
                    DescriptorWrite::UniformBuffer { .. } => {
                        base.buffer_info(std::slice::from_ref(&buffer_infos[i]))
                    }
                    DescriptorWrite::CombinedImageSampler { .. } => {
                        base.image_info(std::slice::from_ref(&image_infos[i]))
                    }
                }
            })
            .collect();

        unsafe { self.raw().update_descriptor_sets(&vk_writes, &[]) };
    }

    fn allocate_command_buffers(&self, count: usize) -> RhiResult<Vec<vk::CommandBuffer>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        Ok(unsafe { self.raw().allocate_command_buffers(&info)? })
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        if command_buffers.is_empty() {
            return;
        }
        unsafe {
            self.raw()
                .free_command_buffers(self.command_pool, command_buffers)
        };
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        one_time_submit: bool,
    ) -> RhiResult<()> {
        let flags = if one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.raw().begin_command_buffer(command_buffer, &info)? };
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.raw().end_command_buffer(command_buffer)? };
        Ok(())
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: begin.clear_color,
            },
        }];
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: begin.extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.raw()
                .cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.raw().cmd_end_render_pass(command_buffer) };
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.raw()
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline)
        };
    }

    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe {
            self.raw()
                .cmd_bind_vertex_buffers(command_buffer, 0, &[buffer], &[0])
        };
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.raw()
                .cmd_bind_index_buffer(command_buffer, buffer, 0, index_type)
        };
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.raw().cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            )
        };
    }

    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32) {
        unsafe {
            self.raw()
                .cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0)
        };
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe { self.raw().cmd_copy_buffer(command_buffer, src, dst, &[region]) };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    ) {
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        unsafe {
            self.raw().cmd_copy_buffer_to_image(
                command_buffer,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }

    fn cmd_image_barrier(&self, command_buffer: vk::CommandBuffer, barrier: &ImageBarrier) {
        let image_barrier = vk::ImageMemoryBarrier::default()
            .old_layout(barrier.old_layout)
            .new_layout(barrier.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(barrier.image)
            .subresource_range(COLOR_SUBRESOURCE)
            .src_access_mask(barrier.src_access)
            .dst_access_mask(barrier.dst_access);
        unsafe {
            self.raw().cmd_pipeline_barrier(
                command_buffer,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            )
        };
    }

    fn submit_one_shot(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let command_buffers = [command_buffer];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
        let queue = self.device.graphics_queue();
        unsafe {
            self.raw().queue_submit(queue, &[submit], vk::Fence::null())?;
            self.raw().queue_wait_idle(queue)?;
        }
        Ok(())
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.raw().create_semaphore(&info, self.callbacks())? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.raw().destroy_semaphore(semaphore, self.callbacks()) };
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.raw().create_fence(&info, self.callbacks())? })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.raw().destroy_fence(fence, self.callbacks()) };
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RhiResult<()> {
        match unsafe { self.raw().wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::Timeout {
                what: format!("fence {fence:?}"),
                timeout_ns,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        unsafe { self.raw().reset_fences(&[fence])? };
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    fn create_swapchain(&self, desired_extent: vk::Extent2D) -> RhiResult<SwapchainImages> {
        swapchain::create_swapchain(
            &self.swapchain_loader,
            &self.surface_loader,
            &self.device,
            self.surface,
            desired_extent,
            self.preferred_present_mode,
            vk::SwapchainKHR::null(),
            self.callbacks(),
        )
    }

    fn swapchain_plan(&self, desired_extent: vk::Extent2D) -> RhiResult<SwapchainPlan> {
        swapchain::query_swapchain_plan(
            &self.surface_loader,
            self.device.physical_device(),
            self.surface,
            desired_extent,
        )
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(swapchain, self.callbacks())
        };
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> RhiResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(RhiError::Timeout {
                what: "swapchain image".to_string(),
                timeout_ns,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn queue_submit(&self, submit: &FrameSubmit) -> RhiResult<()> {
        let wait_semaphores = [submit.wait_semaphore];
        let wait_stages = [submit.wait_stage];
        let command_buffers = [submit.command_buffer];
        let signal_semaphores = [submit.signal_semaphore];
        let info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.raw()
                .queue_submit(self.device.graphics_queue(), &[info], submit.fence)?
        };
        Ok(())
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.device.present_queue(), &info)
        };
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }
}
