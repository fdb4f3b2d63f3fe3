//! Hardware-free GPU context.
//!
//! [`HeadlessContext`] implements [`GpuContext`] without touching a device.
//! It mints unique non-null handles, tracks which objects are alive,
//! and appends every call to an event log that tests can inspect. The
//! rules it enforces mirror the Vulkan valid-usage rules the renderer relies on:
//!
//! - memory is bound to a resource exactly once
//! - CPU writes only go to host-visible, host-coherent memory
//! - a fence must be unsignaled when submitted and not pending when reset
//! - descriptor pools hand out at most `max_sets` sets
//! - objects are created from live parents (no use-after-destroy)
//!
//! Misuse from infallible calls (destroys, `cmd_*`) is collected in
//! [`HeadlessContext::violations`] instead of panicking.
//!
//! Submitted work completes when its fence is waited on, unless
//! `hang_fences` is set, in which case pending fences never signal and waits
//! return [`RhiError::Timeout`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk::{self, Handle};
use tracing::trace;

use crate::descriptor::{DescriptorBinding, DescriptorWrite};
use crate::error::{RhiError, RhiResult};
use crate::gpu::{
    AcquireOutcome, ExternalMemoryHandle, FrameSubmit, GpuContext, ImageBarrier, ImageDesc,
    PresentOutcome, RenderPassBegin, RenderPassDesc, SwapchainImages, SwapchainPlan,
};
use crate::pipeline::GraphicsPipelineDesc;
use crate::shader::spirv_words;

const REQUIREMENT_ALIGNMENT: vk::DeviceSize = 256;

/// Kinds of objects tracked by the headless context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Buffer,
    Image,
    Memory,
    ImageView,
    Sampler,
    ShaderModule,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    RenderPass,
    Framebuffer,
    DescriptorPool,
    DescriptorSet,
    CommandBuffer,
    Semaphore,
    Fence,
    Swapchain,
}

/// One recorded call. Handles are raw `u64` values (`Handle::as_raw`).
#[derive(Clone, Debug, PartialEq)]
pub enum GpuEvent {
    Create {
        kind: ObjectKind,
        handle: u64,
    },
    Destroy {
        kind: ObjectKind,
        handle: u64,
    },
    BindMemory {
        resource: u64,
        memory: u64,
    },
    WriteMemory {
        memory: u64,
        len: usize,
    },
    ExportMemory {
        memory: u64,
    },
    UpdateDescriptorSet {
        set: u64,
        writes: Vec<DescriptorWrite>,
    },
    BeginCommandBuffer {
        command_buffer: u64,
    },
    EndCommandBuffer {
        command_buffer: u64,
    },
    BeginRenderPass {
        command_buffer: u64,
        render_pass: u64,
        framebuffer: u64,
        clear_color: [f32; 4],
    },
    EndRenderPass {
        command_buffer: u64,
    },
    BindPipeline {
        command_buffer: u64,
        pipeline: u64,
    },
    BindVertexBuffer {
        command_buffer: u64,
        buffer: u64,
    },
    BindIndexBuffer {
        command_buffer: u64,
        buffer: u64,
        index_type: vk::IndexType,
    },
    BindDescriptorSet {
        command_buffer: u64,
        set: u64,
    },
    DrawIndexed {
        command_buffer: u64,
        index_count: u32,
    },
    CopyBuffer {
        command_buffer: u64,
        src: u64,
        dst: u64,
        size: vk::DeviceSize,
    },
    CopyBufferToImage {
        command_buffer: u64,
        buffer: u64,
        image: u64,
    },
    ImageBarrier {
        command_buffer: u64,
        image: u64,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    SubmitOneShot {
        command_buffer: u64,
    },
    WaitFence {
        fence: u64,
        /// Whether submitted work was still outstanding on the fence
        pending: bool,
    },
    ResetFence {
        fence: u64,
    },
    WaitIdle,
    Acquire {
        swapchain: u64,
        image_index: Option<u32>,
    },
    Submit {
        command_buffer: u64,
        fence: u64,
    },
    Present {
        image_index: u32,
        outcome: PresentOutcome,
    },
}

impl GpuEvent {
    /// The command buffer a `cmd_*` event was recorded into.
    pub fn command_buffer(&self) -> Option<u64> {
        match *self {
            Self::BeginRenderPass { command_buffer, .. }
            | Self::EndRenderPass { command_buffer }
            | Self::BindPipeline { command_buffer, .. }
            | Self::BindVertexBuffer { command_buffer, .. }
            | Self::BindIndexBuffer { command_buffer, .. }
            | Self::BindDescriptorSet { command_buffer, .. }
            | Self::DrawIndexed { command_buffer, .. }
            | Self::CopyBuffer { command_buffer, .. }
            | Self::CopyBufferToImage { command_buffer, .. }
            | Self::ImageBarrier { command_buffer, .. } => Some(command_buffer),
            _ => None,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Self::Create { .. })
    }

    pub fn is_destroy(&self) -> bool {
        matches!(self, Self::Destroy { .. })
    }
}

/// Knobs for the simulated device and surface.
#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    /// Memory types in index order; every resource accepts every type
    pub memory_types: Vec<vk::MemoryPropertyFlags>,
    /// Images per swapchain
    pub image_count: u32,
    pub surface_format: vk::Format,
    /// Fixed surface extent; `None` follows the requested extent
    pub surface_extent: Option<vk::Extent2D>,
    /// Pending fences never signal
    pub hang_fences: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        Self {
            memory_types: vec![
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                host,
                vk::MemoryPropertyFlags::DEVICE_LOCAL | host,
            ],
            image_count: 3,
            surface_format: vk::Format::B8G8R8A8_SRGB,
            surface_extent: None,
            hang_fences: false,
        }
    }
}

#[derive(Debug)]
struct Allocation {
    size: vk::DeviceSize,
    properties: vk::MemoryPropertyFlags,
    exportable: bool,
}

#[derive(Debug, Default)]
struct FenceState {
    signaled: bool,
    pending: bool,
}

#[derive(Debug)]
struct PoolState {
    max_sets: u32,
    sets: Vec<u64>,
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<u64>,
    next: u32,
}

#[derive(Debug)]
struct State {
    config: HeadlessConfig,
    next_handle: u64,
    next_fd: i32,
    live: HashMap<u64, ObjectKind>,
    events: Vec<GpuEvent>,
    violations: Vec<String>,
    resource_sizes: HashMap<u64, vk::DeviceSize>,
    allocations: HashMap<u64, Allocation>,
    contents: HashMap<u64, Vec<u8>>,
    bound: HashSet<u64>,
    fences: HashMap<u64, FenceState>,
    pools: HashMap<u64, PoolState>,
    swapchains: HashMap<u64, SwapchainState>,
    swapchain_images: HashSet<u64>,
    recording: HashSet<u64>,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
}

impl State {
    fn new(config: HeadlessConfig) -> Self {
        Self {
            config,
            next_handle: 1,
            next_fd: 100,
            live: HashMap::new(),
            events: Vec::new(),
            violations: Vec::new(),
            resource_sizes: HashMap::new(),
            allocations: HashMap::new(),
            contents: HashMap::new(),
            bound: HashSet::new(),
            fences: HashMap::new(),
            pools: HashMap::new(),
            swapchains: HashMap::new(),
            swapchain_images: HashSet::new(),
            recording: HashSet::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
        }
    }

    fn next_raw(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    fn mint(&mut self, kind: ObjectKind) -> u64 {
        let handle = self.next_raw();
        self.live.insert(handle, kind);
        self.events.push(GpuEvent::Create { kind, handle });
        trace!(?kind, handle, "headless create");
        handle
    }

    fn release(&mut self, kind: ObjectKind, handle: u64) -> bool {
        if handle == 0 {
            return false;
        }
        match self.live.get(&handle) {
            Some(&live_kind) if live_kind == kind => {
                self.live.remove(&handle);
                self.events.push(GpuEvent::Destroy { kind, handle });
                trace!(?kind, handle, "headless destroy");
                true
            }
            Some(&live_kind) => {
                self.violations.push(format!(
                    "destroying {handle:#x} as {kind:?} but it is a {live_kind:?}"
                ));
                false
            }
            None => {
                self.violations
                    .push(format!("destroying unknown or already destroyed {kind:?} {handle:#x}"));
                false
            }
        }
    }

    fn is_live(&self, kind: ObjectKind, handle: u64) -> bool {
        self.live.get(&handle) == Some(&kind)
    }

    fn require(&self, kind: ObjectKind, handle: u64) -> RhiResult<()> {
        if self.is_live(kind, handle) {
            Ok(())
        } else {
            Err(RhiError::InvalidHandle(format!(
                "{kind:?} {handle:#x} is not alive"
            )))
        }
    }

    fn require_image(&self, handle: u64) -> RhiResult<()> {
        if self.swapchain_images.contains(&handle) {
            Ok(())
        } else {
            self.require(ObjectKind::Image, handle)
        }
    }

    fn record(&mut self, command_buffer: u64, event: GpuEvent) {
        if !self.recording.contains(&command_buffer) {
            self.violations.push(format!(
                "recording {event:?} into command buffer {command_buffer:#x} that is not recording"
            ));
        }
        self.events.push(event);
    }

    fn bind(&mut self, kind: ObjectKind, resource: u64, memory: u64) -> RhiResult<()> {
        self.require(kind, resource)?;
        self.require(ObjectKind::Memory, memory)?;
        if self.bound.contains(&resource) {
            return Err(RhiError::MemoryAlreadyBound(format!(
                "{kind:?} {resource:#x}"
            )));
        }
        let needed = self.resource_sizes.get(&resource).copied().unwrap_or(0);
        let available = self.allocations.get(&memory).map_or(0, |a| a.size);
        if available < needed {
            return Err(RhiError::InvalidHandle(format!(
                "memory {memory:#x} holds {available} bytes, {kind:?} needs {needed}"
            )));
        }
        self.bound.insert(resource);
        self.events.push(GpuEvent::BindMemory { resource, memory });
        Ok(())
    }

    fn requirements(&self, resource: u64) -> vk::MemoryRequirements {
        let type_count = self.config.memory_types.len().min(32) as u32;
        vk::MemoryRequirements {
            size: self.resource_sizes.get(&resource).copied().unwrap_or(0),
            alignment: REQUIREMENT_ALIGNMENT,
            memory_type_bits: if type_count == 32 {
                u32::MAX
            } else {
                (1u32 << type_count) - 1
            },
        }
    }
}

fn aligned(size: vk::DeviceSize) -> vk::DeviceSize {
    size.div_ceil(REQUIREMENT_ALIGNMENT).max(1) * REQUIREMENT_ALIGNMENT
}

/// GPU context double used by tests and `--headless` runs.
///
/// Clones share one simulated device, so a test can keep a handle for
/// inspection after moving the context into a renderer.
#[derive(Clone, Debug)]
pub struct HeadlessContext {
    state: Arc<Mutex<State>>,
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl HeadlessContext {
    pub fn new(config: HeadlessConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new(config))),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mint<H: Handle>(&self, kind: ObjectKind) -> H {
        H::from_raw(self.state().mint(kind))
    }

    /// Every call recorded so far, in order.
    pub fn events(&self) -> Vec<GpuEvent> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// The events of the most recent recording of `command_buffer`.
    pub fn command_stream(&self, command_buffer: vk::CommandBuffer) -> Vec<GpuEvent> {
        let raw = command_buffer.as_raw();
        let state = self.state();
        let mut stream = Vec::new();
        for event in &state.events {
            match event {
                GpuEvent::BeginCommandBuffer { command_buffer } if *command_buffer == raw => {
                    stream.clear();
                }
                other if other.command_buffer() == Some(raw) => stream.push(other.clone()),
                _ => {}
            }
        }
        stream
    }

    /// All objects that have been created and not destroyed, sorted by kind.
    pub fn live_objects(&self) -> Vec<(ObjectKind, u64)> {
        let mut objects: Vec<_> = self
            .state()
            .live
            .iter()
            .map(|(&handle, &kind)| (kind, handle))
            .collect();
        objects.sort_unstable();
        objects
    }

    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.state().live.values().filter(|&&k| k == kind).count()
    }

    /// Misuse detected in calls that cannot return an error.
    pub fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }

    /// Bytes last written to `memory` by the CPU.
    pub fn memory_contents(&self, memory: vk::DeviceMemory) -> Option<Vec<u8>> {
        self.state().contents.get(&memory.as_raw()).cloned()
    }

    /// Number of images the next swapchain gets.
    pub fn set_image_count(&self, image_count: u32) {
        self.state().config.image_count = image_count;
    }

    pub fn set_surface_extent(&self, extent: Option<vk::Extent2D>) {
        self.state().config.surface_extent = extent;
    }

    pub fn set_hang_fences(&self, hang: bool) {
        self.state().config.hang_fences = hang;
    }

    /// Outcomes returned by the next acquisitions, before falling back to
    /// round-robin image order.
    pub fn script_acquire(&self, outcomes: impl IntoIterator<Item = AcquireOutcome>) {
        self.state().acquire_script.extend(outcomes);
    }

    /// Outcomes returned by the next presents, before falling back to
    /// [`PresentOutcome::Presented`].
    pub fn script_present(&self, outcomes: impl IntoIterator<Item = PresentOutcome>) {
        self.state().present_script.extend(outcomes);
    }
}

impl GpuContext for HeadlessContext {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let state = self.state();
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: state.config.memory_types.len().min(vk::MAX_MEMORY_TYPES) as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(&state.config.memory_types) {
            slot.property_flags = *flags;
            slot.heap_index = 0;
        }
        props.memory_heaps[0].size = 1 << 32;
        props
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
    ) -> RhiResult<vk::Buffer> {
        if size == 0 {
            return Err(RhiError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let mut state = self.state();
        let handle = state.mint(ObjectKind::Buffer);
        state.resource_sizes.insert(handle, aligned(size));
        Ok(vk::Buffer::from_raw(handle))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state();
        let raw = buffer.as_raw();
        if state.release(ObjectKind::Buffer, raw) {
            state.bound.remove(&raw);
            state.resource_sizes.remove(&raw);
        }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        self.state().requirements(buffer.as_raw())
    }

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let mut state = self.state();
        let handle = state.mint(ObjectKind::Image);
        let texels = u64::from(desc.extent.width) * u64::from(desc.extent.height);
        state.resource_sizes.insert(handle, aligned(texels * 4));
        Ok(vk::Image::from_raw(handle))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state();
        let raw = image.as_raw();
        if state.release(ObjectKind::Image, raw) {
            state.bound.remove(&raw);
            state.resource_sizes.remove(&raw);
        }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        self.state().requirements(image.as_raw())
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
        exportable: bool,
    ) -> RhiResult<vk::DeviceMemory> {
        let mut state = self.state();
        let properties = state
            .config
            .memory_types
            .get(memory_type_index as usize)
            .copied()
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("memory type index {memory_type_index} out of range"))
            })?;
        let handle = state.mint(ObjectKind::Memory);
        state.allocations.insert(
            handle,
            Allocation {
                size,
                properties,
                exportable,
            },
        );
        Ok(vk::DeviceMemory::from_raw(handle))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state();
        let raw = memory.as_raw();
        if state.release(ObjectKind::Memory, raw) {
            state.allocations.remove(&raw);
            state.contents.remove(&raw);
        }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> RhiResult<()> {
        self.state()
            .bind(ObjectKind::Buffer, buffer.as_raw(), memory.as_raw())
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> RhiResult<()> {
        self.state()
            .bind(ObjectKind::Image, image.as_raw(), memory.as_raw())
    }

    fn write_memory(&self, memory: vk::DeviceMemory, bytes: &[u8]) -> RhiResult<()> {
        let mut state = self.state();
        let raw = memory.as_raw();
        state.require(ObjectKind::Memory, raw)?;
        let (size, properties) = state
            .allocations
            .get(&raw)
            .map(|a| (a.size, a.properties))
            .unwrap_or_default();
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        if !properties.contains(host) {
            return Err(RhiError::MemoryNotHostVisible);
        }
        if bytes.len() as vk::DeviceSize > size {
            return Err(RhiError::WriteOutOfBounds {
                len: bytes.len(),
                capacity: size,
            });
        }
        state.contents.insert(raw, bytes.to_vec());
        state.events.push(GpuEvent::WriteMemory {
            memory: raw,
            len: bytes.len(),
        });
        Ok(())
    }

    fn export_memory_handle(&self, memory: vk::DeviceMemory) -> RhiResult<ExternalMemoryHandle> {
        let mut state = self.state();
        let raw = memory.as_raw();
        state.require(ObjectKind::Memory, raw)?;
        if !state.allocations.get(&raw).is_some_and(|a| a.exportable) {
            return Err(RhiError::ExternalMemory(format!(
                "memory {raw:#x} was not allocated exportable"
            )));
        }
        let fd = state.next_fd;
        state.next_fd += 1;
        state.events.push(GpuEvent::ExportMemory { memory: raw });
        Ok(ExternalMemoryHandle::Fd(fd))
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        _format: vk::Format,
    ) -> RhiResult<vk::ImageView> {
        let mut state = self.state();
        state.require_image(image.as_raw())?;
        Ok(vk::ImageView::from_raw(state.mint(ObjectKind::ImageView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state().release(ObjectKind::ImageView, view.as_raw());
    }

    fn create_sampler(&self) -> RhiResult<vk::Sampler> {
        Ok(self.mint(ObjectKind::Sampler))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state().release(ObjectKind::Sampler, sampler.as_raw());
    }

    fn create_shader_module(&self, spirv: &[u8]) -> RhiResult<vk::ShaderModule> {
        spirv_words(spirv)?;
        Ok(self.mint(ObjectKind::ShaderModule))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state().release(ObjectKind::ShaderModule, module.as_raw());
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let mut seen = HashSet::new();
        if let Some(dup) = bindings.iter().find(|b| !seen.insert(b.binding)) {
            return Err(RhiError::InvalidHandle(format!(
                "binding {} declared twice",
                dup.binding
            )));
        }
        Ok(self.mint(ObjectKind::DescriptorSetLayout))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state()
            .release(ObjectKind::DescriptorSetLayout, layout.as_raw());
    }

    fn create_pipeline_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::PipelineLayout> {
        let mut state = self.state();
        state.require(ObjectKind::DescriptorSetLayout, set_layout.as_raw())?;
        Ok(vk::PipelineLayout::from_raw(
            state.mint(ObjectKind::PipelineLayout),
        ))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state()
            .release(ObjectKind::PipelineLayout, layout.as_raw());
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<vk::Pipeline> {
        let mut state = self.state();
        state.require(ObjectKind::ShaderModule, desc.vertex_shader.as_raw())?;
        state.require(ObjectKind::ShaderModule, desc.fragment_shader.as_raw())?;
        state.require(ObjectKind::PipelineLayout, desc.layout.as_raw())?;
        state.require(ObjectKind::RenderPass, desc.render_pass.as_raw())?;
        Ok(vk::Pipeline::from_raw(state.mint(ObjectKind::Pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state().release(ObjectKind::Pipeline, pipeline.as_raw());
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> RhiResult<vk::RenderPass> {
        Ok(self.mint(ObjectKind::RenderPass))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state()
            .release(ObjectKind::RenderPass, render_pass.as_raw());
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachment: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer> {
        let mut state = self.state();
        state.require(ObjectKind::RenderPass, render_pass.as_raw())?;
        state.require(ObjectKind::ImageView, attachment.as_raw())?;
        Ok(vk::Framebuffer::from_raw(state.mint(ObjectKind::Framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state()
            .release(ObjectKind::Framebuffer, framebuffer.as_raw());
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        if max_sets == 0 || sizes.iter().any(|s| s.descriptor_count == 0) {
            return Err(RhiError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let mut state = self.state();
        let handle = state.mint(ObjectKind::DescriptorPool);
        state.pools.insert(
            handle,
            PoolState {
                max_sets,
                sets: Vec::new(),
            },
        );
        Ok(vk::DescriptorPool::from_raw(handle))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        let raw = pool.as_raw();
        if state.release(ObjectKind::DescriptorPool, raw)
            && let Some(pool_state) = state.pools.remove(&raw)
        {
            for set in pool_state.sets {
                state.release(ObjectKind::DescriptorSet, set);
            }
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state();
        let pool_raw = pool.as_raw();
        state.require(ObjectKind::DescriptorPool, pool_raw)?;
        state.require(ObjectKind::DescriptorSetLayout, layout.as_raw())?;

        let (used, max_sets) = state
            .pools
            .get(&pool_raw)
            .map_or((0, 0), |p| (p.sets.len(), p.max_sets as usize));
        if used + count > max_sets {
            return Err(RhiError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }

        let sets: Vec<u64> = (0..count)
            .map(|_| state.mint(ObjectKind::DescriptorSet))
            .collect();
        if let Some(pool_state) = state.pools.get_mut(&pool_raw) {
            pool_state.sets.extend(&sets);
        }
        Ok(sets.into_iter().map(vk::DescriptorSet::from_raw).collect())
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let mut state = self.state();
        let raw = set.as_raw();
        if !state.is_live(ObjectKind::DescriptorSet, raw) {
            state
                .violations
                .push(format!("updating descriptor set {raw:#x} that is not alive"));
        }
        for write in writes {
            let parent_alive = match *write {
                DescriptorWrite::UniformBuffer { buffer, .. } => {
                    state.is_live(ObjectKind::Buffer, buffer.as_raw())
                }
                DescriptorWrite::CombinedImageSampler { view, sampler, .. } => {
                    state.is_live(ObjectKind::ImageView, view.as_raw())
                        && state.is_live(ObjectKind::Sampler, sampler.as_raw())
                }
            };
            if !parent_alive {
                state
                    .violations
                    .push(format!("descriptor write {write:?} references a dead object"));
            }
        }
        state.events.push(GpuEvent::UpdateDescriptorSet {
            set: raw,
            writes: writes.to_vec(),
        });
    }

    fn allocate_command_buffers(&self, count: usize) -> RhiResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(state.mint(ObjectKind::CommandBuffer)))
            .collect())
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        let mut state = self.state();
        for cb in command_buffers {
            let raw = cb.as_raw();
            state.recording.remove(&raw);
            state.release(ObjectKind::CommandBuffer, raw);
        }
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        _one_time_submit: bool,
    ) -> RhiResult<()> {
        let mut state = self.state();
        let raw = command_buffer.as_raw();
        state.require(ObjectKind::CommandBuffer, raw)?;
        state.recording.insert(raw);
        state.events.push(GpuEvent::BeginCommandBuffer {
            command_buffer: raw,
        });
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        let raw = command_buffer.as_raw();
        if !state.recording.remove(&raw) {
            return Err(RhiError::InvalidHandle(format!(
                "command buffer {raw:#x} is not recording"
            )));
        }
        state.events.push(GpuEvent::EndCommandBuffer {
            command_buffer: raw,
        });
        Ok(())
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin) {
        let raw = command_buffer.as_raw();
        self.state().record(
            raw,
            GpuEvent::BeginRenderPass {
                command_buffer: raw,
                render_pass: begin.render_pass.as_raw(),
                framebuffer: begin.framebuffer.as_raw(),
                clear_color: begin.clear_color,
            },
        );
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        let raw = command_buffer.as_raw();
        self.state().record(
            raw,
            GpuEvent::EndRenderPass {
                command_buffer: raw,
            },
        );
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        let raw = command_buffer.as_raw();
        self.state().record(
            raw,
            GpuEvent::BindPipeline {
                command_buffer: raw,
                pipeline: pipeline.as_raw(),
            },
        );
    }

    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        let raw = command_buffer.as_raw();
        self.state().record(
            raw,
            GpuEvent::BindVertexBuffer {
                command_buffer: raw,
                buffer: buffer.as_raw(),
            },
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    ) {
        let raw = command_buffer.as_raw();
        self.state().record(
            raw,
            GpuEvent::BindIndexBuffer {
                command_buffer: raw,
                buffer: buffer.as_raw(),
                index_type,
            },
        );
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        let raw = command_buffer.as_raw();
        self.state().record(
            raw,
            GpuEvent::BindDescriptorSet {
                command_buffer: raw,
                set: set.as_raw(),
            },
        );
    }

    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32) {
        let raw = command_buffer.as_raw();
        self.state().record(
            raw,
            GpuEvent::DrawIndexed {
                command_buffer: raw,
                index_count,
            },
        );
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        let raw = command_buffer.as_raw();
        self.state().record(
            raw,
            GpuEvent::CopyBuffer {
                command_buffer: raw,
                src: src.as_raw(),
                dst: dst.as_raw(),
                size,
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        image: vk::Image,
        _extent: vk::Extent2D,
    ) {
        let raw = command_buffer.as_raw();
        self.state().record(
            raw,
            GpuEvent::CopyBufferToImage {
                command_buffer: raw,
                buffer: buffer.as_raw(),
                image: image.as_raw(),
            },
        );
    }

    fn cmd_image_barrier(&self, command_buffer: vk::CommandBuffer, barrier: &ImageBarrier) {
        let raw = command_buffer.as_raw();
        self.state().record(
            raw,
            GpuEvent::ImageBarrier {
                command_buffer: raw,
                image: barrier.image.as_raw(),
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
            },
        );
    }

    fn submit_one_shot(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        let raw = command_buffer.as_raw();
        state.require(ObjectKind::CommandBuffer, raw)?;
        if state.recording.contains(&raw) {
            return Err(RhiError::InvalidHandle(format!(
                "command buffer {raw:#x} submitted while recording"
            )));
        }
        state.events.push(GpuEvent::SubmitOneShot {
            command_buffer: raw,
        });
        Ok(())
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        Ok(self.mint(ObjectKind::Semaphore))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state()
            .release(ObjectKind::Semaphore, semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.state();
        let handle = state.mint(ObjectKind::Fence);
        state.fences.insert(
            handle,
            FenceState {
                signaled,
                pending: false,
            },
        );
        Ok(vk::Fence::from_raw(handle))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        let raw = fence.as_raw();
        if state.fences.get(&raw).is_some_and(|f| f.pending) {
            state
                .violations
                .push(format!("destroying fence {raw:#x} with pending work"));
        }
        if state.release(ObjectKind::Fence, raw) {
            state.fences.remove(&raw);
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RhiResult<()> {
        let mut state = self.state();
        let raw = fence.as_raw();
        state.require(ObjectKind::Fence, raw)?;
        let hang = state.config.hang_fences;
        let Some(fence_state) = state.fences.get_mut(&raw) else {
            return Err(RhiError::InvalidHandle(format!("fence {raw:#x} has no state")));
        };

        let pending = fence_state.pending;
        if pending && !hang {
            fence_state.pending = false;
            fence_state.signaled = true;
        }
        let signaled = fence_state.signaled;
        state.events.push(GpuEvent::WaitFence {
            fence: raw,
            pending,
        });

        if signaled {
            Ok(())
        } else {
            Err(RhiError::Timeout {
                what: format!("fence {raw:#x}"),
                timeout_ns,
            })
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        let mut state = self.state();
        let raw = fence.as_raw();
        state.require(ObjectKind::Fence, raw)?;
        if let Some(fence_state) = state.fences.get_mut(&raw) {
            if fence_state.pending {
                return Err(RhiError::InvalidHandle(format!(
                    "fence {raw:#x} reset while its work is pending"
                )));
            }
            fence_state.signaled = false;
        }
        state.events.push(GpuEvent::ResetFence { fence: raw });
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.state();
        if state.config.hang_fences && state.fences.values().any(|f| f.pending) {
            return Err(RhiError::Timeout {
                what: "device idle".to_string(),
                timeout_ns: u64::MAX,
            });
        }
        for fence_state in state.fences.values_mut().filter(|f| f.pending) {
            fence_state.pending = false;
            fence_state.signaled = true;
        }
        state.events.push(GpuEvent::WaitIdle);
        Ok(())
    }

    fn swapchain_plan(&self, desired_extent: vk::Extent2D) -> RhiResult<SwapchainPlan> {
        let state = self.state();
        Ok(SwapchainPlan {
            extent: state.config.surface_extent.unwrap_or(desired_extent),
            image_count: state.config.image_count,
        })
    }

    fn create_swapchain(&self, desired_extent: vk::Extent2D) -> RhiResult<SwapchainImages> {
        let mut state = self.state();
        let extent = state.config.surface_extent.unwrap_or(desired_extent);
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::Swapchain(format!(
                "cannot create a {}x{} swapchain",
                extent.width, extent.height
            )));
        }

        let handle = state.mint(ObjectKind::Swapchain);
        let images: Vec<u64> = (0..state.config.image_count)
            .map(|_| state.next_raw())
            .collect();
        state.swapchain_images.extend(&images);
        state.swapchains.insert(
            handle,
            SwapchainState {
                images: images.clone(),
                next: 0,
            },
        );

        Ok(SwapchainImages {
            handle: vk::SwapchainKHR::from_raw(handle),
            format: state.config.surface_format,
            extent,
            images: images.into_iter().map(vk::Image::from_raw).collect(),
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state();
        let raw = swapchain.as_raw();
        if state.release(ObjectKind::Swapchain, raw)
            && let Some(swapchain_state) = state.swapchains.remove(&raw)
        {
            for image in swapchain_state.images {
                state.swapchain_images.remove(&image);
            }
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        _timeout_ns: u64,
    ) -> RhiResult<AcquireOutcome> {
        let mut state = self.state();
        let raw = swapchain.as_raw();
        state.require(ObjectKind::Swapchain, raw)?;
        state.require(ObjectKind::Semaphore, signal.as_raw())?;

        let outcome = match state.acquire_script.pop_front() {
            Some(outcome) => outcome,
            None => {
                let Some(swapchain_state) = state.swapchains.get_mut(&raw) else {
                    return Err(RhiError::InvalidHandle(format!("swapchain {raw:#x}")));
                };
                let image_count = swapchain_state.images.len() as u32;
                let image_index = swapchain_state.next % image_count.max(1);
                swapchain_state.next = swapchain_state.next.wrapping_add(1);
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            }
        };

        let image_index = match outcome {
            AcquireOutcome::Acquired { image_index, .. } => Some(image_index),
            AcquireOutcome::OutOfDate => None,
        };
        state.events.push(GpuEvent::Acquire {
            swapchain: raw,
            image_index,
        });
        Ok(outcome)
    }

    fn queue_submit(&self, submit: &FrameSubmit) -> RhiResult<()> {
        let mut state = self.state();
        let cb = submit.command_buffer.as_raw();
        let fence = submit.fence.as_raw();
        state.require(ObjectKind::CommandBuffer, cb)?;
        state.require(ObjectKind::Semaphore, submit.wait_semaphore.as_raw())?;
        state.require(ObjectKind::Semaphore, submit.signal_semaphore.as_raw())?;
        state.require(ObjectKind::Fence, fence)?;
        if state.recording.contains(&cb) {
            return Err(RhiError::InvalidHandle(format!(
                "command buffer {cb:#x} submitted while recording"
            )));
        }
        if let Some(fence_state) = state.fences.get_mut(&fence) {
            if fence_state.signaled || fence_state.pending {
                return Err(RhiError::InvalidHandle(format!(
                    "fence {fence:#x} must be unsignaled and idle when submitted"
                )));
            }
            fence_state.pending = true;
        }
        state.events.push(GpuEvent::Submit {
            command_buffer: cb,
            fence,
        });
        Ok(())
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let mut state = self.state();
        state.require(ObjectKind::Swapchain, swapchain.as_raw())?;
        state.require(ObjectKind::Semaphore, wait.as_raw())?;
        let outcome = state
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented);
        state.events.push(GpuEvent::Present {
            image_index,
            outcome,
        });
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique_and_non_null() {
        let gpu = HeadlessContext::default();
        let a = gpu.create_semaphore().unwrap();
        let b = gpu.create_semaphore().unwrap();
        assert_ne!(a, vk::Semaphore::null());
        assert_ne!(a, b);
    }

    #[test]
    fn test_double_destroy_is_a_violation() {
        let gpu = HeadlessContext::default();
        let sampler = gpu.create_sampler().unwrap();
        gpu.destroy_sampler(sampler);
        gpu.destroy_sampler(sampler);
        assert_eq!(gpu.violations().len(), 1);
    }

    #[test]
    fn test_null_destroy_is_ignored() {
        let gpu = HeadlessContext::default();
        gpu.destroy_buffer(vk::Buffer::null());
        assert!(gpu.violations().is_empty());
        assert!(gpu.events().is_empty());
    }

    #[test]
    fn test_fence_must_be_reset_before_submit() {
        let gpu = HeadlessContext::default();
        let fence = gpu.create_fence(true).unwrap();
        let wait = gpu.create_semaphore().unwrap();
        let signal = gpu.create_semaphore().unwrap();
        let cb = gpu.allocate_command_buffers(1).unwrap()[0];
        let submit = FrameSubmit {
            command_buffer: cb,
            wait_semaphore: wait,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: signal,
            fence,
        };

        assert!(gpu.queue_submit(&submit).is_err());
        gpu.reset_fence(fence).unwrap();
        gpu.queue_submit(&submit).unwrap();

        // Pending work completes on wait
        assert!(gpu.reset_fence(fence).is_err());
        gpu.wait_for_fence(fence, u64::MAX).unwrap();
        assert!(gpu.events().contains(&GpuEvent::WaitFence {
            fence: fence.as_raw(),
            pending: true,
        }));
    }

    #[test]
    fn test_hung_fence_times_out() {
        let gpu = HeadlessContext::new(HeadlessConfig {
            hang_fences: true,
            ..HeadlessConfig::default()
        });
        let fence = gpu.create_fence(false).unwrap();
        let err = gpu.wait_for_fence(fence, 1_000).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_descriptor_pool_capacity() {
        let gpu = HeadlessContext::default();
        let layout = gpu
            .create_descriptor_set_layout(&[DescriptorBinding::uniform_buffer(
                0,
                vk::ShaderStageFlags::VERTEX,
            )])
            .unwrap();
        let sizes = crate::descriptor::pool_sizes(2, 0);
        let pool = gpu.create_descriptor_pool(2, &sizes).unwrap();

        assert_eq!(gpu.allocate_descriptor_sets(pool, layout, 2).unwrap().len(), 2);
        assert!(gpu.allocate_descriptor_sets(pool, layout, 1).is_err());

        gpu.destroy_descriptor_pool(pool);
        assert_eq!(gpu.live_count(ObjectKind::DescriptorSet), 0);
        gpu.destroy_descriptor_set_layout(layout);
        assert!(gpu.live_objects().is_empty());
    }

    #[test]
    fn test_round_robin_acquire_and_script() {
        let gpu = HeadlessContext::new(HeadlessConfig {
            image_count: 2,
            ..HeadlessConfig::default()
        });
        let swapchain = gpu
            .create_swapchain(vk::Extent2D {
                width: 64,
                height: 64,
            })
            .unwrap();
        assert_eq!(swapchain.images.len(), 2);
        let semaphore = gpu.create_semaphore().unwrap();

        let indices: Vec<_> = (0..3)
            .map(|_| gpu.acquire_next_image(swapchain.handle, semaphore, 0).unwrap())
            .collect();
        assert_eq!(
            indices,
            vec![
                AcquireOutcome::Acquired { image_index: 0, suboptimal: false },
                AcquireOutcome::Acquired { image_index: 1, suboptimal: false },
                AcquireOutcome::Acquired { image_index: 0, suboptimal: false },
            ]
        );

        gpu.script_acquire([AcquireOutcome::OutOfDate]);
        assert_eq!(
            gpu.acquire_next_image(swapchain.handle, semaphore, 0).unwrap(),
            AcquireOutcome::OutOfDate
        );
    }

    #[test]
    fn test_command_stream_tracks_latest_recording() {
        let gpu = HeadlessContext::default();
        let cb = gpu.allocate_command_buffers(1).unwrap()[0];

        gpu.begin_command_buffer(cb, false).unwrap();
        gpu.cmd_draw_indexed(cb, 3);
        gpu.end_command_buffer(cb).unwrap();

        gpu.begin_command_buffer(cb, false).unwrap();
        gpu.cmd_draw_indexed(cb, 6);
        gpu.end_command_buffer(cb).unwrap();

        assert_eq!(
            gpu.command_stream(cb),
            vec![GpuEvent::DrawIndexed {
                command_buffer: cb.as_raw(),
                index_count: 6,
            }]
        );
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn test_recording_outside_begin_is_a_violation() {
        let gpu = HeadlessContext::default();
        let cb = gpu.allocate_command_buffers(1).unwrap()[0];
        gpu.cmd_draw_indexed(cb, 3);
        assert_eq!(gpu.violations().len(), 1);
    }
}
