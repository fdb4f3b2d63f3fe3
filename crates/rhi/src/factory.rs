//! GPU resource factory.
//!
//! Free functions over any [`GpuContext`] that allocate buffers and images
//! with explicitly selected memory types, copy CPU data into host-visible
//! memory, and run one-shot transfer and layout-transition command buffers.
//!
//! Every allocation follows the same sequence: create the resource, query its
//! memory requirements, pick a memory type with [`find_memory_type`], allocate
//! and bind once at offset 0. Nothing is rebound afterwards.
//!
//! One-shot transfers are fully synchronous: the command buffer is allocated,
//! recorded, submitted and waited on before it is freed. They are meant for
//! init and rebuild paths only.

use ash::vk;
use tracing::{debug, trace};

use crate::error::{RhiError, RhiResult};
use crate::gpu::{GpuContext, ImageBarrier, ImageDesc};

/// A buffer together with its dedicated memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferAllocation {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    /// Requested size, not the (possibly larger) allocation size
    pub size: vk::DeviceSize,
    pub properties: vk::MemoryPropertyFlags,
}

/// An image together with its dedicated memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageAllocation {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    /// Size the driver required for the image
    pub size: vk::DeviceSize,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub exportable: bool,
}

/// Index of the first memory type allowed by `type_bits` whose flags contain
/// all of `properties`.
///
/// # Errors
///
/// [`RhiError::NoSuitableMemoryType`] when no type qualifies.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> RhiResult<u32> {
    let count = memory_properties.memory_type_count as usize;
    memory_properties.memory_types[..count.min(vk::MAX_MEMORY_TYPES)]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(index, _)| index as u32)
        .ok_or(RhiError::NoSuitableMemoryType {
            type_bits,
            properties,
        })
}

/// Allocates memory for `requirements` and binds it with `bind`. On failure
/// nothing is left allocated.
fn allocate_and_bind<G, F>(
    gpu: &G,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
    exportable: bool,
    bind: F,
) -> RhiResult<vk::DeviceMemory>
where
    G: GpuContext + ?Sized,
    F: FnOnce(vk::DeviceMemory) -> RhiResult<()>,
{
    let type_index = find_memory_type(
        &gpu.memory_properties(),
        requirements.memory_type_bits,
        properties,
    )?;
    let memory = gpu.allocate_memory(requirements.size, type_index, exportable)?;
    if let Err(e) = bind(memory) {
        gpu.free_memory(memory);
        return Err(e);
    }
    Ok(memory)
}

/// Creates a buffer with dedicated memory of the given properties.
pub fn create_buffer<G: GpuContext + ?Sized>(
    gpu: &G,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> RhiResult<BufferAllocation> {
    let buffer = gpu.create_buffer(size, usage)?;
    let requirements = gpu.buffer_memory_requirements(buffer);

    let memory = match allocate_and_bind(gpu, requirements, properties, false, |memory| {
        gpu.bind_buffer_memory(buffer, memory)
    }) {
        Ok(memory) => memory,
        Err(e) => {
            gpu.destroy_buffer(buffer);
            return Err(e);
        }
    };

    trace!(size, ?usage, ?properties, "Created buffer");

    Ok(BufferAllocation {
        buffer,
        memory,
        size,
        properties,
    })
}

/// Destroys the buffer, then frees its memory.
pub fn destroy_buffer<G: GpuContext + ?Sized>(gpu: &G, allocation: BufferAllocation) {
    gpu.destroy_buffer(allocation.buffer);
    gpu.free_memory(allocation.memory);
}

/// Copies `bytes` to the start of a host-visible, host-coherent buffer.
///
/// # Errors
///
/// [`RhiError::MemoryNotHostVisible`] for device-local memory and
/// [`RhiError::WriteOutOfBounds`] when `bytes` is larger than the buffer.
pub fn copy_cpu_data_to_buffer<G: GpuContext + ?Sized>(
    gpu: &G,
    allocation: &BufferAllocation,
    bytes: &[u8],
) -> RhiResult<()> {
    let host_access = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    if !allocation.properties.contains(host_access) {
        return Err(RhiError::MemoryNotHostVisible);
    }
    if bytes.len() as vk::DeviceSize > allocation.size {
        return Err(RhiError::WriteOutOfBounds {
            len: bytes.len(),
            capacity: allocation.size,
        });
    }
    gpu.write_memory(allocation.memory, bytes)
}

/// Creates a device-local image with dedicated memory.
pub fn create_image<G: GpuContext + ?Sized>(
    gpu: &G,
    desc: &ImageDesc,
) -> RhiResult<ImageAllocation> {
    let image = gpu.create_image(desc)?;
    let requirements = gpu.image_memory_requirements(image);

    let memory = match allocate_and_bind(
        gpu,
        requirements,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        desc.exportable,
        |memory| gpu.bind_image_memory(image, memory),
    ) {
        Ok(memory) => memory,
        Err(e) => {
            gpu.destroy_image(image);
            return Err(e);
        }
    };

    debug!(
        width = desc.extent.width,
        height = desc.extent.height,
        format = ?desc.format,
        exportable = desc.exportable,
        "Created image"
    );

    Ok(ImageAllocation {
        image,
        memory,
        size: requirements.size,
        extent: desc.extent,
        format: desc.format,
        exportable: desc.exportable,
    })
}

/// Destroys the image, then frees its memory.
pub fn destroy_image<G: GpuContext + ?Sized>(gpu: &G, allocation: ImageAllocation) {
    gpu.destroy_image(allocation.image);
    gpu.free_memory(allocation.memory);
}

/// Creates a 2D color view covering the whole image.
pub fn create_image_view<G: GpuContext + ?Sized>(
    gpu: &G,
    image: vk::Image,
    format: vk::Format,
) -> RhiResult<vk::ImageView> {
    gpu.create_image_view(image, format)
}

/// Records `record` into a fresh command buffer, submits it and waits.
fn one_shot<G, F>(gpu: &G, record: F) -> RhiResult<()>
where
    G: GpuContext + ?Sized,
    F: FnOnce(vk::CommandBuffer),
{
    let command_buffers = gpu.allocate_command_buffers(1)?;
    let result = command_buffers
        .first()
        .copied()
        .ok_or_else(|| RhiError::InvalidHandle("no command buffer allocated".to_string()))
        .and_then(|cb| {
            gpu.begin_command_buffer(cb, true)?;
            record(cb);
            gpu.end_command_buffer(cb)?;
            gpu.submit_one_shot(cb)
        });
    gpu.free_command_buffers(&command_buffers);
    result
}

/// Copies `size` bytes from `src` to `dst`, blocking until done.
pub fn copy_buffer<G: GpuContext + ?Sized>(
    gpu: &G,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> RhiResult<()> {
    one_shot(gpu, |cb| gpu.cmd_copy_buffer(cb, src, dst, size))
}

/// Copies tightly packed texels into `image`, which must be in
/// `TRANSFER_DST_OPTIMAL`. Blocks until done.
pub fn copy_buffer_to_image<G: GpuContext + ?Sized>(
    gpu: &G,
    buffer: vk::Buffer,
    image: vk::Image,
    extent: vk::Extent2D,
) -> RhiResult<()> {
    one_shot(gpu, |cb| gpu.cmd_copy_buffer_to_image(cb, buffer, image, extent))
}

/// The barrier for one of the two supported layout transitions.
///
/// | old | new | src | dst |
/// |---|---|---|---|
/// | `UNDEFINED` | `TRANSFER_DST_OPTIMAL` | top of pipe, none | transfer, transfer write |
/// | `TRANSFER_DST_OPTIMAL` | `SHADER_READ_ONLY_OPTIMAL` | transfer, transfer write | fragment shader, shader read |
pub fn layout_transition_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> RhiResult<ImageBarrier> {
    let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        (old, new) => return Err(RhiError::UnsupportedTransition { old, new }),
    };

    Ok(ImageBarrier {
        image,
        old_layout,
        new_layout,
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Transitions a color image between layouts with a one-shot barrier.
///
/// # Errors
///
/// [`RhiError::UnsupportedTransition`] for anything outside the table in
/// [`layout_transition_barrier`]; no command buffer is allocated then.
pub fn transition_image_layout<G: GpuContext + ?Sized>(
    gpu: &G,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> RhiResult<()> {
    let barrier = layout_transition_barrier(image, old_layout, new_layout)?;
    one_shot(gpu, |cb| gpu.cmd_image_barrier(cb, &barrier))
}

/// Uploads `bytes` into a new device-local buffer through a temporary
/// staging buffer. `usage` gets `TRANSFER_DST` added.
pub fn create_device_local_buffer<G: GpuContext + ?Sized>(
    gpu: &G,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> RhiResult<BufferAllocation> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = create_staging_buffer(gpu, bytes)?;

    let result = create_buffer(
        gpu,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .and_then(|device_local| match copy_buffer(gpu, staging.buffer, device_local.buffer, size) {
        Ok(()) => Ok(device_local),
        Err(e) => {
            destroy_buffer(gpu, device_local);
            Err(e)
        }
    });

    destroy_buffer(gpu, staging);
    result
}

/// Host-visible `TRANSFER_SRC` buffer filled with `bytes`.
pub fn create_staging_buffer<G: GpuContext + ?Sized>(
    gpu: &G,
    bytes: &[u8],
) -> RhiResult<BufferAllocation> {
    let staging = create_buffer(
        gpu,
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    if let Err(e) = copy_cpu_data_to_buffer(gpu, &staging, bytes) {
        destroy_buffer(gpu, staging);
        return Err(e);
    }
    Ok(staging)
}
