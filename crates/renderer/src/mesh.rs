//! Device-local geometry.
//!
//! A [`Mesh`] is a vertex buffer and an index buffer, both uploaded once
//! through a staging buffer and immutable afterwards. Index elements can be
//! 16 or 32 bits wide.

use ash::vk;
use bytemuck::Pod;
use tracing::debug;

use vkinterop_rhi::GpuContext;
use vkinterop_rhi::factory::{self, BufferAllocation};
use vkinterop_rhi::vertex::VertexFormat;

use crate::error::{RendererError, RendererResult};

/// An index element type and the matching `vk::IndexType`.
pub trait IndexElement: Pod {
    const INDEX_TYPE: vk::IndexType;
}

impl IndexElement for u16 {
    const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT16;
}

impl IndexElement for u32 {
    const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT32;
}

/// Vertex and index buffers in device-local memory.
#[derive(Debug)]
pub struct Mesh {
    vertices: BufferAllocation,
    indices: BufferAllocation,
    index_count: u32,
    index_type: vk::IndexType,
}

impl Mesh {
    /// Uploads `vertices` and `indices` through staging buffers.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::InvalidMesh`] for empty input, or the
    /// allocation/transfer error.
    pub fn new<G, V, I>(gpu: &G, vertices: &[V], indices: &[I]) -> RendererResult<Self>
    where
        G: GpuContext + ?Sized,
        V: VertexFormat,
        I: IndexElement,
    {
        if vertices.is_empty() {
            return Err(RendererError::InvalidMesh("no vertices"));
        }
        if indices.is_empty() {
            return Err(RendererError::InvalidMesh("no indices"));
        }
        let index_count =
            u32::try_from(indices.len()).map_err(|_| RendererError::InvalidMesh("too many indices"))?;

        let vertex_buffer = factory::create_device_local_buffer(
            gpu,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = match factory::create_device_local_buffer(
            gpu,
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                factory::destroy_buffer(gpu, vertex_buffer);
                return Err(e.into());
            }
        };

        debug!(
            vertices = vertices.len(),
            indices = index_count,
            index_type = ?I::INDEX_TYPE,
            "Mesh uploaded"
        );

        Ok(Self {
            vertices: vertex_buffer,
            indices: index_buffer,
            index_count,
            index_type: I::INDEX_TYPE,
        })
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    #[inline]
    pub fn index_type(&self) -> vk::IndexType {
        self.index_type
    }

    #[inline]
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertices.buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> vk::Buffer {
        self.indices.buffer
    }

    /// Binds both buffers for an indexed draw.
    pub fn record_bind<G: GpuContext + ?Sized>(&self, gpu: &G, command_buffer: vk::CommandBuffer) {
        gpu.cmd_bind_vertex_buffer(command_buffer, self.vertices.buffer);
        gpu.cmd_bind_index_buffer(command_buffer, self.indices.buffer, self.index_type);
    }

    pub fn destroy<G: GpuContext + ?Sized>(self, gpu: &G) {
        factory::destroy_buffer(gpu, self.indices);
        factory::destroy_buffer(gpu, self.vertices);
    }
}
