//! Drawable objects and their swapchain-dependent state.
//!
//! A [`Drawable`] pairs a mesh with an optional sampled image and owns one
//! uniform buffer and one descriptor set per swapchain image. It moves
//! through three states:
//!
//! ```text
//! Uninitialized --init--> ApplicationReady --recreate--> FrameReady
//!                               ^                             |
//!                               +----------cleanup------------+
//! ```
//!
//! Only `FrameReady` drawables can be updated or drawn. A full cleanup
//! returns the drawable to `Uninitialized`.

use ash::vk;
use glam::{Mat4, Vec3};
use tracing::trace;

use vkinterop_rhi::GpuContext;
use vkinterop_rhi::descriptor::DescriptorWrite;
use vkinterop_rhi::factory::{self, BufferAllocation};

use crate::error::{RendererError, RendererResult};
use crate::mesh::Mesh;
use crate::offscreen::OffscreenPass;
use crate::registry::{MeshId, OffscreenId, Slots, TextureId};
use crate::texture::Texture;
use crate::ubo::{self, TransformBlock};

/// Binding of the transform uniform buffer.
pub const UNIFORM_BINDING: u32 = 0;
/// Binding of the combined image sampler, present only for sampled drawables.
pub const SAMPLER_BINDING: u32 = 1;

/// What a drawable samples at binding 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampledSource {
    /// Flat color, no sampler binding
    #[default]
    None,
    Texture(TextureId),
    /// Set `i` samples the pass's render target `i`
    Offscreen(OffscreenId),
}

impl SampledSource {
    /// Texture and offscreen pass are mutually exclusive.
    pub fn from_options(
        texture: Option<TextureId>,
        offscreen: Option<OffscreenId>,
    ) -> RendererResult<Self> {
        match (texture, offscreen) {
            (Some(_), Some(_)) => Err(RendererError::ConflictingSampledSource),
            (Some(texture), None) => Ok(Self::Texture(texture)),
            (None, Some(offscreen)) => Ok(Self::Offscreen(offscreen)),
            (None, None) => Ok(Self::None),
        }
    }

    #[inline]
    pub fn is_sampled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// A sampled source resolved against the registry.
#[derive(Clone, Copy)]
pub enum ResolvedSource<'a> {
    None,
    Texture(&'a Texture),
    Offscreen(&'a OffscreenPass),
}

impl ResolvedSource<'_> {
    /// The sampler write for descriptor set `image_index`, if any.
    pub fn image_write(&self, image_index: usize) -> RendererResult<Option<DescriptorWrite>> {
        match self {
            Self::None => Ok(None),
            Self::Texture(texture) => Ok(Some(texture.descriptor_write(SAMPLER_BINDING))),
            Self::Offscreen(pass) => Ok(Some(
                pass.render_target(image_index)?
                    .descriptor_write(SAMPLER_BINDING),
            )),
        }
    }
}

/// Read access to the objects a [`SampledSource`] can name.
#[derive(Clone, Copy)]
pub struct SourceLookup<'a> {
    pub textures: &'a Slots<TextureId, Texture>,
    pub offscreen_passes: &'a Slots<OffscreenId, OffscreenPass>,
}

impl<'a> SourceLookup<'a> {
    pub fn resolve(&self, source: SampledSource) -> RendererResult<ResolvedSource<'a>> {
        Ok(match source {
            SampledSource::None => ResolvedSource::None,
            SampledSource::Texture(id) => ResolvedSource::Texture(self.textures.get(id)?),
            SampledSource::Offscreen(id) => {
                ResolvedSource::Offscreen(self.offscreen_passes.get(id)?)
            }
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DrawableState {
    #[default]
    Uninitialized,
    ApplicationReady,
    FrameReady,
}

/// Descriptor writes for one set: the uniform buffer, then the sampler if any.
pub fn descriptor_writes(
    uniform_buffer: vk::Buffer,
    image: Option<DescriptorWrite>,
) -> Vec<DescriptorWrite> {
    let mut writes = vec![DescriptorWrite::UniformBuffer {
        binding: UNIFORM_BINDING,
        buffer: uniform_buffer,
        range: TransformBlock::SIZE as vk::DeviceSize,
    }];
    writes.extend(image);
    writes
}

#[derive(Debug)]
pub struct Drawable {
    position: Vec3,
    rotation_speed: f32,
    transform: TransformBlock,
    mesh: Option<MeshId>,
    source: SampledSource,
    uniform_buffers: Vec<BufferAllocation>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    state: DrawableState,
}

impl Drawable {
    /// A drawable at `position` spinning about Z at `rotation_speed` rad/s.
    pub fn new(position: Vec3, rotation_speed: f32) -> Self {
        Self {
            position,
            rotation_speed,
            transform: TransformBlock {
                model: Mat4::from_translation(position),
                ..TransformBlock::default()
            },
            mesh: None,
            source: SampledSource::None,
            uniform_buffers: Vec::new(),
            descriptor_sets: Vec::new(),
            state: DrawableState::Uninitialized,
        }
    }

    /// Binds the mesh and sampled source.
    pub fn init(&mut self, mesh: MeshId, source: SampledSource) -> RendererResult<()> {
        if self.state != DrawableState::Uninitialized {
            return Err(RendererError::InvalidState(format!(
                "drawable initialized twice (state {:?})",
                self.state
            )));
        }
        self.mesh = Some(mesh);
        self.source = source;
        self.state = DrawableState::ApplicationReady;
        Ok(())
    }

    #[inline]
    pub fn state(&self) -> DrawableState {
        self.state
    }

    #[inline]
    pub fn source(&self) -> SampledSource {
        self.source
    }

    #[inline]
    pub fn mesh(&self) -> Option<MeshId> {
        self.mesh
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    pub fn rotation_speed(&self) -> f32 {
        self.rotation_speed
    }

    #[inline]
    pub fn transform(&self) -> &TransformBlock {
        &self.transform
    }

    #[inline]
    pub fn uniform_buffers(&self) -> &[BufferAllocation] {
        &self.uniform_buffers
    }

    #[inline]
    pub fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.descriptor_sets
    }

    /// Creates one uniform buffer and one descriptor set per swapchain image.
    ///
    /// This is the only place uniform buffers and sets come into existence,
    /// so their counts always equal `image_count` while `FrameReady`.
    pub fn recreate_swapchain_objects<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &G,
        image_count: usize,
        pool: vk::DescriptorPool,
        set_layout: vk::DescriptorSetLayout,
        source: ResolvedSource<'_>,
    ) -> RendererResult<()> {
        if self.state != DrawableState::ApplicationReady {
            return Err(RendererError::InvalidState(format!(
                "cannot build swapchain objects for a drawable in state {:?}",
                self.state
            )));
        }

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        for _ in 0..image_count {
            match factory::create_buffer(
                gpu,
                TransformBlock::SIZE as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                host,
            ) {
                Ok(buffer) => self.uniform_buffers.push(buffer),
                Err(e) => {
                    self.release_uniform_buffers(gpu);
                    return Err(e.into());
                }
            }
        }

        let sets = match gpu.allocate_descriptor_sets(pool, set_layout, image_count) {
            Ok(sets) => sets,
            Err(e) => {
                self.release_uniform_buffers(gpu);
                return Err(e.into());
            }
        };

        for (i, (set, buffer)) in sets.iter().zip(&self.uniform_buffers).enumerate() {
            let image = match source.image_write(i) {
                Ok(image) => image,
                Err(e) => {
                    self.release_uniform_buffers(gpu);
                    return Err(e);
                }
            };
            gpu.update_descriptor_set(*set, &descriptor_writes(buffer.buffer, image));
        }

        self.descriptor_sets = sets;
        self.state = DrawableState::FrameReady;
        Ok(())
    }

    /// Perspective projection for the given aspect ratio.
    pub fn set_proj(&mut self, aspect: f32) {
        self.transform.proj = ubo::projection(aspect);
    }

    /// Recomputes the model matrix and writes the whole block to the uniform
    /// buffer of `image_index`.
    pub fn update_uniform_buffer<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &G,
        image_index: usize,
        elapsed_secs: f32,
    ) -> RendererResult<()> {
        if self.state != DrawableState::FrameReady {
            return Err(RendererError::NotFrameReady { state: self.state });
        }
        let buffer = self.uniform_buffers.get(image_index).ok_or_else(|| {
            RendererError::InvalidState(format!(
                "image index {image_index} out of range ({} uniform buffers)",
                self.uniform_buffers.len()
            ))
        })?;

        self.transform.model = ubo::model_matrix(self.position, elapsed_secs, self.rotation_speed);
        factory::copy_cpu_data_to_buffer(gpu, buffer, bytemuck::bytes_of(&self.transform))?;
        trace!(image_index, elapsed_secs, "Uniform buffer updated");
        Ok(())
    }

    /// Binds the mesh and descriptor set `image_index` and draws every index.
    pub fn record_draw<G: GpuContext + ?Sized>(
        &self,
        gpu: &G,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        image_index: usize,
        mesh: &Mesh,
    ) -> RendererResult<()> {
        if self.state != DrawableState::FrameReady {
            return Err(RendererError::NotFrameReady { state: self.state });
        }
        let set = self.descriptor_sets.get(image_index).copied().ok_or_else(|| {
            RendererError::InvalidState(format!("no descriptor set for image {image_index}"))
        })?;

        mesh.record_bind(gpu, command_buffer);
        gpu.cmd_bind_descriptor_set(command_buffer, layout, set);
        gpu.cmd_draw_indexed(command_buffer, mesh.index_count());
        Ok(())
    }

    /// Destroys the uniform buffers. The sets are freed with their pool.
    pub fn cleanup_swapchain_objects<G: GpuContext + ?Sized>(&mut self, gpu: &G) {
        self.release_uniform_buffers(gpu);
        if self.state == DrawableState::FrameReady {
            self.state = DrawableState::ApplicationReady;
        }
    }

    /// Drops every swapchain object and unbinds mesh and source.
    pub fn cleanup<G: GpuContext + ?Sized>(&mut self, gpu: &G) {
        self.cleanup_swapchain_objects(gpu);
        self.mesh = None;
        self.source = SampledSource::None;
        self.state = DrawableState::Uninitialized;
    }

    fn release_uniform_buffers<G: GpuContext + ?Sized>(&mut self, gpu: &G) {
        for buffer in self.uniform_buffers.drain(..) {
            factory::destroy_buffer(gpu, buffer);
        }
        self.descriptor_sets.clear();
    }
}
