//! Descriptor layout bindings, descriptor writes and pool sizing.
//!
//! Layouts and writes are described with plain values here and turned into
//! Vulkan structures by the backend, so the same description can be checked
//! by the headless context.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use vkinterop_rhi::descriptor::{DescriptorBinding, DescriptorWrite};
//!
//! let bindings = [
//!     DescriptorBinding::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
//!     DescriptorBinding::combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT),
//! ];
//!
//! let write = DescriptorWrite::UniformBuffer {
//!     binding: 0,
//!     buffer: vk::Buffer::null(),
//!     range: 192,
//! };
//! assert_eq!(write.binding(), bindings[0].binding);
//! ```

use ash::vk;

/// One binding slot of a descriptor set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    /// Creates a uniform buffer binding.
    #[inline]
    pub const fn uniform_buffer(binding: u32, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages,
        }
    }

    /// Creates a combined image sampler binding.
    #[inline]
    pub const fn combined_image_sampler(binding: u32, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: 1,
            stages,
        }
    }

    /// Converts to the Vulkan layout binding.
    pub fn to_vk(self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(self.count)
            .stage_flags(self.stages)
    }
}

/// A single descriptor update targeting one binding of a set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorWrite {
    /// Whole-buffer uniform binding starting at offset 0
    UniformBuffer {
        binding: u32,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    },
    CombinedImageSampler {
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

impl DescriptorWrite {
    #[inline]
    pub fn binding(&self) -> u32 {
        match *self {
            Self::UniformBuffer { binding, .. } | Self::CombinedImageSampler { binding, .. } => {
                binding
            }
        }
    }

    #[inline]
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedImageSampler { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// Pool sizes for `uniform_buffers` uniform descriptors and `samplers`
/// combined image samplers. Zero-sized entries are left out since Vulkan
/// rejects pool sizes with a descriptor count of zero.
pub fn pool_sizes(uniform_buffers: u32, samplers: u32) -> Vec<vk::DescriptorPoolSize> {
    [
        (vk::DescriptorType::UNIFORM_BUFFER, uniform_buffers),
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, samplers),
    ]
    .into_iter()
    .filter(|&(_, count)| count > 0)
    .map(|(ty, count)| vk::DescriptorPoolSize::default().ty(ty).descriptor_count(count))
    .collect()
}
