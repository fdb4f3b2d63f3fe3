//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// No physical device satisfies the renderer's requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// No memory type matches both the resource's type bits and the requested properties
    #[error("No suitable memory type (type bits {type_bits:#b}, properties {properties:?})")]
    NoSuitableMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// Layout transition outside the supported table
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// CPU write into memory that is not host-visible and host-coherent
    #[error("Memory is not host visible and coherent")]
    MemoryNotHostVisible,

    /// CPU write larger than the destination allocation
    #[error("Write of {len} bytes exceeds allocation of {capacity} bytes")]
    WriteOutOfBounds { len: usize, capacity: vk::DeviceSize },

    /// A resource was bound to memory twice
    #[error("Memory already bound: {0}")]
    MemoryAlreadyBound(String),

    /// A bounded wait expired
    #[error("Timed out after {timeout_ns} ns waiting for {what}")]
    Timeout { what: String, timeout_ns: u64 },

    /// Shader module creation error
    #[error("Shader error: {0}")]
    Shader(String),

    /// Surface error
    #[error("Surface error: {0}")]
    Surface(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Exportable memory unavailable or export failed
    #[error("External memory error: {0}")]
    ExternalMemory(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
}

impl RhiError {
    /// True for errors that come from a bounded wait expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
