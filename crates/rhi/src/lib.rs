//! Vulkan hardware interface for vkinterop.
//!
//! Everything above this crate talks to the GPU through the [`GpuContext`]
//! trait. Two implementations ship here:
//!
//! - [`VulkanContext`]: the real device, built on `ash`
//! - [`HeadlessContext`]: a hardware-free double that mints handles, tracks
//!   live objects and records every call, used by tests and headless runs
//!
//! On top of the trait, [`factory`] provides buffer/image allocation with
//! memory-type selection, staged uploads and layout transitions.

mod error;

pub mod context;
pub mod descriptor;
pub mod device;
pub mod factory;
pub mod gpu;
pub mod headless;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use context::{VulkanContext, VulkanContextDesc};
pub use error::{RhiError, RhiResult};
pub use gpu::{
    AcquireOutcome, ExternalMemoryHandle, FrameSubmit, GpuContext, ImageBarrier, ImageDesc,
    PresentOutcome, RenderPassBegin, RenderPassDesc, SwapchainImages, SwapchainPlan,
};
pub use headless::{GpuEvent, HeadlessConfig, HeadlessContext, ObjectKind};

// Re-export ash types that users might need
pub use ash::vk;
