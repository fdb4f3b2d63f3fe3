//! Frame lifecycle and resource recreation.
//!
//! This crate sits on top of [`vkinterop_rhi::GpuContext`] and drives:
//! - Scene objects owned by typed handles ([`ResourceRegistry`])
//! - Swapchain rebuilds in a fixed teardown/recreate order ([`lifecycle`])
//! - Frames in flight and image ownership ([`frame_scheduler`])
//! - Offscreen passes sampled by later passes ([`offscreen`])
//! - Sharing offscreen targets with another API ([`interop`])
//!
//! Applications implement [`Scene`] and hand it to a [`Renderer`].

mod error;

pub mod drawable;
pub mod frame_scheduler;
pub mod interop;
pub mod lifecycle;
pub mod mesh;
pub mod offscreen;
pub mod pipeline;
pub mod registry;
pub mod renderer;
pub mod scene;
pub mod texture;
pub mod ubo;

pub use drawable::{Drawable, DrawableState, SampledSource};
pub use error::{RendererError, RendererResult};
pub use frame_scheduler::{AcquiredFrame, FrameScheduler, SlotState};
pub use interop::{ExternalImage, ExternalImageConsumer, ImageBridge};
pub use lifecycle::{LifecycleState, RebuildOutcome, SwapchainLifecycle};
pub use mesh::{IndexElement, Mesh};
pub use offscreen::{OFFSCREEN_FORMAT, OffscreenPass};
pub use pipeline::{DescriptorLayoutKind, PassTarget, Pipeline, PipelineDesc};
pub use registry::{DrawableId, MeshId, OffscreenId, PipelineId, ResourceRegistry, TextureId};
pub use renderer::{FrameStatus, Renderer};
pub use scene::{ClearColors, PassRecorder, Scene, SceneBuilder};
pub use texture::Texture;
pub use ubo::TransformBlock;
