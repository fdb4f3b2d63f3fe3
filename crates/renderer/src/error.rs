//! Renderer error types.

use thiserror::Error;

use vkinterop_resources::ResourceError;
use vkinterop_rhi::RhiError;

use crate::drawable::DrawableState;
use crate::pipeline::DescriptorLayoutKind;
use crate::registry::{DrawableId, PipelineId};

/// Error type for the frame lifecycle and everything built on it.
#[derive(Error, Debug)]
pub enum RendererError {
    /// GPU-level failure, including timeouts
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Asset loading failure
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Configuration or window failure
    #[error(transparent)]
    Core(#[from] vkinterop_core::Error),

    /// A typed handle that does not name a live object
    #[error("Unknown {kind} handle #{index}")]
    UnknownHandle { kind: &'static str, index: usize },

    /// A drawable added to a draw list it (or another list) already holds
    #[error("{drawable} is already registered in {pipeline}")]
    AlreadyRegistered {
        drawable: DrawableId,
        pipeline: PipelineId,
    },

    /// Per-frame work on a drawable whose swap-chain objects do not exist
    #[error("Drawable is not frame-ready (state {state:?})")]
    NotFrameReady { state: DrawableState },

    /// A drawable given both a texture and an offscreen pass to sample
    #[error("A drawable samples either a texture or an offscreen pass, not both")]
    ConflictingSampledSource,

    /// A drawable whose sampled-ness does not match the pipeline layout
    #[error("{drawable} needs a {needed:?} layout but the pipeline uses {pipeline:?}")]
    LayoutMismatch {
        drawable: DrawableId,
        needed: DescriptorLayoutKind,
        pipeline: DescriptorLayoutKind,
    },

    /// Passes recorded out of order (offscreen after main, main twice or never)
    #[error("Pass order violation: {0}")]
    PassOrder(String),

    /// Cross-API image bridge misuse or consumer failure
    #[error("Interop error: {0}")]
    Interop(String),

    /// An object used in a state that does not allow the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Mesh data that cannot be drawn
    #[error("Invalid mesh: {0}")]
    InvalidMesh(&'static str),
}

/// Result type alias for renderer operations.
pub type RendererResult<T> = std::result::Result<T, RendererError>;
