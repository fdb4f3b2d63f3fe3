//! Core utilities shared across vkinterop.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - Timer utilities
//! - Renderer configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::{PresentModePreference, RendererConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
