//! Platform layer for vkinterop.
//!
//! A winit window plus the two things Vulkan needs from it: the instance
//! extensions its display requires and a surface for its native handle.

mod window;

pub use window::{Window, surface_extent};

// Re-export winit types the application loop needs
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
