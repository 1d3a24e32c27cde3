//! Window and Vulkan surface for the frameflow renderer.
//!
//! This crate is the presentation collaborator: it owns the winit window,
//! reports its pixel extent, and creates the `VkSurfaceKHR` the swapchain
//! presents to. Input handling is left to the application.

mod window;

pub use window::{Surface, Window, aspect_ratio};

// Re-export winit types the application needs to drive the event loop.
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
