// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Every child object holds an Arc to its
// parent, so the device outlives its resources and the instance outlives
// the device and surface.

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod image;
pub mod instance;
pub mod mesh;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use error::{RendererError, RendererResult};
pub use instance::Instance;
pub use surface::Surface;
pub use swapchain::Swapchain;
