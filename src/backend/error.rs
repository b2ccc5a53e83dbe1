// Renderer error taxonomy
//
// Initialization errors are fatal. Per-frame errors are fatal too, except that
// an out-of-date swapchain gets its own variant so a caller can tell it apart.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("Validation layers requested but not available: {0:?}")]
    ValidationLayerUnavailable(Vec<String>),

    #[error("Instance extensions required by the window system are missing: {0:?}")]
    MissingInstanceExtensions(Vec<String>),

    #[error("No GPU compatible with Vulkan found")]
    NoCompatibleDevice,

    #[error("No GPU satisfies queue family, extension and swapchain requirements")]
    UnsupportedDevice,

    #[error("Surface error: {0}")]
    SurfaceCreation(String),

    #[error("Swapchain error: {0}")]
    SwapchainCreation(String),

    #[error("No memory type matches bits {type_bits:#b} with properties {properties:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("No supported depth format found")]
    NoSupportedDepthFormat,

    #[error("Push constant block of {requested} bytes exceeds device limit of {limit}")]
    PushConstantsTooLarge { requested: u32, limit: u32 },

    #[error("Failed to load shader {path:?}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipeline error: {0}")]
    PipelineCreation(String),

    #[error("Buffer error: {0}")]
    BufferCreation(String),

    #[error("Frame submission failed: {0}")]
    FrameSubmission(vk::Result),

    #[error("Presentation failed: {0}")]
    Presentation(vk::Result),

    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,
}

impl RendererError {
    /// Only a stale swapchain could be fixed by recreating it; everything else
    /// reflects a broken environment or driver.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SwapchainOutOfDate)
    }
}

pub type RendererResult<T> = std::result::Result<T, RendererError>;
