// Shader module loading
//
// SPIR-V blobs are produced by an external compiler and read from disk at
// startup. The bytes are opaque here apart from word alignment.

use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::error::{RendererError, RendererResult};
use super::VulkanDevice;

/// Read a SPIR-V file into 4-byte words
pub fn read_spirv(path: &Path) -> RendererResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| RendererError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })?;

    log::debug!("Read shader {:?} ({} bytes)", path, bytes.len());

    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|source| RendererError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// Shader module destroyed on drop; only needed until the pipeline exists
pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn from_file(device: Arc<VulkanDevice>, path: &Path) -> RendererResult<Self> {
        let code = read_spirv(path)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(|e| RendererError::PipelineCreation(format!("Shader module {path:?}: {e}")))?;

        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}
