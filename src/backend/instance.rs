// Vulkan Instance - connection to the loader
//
// Responsibilities:
// - Load the Vulkan library
// - Verify window-system extensions and validation layers are available
// - Create the instance and the debug messenger

use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

use super::error::{RendererError, RendererResult};
use super::surface;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct Instance {
    pub entry: Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    validation_enabled: bool,
}

impl Instance {
    /// Create the instance with the surface extensions the display needs.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `display` - Raw display handle, decides which surface extension is loaded
    /// * `enable_validation` - Request Khronos validation layers
    pub fn new(
        app_name: &str,
        display: RawDisplayHandle,
        enable_validation: bool,
    ) -> RendererResult<Self> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        if enable_validation {
            let available = layer_names(&entry)?;
            let missing = missing_names(&[VALIDATION_LAYER], &available);
            if !missing.is_empty() {
                return Err(RendererError::ValidationLayerUnavailable(missing));
            }
        }

        let mut required = surface::required_extensions(display)?;
        if enable_validation {
            required.push(ash::extensions::ext::DebugUtils::name());
        }

        let available = instance_extension_names(&entry)?;
        let missing = missing_names(&required, &available);
        if !missing.is_empty() {
            return Err(RendererError::MissingInstanceExtensions(missing));
        }

        for name in &required {
            log::debug!("Instance extension: {}", name.to_string_lossy());
        }

        let app_name_cstr = CString::new(app_name).unwrap_or_default();
        let engine_name = c"No Engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let extensions: Vec<*const c_char> = required.iter().map(|name| name.as_ptr()).collect();
        let layers: Vec<*const c_char> = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }?;

        let debug_utils = if enable_validation {
            match setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            validation_enabled: enable_validation,
        })
    }

    pub fn validation_enabled(&self) -> bool {
        self.validation_enabled
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn layer_names(entry: &Entry) -> RendererResult<Vec<String>> {
    let layers = entry.enumerate_instance_layer_properties()?;
    Ok(layers
        .iter()
        .map(|layer| c_array_to_string(&layer.layer_name))
        .collect())
}

fn instance_extension_names(entry: &Entry) -> RendererResult<Vec<String>> {
    let extensions = entry.enumerate_instance_extension_properties(None)?;
    Ok(extensions
        .iter()
        .map(|ext| c_array_to_string(&ext.extension_name))
        .collect())
}

/// Names from `required` that are not present in `available`
pub fn missing_names(required: &[&CStr], available: &[String]) -> Vec<String> {
    required
        .iter()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !available.iter().any(|have| have == name))
        .collect()
}

/// Fixed-size, NUL-terminated name arrays as reported by the driver
pub fn c_array_to_string(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> RendererResult<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

    Ok((debug_utils, messenger))
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_names_reports_only_absent() {
        let available = vec![
            "VK_KHR_surface".to_string(),
            "VK_KHR_xlib_surface".to_string(),
        ];
        let required = [c"VK_KHR_surface", c"VK_EXT_debug_utils"];

        assert_eq!(missing_names(&required, &available), vec!["VK_EXT_debug_utils"]);
    }

    #[test]
    fn test_missing_validation_layer() {
        let available = vec!["VK_LAYER_LUNARG_api_dump".to_string()];
        let missing = missing_names(&[VALIDATION_LAYER], &available);
        assert_eq!(missing, vec!["VK_LAYER_KHRONOS_validation"]);

        let available = vec!["VK_LAYER_KHRONOS_validation".to_string()];
        assert!(missing_names(&[VALIDATION_LAYER], &available).is_empty());
    }

    #[test]
    fn test_c_array_to_string_stops_at_nul() {
        let mut raw = [0 as c_char; 16];
        for (slot, byte) in raw.iter_mut().zip(b"VK_KHR_swapchain") {
            *slot = *byte as c_char;
        }
        assert_eq!(c_array_to_string(&raw), "VK_KHR_swapchain");

        let mut short = [0 as c_char; 8];
        short[0] = b'a' as c_char;
        short[1] = b'b' as c_char;
        assert_eq!(c_array_to_string(&short), "ab");
    }
}
