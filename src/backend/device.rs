// Vulkan Device - capability negotiation and the logical device
//
// Responsibilities:
// - Enumerate physical devices and describe each against the surface
// - Pick the first device passing the suitability predicate (no scoring)
// - Logical device + graphics/present queue creation
//
// Suitability is pass/fail only: queue families found, required extensions
// exposed, and at least one surface format and present mode.

use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::error::{RendererError, RendererResult};
use super::instance::{c_array_to_string, missing_names, Instance};
use super::surface::{Surface, SurfaceSupport};

/// Device extensions every candidate must expose
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

/// Queue family roles discovered on one physical device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both roles found, not necessarily in the same family
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct family indices, graphics first
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics {
            families.push(graphics);
        }
        if let Some(present) = self.present {
            if !families.contains(&present) {
                families.push(present);
            }
        }
        families
    }
}

/// Walk the queue families of one device.
///
/// A family is "graphics" if it has at least one queue and the GRAPHICS flag,
/// and "present" if it has a queue and `supports_present(index)` says so.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> RendererResult<QueueFamilyIndices>
where
    F: FnMut(u32) -> RendererResult<bool>,
{
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if family.queue_count == 0 {
            continue;
        }

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(index);
        }

        if indices.present.is_none() && supports_present(index)? {
            indices.present = Some(index);
        }

        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// Everything the suitability predicate looks at, detached from the driver
#[derive(Clone, Debug, Default)]
pub struct DeviceCandidate {
    pub name: String,
    pub queue_families: QueueFamilyIndices,
    pub extensions: Vec<String>,
    pub surface: SurfaceSupport,
}

impl DeviceCandidate {
    pub fn has_required_extensions(&self) -> bool {
        missing_names(&required_device_extensions(), &self.extensions).is_empty()
    }

    pub fn is_suitable(&self) -> bool {
        self.queue_families.is_complete()
            && self.has_required_extensions()
            && self.surface.is_adequate()
    }
}

/// Index of the first suitable candidate
pub fn select_device(candidates: &[DeviceCandidate]) -> RendererResult<usize> {
    if candidates.is_empty() {
        return Err(RendererError::NoCompatibleDevice);
    }

    candidates
        .iter()
        .position(|candidate| {
            let suitable = candidate.is_suitable();
            if !suitable {
                log::debug!(
                    "Rejected {}: families={:?} extensions_ok={} surface_ok={}",
                    candidate.name,
                    candidate.queue_families,
                    candidate.has_required_extensions(),
                    candidate.surface.is_adequate()
                );
            }
            suitable
        })
        .ok_or(RendererError::UnsupportedDevice)
}

/// Physical + logical device with its queues. Created once, read-only after.
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue: vk::Queue,
    pub present_queue_family: u32,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,

    instance: Arc<Instance>,
}

impl VulkanDevice {
    /// Negotiate a device able to render and present to `surface`
    pub fn new(instance: Arc<Instance>, surface: &Surface) -> RendererResult<Arc<Self>> {
        let (physical_device, families) = pick_physical_device(&instance, surface)?;

        let graphics_queue_family = families.graphics.ok_or(RendererError::UnsupportedDevice)?;
        let present_queue_family = families.present.ok_or(RendererError::UnsupportedDevice)?;

        let device = create_logical_device(&instance, physical_device, &families)?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };

        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(physical_device)
        };
        let memory_properties = unsafe {
            instance
                .instance
                .get_physical_device_memory_properties(physical_device)
        };

        log::info!(
            "Selected GPU: {}",
            c_array_to_string(&properties.device_name)
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            graphics_queue_family,
            present_queue_family
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            graphics_queue,
            graphics_queue_family,
            present_queue,
            present_queue_family,
            properties,
            memory_properties,
            instance,
        }))
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance.instance
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> RendererResult<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");
        let _ = self.wait_idle();
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

fn describe_device(
    instance: &ash::Instance,
    surface: &Surface,
    device: vk::PhysicalDevice,
) -> RendererResult<DeviceCandidate> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let queue_families =
        find_queue_families(&families, |index| surface.supports_present(device, index))?;

    let extensions = unsafe { instance.enumerate_device_extension_properties(device) }?
        .iter()
        .map(|ext| c_array_to_string(&ext.extension_name))
        .collect();

    Ok(DeviceCandidate {
        name: c_array_to_string(&properties.device_name),
        queue_families,
        extensions,
        surface: surface.support_details(device)?,
    })
}

fn pick_physical_device(
    instance: &Instance,
    surface: &Surface,
) -> RendererResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let devices = unsafe { instance.instance.enumerate_physical_devices() }?;

    let mut candidates = Vec::with_capacity(devices.len());
    for &device in &devices {
        let candidate = describe_device(&instance.instance, surface, device)?;
        log::info!("Available device: {}", candidate.name);
        candidates.push(candidate);
    }

    let chosen = select_device(&candidates)?;
    Ok((devices[chosen], candidates[chosen].queue_families))
}

fn create_logical_device(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    families: &QueueFamilyIndices,
) -> RendererResult<ash::Device> {
    let queue_priorities = [1.0];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique_families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let extensions: Vec<_> = required_device_extensions()
        .iter()
        .map(|name| name.as_ptr())
        .collect();

    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe {
        instance
            .instance
            .create_device(physical_device, &create_info, None)
    }?;

    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn adequate_surface() -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    fn good_candidate() -> DeviceCandidate {
        DeviceCandidate {
            name: "Mock GPU".to_string(),
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            extensions: vec!["VK_KHR_swapchain".to_string()],
            surface: adequate_surface(),
        }
    }

    #[test]
    fn test_queue_families_same_index() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1)];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn test_queue_families_distinct_indices() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let indices = find_queue_families(&families, |index| Ok(index == 1)).unwrap();
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn test_queue_families_skip_empty_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 2),
        ];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
    }

    #[test]
    fn test_queue_family_iteration_stays_in_bounds() {
        let families = [
            family(vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::COMPUTE, 1),
        ];
        let mut queried = Vec::new();
        let indices = find_queue_families(&families, |index| {
            queried.push(index);
            Ok(false)
        })
        .unwrap();

        assert_eq!(queried, vec![0, 1, 2]);
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_queue_family_query_error_propagates() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let result = find_queue_families(&families, |_| {
            Err(RendererError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_suitable_when_all_conjuncts_hold() {
        assert!(good_candidate().is_suitable());
    }

    #[test]
    fn test_unsuitable_without_present_family() {
        let candidate = DeviceCandidate {
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: None,
            },
            ..good_candidate()
        };
        assert!(!candidate.is_suitable());
    }

    #[test]
    fn test_unsuitable_without_swapchain_extension() {
        let candidate = DeviceCandidate {
            extensions: vec!["VK_KHR_maintenance1".to_string()],
            ..good_candidate()
        };
        assert!(!candidate.has_required_extensions());
        assert!(!candidate.is_suitable());
    }

    #[test]
    fn test_unsuitable_without_surface_formats_or_modes() {
        let mut no_formats = good_candidate();
        no_formats.surface.formats.clear();
        assert!(!no_formats.is_suitable());

        let mut no_modes = good_candidate();
        no_modes.surface.present_modes.clear();
        assert!(!no_modes.is_suitable());
    }

    #[test]
    fn test_select_device_empty_list() {
        assert!(matches!(
            select_device(&[]),
            Err(RendererError::NoCompatibleDevice)
        ));
    }

    #[test]
    fn test_select_device_none_suitable() {
        let mut bad = good_candidate();
        bad.extensions.clear();
        assert!(matches!(
            select_device(&[bad]),
            Err(RendererError::UnsupportedDevice)
        ));
    }

    #[test]
    fn test_select_device_first_suitable_wins() {
        let mut bad = good_candidate();
        bad.queue_families.graphics = None;
        let second = DeviceCandidate {
            name: "Second".to_string(),
            ..good_candidate()
        };
        let third = DeviceCandidate {
            name: "Third".to_string(),
            ..good_candidate()
        };
        assert_eq!(select_device(&[bad, second, third]).unwrap(), 1);
    }
}
