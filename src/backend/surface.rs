// Surface - platform window connection
//
// Hand-dispatches on the raw window handle to the matching VK_KHR_*_surface
// extension. The surface is owned here and destroyed before the instance.

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;

use super::error::{RendererError, RendererResult};
use super::instance::Instance;

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: khr::Surface,
    _instance: Arc<Instance>,
}

impl Surface {
    pub fn new<W>(instance: Arc<Instance>, window: &W) -> RendererResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let window_handle = window
            .window_handle()
            .map_err(|e| RendererError::SurfaceCreation(format!("No window handle: {e}")))?
            .as_raw();
        let display_handle = window
            .display_handle()
            .map_err(|e| RendererError::SurfaceCreation(format!("No display handle: {e}")))?
            .as_raw();

        let surface = unsafe { create_platform_surface(&instance, display_handle, window_handle) }?;
        let loader = khr::Surface::new(&instance.entry, &instance.instance);

        log::info!("Created window surface");

        Ok(Self {
            surface,
            loader,
            _instance: instance,
        })
    }

    /// Whether queue family `family_index` of `physical_device` can present here
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        family_index: u32,
    ) -> RendererResult<bool> {
        let supported = unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                family_index,
                self.surface,
            )
        }?;
        Ok(supported)
    }

    pub fn support_details(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> RendererResult<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(physical_device, self.surface)?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)?,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

/// What a physical device can do with this surface
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// At least one format and one present mode
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Instance extensions needed to create a surface for this display
pub fn required_extensions(display: RawDisplayHandle) -> RendererResult<Vec<&'static CStr>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => {
            return Err(RendererError::SurfaceCreation(format!(
                "Unsupported display handle: {other:?}"
            )))
        }
    };
    Ok(vec![khr::Surface::name(), platform])
}

unsafe fn create_platform_surface(
    instance: &Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> RendererResult<vk::SurfaceKHR> {
    let entry = &instance.entry;
    let instance = &instance.instance;

    let surface = match (display, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
            let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)
        }
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .ok_or_else(|| RendererError::SurfaceCreation("Xlib display is null".into()))?;
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy.as_ptr() as *mut vk::Display)
                .window(handle.window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
            let connection = display
                .connection
                .ok_or_else(|| RendererError::SurfaceCreation("XCB connection is null".into()))?;
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection.as_ptr() as *mut vk::xcb_connection_t)
                .window(handle.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr() as *mut vk::wl_display)
                .surface(handle.surface.as_ptr() as *mut vk::wl_surface);
            khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)
        }
        (display, window) => {
            return Err(RendererError::SurfaceCreation(format!(
                "Unsupported window handle pair: {display:?} / {window:?}"
            )))
        }
    };

    surface.map_err(|e| RendererError::SurfaceCreation(format!("Failed to create surface: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandDisplayHandle, XlibDisplayHandle};
    use std::ptr::NonNull;

    #[test]
    fn test_required_extensions_xlib() {
        let display = RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0));
        let extensions = required_extensions(display).expect("xlib is supported");
        assert_eq!(extensions, vec![khr::Surface::name(), khr::XlibSurface::name()]);
    }

    #[test]
    fn test_required_extensions_wayland() {
        let mut dummy = 0u8;
        let ptr = NonNull::from(&mut dummy).cast();
        let display = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(ptr));
        let extensions = required_extensions(display).expect("wayland is supported");
        assert_eq!(extensions[1], khr::WaylandSurface::name());
    }

    #[test]
    fn test_surface_support_adequacy() {
        let adequate = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_formats = SurfaceSupport {
            formats: vec![],
            ..adequate.clone()
        };
        assert!(!no_formats.is_adequate());

        let no_modes = SurfaceSupport {
            present_modes: vec![],
            ..adequate
        };
        assert!(!no_modes.is_adequate());
    }
}
