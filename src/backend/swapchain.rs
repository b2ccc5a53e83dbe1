// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Negotiates format, present mode, extent and image count against the surface.

use ash::vk;
use std::sync::Arc;

use super::error::{RendererError, RendererResult};
use super::image::create_image_view;
use super::surface::Surface;
use super::VulkanDevice;

/// Format used when the surface reports that anything goes
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::R8G8B8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// One presentable image and the view we render through
#[derive(Clone, Copy, Debug)]
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<SwapchainImage>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
    _surface: Arc<Surface>,
}

impl Swapchain {
    /// Create a swapchain for `surface`.
    ///
    /// `old_swapchain` is handed to the driver as a recreation hint; pass
    /// `vk::SwapchainKHR::null()` on first creation.
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: Arc<Surface>,
        framebuffer_size: (u32, u32),
        prefer_mailbox: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> RendererResult<Self> {
        let support = surface
            .support_details(device.physical_device)
            .map_err(|e| RendererError::SwapchainCreation(format!("Surface query failed: {e}")))?;

        if !support.is_adequate() {
            return Err(RendererError::SwapchainCreation(
                "Surface reports no formats or present modes".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes, prefer_mailbox);
        let extent = choose_extent(&support.capabilities, framebuffer_size.0, framebuffer_size.1);
        let image_count = choose_image_count(&support.capabilities);

        log::info!(
            "Creating swapchain: {}x{} {:?} {:?} ({} images requested)",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count
        );

        let family_indices = [device.graphics_queue_family, device.present_queue_family];
        let (sharing_mode, shared_families) = choose_sharing_mode(&family_indices);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(device.instance(), &device.device);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| RendererError::SwapchainCreation(format!("vkCreateSwapchainKHR: {e}")))?;

        let raw_images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(RendererError::SwapchainCreation(format!(
                    "Failed to get swapchain images: {e}"
                )));
            }
        };

        let mut images = Vec::with_capacity(raw_images.len());
        for image in raw_images {
            match create_image_view(
                &device,
                image,
                surface_format.format,
                vk::ImageAspectFlags::COLOR,
            ) {
                Ok(view) => images.push(SwapchainImage { image, view }),
                Err(e) => {
                    unsafe {
                        for created in &images {
                            device.device.destroy_image_view(created.view, None);
                        }
                        swapchain_loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(RendererError::SwapchainCreation(format!(
                        "Failed to create image view: {e}"
                    )));
                }
            }
        }

        log::info!(
            "Created swapchain with {} images ({:?}, {:?}, {:?})",
            images.len(),
            surface_format.format,
            surface_format.color_space,
            present_mode
        );
        for (i, image) in images.iter().enumerate() {
            log::debug!("  swapchain image {}: {:?} -> view {:?}", i, image.image, image.view);
        }

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            format: surface_format.format,
            extent,
            device,
            _surface: surface,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_views(&self) -> Vec<vk::ImageView> {
        self.images.iter().map(|image| image.view).collect()
    }

    /// Acquire next image for rendering, signaling `semaphore` when it is ready
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> RendererResult<u32> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Swapchain is suboptimal for the surface");
                }
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RendererError::SwapchainOutOfDate),
            Err(e) => Err(RendererError::FrameSubmission(e)),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> RendererResult<()> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => {
                if suboptimal {
                    log::debug!("Presented to a suboptimal swapchain");
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RendererError::SwapchainOutOfDate),
            Err(e) => Err(RendererError::Presentation(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for image in &self.images {
                self.device.device.destroy_image_view(image.view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Pick the surface format.
///
/// A single UNDEFINED entry means the surface accepts anything. Otherwise look
/// for 8-bit RGBA/BGRA UNORM in the sRGB nonlinear space, else take the first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return PREFERRED_SURFACE_FORMAT;
        }
    }

    let preferred = formats.iter().find(|f| {
        (f.format == vk::Format::R8G8B8A8_UNORM || f.format == vk::Format::B8G8R8A8_UNORM)
            && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    match preferred.or_else(|| formats.first()) {
        Some(&format) => format,
        None => {
            log::warn!("Surface reported no formats, using default");
            PREFERRED_SURFACE_FORMAT
        }
    }
}

/// MAILBOX when offered (and wanted), otherwise FIFO which is always supported
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], prefer_mailbox: bool) -> vk::PresentModeKHR {
    if prefer_mailbox && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Swapchain extent.
///
/// `current_extent.width == u32::MAX` means the client decides: clamp the
/// framebuffer size, each axis against its own bounds.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;

    vk::Extent2D {
        width: width.max(min.width).min(max.width),
        height: height.max(min.height).min(max.height),
    }
}

/// One more than the minimum, clamped to the maximum (0 = no maximum)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// EXCLUSIVE when both roles share a family, else CONCURRENT across both
pub fn choose_sharing_mode(families: &[u32; 2]) -> (vk::SharingMode, &[u32]) {
    if families[0] == families[1] {
        (vk::SharingMode::EXCLUSIVE, &[])
    } else {
        (vk::SharingMode::CONCURRENT, families.as_slice())
    }
}
