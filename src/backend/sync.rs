// Synchronization primitives
//
// One FrameSync per frame slot: the image-available and render-finished
// semaphores order the GPU work, the in-flight fence lets the CPU wait
// before reusing the slot.

use ash::vk;
use std::sync::Arc;

use super::error::RendererResult;
use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> RendererResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let mut this = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
            device,
        };

        unsafe {
            let device = &this.device.device;
            this.image_available = device.create_semaphore(&semaphore_info, None)?;
            this.render_finished = device.create_semaphore(&semaphore_info, None)?;
            this.in_flight_fence = device.create_fence(&fence_info, None)?;
        }

        Ok(this)
    }

    /// Create `count` independent slots
    pub fn create_slots(device: &Arc<VulkanDevice>, count: usize) -> RendererResult<Vec<Self>> {
        (0..count).map(|_| Self::new(Arc::clone(device))).collect()
    }

    pub fn wait(&self) -> RendererResult<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)?;
        }
        Ok(())
    }

    pub fn reset(&self) -> RendererResult<()> {
        unsafe {
            self.device.device.reset_fences(&[self.in_flight_fence])?;
        }
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            let device = &self.device.device;
            if self.in_flight_fence != vk::Fence::null() {
                device.destroy_fence(self.in_flight_fence, None);
            }
            if self.render_finished != vk::Semaphore::null() {
                device.destroy_semaphore(self.render_finished, None);
            }
            if self.image_available != vk::Semaphore::null() {
                device.destroy_semaphore(self.image_available, None);
            }
        }
    }
}
