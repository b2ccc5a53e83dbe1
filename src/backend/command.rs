// Command pool and one-shot submissions

use ash::vk;
use std::sync::Arc;

use super::error::RendererResult;
use super::VulkanDevice;

pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(
        device: Arc<VulkanDevice>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> RendererResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }?;

        Ok(Self { pool, device })
    }

    pub fn allocate(&self, count: u32) -> RendererResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.device.allocate_command_buffers(&alloc_info) }?;
        Ok(buffers)
    }

    /// Record with `record`, submit to `queue`, wait for the queue to go idle,
    /// then free the command buffer. Startup-only; never used per frame.
    pub fn one_time_submit<F>(&self, queue: vk::Queue, record: F) -> RendererResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.device.device;
        let cmd = self.allocate(1)?[0];

        let result = (|| -> RendererResult<()> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

            unsafe {
                device.begin_command_buffer(cmd, &begin_info)?;
                record(device, cmd);
                device.end_command_buffer(cmd)?;

                let command_buffers = [cmd];
                let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
                device.queue_submit(queue, &[submit_info.build()], vk::Fence::null())?;
                device.queue_wait_idle(queue)?;
            }
            Ok(())
        })();

        unsafe {
            device.free_command_buffers(self.pool, &[cmd]);
        }

        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // Also frees every command buffer allocated from it
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}
