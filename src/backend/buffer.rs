// Buffer utilities for vertex, index, and uniform buffers
//
// Memory types are picked by hand; staged uploads go through a host-visible
// buffer and a one-shot transfer that is waited on before returning.

use ash::vk;
use std::sync::Arc;

use super::command::CommandPool;
use super::error::{RendererError, RendererResult};
use super::VulkanDevice;

/// Lowest memory type index allowed by `type_filter` whose flags contain `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> RendererResult<u32> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);

    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_filter & (1 << i) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(i, _)| i as u32)
        .ok_or(RendererError::NoSuitableMemoryType {
            type_bits: type_filter,
            properties,
        })
}

/// Helper to create a GPU buffer with specified usage and memory properties
pub fn create_buffer(
    device: &VulkanDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
) -> RendererResult<(vk::Buffer, vk::DeviceMemory)> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
        .map_err(|e| RendererError::BufferCreation(format!("vkCreateBuffer: {e}")))?;

    let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

    let memory_type_index = match find_memory_type(
        &device.memory_properties,
        requirements.memory_type_bits,
        memory_properties,
    ) {
        Ok(index) => index,
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = match unsafe { device.device.allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(RendererError::BufferCreation(format!("vkAllocateMemory: {e}")));
        }
    };

    if let Err(e) = unsafe { device.device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe {
            device.device.destroy_buffer(buffer, None);
            device.device.free_memory(memory, None);
        }
        return Err(RendererError::BufferCreation(format!("vkBindBufferMemory: {e}")));
    }

    Ok((buffer, memory))
}

/// Record `src -> dst` into a one-shot command buffer and wait for the queue
pub fn copy_buffer(
    pool: &CommandPool,
    queue: vk::Queue,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> RendererResult<()> {
    pool.one_time_submit(queue, |device, cmd| unsafe {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        device.cmd_copy_buffer(cmd, src, dst, &[region]);
    })
}

/// A buffer and the memory bound to it, released together on drop
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> RendererResult<Self> {
        let (buffer, memory) = create_buffer(&device, size, usage, memory_properties)?;
        Ok(Self {
            buffer,
            memory,
            size,
            device,
        })
    }

    /// Map, copy `bytes` to offset 0, unmap. Memory must be host-visible and coherent.
    pub fn write(&self, bytes: &[u8]) -> RendererResult<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(RendererError::BufferCreation(format!(
                "Write of {} bytes overflows buffer of {}",
                bytes.len(),
                self.size
            )));
        }

        unsafe {
            let ptr = self.device.device.map_memory(
                self.memory,
                0,
                bytes.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )? as *mut u8;

            ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
            self.device.device.unmap_memory(self.memory);
        }

        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// Where a staged upload allocates, writes and copies
pub trait StagingTarget {
    type Buffer;

    /// Host-visible, host-coherent transfer source
    fn create_staging(&mut self, size: vk::DeviceSize) -> RendererResult<Self::Buffer>;

    /// Final destination, usually device-local
    fn create_destination(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RendererResult<Self::Buffer>;

    fn write(&mut self, buffer: &Self::Buffer, bytes: &[u8]) -> RendererResult<()>;

    /// Must not return before the copy has completed
    fn copy(
        &mut self,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: vk::DeviceSize,
    ) -> RendererResult<()>;
}

/// Staging buffer -> destination buffer. The staging buffer is released on return.
pub fn upload_staged<S: StagingTarget>(
    target: &mut S,
    usage: vk::BufferUsageFlags,
    bytes: &[u8],
) -> RendererResult<S::Buffer> {
    if bytes.is_empty() {
        return Err(RendererError::BufferCreation(
            "Cannot upload an empty buffer".to_string(),
        ));
    }

    let size = bytes.len() as vk::DeviceSize;

    let staging = target.create_staging(size)?;
    target.write(&staging, bytes)?;

    let destination =
        target.create_destination(size, usage | vk::BufferUsageFlags::TRANSFER_DST)?;
    target.copy(&staging, &destination, size)?;

    Ok(destination)
}

/// Staged uploads into device-local memory through a transfer queue
pub struct DeviceStaging<'a> {
    pub device: &'a Arc<VulkanDevice>,
    pub queue: vk::Queue,
    pub pool: &'a CommandPool,
}

impl StagingTarget for DeviceStaging<'_> {
    type Buffer = GpuBuffer;

    fn create_staging(&mut self, size: vk::DeviceSize) -> RendererResult<GpuBuffer> {
        GpuBuffer::new(
            self.device.clone(),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    fn create_destination(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RendererResult<GpuBuffer> {
        GpuBuffer::new(
            self.device.clone(),
            size,
            usage,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
    }

    fn write(&mut self, buffer: &GpuBuffer, bytes: &[u8]) -> RendererResult<()> {
        buffer.write(bytes)
    }

    fn copy(&mut self, src: &GpuBuffer, dst: &GpuBuffer, size: vk::DeviceSize) -> RendererResult<()> {
        copy_buffer(self.pool, self.queue, src.buffer, dst.buffer, size)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    /// Host memory standing in for both staging and device-local buffers
    #[derive(Default)]
    pub(crate) struct HostStaging {
        pub staging_created: usize,
        pub copies: usize,
    }

    impl StagingTarget for HostStaging {
        type Buffer = std::cell::RefCell<Vec<u8>>;

        fn create_staging(&mut self, size: vk::DeviceSize) -> RendererResult<Self::Buffer> {
            self.staging_created += 1;
            Ok(std::cell::RefCell::new(vec![0; size as usize]))
        }

        fn create_destination(
            &mut self,
            size: vk::DeviceSize,
            usage: vk::BufferUsageFlags,
        ) -> RendererResult<Self::Buffer> {
            assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
            Ok(std::cell::RefCell::new(vec![0xAA; size as usize]))
        }

        fn write(&mut self, buffer: &Self::Buffer, bytes: &[u8]) -> RendererResult<()> {
            buffer.borrow_mut()[..bytes.len()].copy_from_slice(bytes);
            Ok(())
        }

        fn copy(
            &mut self,
            src: &Self::Buffer,
            dst: &Self::Buffer,
            size: vk::DeviceSize,
        ) -> RendererResult<()> {
            self.copies += 1;
            let size = size as usize;
            dst.borrow_mut()[..size].copy_from_slice(&src.borrow()[..size]);
            Ok(())
        }
    }

    #[test]
    fn test_find_memory_type_picks_lowest_match() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b111, wanted).unwrap(), 1);
        // Type 1 masked out, so the superset at index 2 wins
        assert_eq!(find_memory_type(&props, 0b101, wanted).unwrap(), 2);
    }

    #[test]
    fn test_find_memory_type_result_satisfies_mask_and_flags() {
        let types = [
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ];
        let props = memory_properties(&types);
        let requests = [
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_CACHED,
        ];

        for mask in 0u32..16 {
            for &required in &requests {
                let expected = (0..types.len())
                    .find(|&i| mask & (1 << i) != 0 && types[i].contains(required));
                match find_memory_type(&props, mask, required) {
                    Ok(index) => {
                        assert_ne!(mask & (1 << index), 0);
                        assert!(types[index as usize].contains(required));
                        assert_eq!(Some(index as usize), expected);
                    }
                    Err(RendererError::NoSuitableMemoryType { type_bits, .. }) => {
                        assert_eq!(type_bits, mask);
                        assert_eq!(expected, None);
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        }
    }

    #[test]
    fn test_find_memory_type_ignores_types_past_count() {
        let mut props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        // Garbage beyond memory_type_count must never be chosen
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        let result = find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert!(matches!(result, Err(RendererError::NoSuitableMemoryType { .. })));
    }

    #[test]
    fn test_upload_staged_round_trip() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let mut target = HostStaging::default();

        let destination =
            upload_staged(&mut target, vk::BufferUsageFlags::VERTEX_BUFFER, &payload).unwrap();

        assert_eq!(destination.borrow().as_slice(), payload.as_slice());
        assert_eq!(target.staging_created, 1);
        assert_eq!(target.copies, 1);
    }

    #[test]
    fn test_upload_staged_rejects_empty() {
        let mut target = HostStaging::default();
        let result = upload_staged(&mut target, vk::BufferUsageFlags::INDEX_BUFFER, &[]);
        assert!(result.is_err());
        assert_eq!(target.staging_created, 0);
    }
}
