//! Device buffer management
//!
//! `DeviceBuffer` wraps a Vulkan buffer allocated through the vk-mem allocator
//! owned by [`DeviceContext`](crate::context::DeviceContext). Buffers are
//! destroyed explicitly through the allocator, never garbage-collected, and a
//! buffer's size only ever grows over the life of the process (growth is
//! performed by the owner allocating a replacement and destroying the old one).

use ash::vk;
use vk_mem::Alloc;

use crate::context::{VulkanError, VulkanResult};

/// GPU-resident buffer with optional host mapping
pub struct DeviceBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    host_visible: bool,
    mapped: Option<*mut u8>,
}

impl DeviceBuffer {
    /// Create a new buffer through the allocator
    ///
    /// Host-visible buffers are placed in sequential-write host memory for
    /// staging; device-local buffers prefer VRAM.
    pub fn new(
        allocator: &vk_mem::Allocator,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        host_visible: bool,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: if host_visible {
                vk_mem::MemoryUsage::AutoPreferHost
            } else {
                vk_mem::MemoryUsage::AutoPreferDevice
            },
            flags: if host_visible {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let (buffer, allocation) = unsafe {
            allocator.create_buffer(&buffer_info, &alloc_info)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            buffer,
            allocation,
            size,
            usage,
            host_visible,
            mapped: None,
        })
    }

    /// Map the buffer for host writes
    pub fn map(&mut self, allocator: &vk_mem::Allocator) -> VulkanResult<*mut u8> {
        if !self.host_visible {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot map a device-local buffer".to_string(),
            });
        }

        let ptr = unsafe {
            allocator.map_memory(&mut self.allocation)
                .map_err(VulkanError::Api)?
        };
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    /// Unmap a previously mapped buffer
    pub fn unmap(&mut self, allocator: &vk_mem::Allocator) {
        if self.mapped.take().is_some() {
            unsafe {
                allocator.unmap_memory(&mut self.allocation);
            }
        }
    }

    /// Get the buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get the buffer size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Current host mapping, if any
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.mapped
    }

    /// Destroy the buffer and release its allocation
    ///
    /// The caller must guarantee no GPU work still references the buffer.
    pub fn destroy(mut self, allocator: &vk_mem::Allocator) {
        self.unmap(allocator);
        unsafe {
            allocator.destroy_buffer(self.buffer, &mut self.allocation);
        }
    }
}
