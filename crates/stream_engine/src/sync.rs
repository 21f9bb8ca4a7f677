//! Vulkan synchronization primitives for CPU/GPU and cross-queue coordination
//!
//! RAII wrappers for semaphores and fences, a timeline semaphore used to order
//! transfer-queue uploads against graphics-queue consumption, and pre-built
//! memory barriers for the hazards this layer actually produces.

use ash::{vk, Device};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::{VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive with automatic resource management
///
/// Binary semaphores coordinate work between GPU operations without involving
/// the CPU: image acquisition signals → rendering waits, rendering signals →
/// presentation waits.
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device.create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally in the signaled state
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device.create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Wait for the fence to signal
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device.wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    /// Reset the fence to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device.reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Monotonically increasing semaphore ordering work across independent queues
///
/// The counter only ever advances. A transfer-queue submission signals the next
/// value; the graphics submission that reads the transferred data waits for a
/// value >= that signal. This is the sole cross-queue ordering primitive in the
/// streaming layer.
pub struct TimelineSemaphore {
    device: Device,
    semaphore: vk::Semaphore,
    value: AtomicU64,
}

impl TimelineSemaphore {
    /// Create a timeline semaphore with an initial value of 0
    pub fn new(device: Device) -> VulkanResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);

        let create_info = vk::SemaphoreCreateInfo::builder()
            .push_next(&mut type_info);

        let semaphore = unsafe {
            device.create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            semaphore,
            value: AtomicU64::new(0),
        })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Reserve the next timeline value for a submission's signal operation
    pub fn next_value(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The highest value reserved so far
    pub fn last_value(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Block the calling thread until the semaphore reaches `value`
    pub fn wait_for_value(&self, value: u64, timeout: u64) -> VulkanResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);

        unsafe {
            self.device.wait_semaphores(&wait_info, timeout)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Memory barrier builder for the synchronization patterns of the upload path
///
/// Pre-configured barriers preventing the RAW hazards between transfer writes
/// and vertex/index reads, plus the queue-family ownership transfer pair
/// required when arenas are filled on a dedicated transfer queue.
pub struct MemoryBarrierBuilder;

impl MemoryBarrierBuilder {
    /// Transfer write → vertex attribute read barrier (same-queue arena updates)
    pub fn buffer_transfer_to_vertex_read() -> vk::MemoryBarrier {
        vk::MemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ)
            .build()
    }

    /// Release-ownership barrier recorded on the source (transfer) queue
    ///
    /// The destination access mask is ignored for release operations; only the
    /// queue family pair and the source access matter.
    pub fn buffer_release_ownership(
        buffer: vk::Buffer,
        src_family: u32,
        dst_family: u32,
    ) -> vk::BufferMemoryBarrier {
        vk::BufferMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build()
    }

    /// Acquire-ownership barrier recorded on the destination (graphics) queue
    ///
    /// Must carry the same queue family pair as the matching release.
    pub fn buffer_acquire_ownership(
        buffer: vk::Buffer,
        src_family: u32,
        dst_family: u32,
    ) -> vk::BufferMemoryBarrier {
        vk::BufferMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ)
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build()
    }
}
