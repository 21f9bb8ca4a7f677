//! Device context management
//!
//! `DeviceContext` owns the GPU memory allocator, the frame-in-flight slots,
//! the transient upload pools, and the timeline semaphore ordering
//! transfer-queue uploads against graphics-queue consumption. Queue handles
//! and family indices are supplied by the surrounding device layer; this
//! module never selects a physical device itself.

mod frame_slot;

pub use frame_slot::FrameSlot;

use ash::{vk, Device, Instance};
use thiserror::Error;

use crate::commands::CommandPool;
use crate::config::RendererConfig;
use crate::swapchain::SwapchainManager;
use crate::sync::TimelineSemaphore;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Resource with specified ID could not be found
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        /// The unique identifier of the resource
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Context or resource initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// A dedicated transfer queue distinct from the graphics family
#[derive(Debug, Clone, Copy)]
pub struct TransferQueue {
    /// Queue family index of the transfer-only family
    pub family: u32,
    /// Queue handle retrieved from that family
    pub queue: vk::Queue,
}

/// Queue handles and family indices supplied by the device layer
#[derive(Debug, Clone, Copy)]
pub struct QueueInfo {
    /// Graphics queue family index
    pub graphics_family: u32,
    /// Present queue family index
    pub present_family: u32,
    /// Graphics queue handle
    pub graphics_queue: vk::Queue,
    /// Present queue handle (often the graphics queue)
    pub present_queue: vk::Queue,
    /// Dedicated transfer queue, when the device exposes a distinct family
    pub transfer: Option<TransferQueue>,
}

/// Owner of per-frame GPU resources and cross-queue synchronization state
///
/// Lifecycle: constructed into the initialized state, torn down with
/// [`Self::destroy`]. Dropping an initialized context is a programmer error.
pub struct DeviceContext {
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    device: Device,
    queues: QueueInfo,
    frame_slots: Vec<FrameSlot>,
    frame_count: u64,
    timeline: TimelineSemaphore,
    /// Transient pool on the graphics family for growth copies and texture
    /// uploads, and for geometry uploads when no transfer family exists.
    upload_pool: CommandPool,
    /// Transient pool on the dedicated transfer family, if one exists.
    transfer_pool: Option<CommandPool>,
    allocator: vk_mem::Allocator,
    destroyed: bool,
}

impl DeviceContext {
    /// Initialize the context: allocator, frame slots, upload pools, timeline
    pub fn new(
        instance: Instance,
        physical_device: vk::PhysicalDevice,
        device: Device,
        queues: QueueInfo,
        config: &RendererConfig,
    ) -> VulkanResult<Self> {
        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &instance,
            &device,
            physical_device,
        ))
        .map_err(VulkanError::Api)?;

        let max_frames_in_flight = config.clamped_frames_in_flight();
        let mut frame_slots = Vec::with_capacity(max_frames_in_flight);
        for _ in 0..max_frames_in_flight {
            frame_slots.push(FrameSlot::new(device.clone(), queues.graphics_family)?);
        }

        let timeline = TimelineSemaphore::new(device.clone())?;
        let upload_pool = CommandPool::new(device.clone(), queues.graphics_family, true)?;
        let transfer_pool = match queues.transfer {
            Some(transfer) => Some(CommandPool::new(device.clone(), transfer.family, true)?),
            None => None,
        };

        log::debug!(
            "DeviceContext initialized: {} frames in flight, dedicated transfer queue: {}",
            max_frames_in_flight,
            queues.transfer.is_some()
        );

        Ok(Self {
            instance,
            physical_device,
            device,
            queues,
            frame_slots,
            frame_count: 0,
            timeline,
            upload_pool,
            transfer_pool,
            allocator,
            destroyed: false,
        })
    }

    /// The Vulkan instance this context was created against
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The physical device backing the logical device
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// The logical device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Queue handles and family indices
    pub fn queues(&self) -> &QueueInfo {
        &self.queues
    }

    /// The GPU memory allocator
    pub fn allocator(&self) -> &vk_mem::Allocator {
        &self.allocator
    }

    /// Timeline semaphore ordering transfer uploads before graphics reads
    pub fn timeline(&self) -> &TimelineSemaphore {
        &self.timeline
    }

    /// Transient pool on the graphics family
    pub fn upload_pool(&self) -> &CommandPool {
        &self.upload_pool
    }

    /// Transient pool on the dedicated transfer family, if any
    pub fn transfer_pool(&self) -> Option<&CommandPool> {
        self.transfer_pool.as_ref()
    }

    /// Number of frames in flight
    pub fn max_frames_in_flight(&self) -> usize {
        self.frame_slots.len()
    }

    /// Index of the current frame slot
    pub fn current_frame_index(&self) -> usize {
        (self.frame_count % self.frame_slots.len() as u64) as usize
    }

    /// The current frame slot
    pub fn current_slot(&self) -> &FrameSlot {
        &self.frame_slots[self.current_frame_index()]
    }

    /// Total frames begun since initialization
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Advance to the next frame slot
    pub fn go_to_next_frame(&mut self) {
        self.frame_count += 1;
    }

    /// Gate on the current slot's render fence and begin its command buffer
    ///
    /// The fence wait guarantees the GPU has finished consuming the previous
    /// use of this slot before the command buffer is re-recorded.
    pub fn begin_frame(&self) -> VulkanResult<vk::CommandBuffer> {
        let slot = self.current_slot();
        slot.require_pool()?;
        slot.render_fence().wait(u64::MAX)?;
        slot.render_fence().reset()?;

        let command_buffer = slot.command_buffer();
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        Ok(command_buffer)
    }

    /// End the current command buffer, submit it, and present
    ///
    /// The submission waits on the acquire semaphore at color-attachment
    /// output and, when `timeline_wait` carries the value signaled by a
    /// transfer-queue upload, on the timeline semaphore at vertex input. It
    /// signals the per-image render-finished semaphore and the slot's render
    /// fence.
    pub fn submit_frame(
        &self,
        swapchain: &mut SwapchainManager,
        image_index: u32,
        timeline_wait: Option<u64>,
    ) -> VulkanResult<()> {
        let slot = self.current_slot();
        let command_buffer = slot.command_buffer();

        unsafe {
            self.device
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)?;
        }

        let mut wait_semaphores = vec![slot.present_complete().handle()];
        let mut wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        // Values for binary semaphores are ignored; only the timeline entry matters.
        let mut wait_values = vec![0u64];
        if let Some(value) = timeline_wait {
            wait_semaphores.push(self.timeline.handle());
            wait_stages.push(vk::PipelineStageFlags::VERTEX_INPUT);
            wait_values.push(value);
        }

        let signal_semaphores = [swapchain.render_finished(image_index)];
        let signal_values = [0u64];
        let command_buffers = [command_buffer];

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .queue_submit(
                    self.queues.graphics_queue,
                    &[submit_info.build()],
                    slot.render_fence().handle(),
                )
                .map_err(VulkanError::Api)?;
        }

        swapchain.queue_present(self.queues.present_queue, image_index)
    }

    /// Tear down per-slot command pools ahead of a swapchain reload
    pub fn handle_pre_swapchain_reload(&mut self) -> VulkanResult<()> {
        self.wait_idle()?;
        for slot in &mut self.frame_slots {
            slot.destroy_pool();
        }
        Ok(())
    }

    /// Recreate per-slot command pools after a swapchain reload
    ///
    /// Slot identity (fences, semaphores, index) is preserved across the
    /// reload; only pools and command buffers are replaced.
    pub fn handle_post_swapchain_reload(&mut self) -> VulkanResult<()> {
        for slot in &mut self.frame_slots {
            slot.recreate_pool(self.device.clone(), self.queues.graphics_family)?;
        }
        Ok(())
    }

    /// Block until the device is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api) }
    }

    /// Release all GPU resources owned by the context
    ///
    /// Must be called before the logical device is destroyed. Components that
    /// allocated buffers through this context's allocator must be destroyed
    /// first.
    pub fn destroy(mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("device_wait_idle failed during context teardown: {}", e);
        }
        self.destroyed = true;
        log::debug!("DeviceContext destroyed after {} frames", self.frame_count);
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if !self.destroyed {
            log::error!("DeviceContext dropped while still initialized; call destroy() first");
            debug_assert!(self.destroyed, "DeviceContext dropped without destroy()");
        }
    }
}
