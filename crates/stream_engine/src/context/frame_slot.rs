//! Per-frame-in-flight resources
//!
//! Each frame in flight owns a command pool, one primary command buffer, the
//! render fence gating reuse of that command buffer, and the semaphore the
//! swapchain acquire signals for the frame.

use ash::{vk, Device};

use crate::commands::CommandPool;
use crate::context::{VulkanError, VulkanResult};
use crate::sync::{Fence, Semaphore};

/// Resources for one frame in flight, cycled by `frame_count % maxFramesInFlight`
pub struct FrameSlot {
    command_pool: Option<CommandPool>,
    command_buffer: vk::CommandBuffer,
    render_fence: Fence,
    present_complete: Semaphore,
}

impl FrameSlot {
    /// Create a frame slot for the graphics queue family
    ///
    /// The render fence starts signaled so the first `begin_frame` does not
    /// block on work that was never submitted.
    pub fn new(device: Device, graphics_family: u32) -> VulkanResult<Self> {
        let command_pool = CommandPool::new(device.clone(), graphics_family, false)?;
        let command_buffer = command_pool.allocate_command_buffers(1)?[0];
        let render_fence = Fence::new(device.clone(), true)?;
        let present_complete = Semaphore::new(device)?;

        Ok(Self {
            command_pool: Some(command_pool),
            command_buffer,
            render_fence,
            present_complete,
        })
    }

    /// The slot's primary command buffer
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Fence signaled when the GPU finishes consuming this slot's submission
    pub fn render_fence(&self) -> &Fence {
        &self.render_fence
    }

    /// Semaphore signaled when the acquired swapchain image is ready
    pub fn present_complete(&self) -> &Semaphore {
        &self.present_complete
    }

    /// Destroy the command pool ahead of a swapchain reload
    ///
    /// The fence and semaphore survive so the slot keeps its identity; the
    /// command buffer handle is invalid until [`Self::recreate_pool`] runs.
    pub fn destroy_pool(&mut self) {
        self.command_pool = None;
        self.command_buffer = vk::CommandBuffer::null();
    }

    /// Recreate the command pool and command buffer after a swapchain reload
    pub fn recreate_pool(&mut self, device: Device, graphics_family: u32) -> VulkanResult<()> {
        let command_pool = CommandPool::new(device, graphics_family, false)?;
        self.command_buffer = command_pool.allocate_command_buffers(1)?[0];
        self.command_pool = Some(command_pool);
        Ok(())
    }

    pub(crate) fn require_pool(&self) -> VulkanResult<&CommandPool> {
        self.command_pool.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Frame slot used between swapchain reload handlers".to_string(),
        })
    }
}
