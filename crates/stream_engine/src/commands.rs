//! Command buffer management
//!
//! Command pool ownership and one-time command recording for uploads and
//! buffer growth copies.

use ash::{vk, Device};

use crate::context::{VulkanError, VulkanResult};
use crate::sync::Fence;

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Create a new command pool for the given queue family
    ///
    /// Transient pools are meant for short-lived one-time command buffers
    /// (uploads, growth copies); per-frame pools allow individual reset.
    pub fn new(device: Device, queue_family_index: u32, transient: bool) -> VulkanResult<Self> {
        let flags = if transient {
            vk::CommandPoolCreateFlags::TRANSIENT
        } else {
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
        };

        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(flags)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device.create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            command_pool,
            queue_family_index,
        })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let command_buffers = unsafe {
            self.device.allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?
        };

        Ok(command_buffers)
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Queue family this pool allocates for
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Begin a one-time command buffer allocated from this pool
    pub fn begin_single_time(&self) -> VulkanResult<CommandRecorder> {
        let command_buffers = self.allocate_command_buffers(1)?;
        let command_buffer = command_buffers[0];

        let mut recorder = CommandRecorder::new(command_buffer, self.device.clone());
        recorder.begin()?;
        Ok(recorder)
    }

    /// Submit a finished one-time command buffer and block until it completes
    ///
    /// The command buffer is freed back to the pool after the fence signals.
    pub fn submit_single_time(
        &self,
        command_buffer: vk::CommandBuffer,
        queue: vk::Queue,
        fence: &Fence,
    ) -> VulkanResult<()> {
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers);

        unsafe {
            self.device.queue_submit(queue, &[submit_info.build()], fence.handle())
                .map_err(VulkanError::Api)?;
        }

        fence.wait(u64::MAX)?;
        fence.reset()?;

        unsafe {
            self.device.free_command_buffers(self.command_pool, &command_buffers);
        }

        Ok(())
    }

    /// Free a command buffer back to this pool without submitting it
    pub fn free(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.free_command_buffers(self.command_pool, &[command_buffer]);
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // All command buffers from this pool must have completed
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Type-safe recorder for transfer and barrier commands
pub struct CommandRecorder {
    command_buffer: vk::CommandBuffer,
    device: Device,
    recording: bool,
}

impl CommandRecorder {
    /// Create a recorder over an allocated command buffer
    pub fn new(command_buffer: vk::CommandBuffer, device: Device) -> Self {
        Self {
            command_buffer,
            device,
            recording: false,
        }
    }

    /// Begin one-time-submit recording
    pub fn begin(&mut self) -> VulkanResult<&mut Self> {
        if self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer already recording".to_string(),
            });
        }

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device.begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        self.recording = true;
        Ok(self)
    }

    /// Record a buffer-to-buffer copy
    pub fn cmd_copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device.cmd_copy_buffer(self.command_buffer, src, dst, regions);
        }
    }

    /// Record a global memory barrier between two pipeline stages
    pub fn cmd_memory_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: vk::MemoryBarrier,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    /// Record buffer memory barriers (ownership transfer release/acquire)
    pub fn cmd_buffer_barriers(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::BufferMemoryBarrier],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                barriers,
                &[],
            );
        }
    }

    /// Record an image layout transition
    pub fn cmd_image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Record a buffer-to-image copy (texture uploads)
    pub fn cmd_copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.cmd_copy_buffer_to_image(self.command_buffer, src, dst, layout, regions);
        }
    }

    /// End recording, yielding the command buffer for submission
    pub fn end(mut self) -> VulkanResult<vk::CommandBuffer> {
        if !self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string(),
            });
        }

        unsafe {
            self.device.end_command_buffer(self.command_buffer)
                .map_err(VulkanError::Api)?;
        }

        self.recording = false;
        Ok(self.command_buffer)
    }
}
