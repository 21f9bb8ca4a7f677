//! Render pass cache
//!
//! Render passes are keyed structurally by attachment formats, sample count
//! and final layout. With multisampling on, the color attachment renders at
//! sample count and resolves into a single-sampled attachment that carries
//! the final layout.

use ash::{vk, Device};

use crate::cache::{RefCache, Release};
use crate::context::{VulkanError, VulkanResult};

/// Structural key for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassDescriptor {
    /// Color attachment format (the swapchain format for present passes)
    pub color_format: vk::Format,
    /// Depth attachment format, if the pass uses depth
    pub depth_format: Option<vk::Format>,
    /// Rasterization sample count
    pub samples: vk::SampleCountFlags,
    /// Whether the pass output is presented (vs. sampled later)
    pub present: bool,
}

/// Lazily generated, reference-counted render passes
pub struct RenderPassCache {
    device: Device,
    cache: RefCache<RenderPassDescriptor, vk::RenderPass>,
}

impl RenderPassCache {
    /// Create an empty cache over the device
    pub fn new(device: Device) -> Self {
        Self {
            device,
            cache: RefCache::new(),
        }
    }

    /// Get or create the render pass for a descriptor
    pub fn generate_or_get(
        &mut self,
        descriptor: &RenderPassDescriptor,
    ) -> VulkanResult<vk::RenderPass> {
        let device = self.device.clone();
        self.cache
            .generate_or_get(*descriptor, || create_render_pass(&device, descriptor))
            .copied()
    }

    /// Release one reference, destroying the render pass at refcount zero
    pub fn destroy(&mut self, descriptor: &RenderPassDescriptor) {
        match self.cache.release(descriptor) {
            Release::Released(render_pass) => unsafe {
                self.device.destroy_render_pass(render_pass, None);
            },
            Release::Retained => {}
            Release::NotFound => {
                log::warn!("Release of unknown render pass skipped");
            }
        }
    }

    /// Force-destroy every cached render pass (full teardown only)
    pub fn shutdown(&mut self) {
        for render_pass in self.cache.drain() {
            unsafe {
                self.device.destroy_render_pass(render_pass, None);
            }
        }
    }

    /// Number of live render passes
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True when no render passes are cached
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

fn create_render_pass(
    device: &Device,
    descriptor: &RenderPassDescriptor,
) -> VulkanResult<vk::RenderPass> {
    let multisampled = descriptor.samples != vk::SampleCountFlags::TYPE_1;
    let final_layout = if descriptor.present {
        vk::ImageLayout::PRESENT_SRC_KHR
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    };

    let mut attachments = Vec::new();

    // Attachment 0: color. Multisampled passes resolve instead of storing.
    attachments.push(
        vk::AttachmentDescription::builder()
            .format(descriptor.color_format)
            .samples(descriptor.samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(if multisampled {
                vk::AttachmentStoreOp::DONT_CARE
            } else {
                vk::AttachmentStoreOp::STORE
            })
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(if multisampled {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                final_layout
            })
            .build(),
    );

    let depth_ref_index = descriptor.depth_format.map(|depth_format| {
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(depth_format)
                .samples(descriptor.samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        );
        attachments.len() as u32 - 1
    });

    let resolve_ref_index = multisampled.then(|| {
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(descriptor.color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(final_layout)
                .build(),
        );
        attachments.len() as u32 - 1
    });

    let color_attachments = [vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build()];

    let depth_attachment_ref = depth_ref_index.map(|index| {
        vk::AttachmentReference::builder()
            .attachment(index)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build()
    });

    let resolve_attachments = resolve_ref_index.map(|index| {
        [vk::AttachmentReference::builder()
            .attachment(index)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()]
    });

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments);
    if let Some(depth_ref) = depth_attachment_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    if let Some(resolve_refs) = resolve_attachments.as_ref() {
        subpass = subpass.resolve_attachments(resolve_refs);
    }
    let subpasses = [subpass.build()];

    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build();
    let dependencies = [dependency];

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe {
        device
            .create_render_pass(&create_info, None)
            .map_err(VulkanError::Api)
    }
}
