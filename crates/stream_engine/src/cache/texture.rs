//! Texture cache
//!
//! Textures are keyed by the stable resource id the asset loader assigns.
//! Pixel data arrives pre-decoded; on a cache miss the pixels are staged
//! through a transient host-visible buffer and copied into a device-local
//! image with the usual transition → copy → transition sequence on the
//! graphics-family upload pool.

use ash::{vk, Device};
use vk_mem::Alloc;

use crate::buffer::DeviceBuffer;
use crate::cache::{RefCache, Release};
use crate::context::{DeviceContext, VulkanError, VulkanResult};
use crate::sync::Fence;

/// Decoded pixel data for one texture upload
#[derive(Debug, Clone, Copy)]
pub struct TextureDescriptor<'a> {
    /// Texture width in pixels
    pub width: u32,
    /// Texture height in pixels
    pub height: u32,
    /// Pixel format of `pixels`
    pub format: vk::Format,
    /// Tightly packed pixel bytes
    pub pixels: &'a [u8],
}

/// A GPU-resident texture with its view and sampler
pub struct Texture {
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
    sampler: vk::Sampler,
    extent: vk::Extent2D,
}

impl Texture {
    /// Sampled image view
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Sampler for the texture
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Texture dimensions
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn destroy(mut self, device: &Device, allocator: &vk_mem::Allocator) {
        unsafe {
            device.destroy_sampler(self.sampler, None);
            device.destroy_image_view(self.view, None);
            allocator.destroy_image(self.image, &mut self.allocation);
        }
    }
}

/// Lazily uploaded, reference-counted textures keyed by resource id
pub struct TextureCache {
    device: Device,
    upload_fence: Fence,
    cache: RefCache<u64, Texture>,
}

impl TextureCache {
    /// Create an empty cache with its own upload fence
    pub fn new(ctx: &DeviceContext) -> VulkanResult<Self> {
        Ok(Self {
            device: ctx.device().clone(),
            upload_fence: Fence::new(ctx.device().clone(), false)?,
            cache: RefCache::new(),
        })
    }

    /// Get or upload the texture for a resource id
    pub fn generate_or_get(
        &mut self,
        ctx: &DeviceContext,
        id: u64,
        descriptor: &TextureDescriptor,
    ) -> VulkanResult<(vk::ImageView, vk::Sampler)> {
        let device = self.device.clone();
        let upload_fence = &self.upload_fence;
        self.cache
            .generate_or_get(id, || upload_texture(ctx, &device, upload_fence, descriptor))
            .map(|texture| (texture.view, texture.sampler))
    }

    /// O(1) lookup of an already-resident texture
    pub fn get(&self, id: u64) -> Option<&Texture> {
        // Lookup must not bump the refcount; resident textures are queried
        // every frame by descriptor-set updates.
        self.cache.peek(&id)
    }

    /// Release one reference, destroying the texture at refcount zero
    pub fn destroy(&mut self, ctx: &DeviceContext, id: u64) {
        match self.cache.release(&id) {
            Release::Released(texture) => {
                texture.destroy(&self.device, ctx.allocator());
            }
            Release::Retained => {}
            Release::NotFound => {
                log::warn!("Release of unknown texture {id} skipped");
            }
        }
    }

    /// Force-destroy every cached texture (full teardown only)
    pub fn shutdown(&mut self, ctx: &DeviceContext) {
        for texture in self.cache.drain() {
            texture.destroy(&self.device, ctx.allocator());
        }
    }

    /// Number of resident textures
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True when no textures are resident
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

fn upload_texture(
    ctx: &DeviceContext,
    device: &Device,
    upload_fence: &Fence,
    descriptor: &TextureDescriptor,
) -> VulkanResult<Texture> {
    let extent = vk::Extent2D {
        width: descriptor.width,
        height: descriptor.height,
    };

    let mut staging = DeviceBuffer::new(
        ctx.allocator(),
        descriptor.pixels.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        true,
    )?;
    let mapped = staging.map(ctx.allocator())?;
    unsafe {
        std::ptr::copy_nonoverlapping(descriptor.pixels.as_ptr(), mapped, descriptor.pixels.len());
    }
    staging.unmap(ctx.allocator());

    let image_create_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: descriptor.width,
            height: descriptor.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(descriptor.format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .samples(vk::SampleCountFlags::TYPE_1);

    let alloc_info = vk_mem::AllocationCreateInfo {
        usage: vk_mem::MemoryUsage::AutoPreferDevice,
        ..Default::default()
    };

    let (image, allocation) = unsafe {
        ctx.allocator()
            .create_image(&image_create_info, &alloc_info)
            .map_err(VulkanError::Api)?
    };

    let subresource_range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };

    let pool = ctx.upload_pool();
    let mut recorder = pool.begin_single_time()?;

    recorder.cmd_image_barrier(
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
        vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource_range)
            .build(),
    );

    let copy_region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width: descriptor.width,
            height: descriptor.height,
            depth: 1,
        })
        .build();
    recorder.cmd_copy_buffer_to_image(
        staging.handle(),
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[copy_region],
    );

    recorder.cmd_image_barrier(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource_range)
            .build(),
    );

    let command_buffer = recorder.end()?;
    pool.submit_single_time(command_buffer, ctx.queues().graphics_queue, upload_fence)?;

    staging.destroy(ctx.allocator());

    let view_create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(descriptor.format)
        .subresource_range(subresource_range);

    let view = unsafe {
        device
            .create_image_view(&view_create_info, None)
            .map_err(VulkanError::Api)?
    };

    let sampler_create_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(false)
        .max_anisotropy(1.0)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false);

    let sampler = unsafe {
        device
            .create_sampler(&sampler_create_info, None)
            .map_err(VulkanError::Api)?
    };

    Ok(Texture {
        image,
        allocation,
        view,
        sampler,
        extent,
    })
}
