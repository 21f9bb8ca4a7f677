//! Swapchain management
//!
//! Owns the presentable images, their views, the per-image render-complete
//! semaphores, and the depth/multisample attachments sized to the current
//! output resolution. Supports seamless reload on resize by passing the old
//! swapchain handle to the recreation call. A zero-area surface is not an
//! error: `needs_reload` stays set and the reload is retried every frame
//! until the surface becomes presentable again.

mod attachments;

pub use attachments::{ColorAttachment, DepthAttachment};

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::config::RendererConfig;
use crate::context::{DeviceContext, VulkanError, VulkanResult};
use crate::surface::Surface;
use crate::sync::Semaphore;

/// Outcome of an image acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// An image was acquired and the signal semaphore will fire
    Image(u32),
    /// The surface is out of date or degenerate; skip rendering this frame
    NeedsReload,
}

/// True when the output area cannot back a swapchain
pub(crate) fn is_degenerate(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// Swapchain images, per-image semaphores and resolution-sized attachments
pub struct SwapchainManager {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    render_finished: Vec<Semaphore>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    depth: Option<DepthAttachment>,
    color: Option<ColorAttachment>,
    prefer_mailbox: bool,
    needs_reload: bool,
    destroyed: bool,
}

impl SwapchainManager {
    /// Create the swapchain for the current surface and window extent
    pub fn new(
        ctx: &DeviceContext,
        surface: &Surface,
        window_extent: vk::Extent2D,
        config: &RendererConfig,
    ) -> VulkanResult<Self> {
        let device = ctx.device().clone();
        let loader = SwapchainLoader::new(ctx.instance(), &device);
        let samples = config.sample_count();

        let (swapchain, format, extent, images, image_views) = build_swapchain(
            ctx,
            &device,
            &loader,
            surface,
            window_extent,
            config.prefer_mailbox,
            vk::SwapchainKHR::null(),
        )?;

        let mut render_finished = Vec::with_capacity(images.len());
        for _ in 0..images.len() {
            render_finished.push(Semaphore::new(device.clone())?);
        }

        let depth = Some(DepthAttachment::new(&device, ctx.allocator(), extent, samples)?);
        let color = if samples != vk::SampleCountFlags::TYPE_1 {
            Some(ColorAttachment::new(&device, ctx.allocator(), extent, format.format, samples)?)
        } else {
            None
        };

        log::debug!(
            "Swapchain created: {} images, {:?}, {}x{}",
            images.len(),
            format.format,
            extent.width,
            extent.height
        );

        Ok(Self {
            device,
            loader,
            swapchain,
            images,
            image_views,
            render_finished,
            format,
            extent,
            samples,
            depth,
            color,
            prefer_mailbox: config.prefer_mailbox,
            needs_reload: false,
            destroyed: false,
        })
    }

    /// Acquire the next presentable image
    ///
    /// `signal` fires when the image is ready to be rendered to. An
    /// out-of-date surface flips `needs_reload` and returns
    /// [`Acquire::NeedsReload`]; a suboptimal acquire still returns the image
    /// but flags the reload for the next frame.
    pub fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VulkanResult<Acquire> {
        if self.needs_reload {
            return Ok(Acquire::NeedsReload);
        }

        match unsafe {
            self.loader.acquire_next_image(self.swapchain, u64::MAX, signal, vk::Fence::null())
        } {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    self.needs_reload = true;
                }
                Ok(Acquire::Image(image_index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date during acquire_next_image");
                self.needs_reload = true;
                Ok(Acquire::NeedsReload)
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Present the image, gated on its render-complete semaphore
    pub fn queue_present(&mut self, present_queue: vk::Queue, image_index: u32) -> VulkanResult<()> {
        let wait_semaphores = [self.render_finished[image_index as usize].handle()];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(present_queue, &present_info) } {
            Ok(suboptimal) => {
                if suboptimal {
                    self.needs_reload = true;
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date during queue_present");
                self.needs_reload = true;
                Ok(())
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Destroy and regenerate the swapchain for a new output extent
    ///
    /// Returns `Ok(false)` without touching anything while the extent is
    /// degenerate. The old swapchain handle is passed to the recreation call
    /// so in-flight presents can complete against it.
    pub fn reload(
        &mut self,
        ctx: &DeviceContext,
        surface: &Surface,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<bool> {
        if is_degenerate(window_extent) {
            self.needs_reload = true;
            return Ok(false);
        }

        ctx.wait_idle()?;

        for image_view in self.image_views.drain(..) {
            unsafe {
                self.device.destroy_image_view(image_view, None);
            }
        }
        self.render_finished.clear();
        if let Some(depth) = self.depth.take() {
            depth.destroy(&self.device, ctx.allocator());
        }
        if let Some(color) = self.color.take() {
            color.destroy(&self.device, ctx.allocator());
        }

        let old_swapchain = self.swapchain;
        let (swapchain, format, extent, images, image_views) = build_swapchain(
            ctx,
            &self.device,
            &self.loader,
            surface,
            window_extent,
            self.prefer_mailbox,
            old_swapchain,
        )?;

        unsafe {
            self.loader.destroy_swapchain(old_swapchain, None);
        }

        self.swapchain = swapchain;
        self.format = format;
        self.extent = extent;
        self.images = images;
        self.image_views = image_views;

        for _ in 0..self.images.len() {
            self.render_finished.push(Semaphore::new(self.device.clone())?);
        }
        self.depth = Some(DepthAttachment::new(&self.device, ctx.allocator(), extent, self.samples)?);
        if self.samples != vk::SampleCountFlags::TYPE_1 {
            self.color = Some(ColorAttachment::new(
                &self.device,
                ctx.allocator(),
                extent,
                format.format,
                self.samples,
            )?);
        }

        self.needs_reload = false;
        log::debug!("Swapchain reloaded: {}x{}", extent.width, extent.height);
        Ok(true)
    }

    /// Flag the swapchain for reload (window resize notification)
    pub fn mark_needs_reload(&mut self) {
        self.needs_reload = true;
    }

    /// Whether the swapchain must be reloaded before the next acquire
    pub fn needs_reload(&self) -> bool {
        self.needs_reload
    }

    /// Surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Current extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Swapchain images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Image views
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Depth attachment view
    pub fn depth_view(&self) -> Option<vk::ImageView> {
        self.depth.as_ref().map(DepthAttachment::image_view)
    }

    /// Multisampled color attachment view, if multisampling is enabled
    pub fn color_view(&self) -> Option<vk::ImageView> {
        self.color.as_ref().map(ColorAttachment::image_view)
    }

    /// Render-complete semaphore for one swapchain image
    pub fn render_finished(&self, image_index: u32) -> vk::Semaphore {
        self.render_finished[image_index as usize].handle()
    }

    /// Release all swapchain resources
    pub fn destroy(&mut self, ctx: &DeviceContext) {
        if self.destroyed {
            return;
        }
        for image_view in self.image_views.drain(..) {
            unsafe {
                self.device.destroy_image_view(image_view, None);
            }
        }
        self.render_finished.clear();
        if let Some(depth) = self.depth.take() {
            depth.destroy(&self.device, ctx.allocator());
        }
        if let Some(color) = self.color.take() {
            color.destroy(&self.device, ctx.allocator());
        }
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.destroyed = true;
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        if !self.destroyed {
            log::error!("SwapchainManager dropped while still initialized; call destroy() first");
            debug_assert!(self.destroyed, "SwapchainManager dropped without destroy()");
        }
    }
}

/// Create the swapchain and its image views
fn build_swapchain(
    ctx: &DeviceContext,
    device: &Device,
    loader: &SwapchainLoader,
    surface: &Surface,
    window_extent: vk::Extent2D,
    prefer_mailbox: bool,
    old_swapchain: vk::SwapchainKHR,
) -> VulkanResult<(
    vk::SwapchainKHR,
    vk::SurfaceFormatKHR,
    vk::Extent2D,
    Vec<vk::Image>,
    Vec<vk::ImageView>,
)> {
    let physical_device = ctx.physical_device();

    let surface_caps = unsafe {
        surface
            .loader()
            .get_physical_device_surface_capabilities(physical_device, surface.handle())
            .map_err(VulkanError::Api)?
    };

    let surface_formats = unsafe {
        surface
            .loader()
            .get_physical_device_surface_formats(physical_device, surface.handle())
            .map_err(VulkanError::Api)?
    };

    let format = surface_formats
        .iter()
        .find(|sf| {
            sf.format == vk::Format::B8G8R8A8_SRGB
                && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .copied()
        .unwrap_or(surface_formats[0]);

    let present_modes = unsafe {
        surface
            .loader()
            .get_physical_device_surface_present_modes(physical_device, surface.handle())
            .map_err(VulkanError::Api)?
    };

    let preferred = if prefer_mailbox {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    };
    let present_mode = present_modes
        .iter()
        .copied()
        .find(|&mode| mode == preferred)
        .unwrap_or(vk::PresentModeKHR::FIFO);

    let extent = if surface_caps.current_extent.width != u32::MAX {
        surface_caps.current_extent
    } else {
        vk::Extent2D {
            width: window_extent.width.clamp(
                surface_caps.min_image_extent.width,
                surface_caps.max_image_extent.width,
            ),
            height: window_extent.height.clamp(
                surface_caps.min_image_extent.height,
                surface_caps.max_image_extent.height,
            ),
        }
    };

    let image_count = (surface_caps.min_image_count + 1).min(if surface_caps.max_image_count > 0 {
        surface_caps.max_image_count
    } else {
        surface_caps.min_image_count + 1
    });

    let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
        .surface(surface.handle())
        .min_image_count(image_count)
        .image_format(format.format)
        .image_color_space(format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(surface_caps.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe {
        loader
            .create_swapchain(&swapchain_create_info, None)
            .map_err(VulkanError::Api)?
    };

    let images = unsafe {
        loader
            .get_swapchain_images(swapchain)
            .map_err(VulkanError::Api)?
    };

    let image_views: Result<Vec<_>, _> = images
        .iter()
        .map(|&image| {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            unsafe { device.create_image_view(&create_info, None) }
        })
        .collect();

    let image_views = image_views.map_err(VulkanError::Api)?;

    Ok((swapchain, format, extent, images, image_views))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_extent() {
        assert!(is_degenerate(vk::Extent2D { width: 0, height: 720 }));
        assert!(is_degenerate(vk::Extent2D { width: 1280, height: 0 }));
        assert!(is_degenerate(vk::Extent2D { width: 0, height: 0 }));
        assert!(!is_degenerate(vk::Extent2D { width: 1, height: 1 }));
    }
}
