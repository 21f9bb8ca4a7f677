//! Presentation surface seam
//!
//! The windowing layer hands over raw display/window handles; everything else
//! about the window (events, sizing, input) stays outside this crate.

use ash::extensions::khr;
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::context::{VulkanError, VulkanResult};

/// Surface wrapper with RAII cleanup
pub struct Surface {
    loader: khr::Surface,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Create a surface from the window layer's raw handles
    pub fn new(
        entry: &Entry,
        instance: &Instance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> VulkanResult<Self> {
        let loader = khr::Surface::new(entry, instance);

        let surface = unsafe {
            ash_window::create_surface(entry, instance, display_handle, window_handle, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { loader, surface })
    }

    /// Wrap an externally created surface handle
    pub fn from_raw(entry: &Entry, instance: &Instance, surface: vk::SurfaceKHR) -> Self {
        let loader = khr::Surface::new(entry, instance);
        Self { loader, surface }
    }

    /// Get the surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Surface extension loader for capability queries
    pub fn loader(&self) -> &khr::Surface {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
