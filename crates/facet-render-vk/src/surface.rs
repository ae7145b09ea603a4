// SPDX-License-Identifier: CEPL-1.0
use crate::error::{Stage, StageExt, VkError, VkResult};
use crate::instance::Instance;
use ash::khr::surface;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::debug;

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Exact match on the preferred pair, otherwise the first reported format.
/// A lone `UNDEFINED` entry means the surface takes anything.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(preferred);
        }
    }
    formats
        .iter()
        .copied()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| formats.first().copied())
}

pub struct Surface {
    loader: surface::Instance,
    raw: vk::SurfaceKHR,
    format: vk::SurfaceFormatKHR,
}

impl Surface {
    /// # Safety
    /// Both handles must outlive the surface.
    pub unsafe fn new(
        instance: &Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> VkResult<Self> {
        let loader = surface::Instance::new(instance.entry(), instance.raw());
        let raw = unsafe {
            ash_window::create_surface(instance.entry(), instance.raw(), display, window, None)
        }
        .stage(Stage::Surface, "create_surface")?;
        Ok(Self {
            loader,
            raw,
            format: PREFERRED_FORMAT,
        })
    }

    /// Queries the formats once and settles the one every swapchain on
    /// this surface will use.
    ///
    /// # Safety
    /// `phys` must come from the instance that created the surface.
    pub unsafe fn select_format(&mut self, phys: vk::PhysicalDevice) -> VkResult<()> {
        let formats = unsafe {
            self.loader
                .get_physical_device_surface_formats(phys, self.raw)
        }
        .stage(Stage::Surface, "vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        self.format =
            choose_surface_format(&formats, PREFERRED_FORMAT).ok_or(VkError::NoSurfaceFormats)?;
        debug!(
            "surface format {:?} / {:?} (of {})",
            self.format.format,
            self.format.color_space,
            formats.len()
        );
        Ok(())
    }

    /// # Safety
    /// See [`Surface::select_format`].
    pub unsafe fn capabilities(
        &self,
        phys: vk::PhysicalDevice,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(phys, self.raw)
        }
        .stage(Stage::Surface, "vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    /// # Safety
    /// See [`Surface::select_format`].
    pub unsafe fn present_modes(
        &self,
        phys: vk::PhysicalDevice,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        let modes = unsafe {
            self.loader
                .get_physical_device_surface_present_modes(phys, self.raw)
        }
        .stage(Stage::Surface, "vkGetPhysicalDeviceSurfacePresentModesKHR")?;
        if modes.is_empty() {
            return Err(VkError::NoPresentModes);
        }
        Ok(modes)
    }

    /// # Safety
    /// See [`Surface::select_format`].
    pub unsafe fn supports_present(&self, phys: vk::PhysicalDevice, family: u32) -> VkResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(phys, family, self.raw)
        }
        .stage(Stage::Surface, "vkGetPhysicalDeviceSurfaceSupportKHR")
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.raw
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// # Safety
    /// No swapchain may still reference the surface.
    pub unsafe fn destroy(&mut self) {
        unsafe { self.loader.destroy_surface(self.raw, None) };
        self.raw = vk::SurfaceKHR::null();
    }
}
