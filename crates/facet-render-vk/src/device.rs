// SPDX-License-Identifier: CEPL-1.0
use crate::error::{Stage, StageExt, VkError, VkResult};
use crate::instance::{to_cstrings, Instance};
use crate::physical::PhysicalDevice;
use crate::queues::QueueFamilies;
use ash::vk;
use facet_render::VulkanSettings;
use std::ffi::c_void;
use tracing::{debug, info};

/// Needed for presentation no matter what the whitelist says.
pub const REQUIRED_EXTENSIONS: &[&str] = &["VK_KHR_swapchain"];

/// Device extensions to enable. A name on both lists, or a whitelisted
/// name the GPU lacks, is an error. Every supported extension that is not
/// blacklisted gets enabled, in the order the driver reports them.
pub fn resolve_extensions(
    supported: &[String],
    whitelist: &[String],
    blacklist: &[String],
) -> VkResult<Vec<String>> {
    if let Some(name) = whitelist.iter().find(|n| blacklist.contains(*n)) {
        return Err(VkError::ExtensionConflict(name.clone()));
    }
    if let Some(name) = whitelist.iter().find(|n| !supported.contains(*n)) {
        return Err(VkError::ExtensionUnsupported(name.clone()));
    }

    Ok(supported
        .iter()
        .filter(|n| !blacklist.contains(*n))
        .cloned()
        .collect())
}

fn at_least(version: u32, major: u32, minor: u32) -> bool {
    let (ma, mi) = (vk::api_version_major(version), vk::api_version_minor(version));
    ma > major || (ma == major && mi >= minor)
}

/// How features are queried and enabled for a given API version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FeatureLevel {
    /// Plain `VkPhysicalDeviceFeatures` through `pEnabledFeatures`.
    Core10,
    /// `VkPhysicalDeviceFeatures2` with nothing chained.
    Features2,
    /// Chains the `Vulkan11Features` and `Vulkan12Features` structs, which
    /// only exist from 1.2.
    Core12,
    /// Also chains `Vulkan13Features`.
    Core13,
}

pub fn feature_chain_level(version: u32) -> FeatureLevel {
    if at_least(version, 1, 3) {
        FeatureLevel::Core13
    } else if at_least(version, 1, 2) {
        FeatureLevel::Core12
    } else if at_least(version, 1, 1) {
        FeatureLevel::Features2
    } else {
        FeatureLevel::Core10
    }
}

pub struct Device {
    raw: ash::Device,
    extensions: Vec<String>,
}

impl Device {
    /// Creates the logical device with one queue per distinct family and
    /// every core feature the GPU reports, up to the 1.3 feature set.
    ///
    /// # Safety
    /// `instance` and `physical` must be live and related.
    pub unsafe fn new(
        instance: &Instance,
        physical: &PhysicalDevice,
        families: &QueueFamilies,
        settings: &VulkanSettings,
    ) -> VkResult<Self> {
        let supported = unsafe { physical.extensions(instance) }?;

        let mut whitelist = settings.device_extension_whitelist.clone();
        for req in REQUIRED_EXTENSIONS {
            if !whitelist.iter().any(|w| w == req) {
                whitelist.push((*req).to_owned());
            }
        }
        let extensions =
            resolve_extensions(&supported, &whitelist, &settings.device_extension_blacklist)?;
        for name in &extensions {
            debug!("device extension: {name}");
        }

        let queue_infos = families.create_infos();
        let ext_c = to_cstrings(&extensions)?;
        let ext_ptrs: Vec<*const std::ffi::c_char> = ext_c.iter().map(|c| c.as_ptr()).collect();

        let version = instance
            .api_version()
            .min(physical.properties().api_version);

        let level = feature_chain_level(version);
        let mut f11 = vk::PhysicalDeviceVulkan11Features::default();
        let mut f12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut f13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default();

        let chained = level >= FeatureLevel::Features2;
        let features10 = if chained {
            if level >= FeatureLevel::Core12 {
                features2 = features2.push_next(&mut f11).push_next(&mut f12);
            }
            if level >= FeatureLevel::Core13 {
                features2 = features2.push_next(&mut f13);
            }
            unsafe {
                instance
                    .raw()
                    .get_physical_device_features2(physical.raw(), &mut features2)
            };
            vk::PhysicalDeviceFeatures::default()
        } else {
            unsafe {
                instance
                    .raw()
                    .get_physical_device_features(physical.raw())
            }
        };

        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            p_next: if chained {
                &features2 as *const vk::PhysicalDeviceFeatures2<'_> as *const c_void
            } else {
                std::ptr::null()
            },
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            p_enabled_features: if chained {
                std::ptr::null()
            } else {
                &features10 as *const vk::PhysicalDeviceFeatures
            },
            ..Default::default()
        };

        let raw = unsafe {
            instance
                .raw()
                .create_device(physical.raw(), &create_info, None)
        }
        .stage(Stage::Device, "vkCreateDevice")?;

        info!(
            "vk device on {}: {} extension(s), {} queue famil{}, features up to {}.{}",
            physical.name(),
            extensions.len(),
            queue_infos.len(),
            if queue_infos.len() == 1 { "y" } else { "ies" },
            vk::api_version_major(version),
            vk::api_version_minor(version)
        );

        Ok(Self { raw, extensions })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// # Safety
    /// Device must be live.
    pub unsafe fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.raw.device_wait_idle() }.stage(Stage::Device, "vkDeviceWaitIdle")
    }

    /// Blocks on the fence with no timeout, then resets it.
    ///
    /// # Safety
    /// `fence` must belong to this device.
    pub unsafe fn wait_and_reset(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.raw.wait_for_fences(&[fence], true, u64::MAX) }
            .stage(Stage::Frame, "vkWaitForFences")?;
        unsafe { self.raw.reset_fences(&[fence]) }.stage(Stage::Frame, "vkResetFences")
    }

    /// # Safety
    /// Every child object must already be destroyed.
    pub unsafe fn destroy(&mut self) {
        unsafe { self.raw.destroy_device(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn everything_supported_minus_blacklist() {
        let supported = names(&["VK_KHR_swapchain", "VK_EXT_a", "VK_EXT_b"]);
        let got = resolve_extensions(
            &supported,
            &names(&["VK_KHR_swapchain"]),
            &names(&["VK_EXT_b"]),
        )
        .unwrap();
        assert_eq!(got, names(&["VK_KHR_swapchain", "VK_EXT_a"]));
    }

    #[test]
    fn whitelisted_and_blacklisted_is_a_conflict() {
        let supported = names(&["VK_KHR_swapchain", "VK_EXT_a"]);
        let err = resolve_extensions(
            &supported,
            &names(&["VK_KHR_swapchain", "VK_EXT_a"]),
            &names(&["VK_EXT_a"]),
        )
        .unwrap_err();
        assert!(matches!(err, VkError::ExtensionConflict(ref n) if n == "VK_EXT_a"));
    }

    #[test]
    fn whitelisted_but_unsupported_is_fatal() {
        let supported = names(&["VK_EXT_a"]);
        let err =
            resolve_extensions(&supported, &names(&["VK_KHR_swapchain"]), &[]).unwrap_err();
        assert!(matches!(err, VkError::ExtensionUnsupported(ref n) if n == "VK_KHR_swapchain"));
    }

    #[test]
    fn version_gate() {
        assert!(at_least(vk::API_VERSION_1_3, 1, 2));
        assert!(at_least(vk::API_VERSION_1_1, 1, 1));
        assert!(!at_least(vk::API_VERSION_1_0, 1, 1));
        assert!(!at_least(vk::API_VERSION_1_2, 1, 3));
    }

    #[test]
    fn vulkan11_struct_needs_1_2() {
        assert_eq!(feature_chain_level(vk::API_VERSION_1_0), FeatureLevel::Core10);
        assert_eq!(feature_chain_level(vk::API_VERSION_1_1), FeatureLevel::Features2);
        assert_eq!(
            feature_chain_level(vk::make_api_version(0, 1, 1, 250)),
            FeatureLevel::Features2
        );
        assert_eq!(feature_chain_level(vk::API_VERSION_1_2), FeatureLevel::Core12);
        assert_eq!(feature_chain_level(vk::API_VERSION_1_3), FeatureLevel::Core13);
        assert_eq!(
            feature_chain_level(vk::make_api_version(0, 1, 4, 0)),
            FeatureLevel::Core13
        );
    }
}
