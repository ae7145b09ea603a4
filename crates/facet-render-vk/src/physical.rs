// SPDX-License-Identifier: CEPL-1.0
use crate::error::{Stage, StageExt, VkError, VkResult};
use crate::instance::Instance;
use ash::vk;
use tracing::{debug, info, warn};

pub struct PhysicalDevice {
    raw: vk::PhysicalDevice,
    props: vk::PhysicalDeviceProperties,
    name: String,
}

/// Lower is better. Real GPUs first, then virtual, then CPU rasterisers.
fn type_rank(ty: vk::PhysicalDeviceType) -> u8 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU | vk::PhysicalDeviceType::INTEGRATED_GPU => 0,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 2,
    }
}

/// Index of the device to use, first one winning among equals.
pub fn pick(types: &[vk::PhysicalDeviceType]) -> Option<usize> {
    types
        .iter()
        .enumerate()
        .min_by_key(|(_, ty)| type_rank(**ty))
        .map(|(i, _)| i)
}

fn type_name(ty: vk::PhysicalDeviceType) -> &'static str {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => "discrete",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual",
        vk::PhysicalDeviceType::CPU => "cpu",
        _ => "other",
    }
}

impl PhysicalDevice {
    /// # Safety
    /// `instance` must be live.
    pub unsafe fn select(instance: &Instance) -> VkResult<Self> {
        let raw_instance = instance.raw();
        let devices = unsafe { raw_instance.enumerate_physical_devices() }
            .stage(Stage::PhysicalDevice, "vkEnumeratePhysicalDevices")?;

        let props: Vec<vk::PhysicalDeviceProperties> = devices
            .iter()
            .map(|&pd| unsafe { raw_instance.get_physical_device_properties(pd) })
            .collect();
        for p in &props {
            debug!(
                "candidate gpu: {} ({})",
                p.device_name_as_c_str().unwrap_or(c"?").to_string_lossy(),
                type_name(p.device_type)
            );
        }

        let types: Vec<vk::PhysicalDeviceType> = props.iter().map(|p| p.device_type).collect();
        let idx = pick(&types).ok_or(VkError::NoPhysicalDevice)?;
        let chosen = props[idx];
        if type_rank(chosen.device_type) > 0 {
            warn!(
                "no discrete or integrated GPU; falling back to a {} device",
                type_name(chosen.device_type)
            );
        }

        let name = chosen
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            "gpu: {name} ({}, api {}.{}.{})",
            type_name(chosen.device_type),
            vk::api_version_major(chosen.api_version),
            vk::api_version_minor(chosen.api_version),
            vk::api_version_patch(chosen.api_version)
        );

        Ok(Self {
            raw: devices[idx],
            props: chosen,
            name,
        })
    }

    pub fn raw(&self) -> vk::PhysicalDevice {
        self.raw
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.props
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// # Safety
    /// `instance` must be the one this device was enumerated from.
    pub unsafe fn queue_families(&self, instance: &Instance) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            instance
                .raw()
                .get_physical_device_queue_family_properties(self.raw)
        }
    }

    /// # Safety
    /// `instance` must be the one this device was enumerated from.
    pub unsafe fn extensions(&self, instance: &Instance) -> VkResult<Vec<String>> {
        let props = unsafe {
            instance
                .raw()
                .enumerate_device_extension_properties(self.raw)
        }
        .stage(Stage::Device, "vkEnumerateDeviceExtensionProperties")?;
        Ok(props
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok())
            .map(|n| n.to_string_lossy().into_owned())
            .collect())
    }
}
