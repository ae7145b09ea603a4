// SPDX-License-Identifier: CEPL-1.0
use crate::error::{Stage, StageExt, VkError, VkResult};
use ash::ext::debug_utils;
use ash::{vk, Entry};
use facet_render::VulkanSettings;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_void, CStr, CString};
use tracing::{debug, error, info, trace, warn};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
const PORTABILITY_ENUMERATION: &str = "VK_KHR_portability_enumeration";

/// Highest API version we ask the loader for; the device feature chain
/// stops at the matching feature struct.
pub const TARGET_API_VERSION: u32 = vk::API_VERSION_1_3;

pub struct Instance {
    entry: Entry,
    raw: ash::Instance,
    api_version: u32,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback struct for the duration of the call.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

/// Optional instance extensions: everything available passes unless a
/// non-empty whitelist leaves it out or the blacklist names it. Never
/// fatal; rejected or missing names are only logged.
pub fn select_extensions(
    available: &[String],
    whitelist: &[String],
    blacklist: &[String],
) -> Vec<String> {
    let mut picked = Vec::new();

    for name in available {
        let whitelisted = whitelist.is_empty() || whitelist.contains(name);
        let blacklisted = blacklist.contains(name);

        match (whitelisted, blacklisted) {
            (true, false) => picked.push(name.clone()),
            (true, true) => warn!(
                "instance extension {name} is both whitelisted and blacklisted; ignoring it"
            ),
            (false, _) => trace!("instance extension {name} not in whitelist"),
        }
    }

    for name in whitelist {
        if !available.contains(name) {
            warn!("whitelisted instance extension {name} is not supported by this system");
        }
    }

    picked
}

/// Keeps the requested layers the loader actually has, in request order,
/// without duplicates.
pub fn select_layers(available: &[String], requested: &[String]) -> Vec<String> {
    let mut picked: Vec<String> = Vec::new();
    for name in requested {
        if picked.contains(name) {
            continue;
        }
        if available.contains(name) {
            picked.push(name.clone());
        } else {
            warn!("instance layer {name} is not available; skipping");
        }
    }
    picked
}

pub(crate) fn to_cstrings(names: &[String]) -> VkResult<Vec<CString>> {
    names
        .iter()
        .map(|n| CString::new(n.as_str()).map_err(|_| VkError::BadName(n.clone())))
        .collect()
}

fn ext_names(props: &[vk::ExtensionProperties]) -> Vec<String> {
    props
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .map(|n| n.to_string_lossy().into_owned())
        .collect()
}

impl Instance {
    /// # Safety
    /// `display` must be a live display handle for the lifetime of the
    /// returned instance's surfaces.
    pub unsafe fn new(display: RawDisplayHandle, settings: &VulkanSettings) -> VkResult<Self> {
        let entry = Entry::linked();

        let loader_version = unsafe { entry.try_enumerate_instance_version() }
            .stage(Stage::Instance, "vkEnumerateInstanceVersion")?
            .unwrap_or(vk::API_VERSION_1_0);
        let api_version = loader_version.min(TARGET_API_VERSION);

        let available = ext_names(
            &unsafe { entry.enumerate_instance_extension_properties(None) }
                .stage(Stage::Instance, "vkEnumerateInstanceExtensionProperties")?,
        );

        // Window-system extensions are not optional.
        let window_exts = ash_window::enumerate_required_extensions(display)
            .stage(Stage::Instance, "enumerate_required_extensions")?;
        let mut extensions: Vec<String> = Vec::new();
        for &ptr in window_exts {
            let name = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
            if !available.contains(&name) {
                return Err(VkError::WindowExtensionMissing(name));
            }
            extensions.push(name);
        }
        for name in select_extensions(
            &available,
            &settings.instance_extension_whitelist,
            &settings.instance_extension_blacklist,
        ) {
            if !extensions.contains(&name) {
                extensions.push(name);
            }
        }

        let want_validation = cfg!(debug_assertions) && settings.validation;
        let mut requested_layers = settings.layers.clone();
        if want_validation {
            requested_layers.push(VALIDATION_LAYER.to_owned());
        }
        let available_layers: Vec<String> = unsafe { entry.enumerate_instance_layer_properties() }
            .stage(Stage::Instance, "vkEnumerateInstanceLayerProperties")?
            .iter()
            .filter_map(|l| l.layer_name_as_c_str().ok())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        let layers = select_layers(&available_layers, &requested_layers);

        let debug_name = debug_utils::NAME.to_string_lossy();
        let with_messenger = want_validation && extensions.iter().any(|e| *e == debug_name);

        let flags = if extensions.iter().any(|e| e == PORTABILITY_ENUMERATION) {
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };

        let ext_c = to_cstrings(&extensions)?;
        let layer_c = to_cstrings(&layers)?;
        let ext_ptrs: Vec<*const std::ffi::c_char> = ext_c.iter().map(|c| c.as_ptr()).collect();
        let layer_ptrs: Vec<*const std::ffi::c_char> = layer_c.iter().map(|c| c.as_ptr()).collect();

        let app = c"facet";
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app.as_ptr(),
            application_version: 0,
            p_engine_name: app.as_ptr(),
            engine_version: 0,
            api_version,
            ..Default::default()
        };

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            flags,
            p_application_info: &app_info,
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            ..Default::default()
        };

        let raw = unsafe { entry.create_instance(&create_info, None) }
            .stage(Stage::Instance, "vkCreateInstance")?;

        info!(
            "vk instance: api {}.{}, {} extension(s), layers {:?}",
            vk::api_version_major(api_version),
            vk::api_version_minor(api_version),
            extensions.len(),
            layers
        );

        let debug = if with_messenger {
            let loader = debug_utils::Instance::new(&entry, &raw);
            let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                ..Default::default()
            };
            match unsafe { loader.create_debug_utils_messenger(&ci, None) } {
                Ok(m) => Some((loader, m)),
                Err(e) => {
                    warn!("debug messenger unavailable: {e:?}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            raw,
            api_version,
            debug,
        })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.raw
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// # Safety
    /// Every object created from this instance must already be destroyed.
    pub unsafe fn destroy(&mut self) {
        if let Some((loader, messenger)) = self.debug.take() {
            unsafe { loader.destroy_debug_utils_messenger(messenger, None) };
        }
        unsafe { self.raw.destroy_instance(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_whitelist_allows_everything_not_blacklisted() {
        let avail = names(&["VK_KHR_surface", "VK_EXT_debug_utils", "VK_KHR_xlib_surface"]);
        let got = select_extensions(&avail, &[], &names(&["VK_KHR_xlib_surface"]));
        assert_eq!(got, names(&["VK_KHR_surface", "VK_EXT_debug_utils"]));
    }

    #[test]
    fn whitelist_restricts_and_missing_entries_are_ignored() {
        let avail = names(&["VK_KHR_surface", "VK_EXT_debug_utils"]);
        let got = select_extensions(&avail, &names(&["VK_EXT_debug_utils", "VK_EXT_nope"]), &[]);
        assert_eq!(got, names(&["VK_EXT_debug_utils"]));
    }

    #[test]
    fn instance_conflicts_are_skipped_not_fatal() {
        let avail = names(&["VK_EXT_debug_utils"]);
        let both = names(&["VK_EXT_debug_utils"]);
        assert!(select_extensions(&avail, &both, &both).is_empty());
    }

    #[test]
    fn layers_keep_request_order_and_drop_missing() {
        let avail = names(&["VK_LAYER_KHRONOS_validation", "VK_LAYER_MESA_overlay"]);
        let req = names(&[
            "VK_LAYER_MESA_overlay",
            "VK_LAYER_LUNARG_api_dump",
            "VK_LAYER_KHRONOS_validation",
            "VK_LAYER_MESA_overlay",
        ]);
        assert_eq!(
            select_layers(&avail, &req),
            names(&["VK_LAYER_MESA_overlay", "VK_LAYER_KHRONOS_validation"])
        );
    }

    #[test]
    fn interior_nul_is_rejected() {
        let err = to_cstrings(&names(&["VK_bad\0name"])).unwrap_err();
        assert!(matches!(err, VkError::BadName(_)));
    }
}
