// SPDX-License-Identifier: CEPL-1.0
use facet_math::Vec4;
use serde::Deserialize;
use std::{fmt, str::FromStr};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("unsupported vsync mode \"{0}\" (expected disabled, strict or relaxed)")]
    UnknownVsync(String),
    #[error("unsupported rendering API \"{0}\" (expected vulkan or opengl)")]
    UnknownApi(String),
}

/// How presentation is paced against the display refresh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum VsyncPolicy {
    /// Tear if it gets frames out sooner.
    Disabled,
    /// Never tear.
    #[default]
    Strict,
    /// Pace to refresh, but a late frame may tear instead of waiting.
    Relaxed,
}

impl FromStr for VsyncPolicy {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(Self::Disabled),
            "strict" | "on" => Ok(Self::Strict),
            "relaxed" => Ok(Self::Relaxed),
            _ => Err(SettingsError::UnknownVsync(s.to_owned())),
        }
    }
}

impl TryFrom<String> for VsyncPolicy {
    type Error = SettingsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for VsyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Strict => "strict",
            Self::Relaxed => "relaxed",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum RendererApi {
    #[default]
    Vulkan,
    OpenGl,
}

impl FromStr for RendererApi {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vulkan" | "vk" => Ok(Self::Vulkan),
            "opengl" | "gl" => Ok(Self::OpenGl),
            _ => Err(SettingsError::UnknownApi(s.to_owned())),
        }
    }
}

impl TryFrom<String> for RendererApi {
    type Error = SettingsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for RendererApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vulkan => "vulkan",
            Self::OpenGl => "opengl",
        })
    }
}

/// Vulkan-only knobs. Extension and layer names are the raw `VK_*` strings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VulkanSettings {
    pub validation: bool,
    pub layers: Vec<String>,
    pub instance_extension_whitelist: Vec<String>,
    pub instance_extension_blacklist: Vec<String>,
    pub device_extension_whitelist: Vec<String>,
    pub device_extension_blacklist: Vec<String>,
}

impl Default for VulkanSettings {
    fn default() -> Self {
        Self {
            validation: true,
            layers: Vec::new(),
            instance_extension_whitelist: Vec::new(),
            instance_extension_blacklist: Vec::new(),
            device_extension_whitelist: Vec::new(),
            device_extension_blacklist: Vec::new(),
        }
    }
}

/// Everything a backend needs from configuration, handed over by value at
/// construction.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub clear_color: Vec4,
    pub vsync: VsyncPolicy,
    pub vulkan: VulkanSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            clear_color: Vec4::new(0.02, 0.02, 0.04, 1.0),
            vsync: VsyncPolicy::default(),
            vulkan: VulkanSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vsync_parses_case_insensitively() {
        assert_eq!("Disabled".parse::<VsyncPolicy>(), Ok(VsyncPolicy::Disabled));
        assert_eq!("STRICT".parse::<VsyncPolicy>(), Ok(VsyncPolicy::Strict));
        assert_eq!(" relaxed ".parse::<VsyncPolicy>(), Ok(VsyncPolicy::Relaxed));
    }

    #[test]
    fn unknown_vsync_is_an_error() {
        assert_eq!(
            "adaptive".parse::<VsyncPolicy>(),
            Err(SettingsError::UnknownVsync("adaptive".into()))
        );
    }

    #[test]
    fn api_aliases() {
        assert_eq!("OpenGL".parse::<RendererApi>(), Ok(RendererApi::OpenGl));
        assert_eq!("vk".parse::<RendererApi>(), Ok(RendererApi::Vulkan));
        assert!("metal".parse::<RendererApi>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for p in [VsyncPolicy::Disabled, VsyncPolicy::Strict, VsyncPolicy::Relaxed] {
            assert_eq!(p.to_string().parse::<VsyncPolicy>(), Ok(p));
        }
    }

    #[derive(Deserialize)]
    struct Probe {
        vsync: VsyncPolicy,
        #[serde(default)]
        vulkan: VulkanSettings,
    }

    #[test]
    fn deserializes_from_toml() {
        let p: Probe = toml::from_str(
            r#"
            vsync = "relaxed"
            [vulkan]
            device_extension_blacklist = ["VK_EXT_foo"]
            "#,
        )
        .unwrap();
        assert_eq!(p.vsync, VsyncPolicy::Relaxed);
        assert_eq!(p.vulkan.device_extension_blacklist, vec!["VK_EXT_foo"]);
        assert!(p.vulkan.validation);
    }

    #[test]
    fn bad_vsync_string_fails_deserialization() {
        let err = toml::from_str::<Probe>(r#"vsync = "sometimes""#)
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("sometimes"), "{err}");
    }
}
