// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use facet_math::{UVec2, Vec4};
use facet_render::{RenderSettings, RendererApi, VsyncPolicy, VulkanSettings};
use serde::Deserialize;
use std::{fs, io, path::Path};
use tracing::info;

pub const DEFAULT_PATH: &str = "facet.toml";

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "facet".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

impl WindowCfg {
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width.max(1), self.height.max(1))
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RendererCfg {
    pub api: RendererApi,
    pub vsync: VsyncPolicy,
    pub clear_colour: [f32; 4],
    /// Fall back to strict vsync while the window is unfocused.
    pub throttle_unfocused: bool,
    pub vulkan: VulkanSettings,
}

impl RendererCfg {
    /// The policy to run with given the window's focus.
    pub fn vsync_for(&self, focused: bool) -> VsyncPolicy {
        if !focused && self.throttle_unfocused {
            VsyncPolicy::Strict
        } else {
            self.vsync
        }
    }

    pub fn clear_color(&self) -> Vec4 {
        Vec4::from_array(self.clear_colour)
    }
}

impl Default for RendererCfg {
    fn default() -> Self {
        Self {
            api: RendererApi::default(),
            vsync: VsyncPolicy::default(),
            clear_colour: RenderSettings::default().clear_color.to_array(),
            throttle_unfocused: true,
            vulkan: VulkanSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub renderer: RendererCfg,
}

impl AppCfg {
    pub fn parse(src: &str) -> Result<Self> {
        toml::from_str(src).context("invalid config")
    }

    /// A missing file means defaults; anything else that goes wrong is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(s) => Self::parse(&s).with_context(|| format!("loading {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("{} not found; using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Command-line flags win over the file.
    pub fn override_with(&mut self, api: Option<RendererApi>, vsync: Option<VsyncPolicy>) {
        if let Some(api) = api {
            self.renderer.api = api;
        }
        if let Some(vsync) = vsync {
            self.renderer.vsync = vsync;
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            clear_color: self.renderer.clear_color(),
            vsync: self.renderer.vsync,
            vulkan: self.renderer.vulkan.clone(),
        }
    }
}
