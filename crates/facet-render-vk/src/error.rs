// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::fmt;

/// Which part of bring-up (or the frame loop) a failure belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Instance,
    PhysicalDevice,
    Surface,
    Device,
    Swapchain,
    RenderPass,
    Framebuffer,
    CommandBuffers,
    Sync,
    Frame,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Instance => "instance",
            Stage::PhysicalDevice => "physical device",
            Stage::Surface => "surface",
            Stage::Device => "device",
            Stage::Swapchain => "swapchain",
            Stage::RenderPass => "render pass",
            Stage::Framebuffer => "framebuffer",
            Stage::CommandBuffers => "command buffers",
            Stage::Sync => "sync objects",
            Stage::Frame => "frame",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VkError {
    #[error("{stage}: {call} failed ({code:?})")]
    Api {
        stage: Stage,
        call: &'static str,
        code: vk::Result,
    },
    #[error("no Vulkan-capable GPU found")]
    NoPhysicalDevice,
    #[error("no queue family with graphics support")]
    NoGraphicsQueue,
    #[error("device extension {0} is both whitelisted and blacklisted")]
    ExtensionConflict(String),
    #[error("whitelisted device extension {0} is not supported by the physical device")]
    ExtensionUnsupported(String),
    #[error("instance extension {0} required by the window system is not available")]
    WindowExtensionMissing(String),
    #[error("surface reports no formats")]
    NoSurfaceFormats,
    #[error("surface reports no present modes")]
    NoPresentModes,
    #[error("extension or layer name {0:?} contains an interior NUL")]
    BadName(String),
    #[error("window handle unavailable: {0}")]
    Handle(#[from] raw_window_handle::HandleError),
}

pub type VkResult<T> = Result<T, VkError>;

/// Tags a raw `vk::Result` failure with the stage and entry point it came
/// from.
pub(crate) trait StageExt<T> {
    fn stage(self, stage: Stage, call: &'static str) -> VkResult<T>;
}

impl<T> StageExt<T> for Result<T, vk::Result> {
    fn stage(self, stage: Stage, call: &'static str) -> VkResult<T> {
        self.map_err(|code| VkError::Api { stage, call, code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_names_stage_and_code() {
        let r: Result<(), vk::Result> = Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        let msg = r.stage(Stage::Swapchain, "vkCreateSwapchainKHR").unwrap_err().to_string();
        assert!(msg.starts_with("swapchain: vkCreateSwapchainKHR failed"), "{msg}");
        assert!(msg.contains("ERROR_INITIALIZATION_FAILED"), "{msg}");
    }

    #[test]
    fn ok_passes_through() {
        let r: Result<u32, vk::Result> = Ok(3);
        assert_eq!(r.stage(Stage::Device, "x").unwrap(), 3);
    }
}
