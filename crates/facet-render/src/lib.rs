// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use facet_math::{UVec2, Vec4};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod settings;

pub use settings::{RenderSettings, RendererApi, SettingsError, VsyncPolicy, VulkanSettings};

/// One rendering backend. The backend is picked once at startup and
/// never swapped at runtime.
pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: UVec2,
        settings: RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Records the new drawable size. Backends must not rebuild anything
    /// here; the next `pre_update` picks it up.
    fn resize(&mut self, size: UVec2);

    /// Wait, acquire and record. May decide to skip the frame.
    fn pre_update(&mut self) -> Result<()>;

    /// Submit and present whatever `pre_update` recorded.
    fn post_update(&mut self) -> Result<()>;

    fn render(&mut self) -> Result<()> {
        self.pre_update()?;
        self.post_update()
    }

    fn set_clear_color(&mut self, rgba: Vec4);
    fn set_vsync(&mut self, _policy: VsyncPolicy) {}
}
