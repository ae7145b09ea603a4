// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use facet_math::UVec2;
use winit::{dpi::PhysicalSize, window::Window, window::WindowAttributes};

/// Published whenever the window's drawable area changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowResized {
    pub size: UVec2,
}

impl From<PhysicalSize<u32>> for WindowResized {
    fn from(size: PhysicalSize<u32>) -> Self {
        Self {
            size: UVec2::new(size.width, size.height),
        }
    }
}

/// Current drawable size in physical pixels.
pub fn pixel_size(window: &Window) -> UVec2 {
    let size = window.inner_size();
    UVec2::new(size.width, size.height)
}

pub fn window_attributes(title: &str, size: UVec2) -> WindowAttributes {
    tracing::debug!("window attributes: \"{}\" {}x{}", title, size.x, size.y);
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(size.x.max(1), size.y.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_event_from_physical_size() {
        let ev = WindowResized::from(PhysicalSize::new(1920u32, 1080u32));
        assert_eq!(ev.size, UVec2::new(1920, 1080));
    }
}
