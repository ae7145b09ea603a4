// SPDX-License-Identifier: CEPL-1.0
pub use glam::{UVec2, Vec4};

/// True when either axis is zero (minimized window, collapsed surface).
#[inline]
pub fn is_degenerate(size: UVec2) -> bool {
    size.x == 0 || size.y == 0
}

/// Clamp a wanted pixel size into an inclusive `[min, max]` box, per axis.
///
/// Unlike `UVec2::clamp` this never panics when a driver reports
/// `min > max`; `min` wins in that case.
pub fn clamp_size(want: UVec2, min: UVec2, max: UVec2) -> UVec2 {
    UVec2::new(
        want.x.min(max.x).max(min.x),
        want.y.min(max.y).max(min.y),
    )
}
