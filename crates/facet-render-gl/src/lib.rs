// SPDX-License-Identifier: CEPL-1.0
//! OpenGL fallback backend: one context, clear and swap. Frame pacing is
//! whatever the swap interval gives us.

use anyhow::{anyhow, Context, Result};
use facet_math::{is_degenerate, UVec2, Vec4};
use facet_render::{RenderSettings, Renderer, VsyncPolicy};
use glow::HasContext as _;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use tracing::{debug, info, warn};

use glutin::{
    config::ConfigTemplateBuilder,
    context::{
        ContextApi, ContextAttributesBuilder, NotCurrentContext, PossiblyCurrentContext, Version,
    },
    display::{Display, DisplayApiPreference},
    prelude::*,
    surface::{Surface, SurfaceAttributesBuilder, SwapInterval, WindowSurface},
};

use std::ffi::CString;
use std::num::NonZeroU32;

pub struct GlRenderer {
    context: PossiblyCurrentContext,
    surface: Surface<WindowSurface>,
    gl: glow::Context,
    size: UVec2,
    resize_pending: bool,
    clear: Vec4,
    vsync: VsyncPolicy,
}

fn nz(v: u32) -> NonZeroU32 {
    NonZeroU32::new(v).unwrap_or(NonZeroU32::MIN)
}

/// GL has no mailbox or relaxed FIFO through glutin; anything that is not
/// `Disabled` waits for one vblank.
pub fn waits_for_vblank(policy: VsyncPolicy) -> bool {
    !matches!(policy, VsyncPolicy::Disabled)
}

fn swap_interval(policy: VsyncPolicy) -> SwapInterval {
    if waits_for_vblank(policy) {
        SwapInterval::Wait(NonZeroU32::MIN)
    } else {
        SwapInterval::DontWait
    }
}

impl GlRenderer {
    fn make_current(
        display: &Display,
        window_handle: RawWindowHandle,
        size: UVec2,
    ) -> Result<(
        PossiblyCurrentContext,
        Surface<WindowSurface>,
        glow::Context,
    )> {
        let template = ConfigTemplateBuilder::new().build();
        let mut configs = unsafe { display.find_configs(template) }.context("find_configs")?;
        let config = configs.next().ok_or_else(|| anyhow!("no GL configs"))?;

        let sattrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(
            window_handle,
            nz(size.x),
            nz(size.y),
        );
        let surface = unsafe { display.create_window_surface(&config, &sattrs) }
            .context("create_window_surface")?;
        let ctx_attrs = ContextAttributesBuilder::new()
            .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
            .build(Some(window_handle));
        let not_current: NotCurrentContext =
            unsafe { display.create_context(&config, &ctx_attrs) }.context("create_context")?;

        let context = not_current.make_current(&surface).context("make_current")?;

        let gl = unsafe {
            glow::Context::from_loader_function(|s| match CString::new(s) {
                Ok(name) => display.get_proc_address(&name) as *const _,
                Err(_) => std::ptr::null(),
            })
        };

        Ok((context, surface, gl))
    }

    fn apply_vsync(&self) {
        if let Err(e) = self
            .surface
            .set_swap_interval(&self.context, swap_interval(self.vsync))
        {
            warn!("GL swap interval for {} rejected: {e}", self.vsync);
        }
    }
}

impl Renderer for GlRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display_handle: &dyn HasDisplayHandle,
        size: UVec2,
        settings: RenderSettings,
    ) -> Result<Self> {
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let dh = display_handle
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let display =
            unsafe { Display::new(dh, DisplayApiPreference::Egl) }.context("Display::new")?;

        let (context, surface, gl) = Self::make_current(&display, wh, size)?;

        unsafe {
            gl.enable(glow::FRAMEBUFFER_SRGB);
            gl.disable(glow::DEPTH_TEST);
        }

        let r = Self {
            context,
            surface,
            gl,
            size,
            resize_pending: false,
            clear: settings.clear_color,
            vsync: settings.vsync,
        };
        r.apply_vsync();
        info!("OpenGL renderer ready ({}x{}, vsync {})", size.x, size.y, r.vsync);
        Ok(r)
    }

    fn resize(&mut self, size: UVec2) {
        if size != self.size {
            self.size = size;
            self.resize_pending = true;
        }
    }

    fn pre_update(&mut self) -> Result<()> {
        if is_degenerate(self.size) {
            return Ok(());
        }
        if self.resize_pending {
            debug!("GL surface resize to {}x{}", self.size.x, self.size.y);
            self.surface
                .resize(&self.context, nz(self.size.x), nz(self.size.y));
            self.apply_vsync();
            self.resize_pending = false;
        }

        unsafe {
            self.gl
                .viewport(0, 0, self.size.x as i32, self.size.y as i32);
            self.gl
                .clear_color(self.clear.x, self.clear.y, self.clear.z, self.clear.w);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
        Ok(())
    }

    fn post_update(&mut self) -> Result<()> {
        if is_degenerate(self.size) {
            return Ok(());
        }
        self.surface
            .swap_buffers(&self.context)
            .context("swap_buffers")
    }

    fn set_clear_color(&mut self, rgba: Vec4) {
        self.clear = rgba;
    }

    fn set_vsync(&mut self, policy: VsyncPolicy) {
        self.vsync = policy;
        self.apply_vsync();
    }
}
