// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use clap::Parser;
use facet_core::{init_tracing, EventBus, Subscription};
use facet_math::{is_degenerate, UVec2, Vec4};
use facet_platform::{pixel_size, window_attributes, WindowResized};
use facet_render::{RenderSettings, Renderer, RendererApi, VsyncPolicy};
use facet_render_gl::GlRenderer;
use facet_render_vk::VkRenderer;
use tracing::{error, info, warn};

use facet_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use std::path::PathBuf;
use std::time::Instant;

mod config;

use config::AppCfg;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Renderer backend: vulkan | opengl (overrides the config file)
    #[arg(long)]
    backend: Option<RendererApi>,
    /// Config file
    #[arg(long, default_value = config::DEFAULT_PATH)]
    config: PathBuf,
    /// Vsync policy: disabled | strict | relaxed
    #[arg(long)]
    vsync: Option<VsyncPolicy>,
}

enum Backend {
    Gl(Box<GlRenderer>),
    Vk(Box<VkRenderer>),
}

impl Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::Gl(_) => "opengl",
            Backend::Vk(_) => "vulkan",
        }
    }

    fn resize(&mut self, size: UVec2) {
        match self {
            Backend::Gl(r) => r.resize(size),
            Backend::Vk(r) => r.resize(size),
        }
    }

    fn frame(&mut self) -> Result<()> {
        match self {
            Backend::Gl(r) => r.render(),
            Backend::Vk(r) => r.render(),
        }
    }

    fn set_vsync(&mut self, policy: VsyncPolicy) {
        match self {
            Backend::Gl(r) => r.set_vsync(policy),
            Backend::Vk(r) => r.set_vsync(policy),
        }
    }

    fn set_clear_color(&mut self, rgba: Vec4) {
        match self {
            Backend::Gl(r) => r.set_clear_color(rgba),
            Backend::Vk(r) => r.set_clear_color(rgba),
        }
    }
}

fn create_backend(
    window: &Window,
    api: RendererApi,
    forced: bool,
    size: UVec2,
    settings: RenderSettings,
) -> Result<Backend> {
    match api {
        RendererApi::OpenGl => Ok(Backend::Gl(Box::new(GlRenderer::new(
            window, window, size, settings,
        )?))),
        RendererApi::Vulkan => match VkRenderer::new(window, window, size, settings.clone()) {
            Ok(vk) => Ok(Backend::Vk(Box::new(vk))),
            Err(e) if !forced => {
                error!("vulkan init failed: {e:#}; falling back to opengl");
                Ok(Backend::Gl(Box::new(GlRenderer::new(
                    window, window, size, settings,
                )?)))
            }
            Err(e) => Err(e),
        },
    }
}

/// Command-line `--backend` and `--vsync`, reapplied on every config load.
type Overrides = (Option<RendererApi>, Option<VsyncPolicy>);

struct App {
    cfg: AppCfg,
    config_path: PathBuf,
    overrides: Overrides,

    // Dropped in declaration order: the backend goes before its window.
    backend: Option<Backend>,
    window: Option<Window>,

    events: EventBus<WindowResized>,
    renderer_inbox: Subscription,

    paused: bool,
    occluded: bool,
    focused: bool,
    frames: u32,
    last_fps_instant: Instant,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg, config_path: PathBuf, overrides: Overrides) -> Self {
        let mut events = EventBus::new();
        let renderer_inbox = events.subscribe();
        Self {
            cfg,
            config_path,
            overrides,
            backend: None,
            window: None,
            events,
            renderer_inbox,
            paused: false,
            occluded: false,
            focused: true,
            frames: 0,
            last_fps_instant: Instant::now(),
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.backend = None;
        self.window = None;
        event_loop.exit();
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = window_attributes(&self.cfg.window.title, self.cfg.window.size());
        let window = event_loop
            .create_window(attrs)
            .context("create_window")?;
        let size = pixel_size(&window);

        let backend = create_backend(
            &window,
            self.cfg.renderer.api,
            self.overrides.0.is_some(),
            size,
            self.cfg.render_settings(),
        )?;
        info!(
            "backend = {}, vsync = {}, {}x{}",
            backend.name(),
            self.cfg.renderer.vsync,
            size.x,
            size.y
        );

        self.paused = is_degenerate(size);
        self.backend = Some(backend);
        self.window = Some(window);
        Ok(())
    }

    fn control_flow(&self) -> ControlFlow {
        match self.cfg.renderer.vsync_for(self.focused) {
            VsyncPolicy::Disabled => ControlFlow::Poll,
            _ => ControlFlow::Wait,
        }
    }

    fn apply_vsync(&mut self) {
        let policy = self.cfg.renderer.vsync_for(self.focused);
        if let Some(backend) = &mut self.backend {
            backend.set_vsync(policy);
        }
    }

    /// Re-reads the config file. Only vsync and the clear colour change at
    /// runtime; window and backend settings wait for the next start.
    fn reload(&mut self) {
        let mut cfg = match AppCfg::load(&self.config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("config reload failed, keeping current settings: {e:#}");
                return;
            }
        };
        cfg.override_with(self.overrides.0, self.overrides.1);
        if cfg.window != self.cfg.window || cfg.renderer.api != self.cfg.renderer.api {
            info!("window and backend changes apply on restart");
        }

        self.cfg.renderer.vsync = cfg.renderer.vsync;
        self.cfg.renderer.throttle_unfocused = cfg.renderer.throttle_unfocused;
        self.cfg.renderer.clear_colour = cfg.renderer.clear_colour;
        if let Some(backend) = &mut self.backend {
            backend.set_clear_color(self.cfg.renderer.clear_color());
        }
        self.apply_vsync();
        info!("config reloaded from {}", self.config_path.display());
    }

    /// Hands queued resizes to the renderer. Only the newest size matters.
    fn forward_events(&mut self) {
        let latest = self.events.drain(self.renderer_inbox).into_iter().last();
        if let (Some(ev), Some(backend)) = (latest, &mut self.backend) {
            backend.resize(ev.size);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.open(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }

        event_loop.set_control_flow(self.control_flow());

        info!("resumed → paused={}", self.paused);
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.backend = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                let ev = WindowResized::from(new_size);
                self.paused = self.occluded || is_degenerate(ev.size);
                info!("Resized → {}x{} (paused={})", ev.size.x, ev.size.y, self.paused);
                self.events.publish(ev);
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.occluded = occluded;
                let size = self.window.as_ref().map(pixel_size).unwrap_or(UVec2::ZERO);
                self.paused = occluded || is_degenerate(size);
                info!("Occluded={} → paused={}", occluded, self.paused);
            }

            WindowEvent::Focused(focused) => {
                if self.focused != focused {
                    self.focused = focused;
                    info!("Focused({})", focused);
                    self.apply_vsync();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed
                    && !event.repeat
                    && event.logical_key == Key::Named(NamedKey::F5)
                {
                    self.reload();
                }
            }

            WindowEvent::RedrawRequested => {
                self.forward_events();
                if self.paused {
                    return;
                }

                let res = match &mut self.backend {
                    Some(backend) => backend.frame(),
                    None => return,
                };
                match res {
                    Ok(()) => self.frames = self.frames.saturating_add(1),
                    Err(e) => self.fail(event_loop, e.context("frame")),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.fatal.is_some() || self.window.is_none() {
            return;
        }

        if self.paused {
            // Keep delivering size changes so the swapchain is rebuilt the
            // moment the window comes back.
            self.forward_events();
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(self.control_flow());
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = AppCfg::load(&args.config)?;
    cfg.override_with(args.backend, args.vsync);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, args.config, (args.backend, args.vsync));
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
