// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan backend: instance and device bring-up, swapchain lifecycle and
//! frames-in-flight synchronisation. Every frame only clears.

mod commands;
mod device;
pub mod error;
pub mod frame;
mod framebuffer;
mod instance;
mod physical;
mod queues;
mod render_pass;
mod surface;
pub mod swapchain;

use anyhow::{Context, Result};
use ash::vk;
use facet_math::{UVec2, Vec4};
use facet_render::{RenderSettings, Renderer, VsyncPolicy};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::commands::{clear_value, CommandSystem, FrameSubmit, PassTarget};
use crate::device::Device;
use crate::framebuffer::Framebuffer;
use crate::instance::Instance;
use crate::physical::PhysicalDevice;
use crate::queues::{QueueFamilies, Queues};
use crate::render_pass::RenderPass;
use crate::surface::Surface;
use crate::swapchain::{Swapchain, SwapchainTarget};

pub use error::{Stage, VkError, VkResult};
pub use frame::{FrameLoop, FrameStatus, Presentation, Rebuild};
pub use swapchain::SwapchainPlan;

/// Runs `undo` if `step` failed. Bring-up chains this after every fallible
/// step so a failure releases whatever was created before it.
fn or_undo<T, E>(step: Result<T, E>, undo: impl FnOnce()) -> Result<T, E> {
    if step.is_err() {
        undo();
    }
    step
}

/// Every GPU object the backend owns. Field order is creation order;
/// [`Gpu::destroy`] walks it backwards.
struct Gpu {
    instance: Instance,
    physical: PhysicalDevice,
    surface: Surface,
    device: Device,
    queues: Queues,
    render_pass: RenderPass,
    swapchain: Swapchain,
    framebuffers: Vec<Framebuffer>,
    commands: CommandSystem,

    want: Presentation,
    clear: Vec4,
}

impl Gpu {
    unsafe fn build(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: UVec2,
        settings: &RenderSettings,
    ) -> VkResult<Self> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();
        let want = Presentation {
            window: size,
            vsync: settings.vsync,
        };

        let mut instance = unsafe { Instance::new(dh, &settings.vulkan) }?;
        let physical = or_undo(unsafe { PhysicalDevice::select(&instance) }, || unsafe {
            instance.destroy()
        })?;
        let mut surface = or_undo(unsafe { Surface::new(&instance, dh, wh) }, || unsafe {
            instance.destroy()
        })?;

        let families = unsafe { surface.select_format(physical.raw()) }.and_then(|()| {
            let family_props = unsafe { physical.queue_families(&instance) };
            queues::discover(&family_props, |i| unsafe {
                surface.supports_present(physical.raw(), i)
            })
        });
        let families = or_undo(families, || unsafe {
            surface.destroy();
            instance.destroy();
        })?;

        let device = unsafe { Device::new(&instance, &physical, &families, &settings.vulkan) };
        let mut device = or_undo(device, || unsafe {
            surface.destroy();
            instance.destroy();
        })?;
        let queues = unsafe { Queues::load(device.raw(), families) };

        let chain = unsafe { build_chain(&instance, &device, &surface, &physical, &families, want) };
        let (render_pass, swapchain, framebuffers, commands) = or_undo(chain, || unsafe {
            device.destroy();
            surface.destroy();
            instance.destroy();
        })?;

        Ok(Self {
            instance,
            physical,
            surface,
            device,
            queues,
            render_pass,
            swapchain,
            framebuffers,
            commands,
            want,
            clear: settings.clear_color,
        })
    }

    fn target(&self) -> SwapchainTarget<'_> {
        SwapchainTarget {
            surface: &self.surface,
            physical: self.physical.raw(),
            families: &self.queues.families,
            vsync: self.want.vsync,
            window: self.want.window,
        }
    }

    unsafe fn destroy_swapchain_dependents(&mut self) {
        unsafe { self.commands.destroy(&self.device) };
        for fb in &mut self.framebuffers {
            unsafe { fb.destroy(&self.device) };
        }
        self.framebuffers.clear();
    }

    unsafe fn destroy(&mut self) {
        unsafe {
            if let Err(e) = self.device.wait_idle() {
                warn!("teardown: {e}");
            }
            self.destroy_swapchain_dependents();
            self.swapchain.destroy(&self.device);
            self.render_pass.destroy(&self.device);
            self.device.destroy();
            self.surface.destroy();
            self.instance.destroy();
        }
    }
}

type Chain = (RenderPass, Swapchain, Vec<Framebuffer>, CommandSystem);

/// Render pass, swapchain and everything sized by it. Cleans up after
/// itself on failure; the caller only owns what it returns.
unsafe fn build_chain(
    instance: &Instance,
    device: &Device,
    surface: &Surface,
    physical: &PhysicalDevice,
    families: &QueueFamilies,
    want: Presentation,
) -> VkResult<Chain> {
    let mut render_pass = unsafe { RenderPass::new(device, surface.format().format) }?;

    let target = SwapchainTarget {
        surface,
        physical: physical.raw(),
        families,
        vsync: want.vsync,
        window: want.window,
    };
    let mut swapchain = or_undo(unsafe { Swapchain::new(instance, device, &target) }, || unsafe {
        render_pass.destroy(device)
    })?;

    let dependents = unsafe { swapchain_dependents(device, &swapchain, &render_pass, families) };
    let (framebuffers, commands) = or_undo(dependents, || unsafe {
        swapchain.destroy(device);
        render_pass.destroy(device);
    })?;

    Ok((render_pass, swapchain, framebuffers, commands))
}

/// One framebuffer and one command buffer per swapchain image.
unsafe fn swapchain_dependents(
    device: &Device,
    swapchain: &Swapchain,
    render_pass: &RenderPass,
    families: &QueueFamilies,
) -> VkResult<(Vec<Framebuffer>, CommandSystem)> {
    let mut framebuffers = unsafe {
        Framebuffer::for_images(
            device,
            swapchain.images(),
            swapchain.format().format,
            render_pass.raw(),
            swapchain.extent(),
        )
    }?;
    let commands = unsafe { CommandSystem::new(device, families.graphics, framebuffers.len()) };
    let commands = or_undo(commands, || {
        for fb in &mut framebuffers {
            unsafe { fb.destroy(device) };
        }
    })?;
    Ok((framebuffers, commands))
}

impl frame::FrameDriver for Gpu {
    fn frames_in_flight(&self) -> u32 {
        self.swapchain.frames_in_flight()
    }

    fn rebuild(&mut self) -> VkResult<bool> {
        let (caps, plan) = unsafe { Swapchain::query_plan(&self.target()) }?;
        if !plan.is_drawable() {
            return Ok(false);
        }

        unsafe {
            self.device.wait_idle()?;
            self.destroy_swapchain_dependents();

            let target = SwapchainTarget {
                surface: &self.surface,
                physical: self.physical.raw(),
                families: &self.queues.families,
                vsync: self.want.vsync,
                window: self.want.window,
            };
            self.swapchain
                .recreate(&self.device, &target, &caps, plan)?;
            let (framebuffers, commands) = swapchain_dependents(
                &self.device,
                &self.swapchain,
                &self.render_pass,
                &self.queues.families,
            )?;
            self.framebuffers = framebuffers;
            self.commands = commands;
        }
        Ok(true)
    }

    fn await_slot(&mut self, slot: u32) -> VkResult<()> {
        unsafe {
            self.device
                .wait_and_reset(self.swapchain.sync(slot).in_flight)
        }
    }

    fn acquire(&mut self, slot: u32) -> VkResult<frame::Acquire> {
        unsafe { self.swapchain.acquire(slot) }
    }

    fn record(&mut self, image: u32) -> VkResult<()> {
        let target = PassTarget {
            render_pass: self.render_pass.raw(),
            framebuffer: self.framebuffers[image as usize].raw(),
            extent: self.swapchain.extent(),
        };
        unsafe {
            self.commands
                .record(&self.device, image, target, clear_value(self.clear))
        }
    }

    fn submit(&mut self, slot: u32, image: u32) -> VkResult<()> {
        let sync = self.swapchain.sync(slot);
        let submit = FrameSubmit {
            command_buffer: self.commands.buffer(image),
            wait: sync.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal: sync.render_finished,
            fence: sync.in_flight,
        };
        unsafe { CommandSystem::submit(&self.device, self.queues.graphics, &submit) }
    }

    fn present(&mut self, slot: u32, image: u32) -> VkResult<frame::Present> {
        unsafe { self.swapchain.present(self.queues.present, slot, image) }
    }
}

pub struct VkRenderer {
    gpu: Gpu,
    frames: FrameLoop,
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe { self.gpu.destroy() };
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: UVec2,
        settings: RenderSettings,
    ) -> Result<Self> {
        let gpu = unsafe { Gpu::build(window, display, size, &settings) }
            .context("vulkan initialisation failed")?;
        info!(
            "Vulkan renderer ready on {} ({} device extension(s))",
            gpu.physical.name(),
            gpu.device.extensions().len()
        );
        Ok(Self {
            gpu,
            frames: FrameLoop::new(),
        })
    }

    fn resize(&mut self, size: UVec2) {
        debug!(
            "resize {}x{} -> {}x{}",
            self.gpu.want.window.x, self.gpu.want.window.y, size.x, size.y
        );
        self.frames.resize(&mut self.gpu.want, size);
    }

    fn pre_update(&mut self) -> Result<()> {
        if self.gpu.want.is_paused() {
            return Ok(());
        }
        match self.frames.pre_update(&mut self.gpu)? {
            FrameStatus::Aborted(why) => debug!("acquire aborted ({why:?}); rebuilding next frame"),
            FrameStatus::Deferred => debug!("surface has no area; rebuild deferred"),
            FrameStatus::Recorded { .. } => {}
        }
        Ok(())
    }

    fn post_update(&mut self) -> Result<()> {
        if let Some(frame::Present::Stale(why)) = self.frames.post_update(&mut self.gpu)? {
            debug!("present flagged {why:?}; rebuilding next frame");
        }
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: Vec4) {
        self.gpu.clear = rgba;
    }

    fn set_vsync(&mut self, policy: VsyncPolicy) {
        let from = self.gpu.want.vsync;
        if self.frames.set_vsync(&mut self.gpu.want, policy) {
            info!("vsync {from} -> {policy}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_runs_only_on_failure() {
        let mut undone = 0;
        let ok: VkResult<u32> = or_undo(Ok(3), || undone += 1);
        assert!(matches!(ok, Ok(3)));
        assert_eq!(undone, 0);

        let err: VkResult<u32> = or_undo(Err(VkError::NoGraphicsQueue), || undone += 1);
        assert!(matches!(err, Err(VkError::NoGraphicsQueue)));
        assert_eq!(undone, 1);
    }

    /// Three owned steps, the way `Gpu::build` chains them.
    fn staged(fail_at: usize, log: &mut Vec<&'static str>) -> VkResult<()> {
        let step = |n: usize, name: &'static str, log: &mut Vec<&'static str>| {
            if n == fail_at {
                Err(VkError::NoPhysicalDevice)
            } else {
                log.push(name);
                Ok(())
            }
        };
        step(0, "instance", log)?;
        let r = step(1, "surface", log);
        or_undo(r, || log.push("~instance"))?;
        let r = step(2, "device", log);
        or_undo(r, || {
            log.push("~surface");
            log.push("~instance");
        })?;
        Ok(())
    }

    #[test]
    fn failed_step_releases_earlier_ones_in_reverse() {
        let mut log = Vec::new();
        assert!(staged(2, &mut log).is_err());
        assert_eq!(log, vec!["instance", "surface", "~surface", "~instance"]);

        let mut log = Vec::new();
        assert!(staged(1, &mut log).is_err());
        assert_eq!(log, vec!["instance", "~instance"]);

        let mut log = Vec::new();
        assert!(staged(3, &mut log).is_ok());
        assert_eq!(log, vec!["instance", "surface", "device"]);
    }
}
