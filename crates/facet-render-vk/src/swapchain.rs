// SPDX-License-Identifier: CEPL-1.0
use crate::device::Device;
use crate::error::{Stage, StageExt, VkError, VkResult};
use crate::frame::{Acquire, Present, Rebuild};
use crate::instance::Instance;
use crate::queues::QueueFamilies;
use crate::surface::Surface;
use ash::khr::swapchain;
use ash::vk;
use facet_math::{clamp_size, UVec2};
use facet_render::VsyncPolicy;
use tracing::info;

/// `VK_PRESENT_MODE_FIFO_LATEST_READY_EXT`; newer than the registry ash
/// was generated from.
pub const FIFO_LATEST_READY: vk::PresentModeKHR = vk::PresentModeKHR::from_raw(1_000_361_000);

const MAX_FRAMES_IN_FLIGHT: u32 = 3;

/// Present modes acceptable for a policy, best first. Every list ends in
/// FIFO, which all surfaces support.
pub fn present_mode_candidates(policy: VsyncPolicy) -> &'static [vk::PresentModeKHR] {
    use vk::PresentModeKHR as P;
    match policy {
        VsyncPolicy::Disabled => &[
            P::IMMEDIATE,
            P::MAILBOX,
            FIFO_LATEST_READY,
            P::FIFO_RELAXED,
            P::FIFO,
        ],
        VsyncPolicy::Strict => &[P::MAILBOX, FIFO_LATEST_READY, P::FIFO_RELAXED, P::FIFO],
        VsyncPolicy::Relaxed => &[FIFO_LATEST_READY, P::FIFO_RELAXED, P::FIFO],
    }
}

pub fn choose_present_mode(
    policy: VsyncPolicy,
    supported: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    present_mode_candidates(policy)
        .iter()
        .copied()
        .find(|m| supported.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn base_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    caps.min_image_count.max(2)
}

/// One image of headroom over the driver minimum, capped by the driver
/// maximum when it has one.
pub fn resolve_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = base_image_count(caps) + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

pub fn frames_in_flight(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    (base_image_count(caps) - 1).clamp(1, MAX_FRAMES_IN_FLIGHT)
}

/// The driver's current extent when it has one, else the window size
/// clamped into the supported range.
pub fn resolve_extent(caps: &vk::SurfaceCapabilitiesKHR, window: UVec2) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    let size = clamp_size(
        window,
        UVec2::new(caps.min_image_extent.width, caps.min_image_extent.height),
        UVec2::new(caps.max_image_extent.width, caps.max_image_extent.height),
    );
    vk::Extent2D {
        width: size.x,
        height: size.y,
    }
}

/// Everything about a swapchain that is decided before creating it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub frames_in_flight: u32,
    pub extent: vk::Extent2D,
}

impl SwapchainPlan {
    pub fn resolve(
        caps: &vk::SurfaceCapabilitiesKHR,
        modes: &[vk::PresentModeKHR],
        policy: VsyncPolicy,
        window: UVec2,
    ) -> Self {
        let image_count = resolve_image_count(caps);
        let frames_in_flight = frames_in_flight(caps).min(image_count);
        Self {
            present_mode: choose_present_mode(policy, modes),
            image_count,
            frames_in_flight,
            extent: resolve_extent(caps, window),
        }
    }

    pub fn is_drawable(&self) -> bool {
        self.extent.width > 0 && self.extent.height > 0
    }
}

pub fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        FIFO_LATEST_READY => "FIFO_LATEST_READY",
        _ => "OTHER",
    }
}

/// Maps `vkAcquireNextImageKHR` onto the frame loop's vocabulary. Anything
/// other than success, suboptimal or out-of-date is fatal.
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> VkResult<Acquire> {
    match result {
        Ok((image, false)) => Ok(Acquire::Image(image)),
        Ok((_, true)) => Ok(Acquire::Stale(Rebuild::SUBOPTIMAL)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::Stale(Rebuild::OUT_OF_DATE)),
        Err(code) => Err(VkError::Api {
            stage: Stage::Frame,
            call: "vkAcquireNextImageKHR",
            code,
        }),
    }
}

pub fn classify_present(result: Result<bool, vk::Result>) -> VkResult<Present> {
    match result {
        Ok(false) => Ok(Present::Done),
        Ok(true) => Ok(Present::Stale(Rebuild::SUBOPTIMAL)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::Stale(Rebuild::OUT_OF_DATE)),
        Err(code) => Err(VkError::Api {
            stage: Stage::Frame,
            call: "vkQueuePresentKHR",
            code,
        }),
    }
}

fn composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|a| supported.contains(*a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Per frame-in-flight slot.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// Surface-derived inputs shared by creation and recreation.
pub struct SwapchainTarget<'a> {
    pub surface: &'a Surface,
    pub physical: vk::PhysicalDevice,
    pub families: &'a QueueFamilies,
    pub vsync: VsyncPolicy,
    pub window: UVec2,
}

pub struct Swapchain {
    loader: swapchain::Device,
    raw: vk::SwapchainKHR,
    plan: SwapchainPlan,
    format: vk::SurfaceFormatKHR,
    images: Vec<vk::Image>,
    sync: Vec<FrameSync>,
}

unsafe fn create_raw(
    loader: &swapchain::Device,
    target: &SwapchainTarget<'_>,
    caps: &vk::SurfaceCapabilitiesKHR,
    plan: &SwapchainPlan,
    old: vk::SwapchainKHR,
) -> VkResult<(vk::SwapchainKHR, Vec<vk::Image>)> {
    let format = target.surface.format();
    let sharing = target.families.image_sharing();
    let (sharing_mode, index_count) = if sharing.len() > 1 {
        (vk::SharingMode::CONCURRENT, sharing.len() as u32)
    } else {
        (vk::SharingMode::EXCLUSIVE, 0)
    };

    let info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface: target.surface.raw(),
        min_image_count: plan.image_count,
        image_format: format.format,
        image_color_space: format.color_space,
        image_extent: plan.extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: sharing_mode,
        queue_family_index_count: index_count,
        p_queue_family_indices: sharing.as_ptr(),
        pre_transform: caps.current_transform,
        composite_alpha: composite_alpha(caps.supported_composite_alpha),
        present_mode: plan.present_mode,
        clipped: vk::TRUE,
        old_swapchain: old,
        ..Default::default()
    };

    let raw = unsafe { loader.create_swapchain(&info, None) }
        .stage(Stage::Swapchain, "vkCreateSwapchainKHR")?;
    let images = match unsafe { loader.get_swapchain_images(raw) } {
        Ok(images) => images,
        Err(code) => {
            unsafe { loader.destroy_swapchain(raw, None) };
            return Err(VkError::Api {
                stage: Stage::Swapchain,
                call: "vkGetSwapchainImagesKHR",
                code,
            });
        }
    };
    Ok((raw, images))
}

impl Swapchain {
    /// Queries the surface and resolves a plan without creating anything.
    ///
    /// # Safety
    /// `target.physical` must belong to the surface's instance.
    pub unsafe fn query_plan(
        target: &SwapchainTarget<'_>,
    ) -> VkResult<(vk::SurfaceCapabilitiesKHR, SwapchainPlan)> {
        let caps = unsafe { target.surface.capabilities(target.physical) }?;
        let modes = unsafe { target.surface.present_modes(target.physical) }?;
        Ok((caps, SwapchainPlan::resolve(&caps, &modes, target.vsync, target.window)))
    }

    /// # Safety
    /// `device` must be created from `instance` with the swapchain extension.
    pub unsafe fn new(
        instance: &Instance,
        device: &Device,
        target: &SwapchainTarget<'_>,
    ) -> VkResult<Self> {
        let loader = swapchain::Device::new(instance.raw(), device.raw());
        let (caps, plan) = unsafe { Self::query_plan(target) }?;
        let (raw, images) =
            unsafe { create_raw(&loader, target, &caps, &plan, vk::SwapchainKHR::null()) }?;

        let mut sc = Self {
            loader,
            raw,
            plan,
            format: target.surface.format(),
            images,
            sync: Vec::new(),
        };
        sc.log_ready();
        if let Err(e) = unsafe { sc.create_sync_objects(device) } {
            unsafe { sc.destroy(device) };
            return Err(e);
        }
        Ok(sc)
    }

    /// Replaces the swapchain in place. The current handle is handed to the
    /// driver as the old swapchain and destroyed once the new one exists.
    ///
    /// # Safety
    /// The device must be idle and nothing may still reference the images
    /// or sync objects.
    pub unsafe fn recreate(
        &mut self,
        device: &Device,
        target: &SwapchainTarget<'_>,
        caps: &vk::SurfaceCapabilitiesKHR,
        plan: SwapchainPlan,
    ) -> VkResult<()> {
        unsafe { self.destroy_sync_objects(device) };
        self.images.clear();

        let old = self.raw;
        let (raw, images) = unsafe { create_raw(&self.loader, target, caps, &plan, old) }?;
        unsafe { self.loader.destroy_swapchain(old, None) };

        self.raw = raw;
        self.images = images;
        self.plan = plan;
        self.format = target.surface.format();
        self.log_ready();

        unsafe { self.create_sync_objects(device) }
    }

    fn log_ready(&self) {
        info!(
            "swapchain ready: {}x{}, {} image(s) (asked {}), {} frame(s) in flight, {}, {:?}",
            self.plan.extent.width,
            self.plan.extent.height,
            self.images.len(),
            self.plan.image_count,
            self.plan.frames_in_flight,
            pm_name(self.plan.present_mode),
            self.format.format
        );
    }

    /// One semaphore pair and one signalled fence per frame in flight.
    unsafe fn create_sync_objects(&mut self, device: &Device) -> VkResult<()> {
        let d = device.raw();
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };

        for _ in 0..self.plan.frames_in_flight {
            let image_available = unsafe { d.create_semaphore(&sem_ci, None) }
                .stage(Stage::Sync, "vkCreateSemaphore")?;
            let render_finished = match unsafe { d.create_semaphore(&sem_ci, None) } {
                Ok(s) => s,
                Err(code) => {
                    unsafe { d.destroy_semaphore(image_available, None) };
                    return Err(VkError::Api {
                        stage: Stage::Sync,
                        call: "vkCreateSemaphore",
                        code,
                    });
                }
            };
            let in_flight = match unsafe { d.create_fence(&fence_ci, None) } {
                Ok(f) => f,
                Err(code) => {
                    unsafe {
                        d.destroy_semaphore(image_available, None);
                        d.destroy_semaphore(render_finished, None);
                    }
                    return Err(VkError::Api {
                        stage: Stage::Sync,
                        call: "vkCreateFence",
                        code,
                    });
                }
            };
            self.sync.push(FrameSync {
                image_available,
                render_finished,
                in_flight,
            });
        }
        Ok(())
    }

    unsafe fn destroy_sync_objects(&mut self, device: &Device) {
        let d = device.raw();
        for s in self.sync.drain(..) {
            unsafe {
                d.destroy_semaphore(s.image_available, None);
                d.destroy_semaphore(s.render_finished, None);
                d.destroy_fence(s.in_flight, None);
            }
        }
    }

    /// # Safety
    /// `slot` must be below `frames_in_flight()` and its semaphore unsignalled.
    pub unsafe fn acquire(&self, slot: u32) -> VkResult<Acquire> {
        let sem = self.sync[slot as usize].image_available;
        classify_acquire(unsafe {
            self.loader
                .acquire_next_image(self.raw, u64::MAX, sem, vk::Fence::null())
        })
    }

    /// Presents `image`, waiting on the slot's render-finished semaphore.
    ///
    /// # Safety
    /// `queue` must be able to present to this swapchain's surface.
    pub unsafe fn present(&self, queue: vk::Queue, slot: u32, image: u32) -> VkResult<Present> {
        let wait = [self.sync[slot as usize].render_finished];
        let swapchains = [self.raw];
        let indices = [image];
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            swapchain_count: swapchains.len() as u32,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: indices.as_ptr(),
            ..Default::default()
        };
        classify_present(unsafe { self.loader.queue_present(queue, &info) })
    }

    pub fn sync(&self, slot: u32) -> &FrameSync {
        &self.sync[slot as usize]
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.sync.len() as u32
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// # Safety
    /// Device idle; framebuffers over these images already destroyed.
    pub unsafe fn destroy(&mut self, device: &Device) {
        unsafe { self.destroy_sync_objects(device) };
        self.images.clear();
        unsafe { self.loader.destroy_swapchain(self.raw, None) };
        self.raw = vk::SwapchainKHR::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::PresentModeKHR as P;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn strict_prefers_mailbox() {
        let modes = [P::FIFO, P::MAILBOX, P::IMMEDIATE];
        assert_eq!(choose_present_mode(VsyncPolicy::Strict, &modes), P::MAILBOX);
    }

    #[test]
    fn relaxed_with_only_fifo() {
        assert_eq!(choose_present_mode(VsyncPolicy::Relaxed, &[P::FIFO]), P::FIFO);
    }

    #[test]
    fn relaxed_never_picks_mailbox_or_immediate() {
        let modes = [P::IMMEDIATE, P::MAILBOX, P::FIFO_RELAXED, P::FIFO];
        assert_eq!(
            choose_present_mode(VsyncPolicy::Relaxed, &modes),
            P::FIFO_RELAXED
        );
    }

    #[test]
    fn disabled_prefers_immediate_then_latest_ready() {
        let all = [P::FIFO, P::MAILBOX, P::IMMEDIATE];
        assert_eq!(choose_present_mode(VsyncPolicy::Disabled, &all), P::IMMEDIATE);
        let no_tearing = [P::FIFO, FIFO_LATEST_READY];
        assert_eq!(
            choose_present_mode(VsyncPolicy::Disabled, &no_tearing),
            FIFO_LATEST_READY
        );
    }

    #[test]
    fn every_policy_ends_in_fifo() {
        for p in [VsyncPolicy::Disabled, VsyncPolicy::Strict, VsyncPolicy::Relaxed] {
            assert_eq!(present_mode_candidates(p).last(), Some(&P::FIFO));
            assert_eq!(choose_present_mode(p, &[]), P::FIFO);
        }
    }

    #[test]
    fn image_count_adds_headroom_within_max() {
        assert_eq!(resolve_image_count(&caps(2, 3)), 3);
        assert_eq!(resolve_image_count(&caps(2, 8)), 3);
        assert_eq!(resolve_image_count(&caps(1, 0)), 3);
        assert_eq!(resolve_image_count(&caps(3, 3)), 3);
        assert_eq!(resolve_image_count(&caps(4, 0)), 5);
    }

    #[test]
    fn frames_in_flight_bounds() {
        for (min, max) in [(1, 1), (1, 0), (2, 3), (3, 3), (4, 0), (8, 16), (2, 2)] {
            let plan = SwapchainPlan::resolve(&caps(min, max), &[P::FIFO], VsyncPolicy::Strict, UVec2::ONE);
            assert!(
                (1..=3).contains(&plan.frames_in_flight),
                "min {min} max {max}: {plan:?}"
            );
            assert!(plan.frames_in_flight <= plan.image_count, "{plan:?}");
        }
        assert_eq!(frames_in_flight(&caps(2, 3)), 1);
        assert_eq!(frames_in_flight(&caps(3, 0)), 2);
        assert_eq!(frames_in_flight(&caps(8, 0)), 3);
    }

    #[test]
    fn current_extent_is_authoritative() {
        let e = resolve_extent(&caps(2, 3), UVec2::new(800, 600));
        assert_eq!((e.width, e.height), (1280, 720));
    }

    #[test]
    fn undefined_extent_clamps_window_size() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        c.max_image_extent = vk::Extent2D {
            width: 1024,
            height: 1024,
        };
        let e = resolve_extent(&c, UVec2::new(1920, 600));
        assert_eq!((e.width, e.height), (1024, 600));
    }

    #[test]
    fn zero_extent_is_not_drawable() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 0,
            height: 0,
        };
        let plan = SwapchainPlan::resolve(&c, &[P::FIFO], VsyncPolicy::Strict, UVec2::ZERO);
        assert!(!plan.is_drawable());
    }

    #[test]
    fn resolve_is_idempotent_for_unchanged_inputs() {
        let c = caps(2, 3);
        let modes = [P::FIFO, P::MAILBOX];
        let a = SwapchainPlan::resolve(&c, &modes, VsyncPolicy::Strict, UVec2::new(1280, 720));
        let b = SwapchainPlan::resolve(&c, &modes, VsyncPolicy::Strict, UVec2::new(1280, 720));
        assert_eq!(a, b);
    }

    #[test]
    fn acquire_results() {
        assert_eq!(classify_acquire(Ok((2, false))).unwrap(), Acquire::Image(2));
        assert_eq!(
            classify_acquire(Ok((2, true))).unwrap(),
            Acquire::Stale(Rebuild::SUBOPTIMAL)
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            Acquire::Stale(Rebuild::OUT_OF_DATE)
        );
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn present_results() {
        assert_eq!(classify_present(Ok(false)).unwrap(), Present::Done);
        assert_eq!(
            classify_present(Ok(true)).unwrap(),
            Present::Stale(Rebuild::SUBOPTIMAL)
        );
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            Present::Stale(Rebuild::OUT_OF_DATE)
        );
        assert!(matches!(
            classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(VkError::Api { stage: Stage::Frame, .. })
        ));
    }

    #[test]
    fn opaque_alpha_unless_unsupported() {
        let all = vk::CompositeAlphaFlagsKHR::OPAQUE | vk::CompositeAlphaFlagsKHR::INHERIT;
        assert_eq!(composite_alpha(all), vk::CompositeAlphaFlagsKHR::OPAQUE);
        assert_eq!(
            composite_alpha(vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED),
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
        );
    }

    #[test]
    fn latest_ready_has_a_name() {
        assert_eq!(pm_name(FIFO_LATEST_READY), "FIFO_LATEST_READY");
        assert_eq!(pm_name(P::from_raw(42)), "OTHER");
    }
}
