// SPDX-License-Identifier: CEPL-1.0
//! Per-frame sequencing: rebuild check, fence wait, acquire, record,
//! submit, present, advance. The GPU side sits behind [`FrameDriver`].

use crate::error::VkResult;
use bitflags::bitflags;
use facet_math::{is_degenerate, UVec2};
use facet_render::VsyncPolicy;
use tracing::{debug, trace};

bitflags! {
    /// Why the swapchain has to be rebuilt before the next frame.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Rebuild: u8 {
        const SUBOPTIMAL = 1 << 0;
        const OUT_OF_DATE = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image(u32),
    Stale(Rebuild),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Present {
    Done,
    Stale(Rebuild),
}

/// What `pre_update` did this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Recorded { slot: u32, image: u32 },
    /// The surface has no area; nothing was touched.
    Deferred,
    Aborted(Rebuild),
}

pub trait FrameDriver {
    fn frames_in_flight(&self) -> u32;
    /// Recreates everything derived from the surface. `Ok(false)` means the
    /// surface is currently unusable and the rebuild should be retried.
    fn rebuild(&mut self) -> VkResult<bool>;
    fn await_slot(&mut self, slot: u32) -> VkResult<()>;
    fn acquire(&mut self, slot: u32) -> VkResult<Acquire>;
    fn record(&mut self, image: u32) -> VkResult<()>;
    fn submit(&mut self, slot: u32, image: u32) -> VkResult<()>;
    fn present(&mut self, slot: u32, image: u32) -> VkResult<Present>;
}

/// What the window and settings currently ask of the swapchain. Rebuilds
/// read it; only [`FrameLoop::resize`] and [`FrameLoop::set_vsync`] write it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Presentation {
    pub window: UVec2,
    pub vsync: VsyncPolicy,
}

impl Presentation {
    /// Nothing can be drawn into a surface without area.
    pub fn is_paused(&self) -> bool {
        is_degenerate(self.window)
    }
}

#[derive(Debug, Default)]
pub struct FrameLoop {
    slot: u32,
    pending: Rebuild,
    recorded: Option<u32>,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn pending(&self) -> Rebuild {
        self.pending
    }

    pub fn request_rebuild(&mut self, why: Rebuild) {
        self.pending |= why;
    }

    /// Records the new size and marks the swapchain out of date. A repeated
    /// size is not filtered; rebuilding at an unchanged size is harmless.
    pub fn resize(&mut self, want: &mut Presentation, size: UVec2) {
        want.window = size;
        self.request_rebuild(Rebuild::OUT_OF_DATE);
    }

    /// Returns false when `policy` is already in effect.
    pub fn set_vsync(&mut self, want: &mut Presentation, policy: VsyncPolicy) -> bool {
        if want.vsync == policy {
            return false;
        }
        want.vsync = policy;
        self.request_rebuild(Rebuild::SUBOPTIMAL);
        true
    }

    pub fn pre_update<D: FrameDriver>(&mut self, driver: &mut D) -> VkResult<FrameStatus> {
        self.recorded = None;

        // Runs before the fence wait: an aborted acquire leaves this slot's
        // fence reset and never signalled.
        if !self.pending.is_empty() {
            if !driver.rebuild()? {
                trace!("rebuild deferred ({:?})", self.pending);
                return Ok(FrameStatus::Deferred);
            }
            debug!("swapchain rebuilt ({:?})", self.pending);
            self.pending = Rebuild::empty();
            self.slot = 0;
        }

        driver.await_slot(self.slot)?;

        match driver.acquire(self.slot)? {
            Acquire::Stale(why) => {
                self.pending |= why;
                Ok(FrameStatus::Aborted(why))
            }
            Acquire::Image(image) => {
                driver.record(image)?;
                self.recorded = Some(image);
                Ok(FrameStatus::Recorded {
                    slot: self.slot,
                    image,
                })
            }
        }
    }

    /// Submits and presents the frame recorded by the last `pre_update`.
    /// Returns `None` when there was nothing to submit.
    pub fn post_update<D: FrameDriver>(&mut self, driver: &mut D) -> VkResult<Option<Present>> {
        let Some(image) = self.recorded.take() else {
            return Ok(None);
        };

        driver.submit(self.slot, image)?;
        let outcome = driver.present(self.slot, image)?;
        match outcome {
            Present::Done => {
                self.slot = (self.slot + 1) % driver.frames_in_flight().max(1);
            }
            Present::Stale(why) => self.pending |= why,
        }
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VkError;
    use std::collections::VecDeque;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Call {
        Rebuild,
        Await(u32),
        Acquire(u32),
        Record(u32),
        Submit(u32, u32),
        Present(u32, u32),
    }

    /// Hands out images round-robin unless a scripted answer is queued.
    struct Script {
        fif: u32,
        images: u32,
        next_image: u32,
        surface_ready: bool,
        acquires: VecDeque<Acquire>,
        presents: VecDeque<Present>,
        calls: Vec<Call>,
    }

    impl Script {
        fn new(fif: u32, images: u32) -> Self {
            Self {
                fif,
                images,
                next_image: 0,
                surface_ready: true,
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                calls: Vec::new(),
            }
        }
    }

    impl FrameDriver for Script {
        fn frames_in_flight(&self) -> u32 {
            self.fif
        }
        fn rebuild(&mut self) -> VkResult<bool> {
            self.calls.push(Call::Rebuild);
            Ok(self.surface_ready)
        }
        fn await_slot(&mut self, slot: u32) -> VkResult<()> {
            self.calls.push(Call::Await(slot));
            Ok(())
        }
        fn acquire(&mut self, slot: u32) -> VkResult<Acquire> {
            self.calls.push(Call::Acquire(slot));
            Ok(self.acquires.pop_front().unwrap_or_else(|| {
                let i = self.next_image;
                self.next_image = (i + 1) % self.images;
                Acquire::Image(i)
            }))
        }
        fn record(&mut self, image: u32) -> VkResult<()> {
            self.calls.push(Call::Record(image));
            Ok(())
        }
        fn submit(&mut self, slot: u32, image: u32) -> VkResult<()> {
            self.calls.push(Call::Submit(slot, image));
            Ok(())
        }
        fn present(&mut self, slot: u32, image: u32) -> VkResult<Present> {
            self.calls.push(Call::Present(slot, image));
            Ok(self.presents.pop_front().unwrap_or(Present::Done))
        }
    }

    fn cycle(frames: &mut FrameLoop, d: &mut Script) -> (FrameStatus, Option<Present>) {
        let pre = frames.pre_update(d).unwrap();
        let post = frames.post_update(d).unwrap();
        (pre, post)
    }

    #[test]
    fn slots_cycle_through_frames_in_flight() {
        let mut d = Script::new(2, 3);
        let mut frames = FrameLoop::new();
        let mut slots = Vec::new();
        for _ in 0..5 {
            slots.push(frames.slot());
            let (pre, post) = cycle(&mut frames, &mut d);
            assert!(matches!(pre, FrameStatus::Recorded { .. }));
            assert_eq!(post, Some(Present::Done));
        }
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(frames.slot(), 1);
    }

    #[test]
    fn healthy_cycle_order() {
        let mut d = Script::new(2, 3);
        let mut frames = FrameLoop::new();
        cycle(&mut frames, &mut d);
        assert_eq!(
            d.calls,
            vec![
                Call::Await(0),
                Call::Acquire(0),
                Call::Record(0),
                Call::Submit(0, 0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn out_of_date_acquire_aborts_without_submit_or_present() {
        let mut d = Script::new(2, 3);
        d.acquires.push_back(Acquire::Stale(Rebuild::OUT_OF_DATE));
        let mut frames = FrameLoop::new();

        let (pre, post) = cycle(&mut frames, &mut d);
        assert_eq!(pre, FrameStatus::Aborted(Rebuild::OUT_OF_DATE));
        assert_eq!(post, None);
        assert_eq!(d.calls, vec![Call::Await(0), Call::Acquire(0)]);
        assert_eq!(frames.pending(), Rebuild::OUT_OF_DATE);
        assert_eq!(frames.slot(), 0);
    }

    #[test]
    fn suboptimal_acquire_also_aborts() {
        let mut d = Script::new(2, 3);
        d.acquires.push_back(Acquire::Stale(Rebuild::SUBOPTIMAL));
        let mut frames = FrameLoop::new();
        let (pre, _) = cycle(&mut frames, &mut d);
        assert_eq!(pre, FrameStatus::Aborted(Rebuild::SUBOPTIMAL));
        assert!(!d.calls.iter().any(|c| matches!(c, Call::Record(_))));
    }

    #[test]
    fn rebuild_happens_before_the_next_fence_wait() {
        let mut d = Script::new(2, 3);
        d.acquires.push_back(Acquire::Stale(Rebuild::OUT_OF_DATE));
        let mut frames = FrameLoop::new();
        cycle(&mut frames, &mut d);
        d.calls.clear();

        let (pre, post) = cycle(&mut frames, &mut d);
        assert!(matches!(pre, FrameStatus::Recorded { slot: 0, .. }));
        assert_eq!(post, Some(Present::Done));
        assert_eq!(d.calls[0], Call::Rebuild);
        assert_eq!(d.calls[1], Call::Await(0));
        assert!(frames.pending().is_empty());
    }

    #[test]
    fn flagged_present_keeps_the_slot_and_rebuilds_next_cycle() {
        let mut d = Script::new(2, 3);
        let mut frames = FrameLoop::new();
        cycle(&mut frames, &mut d);
        assert_eq!(frames.slot(), 1);

        d.presents.push_back(Present::Stale(Rebuild::SUBOPTIMAL));
        let (_, post) = cycle(&mut frames, &mut d);
        assert_eq!(post, Some(Present::Stale(Rebuild::SUBOPTIMAL)));
        assert_eq!(frames.slot(), 1);
        assert_eq!(frames.pending(), Rebuild::SUBOPTIMAL);

        d.calls.clear();
        cycle(&mut frames, &mut d);
        assert_eq!(d.calls[0], Call::Rebuild);
        // Slots restart after a rebuild.
        assert_eq!(d.calls[1], Call::Await(0));
    }

    #[test]
    fn zero_area_surface_defers_and_keeps_flags() {
        let mut d = Script::new(2, 3);
        d.surface_ready = false;
        let mut frames = FrameLoop::new();
        frames.request_rebuild(Rebuild::OUT_OF_DATE);

        for _ in 0..3 {
            let (pre, post) = cycle(&mut frames, &mut d);
            assert_eq!(pre, FrameStatus::Deferred);
            assert_eq!(post, None);
        }
        assert_eq!(d.calls, vec![Call::Rebuild; 3]);
        assert_eq!(frames.pending(), Rebuild::OUT_OF_DATE);

        d.surface_ready = true;
        let (pre, _) = cycle(&mut frames, &mut d);
        assert!(matches!(pre, FrameStatus::Recorded { .. }));
        assert!(frames.pending().is_empty());
    }

    #[test]
    fn flags_accumulate() {
        let mut frames = FrameLoop::new();
        frames.request_rebuild(Rebuild::SUBOPTIMAL);
        frames.request_rebuild(Rebuild::OUT_OF_DATE);
        assert_eq!(frames.pending(), Rebuild::all());
    }

    #[test]
    fn single_frame_in_flight_stays_on_slot_zero() {
        let mut d = Script::new(1, 2);
        let mut frames = FrameLoop::new();
        for _ in 0..3 {
            cycle(&mut frames, &mut d);
            assert_eq!(frames.slot(), 0);
        }
    }

    fn want(x: u32, y: u32) -> Presentation {
        Presentation {
            window: UVec2::new(x, y),
            vsync: VsyncPolicy::Strict,
        }
    }

    #[test]
    fn resize_rebuilds_before_the_next_acquire() {
        let mut d = Script::new(2, 3);
        let mut frames = FrameLoop::new();
        let mut w = want(800, 600);
        cycle(&mut frames, &mut d);

        frames.resize(&mut w, UVec2::new(1024, 768));
        assert_eq!(w.window, UVec2::new(1024, 768));
        assert_eq!(frames.pending(), Rebuild::OUT_OF_DATE);
        assert!(!w.is_paused());

        d.calls.clear();
        let (pre, _) = cycle(&mut frames, &mut d);
        assert_eq!(pre, FrameStatus::Recorded { slot: 0, image: 1 });
        assert_eq!(&d.calls[..2], &[Call::Rebuild, Call::Await(0)]);
        assert!(frames.pending().is_empty());
    }

    #[test]
    fn repeated_size_still_marks_out_of_date() {
        let mut frames = FrameLoop::new();
        let mut w = want(800, 600);
        frames.resize(&mut w, UVec2::new(800, 600));
        assert_eq!(frames.pending(), Rebuild::OUT_OF_DATE);
    }

    #[test]
    fn zero_size_pauses() {
        let mut frames = FrameLoop::new();
        let mut w = want(800, 600);
        frames.resize(&mut w, UVec2::new(0, 600));
        assert!(w.is_paused());
        frames.resize(&mut w, UVec2::new(640, 480));
        assert!(!w.is_paused());
        assert_eq!(frames.pending(), Rebuild::OUT_OF_DATE);
    }

    #[test]
    fn vsync_change_marks_suboptimal() {
        let mut d = Script::new(2, 3);
        let mut frames = FrameLoop::new();
        let mut w = want(800, 600);

        assert!(!frames.set_vsync(&mut w, VsyncPolicy::Strict));
        assert!(frames.pending().is_empty());

        assert!(frames.set_vsync(&mut w, VsyncPolicy::Disabled));
        assert_eq!(w.vsync, VsyncPolicy::Disabled);
        assert_eq!(frames.pending(), Rebuild::SUBOPTIMAL);

        cycle(&mut frames, &mut d);
        assert_eq!(d.calls[0], Call::Rebuild);
        assert!(frames.pending().is_empty());
    }

    struct Broken;

    impl FrameDriver for Broken {
        fn frames_in_flight(&self) -> u32 {
            1
        }
        fn rebuild(&mut self) -> VkResult<bool> {
            Ok(true)
        }
        fn await_slot(&mut self, _: u32) -> VkResult<()> {
            Ok(())
        }
        fn acquire(&mut self, _: u32) -> VkResult<Acquire> {
            Err(VkError::NoSurfaceFormats)
        }
        fn record(&mut self, _: u32) -> VkResult<()> {
            Ok(())
        }
        fn submit(&mut self, _: u32, _: u32) -> VkResult<()> {
            Ok(())
        }
        fn present(&mut self, _: u32, _: u32) -> VkResult<Present> {
            Ok(Present::Done)
        }
    }

    #[test]
    fn driver_errors_propagate() {
        let mut frames = FrameLoop::new();
        assert!(frames.pre_update(&mut Broken).is_err());
        assert_eq!(frames.post_update(&mut Broken).unwrap(), None);
    }
}
