// SPDX-License-Identifier: CEPL-1.0
use std::collections::VecDeque;

use ash::vk::{self, Handle};
use prism_render::{FrameInput, RenderSize};
use prism_render_vk::{
    AcquireStatus, FrameBackend, FrameLoop, FrameSlot, FrameState, PresentStatus, RebuildStatus,
    VkError, VkResult,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Event {
    CreateSlots(usize),
    DestroySlots(usize),
    Wait(vk::Fence),
    Reset(vk::Fence),
    Acquire(vk::Semaphore),
    Prepare(u32),
    Submit(u32, vk::Fence),
    Present(u32),
    WaitIdle,
    Rebuild(RenderSize),
}

/// Records every call and answers from scripts, falling back to a healthy
/// round-robin swapchain.
struct FakeBackend {
    images: usize,
    next_image: u32,
    extent: RenderSize,
    next_handle: u64,
    events: Vec<Event>,
    acquire_script: VecDeque<VkResult<AcquireStatus>>,
    submit_script: VecDeque<VkResult<()>>,
    present_script: VecDeque<VkResult<PresentStatus>>,
    wait_script: VecDeque<VkResult<()>>,
    images_after_rebuild: Option<usize>,
    surface_minimized: bool,
}

impl FakeBackend {
    fn new(images: usize, extent: RenderSize) -> Self {
        Self {
            images,
            next_image: 0,
            extent,
            next_handle: 1,
            events: Vec::new(),
            acquire_script: VecDeque::new(),
            submit_script: VecDeque::new(),
            present_script: VecDeque::new(),
            wait_script: VecDeque::new(),
            images_after_rebuild: None,
            surface_minimized: false,
        }
    }

    fn handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    fn submits(&self) -> usize {
        self.count(|e| matches!(e, Event::Submit(..)))
    }

    fn rebuilds(&self) -> usize {
        self.count(|e| matches!(e, Event::Rebuild(_)))
    }
}

impl FrameBackend for FakeBackend {
    fn image_count(&self) -> usize {
        self.images
    }

    fn create_frame_slots(&mut self, count: usize) -> VkResult<Vec<FrameSlot>> {
        self.events.push(Event::CreateSlots(count));
        Ok((0..count)
            .map(|_| FrameSlot {
                image_available: vk::Semaphore::from_raw(self.handle()),
                render_finished: vk::Semaphore::from_raw(self.handle()),
                in_flight: vk::Fence::from_raw(self.handle()),
            })
            .collect())
    }

    fn destroy_frame_slots(&mut self, slots: &[FrameSlot]) {
        self.events.push(Event::DestroySlots(slots.len()));
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        self.events.push(Event::Wait(fence));
        self.wait_script.pop_front().unwrap_or(Ok(()))
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VkResult<()> {
        self.events.push(Event::Reset(fence));
        Ok(())
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VkResult<AcquireStatus> {
        self.events.push(Event::Acquire(signal));
        if let Some(scripted) = self.acquire_script.pop_front() {
            return scripted;
        }
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.images as u32;
        Ok(AcquireStatus::Ready {
            image_index,
            suboptimal: false,
        })
    }

    fn prepare_image(&mut self, image_index: u32, _input: &FrameInput<'_>) -> VkResult<()> {
        self.events.push(Event::Prepare(image_index));
        Ok(())
    }

    fn submit(&mut self, image_index: u32, slot: &FrameSlot) -> VkResult<()> {
        self.events.push(Event::Submit(image_index, slot.in_flight));
        self.submit_script.pop_front().unwrap_or(Ok(()))
    }

    fn present(&mut self, image_index: u32, _wait: vk::Semaphore) -> VkResult<PresentStatus> {
        self.events.push(Event::Present(image_index));
        self.present_script
            .pop_front()
            .unwrap_or(Ok(PresentStatus::Optimal))
    }

    fn rebuild(&mut self, size: RenderSize) -> VkResult<RebuildStatus> {
        if size.is_zero() || self.surface_minimized {
            return Ok(RebuildStatus::Deferred);
        }
        self.events.push(Event::Rebuild(size));
        self.extent = size;
        self.next_image = 0;
        if let Some(n) = self.images_after_rebuild.take() {
            self.images = n;
        }
        Ok(RebuildStatus::Rebuilt {
            image_count: self.images,
        })
    }

    fn wait_idle(&mut self) -> VkResult<()> {
        self.events.push(Event::WaitIdle);
        Ok(())
    }
}

const START: RenderSize = RenderSize::new(640, 480);

fn setup(images: usize) -> (FakeBackend, FrameLoop) {
    let mut backend = FakeBackend::new(images, START);
    let frames = FrameLoop::new(&mut backend, START, u64::MAX).unwrap();
    (backend, frames)
}

fn draw(frames: &mut FrameLoop, backend: &mut FakeBackend) -> bool {
    frames.draw_frame(backend, &FrameInput::default()).unwrap()
}

#[test]
fn slot_index_cycles_through_the_ring() {
    let (mut backend, mut frames) = setup(3);
    assert_eq!(frames.frame_count(), 3);
    assert_eq!(frames.current_index(), 0);

    let mut seen = Vec::new();
    for _ in 0..4 {
        assert!(draw(&mut frames, &mut backend));
        seen.push(frames.current_index());
    }
    assert_eq!(seen, vec![1, 2, 0, 1]);
    assert_eq!(frames.presented_frames(), 4);
    assert_eq!(frames.state(), FrameState::Idle);
    assert_eq!(backend.rebuilds(), 0);
}

#[test]
fn fence_is_reset_right_before_each_submit() {
    let (mut backend, mut frames) = setup(2);
    for _ in 0..5 {
        draw(&mut frames, &mut backend);
    }
    assert_eq!(backend.submits(), 5);

    for (i, ev) in backend.events.iter().enumerate() {
        if let Event::Submit(_, fence) = *ev {
            assert_eq!(backend.events[i - 1], Event::Reset(fence));
            let waited = backend.events[..i]
                .iter()
                .rposition(|e| *e == Event::Wait(fence));
            let acquired = backend.events[..i]
                .iter()
                .rposition(|e| matches!(e, Event::Acquire(_)));
            assert!(waited < acquired, "fence wait must precede acquire");
        }
    }
}

#[test]
fn resize_mid_loop_rebuilds_after_present() {
    let (mut backend, mut frames) = setup(3);
    draw(&mut frames, &mut backend);
    draw(&mut frames, &mut backend);

    frames.request_resize(RenderSize::new(1280, 720));
    assert!(frames.is_resize_pending());
    assert!(draw(&mut frames, &mut backend));

    assert_eq!(backend.rebuilds(), 1);
    assert_eq!(backend.extent, RenderSize::new(1280, 720));
    assert!(!frames.is_resize_pending());
    assert_eq!(frames.current_index(), 0);
    assert_eq!(frames.rebuild_count(), 1);

    // the presented frame went out before the rebuild
    let present = backend
        .events
        .iter()
        .rposition(|e| matches!(e, Event::Present(_)));
    let rebuild = backend
        .events
        .iter()
        .position(|e| matches!(e, Event::Rebuild(_)));
    assert!(present < rebuild);
    assert!(draw(&mut frames, &mut backend));
}

#[test]
fn rebuild_uses_the_latest_requested_size() {
    let (mut backend, mut frames) = setup(2);
    frames.request_resize(RenderSize::new(1024, 768));
    frames.request_resize(RenderSize::new(800, 600));
    draw(&mut frames, &mut backend);
    assert_eq!(backend.extent, RenderSize::new(800, 600));
    assert_eq!(frames.target_size(), RenderSize::new(800, 600));
    assert_eq!(backend.rebuilds(), 1);
}

#[test]
fn zero_sized_resizes_are_ignored() {
    let (mut backend, mut frames) = setup(2);
    frames.request_resize(RenderSize::new(0, 600));
    frames.request_resize(RenderSize::new(800, 0));
    assert!(!frames.is_resize_pending());

    for _ in 0..3 {
        assert!(draw(&mut frames, &mut backend));
    }
    assert_eq!(backend.rebuilds(), 0);
    assert_eq!(frames.target_size(), START);
}

#[test]
fn aliased_image_waits_on_the_owning_fence() {
    let (mut backend, mut frames) = setup(2);
    let ready0 = || {
        Ok(AcquireStatus::Ready {
            image_index: 0,
            suboptimal: false,
        })
    };
    backend.acquire_script.push_back(ready0());
    backend.acquire_script.push_back(ready0());

    draw(&mut frames, &mut backend);
    let first_fence = match backend.events.iter().find(|e| matches!(e, Event::Submit(..))) {
        Some(Event::Submit(_, f)) => *f,
        _ => panic!("no submit"),
    };
    let mark = backend.events.len();
    draw(&mut frames, &mut backend);

    let second = &backend.events[mark..];
    let acquire = second
        .iter()
        .position(|e| matches!(e, Event::Acquire(_)))
        .unwrap();
    let prepare = second
        .iter()
        .position(|e| matches!(e, Event::Prepare(_)))
        .unwrap();
    assert!(second[acquire..prepare].contains(&Event::Wait(first_fence)));
    assert!(matches!(second.last(), Some(Event::Present(0))));
}

#[test]
fn no_hazard_wait_when_images_follow_slots() {
    let (mut backend, mut frames) = setup(2);
    for _ in 0..4 {
        draw(&mut frames, &mut backend);
    }
    // one fence wait per tick, nothing extra
    assert_eq!(backend.count(|e| matches!(e, Event::Wait(_))), 4);
}

#[test]
fn out_of_date_acquire_skips_then_rebuilds() {
    let (mut backend, mut frames) = setup(3);
    backend.acquire_script.push_back(Ok(AcquireStatus::OutOfDate));

    assert!(!draw(&mut frames, &mut backend));
    assert_eq!(frames.state(), FrameState::NeedsRebuild);
    assert_eq!(backend.submits(), 0);
    // the fence stays signaled for the retry
    assert_eq!(backend.count(|e| matches!(e, Event::Reset(_))), 0);

    assert!(draw(&mut frames, &mut backend));
    assert_eq!(backend.rebuilds(), 1);
    assert_eq!(backend.submits(), 1);
    assert_eq!(frames.state(), FrameState::Idle);
}

#[test]
fn suboptimal_present_rebuilds() {
    let (mut backend, mut frames) = setup(2);
    backend.present_script.push_back(Ok(PresentStatus::Suboptimal));
    assert!(draw(&mut frames, &mut backend));
    assert_eq!(backend.rebuilds(), 1);

    backend.present_script.push_back(Ok(PresentStatus::OutOfDate));
    assert!(draw(&mut frames, &mut backend));
    assert_eq!(backend.rebuilds(), 2);
}

#[test]
fn suboptimal_acquire_still_presents_then_rebuilds() {
    let (mut backend, mut frames) = setup(2);
    backend.acquire_script.push_back(Ok(AcquireStatus::Ready {
        image_index: 1,
        suboptimal: true,
    }));
    assert!(draw(&mut frames, &mut backend));
    assert!(backend.events.contains(&Event::Present(1)));
    assert_eq!(backend.rebuilds(), 1);
}

#[test]
fn slot_count_follows_image_count_after_rebuild() {
    let (mut backend, mut frames) = setup(3);
    backend.images_after_rebuild = Some(4);
    frames.request_resize(RenderSize::new(1920, 1080));
    draw(&mut frames, &mut backend);

    assert_eq!(frames.frame_count(), 4);
    assert!(backend.events.contains(&Event::CreateSlots(4)));
    assert!(backend.events.contains(&Event::DestroySlots(3)));

    // new slots are live before the old ones go away
    let created = backend
        .events
        .iter()
        .position(|e| *e == Event::CreateSlots(4));
    let destroyed = backend
        .events
        .iter()
        .position(|e| *e == Event::DestroySlots(3));
    assert!(created < destroyed);

    let mut seen = Vec::new();
    for _ in 0..4 {
        draw(&mut frames, &mut backend);
        seen.push(frames.current_index());
    }
    assert_eq!(seen, vec![1, 2, 3, 0]);
}

#[test]
fn rebuild_waits_for_idle_first() {
    let (mut backend, mut frames) = setup(2);
    frames.request_resize(RenderSize::new(800, 600));
    draw(&mut frames, &mut backend);
    let idle = backend.events.iter().position(|e| *e == Event::WaitIdle);
    let rebuild = backend
        .events
        .iter()
        .position(|e| matches!(e, Event::Rebuild(_)));
    assert!(idle.is_some());
    assert!(idle < rebuild);
}

#[test]
fn minimized_surface_defers_until_restored() {
    let (mut backend, mut frames) = setup(2);
    backend.surface_minimized = true;
    backend.acquire_script.push_back(Ok(AcquireStatus::OutOfDate));

    assert!(!draw(&mut frames, &mut backend));
    for _ in 0..3 {
        assert!(!draw(&mut frames, &mut backend));
        assert_eq!(frames.state(), FrameState::NeedsRebuild);
    }
    assert_eq!(backend.submits(), 0);
    assert_eq!(backend.rebuilds(), 0);

    backend.surface_minimized = false;
    assert!(draw(&mut frames, &mut backend));
    assert_eq!(backend.rebuilds(), 1);
    assert_eq!(backend.submits(), 1);
}

#[test]
fn acquire_failure_propagates() {
    let (mut backend, mut frames) = setup(2);
    backend
        .acquire_script
        .push_back(Err(VkError::AcquireFailure(vk::Result::ERROR_DEVICE_LOST)));
    let err = frames
        .draw_frame(&mut backend, &FrameInput::default())
        .unwrap_err();
    assert!(matches!(
        err,
        VkError::AcquireFailure(vk::Result::ERROR_DEVICE_LOST)
    ));
    assert_eq!(backend.submits(), 0);
}

#[test]
fn fence_timeout_reports_a_hang() {
    let mut backend = FakeBackend::new(2, START);
    let mut frames = FrameLoop::new(&mut backend, START, 1_000_000).unwrap();
    backend
        .wait_script
        .push_back(Err(VkError::DeviceHangSuspected {
            timeout_ns: 1_000_000,
        }));
    let err = frames
        .draw_frame(&mut backend, &FrameInput::default())
        .unwrap_err();
    assert!(matches!(
        err,
        VkError::DeviceHangSuspected {
            timeout_ns: 1_000_000
        }
    ));
}

#[test]
fn submit_failure_propagates_without_present() {
    let (mut backend, mut frames) = setup(2);
    backend
        .submit_script
        .push_back(Err(VkError::SubmitFailure(vk::Result::ERROR_DEVICE_LOST)));
    let err = frames
        .draw_frame(&mut backend, &FrameInput::default())
        .unwrap_err();
    assert!(matches!(
        err,
        VkError::SubmitFailure(vk::Result::ERROR_DEVICE_LOST)
    ));
    assert_eq!(backend.submits(), 1);
    assert_eq!(backend.count(|e| matches!(e, Event::Present(_))), 0);
    assert_eq!(frames.presented_frames(), 0);
}

#[test]
fn present_failure_propagates() {
    let (mut backend, mut frames) = setup(2);
    assert!(draw(&mut frames, &mut backend));
    backend
        .present_script
        .push_back(Err(VkError::PresentFailure(vk::Result::ERROR_SURFACE_LOST_KHR)));
    let err = frames
        .draw_frame(&mut backend, &FrameInput::default())
        .unwrap_err();
    assert!(matches!(
        err,
        VkError::PresentFailure(vk::Result::ERROR_SURFACE_LOST_KHR)
    ));
    assert_eq!(backend.submits(), 2);
    assert_eq!(backend.count(|e| matches!(e, Event::Present(_))), 2);
    assert_eq!(frames.presented_frames(), 1);
    assert_eq!(backend.rebuilds(), 0);
}

#[test]
fn shutdown_releases_slots_once() {
    let (mut backend, mut frames) = setup(3);
    draw(&mut frames, &mut backend);
    frames.shutdown(&mut backend).unwrap();
    frames.shutdown(&mut backend).unwrap();

    assert_eq!(backend.count(|e| matches!(e, Event::DestroySlots(_))), 1);
    assert_eq!(frames.frame_count(), 0);
    assert!(!draw(&mut frames, &mut backend));
}
