// SPDX-License-Identifier: CEPL-1.0
//! The per-tick acquire → submit → present loop.
//!
//! [`FrameLoop`] owns only the frame-slot ring and its bookkeeping. Everything
//! that touches the device goes through [`FrameBackend`], which the GPU context
//! implements and which tests replace with a scripted fake.

use crate::error::{VkError, VkResult};
use crate::sync::{FrameSlot, FrameSync};
use ash::vk;
use prism_render::{FrameInput, RenderSize};
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireStatus {
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildStatus {
    Rebuilt { image_count: usize },
    /// Target has zero area; nothing was touched.
    Deferred,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitting,
    Presenting,
    NeedsRebuild,
}

/// `vkWaitForFences` outcome; a timeout means the GPU stopped making progress.
pub fn fence_wait_result(waited: Result<(), vk::Result>, timeout_ns: u64) -> VkResult<()> {
    match waited {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(VkError::DeviceHangSuspected { timeout_ns }),
        Err(e) => Err(e.into()),
    }
}

pub fn acquire_status(acquired: Result<(u32, bool), vk::Result>) -> VkResult<AcquireStatus> {
    match acquired {
        Ok((image_index, suboptimal)) => Ok(AcquireStatus::Ready {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::OutOfDate),
        Err(e) => Err(VkError::AcquireFailure(e)),
    }
}

/// `Ok(true)` from `vkQueuePresentKHR` is the suboptimal flag.
pub fn present_status(presented: Result<bool, vk::Result>) -> VkResult<PresentStatus> {
    match presented {
        Ok(false) => Ok(PresentStatus::Optimal),
        Ok(true) => Ok(PresentStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
        Err(e) => Err(VkError::PresentFailure(e)),
    }
}

/// Device-facing half of the frame loop.
pub trait FrameBackend {
    /// Current swapchain image count.
    fn image_count(&self) -> usize;

    fn create_frame_slots(&mut self, count: usize) -> VkResult<Vec<FrameSlot>>;
    fn destroy_frame_slots(&mut self, slots: &[FrameSlot]);

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn reset_fence(&mut self, fence: vk::Fence) -> VkResult<()>;

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VkResult<AcquireStatus>;

    /// Uploads per-frame data for `image_index` (and re-records its command
    /// buffer when configured to).
    fn prepare_image(&mut self, image_index: u32, input: &FrameInput<'_>) -> VkResult<()>;

    /// Submits the image's command buffer: waits on `slot.image_available`,
    /// signals `slot.render_finished` and `slot.in_flight`.
    fn submit(&mut self, image_index: u32, slot: &FrameSlot) -> VkResult<()>;

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> VkResult<PresentStatus>;

    /// Recreates every swapchain-dependent resource against `size`.
    fn rebuild(&mut self, size: RenderSize) -> VkResult<RebuildStatus>;

    fn wait_idle(&mut self) -> VkResult<()>;
}

pub struct FrameLoop {
    sync: FrameSync,
    current: usize,
    state: FrameState,
    target: RenderSize,
    resize_pending: bool,
    fence_timeout_ns: u64,
    presented: u64,
    rebuilds: u64,
}

impl FrameLoop {
    pub fn new<B: FrameBackend + ?Sized>(
        backend: &mut B,
        size: RenderSize,
        fence_timeout_ns: u64,
    ) -> VkResult<Self> {
        let image_count = backend.image_count();
        let slots = backend.create_frame_slots(image_count)?;
        debug!("frame loop: {} slots", slots.len());
        Ok(Self {
            sync: FrameSync::new(slots, image_count),
            current: 0,
            state: FrameState::Idle,
            target: size,
            resize_pending: false,
            fence_timeout_ns,
            presented: 0,
            rebuilds: 0,
        })
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn frame_count(&self) -> usize {
        self.sync.len()
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn target_size(&self) -> RenderSize {
        self.target
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn is_resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Zero-area sizes are ignored; the rebuild waits for a real size.
    pub fn request_resize(&mut self, size: RenderSize) {
        if size.is_zero() {
            debug!("resize to {}x{} ignored", size.width, size.height);
            return;
        }
        self.target = size;
        self.resize_pending = true;
    }

    /// One tick. Returns `Ok(false)` when nothing was presented.
    pub fn draw_frame<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        input: &FrameInput<'_>,
    ) -> VkResult<bool> {
        if self.state == FrameState::NeedsRebuild && !self.rebuild(backend)? {
            return Ok(false);
        }
        if self.sync.is_empty() {
            return Ok(false);
        }

        let slot = self.sync.slot(self.current);

        self.state = FrameState::Acquiring;
        backend.wait_for_fence(slot.in_flight, self.fence_timeout_ns)?;
        let (image_index, acquired_suboptimal) =
            match backend.acquire_next_image(slot.image_available)? {
                AcquireStatus::Ready {
                    image_index,
                    suboptimal,
                } => (image_index, suboptimal),
                AcquireStatus::OutOfDate => {
                    debug!("acquire: out of date, skipping tick");
                    self.state = FrameState::NeedsRebuild;
                    return Ok(false);
                }
            };

        // Another slot may still be rendering into this image.
        let image = image_index as usize;
        if let Some(owner) = self.sync.images().get(image) {
            if owner != slot.in_flight {
                backend.wait_for_fence(owner, self.fence_timeout_ns)?;
            }
        }
        self.sync.images_mut().claim(image, slot.in_flight);

        self.state = FrameState::Recording;
        backend.prepare_image(image_index, input)?;

        // Reset only now: an early return above must leave the fence signaled.
        self.state = FrameState::Submitting;
        backend.reset_fence(slot.in_flight)?;
        backend.submit(image_index, &slot)?;

        self.state = FrameState::Presenting;
        let present = backend.present(image_index, slot.render_finished)?;
        self.presented += 1;
        self.current = self.sync.advance(self.current);

        if acquired_suboptimal || present != PresentStatus::Optimal || self.resize_pending {
            debug!(
                "present: {:?} (acquire suboptimal={}, resize pending={})",
                present, acquired_suboptimal, self.resize_pending
            );
            self.state = FrameState::NeedsRebuild;
            self.rebuild(backend)?;
        } else {
            self.state = FrameState::Idle;
        }
        Ok(true)
    }

    /// Returns `false` when the backend deferred the rebuild.
    fn rebuild<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> VkResult<bool> {
        backend.wait_idle()?;
        match backend.rebuild(self.target)? {
            RebuildStatus::Deferred => {
                debug!(
                    "rebuild deferred at {}x{}",
                    self.target.width, self.target.height
                );
                self.state = FrameState::NeedsRebuild;
                Ok(false)
            }
            RebuildStatus::Rebuilt { image_count } => {
                let slots = backend.create_frame_slots(image_count)?;
                let old = self.sync.replace(slots, image_count);
                backend.destroy_frame_slots(&old);
                self.current = 0;
                self.resize_pending = false;
                self.rebuilds += 1;
                self.state = FrameState::Idle;
                info!(
                    "frame loop rebuilt: {} slots at {}x{}",
                    image_count, self.target.width, self.target.height
                );
                Ok(true)
            }
        }
    }

    /// Waits for the device, then releases every slot. Safe to call twice.
    pub fn shutdown<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> VkResult<()> {
        if self.sync.is_empty() {
            return Ok(());
        }
        backend.wait_idle()?;
        let old = self.sync.replace(Vec::new(), 0);
        backend.destroy_frame_slots(&old);
        self.current = 0;
        self.state = FrameState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_timeout_becomes_a_hang() {
        assert!(fence_wait_result(Ok(()), 5).is_ok());
        assert!(matches!(
            fence_wait_result(Err(vk::Result::TIMEOUT), 5),
            Err(VkError::DeviceHangSuspected { timeout_ns: 5 })
        ));
        assert!(matches!(
            fence_wait_result(Err(vk::Result::ERROR_DEVICE_LOST), 5),
            Err(VkError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn acquire_maps_out_of_date_to_a_status() {
        assert_eq!(
            acquire_status(Ok((2, true))).unwrap(),
            AcquireStatus::Ready {
                image_index: 2,
                suboptimal: true
            }
        );
        assert_eq!(
            acquire_status(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireStatus::OutOfDate
        );
        assert!(matches!(
            acquire_status(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(VkError::AcquireFailure(vk::Result::ERROR_SURFACE_LOST_KHR))
        ));
    }

    #[test]
    fn present_flag_and_errors() {
        assert_eq!(present_status(Ok(false)).unwrap(), PresentStatus::Optimal);
        assert_eq!(present_status(Ok(true)).unwrap(), PresentStatus::Suboptimal);
        assert_eq!(
            present_status(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentStatus::OutOfDate
        );
        assert!(matches!(
            present_status(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(VkError::PresentFailure(vk::Result::ERROR_DEVICE_LOST))
        ));
    }
}
