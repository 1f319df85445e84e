// SPDX-License-Identifier: CEPL-1.0
//! Per-slot synchronization primitives and the image ownership map.
//!
//! Slots are handed out round-robin. A slot's fence guards its own previous
//! submission; the [`ImageFenceMap`] guards swapchain images that two slots
//! may alias, since the presentation engine returns images in any order.

use crate::error::VkResult;
use ash::vk;

/// One frame-in-flight: acquire signal, render-finished signal and the fence
/// for the last submission made from this slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// Swapchain image index to the fence of the slot that last submitted it.
#[derive(Clone, Debug, Default)]
pub struct ImageFenceMap {
    fences: Vec<Option<vk::Fence>>,
}

impl ImageFenceMap {
    pub fn new(image_count: usize) -> Self {
        Self {
            fences: vec![None; image_count],
        }
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    pub fn get(&self, image_index: usize) -> Option<vk::Fence> {
        self.fences.get(image_index).copied().flatten()
    }

    /// Marks `image_index` as owned by `fence`, returning the previous owner.
    pub fn claim(&mut self, image_index: usize, fence: vk::Fence) -> Option<vk::Fence> {
        if image_index >= self.fences.len() {
            self.fences.resize(image_index + 1, None);
        }
        self.fences[image_index].replace(fence)
    }

    pub fn clear(&mut self, image_count: usize) {
        self.fences.clear();
        self.fences.resize(image_count, None);
    }
}

#[derive(Debug, Default)]
pub struct FrameSync {
    slots: Vec<FrameSlot>,
    images: ImageFenceMap,
}

impl FrameSync {
    pub fn new(slots: Vec<FrameSlot>, image_count: usize) -> Self {
        Self {
            slots,
            images: ImageFenceMap::new(image_count),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> FrameSlot {
        self.slots[index]
    }

    #[inline]
    pub fn advance(&self, index: usize) -> usize {
        (index + 1) % self.slots.len().max(1)
    }

    pub fn images(&self) -> &ImageFenceMap {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut ImageFenceMap {
        &mut self.images
    }

    /// Swaps in a fresh slot set sized for a rebuilt swapchain. Returns the
    /// old slots so the caller can destroy them once the device is idle.
    pub fn replace(&mut self, slots: Vec<FrameSlot>, image_count: usize) -> Vec<FrameSlot> {
        self.images.clear(image_count);
        std::mem::replace(&mut self.slots, slots)
    }
}

unsafe fn create_slot(device: &ash::Device) -> VkResult<FrameSlot> {
    let sem_ci = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        ..Default::default()
    };
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };

    let image_available = device.create_semaphore(&sem_ci, None)?;
    let render_finished = match device.create_semaphore(&sem_ci, None) {
        Ok(s) => s,
        Err(e) => {
            device.destroy_semaphore(image_available, None);
            return Err(e.into());
        }
    };
    let in_flight = match device.create_fence(&fence_ci, None) {
        Ok(f) => f,
        Err(e) => {
            device.destroy_semaphore(render_finished, None);
            device.destroy_semaphore(image_available, None);
            return Err(e.into());
        }
    };
    Ok(FrameSlot {
        image_available,
        render_finished,
        in_flight,
    })
}

/// Fences start signaled so the first wait on each slot returns at once.
pub unsafe fn create_frame_slots(device: &ash::Device, count: usize) -> VkResult<Vec<FrameSlot>> {
    let mut slots = Vec::with_capacity(count);
    for _ in 0..count {
        match create_slot(device) {
            Ok(slot) => slots.push(slot),
            Err(e) => {
                destroy_frame_slots(device, &slots);
                return Err(e);
            }
        }
    }
    Ok(slots)
}

pub unsafe fn destroy_frame_slots(device: &ash::Device, slots: &[FrameSlot]) {
    for s in slots {
        device.destroy_fence(s.in_flight, None);
        device.destroy_semaphore(s.render_finished, None);
        device.destroy_semaphore(s.image_available, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn slot(n: u64) -> FrameSlot {
        FrameSlot {
            image_available: vk::Semaphore::from_raw(n * 10 + 1),
            render_finished: vk::Semaphore::from_raw(n * 10 + 2),
            in_flight: vk::Fence::from_raw(n * 10 + 3),
        }
    }

    #[test]
    fn advance_is_a_ring() {
        for n in 1..=5u64 {
            let sync = FrameSync::new((0..n).map(slot).collect(), n as usize);
            for start in 0..n as usize {
                let mut i = start;
                for _ in 0..sync.len() {
                    i = sync.advance(i);
                }
                assert_eq!(i, start, "n={n}");
            }
        }
    }

    #[test]
    fn image_map_starts_empty_and_tracks_owner() {
        let mut map = ImageFenceMap::new(3);
        assert_eq!(map.len(), 3);
        assert!((0..3).all(|i| map.get(i).is_none()));

        let a = vk::Fence::from_raw(7);
        let b = vk::Fence::from_raw(8);
        assert_eq!(map.claim(1, a), None);
        assert_eq!(map.claim(1, b), Some(a));
        assert_eq!(map.get(1), Some(b));
        assert_eq!(map.get(9), None);
    }

    #[test]
    fn replace_resets_map_and_returns_old_slots() {
        let mut sync = FrameSync::new(vec![slot(0), slot(1)], 2);
        sync.images_mut().claim(0, slot(0).in_flight);

        let old = sync.replace(vec![slot(2), slot(3), slot(4)], 3);
        assert_eq!(old, vec![slot(0), slot(1)]);
        assert_eq!(sync.len(), 3);
        assert_eq!(sync.images().len(), 3);
        assert!(sync.images().get(0).is_none());
    }
}
