// SPDX-License-Identifier: CEPL-1.0
use crate::error::{VkError, VkResult};
use ash::khr::{surface, swapchain};
use ash::{vk, Instance};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn complete(&self) -> VkResult<(u32, u32)> {
        self.graphics.zip(self.present).ok_or(VkError::NoQueueFamily)
    }

    /// Graphics first; present only when it is a different family.
    pub fn unique(&self) -> Vec<u32> {
        let mut v: Vec<u32> = self.graphics.into_iter().collect();
        if let Some(p) = self.present {
            if !v.contains(&p) {
                v.push(p);
            }
        }
        v
    }
}

/// Resolution order: one family doing both; a graphics family confirmed
/// present-capable; first graphics family plus any present family.
pub fn resolve_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> QueueFamilyIndices {
    let graphics: Vec<u32> = families
        .iter()
        .enumerate()
        .filter(|(_, f)| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i as u32)
        .collect();

    if let Some(&both) = graphics.iter().find(|&&i| supports_present(i)) {
        return QueueFamilyIndices {
            graphics: Some(both),
            present: Some(both),
        };
    }

    let present = (0..families.len() as u32).find(|&i| supports_present(i));
    QueueFamilyIndices {
        graphics: graphics.first().copied(),
        present,
    }
}

/// What the selector needs to know about one physical device.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceCandidate {
    pub queue_families: QueueFamilyIndices,
    pub swapchain_extension: bool,
    pub has_surface_formats: bool,
    pub has_present_modes: bool,
    pub sampler_anisotropy: bool,
}

impl DeviceCandidate {
    pub fn is_suitable(&self) -> bool {
        self.queue_families.is_complete()
            && self.swapchain_extension
            && self.has_surface_formats
            && self.has_present_modes
            && self.sampler_anisotropy
    }
}

/// First suitable device in enumeration order. No scoring.
pub fn first_suitable(candidates: &[DeviceCandidate]) -> VkResult<(usize, QueueFamilyIndices)> {
    candidates
        .iter()
        .position(DeviceCandidate::is_suitable)
        .map(|i| (i, candidates[i].queue_families))
        .ok_or(VkError::NoSuitableDevice)
}

unsafe fn inspect_device(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> VkResult<DeviceCandidate> {
    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let queue_families = resolve_queue_families(&qprops, |i| {
        surf_i
            .get_physical_device_surface_support(phys, i, surface)
            .unwrap_or(false)
    });

    let swapchain_extension = instance
        .enumerate_device_extension_properties(phys)?
        .iter()
        .any(|e| e.extension_name_as_c_str() == Ok(swapchain::NAME));

    let (has_surface_formats, has_present_modes) = if swapchain_extension {
        (
            !surf_i
                .get_physical_device_surface_formats(phys, surface)?
                .is_empty(),
            !surf_i
                .get_physical_device_surface_present_modes(phys, surface)?
                .is_empty(),
        )
    } else {
        (false, false)
    };

    let features = instance.get_physical_device_features(phys);
    Ok(DeviceCandidate {
        queue_families,
        swapchain_extension,
        has_surface_formats,
        has_present_modes,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
    })
}

pub unsafe fn pick_physical_device(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> VkResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let devices = instance.enumerate_physical_devices()?;
    let mut candidates = Vec::with_capacity(devices.len());
    for &phys in &devices {
        candidates.push(inspect_device(instance, surf_i, surface, phys)?);
    }
    let (i, indices) = first_suitable(&candidates)?;
    let props = instance.get_physical_device_properties(devices[i]);
    info!(
        "physical device: {:?} (graphics family {:?}, present family {:?})",
        props.device_name_as_c_str().unwrap_or(c"<invalid>"),
        indices.graphics,
        indices.present
    );
    Ok((devices[i], indices))
}

pub struct DeviceContext {
    pub phys: vk::PhysicalDevice,
    pub device: ash::Device,
    pub graphics_family: u32,
    pub present_family: u32,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub properties: vk::PhysicalDeviceProperties,
    pub wireframe: bool,
}

pub unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    indices: QueueFamilyIndices,
) -> VkResult<DeviceContext> {
    let (graphics_family, present_family) = indices.complete()?;

    let priority = [1.0f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = indices
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priority.as_ptr(),
            ..Default::default()
        })
        .collect();

    let supported = instance.get_physical_device_features(phys);
    let wireframe = supported.fill_mode_non_solid == vk::TRUE;
    if !wireframe {
        warn!("fillModeNonSolid unsupported; wireframe passes will be dropped");
    }
    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: vk::TRUE,
        fill_mode_non_solid: supported.fill_mode_non_solid,
        ..Default::default()
    };

    let exts = [swapchain::NAME.as_ptr()];
    let dci = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };
    let device = instance.create_device(phys, &dci, None)?;
    let graphics_queue = device.get_device_queue(graphics_family, 0);
    let present_queue = device.get_device_queue(present_family, 0);

    Ok(DeviceContext {
        phys,
        device,
        graphics_family,
        present_family,
        graphics_queue,
        present_queue,
        properties: instance.get_physical_device_properties(phys),
        wireframe,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn single_family_doing_both_is_preferred() {
        let fams = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
        ];
        let q = resolve_queue_families(&fams, |i| i != 0);
        assert_eq!(q.graphics, Some(2));
        assert_eq!(q.present, Some(2));
        assert_eq!(q.unique(), vec![2]);
    }

    #[test]
    fn split_families_fall_back_to_independent_scan() {
        let fams = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let q = resolve_queue_families(&fams, |i| i == 1);
        assert_eq!(q.complete().unwrap(), (0, 1));
        assert_eq!(q.unique(), vec![0, 1]);
    }

    #[test]
    fn missing_present_is_incomplete() {
        let fams = [family(vk::QueueFlags::GRAPHICS)];
        let q = resolve_queue_families(&fams, |_| false);
        assert!(!q.is_complete());
        assert!(matches!(q.complete(), Err(VkError::NoQueueFamily)));
    }

    #[test]
    fn first_suitable_device_wins() {
        let good = DeviceCandidate {
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            swapchain_extension: true,
            has_surface_formats: true,
            has_present_modes: true,
            sampler_anisotropy: true,
        };
        let no_aniso = DeviceCandidate {
            sampler_anisotropy: false,
            ..good
        };
        let other = DeviceCandidate {
            queue_families: QueueFamilyIndices {
                graphics: Some(1),
                present: Some(2),
            },
            ..good
        };

        let (i, q) = first_suitable(&[no_aniso, other, good]).unwrap();
        assert_eq!(i, 1);
        assert_eq!(q.graphics, Some(1));

        assert!(matches!(
            first_suitable(&[no_aniso, DeviceCandidate::default()]),
            Err(VkError::NoSuitableDevice)
        ));
    }
}
