// SPDX-License-Identifier: CEPL-1.0
//! Depth and multisampled color targets sized to the swapchain.

use crate::buffer::find_memory_type;
use crate::error::{VkError, VkResult};
use crate::swapchain::create_view;
use ash::{vk, Instance};
use tracing::warn;

pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate the device can use as a depth attachment.
pub fn first_depth_format(supports: impl Fn(vk::Format) -> bool) -> VkResult<vk::Format> {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&fmt| supports(fmt))
        .ok_or(VkError::NoDepthFormat)
}

pub unsafe fn pick_depth_format(instance: &Instance, phys: vk::PhysicalDevice) -> VkResult<vk::Format> {
    first_depth_format(|fmt| {
        instance
            .get_physical_device_format_properties(phys, fmt)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

pub fn sample_count_flags(samples: u32) -> vk::SampleCountFlags {
    match samples {
        0 | 1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        3 | 4 => vk::SampleCountFlags::TYPE_4,
        5..=8 => vk::SampleCountFlags::TYPE_8,
        9..=16 => vk::SampleCountFlags::TYPE_16,
        17..=32 => vk::SampleCountFlags::TYPE_32,
        _ => vk::SampleCountFlags::TYPE_64,
    }
}

/// Highest count both color and depth framebuffers support, capped at `requested`.
pub fn clamp_samples(limits: &vk::PhysicalDeviceLimits, requested: u32) -> vk::SampleCountFlags {
    let supported =
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    let want = sample_count_flags(requested);
    let picked = [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .filter(|&c| c.as_raw() <= want.as_raw())
    .find(|&c| supported.contains(c))
    .unwrap_or(vk::SampleCountFlags::TYPE_1);
    if picked != want {
        warn!("msaa: {requested} samples requested, using {:?}", picked);
    }
    picked
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ImageTarget {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl ImageTarget {
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.view != vk::ImageView::null() {
            device.destroy_image_view(self.view, None);
        }
        if self.image != vk::Image::null() {
            device.destroy_image(self.image, None);
        }
        if self.memory != vk::DeviceMemory::null() {
            device.free_memory(self.memory, None);
        }
        *self = Self::default();
    }
}

#[allow(clippy::too_many_arguments)]
unsafe fn create_target(
    instance: &Instance,
    device: &ash::Device,
    phys: vk::PhysicalDevice,
    extent: vk::Extent2D,
    format: vk::Format,
    samples: vk::SampleCountFlags,
    usage: vk::ImageUsageFlags,
    aspect: vk::ImageAspectFlags,
) -> VkResult<ImageTarget> {
    let img_ci = vk::ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO,
        image_type: vk::ImageType::TYPE_2D,
        format,
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
        mip_levels: 1,
        array_layers: 1,
        samples,
        tiling: vk::ImageTiling::OPTIMAL,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..Default::default()
    };
    let mut target = ImageTarget {
        image: device.create_image(&img_ci, None)?,
        ..Default::default()
    };

    let mem_req = device.get_image_memory_requirements(target.image);
    let built = (|| -> VkResult<()> {
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: mem_req.size,
            memory_type_index: find_memory_type(
                instance,
                phys,
                mem_req.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?,
            ..Default::default()
        };
        target.memory = device.allocate_memory(&alloc, None)?;
        device.bind_image_memory(target.image, target.memory, 0)?;
        target.view = create_view(device, target.image, format, aspect)?;
        Ok(())
    })();
    if let Err(e) = built {
        target.destroy(device);
        return Err(e);
    }
    Ok(target)
}

/// Depth target plus, when multisampling, the transient color target that
/// resolves into the swapchain image.
#[derive(Clone, Copy, Debug, Default)]
pub struct Attachments {
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub depth: ImageTarget,
    pub msaa_color: Option<ImageTarget>,
}

impl Attachments {
    pub unsafe fn create(
        instance: &Instance,
        device: &ash::Device,
        phys: vk::PhysicalDevice,
        extent: vk::Extent2D,
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> VkResult<Self> {
        let depth_aspect = if has_stencil(depth_format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        };
        let mut depth = create_target(
            instance,
            device,
            phys,
            extent,
            depth_format,
            samples,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            depth_aspect,
        )?;

        let msaa_color = if samples != vk::SampleCountFlags::TYPE_1 {
            match create_target(
                instance,
                device,
                phys,
                extent,
                color_format,
                samples,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                vk::ImageAspectFlags::COLOR,
            ) {
                Ok(t) => Some(t),
                Err(e) => {
                    depth.destroy(device);
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            depth_format,
            samples,
            depth,
            msaa_color,
        })
    }

    pub fn is_multisampled(&self) -> bool {
        self.msaa_color.is_some()
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if let Some(mut c) = self.msaa_color.take() {
            c.destroy(device);
        }
        self.depth.destroy(device);
    }
}
