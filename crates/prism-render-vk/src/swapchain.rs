// SPDX-License-Identifier: CEPL-1.0
use crate::error::{VkError, VkResult};
use ash::khr::{surface, swapchain};
use ash::vk;
use prism_render::RenderSize;
use tracing::{info, warn};

/// Checked in order against an sRGB-nonlinear color space.
pub const FORMAT_PREFERENCE: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::B8G8R8_UNORM,
    vk::Format::R8G8B8_UNORM,
];

pub const PRESENT_MODE_PREFERENCE: [vk::PresentModeKHR; 2] =
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> VkResult<vk::SurfaceFormatKHR> {
    FORMAT_PREFERENCE
        .iter()
        .find_map(|&want| {
            formats.iter().copied().find(|f| {
                f.format == want && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .ok_or(VkError::NoSurfaceFormat)
}

/// MAILBOX, then IMMEDIATE. FIFO is only taken when `allow_fifo` is set.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    allow_fifo: bool,
) -> VkResult<vk::PresentModeKHR> {
    if let Some(&m) = PRESENT_MODE_PREFERENCE.iter().find(|m| modes.contains(m)) {
        return Ok(m);
    }
    if allow_fifo && modes.contains(&vk::PresentModeKHR::FIFO) {
        warn!("no low-latency present mode; falling back to FIFO");
        return Ok(vk::PresentModeKHR::FIFO);
    }
    Err(VkError::NoPresentMode)
}

/// A surface reporting `u32::MAX` lets the swapchain pick its own size.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 == "no max").
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&a| supported.contains(a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// The presentable image chain plus one view per image.
#[derive(Debug, Default)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    /// Bumped on every rebuild.
    pub generation: u64,
}

pub struct SwapchainRequest<'a> {
    pub phys: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub indices: (u32, u32),
    pub size: RenderSize,
    pub previous: Option<&'a Swapchain>,
    pub usage: vk::ImageUsageFlags,
    pub allow_fifo: bool,
}

impl Swapchain {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Builds a new chain. `req.previous` is passed as `old_swapchain` and is
    /// left alive; the caller destroys it after this returns.
    pub unsafe fn create(
        device: &ash::Device,
        surf_i: &surface::Instance,
        swap_d: &swapchain::Device,
        req: SwapchainRequest<'_>,
    ) -> VkResult<Self> {
        let caps = surf_i.get_physical_device_surface_capabilities(req.phys, req.surface)?;
        let formats = surf_i.get_physical_device_surface_formats(req.phys, req.surface)?;
        let modes = surf_i.get_physical_device_surface_present_modes(req.phys, req.surface)?;

        let surf_format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&modes, req.allow_fifo)?;
        let extent = choose_extent(&caps, req.size);
        let min_image_count = choose_image_count(&caps);

        let (graphics, present) = req.indices;
        let families = [graphics, present];
        let (sharing_mode, family_count, p_families) = if graphics != present {
            (vk::SharingMode::CONCURRENT, 2, families.as_ptr())
        } else {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        };

        let old_swapchain = req
            .previous
            .map_or(vk::SwapchainKHR::null(), |p| p.handle);

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: req.surface,
            min_image_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: req.usage,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: p_families,
            pre_transform: choose_pre_transform(&caps),
            composite_alpha: choose_composite_alpha(caps.supported_composite_alpha),
            present_mode,
            clipped: vk::TRUE,
            old_swapchain,
            ..Default::default()
        };

        let handle = swap_d.create_swapchain(&swap_info, None)?;
        let images = match swap_d.get_swapchain_images(handle) {
            Ok(i) => i,
            Err(e) => {
                swap_d.destroy_swapchain(handle, None);
                return Err(e.into());
            }
        };

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            match create_color_view(device, image, surf_format.format) {
                Ok(v) => views.push(v),
                Err(e) => {
                    for &v in &views {
                        device.destroy_image_view(v, None);
                    }
                    swap_d.destroy_swapchain(handle, None);
                    return Err(e);
                }
            }
        }

        let generation = req.previous.map_or(0, |p| p.generation + 1);
        info!(
            "swapchain gen {}: format {:?} / {:?}, present {:?}, extent {}x{}, images {} (min {})",
            generation,
            surf_format.format,
            surf_format.color_space,
            present_mode,
            extent.width,
            extent.height,
            images.len(),
            caps.min_image_count
        );

        Ok(Self {
            handle,
            format: surf_format.format,
            extent,
            images,
            views,
            generation,
        })
    }

    /// Views first, then the chain itself.
    pub unsafe fn destroy(&mut self, device: &ash::Device, swap_d: &swapchain::Device) {
        for &v in &self.views {
            device.destroy_image_view(v, None);
        }
        self.views.clear();
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            swap_d.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

pub unsafe fn create_color_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> VkResult<vk::ImageView> {
    create_view(device, image, format, vk::ImageAspectFlags::COLOR)
}

pub unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> VkResult<vk::ImageView> {
    let iv_info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        components: vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        },
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    Ok(device.create_image_view(&iv_info, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn bgra_wins_over_rgba() {
        let formats = [
            fmt(vk::Format::B8G8R8A8_UNORM),
            fmt(vk::Format::R8G8B8A8_UNORM),
        ];
        let f = choose_surface_format(&formats).unwrap();
        assert_eq!(f.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn preference_order_beats_driver_order() {
        let formats = [
            fmt(vk::Format::R8G8B8_UNORM),
            fmt(vk::Format::R8G8B8A8_UNORM),
        ];
        let f = choose_surface_format(&formats).unwrap();
        assert_eq!(f.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn format_needs_srgb_nonlinear() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }];
        assert!(matches!(
            choose_surface_format(&formats),
            Err(VkError::NoSurfaceFormat)
        ));
        assert!(matches!(
            choose_surface_format(&[]),
            Err(VkError::NoSurfaceFormat)
        ));
    }

    #[test]
    fn mailbox_preferred_over_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, false).unwrap(),
            vk::PresentModeKHR::MAILBOX
        );
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, false).unwrap(),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn fifo_only_fails_unless_opted_in() {
        let modes = [vk::PresentModeKHR::FIFO];
        assert!(matches!(
            choose_present_mode(&modes, false),
            Err(VkError::NoPresentMode)
        ));
        assert_eq!(
            choose_present_mode(&modes, true).unwrap(),
            vk::PresentModeKHR::FIFO
        );
        assert!(matches!(
            choose_present_mode(&[], true),
            Err(VkError::NoPresentMode)
        ));
    }

    #[test]
    fn extent_clamped_only_when_surface_is_adaptive() {
        let adaptive = caps(2, 3, (u32::MAX, u32::MAX));
        let e = choose_extent(&adaptive, RenderSize::new(800, 600));
        assert_eq!((e.width, e.height), (800, 600));
        let e = choose_extent(&adaptive, RenderSize::new(9000, 0));
        assert_eq!((e.width, e.height), (4096, 1));

        let fixed = caps(2, 3, (1024, 768));
        let e = choose_extent(&fixed, RenderSize::new(800, 600));
        assert_eq!((e.width, e.height), (1024, 768));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        assert_eq!(choose_image_count(&caps(2, 0, (1, 1))), 3);
        assert_eq!(choose_image_count(&caps(2, 8, (1, 1))), 3);
        assert_eq!(choose_image_count(&caps(3, 3, (1, 1))), 3);
    }

    #[test]
    fn composite_alpha_falls_back_in_order() {
        use vk::CompositeAlphaFlagsKHR as A;
        assert_eq!(choose_composite_alpha(A::OPAQUE | A::INHERIT), A::OPAQUE);
        assert_eq!(
            choose_composite_alpha(A::POST_MULTIPLIED | A::INHERIT),
            A::POST_MULTIPLIED
        );
        assert_eq!(choose_composite_alpha(A::INHERIT), A::INHERIT);
    }
}
