// SPDX-License-Identifier: CEPL-1.0
use crate::attachment::Attachments;
use crate::error::VkResult;
use ash::vk;

/// Attachment list for the single-subpass pass.
///
/// Without multisampling: `[color (presented), depth]`.
/// With multisampling: `[msaa color, depth, resolve (presented)]`.
#[derive(Clone, Debug)]
pub struct RenderPassLayout {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub color_ref: vk::AttachmentReference,
    pub depth_ref: vk::AttachmentReference,
    pub resolve_ref: Option<vk::AttachmentReference>,
    pub dependency: vk::SubpassDependency,
}

impl RenderPassLayout {
    pub fn new(
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Self {
        let multisampled = samples != vk::SampleCountFlags::TYPE_1;

        let color = vk::AttachmentDescription {
            format: color_format,
            samples,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: if multisampled {
                vk::AttachmentStoreOp::DONT_CARE
            } else {
                vk::AttachmentStoreOp::STORE
            },
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: if multisampled {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::PRESENT_SRC_KHR
            },
            ..Default::default()
        };
        let depth = vk::AttachmentDescription {
            format: depth_format,
            samples,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        };

        let mut attachments = vec![color, depth];
        let resolve_ref = if multisampled {
            attachments.push(vk::AttachmentDescription {
                format: color_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::DONT_CARE,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                ..Default::default()
            });
            Some(vk::AttachmentReference {
                attachment: 2,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
        } else {
            None
        };

        // The color attachment must not be written before acquire hands it over.
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stages,
            dst_stage_mask: stages,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        };

        Self {
            attachments,
            color_ref: vk::AttachmentReference {
                attachment: 0,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
            depth_ref: vk::AttachmentReference {
                attachment: 1,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            },
            resolve_ref,
            dependency,
        }
    }

    pub fn is_multisampled(&self) -> bool {
        self.resolve_ref.is_some()
    }
}

pub unsafe fn create_render_pass(
    device: &ash::Device,
    layout: &RenderPassLayout,
) -> VkResult<vk::RenderPass> {
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &layout.color_ref,
        p_resolve_attachments: layout
            .resolve_ref
            .as_ref()
            .map_or(std::ptr::null(), |r| r as *const _),
        p_depth_stencil_attachment: &layout.depth_ref,
        ..Default::default()
    };
    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: layout.attachments.len() as u32,
        p_attachments: layout.attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &layout.dependency,
        ..Default::default()
    };
    Ok(device.create_render_pass(&ci, None)?)
}

/// Framebuffer attachment order matching [`RenderPassLayout`].
pub fn framebuffer_views(
    swap_view: vk::ImageView,
    depth_view: vk::ImageView,
    msaa_view: Option<vk::ImageView>,
) -> Vec<vk::ImageView> {
    match msaa_view {
        Some(msaa) => vec![msaa, depth_view, swap_view],
        None => vec![swap_view, depth_view],
    }
}

pub unsafe fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    swap_views: &[vk::ImageView],
    attachments: &Attachments,
    extent: vk::Extent2D,
) -> VkResult<Vec<vk::Framebuffer>> {
    let msaa_view = attachments.msaa_color.map(|c| c.view);
    let mut out = Vec::with_capacity(swap_views.len());
    for &view in swap_views {
        let views = framebuffer_views(view, attachments.depth.view, msaa_view);
        let ci = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: views.len() as u32,
            p_attachments: views.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        match device.create_framebuffer(&ci, None) {
            Ok(fb) => out.push(fb),
            Err(e) => {
                destroy_framebuffers(device, &mut out);
                return Err(e.into());
            }
        }
    }
    Ok(out)
}

pub unsafe fn destroy_framebuffers(device: &ash::Device, fbs: &mut Vec<vk::Framebuffer>) {
    for fb in fbs.drain(..) {
        device.destroy_framebuffer(fb, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    const COLOR: vk::Format = vk::Format::B8G8R8A8_UNORM;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    #[test]
    fn single_sample_has_two_attachments() {
        let l = RenderPassLayout::new(COLOR, DEPTH, vk::SampleCountFlags::TYPE_1);
        assert_eq!(l.attachments.len(), 2);
        assert!(!l.is_multisampled());
        assert_eq!(
            l.attachments[0].final_layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(l.attachments[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(l.attachments[1].format, DEPTH);
    }

    #[test]
    fn multisample_resolves_into_third_attachment() {
        let l = RenderPassLayout::new(COLOR, DEPTH, vk::SampleCountFlags::TYPE_4);
        assert_eq!(l.attachments.len(), 3);
        assert_eq!(l.attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(l.attachments[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(l.attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            l.attachments[2].final_layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(l.resolve_ref.map(|r| r.attachment), Some(2));
    }

    #[test]
    fn external_dependency_guards_color_output() {
        let l = RenderPassLayout::new(COLOR, DEPTH, vk::SampleCountFlags::TYPE_1);
        assert_eq!(l.dependency.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(l.dependency.dst_subpass, 0);
        assert!(l
            .dependency
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        assert!(l
            .dependency
            .dst_access_mask
            .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn framebuffer_order_matches_attachments() {
        let swap = vk::ImageView::from_raw(1);
        let depth = vk::ImageView::from_raw(2);
        let msaa = vk::ImageView::from_raw(3);
        assert_eq!(framebuffer_views(swap, depth, None), vec![swap, depth]);
        assert_eq!(
            framebuffer_views(swap, depth, Some(msaa)),
            vec![msaa, depth, swap]
        );
    }
}
