// SPDX-License-Identifier: CEPL-1.0
use crate::attachment::{clamp_samples, pick_depth_format, Attachments};
use crate::buffer::{MeshBuffers, Uploader};
use crate::commands::{CommandRecorder, RecordContext};
use crate::device::{create_logical_device, pick_physical_device, DeviceContext};
use crate::error::{VkError, VkResult};
use crate::frame::{
    acquire_status, fence_wait_result, present_status, AcquireStatus, FrameBackend, PresentStatus,
    RebuildStatus,
};
use crate::instance::VulkanInstance;
use crate::pipeline::{
    create_or_load_pipeline_cache, pipeline_cache_path, save_pipeline_cache, supported_passes,
    PipelineDescriptor, PipelineSet,
};
use crate::render_pass::{create_framebuffers, create_render_pass, destroy_framebuffers, RenderPassLayout};
use crate::swapchain::{Swapchain, SwapchainRequest};
use crate::sync::{self, FrameSlot};
use crate::uniform::{create_descriptor_set_layout, FrameUniforms};
use ash::khr::{surface, swapchain};
use ash::vk;
use prism_render::{FrameInput, Mesh, RenderConfig, RenderSize, Vertex, VertexLayout, VertexPN};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::path::PathBuf;
use tracing::{debug, info};

struct Settings {
    clear_color: [f32; 4],
    samples: vk::SampleCountFlags,
    depth_format: vk::Format,
    allow_fifo: bool,
    rerecord_every_frame: bool,
}

/// Owns every device object. Mutated only by init, rebuild and scene changes.
pub struct GpuContext {
    vk: VulkanInstance,
    surface_i: surface::Instance,
    surface: vk::SurfaceKHR,
    dev: DeviceContext,
    swap_d: swapchain::Device,
    swapchain: Swapchain,
    attachments: Attachments,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    set_layout: vk::DescriptorSetLayout,
    pipeline_cache: vk::PipelineCache,
    pipeline_cache_path: PathBuf,
    descriptors: Vec<PipelineDescriptor>,
    pipelines: PipelineSet,
    uniforms: FrameUniforms,
    vertex_layout: VertexLayout,
    meshes: Vec<MeshBuffers>,
    recorder: CommandRecorder,
    settings: Settings,
}

impl GpuContext {
    // STRICT ORDER:
    // - instance → surface → device (each torn down by hand if a later one fails)
    // - everything after the device lives in `Self`, so Drop cleans up partial init
    pub unsafe fn new(
        display_raw: RawDisplayHandle,
        window_raw: RawWindowHandle,
        size: RenderSize,
        cfg: &RenderConfig,
    ) -> VkResult<Self> {
        let mut vk = VulkanInstance::new(display_raw, &cfg.validation_layers)?;
        let surface_i = surface::Instance::new(&vk.entry, &vk.instance);
        let surface = match ash_window::create_surface(
            &vk.entry,
            &vk.instance,
            display_raw,
            window_raw,
            None,
        ) {
            Ok(s) => s,
            Err(e) => {
                vk.destroy();
                return Err(e.into());
            }
        };

        let picked = pick_physical_device(&vk.instance, &surface_i, surface).and_then(
            |(phys, indices)| {
                let depth_format = pick_depth_format(&vk.instance, phys)?;
                Ok((create_logical_device(&vk.instance, phys, indices)?, depth_format))
            },
        );
        let (dev, depth_format) = match picked {
            Ok(d) => d,
            Err(e) => {
                surface_i.destroy_surface(surface, None);
                vk.destroy();
                return Err(e);
            }
        };

        let swap_d = swapchain::Device::new(&vk.instance, &dev.device);
        let samples = clamp_samples(&dev.properties.limits, cfg.msaa_samples);
        let vertex_layout = VertexPN::layout();
        let descriptors = supported_passes(&cfg.passes, dev.wireframe)
            .into_iter()
            .map(|style| PipelineDescriptor::for_pass(&vertex_layout, style, cfg, samples))
            .collect();
        let pipeline_cache_path = pipeline_cache_path(cfg.pipeline_cache.as_deref(), &dev.properties);

        let mut ctx = Self {
            vk,
            surface_i,
            surface,
            swap_d,
            swapchain: Swapchain::default(),
            attachments: Attachments::default(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            set_layout: vk::DescriptorSetLayout::null(),
            pipeline_cache: vk::PipelineCache::null(),
            pipeline_cache_path,
            descriptors,
            pipelines: PipelineSet::default(),
            uniforms: FrameUniforms::default(),
            vertex_layout,
            meshes: Vec::new(),
            recorder: CommandRecorder {
                pool: vk::CommandPool::null(),
                buffers: Vec::new(),
            },
            settings: Settings {
                clear_color: cfg.clear_color,
                samples,
                depth_format,
                allow_fifo: cfg.allow_fifo_fallback,
                rerecord_every_frame: cfg.rerecord_every_frame,
            },
            dev,
        };

        let device = &ctx.dev.device;
        ctx.set_layout = create_descriptor_set_layout(device)?;
        ctx.pipeline_cache = create_or_load_pipeline_cache(device, &ctx.pipeline_cache_path)?;
        ctx.recorder = CommandRecorder::new(device, ctx.dev.graphics_family, 0)?;
        ctx.build_swapchain_resources(size)?;

        info!(
            "vk ready: {} images, {:?} samples, depth {:?}, passes {:?}",
            ctx.swapchain.image_count(),
            samples,
            depth_format,
            ctx.pipelines.passes.iter().map(|(s, _)| *s).collect::<Vec<_>>()
        );
        Ok(ctx)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    // STRICT ORDER:
    // - new swapchain is created from the old handle BEFORE the old one is destroyed
    // - framebuffers and old views go before the old swapchain
    // - render pass + pipelines only rebuilt when the color format changed
    // - command buffers re-recorded last, against the final framebuffers
    unsafe fn build_swapchain_resources(&mut self, size: RenderSize) -> VkResult<()> {
        let previous = (self.swapchain.handle != vk::SwapchainKHR::null()).then_some(&self.swapchain);
        let next = Swapchain::create(
            &self.dev.device,
            &self.surface_i,
            &self.swap_d,
            SwapchainRequest {
                phys: self.dev.phys,
                surface: self.surface,
                indices: (self.dev.graphics_family, self.dev.present_family),
                size,
                previous,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                allow_fifo: self.settings.allow_fifo,
            },
        )?;

        let device = &self.dev.device;
        destroy_framebuffers(device, &mut self.framebuffers);
        self.swapchain.destroy(device, &self.swap_d);
        let old_format = self.swapchain.format;
        self.swapchain = next;

        self.attachments.destroy(device);
        self.attachments = Attachments::create(
            &self.vk.instance,
            device,
            self.dev.phys,
            self.swapchain.extent,
            self.swapchain.format,
            self.settings.depth_format,
            self.settings.samples,
        )?;

        if self.render_pass == vk::RenderPass::null() || old_format != self.swapchain.format {
            self.pipelines.destroy(device);
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
            let layout = RenderPassLayout::new(
                self.swapchain.format,
                self.settings.depth_format,
                self.settings.samples,
            );
            self.render_pass = create_render_pass(device, &layout)?;
            self.pipelines = PipelineSet::create(
                device,
                self.pipeline_cache,
                self.render_pass,
                self.set_layout,
                &self.descriptors,
            )?;
            debug!("render pass + pipelines built for {:?}", self.swapchain.format);
        }

        self.framebuffers = create_framebuffers(
            device,
            self.render_pass,
            &self.swapchain.views,
            &self.attachments,
            self.swapchain.extent,
        )?;

        self.rebuild_uniforms(self.meshes.len())?;
        self.recorder.resize(&self.dev.device, self.swapchain.image_count())?;
        self.record_all()
    }

    unsafe fn create_uniforms(&self, capacity: usize) -> VkResult<FrameUniforms> {
        FrameUniforms::create(
            &self.vk.instance,
            &self.dev.device,
            self.dev.phys,
            self.set_layout,
            self.swapchain.image_count(),
            capacity,
            self.dev.properties.limits.min_uniform_buffer_offset_alignment,
        )
    }

    /// The old set stays live until its replacement exists.
    unsafe fn rebuild_uniforms(&mut self, capacity: usize) -> VkResult<()> {
        let next = self.create_uniforms(capacity)?;
        let mut old = std::mem::replace(&mut self.uniforms, next);
        old.destroy(&self.dev.device);
        Ok(())
    }

    fn record_context(&self) -> RecordContext<'_> {
        RecordContext {
            render_pass: self.render_pass,
            framebuffers: &self.framebuffers,
            extent: self.swapchain.extent,
            clear_color: self.settings.clear_color,
            multisampled: self.attachments.is_multisampled(),
            pipeline_layout: self.pipelines.layout,
            passes: &self.pipelines.passes,
            descriptor_sets: &self.uniforms.sets,
            meshes: &self.meshes,
            object_stride: self.uniforms.object_stride,
        }
    }

    unsafe fn record_all(&self) -> VkResult<()> {
        self.recorder.record_all(&self.dev.device, &self.record_context())
    }

    pub unsafe fn set_clear_color(&mut self, rgba: [f32; 4]) -> VkResult<()> {
        self.settings.clear_color = rgba;
        self.dev.device.device_wait_idle()?;
        self.record_all()
    }

    /// Replaces the drawables. Every mesh must use the pipeline vertex layout.
    ///
    /// New buffers are staged first. A failed upload or uniform allocation
    /// leaves the previous scene and its recorded command buffers untouched.
    pub unsafe fn set_meshes(&mut self, meshes: &[Mesh]) -> VkResult<()> {
        if meshes.iter().any(|m| *m.layout() != self.vertex_layout) {
            return Err(VkError::MeshLayoutMismatch);
        }
        self.dev.device.device_wait_idle()?;

        let mut uploaded = self.upload_meshes(meshes)?;
        let grown = if self.uniforms.fits(uploaded.len()) {
            None
        } else {
            match self.create_uniforms(uploaded.len()) {
                Ok(u) => Some(u),
                Err(e) => {
                    destroy_meshes(&self.dev.device, &mut uploaded);
                    return Err(e);
                }
            }
        };

        let device = &self.dev.device;
        if let Some(next) = grown {
            let mut old = std::mem::replace(&mut self.uniforms, next);
            old.destroy(device);
        }
        let mut old = std::mem::replace(&mut self.meshes, uploaded);
        destroy_meshes(device, &mut old);

        debug!("scene: {} meshes uploaded", self.meshes.len());
        self.record_all()
    }

    unsafe fn upload_meshes(&self, meshes: &[Mesh]) -> VkResult<Vec<MeshBuffers>> {
        let up = Uploader {
            instance: &self.vk.instance,
            device: &self.dev.device,
            phys: self.dev.phys,
            queue: self.dev.graphics_queue,
            pool: self.recorder.pool,
        };
        let mut uploaded = Vec::with_capacity(meshes.len());
        for m in meshes {
            match MeshBuffers::upload(&up, m) {
                Ok(b) => uploaded.push(b),
                Err(e) => {
                    destroy_meshes(&self.dev.device, &mut uploaded);
                    return Err(e);
                }
            }
        }
        Ok(uploaded)
    }
}

unsafe fn destroy_meshes(device: &ash::Device, meshes: &mut Vec<MeshBuffers>) {
    for m in meshes.iter_mut() {
        m.destroy(device);
    }
    meshes.clear();
}

impl FrameBackend for GpuContext {
    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn create_frame_slots(&mut self, count: usize) -> VkResult<Vec<FrameSlot>> {
        unsafe { sync::create_frame_slots(&self.dev.device, count) }
    }

    fn destroy_frame_slots(&mut self, slots: &[FrameSlot]) {
        unsafe { sync::destroy_frame_slots(&self.dev.device, slots) }
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        let waited = unsafe { self.dev.device.wait_for_fences(&[fence], true, timeout_ns) };
        fence_wait_result(waited, timeout_ns)
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.dev.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VkResult<AcquireStatus> {
        let acquired = unsafe {
            self.swap_d.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        };
        acquire_status(acquired)
    }

    fn prepare_image(&mut self, image_index: u32, input: &FrameInput<'_>) -> VkResult<()> {
        let image = image_index as usize;
        unsafe {
            self.uniforms
                .write(&self.dev.device, image, input, self.meshes.len())?;
            if self.settings.rerecord_every_frame {
                self.recorder
                    .record_one(&self.dev.device, image, &self.record_context())?;
            }
        }
        Ok(())
    }

    // STRICT PER-FRAME ORDER:
    // wait image_available at COLOR_ATTACHMENT_OUTPUT → signal render_finished + in_flight
    fn submit(&mut self, image_index: u32, slot: &FrameSlot) -> VkResult<()> {
        let cmd = self.recorder.buffer(image_index as usize);
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &slot.render_finished,
            ..Default::default()
        };
        unsafe {
            self.dev.device.queue_submit(
                self.dev.graphics_queue,
                std::slice::from_ref(&submit),
                slot.in_flight,
            )
        }
        .map_err(VkError::SubmitFailure)
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> VkResult<PresentStatus> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.swapchain.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        present_status(unsafe { self.swap_d.queue_present(self.dev.present_queue, &present) })
    }

    fn rebuild(&mut self, size: RenderSize) -> VkResult<RebuildStatus> {
        if size.is_zero() {
            return Ok(RebuildStatus::Deferred);
        }
        let caps = unsafe {
            self.surface_i
                .get_physical_device_surface_capabilities(self.dev.phys, self.surface)?
        };
        // minimized: the surface itself reports a zero extent
        if caps.current_extent.width == 0 || caps.current_extent.height == 0 {
            return Ok(RebuildStatus::Deferred);
        }
        unsafe { self.build_swapchain_resources(size)? };
        Ok(RebuildStatus::Rebuilt {
            image_count: self.swapchain.image_count(),
        })
    }

    fn wait_idle(&mut self) -> VkResult<()> {
        unsafe { self.dev.device.device_wait_idle()? };
        Ok(())
    }
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle()
// - save pipeline cache while the device is alive
// - free command buffers BEFORE destroying their pool
// - pipelines/layouts and render pass BEFORE swapchain
// - framebuffers, attachments, image views BEFORE swapchain
// - buffers, descriptor pool, set layout BEFORE device
// - destroy device, then surface, instance last
// Frame slots are owned by the frame loop and are gone before this runs.
impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let d = &self.dev.device;
            d.device_wait_idle().ok();

            if self.pipeline_cache != vk::PipelineCache::null() {
                save_pipeline_cache(d, self.pipeline_cache, &self.pipeline_cache_path);
            }

            self.recorder.destroy(d);
            self.pipelines.destroy(d);
            if self.render_pass != vk::RenderPass::null() {
                d.destroy_render_pass(self.render_pass, None);
            }
            destroy_framebuffers(d, &mut self.framebuffers);
            self.attachments.destroy(d);
            self.swapchain.destroy(d, &self.swap_d);

            destroy_meshes(d, &mut self.meshes);
            self.uniforms.destroy(d);
            if self.set_layout != vk::DescriptorSetLayout::null() {
                d.destroy_descriptor_set_layout(self.set_layout, None);
            }
            if self.pipeline_cache != vk::PipelineCache::null() {
                d.destroy_pipeline_cache(self.pipeline_cache, None);
            }

            d.destroy_device(None);
            self.surface_i.destroy_surface(self.surface, None);
            self.vk.destroy();
        }
    }
}
