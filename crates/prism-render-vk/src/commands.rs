// SPDX-License-Identifier: CEPL-1.0
use crate::buffer::MeshBuffers;
use crate::error::VkResult;
use ash::vk;
use prism_render::DrawStyle;

/// Y flipped (origin top-left), full extent.
pub fn flipped_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Same order as the render pass attachments.
pub fn clear_values(rgba: [f32; 4], multisampled: bool) -> Vec<vk::ClearValue> {
    let color = vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    };
    let depth = vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        },
    };
    if multisampled {
        vec![color, depth, color]
    } else {
        vec![color, depth]
    }
}

pub fn dynamic_offset(object: usize, stride: vk::DeviceSize) -> u32 {
    (object as vk::DeviceSize * stride) as u32
}

/// Everything one recording pass reads. Borrowed from the GPU context.
pub struct RecordContext<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffers: &'a [vk::Framebuffer],
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub multisampled: bool,
    pub pipeline_layout: vk::PipelineLayout,
    pub passes: &'a [(DrawStyle, vk::Pipeline)],
    pub descriptor_sets: &'a [vk::DescriptorSet],
    pub meshes: &'a [MeshBuffers],
    pub object_stride: vk::DeviceSize,
}

/// One primary command buffer per swapchain image, from a resettable pool.
pub struct CommandRecorder {
    pub pool: vk::CommandPool,
    pub buffers: Vec<vk::CommandBuffer>,
}

impl CommandRecorder {
    pub unsafe fn new(device: &ash::Device, queue_family: u32, count: usize) -> VkResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = device.create_command_pool(&pool_info, None)?;
        let mut rec = Self {
            pool,
            buffers: Vec::new(),
        };
        if let Err(e) = rec.resize(device, count) {
            rec.destroy(device);
            return Err(e);
        }
        Ok(rec)
    }

    /// Reallocates only when the image count changed.
    pub unsafe fn resize(&mut self, device: &ash::Device, count: usize) -> VkResult<()> {
        if self.buffers.len() == count {
            return Ok(());
        }
        if !self.buffers.is_empty() {
            device.free_command_buffers(self.pool, &self.buffers);
            self.buffers.clear();
        }
        if count == 0 {
            return Ok(());
        }
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        self.buffers = device.allocate_command_buffers(&alloc_info)?;
        Ok(())
    }

    pub fn buffer(&self, image: usize) -> vk::CommandBuffer {
        self.buffers[image]
    }

    pub unsafe fn record_all(&self, device: &ash::Device, ctx: &RecordContext<'_>) -> VkResult<()> {
        for image in 0..self.buffers.len() {
            self.record_one(device, image, ctx)?;
        }
        Ok(())
    }

    /// Begin implicitly resets the buffer; the pool allows it.
    pub unsafe fn record_one(
        &self,
        device: &ash::Device,
        image: usize,
        ctx: &RecordContext<'_>,
    ) -> VkResult<()> {
        let cmd = self.buffers[image];
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        device.begin_command_buffer(cmd, &bi)?;

        device.cmd_set_viewport(cmd, 0, &[flipped_viewport(ctx.extent)]);
        device.cmd_set_scissor(cmd, 0, &[full_scissor(ctx.extent)]);

        let clears = clear_values(ctx.clear_color, ctx.multisampled);
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: ctx.render_pass,
            framebuffer: ctx.framebuffers[image],
            render_area: full_scissor(ctx.extent),
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

        let set = ctx.descriptor_sets[image];
        for &(_, pipeline) in ctx.passes {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            for (i, mesh) in ctx.meshes.iter().enumerate() {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    ctx.pipeline_layout,
                    0,
                    &[set],
                    &[dynamic_offset(i, ctx.object_stride)],
                );
                device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex.buffer], &[0]);
                match mesh.index {
                    Some(index) => {
                        device.cmd_bind_index_buffer(cmd, index.buffer, 0, vk::IndexType::UINT32);
                        device.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
                    }
                    None => device.cmd_draw(cmd, mesh.vertex_count, 1, 0, 0),
                }
            }
        }

        device.cmd_end_render_pass(cmd);
        device.end_command_buffer(cmd)?;
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if !self.buffers.is_empty() {
            device.free_command_buffers(self.pool, &self.buffers);
            self.buffers.clear();
        }
        if self.pool != vk::CommandPool::null() {
            device.destroy_command_pool(self.pool, None);
            self.pool = vk::CommandPool::null();
        }
    }
}
