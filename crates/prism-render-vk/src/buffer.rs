// SPDX-License-Identifier: CEPL-1.0
use crate::error::{VkError, VkResult};
use ash::{vk, Instance};
use prism_render::Mesh;

#[derive(Clone, Copy, Debug, Default)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.buffer != vk::Buffer::null() {
            device.destroy_buffer(self.buffer, None);
        }
        if self.memory != vk::DeviceMemory::null() {
            device.free_memory(self.memory, None);
        }
        *self = Self::default();
    }

    /// Copies `bytes` to `offset` of a host-visible, host-coherent buffer.
    pub unsafe fn write(
        &self,
        device: &ash::Device,
        offset: vk::DeviceSize,
        bytes: &[u8],
    ) -> VkResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let len = bytes.len() as vk::DeviceSize;
        debug_assert!(offset + len <= self.size);
        let ptr = device.map_memory(self.memory, offset, len, vk::MemoryMapFlags::empty())?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
        device.unmap_memory(self.memory);
        Ok(())
    }
}

/// Pure lookup over a memory-properties table.
pub fn memory_type_index(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..mem.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0 && mem.memory_types[i as usize].property_flags.contains(req)
    })
}

#[inline]
pub unsafe fn find_memory_type(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> VkResult<u32> {
    let mem = instance.get_physical_device_memory_properties(phys);
    memory_type_index(&mem, type_bits, req).ok_or(VkError::NoMemoryType {
        type_bits,
        flags: req,
    })
}

pub unsafe fn create_buffer_and_memory(
    instance: &Instance,
    device: &ash::Device,
    phys: vk::PhysicalDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    props: vk::MemoryPropertyFlags,
) -> VkResult<GpuBuffer> {
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buffer = device.create_buffer(&bci, None)?;
    let req = device.get_buffer_memory_requirements(buffer);
    let mem_type = match find_memory_type(instance, phys, req.memory_type_bits, props) {
        Ok(t) => t,
        Err(e) => {
            device.destroy_buffer(buffer, None);
            return Err(e);
        }
    };
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: mem_type,
        ..Default::default()
    };
    let memory = match device.allocate_memory(&mai, None) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_buffer(buffer, None);
            return Err(e.into());
        }
    };
    if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
        device.destroy_buffer(buffer, None);
        device.free_memory(memory, None);
        return Err(e.into());
    }
    Ok(GpuBuffer {
        buffer,
        memory,
        size,
    })
}

pub unsafe fn create_host_visible(
    instance: &Instance,
    device: &ash::Device,
    phys: vk::PhysicalDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
) -> VkResult<GpuBuffer> {
    create_buffer_and_memory(
        instance,
        device,
        phys,
        size,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
}

/// Everything needed to issue one one-shot transfer on the graphics queue.
#[derive(Clone, Copy)]
pub struct Uploader<'a> {
    pub instance: &'a Instance,
    pub device: &'a ash::Device,
    pub phys: vk::PhysicalDevice,
    pub queue: vk::Queue,
    pub pool: vk::CommandPool,
}

impl Uploader<'_> {
    /// Host → staging → new device-local buffer. Waits for the copy.
    pub unsafe fn upload(&self, bytes: &[u8], usage: vk::BufferUsageFlags) -> VkResult<GpuBuffer> {
        let size = bytes.len().max(1) as vk::DeviceSize;
        let mut staging = create_host_visible(
            self.instance,
            self.device,
            self.phys,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        let result = self.copy_via(&staging, bytes, usage);
        staging.destroy(self.device);
        result
    }

    unsafe fn copy_via(
        &self,
        staging: &GpuBuffer,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> VkResult<GpuBuffer> {
        let d = self.device;
        staging.write(d, 0, bytes)?;

        let mut dst = create_buffer_and_memory(
            self.instance,
            d,
            self.phys,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = match d.allocate_command_buffers(&ai) {
            Ok(v) => v[0],
            Err(e) => {
                dst.destroy(d);
                return Err(e.into());
            }
        };

        let submit = || -> VkResult<()> {
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &bi)?;
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: staging.size,
            };
            d.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, std::slice::from_ref(&region));
            d.end_command_buffer(cmd)?;

            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            d.queue_submit(self.queue, std::slice::from_ref(&si), vk::Fence::null())?;
            d.queue_wait_idle(self.queue)?;
            Ok(())
        };
        let result = submit();
        d.free_command_buffers(self.pool, std::slice::from_ref(&cmd));

        match result {
            Ok(()) => Ok(dst),
            Err(e) => {
                dst.destroy(d);
                Err(e)
            }
        }
    }
}

/// Device-local copy of one [`Mesh`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MeshBuffers {
    pub vertex: GpuBuffer,
    pub index: Option<GpuBuffer>,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl MeshBuffers {
    pub unsafe fn upload(up: &Uploader<'_>, mesh: &Mesh) -> VkResult<Self> {
        let mut vertex = up.upload(mesh.vertex_bytes(), vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let (index, index_count) = match mesh.indices() {
            Some(idx) => match up.upload(bytemuck::cast_slice(idx), vk::BufferUsageFlags::INDEX_BUFFER) {
                Ok(b) => (Some(b), idx.len() as u32),
                Err(e) => {
                    vertex.destroy(up.device);
                    return Err(e);
                }
            },
            None => (None, 0),
        };
        Ok(Self {
            vertex,
            index,
            vertex_count: mesh.vertex_count(),
            index_count,
        })
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.vertex.destroy(device);
        if let Some(mut i) = self.index.take() {
            i.destroy(device);
        }
    }
}

/// Rounds `size` up to the device's dynamic-offset alignment.
pub fn dynamic_alignment(size: vk::DeviceSize, min_align: vk::DeviceSize) -> vk::DeviceSize {
    if min_align == 0 {
        size
    } else {
        size.div_ceil(min_align) * min_align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_rounds_up() {
        assert_eq!(dynamic_alignment(128, 256), 256);
        assert_eq!(dynamic_alignment(256, 256), 256);
        assert_eq!(dynamic_alignment(260, 256), 512);
        assert_eq!(dynamic_alignment(128, 0), 128);
    }

    #[test]
    fn memory_type_respects_bits_and_flags() {
        let mut mem = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        mem.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        mem.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        mem.memory_types[2].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL
            | vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT;

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(memory_type_index(&mem, 0b111, host), Some(1));
        assert_eq!(memory_type_index(&mem, 0b100, host), Some(2));
        assert_eq!(
            memory_type_index(&mem, 0b001, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
        assert_eq!(memory_type_index(&mem, 0b001, host), None);
    }
}
