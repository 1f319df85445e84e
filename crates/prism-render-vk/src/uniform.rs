// SPDX-License-Identifier: CEPL-1.0
use crate::buffer::{create_host_visible, dynamic_alignment, GpuBuffer};
use crate::error::{VkError, VkResult};
use ash::{vk, Instance};
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use prism_render::FrameInput;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: Mat4,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ObjectUniform {
    pub model: Mat4,
    pub normal: Mat4,
}

impl ObjectUniform {
    pub fn from_model(model: Mat4) -> Self {
        Self {
            model,
            normal: model.inverse().transpose(),
        }
    }
}

pub const CAMERA_BINDING: u32 = 0;
pub const OBJECT_BINDING: u32 = 1;

/// set 0: binding 0 camera, binding 1 per-object (dynamic offset).
pub unsafe fn create_descriptor_set_layout(
    device: &ash::Device,
) -> VkResult<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding {
            binding: CAMERA_BINDING,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: OBJECT_BINDING,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
    ];
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    Ok(device.create_descriptor_set_layout(&ci, None)?)
}

/// Packs one aligned [`ObjectUniform`] per drawable.
pub fn pack_objects(input: &FrameInput<'_>, count: usize, stride: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; count.max(1) * stride];
    for i in 0..count {
        let obj = ObjectUniform::from_model(input.transform(i));
        let at = i * stride;
        bytes[at..at + std::mem::size_of::<ObjectUniform>()]
            .copy_from_slice(bytemuck::bytes_of(&obj));
    }
    bytes
}

/// Per swapchain image: a camera buffer, an object buffer and the set binding both.
#[derive(Debug, Default)]
pub struct FrameUniforms {
    pub pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
    pub camera: Vec<GpuBuffer>,
    pub objects: Vec<GpuBuffer>,
    pub object_stride: vk::DeviceSize,
    pub capacity: usize,
}

impl FrameUniforms {
    pub unsafe fn create(
        instance: &Instance,
        device: &ash::Device,
        phys: vk::PhysicalDevice,
        set_layout: vk::DescriptorSetLayout,
        image_count: usize,
        object_capacity: usize,
        min_align: vk::DeviceSize,
    ) -> VkResult<Self> {
        let capacity = object_capacity.max(1);
        let object_stride =
            dynamic_alignment(std::mem::size_of::<ObjectUniform>() as u64, min_align);
        let mut out = Self {
            object_stride,
            capacity,
            ..Default::default()
        };
        if let Err(e) = out.allocate(instance, device, phys, set_layout, image_count) {
            out.destroy(device);
            return Err(e);
        }
        Ok(out)
    }

    unsafe fn allocate(
        &mut self,
        instance: &Instance,
        device: &ash::Device,
        phys: vk::PhysicalDevice,
        set_layout: vk::DescriptorSetLayout,
        image_count: usize,
    ) -> VkResult<()> {
        let camera_size = std::mem::size_of::<CameraUniform>() as vk::DeviceSize;
        let object_size = self.object_stride * self.capacity as vk::DeviceSize;
        for _ in 0..image_count {
            self.camera.push(create_host_visible(
                instance,
                device,
                phys,
                camera_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?);
            self.objects.push(create_host_visible(
                instance,
                device,
                phys,
                object_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?);
        }

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: image_count as u32,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: image_count as u32,
            },
        ];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: image_count as u32,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        self.pool = device.create_descriptor_pool(&pool_ci, None)?;

        let layouts = vec![set_layout; image_count];
        let ai = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.pool,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        self.sets = device.allocate_descriptor_sets(&ai)?;

        for (i, &set) in self.sets.iter().enumerate() {
            let camera_info = vk::DescriptorBufferInfo {
                buffer: self.camera[i].buffer,
                offset: 0,
                range: camera_size,
            };
            // Dynamic binding: the range covers one object; the offset moves per draw.
            let object_info = vk::DescriptorBufferInfo {
                buffer: self.objects[i].buffer,
                offset: 0,
                range: std::mem::size_of::<ObjectUniform>() as vk::DeviceSize,
            };
            let writes = [
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: CAMERA_BINDING,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: &camera_info,
                    ..Default::default()
                },
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: OBJECT_BINDING,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                    p_buffer_info: &object_info,
                    ..Default::default()
                },
            ];
            device.update_descriptor_sets(&writes, &[]);
        }
        Ok(())
    }

    /// Writes camera and object data for one image. Extra drawables beyond
    /// capacity are never recorded, so they are not written either.
    pub unsafe fn write(
        &self,
        device: &ash::Device,
        image: usize,
        input: &FrameInput<'_>,
        mesh_count: usize,
    ) -> VkResult<()> {
        let (camera_buf, object_buf) = self.buffers(image)?;
        let camera = CameraUniform {
            view_proj: input.view_proj,
        };
        camera_buf.write(device, 0, bytemuck::bytes_of(&camera))?;

        let count = mesh_count.min(self.capacity);
        let bytes = pack_objects(input, count, self.object_stride as usize);
        object_buf.write(device, 0, &bytes)
    }

    pub fn buffers(&self, image: usize) -> VkResult<(&GpuBuffer, &GpuBuffer)> {
        match (self.camera.get(image), self.objects.get(image)) {
            (Some(c), Some(o)) => Ok((c, o)),
            _ => Err(VkError::MissingUniforms(image)),
        }
    }

    /// Whether `mesh_count` drawables fit without reallocating.
    pub fn fits(&self, mesh_count: usize) -> bool {
        mesh_count <= self.capacity
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for b in self.camera.iter_mut().chain(self.objects.iter_mut()) {
            b.destroy(device);
        }
        self.camera.clear();
        self.objects.clear();
        self.sets.clear();
        if self.pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(self.pool, None);
            self.pool = vk::DescriptorPool::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objects_land_on_aligned_offsets() {
        let t = [
            Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0)),
            Mat4::from_scale(glam::Vec3::splat(2.0)),
        ];
        let input = FrameInput::new(Mat4::IDENTITY, &t);
        let stride = 256;
        let bytes = pack_objects(&input, 2, stride);
        assert_eq!(bytes.len(), 512);

        let second: ObjectUniform =
            bytemuck::pod_read_unaligned(&bytes[stride..stride + std::mem::size_of::<ObjectUniform>()]);
        assert_eq!(second.model, t[1]);
        assert!(second.normal.abs_diff_eq(Mat4::from_scale(glam::Vec3::splat(0.5)), 1e-6));
    }

    #[test]
    fn empty_scene_still_packs_one_slot() {
        let bytes = pack_objects(&FrameInput::default(), 0, 128);
        assert_eq!(bytes.len(), 128);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn missing_image_is_an_error_not_a_panic() {
        let u = FrameUniforms::default();
        assert!(matches!(u.buffers(0), Err(VkError::MissingUniforms(0))));
    }

    #[test]
    fn capacity_check() {
        let u = FrameUniforms {
            capacity: 3,
            ..Default::default()
        };
        assert!(u.fits(0));
        assert!(u.fits(3));
        assert!(!u.fits(4));
    }
}
