// SPDX-License-Identifier: CEPL-1.0
use crate::error::{VkError, VkResult};
use ash::util::read_spv;
use ash::vk;
use prism_render::{CullMode, DrawStyle, RenderConfig, VertexAttribute, VertexLayout, Winding};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::{fs, ptr};
use tracing::{debug, warn};

const MESH_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv"));
const MESH_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"));
const WIRE_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/wire.frag.spv"));

/// Float vector format for an attribute with `components` floats.
pub fn attribute_format(components: u32) -> VkResult<vk::Format> {
    match components {
        1 => Ok(vk::Format::R32_SFLOAT),
        2 => Ok(vk::Format::R32G32_SFLOAT),
        3 => Ok(vk::Format::R32G32B32_SFLOAT),
        4 => Ok(vk::Format::R32G32B32A32_SFLOAT),
        n => Err(VkError::UnsupportedVertexFormat(n)),
    }
}

pub fn front_face(w: Winding) -> vk::FrontFace {
    match w {
        Winding::Clockwise => vk::FrontFace::CLOCKWISE,
        Winding::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
    }
}

pub fn cull_mode(c: CullMode) -> vk::CullModeFlags {
    match c {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Front => vk::CullModeFlags::FRONT,
    }
}

/// Fixed-function and vertex-input description of one graphics pipeline.
/// Viewport and scissor are always dynamic.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineDescriptor {
    pub style: DrawStyle,
    pub vertex_stride: u32,
    pub attributes: Vec<VertexAttribute>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub front_face: vk::FrontFace,
    pub cull_mode: vk::CullModeFlags,
    pub depth_buffered: bool,
    pub samples: vk::SampleCountFlags,
}

impl PipelineDescriptor {
    pub fn for_pass(
        layout: &VertexLayout,
        style: DrawStyle,
        cfg: &RenderConfig,
        samples: vk::SampleCountFlags,
    ) -> Self {
        Self {
            style,
            vertex_stride: layout.stride,
            attributes: layout.attributes.clone(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: match style {
                DrawStyle::Solid => vk::PolygonMode::FILL,
                DrawStyle::Wireframe => vk::PolygonMode::LINE,
            },
            front_face: front_face(cfg.front_face),
            cull_mode: cull_mode(cfg.cull_mode),
            depth_buffered: true,
            samples,
        }
    }

    pub fn binding_description(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.vertex_stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// One description per attribute, locations in layout order.
    pub fn attribute_descriptions(&self) -> VkResult<Vec<vk::VertexInputAttributeDescription>> {
        self.attributes
            .iter()
            .enumerate()
            .map(|(location, a)| {
                Ok(vk::VertexInputAttributeDescription {
                    location: location as u32,
                    binding: 0,
                    format: attribute_format(a.components)?,
                    offset: a.offset,
                })
            })
            .collect()
    }

    fn fragment_spirv(&self) -> &'static [u8] {
        match self.style {
            DrawStyle::Solid => MESH_FRAG,
            DrawStyle::Wireframe => WIRE_FRAG,
        }
    }
}

/// Drops wireframe passes the device cannot rasterize. Keeps order.
pub fn supported_passes(passes: &[DrawStyle], fill_mode_non_solid: bool) -> Vec<DrawStyle> {
    let mut out: Vec<DrawStyle> = Vec::with_capacity(passes.len());
    for &p in passes {
        if p == DrawStyle::Wireframe && !fill_mode_non_solid {
            warn!("wireframe pass dropped: fillModeNonSolid unsupported");
            continue;
        }
        out.push(p);
    }
    if out.is_empty() {
        out.push(DrawStyle::Solid);
    }
    out
}

pub unsafe fn create_pipeline_layout(
    device: &ash::Device,
    set_layout: vk::DescriptorSetLayout,
) -> VkResult<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &set_layout,
        ..Default::default()
    };
    Ok(device.create_pipeline_layout(&layout_info, None)?)
}

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Word-aligned SPIR-V with the magic number up front.
pub fn spirv_words(spirv: &[u8]) -> VkResult<Vec<u32>> {
    let words = read_spv(&mut Cursor::new(spirv)).map_err(|_| VkError::InvalidShaderCode)?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        _ => Err(VkError::InvalidShaderCode),
    }
}

unsafe fn shader_module(device: &ash::Device, spirv: &[u8]) -> VkResult<vk::ShaderModule> {
    let code = spirv_words(spirv)?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    Ok(device.create_shader_module(&ci, None)?)
}

pub unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    desc: &PipelineDescriptor,
) -> VkResult<vk::Pipeline> {
    let vb = desc.binding_description();
    let va = desc.attribute_descriptions()?;

    let vs = shader_module(device, MESH_VERT)?;
    let fs = match shader_module(device, desc.fragment_spirv()) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            return Err(e);
        }
    };

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: c"main".as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: c"main".as_ptr(),
            ..Default::default()
        },
    ];

    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &vb,
        vertex_attribute_description_count: va.len() as u32,
        p_vertex_attribute_descriptions: va.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: desc.topology,
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: ptr::null(), // dynamic
        scissor_count: 1,
        p_scissors: ptr::null(), // dynamic
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: desc.polygon_mode,
        cull_mode: desc.cull_mode,
        front_face: desc.front_face,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: desc.samples,
        ..Default::default()
    };
    let depth_on = if desc.depth_buffered { vk::TRUE } else { vk::FALSE };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: depth_on,
        depth_write_enable: depth_on,
        depth_compare_op: vk::CompareOp::LESS,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    let created = device.create_graphics_pipelines(cache, std::slice::from_ref(&pipeline_info), None);
    device.destroy_shader_module(vs, None);
    device.destroy_shader_module(fs, None);

    match created {
        Ok(p) => {
            debug!("pipeline {:?}: {:?}", desc.style, desc.polygon_mode);
            Ok(p[0])
        }
        Err((_, err)) => Err(VkError::PipelineCreation(err)),
    }
}

/// Shared layout plus one pipeline per draw style, in recording order.
#[derive(Debug, Default)]
pub struct PipelineSet {
    pub layout: vk::PipelineLayout,
    pub passes: Vec<(DrawStyle, vk::Pipeline)>,
}

impl PipelineSet {
    pub unsafe fn create(
        device: &ash::Device,
        cache: vk::PipelineCache,
        render_pass: vk::RenderPass,
        set_layout: vk::DescriptorSetLayout,
        descriptors: &[PipelineDescriptor],
    ) -> VkResult<Self> {
        let mut set = Self {
            layout: create_pipeline_layout(device, set_layout)?,
            passes: Vec::with_capacity(descriptors.len()),
        };
        for d in descriptors {
            match create_graphics_pipeline(device, cache, render_pass, set.layout, d) {
                Ok(p) => set.passes.push((d.style, p)),
                Err(e) => {
                    set.destroy(device);
                    return Err(e);
                }
            }
        }
        Ok(set)
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for (_, p) in self.passes.drain(..) {
            device.destroy_pipeline(p, None);
        }
        if self.layout != vk::PipelineLayout::null() {
            device.destroy_pipeline_layout(self.layout, None);
            self.layout = vk::PipelineLayout::null();
        }
    }
}

fn hex_bytes(b: &[u8]) -> String {
    let mut s = String::with_capacity(b.len() * 2);
    for x in b {
        use std::fmt::Write as _;
        let _ = write!(&mut s, "{:02x}", x);
    }
    s
}

/// `dir/vk_pipeline_cache_{vendor}_{device}_{driver}_{uuid}.bin`
pub fn pipeline_cache_path(dir: Option<&Path>, props: &vk::PhysicalDeviceProperties) -> PathBuf {
    let name = format!(
        "vk_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id,
        props.device_id,
        props.driver_version,
        hex_bytes(&props.pipeline_cache_uuid)
    );
    match dir {
        Some(d) => d.join(name),
        None => PathBuf::from(name),
    }
}

pub unsafe fn create_or_load_pipeline_cache(
    device: &ash::Device,
    path: &Path,
) -> VkResult<vk::PipelineCache> {
    let data = fs::read(path).ok();
    let (p_initial_data, initial_data_size) = match data.as_deref() {
        Some(bytes) => (bytes.as_ptr() as *const std::ffi::c_void, bytes.len()),
        None => (ptr::null(), 0),
    };
    debug!(
        "pipeline cache {}: {} bytes loaded",
        path.display(),
        initial_data_size
    );

    let ci = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        initial_data_size,
        p_initial_data,
        ..Default::default()
    };
    match device.create_pipeline_cache(&ci, None) {
        Ok(c) => Ok(c),
        Err(e) if initial_data_size > 0 => {
            // stale or foreign blob: start empty
            warn!("pipeline cache {} rejected ({e}); starting empty", path.display());
            let empty = vk::PipelineCacheCreateInfo {
                s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
                ..Default::default()
            };
            Ok(device.create_pipeline_cache(&empty, None)?)
        }
        Err(e) => Err(e.into()),
    }
}

pub unsafe fn save_pipeline_cache(device: &ash::Device, cache: vk::PipelineCache, path: &Path) {
    // benign if it fails; some drivers refuse an empty cache
    let Ok(bytes) = device.get_pipeline_cache_data(cache) else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Err(e) = fs::write(path, &bytes) {
        warn!("pipeline cache {}: {e}", path.display());
    }
}
