// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, bail, Context, Result};
use glow::HasContext as _;
use prism_render::{
    CullMode, DrawStyle, FrameInput, Mesh, RenderConfig, RenderSize, Renderer, Vertex,
    VertexLayout, VertexPN, Winding,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use tracing::{debug, info, warn};

use glutin::{
    config::ConfigTemplateBuilder,
    context::{
        ContextApi, ContextAttributesBuilder, NotCurrentContext, PossiblyCurrentContext, Version,
    },
    display::{Display, DisplayApiPreference},
    prelude::*,
    surface::{Surface, SurfaceAttributesBuilder, SwapInterval, WindowSurface},
};

use std::ffi::CString;
use std::num::NonZeroU32;

const VERT_SRC: &str = r#"#version 330 core
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inNormal;
uniform mat4 uViewProj;
uniform mat4 uModel;
uniform mat4 uNormal;
out vec3 vNormal;
void main() {
  vNormal = normalize(mat3(uNormal) * inNormal);
  gl_Position = uViewProj * uModel * vec4(inPos, 1.0);
}"#;

const FRAG_SRC: &str = r#"#version 330 core
in vec3 vNormal;
uniform int uWire;
out vec4 outColor;
const vec3 LIGHT_DIR = normalize(vec3(0.4, 0.8, 0.6));
const vec3 BASE = vec3(0.75, 0.72, 0.68);
void main() {
  if (uWire != 0) { outColor = vec4(0.1, 0.9, 0.3, 1.0); return; }
  float lambert = max(dot(normalize(vNormal), LIGHT_DIR), 0.0);
  outColor = vec4(BASE * (0.15 + 0.85 * lambert), 1.0);
}"#;

struct GlMesh {
    vao: glow::VertexArray,
    vbo: glow::Buffer,
    ebo: Option<glow::Buffer>,
    count: i32,
}

struct Uniforms {
    view_proj: Option<glow::UniformLocation>,
    model: Option<glow::UniformLocation>,
    normal: Option<glow::UniformLocation>,
    wire: Option<glow::UniformLocation>,
}

pub struct GlRenderer {
    context: PossiblyCurrentContext,
    surface: Surface<WindowSurface>,
    gl: glow::Context,
    size: RenderSize,
    clear: [f32; 4],
    program: glow::Program,
    uniforms: Uniforms,
    layout: VertexLayout,
    passes: Vec<DrawStyle>,
    meshes: Vec<GlMesh>,
    released: bool,
}

unsafe fn compile_stage(gl: &glow::Context, kind: u32, src: &str, what: &str) -> Result<glow::Shader> {
    let shader = gl.create_shader(kind).map_err(anyhow::Error::msg)?;
    gl.shader_source(shader, src);
    gl.compile_shader(shader);
    if !gl.get_shader_compile_status(shader) {
        let log = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        bail!("GL {what} compile: {log}");
    }
    Ok(shader)
}

fn compile_program(gl: &glow::Context) -> Result<glow::Program> {
    unsafe {
        let vs = compile_stage(gl, glow::VERTEX_SHADER, VERT_SRC, "vert")?;
        let fs = match compile_stage(gl, glow::FRAGMENT_SHADER, FRAG_SRC, "frag") {
            Ok(fs) => fs,
            Err(e) => {
                gl.delete_shader(vs);
                return Err(e);
            }
        };

        let program = gl.create_program().map_err(anyhow::Error::msg)?;
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);

        gl.detach_shader(program, vs);
        gl.detach_shader(program, fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);

        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            bail!("GL link: {log}");
        }
        Ok(program)
    }
}

fn gl_front_face(w: Winding) -> u32 {
    match w {
        Winding::Clockwise => glow::CW,
        Winding::CounterClockwise => glow::CCW,
    }
}

fn gl_cull_face(c: CullMode) -> Option<u32> {
    match c {
        CullMode::None => None,
        CullMode::Back => Some(glow::BACK),
        CullMode::Front => Some(glow::FRONT),
    }
}

fn gl_polygon_mode(style: DrawStyle) -> u32 {
    match style {
        DrawStyle::Solid => glow::FILL,
        DrawStyle::Wireframe => glow::LINE,
    }
}

impl GlRenderer {
    fn make_current(
        display: &Display,
        window_handle: RawWindowHandle,
        size: RenderSize,
        cfg: &RenderConfig,
    ) -> Result<(
        PossiblyCurrentContext,
        Surface<WindowSurface>,
        glow::Context,
    )> {
        let mut template = ConfigTemplateBuilder::new().with_depth_size(24);
        if cfg.is_multisampled() {
            template = template.with_multisampling(cfg.msaa_samples.min(16) as u8);
        }
        let mut configs =
            unsafe { display.find_configs(template.build()) }.context("find_configs")?;
        let config = configs.next().ok_or_else(|| anyhow!("no GL configs"))?;
        let w = NonZeroU32::new(size.width.max(1)).unwrap_or(NonZeroU32::MIN);
        let h = NonZeroU32::new(size.height.max(1)).unwrap_or(NonZeroU32::MIN);

        let sattrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(window_handle, w, h);
        let surface = unsafe { display.create_window_surface(&config, &sattrs) }
            .context("create_window_surface")?;
        let ctx_attrs = ContextAttributesBuilder::new()
            .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
            .build(Some(window_handle));
        let not_current: NotCurrentContext =
            unsafe { display.create_context(&config, &ctx_attrs) }.context("create_context")?;

        let context = not_current.make_current(&surface).context("make_current")?;

        let gl = unsafe {
            glow::Context::from_loader_function(|s| match CString::new(s) {
                Ok(name) => display.get_proc_address(&name) as *const _,
                Err(_) => std::ptr::null(),
            })
        };

        if let Err(e) = surface.set_swap_interval(&context, SwapInterval::Wait(NonZeroU32::MIN)) {
            warn!("GL: vsync unavailable: {e}");
        }

        Ok((context, surface, gl))
    }

    unsafe fn upload(&self, mesh: &Mesh) -> Result<GlMesh> {
        let gl = &self.gl;
        let vao = gl.create_vertex_array().map_err(anyhow::Error::msg)?;
        let vbo = gl.create_buffer().map_err(anyhow::Error::msg)?;
        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, mesh.vertex_bytes(), glow::STATIC_DRAW);

        let layout = mesh.layout();
        for (loc, attr) in layout.attributes.iter().enumerate() {
            gl.enable_vertex_attrib_array(loc as u32);
            gl.vertex_attrib_pointer_f32(
                loc as u32,
                attr.components as i32,
                glow::FLOAT,
                false,
                layout.stride as i32,
                attr.offset as i32,
            );
        }

        let (ebo, count) = match mesh.indices() {
            Some(indices) => {
                let ebo = gl.create_buffer().map_err(anyhow::Error::msg)?;
                gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ebo));
                gl.buffer_data_u8_slice(
                    glow::ELEMENT_ARRAY_BUFFER,
                    bytemuck::cast_slice(indices),
                    glow::STATIC_DRAW,
                );
                (Some(ebo), indices.len() as i32)
            }
            None => (None, mesh.vertex_count() as i32),
        };
        gl.bind_vertex_array(None);
        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        Ok(GlMesh {
            vao,
            vbo,
            ebo,
            count,
        })
    }

    unsafe fn release_meshes(&mut self) {
        for m in self.meshes.drain(..) {
            self.gl.delete_vertex_array(m.vao);
            self.gl.delete_buffer(m.vbo);
            if let Some(ebo) = m.ebo {
                self.gl.delete_buffer(ebo);
            }
        }
    }
}

impl Renderer for GlRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display_handle: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RenderConfig,
    ) -> Result<Self> {
        let wh = window
            .window_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();
        let dh = display_handle
            .display_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();

        let display =
            unsafe { Display::new(dh, DisplayApiPreference::Egl) }.context("Display::new")?;

        let (context, surface, gl) = Self::make_current(&display, wh, size, cfg)?;
        let program = compile_program(&gl)?;

        let uniforms = unsafe {
            Uniforms {
                view_proj: gl.get_uniform_location(program, "uViewProj"),
                model: gl.get_uniform_location(program, "uModel"),
                normal: gl.get_uniform_location(program, "uNormal"),
                wire: gl.get_uniform_location(program, "uWire"),
            }
        };

        unsafe {
            gl.enable(glow::FRAMEBUFFER_SRGB);
            gl.enable(glow::DEPTH_TEST);
            gl.depth_func(glow::LESS);
            gl.front_face(gl_front_face(cfg.front_face));
            match gl_cull_face(cfg.cull_mode) {
                Some(face) => {
                    gl.enable(glow::CULL_FACE);
                    gl.cull_face(face);
                }
                None => gl.disable(glow::CULL_FACE),
            }
            if cfg.is_multisampled() {
                gl.enable(glow::MULTISAMPLE);
            }
        }

        let passes = if cfg.passes.is_empty() {
            vec![DrawStyle::Solid]
        } else {
            cfg.passes.clone()
        };
        info!(
            "GlRenderer ready: {}x{}, passes {:?}",
            size.width, size.height, passes
        );

        Ok(Self {
            context,
            surface,
            gl,
            size,
            clear: cfg.clear_color,
            program,
            uniforms,
            layout: VertexPN::layout(),
            passes,
            meshes: Vec::new(),
            released: false,
        })
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        let (Some(w), Some(h)) = (NonZeroU32::new(size.width), NonZeroU32::new(size.height)) else {
            debug!("GL: resize to {}x{} ignored", size.width, size.height);
            return Ok(());
        };
        self.size = size;
        self.surface.resize(&self.context, w, h);
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()> {
        self.clear = rgba;
        Ok(())
    }

    fn set_meshes(&mut self, meshes: &[Mesh]) -> Result<()> {
        if self.released {
            return Ok(());
        }
        if meshes.iter().any(|m| *m.layout() != self.layout) {
            bail!("mesh vertex layout does not match the pipeline layout");
        }
        unsafe {
            self.release_meshes();
            let mut uploaded = Vec::with_capacity(meshes.len());
            for m in meshes {
                uploaded.push(self.upload(m)?);
            }
            self.meshes = uploaded;
        }
        debug!("GL scene: {} meshes", self.meshes.len());
        Ok(())
    }

    fn draw_frame(&mut self, input: &FrameInput<'_>) -> Result<bool> {
        if self.released || self.size.is_zero() {
            return Ok(false);
        }

        unsafe {
            let gl = &self.gl;
            gl.viewport(0, 0, self.size.width as i32, self.size.height as i32);
            gl.clear_color(self.clear[0], self.clear[1], self.clear[2], self.clear[3]);
            gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);

            gl.use_program(Some(self.program));
            gl.uniform_matrix_4_f32_slice(
                self.uniforms.view_proj.as_ref(),
                false,
                &input.view_proj.to_cols_array(),
            );
            for &style in &self.passes {
                gl.polygon_mode(glow::FRONT_AND_BACK, gl_polygon_mode(style));
                gl.uniform_1_i32(
                    self.uniforms.wire.as_ref(),
                    (style == DrawStyle::Wireframe) as i32,
                );
                for (i, m) in self.meshes.iter().enumerate() {
                    let model = input.transform(i);
                    let normal = model.inverse().transpose();
                    gl.uniform_matrix_4_f32_slice(
                        self.uniforms.model.as_ref(),
                        false,
                        &model.to_cols_array(),
                    );
                    gl.uniform_matrix_4_f32_slice(
                        self.uniforms.normal.as_ref(),
                        false,
                        &normal.to_cols_array(),
                    );
                    gl.bind_vertex_array(Some(m.vao));
                    if m.ebo.is_some() {
                        gl.draw_elements(glow::TRIANGLES, m.count, glow::UNSIGNED_INT, 0);
                    } else {
                        gl.draw_arrays(glow::TRIANGLES, 0, m.count);
                    }
                }
            }
            gl.polygon_mode(glow::FRONT_AND_BACK, glow::FILL);
            gl.bind_vertex_array(None);
            gl.use_program(None);
        }

        self.surface
            .swap_buffers(&self.context)
            .context("swap_buffers")?;

        Ok(true)
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        unsafe {
            self.gl.finish();
            self.release_meshes();
            self.gl.delete_program(self.program);
        }
        self.released = true;
        info!("GlRenderer cleaned up");
        Ok(())
    }
}

impl Drop for GlRenderer {
    fn drop(&mut self) {
        self.cleanup().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winding_and_cull_map_to_gl_enums() {
        assert_eq!(gl_front_face(Winding::CounterClockwise), glow::CCW);
        assert_eq!(gl_front_face(Winding::Clockwise), glow::CW);
        assert_eq!(gl_cull_face(CullMode::None), None);
        assert_eq!(gl_cull_face(CullMode::Back), Some(glow::BACK));
        assert_eq!(gl_cull_face(CullMode::Front), Some(glow::FRONT));
    }

    #[test]
    fn wireframe_pass_draws_lines() {
        assert_eq!(gl_polygon_mode(DrawStyle::Solid), glow::FILL);
        assert_eq!(gl_polygon_mode(DrawStyle::Wireframe), glow::LINE);
    }
}
