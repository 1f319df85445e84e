// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use prism_core::{init_tracing, load_config_or_default};
use prism_render::{BackendKind, FrameInput, RenderConfig, RenderSize, Renderer};
use prism_render_gl::GlRenderer;
use prism_render_vk::VkRenderer;
use tracing::{error, info, warn};

use prism_platform::create_main_window;
use prism_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Instant;

mod scene;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Renderer backend: vk | gl. Overrides `[render] backend`.
    #[arg(long)]
    backend: Option<BackendKind>,
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WindowConfig {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "prism".to_owned(),
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AppConfig {
    window: WindowConfig,
    render: RenderConfig,
}

enum Backend {
    Gl(Box<GlRenderer>),
    Vk(Box<VkRenderer>),
}

impl Backend {
    fn create(
        kind: BackendKind,
        window: &Window,
        size: RenderSize,
        cfg: &RenderConfig,
    ) -> Result<Self> {
        let wh = window.window_handle()?;
        let dh = window.display_handle()?;
        match kind {
            BackendKind::Gl => Ok(Backend::Gl(Box::new(GlRenderer::new(&wh, &dh, size, cfg)?))),
            BackendKind::Vk => match VkRenderer::new(&wh, &dh, size, cfg) {
                Ok(vk) => Ok(Backend::Vk(Box::new(vk))),
                Err(e) => {
                    error!("vk init failed: {e:#}; falling back to gl");
                    Ok(Backend::Gl(Box::new(GlRenderer::new(&wh, &dh, size, cfg)?)))
                }
            },
        }
    }

    fn renderer(&mut self) -> &mut dyn Renderer {
        match self {
            Backend::Gl(r) => r.as_mut(),
            Backend::Vk(r) => r.as_mut(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Backend::Gl(_) => "gl",
            Backend::Vk(_) => "vk",
        }
    }
}

struct App {
    backend_choice: BackendKind,
    cfg: AppConfig,
    window: Option<Window>,
    backend: Option<Backend>,
    render_size: RenderSize,

    exiting: bool,
    paused: bool,
    started: Instant,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn shutdown(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            if let Err(e) = backend.renderer().cleanup() {
                error!("cleanup: {e:#}");
            }
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let w = &self.cfg.window;
            let window = match create_main_window(event_loop, &w.title, w.width, w.height) {
                Ok(w) => w,
                Err(e) => {
                    error!("{e:#}");
                    event_loop.exit();
                    return;
                }
            };
            let size = window.inner_size();
            self.render_size = RenderSize::new(size.width, size.height);

            let created = Backend::create(
                self.backend_choice,
                &window,
                self.render_size,
                &self.cfg.render,
            );
            let mut backend = match created {
                Ok(b) => b,
                Err(e) => {
                    error!("renderer init failed: {e:#}");
                    event_loop.exit();
                    return;
                }
            };
            let meshes = [scene::cube(), scene::cube(), scene::cube()];
            if let Err(e) = backend.renderer().set_meshes(&meshes) {
                error!("scene upload: {e:#}");
            }
            info!("backend = {}", backend.name());

            self.window = Some(window);
            self.backend = Some(backend);
        }

        self.paused = self.render_size.is_zero();
        info!("resumed → paused={}", self.paused);
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                self.paused = self.render_size.is_zero();
                info!(
                    "Resized → {}x{} (paused={})",
                    self.render_size.width, self.render_size.height, self.paused
                );
                if let Some(backend) = &mut self.backend {
                    if let Err(e) = backend.renderer().resize(self.render_size) {
                        warn!("resize: {e:#}");
                    }
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.paused = occluded || self.render_size.is_zero();
                info!("Occluded={} → paused={}", occluded, self.paused);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                let Some(backend) = &mut self.backend else {
                    return;
                };

                let t = self.started.elapsed().as_secs_f32();
                let aspect = self.render_size.width as f32 / self.render_size.height.max(1) as f32;
                let gl_depth = matches!(backend, Backend::Gl(_));
                let transforms = scene::transforms(t);
                let view_proj = scene::orbit_view_proj(t, aspect, gl_depth);
                let input = FrameInput::new(view_proj, &transforms);

                match backend.renderer().draw_frame(&input) {
                    Ok(true) => self.frames = self.frames.saturating_add(1),
                    Ok(false) => {}
                    Err(e) => {
                        error!("render error: {e:#}; shutting down");
                        self.exiting = true;
                        self.shutdown();
                        event_loop.exit();
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg: AppConfig = load_config_or_default(&args.config);
    let backend_choice = args.backend.unwrap_or(cfg.render.backend);
    info!("config {} → backend {:?}", args.config.display(), backend_choice);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        backend_choice,
        cfg,
        window: None,
        backend: None,
        render_size: RenderSize::new(1, 1),
        exiting: false,
        paused: false,
        started: Instant::now(),
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    app.shutdown();
    Ok(())
}
