// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use tracing::{error, info};

use ash::vk;
use prism_render::{FrameInput, Mesh, RenderConfig, RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod attachment;
pub mod buffer;
pub mod commands;
pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod render_pass;
pub mod swapchain;
pub mod sync;
pub mod uniform;

pub use context::GpuContext;
pub use error::{VkError, VkResult};
pub use frame::{AcquireStatus, FrameBackend, FrameLoop, FrameState, PresentStatus, RebuildStatus};
pub use sync::{FrameSlot, FrameSync, ImageFenceMap};

/// Vulkan implementation of [`Renderer`]. `ctx` is `None` once cleaned up.
pub struct VkRenderer {
    frames: FrameLoop,
    ctx: Option<GpuContext>,
}

fn logged<T>(what: &str, r: VkResult<T>) -> Result<T> {
    r.map_err(|e| {
        error!("vk {what}: {e}");
        e.into()
    })
}

impl VkRenderer {
    pub fn current_index(&self) -> usize {
        self.frames.current_index()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.frame_count()
    }

    pub fn state(&self) -> FrameState {
        self.frames.state()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.ctx.as_ref().map(GpuContext::extent)
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RenderConfig,
    ) -> Result<Self> {
        let window_raw = window
            .window_handle()
            .map_err(|e| VkError::Loading(format!("window handle: {e}")))?
            .as_raw();
        let display_raw = display
            .display_handle()
            .map_err(|e| VkError::Loading(format!("display handle: {e}")))?
            .as_raw();

        let mut ctx = logged("init", unsafe { GpuContext::new(display_raw, window_raw, size, cfg) })?;
        let frames = logged("frame loop", FrameLoop::new(&mut ctx, size, cfg.fence_timeout_ns()))?;
        info!(
            "VkRenderer ready: {}x{}, {} frames in flight",
            ctx.extent().width,
            ctx.extent().height,
            frames.frame_count()
        );
        Ok(Self {
            frames,
            ctx: Some(ctx),
        })
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.frames.request_resize(size);
        Ok(())
    }

    fn draw_frame(&mut self, input: &FrameInput<'_>) -> Result<bool> {
        let Some(ctx) = self.ctx.as_mut() else {
            return Ok(false);
        };
        logged("draw", self.frames.draw_frame(ctx, input))
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()> {
        match self.ctx.as_mut() {
            Some(ctx) => logged("clear color", unsafe { ctx.set_clear_color(rgba) }),
            None => Ok(()),
        }
    }

    fn set_meshes(&mut self, meshes: &[Mesh]) -> Result<()> {
        match self.ctx.as_mut() {
            Some(ctx) => logged("set meshes", unsafe { ctx.set_meshes(meshes) }),
            None => Ok(()),
        }
    }

    fn cleanup(&mut self) -> Result<()> {
        let Some(mut ctx) = self.ctx.take() else {
            return Ok(());
        };
        let r = self.frames.shutdown(&mut ctx);
        drop(ctx);
        info!("VkRenderer cleaned up after {} frames", self.frames.presented_frames());
        logged("cleanup", r)
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            self.frames.shutdown(&mut ctx).ok();
        }
    }
}
