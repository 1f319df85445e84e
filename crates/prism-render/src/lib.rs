// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use glam::Mat4;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod config;
mod mesh;

pub use config::{BackendKind, CullMode, DrawStyle, RenderConfig, Winding};
pub use mesh::{
    Mesh, Vertex, VertexAttribute, VertexLayout, VertexP, VertexPC, VertexPN, VertexPTc,
    VertexPTcN,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-area size.
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Per-tick data borrowed from the scene. `transforms[i]` is the model matrix
/// of mesh `i`; missing entries draw with identity.
#[derive(Clone, Copy, Debug)]
pub struct FrameInput<'a> {
    pub view_proj: Mat4,
    pub transforms: &'a [Mat4],
}

impl<'a> FrameInput<'a> {
    pub fn new(view_proj: Mat4, transforms: &'a [Mat4]) -> Self {
        Self {
            view_proj,
            transforms,
        }
    }

    pub fn transform(&self, mesh: usize) -> Mat4 {
        self.transforms.get(mesh).copied().unwrap_or(Mat4::IDENTITY)
    }
}

impl Default for FrameInput<'_> {
    fn default() -> Self {
        Self {
            view_proj: Mat4::IDENTITY,
            transforms: &[],
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RenderConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Records a pending resize. Zero-area sizes are ignored.
    fn resize(&mut self, size: RenderSize) -> Result<()>;

    /// Runs one tick. `Ok(false)` means the frame was skipped (rebuild or paused).
    fn draw_frame(&mut self, input: &FrameInput<'_>) -> Result<bool>;

    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()>;

    /// Replaces the drawable set.
    fn set_meshes(&mut self, meshes: &[Mesh]) -> Result<()>;

    /// Blocks until queued GPU work completes, then releases resources.
    fn cleanup(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sizes() {
        assert!(RenderSize::new(0, 480).is_zero());
        assert!(RenderSize::new(640, 0).is_zero());
        assert!(!RenderSize::new(640, 480).is_zero());
    }

    #[test]
    fn missing_transforms_fall_back_to_identity() {
        let t = [Mat4::from_translation(glam::Vec3::X)];
        let input = FrameInput::new(Mat4::IDENTITY, &t);
        assert_eq!(input.transform(0), t[0]);
        assert_eq!(input.transform(5), Mat4::IDENTITY);
    }
}
