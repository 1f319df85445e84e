// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use winit::dpi::LogicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowAttributes};

pub use winit;

/// Creates the single resizable application window.
pub fn create_main_window(
    event_loop: &ActiveEventLoop,
    title: &str,
    width: u32,
    height: u32,
) -> Result<Window> {
    let attrs = WindowAttributes::default()
        .with_title(title)
        .with_inner_size(LogicalSize::new(width.max(1), height.max(1)))
        .with_resizable(true);
    let window = event_loop
        .create_window(attrs)
        .context("create_window")?;
    let size = window.inner_size();
    tracing::info!(
        "window '{}' created at {}x{} (scale {:.2})",
        title,
        size.width,
        size.height,
        window.scale_factor()
    );
    Ok(window)
}
