// SPDX-License-Identifier: CEPL-1.0
//! Windowing layer. The renderer only ever sees raw window/display handles and
//! the framebuffer size reported here.
use anyhow::{Context, Result};
use tracing::info;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

pub use winit;

#[derive(Clone, Debug)]
pub struct WindowSpec {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSpec {
    fn default() -> Self {
        WindowSpec {
            title: "lumen".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

/// Resizing is not supported; the window keeps its initial size.
pub fn create_window(event_loop: &ActiveEventLoop, spec: &WindowSpec) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(spec.title.clone())
        .with_inner_size(PhysicalSize::new(spec.width, spec.height))
        .with_resizable(false);
    let window = event_loop.create_window(attrs).context("create_window")?;
    let size = window.inner_size();
    info!("window ready ({}x{})", size.width, size.height);
    Ok(window)
}

/// Live framebuffer size in pixels.
pub fn framebuffer_size(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    (size.width, size.height)
}
