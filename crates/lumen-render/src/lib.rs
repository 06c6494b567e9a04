// SPDX-License-Identifier: CEPL-1.0
use lumen_core::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use std::time::Duration;

pub mod frame;

pub use frame::{
    Acquired, FenceWait, FrameDevice, FramePhase, FrameScheduler, FrameStatus,
    Presented, SubmitPlan,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    /// A minimised window reports a zero-sized framebuffer; nothing can be presented to it.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Ordering policy for presentation modes. Every policy ends with FIFO,
/// which the API guarantees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentModePreference {
    #[default]
    Mailbox,
    Fifo,
    Immediate,
}

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub app_name: String,
    pub clear_color: [f32; 4],
    pub present_mode: PresentModePreference,
    pub validation: bool,
    pub shader_dir: PathBuf,
    /// Upper bound for every fence and acquire wait in the frame loop.
    pub frame_timeout: Duration,
    /// Device names never to select.
    pub disallowed_devices: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            app_name: "lumen".to_owned(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            present_mode: PresentModePreference::Mailbox,
            validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders"),
            frame_timeout: Duration::from_millis(5000),
            disallowed_devices: Vec::new(),
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RendererConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Run one frame. `size` is the live framebuffer size, used when the
    /// image chain has to be rebuilt.
    fn render(&mut self, size: RenderSize) -> Result<FrameStatus>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    /// Idle the device so teardown can start.
    fn shutdown(&mut self) -> Result<()>;
}
