// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use lumen_core::{Error, Result};
use lumen_render::{FrameScheduler, FrameStatus, RenderSize, Renderer, RendererConfig};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{info, warn};

pub mod debug;
pub mod device;
pub mod dispatch;
pub mod frame;
pub mod pipeline;
pub mod probe;
pub mod queues;
pub mod select;
pub mod shader;
pub mod swapchain;
mod vk_error;

use crate::device::LogicalDevice;
use crate::dispatch::{Dispatch, InstanceRequest};
use crate::frame::VkFrameDevice;
use crate::pipeline::GraphicsPipeline;
use crate::probe::{CapabilityProbe, VkProbe};
use crate::queues::PresentQueues;
use crate::select::{choose_device, disallowed_by_name};
use crate::shader::ShaderSet;
use crate::swapchain::{negotiate, ImageChain, SwapchainPreferences, SwapchainProfile};
use crate::vk_error::VkContext;

pub struct VkRenderer {
    dispatch: Dispatch,
    surface: vk::SurfaceKHR,

    phys: vk::PhysicalDevice,
    device_name: String,
    logical: LogicalDevice,
    queues: PresentQueues,

    prefs: SwapchainPreferences,
    shaders: ShaderSet,
    pipeline: GraphicsPipeline,
    scheduler: FrameScheduler<VkFrameDevice>,
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    config: &RendererConfig,
) -> Result<VkRenderer> {
    // STRICT ORDER:
    // 0) shader binaries, before any API object exists
    // 1) instance, then a surface FROM THIS INSTANCE
    // 2) devices and queue families probed AGAINST THIS SURFACE
    // 3) logical device, swapchain, pipeline, frame objects
    // A failure at any step releases what the earlier steps created.
    let shaders = ShaderSet::load(&config.shader_dir)?;

    let dh: RawDisplayHandle = display
        .display_handle()
        .map_err(|e| Error::environment(format!("no display handle: {e}")))?
        .as_raw();
    let wh: RawWindowHandle = window
        .window_handle()
        .map_err(|e| Error::environment(format!("no window handle: {e}")))?
        .as_raw();

    let mut dispatch = Dispatch::new(
        dh,
        &InstanceRequest { app_name: &config.app_name, validation: config.validation },
    )?;
    let surface = match ash_window::create_surface(&dispatch.entry, &dispatch.instance, dh, wh, None) {
        Ok(s) => s,
        Err(e) => {
            dispatch.destroy();
            return Err(Error::environment("Error in creating surface").with_code(e.as_raw()));
        }
    };

    let parts = match open_device(&dispatch, surface, size, config, shaders) {
        Ok(p) => p,
        Err(e) => {
            dispatch.surface_fn.destroy_surface(surface, None);
            dispatch.destroy();
            return Err(e);
        }
    };

    Ok(VkRenderer {
        dispatch,
        surface,
        phys: parts.phys,
        device_name: parts.device_name,
        logical: parts.logical,
        queues: parts.queues,
        prefs: parts.prefs,
        shaders: parts.shaders,
        pipeline: parts.pipeline,
        scheduler: FrameScheduler::new(parts.frames, config.frame_timeout),
    })
}

/// Everything created on top of the surface.
struct DeviceParts {
    phys: vk::PhysicalDevice,
    device_name: String,
    logical: LogicalDevice,
    queues: PresentQueues,
    prefs: SwapchainPreferences,
    shaders: ShaderSet,
    pipeline: GraphicsPipeline,
    frames: VkFrameDevice,
}

/// Select a device and build on it. On failure the logical device (if any)
/// is gone; the surface and instance stay with the caller.
unsafe fn open_device(
    dispatch: &Dispatch,
    surface: vk::SurfaceKHR,
    size: RenderSize,
    config: &RendererConfig,
    shaders: ShaderSet,
) -> Result<DeviceParts> {
    let probe = VkProbe::new(dispatch, surface);
    let candidates = probe.devices()?;
    let disallowed = disallowed_by_name(&candidates, &config.disallowed_devices);
    let chosen = choose_device(&candidates, disallowed)?;
    let phys = chosen.candidate.handle;
    let queues = chosen.queues;
    info!(
        "vk: using {} ({}, score {}) graphics={} present={}",
        chosen.candidate.name,
        chosen.candidate.type_name(),
        chosen.score,
        queues.graphics,
        queues.presentation
    );
    if chosen.assignment.compute.is_none() {
        warn!("vk: no compute queue family");
    }
    if chosen.assignment.transfer.is_none() {
        warn!("vk: no transfer queue family");
    }
    let device_name = chosen.candidate.name.clone();

    let logical = LogicalDevice::create(dispatch, phys, queues)?;
    let prefs = SwapchainPreferences::for_present_mode(config.present_mode);

    let built = probe
        .surface_support(phys)
        .and_then(|support| negotiate(&support, size, &prefs))
        .and_then(|profile| build_frames(&logical, surface, profile, queues, &shaders, config));
    let (pipeline, frames) = match built {
        Ok(b) => b,
        Err(e) => {
            logical.device.destroy_device(None);
            return Err(e);
        }
    };

    Ok(DeviceParts { phys, device_name, logical, queues, prefs, shaders, pipeline, frames })
}

/// Pipeline, image chain and frame objects. On failure nothing created here
/// survives.
unsafe fn build_frames(
    logical: &LogicalDevice,
    surface: vk::SurfaceKHR,
    profile: SwapchainProfile,
    queues: PresentQueues,
    shaders: &ShaderSet,
    config: &RendererConfig,
) -> Result<(GraphicsPipeline, VkFrameDevice)> {
    let mut pipeline = GraphicsPipeline::create(&logical.device, profile.surface_format.format, shaders)?;

    // VkFrameDevice::new owns the chain and releases it on its own failure.
    let frames = ImageChain::create(
        &logical.device,
        &logical.swapchain_fn,
        surface,
        profile,
        queues,
        pipeline.render_pass,
        vk::SwapchainKHR::null(),
    )
    .and_then(|chain| {
        VkFrameDevice::new(logical, queues.graphics, chain, pipeline.handles(), config.clear_color)
    });
    match frames {
        Ok(f) => Ok((pipeline, f)),
        Err(e) => {
            pipeline.destroy(&logical.device);
            Err(e)
        }
    }
}

impl VkRenderer {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn frames_presented(&self) -> u64 {
        self.scheduler.frames_presented()
    }

    // STRICT ORDER (rebuild):
    // - device idle
    // - framebuffers, views, render-finished semaphores (swapchain kept)
    // - renegotiate against a fresh surface snapshot
    // - render pass + pipeline only when the format changed
    // - new chain (old swapchain retired through old_swapchain), semaphores
    unsafe fn rebuild_chain(&mut self, size: RenderSize) -> Result<()> {
        self.logical
            .device
            .device_wait_idle()
            .or_fail("vkDeviceWaitIdle")?;

        let support = VkProbe::new(&self.dispatch, self.surface).surface_support(self.phys)?;
        let profile = negotiate(&support, size, &self.prefs)?;

        let frames = self.scheduler.device_mut();
        frames.release_chain();

        let format = profile.surface_format.format;
        if format != self.pipeline.format {
            info!(
                "vk: surface format {:?} -> {:?}, rebuilding pipeline",
                self.pipeline.format, format
            );
            self.pipeline.destroy(&self.logical.device);
            self.pipeline = GraphicsPipeline::create(&self.logical.device, format, &self.shaders)?;
        }

        frames.rebuild_chain(self.surface, profile, self.queues, self.pipeline.handles())
    }
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle()
// - frame objects: sync, command pool, framebuffers, views, swapchain
// - pipeline, layout, render pass
// - device, then surface, then debug messenger and instance
impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            self.logical.device.device_wait_idle().ok();

            self.scheduler.device_mut().destroy();
            self.pipeline.destroy(&self.logical.device);
            self.logical.device.destroy_device(None);

            self.dispatch
                .surface_fn
                .destroy_surface(self.surface, None);
            self.dispatch.destroy();
        }
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RendererConfig,
    ) -> Result<Self> {
        unsafe {
            let r = build_renderer(window, display, size, config)?;
            let p = r.scheduler.device().profile();
            info!(
                "Vulkan swapchain ready ({}x{}, fmt {}, present {})",
                p.extent.width,
                p.extent.height,
                swapchain::fmt_name(p.surface_format.format),
                swapchain::pm_name(p.present_mode)
            );
            Ok(r)
        }
    }

    fn render(&mut self, size: RenderSize) -> Result<FrameStatus> {
        let status = self.scheduler.run_frame()?;
        let stale = match status {
            FrameStatus::OutOfDate => true,
            FrameStatus::Presented { suboptimal, .. } => suboptimal,
        };
        if stale && !size.is_empty() {
            unsafe { self.rebuild_chain(size)? };
        }
        Ok(status)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.scheduler.device_mut().set_clear_color(rgba);
    }

    fn shutdown(&mut self) -> Result<()> {
        self.scheduler.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::FailureClass;
    use raw_window_handle::{DisplayHandle, HandleError, WindowHandle};

    use crate::shader::{FRAGMENT_SHADER_FILE, VERTEX_SHADER_FILE};

    /// A window whose handles are never available.
    struct Headless;

    impl HasWindowHandle for Headless {
        fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
            Err(HandleError::Unavailable)
        }
    }

    impl HasDisplayHandle for Headless {
        fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
            Err(HandleError::Unavailable)
        }
    }

    fn config_in(dir: &std::path::Path) -> RendererConfig {
        RendererConfig { shader_dir: dir.to_path_buf(), ..RendererConfig::default() }
    }

    const SIZE: RenderSize = RenderSize { width: 800, height: 600 };

    #[test]
    fn missing_shaders_fail_before_any_handle_is_touched() {
        let dir = tempfile::tempdir().unwrap();
        let err = VkRenderer::new(&Headless, &Headless, SIZE, &config_in(dir.path()))
            .err()
            .expect("no shaders on disk");
        assert_eq!(err.class(), FailureClass::Asset);
        assert!(err.to_string().contains(VERTEX_SHADER_FILE));
    }

    #[test]
    fn unavailable_display_is_an_environment_failure() {
        let dir = tempfile::tempdir().unwrap();
        let magic = 0x0723_0203u32.to_le_bytes();
        std::fs::write(dir.path().join(VERTEX_SHADER_FILE), magic).unwrap();
        std::fs::write(dir.path().join(FRAGMENT_SHADER_FILE), magic).unwrap();

        let err = VkRenderer::new(&Headless, &Headless, SIZE, &config_in(dir.path()))
            .err()
            .expect("headless window");
        assert_eq!(err.class(), FailureClass::Environment);
        assert!(err.to_string().contains("no display handle"));
    }
}
