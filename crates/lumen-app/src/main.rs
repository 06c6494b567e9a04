// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use lumen_core::{find_engine_error, init_tracing};
use lumen_platform::{create_window, framebuffer_size};
use lumen_render::{FrameStatus, RenderSize, Renderer, RendererConfig};
use lumen_render_vk::VkRenderer;
use tracing::{debug, error, info};

use lumen_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use std::path::PathBuf;
use std::time::Instant;

mod config;

use config::{load_cfg, AppCfg, PresentModeCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "lumen.toml")]
    config: PathBuf,
    /// Directory holding vert.spv and frag.spv
    #[arg(long)]
    shader_dir: Option<PathBuf>,
    /// Force the validation layer on
    #[arg(long, conflicts_with = "no_validation")]
    validation: bool,
    /// Force the validation layer off
    #[arg(long)]
    no_validation: bool,
    #[arg(long, value_enum)]
    present_mode: Option<PresentModeCfg>,
}

struct App {
    cfg: AppCfg,
    renderer_cfg: RendererConfig,

    // field order matters: the renderer must drop before its window
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,

    paused: bool,
    exiting: bool,
    frames: u32,
    last_fps_instant: Instant,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg, renderer_cfg: RendererConfig) -> Self {
        App {
            cfg,
            renderer_cfg,
            renderer: None,
            window: None,
            render_size: RenderSize { width: 0, height: 0 },
            paused: false,
            exiting: false,
            frames: 0,
            last_fps_instant: Instant::now(),
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.close(event_loop);
    }

    /// Idle the device, then renderer before window.
    fn close(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        self.exiting = true;
        if let Some(r) = self.renderer.as_mut() {
            if let Err(e) = r.shutdown() {
                error!("shutdown: {e}");
                self.fatal.get_or_insert(e.into());
            }
        }
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = create_window(event_loop, &self.cfg.window_spec())?;
        let (width, height) = framebuffer_size(&window);
        self.render_size = RenderSize { width, height };

        let renderer = VkRenderer::new(&window, &window, self.render_size, &self.renderer_cfg)?;
        info!("renderer = vk on {}", renderer.device_name());

        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        self.paused = self.render_size.is_empty();
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
                self.close(event_loop);
            }

            // Only minimise/restore reaches here; the window is not resizable.
            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                let now_paused = self.render_size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!(
                        "Resized → {}x{} (paused={})",
                        self.render_size.width, self.render_size.height, self.paused
                    );
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match renderer.render(self.render_size) {
                    Ok(FrameStatus::Presented { .. }) => {
                        self.frames = self.frames.saturating_add(1);
                    }
                    Ok(FrameStatus::OutOfDate) => debug!("frame skipped: image chain rebuilt"),
                    Err(e) => self.fail(event_loop, e.into()),
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
            // minimised → sleep until restored
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            // re-sync with the live framebuffer before the next frame
            let (width, height) = framebuffer_size(w);
            self.render_size = RenderSize { width, height };
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

fn run() -> Result<()> {
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let renderer_cfg = cfg.renderer_config(&args);
    debug!(?renderer_cfg, "config");

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, renderer_cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() {
    init_tracing();
    if let Err(e) = run() {
        eprintln!("Fatal error: {e:#}");
        let code = find_engine_error(&e).map_or(0, lumen_core::Error::exit_code);
        std::process::exit(code);
    }
}
