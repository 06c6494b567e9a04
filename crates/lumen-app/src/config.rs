// SPDX-License-Identifier: CEPL-1.0
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use lumen_platform::WindowSpec;
use lumen_render::{PresentModePreference, RendererConfig};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::Args;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let spec = WindowSpec::default();
        WindowCfg { title: spec.title, width: spec.width, height: spec.height }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present_mode: PresentModeCfg,
    /// Unset means "on in debug builds".
    pub validation: Option<bool>,
    pub shader_dir: PathBuf,
    pub fence_timeout_ms: u64,
    pub disallowed_devices: Vec<String>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            present_mode: PresentModeCfg::Mailbox,
            validation: None,
            shader_dir: PathBuf::from("shaders"),
            fence_timeout_ms: 5000,
            disallowed_devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Mailbox,
    Fifo,
    Immediate,
}

impl From<PresentModeCfg> for PresentModePreference {
    fn from(m: PresentModeCfg) -> Self {
        match m {
            PresentModeCfg::Mailbox => PresentModePreference::Mailbox,
            PresentModeCfg::Fifo => PresentModePreference::Fifo,
            PresentModeCfg::Immediate => PresentModePreference::Immediate,
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

/// A missing file means defaults; a malformed one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} not found, using defaults", path.display());
            return AppCfg::default();
        }
        Err(e) => {
            warn!("cannot read {}: {e}; using defaults", path.display());
            return AppCfg::default();
        }
    };
    toml::from_str::<AppCfg>(&text).unwrap_or_else(|e| {
        warn!("ignoring malformed {}: {e}", path.display());
        AppCfg::default()
    })
}

impl AppCfg {
    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
        }
    }

    /// File values with command-line overrides on top.
    pub fn renderer_config(&self, args: &Args) -> RendererConfig {
        let r = &self.render;
        let defaults = RendererConfig::default();
        let validation = if args.validation {
            true
        } else if args.no_validation {
            false
        } else {
            r.validation.unwrap_or(defaults.validation)
        };
        RendererConfig {
            app_name: self.window.title.clone(),
            clear_color: r.clear_color,
            present_mode: args.present_mode.unwrap_or(r.present_mode).into(),
            validation,
            shader_dir: args.shader_dir.clone().unwrap_or_else(|| r.shader_dir.clone()),
            frame_timeout: Duration::from_millis(r.fence_timeout_ms.max(1)),
            disallowed_devices: r.disallowed_devices.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("lumen").chain(argv.iter().copied()))
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_cfg(&dir.path().join("lumen.toml"));
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.render.fence_timeout_ms, 5000);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Mailbox);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lumen.toml");
        fs::write(
            &path,
            r#"
[render]
present_mode = "fifo"
clear_color = [0.1, 0.2, 0.3, 1.0]
disallowed_devices = ["llvmpipe (LLVM 17.0.6, 256 bits)"]
"#,
        )
        .unwrap();
        let cfg = load_cfg(&path);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Fifo);
        assert_eq!(cfg.render.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(cfg.render.disallowed_devices.len(), 1);
        assert_eq!(cfg.window.title, "lumen");
        assert_eq!(cfg.render.shader_dir, PathBuf::from("shaders"));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lumen.toml");
        fs::write(&path, "[render\npresent_mode = 3").unwrap();
        let cfg = load_cfg(&path);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Mailbox);
    }

    #[test]
    fn command_line_overrides_file() {
        let mut cfg = AppCfg::default();
        cfg.render.validation = Some(true);
        cfg.render.present_mode = PresentModeCfg::Fifo;

        let rc = cfg.renderer_config(&args(&[
            "--no-validation",
            "--present-mode",
            "immediate",
            "--shader-dir",
            "/opt/lumen/spv",
        ]));
        assert!(!rc.validation);
        assert_eq!(rc.present_mode, PresentModePreference::Immediate);
        assert_eq!(rc.shader_dir, PathBuf::from("/opt/lumen/spv"));

        let rc = cfg.renderer_config(&args(&[]));
        assert!(rc.validation);
        assert_eq!(rc.present_mode, PresentModePreference::Fifo);
        assert_eq!(rc.frame_timeout, Duration::from_millis(5000));
    }
}
