// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Deserialize;
use swapline_core::init_tracing;
use swapline_platform::window_attributes;
use swapline_render::{PresentPreference, RenderSettings, RenderSize, Renderer};
use swapline_render_vk::VkRenderer;
use tracing::{error, info, warn};

use swapline_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config; a missing file means defaults
    #[arg(long, default_value = "swapline.toml")]
    config: PathBuf,

    /// Exit after presenting this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Frames the CPU may run ahead of the GPU (overrides config)
    #[arg(long)]
    frames_in_flight: Option<usize>,

    /// mailbox | fifo | immediate (overrides config)
    #[arg(long)]
    present_mode: Option<PresentPreference>,
}

impl Args {
    fn apply(&self, cfg: &mut AppCfg) {
        if let Some(k) = self.frames_in_flight {
            cfg.render.frames_in_flight = k;
        }
        if let Some(mode) = self.present_mode {
            cfg.render.present_mode = mode;
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "swapline".into(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    render: RenderSettings,
    log_filter: Option<String>,
}

/// Reads the config at `path`. The second value is a problem worth logging
/// once tracing is up; the config falls back to defaults in that case.
fn load_cfg(path: &Path) -> (AppCfg, Option<String>) {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => (cfg, None),
            Err(e) => (
                AppCfg::default(),
                Some(format!("{} is not valid config, using defaults: {e}", path.display())),
            ),
        },
        Err(_) => (AppCfg::default(), None),
    }
}

struct App {
    cfg: AppCfg,
    frame_limit: Option<u64>,

    // Dropped before the window it renders into.
    renderer: Option<VkRenderer>,
    window: Option<Window>,

    exiting: bool,
    failure: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg, frame_limit: Option<u64>) -> Self {
        App {
            cfg,
            frame_limit,
            renderer: None,
            window: None,
            exiting: false,
            failure: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(r) = self.renderer.take() {
            info!("{} frames presented", r.frames_presented());
        }
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure = Some(e);
        self.shutdown(event_loop);
    }

    fn limit_reached(&self) -> bool {
        match (self.frame_limit, &self.renderer) {
            (Some(limit), Some(r)) => r.frames_presented() >= limit,
            _ => false,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.exiting {
            return;
        }

        let w = &self.cfg.window;
        let window = match event_loop.create_window(window_attributes(&w.title, w.width, w.height)) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, anyhow!("create_window: {e}")),
        };

        let size = window.inner_size();
        let render_size = RenderSize {
            width: size.width.max(1),
            height: size.height.max(1),
        };

        match VkRenderer::new(&window, &window, render_size, &self.cfg.render) {
            Ok(r) => self.renderer = Some(r),
            Err(e) => return self.fail(event_loop, e.context("vulkan init")),
        }

        info!(
            "rendering {}x{} with {} frames in flight",
            render_size.width, render_size.height, self.cfg.render.frames_in_flight
        );
        event_loop.set_control_flow(ControlFlow::Poll);
        window.request_redraw();
        self.window = Some(window);
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
                self.shutdown(event_loop);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }

                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                if let Err(e) = renderer.render() {
                    return self.fail(event_loop, e.context("render"));
                }
                self.frames = self.frames.saturating_add(1);

                if self.limit_reached() {
                    info!("frame limit reached");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        // The pacer does the throttling; keep redraws queued.
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
    let args = Args::parse();
    let (mut cfg, cfg_problem) = load_cfg(&args.config);
    init_tracing(cfg.log_filter.as_deref());
    if let Some(p) = cfg_problem {
        warn!("{p}");
    }
    args.apply(&mut cfg);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, args.frames);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_all_defaults() {
        let cfg: AppCfg = toml::from_str("").unwrap();
        assert_eq!(cfg.window.title, "swapline");
        assert_eq!((cfg.window.width, cfg.window.height), (1280, 720));
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.render.present_mode, PresentPreference::Mailbox);
        assert!(cfg.log_filter.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let cfg: AppCfg = toml::from_str(
            r#"
            log_filter = "debug"

            [window]
            width = 640

            [render]
            frames_in_flight = 3
            present_mode = "immediate"
            clear_color = [1.0, 0.0, 0.0, 1.0]
            fence_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.log_filter.as_deref(), Some("debug"));
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert_eq!(cfg.render.present_mode, PresentPreference::Immediate);
        assert_eq!(cfg.render.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(cfg.render.fence_timeout_ns(), 250_000_000);
    }

    #[test]
    fn cli_overrides_config() {
        let args = Args::parse_from([
            "swapline",
            "--frames-in-flight",
            "4",
            "--present-mode",
            "fifo",
            "--frames",
            "10",
        ]);
        let mut cfg = AppCfg::default();
        args.apply(&mut cfg);
        assert_eq!(cfg.render.frames_in_flight, 4);
        assert_eq!(cfg.render.present_mode, PresentPreference::Fifo);
        assert_eq!(args.frames, Some(10));
        assert_eq!(args.config, PathBuf::from("swapline.toml"));
    }

    #[test]
    fn unknown_present_mode_rejected_by_cli() {
        assert!(Args::try_parse_from(["swapline", "--present-mode", "relaxed"]).is_err());
    }

    #[test]
    fn missing_config_file_means_defaults() {
        let (cfg, problem) = load_cfg(Path::new("/nonexistent/swapline.toml"));
        assert!(problem.is_none());
        assert_eq!(cfg.render.frames_in_flight, 2);
    }

    #[test]
    fn broken_config_falls_back_with_a_message() {
        let path = std::env::temp_dir().join(format!("swapline-bad-{}.toml", std::process::id()));
        fs::write(&path, "[render\nframes_in_flight = ").unwrap();
        let (cfg, problem) = load_cfg(&path);
        let _ = fs::remove_file(&path);
        assert!(problem.is_some());
        assert_eq!(cfg.window.width, 1280);
    }
}
