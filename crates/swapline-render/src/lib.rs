// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

/// Present mode the application would like; backends fall back to strict vsync
/// when the surface does not offer it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentPreference {
    /// Low-latency triple buffering, no tearing.
    #[default]
    Mailbox,
    /// Strict vsync queue.
    Fifo,
    /// No vsync, may tear.
    Immediate,
}

impl std::str::FromStr for PresentPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mailbox" => Ok(Self::Mailbox),
            "fifo" | "vsync" => Ok(Self::Fifo),
            "immediate" => Ok(Self::Immediate),
            other => Err(format!("unknown present mode `{other}`")),
        }
    }
}

/// Knobs a renderer reads once at construction.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub clear_color: [f32; 4],
    /// Number of frames the CPU may run ahead of the GPU.
    pub frames_in_flight: usize,
    pub present_mode: PresentPreference,
    /// Enable the Khronos validation layer and debug messenger.
    pub validation: bool,
    /// Upper bound for each fence wait. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            frames_in_flight: 2,
            present_mode: PresentPreference::Mailbox,
            validation: cfg!(debug_assertions),
            fence_timeout_ms: None,
        }
    }
}

impl RenderSettings {
    pub fn fence_timeout_ns(&self) -> u64 {
        match self.fence_timeout_ms {
            Some(ms) => ms.saturating_mul(1_000_000),
            None => u64::MAX,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    fn render(&mut self) -> Result<()>;
    fn frames_presented(&self) -> u64;
}
