// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use winit::{dpi::PhysicalSize, window::WindowAttributes};

/// Attributes for the presentation window. Fixed size: the renderer does not
/// rebuild its swapchain on resize.
pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    tracing::debug!("window attributes: {title} {width}x{height}, not resizable");
    WindowAttributes::default()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(width.max(1), height.max(1)))
        .with_resizable(false)
}
