// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use swapline_render::{RenderSettings, RenderSize, Renderer};
use tracing::{info, warn};

use crate::backend::{AshDeviceQuery, VkFrameBackend};
use crate::device::DeviceBundle;
use crate::error::Error;
use crate::instance::InstanceBundle;
use crate::pacer::{FrameOutcome, FramePacer};
use crate::recorder::ClearRecorder;
use crate::select::{select_device, DeviceRequirements, SelectedDevice};
use crate::surface::{choose_presentation, PresentationConfig, PresentationSurface, SurfacePreferences};

/// Clears and presents a window's swapchain with bounded frames in flight.
pub struct VkRenderer {
    instance: InstanceBundle,
    device: DeviceBundle,
    device_name: String,
    surface: PresentationSurface,
    recorder: ClearRecorder,
    pacer: FramePacer,
    frames_presented: u64,
    suboptimal_reported: bool,
}

fn frame_backend<'a>(device: &'a DeviceBundle, surface: &PresentationSurface) -> VkFrameBackend<'a> {
    VkFrameBackend {
        device: &device.device,
        swapchain_loader: &device.swapchain_loader,
        swapchain: surface.swapchain,
        graphics_queue: device.graphics_queue,
        present_queue: device.present_queue,
    }
}

/// Picks a device against the instance's surface and opens it.
unsafe fn open_device(
    instance: &InstanceBundle,
    req: &DeviceRequirements,
) -> Result<(DeviceBundle, SelectedDevice), Error> {
    let candidates = instance.physical_devices()?;
    let query = AshDeviceQuery {
        instance: &instance.instance,
        surface_loader: &instance.surface_loader,
        surface: instance.surface,
    };
    let selected = select_device(&query, &candidates, req)?;
    let device = unsafe { DeviceBundle::new(&instance.instance, &selected, req) }?;
    Ok((device, selected))
}

unsafe fn build(
    display_raw: RawDisplayHandle,
    window_raw: RawWindowHandle,
    size: RenderSize,
    settings: &RenderSettings,
) -> Result<VkRenderer, Error> {
    let mut instance = unsafe { InstanceBundle::new(display_raw, window_raw, settings.validation) }?;

    let req = DeviceRequirements::default();
    let (mut device, selected) = match unsafe { open_device(&instance, &req) } {
        Ok(v) => v,
        Err(e) => {
            unsafe { instance.destroy() };
            return Err(e);
        }
    };

    let prefs = SurfacePreferences::new(size, settings.present_mode);
    let config = choose_presentation(&selected.probe.surface, &selected.queues, &prefs);
    let mut surface = match unsafe {
        PresentationSurface::create(&device.device, &device.swapchain_loader, instance.surface, config)
    } {
        Ok(s) => s,
        Err(e) => {
            unsafe {
                device.destroy();
                instance.destroy();
            }
            return Err(e.into());
        }
    };

    let mut recorder = match unsafe {
        ClearRecorder::new(&device.device, &surface, device.queues.graphics, settings.clear_color)
    } {
        Ok(r) => r,
        Err(e) => {
            unsafe {
                surface.destroy(&device.device, &device.swapchain_loader);
                device.destroy();
                instance.destroy();
            }
            return Err(e.into());
        }
    };

    let created = {
        let backend = frame_backend(&device, &surface);
        FramePacer::new(
            &backend,
            settings.frames_in_flight,
            surface.image_count(),
            settings.fence_timeout_ns(),
        )
    };
    let pacer = match created {
        Ok(p) => p,
        Err(e) => {
            unsafe {
                recorder.destroy(&device.device);
                surface.destroy(&device.device, &device.swapchain_loader);
                device.destroy();
                instance.destroy();
            }
            return Err(e.into());
        }
    };

    Ok(VkRenderer {
        instance,
        device,
        device_name: selected.probe.name,
        surface,
        recorder,
        pacer,
        frames_presented: 0,
        suboptimal_reported: false,
    })
}

impl VkRenderer {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn presentation(&self) -> &PresentationConfig {
        &self.surface.config
    }

    pub fn frames_in_flight(&self) -> usize {
        self.pacer.frames_in_flight()
    }

    /// Like `render`, but hands back the typed outcome or error.
    pub fn draw_frame(&mut self) -> Result<FrameOutcome, Error> {
        let backend = frame_backend(&self.device, &self.surface);
        let outcome = self.pacer.draw_frame(&backend, &self.recorder)?;
        if outcome.suboptimal && !self.suboptimal_reported {
            warn!(
                "swapchain suboptimal for the surface at frame {}; continuing",
                outcome.frame
            );
            self.suboptimal_reported = true;
        }
        self.frames_presented += 1;
        Ok(outcome)
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        let r = unsafe { build(dh, wh, size, settings) }?;
        let c = r.presentation();
        info!(
            "Vulkan renderer ready on {:?} ({}x{}, {:?}, {} images, {} frames in flight)",
            r.device_name,
            c.extent.width,
            c.extent.height,
            c.present_mode,
            r.surface.image_count(),
            r.pacer.frames_in_flight()
        );
        Ok(r)
    }

    fn render(&mut self) -> Result<()> {
        let frame = self.pacer.frames_submitted();
        self.draw_frame().with_context(|| format!("frame {frame}"))?;
        Ok(())
    }

    fn frames_presented(&self) -> u64 {
        self.frames_presented
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        self.device.wait_idle();
        let backend = frame_backend(&self.device, &self.surface);
        self.pacer.destroy(&backend);
        unsafe {
            self.recorder.destroy(&self.device.device);
            self.surface
                .destroy(&self.device.device, &self.device.swapchain_loader);
            self.device.destroy();
            self.instance.destroy();
        }
        info!(
            "Vulkan renderer torn down after {} presented frames",
            self.frames_presented
        );
    }
}
