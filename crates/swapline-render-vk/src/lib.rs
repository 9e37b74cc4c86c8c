// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device negotiation, swapchain setup and a frame pacer that
//! keeps a bounded number of frames in flight over the swapchain images.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod device;
pub mod error;
pub mod instance;
pub mod pacer;
pub mod probe;
pub mod recorder;
pub mod renderer;
pub mod select;
pub mod surface;
pub mod sync;

pub use error::{ConfigurationError, Error, Result, RuntimeError};
pub use pacer::{CommandSource, FrameBackend, FrameOutcome, FramePacer};
pub use probe::{probe_device, DeviceProbe, DeviceQuery, QueueFamilies};
pub use renderer::VkRenderer;
pub use select::{select_device, DeviceFeature, DeviceRequirements, SelectedDevice};
pub use surface::{choose_presentation, PresentationConfig, PresentationSurface, SurfacePreferences};
