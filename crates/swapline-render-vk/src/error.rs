// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Failures while negotiating a device and building the presentation surface.
/// All of these happen before the first frame and are fatal.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to load the Vulkan loader: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("instance creation failed: {0}")]
    InstanceCreation(#[source] vk::Result),

    #[error("validation layer {0} requested but not installed")]
    MissingValidationLayer(String),

    #[error("surface creation failed during {stage}: {result}")]
    SurfaceCreation {
        stage: &'static str,
        #[source]
        result: vk::Result,
    },

    #[error("physical device enumeration failed: {0}")]
    DeviceEnumeration(#[source] vk::Result),

    #[error("no suitable physical device among {candidates} candidate(s)")]
    NoSuitableDevice { candidates: usize },

    #[error("logical device creation failed: {0}")]
    DeviceCreation(#[source] vk::Result),

    #[error("frames in flight must be at least 1")]
    InvalidFramesInFlight,

    #[error("frame synchronization objects could not be created: {0}")]
    SyncCreation(#[source] vk::Result),

    #[error("command recorder setup failed during {stage}: {result}")]
    RecorderCreation {
        stage: &'static str,
        #[source]
        result: vk::Result,
    },
}

/// Failures inside the steady-state frame loop. The loop stops at the first
/// one; rebuilding or exiting is the caller's call.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("waiting on frame slot {slot} fence failed: {result}")]
    FenceWait {
        slot: usize,
        #[source]
        result: vk::Result,
    },

    #[error("frame slot {slot} fence did not signal within {timeout_ns} ns")]
    FenceTimeout { slot: usize, timeout_ns: u64 },

    #[error("acquiring the next presentable image failed: {0}")]
    Acquire(#[source] vk::Result),

    #[error("submitting frame for image {image_index} failed: {result}")]
    FrameSubmission {
        image_index: u32,
        #[source]
        result: vk::Result,
    },

    #[error("presenting image {image_index} failed: {result}")]
    Presentation {
        image_index: u32,
        #[source]
        result: vk::Result,
    },

    #[error("no recorded commands for image {image_index} ({available} available)")]
    MissingCommands { image_index: u32, available: usize },
}

impl RuntimeError {
    /// The backend result behind this error, if any.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::FenceWait { result, .. }
            | Self::FrameSubmission { result, .. }
            | Self::Presentation { result, .. } => Some(*result),
            Self::Acquire(result) => Some(*result),
            Self::FenceTimeout { .. } | Self::MissingCommands { .. } => None,
        }
    }

    /// True when the surface no longer matches the swapchain and must be rebuilt.
    pub fn is_out_of_date(&self) -> bool {
        self.vk_result() == Some(vk::Result::ERROR_OUT_OF_DATE_KHR)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl Error {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_detected_on_present_and_acquire() {
        let present = RuntimeError::Presentation {
            image_index: 1,
            result: vk::Result::ERROR_OUT_OF_DATE_KHR,
        };
        assert!(present.is_out_of_date());
        assert!(RuntimeError::Acquire(vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert!(!RuntimeError::Acquire(vk::Result::ERROR_DEVICE_LOST).is_out_of_date());
    }

    #[test]
    fn timeout_has_no_vk_result() {
        let e = RuntimeError::FenceTimeout {
            slot: 0,
            timeout_ns: 10,
        };
        assert_eq!(e.vk_result(), None);
        assert!(!e.is_out_of_date());
    }

    #[test]
    fn wrapper_keeps_category() {
        let e: Error = ConfigurationError::NoSuitableDevice { candidates: 3 }.into();
        assert!(e.is_configuration());
        assert_eq!(
            e.to_string(),
            "no suitable physical device among 3 candidate(s)"
        );
        let e: Error = RuntimeError::Acquire(vk::Result::ERROR_DEVICE_LOST).into();
        assert!(!e.is_configuration());
    }
}
