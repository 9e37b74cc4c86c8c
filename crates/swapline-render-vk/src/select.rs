// SPDX-License-Identifier: CEPL-1.0
use std::fmt;

use ash::vk;
use tracing::info;

use crate::error::ConfigurationError;
use crate::probe::{probe_device, DeviceProbe, DeviceQuery, QueueFamilies};

/// Core device features the application may insist on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceFeature {
    SamplerAnisotropy,
    FillModeNonSolid,
    WideLines,
    GeometryShader,
    TessellationShader,
    DepthClamp,
    MultiDrawIndirect,
    ShaderFloat64,
}

impl DeviceFeature {
    fn flag(self, f: &vk::PhysicalDeviceFeatures) -> vk::Bool32 {
        match self {
            Self::SamplerAnisotropy => f.sampler_anisotropy,
            Self::FillModeNonSolid => f.fill_mode_non_solid,
            Self::WideLines => f.wide_lines,
            Self::GeometryShader => f.geometry_shader,
            Self::TessellationShader => f.tessellation_shader,
            Self::DepthClamp => f.depth_clamp,
            Self::MultiDrawIndirect => f.multi_draw_indirect,
            Self::ShaderFloat64 => f.shader_float64,
        }
    }

    fn flag_mut(self, f: &mut vk::PhysicalDeviceFeatures) -> &mut vk::Bool32 {
        match self {
            Self::SamplerAnisotropy => &mut f.sampler_anisotropy,
            Self::FillModeNonSolid => &mut f.fill_mode_non_solid,
            Self::WideLines => &mut f.wide_lines,
            Self::GeometryShader => &mut f.geometry_shader,
            Self::TessellationShader => &mut f.tessellation_shader,
            Self::DepthClamp => &mut f.depth_clamp,
            Self::MultiDrawIndirect => &mut f.multi_draw_indirect,
            Self::ShaderFloat64 => &mut f.shader_float64,
        }
    }

    pub fn supported_by(self, f: &vk::PhysicalDeviceFeatures) -> bool {
        self.flag(f) == vk::TRUE
    }
}

/// What a device must offer before it is considered at all.
#[derive(Clone, Debug)]
pub struct DeviceRequirements {
    pub extensions: Vec<String>,
    pub features: Vec<DeviceFeature>,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            extensions: vec![swapchain_extension_name()],
            features: Vec::new(),
        }
    }
}

impl DeviceRequirements {
    /// Feature struct with exactly the required features switched on.
    pub fn enabled_features(&self) -> vk::PhysicalDeviceFeatures {
        let mut out = vk::PhysicalDeviceFeatures::default();
        for &feat in &self.features {
            *feat.flag_mut(&mut out) = vk::TRUE;
        }
        out
    }
}

pub(crate) fn swapchain_extension_name() -> String {
    ash::khr::swapchain::NAME.to_string_lossy().into_owned()
}

/// Why a candidate was passed over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    IncompleteQueues,
    MissingExtensions(Vec<String>),
    MissingFeatures(Vec<DeviceFeature>),
    InadequateSurface,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompleteQueues => f.write_str("no graphics and/or present queue family"),
            Self::MissingExtensions(v) => write!(f, "missing extensions {v:?}"),
            Self::MissingFeatures(v) => write!(f, "missing features {v:?}"),
            Self::InadequateSurface => f.write_str("surface reports no formats or present modes"),
        }
    }
}

/// All reasons `probe` fails `req`. Empty means suitable.
pub fn evaluate(probe: &DeviceProbe, req: &DeviceRequirements) -> Vec<Rejection> {
    let mut out = Vec::new();

    if !probe.queues.is_complete() {
        out.push(Rejection::IncompleteQueues);
    }

    let missing_ext: Vec<String> = req
        .extensions
        .iter()
        .filter(|e| !probe.supports_extension(e))
        .cloned()
        .collect();
    if !missing_ext.is_empty() {
        out.push(Rejection::MissingExtensions(missing_ext));
    }

    let missing_feat: Vec<DeviceFeature> = req
        .features
        .iter()
        .copied()
        .filter(|f| !f.supported_by(&probe.features))
        .collect();
    if !missing_feat.is_empty() {
        out.push(Rejection::MissingFeatures(missing_feat));
    }

    if !probe.surface.is_adequate() {
        out.push(Rejection::InadequateSurface);
    }

    out
}

#[derive(Clone, Debug)]
pub struct SelectedDevice {
    pub probe: DeviceProbe,
    pub queues: QueueFamilies,
}

impl SelectedDevice {
    pub fn handle(&self) -> vk::PhysicalDevice {
        self.probe.device
    }
}

/// First suitable candidate in host enumeration order. No scoring.
pub fn select_device<Q: DeviceQuery + ?Sized>(
    query: &Q,
    candidates: &[vk::PhysicalDevice],
    req: &DeviceRequirements,
) -> Result<SelectedDevice, ConfigurationError> {
    for (i, &device) in candidates.iter().enumerate() {
        let probe = probe_device(query, device);
        let rejections = evaluate(&probe, req);

        if rejections.is_empty() {
            if let Some(queues) = probe.queues.resolve() {
                info!(
                    "selected device #{i} {:?} (graphics family {}, present family {})",
                    probe.name, queues.graphics, queues.present
                );
                return Ok(SelectedDevice { probe, queues });
            }
        }

        for r in &rejections {
            info!("device #{i} {:?} rejected: {r}", probe.name);
        }
    }

    Err(ConfigurationError::NoSuitableDevice {
        candidates: candidates.len(),
    })
}
