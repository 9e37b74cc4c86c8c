// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use swapline_render::{PresentPreference, RenderSize};
use tracing::info;

use crate::error::ConfigurationError;
use crate::probe::{QueueFamilies, SurfaceCapabilities};

/// Surfaces report this width when the window lets the swapchain decide.
pub const UNDEFINED_EXTENT: u32 = u32::MAX;

#[derive(Clone, Copy, Debug)]
pub struct SurfacePreferences {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: PresentPreference,
    pub extent: RenderSize,
}

impl SurfacePreferences {
    pub fn new(extent: RenderSize, present_mode: PresentPreference) -> Self {
        Self {
            format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            present_mode,
            extent,
        }
    }
}

/// How swapchain images are shared between the graphics and present queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageSharing {
    Exclusive,
    /// Graphics family first, present family second.
    Concurrent([u32; 2]),
}

impl ImageSharing {
    pub fn for_queues(queues: &QueueFamilies) -> Self {
        if queues.is_shared() {
            Self::Exclusive
        } else {
            Self::Concurrent([queues.graphics, queues.present])
        }
    }

    pub fn mode(&self) -> vk::SharingMode {
        match self {
            Self::Exclusive => vk::SharingMode::EXCLUSIVE,
            Self::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn families(&self) -> &[u32] {
        match self {
            Self::Exclusive => &[],
            Self::Concurrent(f) => f,
        }
    }
}

/// Everything the swapchain is created from. Rebuilding replaces it whole.
#[derive(Clone, Copy, Debug)]
pub struct PresentationConfig {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing: ImageSharing,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| formats.first().copied())
        .unwrap_or(preferred)
}

pub fn preferred_mode(pref: PresentPreference) -> vk::PresentModeKHR {
    match pref {
        PresentPreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentPreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentPreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

/// The preferred mode if offered, otherwise FIFO, which every surface supports.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentPreference,
) -> vk::PresentModeKHR {
    let want = preferred_mode(pref);
    if modes.contains(&want) {
        want
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != UNDEFINED_EXTENT {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by a non-zero maximum.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count.saturating_add(1);
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub fn choose_presentation(
    surface: &SurfaceCapabilities,
    queues: &QueueFamilies,
    prefs: &SurfacePreferences,
) -> PresentationConfig {
    PresentationConfig {
        format: choose_surface_format(&surface.formats, prefs.format),
        present_mode: choose_present_mode(&surface.present_modes, prefs.present_mode),
        extent: choose_extent(&surface.caps, prefs.extent),
        image_count: choose_image_count(&surface.caps),
        sharing: ImageSharing::for_queues(queues),
        pre_transform: surface.caps.current_transform,
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PresentableImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

/// The swapchain and its images. Created and destroyed as one batch.
pub struct PresentationSurface {
    pub swapchain: vk::SwapchainKHR,
    pub config: PresentationConfig,
    pub images: Vec<PresentableImage>,
}

impl PresentationSurface {
    /// # Safety
    /// `device` and `loader` must belong to the device the config was chosen
    /// for, and `surface` must outlive the returned swapchain.
    pub unsafe fn create(
        device: &ash::Device,
        loader: &swapchain::Device,
        surface: vk::SurfaceKHR,
        config: PresentationConfig,
    ) -> Result<Self, ConfigurationError> {
        let swap_info = vk::SwapchainCreateInfoKHR {
            surface,
            min_image_count: config.image_count,
            image_format: config.format.format,
            image_color_space: config.format.color_space,
            image_extent: config.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            pre_transform: config.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: config.present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        }
        .image_sharing_mode(config.sharing.mode())
        .queue_family_indices(config.sharing.families());

        let swapchain = unsafe { loader.create_swapchain(&swap_info, None) }.map_err(|result| {
            ConfigurationError::SurfaceCreation {
                stage: "create_swapchain",
                result,
            }
        })?;

        let raw_images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(v) => v,
            Err(result) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(ConfigurationError::SurfaceCreation {
                    stage: "get_swapchain_images",
                    result,
                });
            }
        };

        let mut images = Vec::with_capacity(raw_images.len());
        for image in raw_images {
            match unsafe { create_color_view(device, image, config.format.format) } {
                Ok(view) => images.push(PresentableImage { image, view }),
                Err(result) => {
                    for img in &images {
                        unsafe { device.destroy_image_view(img.view, None) };
                    }
                    unsafe { loader.destroy_swapchain(swapchain, None) };
                    return Err(ConfigurationError::SurfaceCreation {
                        stage: "create_image_view",
                        result,
                    });
                }
            }
        }

        info!(
            "swapchain ready: {}x{}, {:?}/{:?}, {:?}, {} images (asked {}), {:?}",
            config.extent.width,
            config.extent.height,
            config.format.format,
            config.format.color_space,
            config.present_mode,
            images.len(),
            config.image_count,
            config.sharing
        );

        Ok(Self {
            swapchain,
            config,
            images,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn views(&self) -> impl Iterator<Item = vk::ImageView> + '_ {
        self.images.iter().map(|i| i.view)
    }

    /// # Safety
    /// No GPU work may still reference the images.
    pub unsafe fn destroy(&mut self, device: &ash::Device, loader: &swapchain::Device) {
        for img in self.images.drain(..) {
            unsafe { device.destroy_image_view(img.view, None) };
        }
        unsafe { loader.destroy_swapchain(self.swapchain, None) };
        self.swapchain = vk::SwapchainKHR::null();
    }
}

unsafe fn create_color_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> ash::prelude::VkResult<vk::ImageView> {
    let sub = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };
    let iv_info = vk::ImageViewCreateInfo {
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: sub,
        ..Default::default()
    };
    unsafe { device.create_image_view(&iv_info, None) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: UNDEFINED_EXTENT,
                height: UNDEFINED_EXTENT,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        }
    }

    const SHARED: QueueFamilies = QueueFamilies {
        graphics: 0,
        present: 0,
    };

    fn prefs() -> SurfacePreferences {
        SurfacePreferences::new(
            RenderSize {
                width: 800,
                height: 600,
            },
            PresentPreference::Mailbox,
        )
    }

    #[test]
    fn preferred_format_wins_when_present() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let got = choose_surface_format(&formats, prefs().format);
        assert_eq!(got.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn format_needs_matching_color_space() {
        let formats = [
            fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let got = choose_surface_format(&formats, prefs().format);
        assert_eq!(got.format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            fmt(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let got = choose_surface_format(&formats, prefs().format);
        assert_eq!(got.format, vk::Format::A2B10G10R10_UNORM_PACK32);
        assert_eq!(got.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn fifo_only_surface_gets_fifo() {
        let got = choose_present_mode(&[vk::PresentModeKHR::FIFO], PresentPreference::Mailbox);
        assert_eq!(got, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn mailbox_chosen_when_offered() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, PresentPreference::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, PresentPreference::Fifo),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn defined_extent_used_verbatim() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 3000,
            height: 10,
        };
        let e = choose_extent(&c, prefs().extent);
        assert_eq!((e.width, e.height), (3000, 10));
    }

    #[test]
    fn undefined_extent_clamps_each_dimension() {
        let c = caps(2, 3);
        let e = choose_extent(
            &c,
            RenderSize {
                width: 4000,
                height: 10,
            },
        );
        assert_eq!((e.width, e.height), (1920, 64));

        let e = choose_extent(&c, prefs().extent);
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn image_count_bounds() {
        for (min, max) in [(1, 0), (2, 0), (2, 3), (3, 3), (2, 8), (4, 4)] {
            let n = choose_image_count(&caps(min, max));
            assert!(n >= min, "min {min} max {max} -> {n}");
            if max > 0 {
                assert!(n <= max, "min {min} max {max} -> {n}");
            }
        }
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn split_queues_share_concurrently() {
        let q = QueueFamilies {
            graphics: 0,
            present: 2,
        };
        let s = ImageSharing::for_queues(&q);
        assert_eq!(s, ImageSharing::Concurrent([0, 2]));
        assert_eq!(s.mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(s.families(), &[0, 2]);
    }

    #[test]
    fn shared_queue_is_exclusive() {
        let s = ImageSharing::for_queues(&SHARED);
        assert_eq!(s.mode(), vk::SharingMode::EXCLUSIVE);
        assert!(s.families().is_empty());
    }

    #[test]
    fn full_config_is_deterministic() {
        let surface = SurfaceCapabilities {
            caps: caps(2, 0),
            formats: vec![fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE],
        };
        let a = choose_presentation(&surface, &SHARED, &prefs());
        let b = choose_presentation(&surface, &SHARED, &prefs());
        assert_eq!(a.format.format, b.format.format);
        assert_eq!(a.format.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(a.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(a.image_count, 3);
        assert_eq!((a.extent.width, a.extent.height), (800, 600));
        assert_eq!((b.extent.width, b.extent.height), (800, 600));
        assert_eq!(a.sharing, ImageSharing::Exclusive);
    }
}
