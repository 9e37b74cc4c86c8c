// SPDX-License-Identifier: CEPL-1.0
//! What a candidate physical device can do for one target surface.
//!
//! Probing never fails. A query that errors is logged and reported as
//! "nothing supported", leaving the suitability verdict to [`crate::select`].

use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, warn};

/// Read-only view of the host's physical devices against a single surface.
///
/// The `ash`-backed implementation lives in [`crate::backend`]; tests drive
/// the selector through in-memory fakes.
pub trait DeviceQuery {
    fn device_name(&self, device: vk::PhysicalDevice) -> String;
    fn device_type(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceType;
    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;
    fn present_support(&self, device: vk::PhysicalDevice, family: u32) -> VkResult<bool>;
    fn extensions(&self, device: vk::PhysicalDevice) -> VkResult<Vec<String>>;
    fn features(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures;
    fn surface_capabilities(
        &self,
        device: vk::PhysicalDevice,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self, device: vk::PhysicalDevice) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn present_modes(&self, device: vk::PhysicalDevice) -> VkResult<Vec<vk::PresentModeKHR>>;
}

/// Queue roles as discovered; either may be missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueRoleSet {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

/// Queue roles once both have resolved. The two may name the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueRoleSet {
    pub fn is_complete(&self) -> bool {
        self.resolve().is_some()
    }

    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, ascending. One entry when the roles coincide.
    pub fn unique(&self) -> Vec<u32> {
        let mut v = vec![self.graphics, self.present];
        v.sort_unstable();
        v.dedup();
        v
    }
}

/// Snapshot of surface support for one device. Taken fresh on every probe.
#[derive(Clone, Debug, Default)]
pub struct SurfaceCapabilities {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceCapabilities {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct DeviceProbe {
    pub device: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queues: QueueRoleSet,
    pub surface: SurfaceCapabilities,
    pub extensions: Vec<String>,
    pub features: vk::PhysicalDeviceFeatures,
}

impl DeviceProbe {
    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }
}

/// First graphics-capable family and first family that can present to the
/// surface, each scanned independently in enumeration order.
pub fn find_queue_roles<Q: DeviceQuery + ?Sized>(
    query: &Q,
    device: vk::PhysicalDevice,
) -> QueueRoleSet {
    let families = query.queue_families(device);

    let graphics = families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32);

    let present = (0..families.len() as u32).find(|&i| {
        query.present_support(device, i).unwrap_or_else(|e| {
            warn!("present support query for family {i} failed: {e:?}");
            false
        })
    });

    QueueRoleSet { graphics, present }
}

pub fn query_surface<Q: DeviceQuery + ?Sized>(
    query: &Q,
    device: vk::PhysicalDevice,
) -> SurfaceCapabilities {
    SurfaceCapabilities {
        caps: or_absent(query.surface_capabilities(device), "surface capabilities"),
        formats: or_absent(query.surface_formats(device), "surface formats"),
        present_modes: or_absent(query.present_modes(device), "present modes"),
    }
}

pub fn probe_device<Q: DeviceQuery + ?Sized>(query: &Q, device: vk::PhysicalDevice) -> DeviceProbe {
    let probe = DeviceProbe {
        device,
        name: query.device_name(device),
        device_type: query.device_type(device),
        queues: find_queue_roles(query, device),
        surface: query_surface(query, device),
        extensions: or_absent(query.extensions(device), "device extensions"),
        features: query.features(device),
    };
    debug!(
        "probed {:?} ({:?}): queues {:?}, {} formats, {} present modes, {} extensions",
        probe.name,
        probe.device_type,
        probe.queues,
        probe.surface.formats.len(),
        probe.surface.present_modes.len(),
        probe.extensions.len()
    );
    probe
}

fn or_absent<T: Default>(res: VkResult<T>, what: &str) -> T {
    res.unwrap_or_else(|e| {
        warn!("{what} query failed: {e:?}; treating as unsupported");
        T::default()
    })
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory [`DeviceQuery`] used by the probe, selector and surface tests.
    use super::*;
    use ash::vk::Handle;
    use std::collections::HashMap;

    #[derive(Clone, Debug)]
    pub struct FakeDevice {
        pub name: String,
        pub families: Vec<(vk::QueueFlags, bool)>,
        pub extensions: Vec<String>,
        pub features: vk::PhysicalDeviceFeatures,
        pub caps: vk::SurfaceCapabilitiesKHR,
        pub formats: Vec<vk::SurfaceFormatKHR>,
        pub present_modes: Vec<vk::PresentModeKHR>,
        pub broken_surface: bool,
    }

    impl FakeDevice {
        /// Single universal family, swapchain extension, one sRGB format, FIFO.
        pub fn good(name: &str) -> Self {
            Self {
                name: name.into(),
                families: vec![(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true)],
                extensions: vec!["VK_KHR_swapchain".into()],
                features: vk::PhysicalDeviceFeatures::default(),
                caps: vk::SurfaceCapabilitiesKHR {
                    min_image_count: 2,
                    max_image_count: 8,
                    current_extent: vk::Extent2D {
                        width: 800,
                        height: 600,
                    },
                    ..Default::default()
                },
                formats: vec![vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }],
                present_modes: vec![vk::PresentModeKHR::FIFO],
                broken_surface: false,
            }
        }
    }

    #[derive(Default)]
    pub struct FakeHost {
        pub devices: HashMap<u64, FakeDevice>,
        pub order: Vec<vk::PhysicalDevice>,
    }

    impl FakeHost {
        pub fn with(devices: Vec<FakeDevice>) -> Self {
            let mut host = Self::default();
            for (i, d) in devices.into_iter().enumerate() {
                let raw = 0x100 + i as u64;
                host.order.push(vk::PhysicalDevice::from_raw(raw));
                host.devices.insert(raw, d);
            }
            host
        }

        fn get(&self, device: vk::PhysicalDevice) -> &FakeDevice {
            &self.devices[&device.as_raw()]
        }
    }

    impl DeviceQuery for FakeHost {
        fn device_name(&self, device: vk::PhysicalDevice) -> String {
            self.get(device).name.clone()
        }

        fn device_type(&self, _device: vk::PhysicalDevice) -> vk::PhysicalDeviceType {
            vk::PhysicalDeviceType::DISCRETE_GPU
        }

        fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
            self.get(device)
                .families
                .iter()
                .map(|&(flags, _)| vk::QueueFamilyProperties {
                    queue_flags: flags,
                    queue_count: 1,
                    ..Default::default()
                })
                .collect()
        }

        fn present_support(&self, device: vk::PhysicalDevice, family: u32) -> VkResult<bool> {
            Ok(self.get(device).families[family as usize].1)
        }

        fn extensions(&self, device: vk::PhysicalDevice) -> VkResult<Vec<String>> {
            Ok(self.get(device).extensions.clone())
        }

        fn features(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
            self.get(device).features
        }

        fn surface_capabilities(
            &self,
            device: vk::PhysicalDevice,
        ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
            let d = self.get(device);
            if d.broken_surface {
                return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
            }
            Ok(d.caps)
        }

        fn surface_formats(
            &self,
            device: vk::PhysicalDevice,
        ) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
            let d = self.get(device);
            if d.broken_surface {
                return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
            }
            Ok(d.formats.clone())
        }

        fn present_modes(&self, device: vk::PhysicalDevice) -> VkResult<Vec<vk::PresentModeKHR>> {
            let d = self.get(device);
            if d.broken_surface {
                return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
            }
            Ok(d.present_modes.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{FakeDevice, FakeHost};
    use super::*;

    #[test]
    fn roles_pick_first_matching_family_each() {
        let mut d = FakeDevice::good("split");
        d.families = vec![
            (vk::QueueFlags::TRANSFER, false),
            (vk::QueueFlags::GRAPHICS, false),
            (vk::QueueFlags::COMPUTE, true),
            (vk::QueueFlags::GRAPHICS, true),
        ];
        let host = FakeHost::with(vec![d]);
        let roles = find_queue_roles(&host, host.order[0]);
        assert_eq!(roles.graphics, Some(1));
        assert_eq!(roles.present, Some(2));
        assert_eq!(
            roles.resolve(),
            Some(QueueFamilies {
                graphics: 1,
                present: 2
            })
        );
    }

    #[test]
    fn one_family_can_fill_both_roles() {
        let host = FakeHost::with(vec![FakeDevice::good("uni")]);
        let fams = find_queue_roles(&host, host.order[0]).resolve().unwrap();
        assert!(fams.is_shared());
        assert_eq!(fams.unique(), vec![0]);
    }

    #[test]
    fn incomplete_roles_do_not_resolve() {
        let mut d = FakeDevice::good("headless");
        d.families = vec![(vk::QueueFlags::GRAPHICS, false)];
        let host = FakeHost::with(vec![d]);
        let roles = find_queue_roles(&host, host.order[0]);
        assert_eq!(roles.graphics, Some(0));
        assert_eq!(roles.present, None);
        assert!(!roles.is_complete());
    }

    #[test]
    fn unique_families_sorted() {
        let fams = QueueFamilies {
            graphics: 3,
            present: 1,
        };
        assert_eq!(fams.unique(), vec![1, 3]);
    }

    #[test]
    fn failed_surface_queries_read_as_absent() {
        let mut d = FakeDevice::good("lost");
        d.broken_surface = true;
        let host = FakeHost::with(vec![d]);
        let probe = probe_device(&host, host.order[0]);
        assert!(probe.surface.formats.is_empty());
        assert!(probe.surface.present_modes.is_empty());
        assert!(!probe.surface.is_adequate());
        assert!(probe.queues.is_complete());
    }
}
