// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CString;

use ash::khr::swapchain;
use ash::{vk, Instance};
use tracing::info;

use crate::error::ConfigurationError;
use crate::probe::QueueFamilies;
use crate::select::{DeviceRequirements, SelectedDevice};

/// Logical device plus the queues the pacer submits and presents on.
pub struct DeviceBundle {
    pub device: ash::Device,
    pub swapchain_loader: swapchain::Device,
    pub queues: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

/// One create-info per distinct family, one queue each.
pub fn queue_create_infos<'a>(
    queues: &QueueFamilies,
    priorities: &'a [f32],
) -> Vec<vk::DeviceQueueCreateInfo<'a>> {
    queues
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo {
                queue_family_index: family,
                ..Default::default()
            }
            .queue_priorities(priorities)
        })
        .collect()
}

impl DeviceBundle {
    /// # Safety
    /// `selected` must have been probed from `instance`.
    pub unsafe fn new(
        instance: &Instance,
        selected: &SelectedDevice,
        req: &DeviceRequirements,
    ) -> Result<Self, ConfigurationError> {
        let queues = selected.queues;
        let priorities = [1.0_f32];
        let qinfos = queue_create_infos(&queues, &priorities);

        let ext_names: Vec<CString> = req
            .extensions
            .iter()
            .filter_map(|e| CString::new(e.as_str()).ok())
            .collect();
        let ext_ptrs: Vec<*const std::ffi::c_char> = ext_names.iter().map(|e| e.as_ptr()).collect();
        let features = req.enabled_features();

        let dinfo = vk::DeviceCreateInfo::default()
            .queue_create_infos(&qinfos)
            .enabled_extension_names(&ext_ptrs)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(selected.handle(), &dinfo, None) }
            .map_err(ConfigurationError::DeviceCreation)?;

        let graphics_queue = unsafe { device.get_device_queue(queues.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queues.present, 0) };
        let swapchain_loader = swapchain::Device::new(instance, &device);

        info!(
            "logical device on {:?}: {} queue famil{}, extensions {:?}",
            selected.probe.name,
            qinfos.len(),
            if qinfos.len() == 1 { "y" } else { "ies" },
            req.extensions
        );

        Ok(Self {
            device,
            swapchain_loader,
            queues,
            graphics_queue,
            present_queue,
        })
    }

    pub fn wait_idle(&self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            tracing::warn!("device_wait_idle: {e:?}");
        }
    }

    /// # Safety
    /// Every child object of the device must already be destroyed.
    pub unsafe fn destroy(&mut self) {
        unsafe { self.device.destroy_device(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_family_gets_one_queue_info() {
        let prio = [1.0];
        let infos = queue_create_infos(
            &QueueFamilies {
                graphics: 1,
                present: 1,
            },
            &prio,
        );
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].queue_family_index, 1);
        assert_eq!(infos[0].queue_count, 1);
    }

    #[test]
    fn split_families_get_one_each() {
        let prio = [1.0];
        let infos = queue_create_infos(
            &QueueFamilies {
                graphics: 2,
                present: 0,
            },
            &prio,
        );
        let fams: Vec<u32> = infos.iter().map(|i| i.queue_family_index).collect();
        assert_eq!(fams, vec![0, 2]);
    }
}
