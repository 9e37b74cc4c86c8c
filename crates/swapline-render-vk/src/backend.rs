// SPDX-License-Identifier: CEPL-1.0
//! Ash-backed implementations of the probing and pacing seams.

use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Instance};

use crate::pacer::{FrameBackend, FrameSubmission};
use crate::probe::DeviceQuery;

/// Answers device queries against one instance and surface.
pub struct AshDeviceQuery<'a> {
    pub instance: &'a Instance,
    pub surface_loader: &'a surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl DeviceQuery for AshDeviceQuery<'_> {
    fn device_name(&self, device: vk::PhysicalDevice) -> String {
        let props = unsafe { self.instance.get_physical_device_properties(device) };
        props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| format!("{device:?}"))
    }

    fn device_type(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceType {
        unsafe { self.instance.get_physical_device_properties(device) }.device_type
    }

    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .get_physical_device_queue_family_properties(device)
        }
    }

    fn present_support(&self, device: vk::PhysicalDevice, family: u32) -> VkResult<bool> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(device, family, self.surface)
        }
    }

    fn extensions(&self, device: vk::PhysicalDevice) -> VkResult<Vec<String>> {
        let props = unsafe { self.instance.enumerate_device_extension_properties(device) }?;
        Ok(props
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok())
            .map(|n| n.to_string_lossy().into_owned())
            .collect())
    }

    fn features(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        unsafe { self.instance.get_physical_device_features(device) }
    }

    fn surface_capabilities(
        &self,
        device: vk::PhysicalDevice,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(device, self.surface)
        }
    }

    fn surface_formats(&self, device: vk::PhysicalDevice) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(device, self.surface)
        }
    }

    fn present_modes(&self, device: vk::PhysicalDevice) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(device, self.surface)
        }
    }
}

/// Drives one swapchain on a graphics queue and a present queue.
pub struct VkFrameBackend<'a> {
    pub device: &'a ash::Device,
    pub swapchain_loader: &'a swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

impl FrameBackend for VkFrameBackend<'_> {
    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn acquire_next_image(&self, signal: vk::Semaphore, timeout_ns: u64) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, timeout_ns, signal, vk::Fence::null())
        }
    }

    fn submit(&self, s: &FrameSubmission) -> VkResult<()> {
        let waits = [s.wait_semaphore];
        let stages = [s.wait_stage];
        let cmds = [s.command_buffer];
        let signals = [s.signal_semaphore];
        let cmds: &[vk::CommandBuffer] = if s.command_buffer == vk::CommandBuffer::null() {
            &[]
        } else {
            &cmds
        };
        let signals: &[vk::Semaphore] = if s.signal_semaphore == vk::Semaphore::null() {
            &[]
        } else {
            &signals
        };
        let info = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages)
            .command_buffers(cmds)
            .signal_semaphores(signals);
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, std::slice::from_ref(&info), s.fence)
        }
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> VkResult<bool> {
        let waits = [wait];
        let swapchains = [self.swapchain];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        unsafe { self.swapchain_loader.queue_present(self.present_queue, &info) }
    }
}
