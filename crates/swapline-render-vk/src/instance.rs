// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr};

use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, trace, warn};

use crate::error::ConfigurationError;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Entry, instance, optional debug messenger and the window surface.
///
/// STRICT ORDER: instance, then surface from this instance, then devices are
/// probed against this surface. Teardown runs in reverse.
pub struct InstanceBundle {
    pub entry: Entry,
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    messenger: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan {types:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan {types:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan {types:?}] {msg}");
    } else {
        trace!("[vulkan {types:?}] {msg}");
    }
    vk::FALSE
}

fn messenger_info<'a>() -> vk::DebugUtilsMessengerCreateInfoEXT<'a> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

unsafe fn validation_layer_available(entry: &Entry) -> Result<bool, ConfigurationError> {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }
        .map_err(ConfigurationError::InstanceCreation)?;
    Ok(layers
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER)))
}

unsafe fn log_instance_extensions(entry: &Entry) {
    match unsafe { entry.enumerate_instance_extension_properties(None) } {
        Ok(exts) => {
            debug!("{} instance extensions available", exts.len());
            for e in &exts {
                if let Ok(name) = e.extension_name_as_c_str() {
                    debug!("  {}", name.to_string_lossy());
                }
            }
        }
        Err(e) => warn!("enumerate_instance_extension_properties: {e:?}"),
    }
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    validation: bool,
) -> Result<Instance, ConfigurationError> {
    let app = c"Swapline";
    let app_info = vk::ApplicationInfo {
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 0, 1, 0),
        p_engine_name: app.as_ptr(),
        engine_version: vk::make_api_version(0, 0, 1, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut ext_vec = ash_window::enumerate_required_extensions(display_raw)
        .map_err(ConfigurationError::InstanceCreation)?
        .to_vec();
    if validation {
        ext_vec.push(debug_utils::NAME.as_ptr());
    }
    let layers = [VALIDATION_LAYER.as_ptr()];

    let mut debug_info = messenger_info();
    let mut create_info = vk::InstanceCreateInfo {
        p_application_info: &app_info,
        ..Default::default()
    }
    .enabled_extension_names(&ext_vec);
    if validation {
        // Chained so instance creation and destruction are covered too.
        create_info = create_info
            .enabled_layer_names(&layers)
            .push_next(&mut debug_info);
    }

    unsafe { entry.create_instance(&create_info, None) }.map_err(ConfigurationError::InstanceCreation)
}

impl InstanceBundle {
    /// # Safety
    /// The window behind `window_raw` must outlive the returned bundle.
    pub unsafe fn new(
        display_raw: RawDisplayHandle,
        window_raw: RawWindowHandle,
        validation: bool,
    ) -> Result<Self, ConfigurationError> {
        let entry = unsafe { Entry::load() }?;
        unsafe { log_instance_extensions(&entry) };

        if validation && !unsafe { validation_layer_available(&entry) }? {
            return Err(ConfigurationError::MissingValidationLayer(
                VALIDATION_LAYER.to_string_lossy().into_owned(),
            ));
        }

        let instance = unsafe { create_instance(&entry, display_raw, validation) }?;

        let messenger = if validation {
            let loader = debug_utils::Instance::new(&entry, &instance);
            match unsafe { loader.create_debug_utils_messenger(&messenger_info(), None) } {
                Ok(m) => Some((loader, m)),
                Err(e) => {
                    warn!("debug messenger unavailable: {e:?}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match unsafe {
            ash_window::create_surface(&entry, &instance, display_raw, window_raw, None)
        } {
            Ok(s) => s,
            Err(result) => {
                unsafe {
                    if let Some((loader, m)) = &messenger {
                        loader.destroy_debug_utils_messenger(*m, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(ConfigurationError::SurfaceCreation {
                    stage: "create_surface",
                    result,
                });
            }
        };

        let validation_on = messenger.is_some();
        info!(
            "vulkan instance ready (validation {})",
            if validation_on { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            instance,
            surface_loader,
            surface,
            messenger,
        })
    }

    /// Physical devices in host enumeration order.
    pub fn physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>, ConfigurationError> {
        unsafe { self.instance.enumerate_physical_devices() }
            .map_err(ConfigurationError::DeviceEnumeration)
    }

    /// # Safety
    /// Every device created from this instance must already be destroyed.
    pub unsafe fn destroy(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, m)) = self.messenger.take() {
                loader.destroy_debug_utils_messenger(m, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
