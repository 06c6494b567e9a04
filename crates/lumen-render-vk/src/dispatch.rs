// SPDX-License-Identifier: CEPL-1.0
//! Loader entry, instance and the instance-level function tables, built once
//! and handed by reference to everything that needs them.

use std::ffi::{c_char, CStr, CString};

use ash::ext::debug_utils as ext_debug;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use lumen_core::{Error, Result};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, info};

use crate::debug::{messenger_create_info, DebugMessenger};
use crate::vk_error::VkContext;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"lumen";

pub struct InstanceRequest<'a> {
    pub app_name: &'a str,
    pub validation: bool,
}

pub struct Dispatch {
    pub entry: Entry,
    pub instance: Instance,
    pub surface_fn: surface::Instance,
    debug: Option<DebugMessenger>,
}

impl Dispatch {
    pub unsafe fn new(display: RawDisplayHandle, request: &InstanceRequest<'_>) -> Result<Self> {
        let entry = Entry::load()
            .map_err(|e| Error::environment(format!("Vulkan loader unavailable: {e}")))?;

        let app_name = CString::new(request.app_name)
            .map_err(|_| Error::capability("application name contains a NUL byte"))?;
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app_name.as_ptr(),
            application_version: vk::make_api_version(0, 1, 0, 0),
            p_engine_name: ENGINE_NAME.as_ptr(),
            engine_version: vk::make_api_version(0, 1, 0, 0),
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
            .map_err(|e| {
                Error::environment("windowing layer cannot present with Vulkan")
                    .with_code(e.as_raw())
            })?
            .to_vec();
        let mut layers: Vec<*const c_char> = Vec::new();
        if request.validation {
            extensions.push(ext_debug::NAME.as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let requested_exts: Vec<&CStr> =
            extensions.iter().map(|&p| unsafe { CStr::from_ptr(p) }).collect();
        let available = entry
            .enumerate_instance_extension_properties(None)
            .or_fail("vkEnumerateInstanceExtensionProperties")?;
        let available: Vec<&CStr> = available
            .iter()
            .map(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) })
            .collect();
        if let Some(name) = missing_names(&requested_exts, &available).first() {
            return Err(not_found("Extension", name));
        }

        let requested_layers: Vec<&CStr> =
            layers.iter().map(|&p| unsafe { CStr::from_ptr(p) }).collect();
        let available = entry
            .enumerate_instance_layer_properties()
            .or_fail("vkEnumerateInstanceLayerProperties")?;
        let available: Vec<&CStr> = available
            .iter()
            .map(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) })
            .collect();
        if let Some(name) = missing_names(&requested_layers, &available).first() {
            return Err(not_found("Layer", name));
        }

        for name in &requested_exts {
            debug!("instance extension {}", name.to_string_lossy());
        }

        let mut debug_ci = messenger_create_info();
        let mut create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            ..Default::default()
        };
        if request.validation {
            create_info = create_info.push_next(&mut debug_ci);
        }

        let instance = entry
            .create_instance(&create_info, None)
            .map_err(|e| Error::environment("Vulkan init error").with_code(e.as_raw()))?;

        let debug = if request.validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(m) => Some(m),
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(e);
                }
            }
        } else {
            None
        };
        info!(validation = request.validation, "vk: instance ready");

        let surface_fn = surface::Instance::new(&entry, &instance);
        Ok(Self { entry, instance, surface_fn, debug })
    }

    /// Messenger first, instance last. Everything created from the instance
    /// must already be gone.
    pub unsafe fn destroy(&mut self) {
        if let Some(mut messenger) = self.debug.take() {
            messenger.destroy();
        }
        self.instance.destroy_instance(None);
    }
}

/// Requested names absent from `available`, in request order.
pub fn missing_names<'a>(requested: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    requested
        .iter()
        .copied()
        .filter(|want| !available.contains(want))
        .collect()
}

fn not_found(kind: &str, name: &CStr) -> Error {
    Error::capability(format!("{kind} \"{}\" not found", name.to_string_lossy()))
        .with_code(vk::Result::ERROR_INITIALIZATION_FAILED.as_raw())
}
