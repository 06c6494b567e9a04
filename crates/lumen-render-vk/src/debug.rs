// SPDX-License-Identifier: CEPL-1.0
//! Validation-layer messages routed into `tracing`.

use std::ffi::{c_void, CStr};

use ash::ext::debug_utils as ext_debug;
use ash::{vk, Entry, Instance};
use lumen_core::Result;
use tracing::{debug, error, info, warn, Level};

use crate::vk_error::VkContext;

/// The loader reports its own housekeeping as GENERAL messages with this id.
const LOADER_MESSAGE_ID: &CStr = c"Loader Message";

pub struct DebugMessenger {
    loader: ext_debug::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self> {
        let loader = ext_debug::Instance::new(entry, instance);
        let ci = messenger_create_info();
        let messenger = loader
            .create_debug_utils_messenger(&ci, None)
            .or_fail("vkCreateDebugUtilsMessengerEXT")?;
        Ok(Self { loader, messenger })
    }

    pub unsafe fn destroy(&mut self) {
        self.loader.destroy_debug_utils_messenger(self.messenger, None);
        self.messenger = vk::DebugUtilsMessengerEXT::null();
    }
}

/// Also chained into instance creation so create/destroy of the instance
/// itself gets reported.
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
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

/// Log level for one message, or `None` when it is dropped.
fn classify(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    message_id: Option<&CStr>,
) -> Option<Level> {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        if types == vk::DebugUtilsMessageTypeFlagsEXT::GENERAL && message_id == Some(LOADER_MESSAGE_ID)
        {
            // loader complaints about unrelated ICDs are not fatal
            return Some(Level::WARN);
        }
        Some(Level::ERROR)
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Some(Level::WARN)
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        Some(Level::INFO)
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE) {
        Some(Level::DEBUG)
    } else {
        None
    }
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
    let data = unsafe { &*data };
    let id = (!data.p_message_id_name.is_null())
        .then(|| unsafe { CStr::from_ptr(data.p_message_id_name) });
    let msg = if data.p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        unsafe { CStr::from_ptr(data.p_message) }.to_string_lossy()
    };

    let Some(level) = classify(severity, types, id) else {
        return vk::FALSE;
    };
    if level == Level::ERROR {
        error!(target: "vulkan", "{msg}");
    } else if level == Level::WARN {
        warn!(target: "vulkan", "{msg}");
    } else if level == Level::INFO {
        info!(target: "vulkan", "{msg}");
    } else {
        debug!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    type Sev = vk::DebugUtilsMessageSeverityFlagsEXT;
    type Ty = vk::DebugUtilsMessageTypeFlagsEXT;

    #[test]
    fn severities_map_to_levels() {
        assert_eq!(classify(Sev::ERROR, Ty::VALIDATION, None), Some(Level::ERROR));
        assert_eq!(classify(Sev::WARNING, Ty::PERFORMANCE, None), Some(Level::WARN));
        assert_eq!(classify(Sev::INFO, Ty::GENERAL, None), Some(Level::INFO));
        assert_eq!(classify(Sev::VERBOSE, Ty::GENERAL, None), Some(Level::DEBUG));
        assert_eq!(classify(Sev::empty(), Ty::GENERAL, None), None);
    }

    #[test]
    fn loader_errors_are_downgraded() {
        assert_eq!(
            classify(Sev::ERROR, Ty::GENERAL, Some(LOADER_MESSAGE_ID)),
            Some(Level::WARN)
        );
        // the same id on a validation message is still an error
        assert_eq!(
            classify(Sev::ERROR, Ty::VALIDATION, Some(LOADER_MESSAGE_ID)),
            Some(Level::ERROR)
        );
    }
}
