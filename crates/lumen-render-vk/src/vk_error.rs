// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use lumen_core::{Error, Result};

/// `anyhow::Context`-style adapter from raw Vulkan status codes to the
/// engine's failure taxonomy.
pub(crate) trait VkContext<T> {
    fn or_fail(self, what: &'static str) -> Result<T>;
}

impl<T> VkContext<T> for VkResult<T> {
    fn or_fail(self, what: &'static str) -> Result<T> {
        self.map_err(|code| fail(what, code))
    }
}

pub(crate) fn fail(what: &'static str, code: vk::Result) -> Error {
    if code == vk::Result::ERROR_DEVICE_LOST {
        Error::DeviceLost { phase: what, code: Some(code.as_raw()) }
    } else {
        Error::resource(what, code.as_raw())
    }
}

/// Vulkan timeouts are u64 nanoseconds; `u64::MAX` would mean "forever",
/// so clamp just below it.
pub(crate) fn timeout_ns(timeout: std::time::Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX - 1).min(u64::MAX - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::FailureClass;
    use std::time::Duration;

    #[test]
    fn device_loss_is_a_runtime_failure() {
        let err = fail("vkQueueSubmit", vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(err.class(), FailureClass::Runtime);
        assert_eq!(err.exit_code(), vk::Result::ERROR_DEVICE_LOST.as_raw());
    }

    #[test]
    fn other_codes_are_resource_failures() {
        let r: VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = r.or_fail("vkCreateFramebuffer").unwrap_err();
        assert_eq!(err.class(), FailureClass::Resource);
        assert_eq!(err.to_string(), "vkCreateFramebuffer failed; error code: -2");
    }

    #[test]
    fn waits_are_never_unbounded() {
        assert_eq!(timeout_ns(Duration::from_millis(5)), 5_000_000);
        assert!(timeout_ns(Duration::MAX) < u64::MAX);
    }
}
