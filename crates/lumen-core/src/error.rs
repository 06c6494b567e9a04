// SPDX-License-Identifier: CEPL-1.0
//! Failure taxonomy shared by every lumen crate.
//!
//! Startup failures fall into four classes (environment, capability, resource,
//! asset). Steady-state failures that end the frame loop are `Runtime`. A stale
//! image chain is not an error at all; the frame scheduler reports it as a
//! status so the caller can rebuild and carry on.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// Windowing or graphics API missing, no GPU enumerated.
    Environment,
    /// Something required is absent: extension, layer, device, queue family.
    Capability,
    /// A creation or submission call returned a failure status.
    Resource,
    /// Shader binary missing or malformed.
    Asset,
    /// The frame loop cannot continue (timeout, device loss).
    Runtime,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{}{}", .reason, code_suffix(.code))]
    Environment { reason: String, code: Option<i32> },

    #[error("{}{}", .reason, code_suffix(.code))]
    Capability { reason: String, code: Option<i32> },

    #[error("{} failed{}", .what, code_suffix(.code))]
    Resource { what: String, code: Option<i32> },

    #[error("shader asset \"{}\": {}", .path.display(), .reason)]
    Asset { path: PathBuf, reason: String },

    #[error("{} did not complete within {:?}", .phase, .after)]
    TimedOut { phase: &'static str, after: Duration },

    #[error("device lost during {}{}", .phase, code_suffix(.code))]
    DeviceLost { phase: &'static str, code: Option<i32> },
}

fn code_suffix(code: &Option<i32>) -> String {
    match code {
        Some(c) if *c != 0 => format!("; error code: {c}"),
        _ => String::new(),
    }
}

impl Error {
    pub fn environment(reason: impl Into<String>) -> Self {
        Error::Environment { reason: reason.into(), code: None }
    }

    pub fn capability(reason: impl Into<String>) -> Self {
        Error::Capability { reason: reason.into(), code: None }
    }

    pub fn resource(what: impl Into<String>, code: i32) -> Self {
        Error::Resource { what: what.into(), code: Some(code) }
    }

    pub fn asset(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Asset { path: path.into(), reason: reason.into() }
    }

    /// Attach an API status code to an environment or capability failure.
    pub fn with_code(mut self, new_code: i32) -> Self {
        match &mut self {
            Error::Environment { code, .. }
            | Error::Capability { code, .. }
            | Error::Resource { code, .. }
            | Error::DeviceLost { code, .. } => *code = Some(new_code),
            Error::Asset { .. } | Error::TimedOut { .. } => {}
        }
        self
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Error::Environment { .. } => FailureClass::Environment,
            Error::Capability { .. } => FailureClass::Capability,
            Error::Resource { .. } => FailureClass::Resource,
            Error::Asset { .. } => FailureClass::Asset,
            Error::TimedOut { .. } | Error::DeviceLost { .. } => FailureClass::Runtime,
        }
    }

    /// Process exit status for this failure: the API code when one was
    /// reported, otherwise 0.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Environment { code, .. }
            | Error::Capability { code, .. }
            | Error::Resource { code, .. }
            | Error::DeviceLost { code, .. } => code.unwrap_or(0),
            Error::Asset { .. } | Error::TimedOut { .. } => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_suffix_only_for_nonzero_codes() {
        let e = Error::environment("glfw cant initialize");
        assert_eq!(e.to_string(), "glfw cant initialize");
        assert_eq!(e.exit_code(), 0);

        let e = Error::capability("Extension \"VK_EXT_debug_utils\" not found").with_code(-3);
        assert_eq!(
            e.to_string(),
            "Extension \"VK_EXT_debug_utils\" not found; error code: -3"
        );
        assert_eq!(e.exit_code(), -3);

        let e = Error::resource("vkCreateSwapchainKHR", 0);
        assert_eq!(e.to_string(), "vkCreateSwapchainKHR failed");
    }

    #[test]
    fn classes_follow_variants() {
        assert_eq!(Error::environment("x").class(), FailureClass::Environment);
        assert_eq!(Error::capability("x").class(), FailureClass::Capability);
        assert_eq!(Error::resource("x", -1).class(), FailureClass::Resource);
        assert_eq!(Error::asset("vert.spv", "empty").class(), FailureClass::Asset);
        let t = Error::TimedOut { phase: "fence wait", after: Duration::from_millis(5) };
        assert_eq!(t.class(), FailureClass::Runtime);
        assert_eq!(t.exit_code(), 0);
        let lost = Error::DeviceLost { phase: "submit", code: Some(-4) };
        assert_eq!(lost.class(), FailureClass::Runtime);
        assert_eq!(lost.exit_code(), -4);
    }

    #[test]
    fn asset_message_names_the_file() {
        let e = Error::asset("shaders/frag.spv", "file is empty");
        assert_eq!(e.to_string(), "shader asset \"shaders/frag.spv\": file is empty");
    }

    #[test]
    fn engine_error_survives_anyhow_context() {
        let err = anyhow::Error::new(Error::resource("vkCreateDevice", -3)).context("startup");
        let found = crate::find_engine_error(&err).map(Error::exit_code);
        assert_eq!(found, Some(-3));
    }
}
