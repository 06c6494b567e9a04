// SPDX-License-Identifier: CEPL-1.0
//! Read-only snapshots of what each physical device and the surface offer.
//! Selection, queue resolution and swapchain negotiation all work on these
//! plain values, so none of them needs a live driver.

use std::ffi::{CStr, CString};

use ash::khr::swapchain;
use ash::vk;
use lumen_core::{Error, Result};
use tracing::{debug, warn};

use crate::dispatch::Dispatch;
use crate::vk_error::VkContext;

#[derive(Clone, Debug)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn is_presentable(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilySnapshot {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub presents: bool,
}

#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    /// Size in bytes of every memory heap.
    pub heap_sizes: Vec<u64>,
    pub extensions: Vec<CString>,
    /// Only queried when the device has the swapchain extension.
    pub surface: Option<SurfaceSupport>,
    pub queue_families: Vec<QueueFamilySnapshot>,
}

impl DeviceCandidate {
    pub fn supports_extension(&self, name: &CStr) -> bool {
        self.extensions.iter().any(|e| e.as_c_str() == name)
    }

    pub fn total_heap_mib(&self) -> u64 {
        self.heap_sizes.iter().map(|b| b / (1024 * 1024)).sum()
    }

    pub fn type_name(&self) -> &'static str {
        device_type_name(self.device_type)
    }
}

pub fn device_type_name(t: vk::PhysicalDeviceType) -> &'static str {
    match t {
        vk::PhysicalDeviceType::DISCRETE_GPU => "discrete",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual",
        vk::PhysicalDeviceType::CPU => "cpu",
        _ => "other",
    }
}

/// Source of device and surface snapshots.
pub trait CapabilityProbe {
    fn devices(&self) -> Result<Vec<DeviceCandidate>>;
    fn surface_support(&self, device: vk::PhysicalDevice) -> Result<SurfaceSupport>;
}

pub struct VkProbe<'a> {
    dispatch: &'a Dispatch,
    surface: vk::SurfaceKHR,
}

impl<'a> VkProbe<'a> {
    pub fn new(dispatch: &'a Dispatch, surface: vk::SurfaceKHR) -> Self {
        Self { dispatch, surface }
    }

    unsafe fn snapshot(&self, handle: vk::PhysicalDevice) -> Result<DeviceCandidate> {
        let instance = &self.dispatch.instance;
        let props = instance.get_physical_device_properties(handle);
        let name = CStr::from_ptr(props.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let mem = instance.get_physical_device_memory_properties(handle);
        let heap_sizes = mem.memory_heaps[..mem.memory_heap_count as usize]
            .iter()
            .map(|h| h.size)
            .collect();

        let extensions = instance
            .enumerate_device_extension_properties(handle)
            .or_fail("vkEnumerateDeviceExtensionProperties")?
            .iter()
            .map(|e| CStr::from_ptr(e.extension_name.as_ptr()).to_owned())
            .collect();

        let queue_families = instance
            .get_physical_device_queue_family_properties(handle)
            .iter()
            .enumerate()
            .map(|(i, q)| QueueFamilySnapshot {
                flags: q.queue_flags,
                queue_count: q.queue_count,
                presents: self
                    .dispatch
                    .surface_fn
                    .get_physical_device_surface_support(handle, i as u32, self.surface)
                    .unwrap_or_else(|e| {
                        warn!("{name}: present support query for family {i} failed: {e}");
                        false
                    }),
            })
            .collect();

        let mut candidate = DeviceCandidate {
            handle,
            name,
            device_type: props.device_type,
            heap_sizes,
            extensions,
            surface: None,
            queue_families,
        };
        if candidate.supports_extension(swapchain::NAME) {
            candidate.surface = surface_or_none(&candidate.name, self.surface_support(handle));
        }
        Ok(candidate)
    }
}

/// A failed surface query disqualifies one device, not the whole enumeration.
fn surface_or_none(device: &str, support: Result<SurfaceSupport>) -> Option<SurfaceSupport> {
    support
        .inspect_err(|e| warn!("{device}: surface query failed, skipping: {e}"))
        .ok()
}

impl CapabilityProbe for VkProbe<'_> {
    fn devices(&self) -> Result<Vec<DeviceCandidate>> {
        unsafe {
            let handles = self
                .dispatch
                .instance
                .enumerate_physical_devices()
                .map_err(|e| Error::environment("No Vulkan GPU devices found").with_code(e.as_raw()))?;
            if handles.is_empty() {
                return Err(Error::environment("No Vulkan GPU devices found"));
            }
            let mut out = Vec::with_capacity(handles.len());
            for handle in handles {
                let c = self.snapshot(handle)?;
                debug!(
                    "vk: found {} ({}), {} MiB, {} queue families",
                    c.name,
                    c.type_name(),
                    c.total_heap_mib(),
                    c.queue_families.len()
                );
                out.push(c);
            }
            Ok(out)
        }
    }

    fn surface_support(&self, device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        let s = &self.dispatch.surface_fn;
        unsafe {
            Ok(SurfaceSupport {
                capabilities: s
                    .get_physical_device_surface_capabilities(device, self.surface)
                    .or_fail("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                formats: s
                    .get_physical_device_surface_formats(device, self.surface)
                    .or_fail("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                present_modes: s
                    .get_physical_device_surface_present_modes(device, self.surface)
                    .or_fail("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Hand-built snapshots shared by the selection and negotiation tests.
    use super::*;
    use ash::vk::Handle;

    pub const MIB: u64 = 1024 * 1024;

    pub fn surface(
        formats: &[(vk::Format, vk::ColorSpaceKHR)],
        modes: &[vk::PresentModeKHR],
    ) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D { width: 800, height: 600 },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            },
            formats: formats
                .iter()
                .map(|&(format, color_space)| vk::SurfaceFormatKHR { format, color_space })
                .collect(),
            present_modes: modes.to_vec(),
        }
    }

    pub fn presentable_surface() -> SurfaceSupport {
        surface(
            &[(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            &[vk::PresentModeKHR::FIFO],
        )
    }

    pub fn family(flags: vk::QueueFlags, queue_count: u32, presents: bool) -> QueueFamilySnapshot {
        QueueFamilySnapshot { flags, queue_count, presents }
    }

    pub fn candidate(
        raw: u64,
        device_type: vk::PhysicalDeviceType,
        heap_mib: &[u64],
        swapchain_ext: bool,
    ) -> DeviceCandidate {
        let mut extensions = Vec::new();
        if swapchain_ext {
            extensions.push(swapchain::NAME.to_owned());
        }
        DeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu{raw}"),
            device_type,
            heap_sizes: heap_mib.iter().map(|m| m * MIB).collect(),
            extensions,
            surface: swapchain_ext.then(presentable_surface),
            queue_families: vec![family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                16,
                true,
            )],
        }
    }
}
