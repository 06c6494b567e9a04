// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use lumen_core::{Error, Result};
use tracing::debug;

use crate::dispatch::Dispatch;
use crate::queues::PresentQueues;

static QUEUE_PRIORITY: [f32; 1] = [1.0];

pub struct LogicalDevice {
    pub device: ash::Device,
    pub swapchain_fn: swapchain::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

/// One queue request per distinct family, ascending.
pub fn queue_requests(queues: &PresentQueues) -> Vec<vk::DeviceQueueCreateInfo<'static>> {
    queues
        .unique_families()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: QUEUE_PRIORITY.as_ptr(),
            ..Default::default()
        })
        .collect()
}

impl LogicalDevice {
    pub unsafe fn create(
        dispatch: &Dispatch,
        phys: vk::PhysicalDevice,
        queues: PresentQueues,
    ) -> Result<Self> {
        let qinfos = queue_requests(&queues);
        let device_exts = [swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: qinfos.len() as u32,
            p_queue_create_infos: qinfos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        let device = dispatch
            .instance
            .create_device(phys, &dinfo, None)
            .map_err(|e| Error::resource("logical device creation", e.as_raw()))?;
        let graphics_queue = device.get_device_queue(queues.graphics, 0);
        let present_queue = device.get_device_queue(queues.presentation, 0);
        let swapchain_fn = swapchain::Device::new(&dispatch.instance, &device);
        debug!(
            "vk: device ready, {} queue(s) over families {:?}",
            qinfos.len(),
            queues.unique_families()
        );

        Ok(Self { device, swapchain_fn, graphics_queue, present_queue })
    }
}
