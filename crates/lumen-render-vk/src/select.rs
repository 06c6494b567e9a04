// SPDX-License-Identifier: CEPL-1.0
//! Physical-device scoring and the retry policy around it.

use ash::khr::swapchain;
use ash::vk;
use lumen_core::{Error, Result};
use tracing::{debug, warn};

use crate::probe::DeviceCandidate;
use crate::queues::{resolve_queue_families, PresentQueues, QueueFamilyAssignment};

/// `(1 + heap MiB) * type weight`, or 0 when the device cannot be used.
pub fn score(candidate: &DeviceCandidate, disallowed: &[vk::PhysicalDevice]) -> u64 {
    if disallowed.contains(&candidate.handle) {
        return 0;
    }
    if !candidate.supports_extension(swapchain::NAME) {
        return 0;
    }
    match &candidate.surface {
        Some(s) if s.is_presentable() => {}
        _ => return 0,
    }

    let weight = match candidate.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        _ => 1,
    };
    (1 + candidate.total_heap_mib()) * weight
}

/// Highest-scoring device. Ties keep the first in enumeration order; a best
/// score of 0 means nothing is usable.
pub fn select_device<'a>(
    candidates: &'a [DeviceCandidate],
    disallowed: &[vk::PhysicalDevice],
) -> Option<(&'a DeviceCandidate, u64)> {
    let mut best: Option<(&DeviceCandidate, u64)> = None;
    for c in candidates {
        let s = score(c, disallowed);
        debug!("vk: {} ({}) scores {s}", c.name, c.type_name());
        if s > best.map_or(0, |(_, b)| b) {
            best = Some((c, s));
        }
    }
    best
}

pub struct ChosenDevice<'a> {
    pub candidate: &'a DeviceCandidate,
    pub score: u64,
    pub assignment: QueueFamilyAssignment,
    pub queues: PresentQueues,
}

/// Select, resolve queues, and on a device that cannot both draw and
/// present, disallow it and select again.
pub fn choose_device<'a>(
    candidates: &'a [DeviceCandidate],
    mut disallowed: Vec<vk::PhysicalDevice>,
) -> Result<ChosenDevice<'a>> {
    loop {
        let Some((candidate, score)) = select_device(candidates, &disallowed) else {
            return Err(Error::capability("No suitable GPU device found"));
        };
        let assignment = resolve_queue_families(&candidate.queue_families);
        match assignment.require_presentable() {
            Ok(queues) => {
                return Ok(ChosenDevice { candidate, score, assignment, queues });
            }
            Err(e) => {
                warn!("vk: skipping {}: {e}", candidate.name);
                disallowed.push(candidate.handle);
            }
        }
    }
}

/// Map configured device names onto the enumerated handles.
pub fn disallowed_by_name(candidates: &[DeviceCandidate], names: &[String]) -> Vec<vk::PhysicalDevice> {
    candidates
        .iter()
        .filter(|c| names.iter().any(|n| n == &c.name))
        .map(|c| c.handle)
        .collect()
}
