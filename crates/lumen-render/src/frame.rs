// SPDX-License-Identifier: CEPL-1.0
//! Steady-state frame loop with a single frame in flight.
//!
//! Every iteration runs the same five phases in order:
//!
//! 1. wait for the previous frame's fence (bounded)
//! 2. acquire the next presentable image, signalling "image available"
//! 3. reset and re-record the one command buffer for that image
//! 4. submit: wait "image available", signal "render finished" for THAT image
//!    plus the in-flight fence
//! 5. present: wait the same per-image "render finished" semaphore
//!
//! The presentation engine may hand images back out of order, so the
//! render-finished semaphore is chosen by image index, never by frame count.

use std::time::Duration;

use lumen_core::{Error, Result};
use tracing::{debug, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    WaitPreviousFrame,
    AcquireImage,
    RecordCommands,
    Submit,
    Present,
}

impl FramePhase {
    pub fn label(self) -> &'static str {
        match self {
            FramePhase::WaitPreviousFrame => "wait for previous frame",
            FramePhase::AcquireImage => "image acquire",
            FramePhase::RecordCommands => "command recording",
            FramePhase::Submit => "queue submit",
            FramePhase::Present => "queue present",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceWait {
    Signaled,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Queued { suboptimal: bool },
    OutOfDate,
}

/// What a submit has to wire up: the command buffer recorded for
/// `image_index` signals render-finished semaphore `signal_slot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitPlan {
    pub image_index: u32,
    pub signal_slot: usize,
}

/// GPU-side primitives the scheduler drives. The Vulkan backend implements
/// this over real fences and semaphores; tests implement it over counters.
pub trait FrameDevice {
    /// Number of presentable images, and so of render-finished semaphores.
    fn image_count(&self) -> usize;
    fn wait_in_flight(&mut self, timeout: Duration) -> Result<FenceWait>;
    fn reset_in_flight(&mut self) -> Result<()>;
    fn acquire_image(&mut self, timeout: Duration) -> Result<Acquired>;
    fn record(&mut self, image_index: u32) -> Result<()>;
    fn submit(&mut self, plan: SubmitPlan) -> Result<()>;
    fn present(&mut self, image_index: u32, wait_slot: usize) -> Result<Presented>;
    fn wait_idle(&mut self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { image_index: u32, suboptimal: bool },
    /// The image chain no longer matches the surface; rebuild it and retry.
    OutOfDate,
}

pub struct FrameScheduler<D> {
    device: D,
    timeout: Duration,
    frames: u64,
}

impl<D: FrameDevice> FrameScheduler<D> {
    pub fn new(device: D, timeout: Duration) -> Self {
        Self { device, timeout, frames: 0 }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    pub fn run_frame(&mut self) -> Result<FrameStatus> {
        let timeout = self.timeout;

        if self.device.wait_in_flight(timeout)? == FenceWait::TimedOut {
            return Err(timed_out(FramePhase::WaitPreviousFrame, timeout));
        }

        // The fence stays signaled until an image is actually acquired, so an
        // out-of-date chain never leaves the next wait without a signal.
        let (image_index, acquire_suboptimal) = match self.device.acquire_image(timeout)? {
            Acquired::Image { index, suboptimal } => (index, suboptimal),
            Acquired::OutOfDate => {
                debug!("acquire: image chain out of date");
                return Ok(FrameStatus::OutOfDate);
            }
            Acquired::TimedOut => return Err(timed_out(FramePhase::AcquireImage, timeout)),
        };

        let slot = image_index as usize;
        let count = self.device.image_count();
        if slot >= count {
            return Err(Error::Resource {
                what: format!(
                    "{}: image index {image_index} outside a chain of {count}",
                    FramePhase::AcquireImage.label()
                ),
                code: None,
            });
        }

        self.device.reset_in_flight()?;
        self.device
            .record(image_index)
            .inspect_err(|e| failed(FramePhase::RecordCommands, image_index, e))?;
        self.device
            .submit(SubmitPlan { image_index, signal_slot: slot })
            .inspect_err(|e| failed(FramePhase::Submit, image_index, e))?;

        let presented = self
            .device
            .present(image_index, slot)
            .inspect_err(|e| failed(FramePhase::Present, image_index, e))?;
        match presented {
            Presented::Queued { suboptimal } => {
                self.frames += 1;
                trace!(frame = self.frames, image_index, "presented");
                Ok(FrameStatus::Presented {
                    image_index,
                    suboptimal: suboptimal || acquire_suboptimal,
                })
            }
            Presented::OutOfDate => {
                debug!("present: image chain out of date");
                Ok(FrameStatus::OutOfDate)
            }
        }
    }

    pub fn shutdown(&mut self) -> Result<()> {
        debug!(frames = self.frames, "frame loop: waiting for device idle");
        self.device.wait_idle()
    }
}

fn failed(phase: FramePhase, image_index: u32, e: &Error) {
    warn!(phase = phase.label(), image_index, "frame failed: {e}");
}

fn timed_out(phase: FramePhase, after: Duration) -> Error {
    Error::TimedOut { phase: phase.label(), after }
}
