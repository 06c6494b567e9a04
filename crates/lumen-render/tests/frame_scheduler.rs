// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use lumen_core::{Error, FailureClass, Result};
use lumen_render::{
    Acquired, FenceWait, FrameDevice, FrameScheduler, FrameStatus, Presented, SubmitPlan,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Acquired(u32),
    Recorded(u32),
    Submitted(SubmitPlan),
    Presented { image_index: u32, wait_slot: usize },
}

/// Models one fence, one image-available semaphore and per-image
/// render-finished semaphores, panicking on any protocol violation a real
/// driver would flag.
struct FakeGpu {
    images: usize,
    acquire_order: Vec<u32>,
    cursor: usize,
    fence_signaled: bool,
    fence_pending: bool,
    hung: bool,
    image_available: bool,
    render_finished: Vec<bool>,
    acquire_out_of_date_at: Option<usize>,
    present_out_of_date_at: Option<usize>,
    acquire_suboptimal: bool,
    lost_on_submit: bool,
    acquires: usize,
    presents: usize,
    idle_waits: usize,
    log: Vec<Event>,
}

impl FakeGpu {
    fn new(images: usize, acquire_order: Vec<u32>) -> Self {
        Self {
            images,
            acquire_order,
            cursor: 0,
            fence_signaled: true,
            fence_pending: false,
            hung: false,
            image_available: false,
            render_finished: vec![false; images],
            acquire_out_of_date_at: None,
            present_out_of_date_at: None,
            acquire_suboptimal: false,
            lost_on_submit: false,
            acquires: 0,
            presents: 0,
            idle_waits: 0,
            log: Vec::new(),
        }
    }

    fn retire(&mut self) {
        if self.fence_pending && !self.hung {
            self.fence_pending = false;
            self.fence_signaled = true;
        }
    }
}

impl FrameDevice for FakeGpu {
    fn image_count(&self) -> usize {
        self.images
    }

    fn wait_in_flight(&mut self, _timeout: Duration) -> Result<FenceWait> {
        self.retire();
        Ok(if self.fence_signaled { FenceWait::Signaled } else { FenceWait::TimedOut })
    }

    fn reset_in_flight(&mut self) -> Result<()> {
        assert!(self.fence_signaled, "reset of an unsignaled fence");
        self.fence_signaled = false;
        Ok(())
    }

    fn acquire_image(&mut self, _timeout: Duration) -> Result<Acquired> {
        let n = self.acquires;
        self.acquires += 1;
        if self.acquire_out_of_date_at == Some(n) {
            return Ok(Acquired::OutOfDate);
        }
        assert!(!self.image_available, "image-available semaphore signaled twice");
        self.image_available = true;
        let index = self.acquire_order[self.cursor % self.acquire_order.len()];
        self.cursor += 1;
        self.log.push(Event::Acquired(index));
        Ok(Acquired::Image { index, suboptimal: self.acquire_suboptimal })
    }

    fn record(&mut self, image_index: u32) -> Result<()> {
        self.log.push(Event::Recorded(image_index));
        Ok(())
    }

    fn submit(&mut self, plan: SubmitPlan) -> Result<()> {
        assert!(self.image_available, "submit without an acquired image");
        assert!(
            !self.fence_signaled && !self.fence_pending,
            "submit with the in-flight fence not reset"
        );
        assert!(
            !self.render_finished[plan.signal_slot],
            "render-finished slot {} signaled before its present consumed it",
            plan.signal_slot
        );
        if self.lost_on_submit {
            return Err(Error::DeviceLost {
                phase: "queue submit",
                code: Some(-4),
            });
        }
        self.image_available = false;
        self.render_finished[plan.signal_slot] = true;
        self.fence_pending = true;
        self.log.push(Event::Submitted(plan));
        Ok(())
    }

    fn present(&mut self, image_index: u32, wait_slot: usize) -> Result<Presented> {
        assert!(self.render_finished[wait_slot], "present waits on an unsignaled slot");
        self.render_finished[wait_slot] = false;
        let n = self.presents;
        self.presents += 1;
        self.log.push(Event::Presented { image_index, wait_slot });
        if self.present_out_of_date_at == Some(n) {
            return Ok(Presented::OutOfDate);
        }
        Ok(Presented::Queued { suboptimal: false })
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.idle_waits += 1;
        self.retire();
        Ok(())
    }
}

fn scheduler(gpu: FakeGpu) -> FrameScheduler<FakeGpu> {
    FrameScheduler::new(gpu, Duration::from_millis(100))
}

/// Deterministic out-of-order image sequence over `images` slots.
fn shuffled_order(images: u32, len: usize) -> Vec<u32> {
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state % images
        })
        .collect()
}

#[test]
fn each_submit_signals_only_the_acquired_images_slot() {
    let order = shuffled_order(3, 1000);
    let mut s = scheduler(FakeGpu::new(3, order.clone()));

    for _ in 0..1000 {
        let status = s.run_frame().expect("frame");
        assert!(matches!(status, FrameStatus::Presented { .. }));
    }
    s.shutdown().expect("idle");
    assert_eq!(s.frames_presented(), 1000);

    let gpu = s.into_device();
    assert_eq!(gpu.idle_waits, 1);
    assert!(gpu.render_finished.iter().all(|signaled| !signaled));

    let mut acquired = None;
    let mut submits = 0;
    let mut per_slot = [0usize; 3];
    for event in &gpu.log {
        match *event {
            Event::Acquired(i) => acquired = Some(i),
            Event::Recorded(i) => assert_eq!(Some(i), acquired),
            Event::Submitted(plan) => {
                let i = acquired.expect("submit before acquire");
                assert_eq!(plan.image_index, i);
                assert_eq!(plan.signal_slot, i as usize);
                per_slot[plan.signal_slot] += 1;
                submits += 1;
            }
            Event::Presented { image_index, wait_slot } => {
                assert_eq!(Some(image_index), acquired);
                assert_eq!(wait_slot, image_index as usize);
            }
        }
    }
    assert_eq!(submits, 1000);
    for slot in 0..3u32 {
        let expected = order.iter().filter(|&&i| i == slot).count();
        assert_eq!(per_slot[slot as usize], expected);
    }
}

#[test]
fn close_before_first_frame_still_idles_the_device() {
    let mut s = scheduler(FakeGpu::new(2, vec![0, 1]));
    s.shutdown().unwrap();
    assert_eq!(s.frames_presented(), 0);
    assert_eq!(s.device().idle_waits, 1);
    assert!(s.device().log.is_empty());
}

#[test]
fn hung_fence_reports_timeout_instead_of_blocking() {
    let mut s = scheduler(FakeGpu::new(2, vec![0, 1]));
    assert!(matches!(s.run_frame().unwrap(), FrameStatus::Presented { image_index: 0, .. }));

    s.device_mut().hung = true;
    let err = s.run_frame().unwrap_err();
    assert_eq!(err.class(), FailureClass::Runtime);
    assert!(matches!(err, Error::TimedOut { phase: "wait for previous frame", .. }));
}

#[test]
fn stale_acquire_leaves_the_fence_signaled() {
    let mut gpu = FakeGpu::new(3, vec![0, 1, 2]);
    gpu.acquire_out_of_date_at = Some(1);
    let mut s = scheduler(gpu);

    assert!(matches!(s.run_frame().unwrap(), FrameStatus::Presented { .. }));
    assert_eq!(s.run_frame().unwrap(), FrameStatus::OutOfDate);
    assert!(s.device().fence_signaled);

    // no deadlock on the next wait
    assert_eq!(
        s.run_frame().unwrap(),
        FrameStatus::Presented { image_index: 1, suboptimal: false }
    );
    assert_eq!(s.frames_presented(), 2);
}

#[test]
fn stale_present_is_reported_after_the_frame_is_consumed() {
    let mut gpu = FakeGpu::new(2, vec![1, 0]);
    gpu.present_out_of_date_at = Some(3);
    let mut s = scheduler(gpu);

    let mut presented = 0;
    while s.run_frame().unwrap() != FrameStatus::OutOfDate {
        presented += 1;
        assert!(presented <= 3, "stale present never surfaced");
    }
    assert_eq!(presented, 3);
    assert_eq!(s.frames_presented(), 3);
    assert_eq!(s.device().idle_waits, 0);
    // the stale present still waited its slot
    assert!(s.device().render_finished.iter().all(|signaled| !signaled));
}

#[test]
fn failed_submit_propagates_and_presents_nothing() {
    let mut gpu = FakeGpu::new(2, vec![0, 1]);
    gpu.lost_on_submit = true;
    let mut s = scheduler(gpu);

    let err = s.run_frame().unwrap_err();
    assert_eq!(err.class(), FailureClass::Runtime);
    assert_eq!(err.exit_code(), -4);
    assert_eq!(s.frames_presented(), 0);
    assert_eq!(s.device().presents, 0);
    assert!(!s
        .device()
        .log
        .iter()
        .any(|e| matches!(e, Event::Submitted(_) | Event::Presented { .. })));
}

#[test]
fn suboptimal_acquire_is_reported_on_present() {
    let mut gpu = FakeGpu::new(2, vec![1]);
    gpu.acquire_suboptimal = true;
    let mut s = scheduler(gpu);
    assert_eq!(
        s.run_frame().unwrap(),
        FrameStatus::Presented { image_index: 1, suboptimal: true }
    );
}

#[test]
fn image_index_outside_the_chain_is_a_resource_failure() {
    let mut s = scheduler(FakeGpu::new(2, vec![5]));
    let err = s.run_frame().unwrap_err();
    assert_eq!(err.class(), FailureClass::Resource);
    // nothing was submitted, the fence is untouched
    assert!(s.device().fence_signaled);
}
