// SPDX-License-Identifier: CEPL-1.0
//! The `FrameDevice` the scheduler drives: one command buffer, one fence,
//! one image-available semaphore and a render-finished semaphore per image.

use std::time::Duration;

use ash::khr::swapchain;
use ash::vk;
use lumen_core::Result;
use lumen_render::{Acquired, FenceWait, FrameDevice, Presented, SubmitPlan};
use tracing::debug;

use crate::device::LogicalDevice;
use crate::pipeline::PipelineHandles;
use crate::queues::PresentQueues;
use crate::swapchain::{ImageChain, SwapchainProfile};
use crate::vk_error::{fail, timeout_ns, VkContext};

struct FrameSync {
    in_flight: vk::Fence,
    image_available: vk::Semaphore,
    /// Indexed by swapchain image, never by frame count.
    render_finished: Vec<vk::Semaphore>,
}

pub struct VkFrameDevice {
    device: ash::Device,
    swapchain_fn: swapchain::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    chain: ImageChain,
    pipeline: PipelineHandles,
    cmd_pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    sync: FrameSync,
    clear: vk::ClearValue,
}

impl VkFrameDevice {
    /// Takes ownership of `chain`; on failure everything is released.
    pub unsafe fn new(
        logical: &LogicalDevice,
        graphics_family: u32,
        chain: ImageChain,
        pipeline: PipelineHandles,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let mut frames = Self {
            device: logical.device.clone(),
            swapchain_fn: logical.swapchain_fn.clone(),
            graphics_queue: logical.graphics_queue,
            present_queue: logical.present_queue,
            chain,
            pipeline,
            cmd_pool: vk::CommandPool::null(),
            cmd: vk::CommandBuffer::null(),
            sync: FrameSync {
                in_flight: vk::Fence::null(),
                image_available: vk::Semaphore::null(),
                render_finished: Vec::new(),
            },
            clear: clear_value(clear_color),
        };
        if let Err(e) = frames.create_objects(graphics_family) {
            frames.destroy();
            return Err(e);
        }
        Ok(frames)
    }

    unsafe fn create_objects(&mut self, graphics_family: u32) -> Result<()> {
        let d = &self.device;
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                | vk::CommandPoolCreateFlags::TRANSIENT,
            queue_family_index: graphics_family,
            ..Default::default()
        };
        self.cmd_pool = d
            .create_command_pool(&pool_info, None)
            .or_fail("vkCreateCommandPool")?;

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        self.cmd = d
            .allocate_command_buffers(&alloc_info)
            .or_fail("vkAllocateCommandBuffers")?[0];

        // signaled, so the very first wait returns at once
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        self.sync.in_flight = d.create_fence(&fence_ci, None).or_fail("vkCreateFence")?;
        self.sync.image_available = d
            .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
            .or_fail("vkCreateSemaphore")?;
        self.create_render_finished()
    }

    unsafe fn create_render_finished(&mut self) -> Result<()> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        for _ in 0..self.chain.image_count() {
            let sem = self
                .device
                .create_semaphore(&sem_ci, None)
                .or_fail("vkCreateSemaphore")?;
            self.sync.render_finished.push(sem);
        }
        Ok(())
    }

    unsafe fn destroy_render_finished(&mut self) {
        for sem in self.sync.render_finished.drain(..) {
            self.device.destroy_semaphore(sem, None);
        }
    }

    pub fn profile(&self) -> &SwapchainProfile {
        &self.chain.profile
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = clear_value(rgba);
    }

    /// First half of a rebuild, with the device idle: drop everything that
    /// depends on the chain's images but keep the swapchain itself so it can
    /// be retired through `old_swapchain`.
    pub unsafe fn release_chain(&mut self) {
        self.destroy_render_finished();
        self.chain.release_views(&self.device);
    }

    /// Second half of a rebuild: build a chain for `profile`, retire the old
    /// swapchain and size the render-finished set to the new image count.
    pub unsafe fn rebuild_chain(
        &mut self,
        surface: vk::SurfaceKHR,
        profile: SwapchainProfile,
        queues: PresentQueues,
        pipeline: PipelineHandles,
    ) -> Result<()> {
        let created = ImageChain::create(
            &self.device,
            &self.swapchain_fn,
            surface,
            profile,
            queues,
            pipeline.render_pass,
            self.chain.swapchain,
        );
        self.chain.destroy(&self.device, &self.swapchain_fn);
        self.chain = created?;
        self.pipeline = pipeline;
        self.create_render_finished()?;
        debug!(images = self.chain.image_count(), "vk: image chain rebuilt");
        Ok(())
    }

    // STRICT TEARDOWN ORDER (device already idle):
    // - sync objects
    // - command buffer, then its pool
    // - framebuffers and views, then the swapchain
    pub unsafe fn destroy(&mut self) {
        let d = &self.device;
        d.destroy_fence(self.sync.in_flight, None);
        d.destroy_semaphore(self.sync.image_available, None);
        self.sync.in_flight = vk::Fence::null();
        self.sync.image_available = vk::Semaphore::null();
        self.destroy_render_finished();

        let d = &self.device;
        if self.cmd != vk::CommandBuffer::null() {
            d.free_command_buffers(self.cmd_pool, &[self.cmd]);
            self.cmd = vk::CommandBuffer::null();
        }
        d.destroy_command_pool(self.cmd_pool, None);
        self.cmd_pool = vk::CommandPool::null();

        self.chain.destroy(&self.device, &self.swapchain_fn);
    }
}

fn clear_value(rgba: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue { color: vk::ClearColorValue { float32: rgba } }
}

impl FrameDevice for VkFrameDevice {
    fn image_count(&self) -> usize {
        self.sync.render_finished.len()
    }

    fn wait_in_flight(&mut self, timeout: Duration) -> Result<FenceWait> {
        let r = unsafe {
            self.device
                .wait_for_fences(&[self.sync.in_flight], true, timeout_ns(timeout))
        };
        match r {
            Ok(()) => Ok(FenceWait::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceWait::TimedOut),
            Err(e) => Err(fail("vkWaitForFences", e)),
        }
    }

    fn reset_in_flight(&mut self) -> Result<()> {
        unsafe { self.device.reset_fences(&[self.sync.in_flight]) }.or_fail("vkResetFences")
    }

    fn acquire_image(&mut self, timeout: Duration) -> Result<Acquired> {
        let r = unsafe {
            self.swapchain_fn.acquire_next_image(
                self.chain.swapchain,
                timeout_ns(timeout),
                self.sync.image_available,
                vk::Fence::null(),
            )
        };
        match r {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Ok(Acquired::TimedOut),
            Err(e) => Err(fail("vkAcquireNextImageKHR", e)),
        }
    }

    fn record(&mut self, image_index: u32) -> Result<()> {
        let d = &self.device;
        let cmd = self.cmd;
        let extent = self.chain.profile.extent;
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .or_fail("vkResetCommandBuffer")?;

            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)
                .or_fail("vkBeginCommandBuffer")?;

            let clears = [self.clear];
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: self.pipeline.render_pass,
                framebuffer: self.chain.framebuffers[image_index as usize],
                render_area: vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent },
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent }],
            );

            d.cmd_draw(cmd, 3, 1, 0, 0);
            d.cmd_end_render_pass(cmd);
            d.end_command_buffer(cmd).or_fail("vkEndCommandBuffer")
        }
    }

    fn submit(&mut self, plan: SubmitPlan) -> Result<()> {
        let waits = [self.sync.image_available];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let cmds = [self.cmd];
        let signals = [self.sync.render_finished[plan.signal_slot]];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: waits.len() as u32,
            p_wait_semaphores: waits.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            command_buffer_count: cmds.len() as u32,
            p_command_buffers: cmds.as_ptr(),
            signal_semaphore_count: signals.len() as u32,
            p_signal_semaphores: signals.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit], self.sync.in_flight)
        }
        .or_fail("vkQueueSubmit")
    }

    fn present(&mut self, image_index: u32, wait_slot: usize) -> Result<Presented> {
        let waits = [self.sync.render_finished[wait_slot]];
        let swapchains = [self.chain.swapchain];
        let indices = [image_index];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: waits.len() as u32,
            p_wait_semaphores: waits.as_ptr(),
            swapchain_count: swapchains.len() as u32,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: indices.as_ptr(),
            ..Default::default()
        };
        match unsafe { self.swapchain_fn.queue_present(self.present_queue, &present) } {
            Ok(suboptimal) => Ok(Presented::Queued { suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::OutOfDate),
            Err(e) => Err(fail("vkQueuePresentKHR", e)),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.or_fail("vkDeviceWaitIdle")
    }
}
