// SPDX-License-Identifier: CEPL-1.0
//! Swapchain negotiation (pure, over a `SurfaceSupport` snapshot) and the
//! image chain built from the result.

use ash::khr::swapchain;
use ash::vk;
use lumen_core::{Error, Result};
use lumen_render::{PresentModePreference, RenderSize};
use tracing::info;

use crate::probe::SurfaceSupport;
use crate::queues::PresentQueues;
use crate::vk_error::VkContext;

/// `current_extent.width` value meaning "the swapchain decides the size".
pub const UNDEFINED_EXTENT: u32 = u32::MAX;

#[derive(Clone, Debug)]
pub struct SwapchainPreferences {
    pub color_spaces: Vec<vk::ColorSpaceKHR>,
    pub formats: Vec<vk::Format>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self::for_present_mode(PresentModePreference::default())
    }
}

impl SwapchainPreferences {
    pub fn for_present_mode(mode: PresentModePreference) -> Self {
        let present_modes = match mode {
            PresentModePreference::Mailbox => {
                vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]
            }
            PresentModePreference::Fifo => vec![vk::PresentModeKHR::FIFO],
            PresentModePreference::Immediate => vec![
                vk::PresentModeKHR::IMMEDIATE,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::FIFO,
            ],
        };
        Self {
            color_spaces: vec![
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
                vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
                vk::ColorSpaceKHR::HDR10_ST2084_EXT,
            ],
            formats: vec![
                vk::Format::B8G8R8A8_SRGB,
                vk::Format::R8G8B8A8_SRGB,
                vk::Format::B8G8R8A8_UNORM,
                vk::Format::R8G8B8A8_UNORM,
                vk::Format::R16G16B16A16_SFLOAT,
                vk::Format::A2B10G10R10_UNORM_PACK32,
            ],
            present_modes,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainProfile {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

pub fn negotiate(
    support: &SurfaceSupport,
    framebuffer: RenderSize,
    prefs: &SwapchainPreferences,
) -> Result<SwapchainProfile> {
    if support.formats.is_empty() {
        return Err(Error::capability("surface reports no formats"));
    }
    if support.present_modes.is_empty() {
        return Err(Error::capability("surface reports no present modes"));
    }
    let caps = &support.capabilities;
    Ok(SwapchainProfile {
        surface_format: choose_surface_format(&support.formats, prefs),
        present_mode: choose_present_mode(&support.present_modes, &prefs.present_modes),
        extent: extent_from_caps(caps, framebuffer),
        image_count: choose_image_count(caps),
        pre_transform: caps.current_transform,
        composite_alpha: choose_composite_alpha(caps.supported_composite_alpha),
    })
}

/// Formats in any preferred color space, grouped in color-space order, then
/// the first preferred layout among them. `formats` must not be empty.
fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    prefs: &SwapchainPreferences,
) -> vk::SurfaceFormatKHR {
    let mut candidates: Vec<vk::SurfaceFormatKHR> = prefs
        .color_spaces
        .iter()
        .flat_map(|&cs| formats.iter().copied().filter(move |f| f.color_space == cs))
        .collect();
    if candidates.is_empty() {
        candidates = formats.to_vec();
    }

    prefs
        .formats
        .iter()
        .find_map(|&want| candidates.iter().copied().find(|f| f.format == want))
        .unwrap_or(candidates[0])
}

/// `modes` must not be empty.
fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    preferred
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(modes[0])
}

fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != UNDEFINED_EXTENT {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    if supported.contains(vk::CompositeAlphaFlagsKHR::OPAQUE) {
        return vk::CompositeAlphaFlagsKHR::OPAQUE;
    }
    [
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&bit| supported.contains(bit))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

// Info only
pub fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        vk::Format::A2B10G10R10_UNORM_PACK32 => "A2B10G10R10_UNORM",
        vk::Format::R16G16B16A16_SFLOAT => "R16G16B16A16_SFLOAT",
        _ => "OTHER",
    }
}
pub fn cs_name(cs: vk::ColorSpaceKHR) -> &'static str {
    match cs {
        vk::ColorSpaceKHR::SRGB_NONLINEAR => "SRGB_NONLINEAR",
        vk::ColorSpaceKHR::HDR10_ST2084_EXT => "HDR10_ST2084",
        vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT => "EXTENDED_SRGB_LINEAR",
        _ => "OTHER",
    }
}
pub fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// Swapchain plus the views and framebuffers derived from its images.
pub struct ImageChain {
    pub swapchain: vk::SwapchainKHR,
    pub profile: SwapchainProfile,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl ImageChain {
    /// `old` is handed to the driver as `old_swapchain` and stays owned by
    /// the caller.
    pub unsafe fn create(
        device: &ash::Device,
        swapchain_fn: &swapchain::Device,
        surface: vk::SurfaceKHR,
        profile: SwapchainProfile,
        queues: PresentQueues,
        render_pass: vk::RenderPass,
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let (sharing_mode, family_indices) = queues.image_sharing();
        let sc_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface,
            min_image_count: profile.image_count,
            image_format: profile.surface_format.format,
            image_color_space: profile.surface_format.color_space,
            image_extent: profile.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_indices.len() as u32,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: profile.pre_transform,
            composite_alpha: profile.composite_alpha,
            present_mode: profile.present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };
        let swapchain = swapchain_fn
            .create_swapchain(&sc_info, None)
            .or_fail("vkCreateSwapchainKHR")?;

        let mut chain = ImageChain {
            swapchain,
            profile,
            images: Vec::new(),
            views: Vec::new(),
            framebuffers: Vec::new(),
        };
        if let Err(e) = chain.create_views(device, swapchain_fn, render_pass) {
            chain.destroy(device, swapchain_fn);
            return Err(e);
        }

        info!(
            "vk: swapchain {}x{} {} / {} {} images={}",
            profile.extent.width,
            profile.extent.height,
            fmt_name(profile.surface_format.format),
            cs_name(profile.surface_format.color_space),
            pm_name(profile.present_mode),
            chain.images.len()
        );
        Ok(chain)
    }

    unsafe fn create_views(
        &mut self,
        device: &ash::Device,
        swapchain_fn: &swapchain::Device,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        self.images = swapchain_fn
            .get_swapchain_images(self.swapchain)
            .or_fail("vkGetSwapchainImagesKHR")?;

        for &image in &self.images {
            let view_ci = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.profile.surface_format.format,
                components: vk::ComponentMapping::default(),
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            self.views.push(
                device
                    .create_image_view(&view_ci, None)
                    .or_fail("vkCreateImageView")?,
            );
        }

        let extent = self.profile.extent;
        for view in &self.views {
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: 1,
                p_attachments: view,
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            self.framebuffers.push(
                device
                    .create_framebuffer(&fb_info, None)
                    .or_fail("vkCreateFramebuffer")?,
            );
        }
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Framebuffers and views only; the swapchain survives so it can be
    /// passed as `old_swapchain`. Framebuffers reference the render pass and
    /// must go before it does.
    pub unsafe fn release_views(&mut self, device: &ash::Device) {
        for fb in self.framebuffers.drain(..) {
            device.destroy_framebuffer(fb, None);
        }
        for view in self.views.drain(..) {
            device.destroy_image_view(view, None);
        }
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device, swapchain_fn: &swapchain::Device) {
        self.release_views(device);
        self.images.clear();
        swapchain_fn.destroy_swapchain(self.swapchain, None);
        self.swapchain = vk::SwapchainKHR::null();
    }
}
