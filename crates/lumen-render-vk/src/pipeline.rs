// SPDX-License-Identifier: CEPL-1.0
//! Render pass and the one graphics pipeline. Fixed-function state is
//! static; only the color attachment format varies.

use ash::vk;
use lumen_core::Result;
use tracing::debug;

use crate::shader::{create_module, ShaderSet};
use crate::vk_error::VkContext;

/// Handles the per-frame recording needs.
#[derive(Clone, Copy, Debug)]
pub struct PipelineHandles {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
}

pub struct GraphicsPipeline {
    pub format: vk::Format,
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    pub unsafe fn create(device: &ash::Device, format: vk::Format, shaders: &ShaderSet) -> Result<Self> {
        let render_pass = create_render_pass(device, format)?;

        let layout_ci = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        let layout = match device.create_pipeline_layout(&layout_ci, None) {
            Ok(l) => l,
            Err(e) => {
                device.destroy_render_pass(render_pass, None);
                return Err(crate::vk_error::fail("vkCreatePipelineLayout", e));
            }
        };

        let mut out = Self { format, render_pass, layout, pipeline: vk::Pipeline::null() };
        match create_pipeline(device, render_pass, layout, shaders) {
            Ok(p) => out.pipeline = p,
            Err(e) => {
                out.destroy(device);
                return Err(e);
            }
        }
        debug!("vk: pipeline ready for {:?}", format);
        Ok(out)
    }

    pub fn handles(&self) -> PipelineHandles {
        PipelineHandles { render_pass: self.render_pass, pipeline: self.pipeline }
    }

    /// Pipeline, layout, render pass. Framebuffers using the render pass
    /// must already be gone.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
        device.destroy_render_pass(self.render_pass, None);
        self.pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
        self.render_pass = vk::RenderPass::null();
    }
}

unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    // Render pass: single color attachment -> present
    let color_att = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    // the clear must not start before the acquired image is released
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    device
        .create_render_pass(&rp_info, None)
        .or_fail("vkCreateRenderPass")
}

unsafe fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    shaders: &ShaderSet,
) -> Result<vk::Pipeline> {
    let vert = create_module(device, &shaders.vertex)?;
    let frag = match create_module(device, &shaders.fragment) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_shader_module(vert, None);
            return Err(e);
        }
    };

    let entry = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vert,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: frag,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    // vertices come from gl_VertexIndex
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    };

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dynamic_states.len() as u32,
        p_dynamic_states: dynamic_states.as_ptr(),
        ..Default::default()
    };
    let viewport = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };

    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        depth_clamp_enable: vk::FALSE,
        rasterizer_discard_enable: vk::FALSE,
        polygon_mode: vk::PolygonMode::FILL,
        line_width: 1.0,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        depth_bias_enable: vk::FALSE,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        sample_shading_enable: vk::FALSE,
        min_sample_shading: 1.0,
        ..Default::default()
    };

    let blend_att = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::RGBA,
    };
    let blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        logic_op_enable: vk::FALSE,
        logic_op: vk::LogicOp::COPY,
        attachment_count: 1,
        p_attachments: &blend_att,
        blend_constants: [0.0; 4],
        ..Default::default()
    };

    let ci = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &blend,
        p_dynamic_state: &dynamic,
        layout,
        render_pass,
        subpass: 0,
        base_pipeline_index: -1,
        ..Default::default()
    };

    let result = device.create_graphics_pipelines(vk::PipelineCache::null(), &[ci], None);

    // modules are only needed while the pipeline is built
    device.destroy_shader_module(frag, None);
    device.destroy_shader_module(vert, None);

    match result {
        Ok(pipelines) => Ok(pipelines[0]),
        Err((_, e)) => Err(crate::vk_error::fail("vkCreateGraphicsPipelines", e)),
    }
}
