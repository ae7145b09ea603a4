// SPDX-License-Identifier: CEPL-1.0
use crate::device::Device;
use crate::error::{Stage, StageExt, VkResult};
use ash::vk;

/// Single colour attachment, cleared on load and handed to presentation.
pub struct RenderPass {
    raw: vk::RenderPass,
}

impl RenderPass {
    /// # Safety
    /// `device` must be live.
    pub unsafe fn new(device: &Device, format: vk::Format) -> VkResult<Self> {
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

        // The layout transition waits for the acquire semaphore, which is
        // signalled at colour-output stage.
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
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
        let raw = unsafe { device.raw().create_render_pass(&rp_info, None) }
            .stage(Stage::RenderPass, "vkCreateRenderPass")?;
        Ok(Self { raw })
    }

    pub fn raw(&self) -> vk::RenderPass {
        self.raw
    }

    /// # Safety
    /// No framebuffer or pending command buffer may reference it.
    pub unsafe fn destroy(&mut self, device: &Device) {
        unsafe { device.raw().destroy_render_pass(self.raw, None) };
        self.raw = vk::RenderPass::null();
    }
}
