// SPDX-License-Identifier: CEPL-1.0
use crate::device::Device;
use crate::error::{Stage, StageExt, VkResult};
use ash::vk;

/// A view over one swapchain image plus the framebuffer wrapping it.
/// Indexed the same way as the swapchain images.
pub struct Framebuffer {
    view: vk::ImageView,
    raw: vk::Framebuffer,
}

impl Framebuffer {
    /// # Safety
    /// `image` must be a live swapchain image of `format`.
    pub unsafe fn new(
        device: &Device,
        image: vk::Image,
        format: vk::Format,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> VkResult<Self> {
        let d = device.raw();
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = unsafe { d.create_image_view(&iv_info, None) }
            .stage(Stage::Framebuffer, "vkCreateImageView")?;

        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: &view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        let raw = match unsafe { d.create_framebuffer(&fb_info, None) } {
            Ok(fb) => fb,
            Err(code) => {
                unsafe { d.destroy_image_view(view, None) };
                return Err::<Self, _>(code).stage(Stage::Framebuffer, "vkCreateFramebuffer");
            }
        };

        Ok(Self { view, raw })
    }

    /// One framebuffer per swapchain image, in image order. Anything built
    /// before a failure is torn down again.
    ///
    /// # Safety
    /// See [`Framebuffer::new`].
    pub unsafe fn for_images(
        device: &Device,
        images: &[vk::Image],
        format: vk::Format,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> VkResult<Vec<Self>> {
        let mut out = Vec::with_capacity(images.len());
        for &image in images {
            match unsafe { Self::new(device, image, format, render_pass, extent) } {
                Ok(fb) => out.push(fb),
                Err(e) => {
                    for mut fb in out {
                        unsafe { fb.destroy(device) };
                    }
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    pub fn raw(&self) -> vk::Framebuffer {
        self.raw
    }

    /// # Safety
    /// No pending command buffer may reference it.
    pub unsafe fn destroy(&mut self, device: &Device) {
        let d = device.raw();
        unsafe {
            d.destroy_framebuffer(self.raw, None);
            d.destroy_image_view(self.view, None);
        }
        self.raw = vk::Framebuffer::null();
        self.view = vk::ImageView::null();
    }
}
