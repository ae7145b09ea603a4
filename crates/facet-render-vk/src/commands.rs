// SPDX-License-Identifier: CEPL-1.0
use crate::device::Device;
use crate::error::{Stage, StageExt, VkResult};
use ash::vk;
use facet_math::Vec4;

/// Everything one queue submission needs.
#[derive(Clone, Copy, Debug)]
pub struct FrameSubmit {
    pub command_buffer: vk::CommandBuffer,
    pub wait: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal: vk::Semaphore,
    pub fence: vk::Fence,
}

/// What the recorded pass draws into.
#[derive(Clone, Copy, Debug)]
pub struct PassTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

pub fn clear_value(rgba: Vec4) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue {
            float32: rgba.to_array(),
        },
    }
}

/// Graphics command pool with one primary buffer per swapchain image.
pub struct CommandSystem {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandSystem {
    /// # Safety
    /// `family` must be one of the device's queue families.
    pub unsafe fn new(device: &Device, family: u32, image_count: usize) -> VkResult<Self> {
        let d = device.raw();
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = unsafe { d.create_command_pool(&pool_info, None) }
            .stage(Stage::CommandBuffers, "vkCreateCommandPool")?;

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: image_count as u32,
            ..Default::default()
        };
        let buffers = match unsafe { d.allocate_command_buffers(&alloc_info) } {
            Ok(b) => b,
            Err(code) => {
                unsafe { d.destroy_command_pool(pool, None) };
                return Err::<Self, _>(code)
                    .stage(Stage::CommandBuffers, "vkAllocateCommandBuffers");
            }
        };
        Ok(Self { pool, buffers })
    }

    pub fn buffer(&self, image: u32) -> vk::CommandBuffer {
        self.buffers[image as usize]
    }

    /// Resets the image's buffer and records a single render pass that only
    /// clears.
    ///
    /// # Safety
    /// The buffer must not be pending on the GPU.
    pub unsafe fn record(
        &self,
        device: &Device,
        image: u32,
        target: PassTarget,
        clear: vk::ClearValue,
    ) -> VkResult<()> {
        let d = device.raw();
        let cmd = self.buffer(image);

        unsafe { d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty()) }
            .stage(Stage::Frame, "vkResetCommandBuffer")?;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { d.begin_command_buffer(cmd, &begin) }
            .stage(Stage::Frame, "vkBeginCommandBuffer")?;

        let clears = [clear];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: target.render_pass,
            framebuffer: target.framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        unsafe {
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_end_render_pass(cmd);
        }

        unsafe { d.end_command_buffer(cmd) }.stage(Stage::Frame, "vkEndCommandBuffer")
    }

    /// # Safety
    /// `queue` must belong to the pool's family and `submit.fence` must be
    /// unsignalled.
    pub unsafe fn submit(device: &Device, queue: vk::Queue, submit: &FrameSubmit) -> VkResult<()> {
        let waits = [submit.wait];
        let stages = [submit.wait_stage];
        let signals = [submit.signal];
        let cmds = [submit.command_buffer];
        let info = vk::SubmitInfo {
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
            device
                .raw()
                .queue_submit(queue, std::slice::from_ref(&info), submit.fence)
        }
        .stage(Stage::Frame, "vkQueueSubmit")
    }

    /// Destroys the pool, freeing every buffer with it.
    ///
    /// # Safety
    /// No buffer may be pending on the GPU.
    pub unsafe fn destroy(&mut self, device: &Device) {
        self.buffers.clear();
        unsafe { device.raw().destroy_command_pool(self.pool, None) };
        self.pool = vk::CommandPool::null();
    }
}
