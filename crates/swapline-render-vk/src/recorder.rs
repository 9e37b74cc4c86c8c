// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use tracing::debug;

use crate::error::ConfigurationError;
use crate::pacer::CommandSource;
use crate::surface::PresentationSurface;

fn stage(stage: &'static str) -> impl FnOnce(vk::Result) -> ConfigurationError {
    move |result| ConfigurationError::RecorderCreation { stage, result }
}

pub fn clear_value(rgba: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    }
}

/// Single color attachment: cleared on load, handed to the presentation engine.
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }
}

/// The layout transition must not start before the image-acquired semaphore,
/// which the submit waits on at COLOR_ATTACHMENT_OUTPUT.
pub fn acquire_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

/// Render pass, framebuffers and one pre-recorded clear per presentable image.
pub struct ClearRecorder {
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    extent: vk::Extent2D,
    clear: [f32; 4],
}

impl ClearRecorder {
    /// # Safety
    /// `surface` must have been created on `device`.
    pub unsafe fn new(
        device: &ash::Device,
        surface: &PresentationSurface,
        graphics_family: u32,
        clear: [f32; 4],
    ) -> Result<Self, ConfigurationError> {
        let render_pass = unsafe { create_render_pass(device, surface.config.format.format) }
            .map_err(stage("create_render_pass"))?;

        let mut recorder = Self {
            render_pass,
            framebuffers: Vec::with_capacity(surface.image_count()),
            pool: vk::CommandPool::null(),
            buffers: Vec::new(),
            extent: surface.config.extent,
            clear,
        };

        let built = unsafe { recorder.build(device, surface, graphics_family) };
        if let Err(e) = built {
            unsafe { recorder.destroy(device) };
            return Err(e);
        }
        Ok(recorder)
    }

    unsafe fn build(
        &mut self,
        device: &ash::Device,
        surface: &PresentationSurface,
        graphics_family: u32,
    ) -> Result<(), ConfigurationError> {
        for view in surface.views() {
            let attachments = [view];
            let fb_info = vk::FramebufferCreateInfo {
                render_pass: self.render_pass,
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            }
            .attachments(&attachments);
            let fb = unsafe { device.create_framebuffer(&fb_info, None) }
                .map_err(stage("create_framebuffer"))?;
            self.framebuffers.push(fb);
        }

        let pool_info = vk::CommandPoolCreateInfo {
            queue_family_index: graphics_family,
            ..Default::default()
        };
        self.pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(stage("create_command_pool"))?;

        let alloc_info = vk::CommandBufferAllocateInfo {
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: self.framebuffers.len() as u32,
            ..Default::default()
        };
        self.buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(stage("allocate_command_buffers"))?;

        unsafe { self.record(device) }.map_err(stage("record"))?;
        debug!(
            "recorded {} clear command buffers ({}x{})",
            self.buffers.len(),
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }

    unsafe fn record(&self, device: &ash::Device) -> VkResult<()> {
        let clears = [clear_value(self.clear)];
        for (&cmd, &fb) in self.buffers.iter().zip(&self.framebuffers) {
            unsafe {
                device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;

                let rp_begin = vk::RenderPassBeginInfo {
                    render_pass: self.render_pass,
                    framebuffer: fb,
                    render_area: vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: self.extent,
                    },
                    ..Default::default()
                }
                .clear_values(&clears);

                device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
                device.cmd_end_render_pass(cmd);
                device.end_command_buffer(cmd)?;
            }
        }
        Ok(())
    }

    /// # Safety
    /// None of the buffers may be pending on the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.pool, None);
                self.pool = vk::CommandPool::null();
            }
            self.buffers.clear();
            for fb in self.framebuffers.drain(..) {
                device.destroy_framebuffer(fb, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
        }
    }
}

impl CommandSource for ClearRecorder {
    fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.buffers.get(image_index as usize).copied()
    }

    fn len(&self) -> usize {
        self.buffers.len()
    }
}

unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> VkResult<vk::RenderPass> {
    let attachments = [color_attachment(format)];
    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)];
    let dependencies = [acquire_dependency()];

    let rp_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    unsafe { device.create_render_pass(&rp_info, None) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_ends_presentable() {
        let a = color_attachment(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(a.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(a.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(a.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(a.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn dependency_matches_acquire_wait_stage() {
        let d = acquire_dependency();
        assert_eq!(d.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(d.dst_subpass, 0);
        assert_eq!(d.src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert!(d.dst_access_mask.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn clear_value_carries_rgba() {
        let v = clear_value([0.1, 0.2, 0.3, 1.0]);
        assert_eq!(unsafe { v.color.float32 }, [0.1, 0.2, 0.3, 1.0]);
    }
}
