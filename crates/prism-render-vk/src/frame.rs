// SPDX-License-Identifier: CEPL-1.0
//! Per-image command buffers and the acquire/submit/present synchronization.
use crate::mesh::GpuMesh;
use anyhow::{anyhow, Context, Result};
use ash::vk;

/// Acquire semaphores in flight at once, independent of the image count.
pub const ACQUIRE_SLOTS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Image { index: u32, suboptimal: bool },
    /// Surface changed; skip this frame and recreate.
    OutOfDate,
}

pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> Result<AcquireOutcome> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(anyhow!("acquire_next_image: {e:?}")),
    }
}

/// `true` when the swapchain should be recreated after this present.
pub fn classify_present(result: Result<bool, vk::Result>) -> Result<bool> {
    match result {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
        Err(e) => Err(anyhow!("queue_present: {e:?}")),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Acquire reported the swapchain out of date; nothing was submitted.
    Skipped,
    /// Presented, but the swapchain no longer matches the surface.
    NeedsRecreate,
}

struct AcquireSlot {
    image_available: vk::Semaphore,
    /// Signaled by the submission that waited on `image_available`.
    submitted: vk::Fence,
}

/// Semaphores and fences for the frame loop.
pub struct FrameSync {
    device: ash::Device,
    slots: Vec<AcquireSlot>,
    render_finished: Vec<vk::Semaphore>,
    /// Fence of the submission that last rendered each image, if any.
    image_fences: Vec<vk::Fence>,
    next_slot: usize,
}

impl FrameSync {
    pub fn new(device: &ash::Device, image_count: usize) -> Result<Self> {
        let mut out = Self {
            device: device.clone(),
            slots: Vec::with_capacity(ACQUIRE_SLOTS),
            render_finished: Vec::with_capacity(image_count),
            image_fences: vec![vk::Fence::null(); image_count],
            next_slot: 0,
        };
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        unsafe {
            for _ in 0..ACQUIRE_SLOTS {
                let image_available = device.create_semaphore(&sem_ci, None)?;
                let submitted = match device.create_fence(&fence_ci, None) {
                    Ok(f) => f,
                    Err(e) => {
                        device.destroy_semaphore(image_available, None);
                        return Err(e.into());
                    }
                };
                out.slots.push(AcquireSlot {
                    image_available,
                    submitted,
                });
            }
            for _ in 0..image_count {
                out.render_finished
                    .push(device.create_semaphore(&sem_ci, None)?);
            }
        }
        Ok(out)
    }

    pub fn image_count(&self) -> usize {
        self.render_finished.len()
    }

    pub fn wait_all(&self) -> Result<()> {
        let fences: Vec<vk::Fence> = self.slots.iter().map(|s| s.submitted).collect();
        unsafe { self.device.wait_for_fences(&fences, true, u64::MAX) }
            .context("wait_for_fences(all)")?;
        Ok(())
    }

    /// Draw one frame with the pre-recorded `commands[image]`. `before_submit`
    /// runs once the acquired image is no longer used by the GPU.
    pub fn draw<F>(
        &mut self,
        swapchain_loader: &ash::khr::swapchain::Device,
        swapchain: vk::SwapchainKHR,
        graphics_queue: vk::Queue,
        present_queue: vk::Queue,
        commands: &[vk::CommandBuffer],
        before_submit: F,
    ) -> Result<FrameOutcome>
    where
        F: FnOnce(usize) -> Result<()>,
    {
        let slot = &self.slots[self.next_slot];
        unsafe {
            self.device
                .wait_for_fences(&[slot.submitted], true, u64::MAX)
                .context("wait_for_fences(acquire slot)")?;

            // 1) acquire
            let acquired = swapchain_loader.acquire_next_image(
                swapchain,
                u64::MAX,
                slot.image_available,
                vk::Fence::null(),
            );
            let index = match classify_acquire(acquired)? {
                AcquireOutcome::Image { index, .. } => index,
                AcquireOutcome::OutOfDate => return Ok(FrameOutcome::Skipped),
            };
            let img = index as usize;
            let cmd = *commands
                .get(img)
                .ok_or_else(|| anyhow!("no command buffer for image {img}"))?;

            // the image may still be rendering from a submission on another slot
            let previous = self.image_fences[img];
            if previous != vk::Fence::null() && previous != slot.submitted {
                self.device
                    .wait_for_fences(&[previous], true, u64::MAX)
                    .context("wait_for_fences(image)")?;
            }
            self.image_fences[img] = slot.submitted;

            if let Err(e) = before_submit(img) {
                // the acquire semaphore is signaled; consume it so the slot
                // can acquire again
                self.device.reset_fences(&[slot.submitted])?;
                let drain_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
                let drain = drain_submit(&slot.image_available, &drain_stages);
                self.device
                    .queue_submit(graphics_queue, std::slice::from_ref(&drain), slot.submitted)
                    .context("queue_submit(drain acquire)")?;
                return Err(e);
            }

            // 2) submit; reset only now so an early return never strands the fence
            self.device.reset_fences(&[slot.submitted])?;
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let submit = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                wait_semaphore_count: 1,
                p_wait_semaphores: &slot.image_available,
                p_wait_dst_stage_mask: wait_stages.as_ptr(),
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                signal_semaphore_count: 1,
                p_signal_semaphores: &self.render_finished[img],
                ..Default::default()
            };
            self.device
                .queue_submit(graphics_queue, std::slice::from_ref(&submit), slot.submitted)
                .context("queue_submit")?;

            // 3) present
            let present = vk::PresentInfoKHR {
                s_type: vk::StructureType::PRESENT_INFO_KHR,
                wait_semaphore_count: 1,
                p_wait_semaphores: &self.render_finished[img],
                swapchain_count: 1,
                p_swapchains: &swapchain,
                p_image_indices: &index,
                ..Default::default()
            };
            let stale = classify_present(swapchain_loader.queue_present(present_queue, &present))?;

            self.next_slot = (self.next_slot + 1) % self.slots.len();
            Ok(if stale {
                FrameOutcome::NeedsRecreate
            } else {
                FrameOutcome::Presented
            })
        }
    }
}

/// Empty batch that only waits on `semaphore`, leaving it unsignaled.
fn drain_submit<'a>(
    semaphore: &'a vk::Semaphore,
    stages: &'a [vk::PipelineStageFlags],
) -> vk::SubmitInfo<'a> {
    vk::SubmitInfo::default()
        .wait_semaphores(std::slice::from_ref(semaphore))
        .wait_dst_stage_mask(stages)
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            for s in self.slots.drain(..) {
                self.device.destroy_fence(s.submitted, None);
                self.device.destroy_semaphore(s.image_available, None);
            }
            for sem in self.render_finished.drain(..) {
                self.device.destroy_semaphore(sem, None);
            }
        }
    }
}

/// Handles and offsets baked into each pre-recorded command buffer.
pub struct RecordInputs<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffers: &'a [vk::Framebuffer],
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub layout: vk::PipelineLayout,
    pub scene_pipeline: vk::Pipeline,
    pub skybox_pipeline: vk::Pipeline,
    pub scene_set: vk::DescriptorSet,
    pub skybox_set: vk::DescriptorSet,
    pub mesh: &'a GpuMesh,
    pub skybox_mesh: &'a GpuMesh,
    /// Dynamic offsets (bindings 0, 4, 5) for each image's uniform slot.
    pub dynamic_offsets: &'a [[u32; 3]],
}

/// Primary command buffers, one per swapchain image.
pub struct FrameCommands {
    device: ash::Device,
    pool: vk::CommandPool,
    pub buffers: Vec<vk::CommandBuffer>,
}

impl FrameCommands {
    pub fn new(device: &ash::Device, queue_family: u32, image_count: usize) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("create_command_pool")?;
        let mut out = Self {
            device: device.clone(),
            pool,
            buffers: Vec::new(),
        };
        out.allocate(image_count)?;
        Ok(out)
    }

    /// Free the current buffers and allocate `count` fresh ones.
    pub fn allocate(&mut self, count: usize) -> Result<()> {
        self.free();
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        self.buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .context("allocate_command_buffers")?;
        Ok(())
    }

    pub fn free(&mut self) {
        if !self.buffers.is_empty() {
            unsafe {
                self.device
                    .free_command_buffers(self.pool, &self.buffers)
            };
            self.buffers.clear();
        }
    }

    /// Record every buffer: skybox first, then the scene mesh.
    pub fn record_all(&self, inputs: &RecordInputs<'_>) -> Result<()> {
        if inputs.framebuffers.len() != self.buffers.len()
            || inputs.dynamic_offsets.len() < self.buffers.len()
        {
            return Err(anyhow!(
                "{} command buffers, {} framebuffers, {} uniform slots",
                self.buffers.len(),
                inputs.framebuffers.len(),
                inputs.dynamic_offsets.len()
            ));
        }
        for (i, &cmd) in self.buffers.iter().enumerate() {
            unsafe { self.record_one(cmd, i, inputs) }
                .with_context(|| format!("record command buffer {i}"))?;
        }
        Ok(())
    }

    unsafe fn record_one(
        &self,
        cmd: vk::CommandBuffer,
        image: usize,
        inputs: &RecordInputs<'_>,
    ) -> Result<()> {
        let d = &self.device;
        d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &begin)?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: inputs.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: inputs.extent,
        };
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: inputs.render_pass,
            framebuffer: inputs.framebuffers[image],
            render_area: area,
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

        let vp = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: inputs.extent.width as f32,
            height: inputs.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
        d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&area));

        let offsets = &inputs.dynamic_offsets[image];
        for (pipeline, set, mesh) in [
            (inputs.skybox_pipeline, inputs.skybox_set, inputs.skybox_mesh),
            (inputs.scene_pipeline, inputs.scene_set, inputs.mesh),
        ] {
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                inputs.layout,
                0,
                std::slice::from_ref(&set),
                offsets,
            );
            mesh.draw(d, cmd);
        }

        d.cmd_end_render_pass(cmd);
        d.end_command_buffer(cmd)?;
        Ok(())
    }
}

impl Drop for FrameCommands {
    fn drop(&mut self) {
        // buffers go with the pool
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_acquire_skips_the_frame() {
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).expect("classify"),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(
            classify_acquire(Ok((2, true))).expect("classify"),
            AcquireOutcome::Image {
                index: 2,
                suboptimal: true
            }
        );
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn stale_present_requests_recreation() {
        assert!(!classify_present(Ok(false)).expect("ok"));
        assert!(classify_present(Ok(true)).expect("suboptimal"));
        assert!(classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).expect("out of date"));
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn drain_batch_only_waits_on_the_acquire_semaphore() {
        use ash::vk::Handle;
        let sem = vk::Semaphore::from_raw(0x42);
        let stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let info = drain_submit(&sem, &stages);
        assert_eq!(info.wait_semaphore_count, 1);
        assert_eq!(unsafe { *info.p_wait_semaphores }, sem);
        assert_eq!(unsafe { *info.p_wait_dst_stage_mask }, stages[0]);
        assert_eq!(info.command_buffer_count, 0);
        assert_eq!(info.signal_semaphore_count, 0);
    }
}
