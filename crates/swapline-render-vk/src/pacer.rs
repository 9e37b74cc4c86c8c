// SPDX-License-Identifier: CEPL-1.0
//! Frame pacing: K frame slots rotating over N presentable images.
//!
//! Per frame, on one CPU thread:
//! 1. throttle on the current slot's fence (bounds CPU run-ahead to K frames)
//! 2. acquire an image, signalling the slot's image-acquired semaphore
//! 3. if another slot's unfinished submission still targets that image, wait for it
//!    (any failure from here until submit releases the acquired image)
//! 4. reset the fence and submit the image's commands
//! 5. present, gated on render-finished
//! 6. advance to the next slot
//!
//! Steps 1 and 3 are the only places the CPU blocks.

use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, trace, warn};

use crate::error::{ConfigurationError, RuntimeError};
use crate::sync::{FrameSlot, GuardEntry, ImageGuard, SlotState};

/// The queue, swapchain and sync-object entry points the pacer drives.
pub trait FrameBackend {
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn destroy_fence(&self, fence: vk::Fence);

    /// Blocks until `fence` signals. `Err(TIMEOUT)` when `timeout_ns` elapses.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    /// Returns the image index and whether the swapchain is suboptimal.
    fn acquire_next_image(&self, signal: vk::Semaphore, timeout_ns: u64) -> VkResult<(u32, bool)>;
    fn submit(&self, submission: &FrameSubmission) -> VkResult<()>;
    /// Returns whether the swapchain is suboptimal.
    fn present(&self, image_index: u32, wait: vk::Semaphore) -> VkResult<bool>;
}

/// One queue submission as the pacer declares it. A null `command_buffer`
/// and `signal_semaphore` mark a wait-only release of an acquired image.
#[derive(Clone, Copy, Debug)]
pub struct FrameSubmission {
    pub image_index: u32,
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

/// Pre-recorded commands, one per presentable image.
pub trait CommandSource {
    fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CommandSource for [vk::CommandBuffer] {
    fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.get(image_index as usize).copied()
    }

    fn len(&self) -> usize {
        <[vk::CommandBuffer]>::len(self)
    }
}

impl CommandSource for Vec<vk::CommandBuffer> {
    fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.as_slice().command_buffer(image_index)
    }

    fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// What happened to one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameOutcome {
    pub frame: u64,
    pub slot: usize,
    pub image_index: u32,
    pub suboptimal: bool,
    /// The hazard check had to wait for another slot's submission.
    pub hazard_waited: bool,
}

pub struct FramePacer {
    slots: Vec<FrameSlot>,
    guard: ImageGuard,
    current: usize,
    timeout_ns: u64,
    frames_submitted: u64,
}

impl FramePacer {
    /// Creates `frames_in_flight` slots for a chain of `image_count` images.
    pub fn new<B: FrameBackend + ?Sized>(
        backend: &B,
        frames_in_flight: usize,
        image_count: usize,
        timeout_ns: u64,
    ) -> Result<Self, ConfigurationError> {
        if frames_in_flight == 0 {
            return Err(ConfigurationError::InvalidFramesInFlight);
        }

        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            match create_slot(backend) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in &slots {
                        destroy_slot(backend, slot);
                    }
                    return Err(ConfigurationError::SyncCreation(e));
                }
            }
        }

        debug!("frame pacer: {frames_in_flight} slots over {image_count} images");
        Ok(Self {
            slots,
            guard: ImageGuard::new(image_count),
            current: 0,
            timeout_ns,
            frames_submitted: 0,
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn image_count(&self) -> usize {
        self.guard.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    pub fn image_owner(&self, image_index: u32) -> Option<GuardEntry> {
        self.guard.owner(image_index as usize)
    }

    /// Submissions whose fence has not been observed signaled yet.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.is_pending()).count()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Runs one acquire/submit/present iteration.
    pub fn draw_frame<B, C>(&mut self, backend: &B, commands: &C) -> Result<FrameOutcome, RuntimeError>
    where
        B: FrameBackend + ?Sized,
        C: CommandSource + ?Sized,
    {
        if commands.len() < self.guard.len() {
            return Err(RuntimeError::MissingCommands {
                image_index: commands.len() as u32,
                available: commands.len(),
            });
        }

        let slot = self.current;
        let frame = self.frames_submitted;

        // Throttle
        self.wait_slot(backend, slot)?;

        // Acquire
        self.slots[slot].state = SlotState::Acquiring;
        let (image_index, acquire_suboptimal) =
            match backend.acquire_next_image(self.slots[slot].image_acquired, self.timeout_ns) {
                Ok(pair) => pair,
                Err(e) => {
                    self.slots[slot].state = SlotState::Idle;
                    return Err(RuntimeError::Acquire(e));
                }
            };
        let Some(command_buffer) = commands.command_buffer(image_index) else {
            self.abandon_acquire(backend, slot, image_index);
            return Err(RuntimeError::MissingCommands {
                image_index,
                available: commands.len(),
            });
        };

        // Hazard check
        let mut hazard_waited = false;
        if let Some(prev) = self.guard.owner(image_index as usize) {
            if prev.slot != slot && self.slots[prev.slot].still_running(prev) {
                debug!(
                    "frame {frame}: image {image_index} still in use by frame {} (slot {}), waiting",
                    prev.frame, prev.slot
                );
                if let Err(e) = self.wait_slot(backend, prev.slot) {
                    self.abandon_acquire(backend, slot, image_index);
                    return Err(e);
                }
                hazard_waited = true;
            }
        }
        self.guard.assign(image_index as usize, GuardEntry { slot, frame });

        // Reset + submit
        if let Err(result) = backend.reset_fence(self.slots[slot].frame_complete) {
            self.abandon_acquire(backend, slot, image_index);
            return Err(RuntimeError::FenceWait { slot, result });
        }
        let s = &self.slots[slot];
        let submission = FrameSubmission {
            image_index,
            command_buffer,
            wait_semaphore: s.image_acquired,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: s.render_finished,
            fence: s.frame_complete,
        };
        if let Err(result) = backend.submit(&submission) {
            // The fence is unsignaled but nothing will signal it; Idle keeps the
            // next throttle from waiting on it.
            self.slots[slot].state = SlotState::Idle;
            return Err(RuntimeError::FrameSubmission {
                image_index,
                result,
            });
        }
        self.slots[slot].state = SlotState::Submitted;
        self.slots[slot].frame = Some(frame);
        self.frames_submitted += 1;

        // Present, then advance whatever the result.
        let presented = backend.present(image_index, self.slots[slot].render_finished);
        self.current = (slot + 1) % self.slots.len();
        let present_suboptimal = presented.map_err(|result| RuntimeError::Presentation {
            image_index,
            result,
        })?;

        trace!("frame {frame}: slot {slot}, image {image_index}");
        Ok(FrameOutcome {
            frame,
            slot,
            image_index,
            suboptimal: acquire_suboptimal || present_suboptimal,
            hazard_waited,
        })
    }

    /// Blocks until every outstanding submission has retired.
    pub fn wait_idle<B: FrameBackend + ?Sized>(&mut self, backend: &B) -> Result<(), RuntimeError> {
        for slot in 0..self.slots.len() {
            self.wait_slot(backend, slot)?;
        }
        Ok(())
    }

    /// Drains the slots and starts tracking a freshly built chain of
    /// `image_count` images. Commands must be re-supplied for the new images.
    pub fn rebind_images<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &B,
        image_count: usize,
    ) -> Result<(), RuntimeError> {
        self.wait_idle(backend)?;
        self.guard.reset(image_count);
        debug!("frame pacer rebound to {image_count} images");
        Ok(())
    }

    /// Drains outstanding work and destroys every slot primitive.
    pub fn destroy<B: FrameBackend + ?Sized>(&mut self, backend: &B) {
        if let Err(e) = self.wait_idle(backend) {
            warn!("destroying frame pacer with work outstanding: {e}");
        }
        for slot in self.slots.drain(..) {
            destroy_slot(backend, &slot);
        }
        self.guard.reset(0);
        self.current = 0;
    }

    /// Hands an acquired image back without rendering it: a wait-only
    /// submission consumes the image-acquired signal and signals the slot's
    /// fence, leaving the slot `Submitted` with no frame. If that submission
    /// fails the slot goes `Idle` and its semaphore keeps the pending signal.
    fn abandon_acquire<B: FrameBackend + ?Sized>(&mut self, backend: &B, slot: usize, image_index: u32) {
        let s = &mut self.slots[slot];
        let release = FrameSubmission {
            image_index,
            command_buffer: vk::CommandBuffer::null(),
            wait_semaphore: s.image_acquired,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: vk::Semaphore::null(),
            fence: s.frame_complete,
        };
        let released = backend
            .reset_fence(s.frame_complete)
            .and_then(|()| backend.submit(&release));
        s.frame = None;
        match released {
            Ok(()) => s.state = SlotState::Submitted,
            Err(e) => {
                s.state = SlotState::Idle;
                warn!("slot {slot}: could not release image {image_index} ({e:?}); its semaphore stays signaled");
            }
        }
    }

    fn wait_slot<B: FrameBackend + ?Sized>(&mut self, backend: &B, slot: usize) -> Result<(), RuntimeError> {
        let s = &mut self.slots[slot];
        if !s.is_pending() {
            return Ok(());
        }
        match backend.wait_for_fence(s.frame_complete, self.timeout_ns) {
            Ok(()) => {
                s.state = SlotState::Idle;
                Ok(())
            }
            Err(vk::Result::TIMEOUT) => Err(RuntimeError::FenceTimeout {
                slot,
                timeout_ns: self.timeout_ns,
            }),
            Err(result) => Err(RuntimeError::FenceWait { slot, result }),
        }
    }
}

fn create_slot<B: FrameBackend + ?Sized>(backend: &B) -> VkResult<FrameSlot> {
    let image_acquired = backend.create_semaphore()?;
    let render_finished = match backend.create_semaphore() {
        Ok(s) => s,
        Err(e) => {
            backend.destroy_semaphore(image_acquired);
            return Err(e);
        }
    };
    let frame_complete = match backend.create_fence(true) {
        Ok(f) => f,
        Err(e) => {
            backend.destroy_semaphore(image_acquired);
            backend.destroy_semaphore(render_finished);
            return Err(e);
        }
    };
    Ok(FrameSlot::new(image_acquired, render_finished, frame_complete))
}

fn destroy_slot<B: FrameBackend + ?Sized>(backend: &B, slot: &FrameSlot) {
    backend.destroy_fence(slot.frame_complete);
    backend.destroy_semaphore(slot.render_finished);
    backend.destroy_semaphore(slot.image_acquired);
}
