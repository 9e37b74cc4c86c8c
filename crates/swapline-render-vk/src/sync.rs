// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

/// Where a frame slot is in its acquire/submit cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled, or the last submit never reached the queue.
    Idle,
    /// Image requested; the acquire semaphore is pending.
    Acquiring,
    /// Work is on the queue and the fence will signal when it retires.
    Submitted,
}

/// One in-flight frame's worth of synchronization.
#[derive(Debug)]
pub struct FrameSlot {
    pub image_acquired: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first throttle on each slot falls through.
    pub frame_complete: vk::Fence,
    pub state: SlotState,
    /// Frame number of the most recent submission from this slot. `None`
    /// while the pending work is only an image release.
    pub frame: Option<u64>,
}

impl FrameSlot {
    pub fn new(
        image_acquired: vk::Semaphore,
        render_finished: vk::Semaphore,
        frame_complete: vk::Fence,
    ) -> Self {
        Self {
            image_acquired,
            render_finished,
            frame_complete,
            state: SlotState::Idle,
            frame: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == SlotState::Submitted
    }

    /// True while the submission recorded in `entry` has not retired.
    pub fn still_running(&self, entry: GuardEntry) -> bool {
        self.is_pending() && self.frame == Some(entry.frame)
    }
}

/// Which slot, and which of its frames, last targeted an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuardEntry {
    pub slot: usize,
    pub frame: u64,
}

/// One entry per presentable image; `None` means unguarded.
#[derive(Clone, Debug, Default)]
pub struct ImageGuard {
    owners: Vec<Option<GuardEntry>>,
}

impl ImageGuard {
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, image: usize) -> Option<GuardEntry> {
        self.owners.get(image).copied().flatten()
    }

    /// Records the latest user of `image`, returning the one it replaces.
    pub fn assign(&mut self, image: usize, entry: GuardEntry) -> Option<GuardEntry> {
        if image >= self.owners.len() {
            self.owners.resize(image + 1, None);
        }
        self.owners[image].replace(entry)
    }

    /// Forgets every assignment and resizes to `image_count`.
    pub fn reset(&mut self, image_count: usize) {
        self.owners.clear();
        self.owners.resize(image_count, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(slot: usize, frame: u64) -> GuardEntry {
        GuardEntry { slot, frame }
    }

    #[test]
    fn guard_starts_unguarded() {
        let g = ImageGuard::new(3);
        assert_eq!(g.len(), 3);
        assert!((0..3).all(|i| g.owner(i).is_none()));
        assert_eq!(g.owner(7), None);
    }

    #[test]
    fn assign_returns_previous_owner() {
        let mut g = ImageGuard::new(2);
        assert_eq!(g.assign(1, e(0, 0)), None);
        assert_eq!(g.assign(1, e(1, 1)), Some(e(0, 0)));
        assert_eq!(g.owner(1), Some(e(1, 1)));
        assert_eq!(g.owner(0), None);
    }

    #[test]
    fn reset_clears_and_resizes() {
        let mut g = ImageGuard::new(2);
        g.assign(0, e(1, 4));
        g.reset(4);
        assert_eq!(g.len(), 4);
        assert!((0..4).all(|i| g.owner(i).is_none()));
    }

    #[test]
    fn out_of_range_image_grows_guard() {
        let mut g = ImageGuard::new(2);
        assert_eq!(g.assign(3, e(0, 9)), None);
        assert_eq!(g.len(), 4);
        assert_eq!(g.owner(3), Some(e(0, 9)));
    }

    #[test]
    fn reused_slot_no_longer_guards_old_frame() {
        let mut slot = FrameSlot::new(
            vk::Semaphore::null(),
            vk::Semaphore::null(),
            vk::Fence::null(),
        );
        slot.state = SlotState::Submitted;
        slot.frame = Some(2);
        assert!(slot.still_running(e(0, 2)));
        assert!(!slot.still_running(e(0, 0)));

        slot.state = SlotState::Idle;
        assert!(!slot.still_running(e(0, 2)));
    }
}
