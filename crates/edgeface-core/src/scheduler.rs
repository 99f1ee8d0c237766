//! Frame scheduling: full pipeline on one of every N frames.
//!
//! The decision depends only on a frame counter, never on frame content.

/// What to do with the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Run detection and classification.
    Process,
    /// Re-emit the previous results unchanged.
    Skip,
}

/// Two-state machine with a fixed period.
///
/// Frame indices `0, N, 2N, ...` are [`FramePhase::Process`]; all others are
/// [`FramePhase::Skip`]. With `N = 1` every frame is processed.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    interval: u64,
    /// Index of the next frame.
    frame_index: u64,
}

impl FrameScheduler {
    /// An interval of 0 is treated as 1.
    pub fn new(interval: u32) -> Self {
        Self {
            interval: u64::from(interval.max(1)),
            frame_index: 0,
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Number of frames scheduled so far.
    pub fn frames_seen(&self) -> u64 {
        self.frame_index
    }

    /// Phase of the frame at `index`, without advancing.
    pub fn phase_of(&self, index: u64) -> FramePhase {
        if index % self.interval == 0 {
            FramePhase::Process
        } else {
            FramePhase::Skip
        }
    }

    /// Advance to the next frame and return its index and phase.
    pub fn next_frame(&mut self) -> (u64, FramePhase) {
        let index = self.frame_index;
        self.frame_index += 1;
        (index, self.phase_of(index))
    }
}
