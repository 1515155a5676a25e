//! Sighting de-duplication.
//!
//! `SightingDebouncer` turns the noisy per-frame "monkey / no monkey" stream into
//! discrete sighting episodes:
//!
//! - The first positive frame after an absence starts a sighting (count + 1).
//! - Positive frames while present are `Ongoing` and never re-trigger the alert.
//! - A sighting ends only after `gap_frames` consecutive negative frames, so a
//!   subject the detector loses for a few frames (occlusion, stillness) is not
//!   counted twice.
//!
//! The debouncer is a plain synchronous state machine. It performs no I/O and
//! has no interior mutability; the session that owns it dispatches events to
//! alert sinks and observers.

use anyhow::{anyhow, Result};
use std::time::SystemTime;

/// Consecutive non-detections before a present subject counts as departed.
/// 30 frames is about 3 seconds at the default 10 fps polling rate.
pub const DEFAULT_GAP_FRAMES: u32 = 30;

/// Per-frame detector output, reduced to one presence bit and a confidence.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameSignal {
    pub detected: bool,
    /// Max confidence over qualifying detections, 0 when none qualify.
    pub confidence: f32,
}

impl FrameSignal {
    pub fn present(confidence: f32) -> Self {
        Self {
            detected: true,
            confidence,
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SightingPhase {
    Absent,
    Present,
}

/// Event produced by every call to [`SightingDebouncer::observe`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SightingEvent {
    /// A new subject arrived. `count` is the running unique-sighting count.
    Started { count: u64, confidence: f32 },
    /// The same subject is still in frame.
    Ongoing { confidence: f32 },
    /// Nothing to report. `absent_run` is the current run of empty frames.
    Idle { absent_run: u32 },
    /// The subject has been gone for `gap_frames` consecutive frames.
    Ended,
}

impl SightingEvent {
    pub fn is_started(&self) -> bool {
        matches!(self, SightingEvent::Started { .. })
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, SightingEvent::Ended)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SightingState {
    pub present: bool,
    /// Consecutive empty frames since the subject was last seen.
    /// Only meaningful while `present`.
    pub absent_run_length: u32,
    pub sighting_count: u64,
    /// Start of the current (or most recent) sighting.
    pub started_at: Option<SystemTime>,
}

impl SightingState {
    pub fn phase(&self) -> SightingPhase {
        if self.present {
            SightingPhase::Present
        } else {
            SightingPhase::Absent
        }
    }
}

#[derive(Clone, Debug)]
pub struct SightingDebouncer {
    gap_frames: u32,
    state: SightingState,
}

impl SightingDebouncer {
    pub fn new(gap_frames: u32) -> Result<Self> {
        if gap_frames == 0 {
            return Err(anyhow!("gap_frames must be greater than zero"));
        }
        Ok(Self {
            gap_frames,
            state: SightingState::default(),
        })
    }

    pub fn gap_frames(&self) -> u32 {
        self.gap_frames
    }

    pub fn state(&self) -> &SightingState {
        &self.state
    }

    pub fn phase(&self) -> SightingPhase {
        self.state.phase()
    }

    pub fn sighting_count(&self) -> u64 {
        self.state.sighting_count
    }

    /// Advance the state machine by one frame.
    ///
    /// `signal.confidence` is passed through as-is; thresholding is the
    /// detector's job.
    pub fn observe(&mut self, signal: FrameSignal) -> SightingEvent {
        if signal.detected {
            self.state.absent_run_length = 0;
            if self.state.present {
                return SightingEvent::Ongoing {
                    confidence: signal.confidence,
                };
            }
            self.state.present = true;
            self.state.started_at = Some(SystemTime::now());
            self.state.sighting_count += 1;
            return SightingEvent::Started {
                count: self.state.sighting_count,
                confidence: signal.confidence,
            };
        }

        self.state.absent_run_length = self.state.absent_run_length.saturating_add(1);
        if self.state.present && self.state.absent_run_length >= self.gap_frames {
            self.state.present = false;
            self.state.absent_run_length = 0;
            return SightingEvent::Ended;
        }
        SightingEvent::Idle {
            absent_run: self.state.absent_run_length,
        }
    }

    /// Forget all session state. Called when a stopped session is restarted.
    pub fn reset(&mut self) {
        self.state = SightingState::default();
    }
}

impl Default for SightingDebouncer {
    fn default() -> Self {
        Self {
            gap_frames: DEFAULT_GAP_FRAMES,
            state: SightingState::default(),
        }
    }
}
