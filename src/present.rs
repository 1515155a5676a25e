//! Presentation hooks.
//!
//! Observers are told about every sighting event, every frame's detections
//! (for overlays), worker faults and session start/stop. They run in the
//! session's owning context, right after the debouncer has been advanced.

use crate::debounce::{SightingEvent, SightingState};
use crate::detect::Detection;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Started,
    Stopped,
}

pub trait SightingObserver: Send {
    fn on_event(&mut self, event: &SightingEvent, state: &SightingState);

    /// The frame and detections behind the next signal. Called before
    /// `on_event`, for overlays and snapshots.
    fn on_detections(&mut self, _frame: &Frame, _detections: &[Detection]) {}

    fn on_fault(&mut self, _message: &str) {}

    fn on_session(&mut self, _phase: SessionPhase) {}
}

/// One-line status for the current event, as shown next to the video.
pub fn status_text(event: &SightingEvent) -> String {
    match event {
        SightingEvent::Started { confidence, .. } => {
            format!("NEW MONKEY DETECTED! ({:.2})", confidence)
        }
        SightingEvent::Ongoing { confidence } => {
            format!("Tracking same monkey ({:.2})", confidence)
        }
        SightingEvent::Idle { .. } | SightingEvent::Ended => "Monitoring...".to_string(),
    }
}

/// Logs sighting transitions through the `log` facade.
#[derive(Default)]
pub struct LogObserver;

impl SightingObserver for LogObserver {
    fn on_event(&mut self, event: &SightingEvent, state: &SightingState) {
        match event {
            SightingEvent::Started { count, confidence } => {
                log::info!(
                    "NEW MONKEY DETECTED! count={} confidence={:.2}",
                    count,
                    confidence
                );
            }
            SightingEvent::Ended => {
                log::info!(
                    "monkey left area after {} sighting(s); ready for new detection",
                    state.sighting_count
                );
            }
            SightingEvent::Ongoing { confidence } => {
                log::trace!("tracking same monkey confidence={:.2}", confidence);
            }
            SightingEvent::Idle { absent_run } => {
                if state.present {
                    log::debug!("subject not seen for {} frame(s)", absent_run);
                }
            }
        }
    }

    fn on_detections(&mut self, frame: &Frame, detections: &[Detection]) {
        for det in detections {
            log::debug!(
                "frame {}: box ({:.2},{:.2} {:.2}x{:.2}) conf={:.2} band={:?}",
                frame.seq,
                det.x,
                det.y,
                det.w,
                det.h,
                det.confidence,
                det.band()
            );
        }
    }

    fn on_fault(&mut self, message: &str) {
        log::warn!("detection cycle skipped: {}", message);
    }

    fn on_session(&mut self, phase: SessionPhase) {
        match phase {
            SessionPhase::Started => log::info!("detection session started"),
            SessionPhase::Stopped => log::info!("detection session stopped"),
        }
    }
}

/// Fans every callback out to a list of observers, in order.
#[derive(Default)]
pub struct ObserverSet {
    observers: Vec<Box<dyn SightingObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<O: SightingObserver + 'static>(mut self, observer: O) -> Self {
        self.push(observer);
        self
    }

    pub fn push<O: SightingObserver + 'static>(&mut self, observer: O) {
        self.observers.push(Box::new(observer));
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl SightingObserver for ObserverSet {
    fn on_event(&mut self, event: &SightingEvent, state: &SightingState) {
        for observer in &mut self.observers {
            observer.on_event(event, state);
        }
    }

    fn on_detections(&mut self, frame: &Frame, detections: &[Detection]) {
        for observer in &mut self.observers {
            observer.on_detections(frame, detections);
        }
    }

    fn on_fault(&mut self, message: &str) {
        for observer in &mut self.observers {
            observer.on_fault(message);
        }
    }

    fn on_session(&mut self, phase: SessionPhase) {
        for observer in &mut self.observers {
            observer.on_session(phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Counting(Arc<Mutex<Vec<String>>>);

    impl SightingObserver for Counting {
        fn on_event(&mut self, event: &SightingEvent, _state: &SightingState) {
            self.0.lock().unwrap().push(status_text(event));
        }

        fn on_fault(&mut self, message: &str) {
            self.0.lock().unwrap().push(format!("fault: {}", message));
        }
    }

    #[test]
    fn status_text_matches_viewer_strings() {
        assert_eq!(
            status_text(&SightingEvent::Started {
                count: 1,
                confidence: 0.914
            }),
            "NEW MONKEY DETECTED! (0.91)"
        );
        assert_eq!(
            status_text(&SightingEvent::Ongoing { confidence: 0.876 }),
            "Tracking same monkey (0.88)"
        );
        assert_eq!(status_text(&SightingEvent::Ended), "Monitoring...");
        assert_eq!(
            status_text(&SightingEvent::Idle { absent_run: 4 }),
            "Monitoring..."
        );
    }

    #[test]
    fn observer_set_fans_out_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut set = ObserverSet::new()
            .with(Counting(seen.clone()))
            .with(Counting(seen.clone()));
        assert_eq!(set.len(), 2);

        let state = SightingState::default();
        set.on_event(&SightingEvent::Ended, &state);
        set.on_fault("camera read failed");

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "Monitoring...",
                "Monitoring...",
                "fault: camera read failed",
                "fault: camera read failed"
            ]
        );
    }
}
