//! Monkey Watch
//!
//! Watches a camera feed for monkeys and drives a buzzer (or an MQTT topic)
//! when one shows up.
//!
//! # Architecture
//!
//! Detection runs per frame and is noisy: a monkey that ducks behind a bush
//! for a second must not count as a second visit. The pipeline is:
//!
//! 1. **Ingest**: a `FrameSource` yields one frame per poll cycle.
//! 2. **Detect**: a `DetectorBackend` reports bounding boxes; the boxes are
//!    reduced to one `FrameSignal` per frame.
//! 3. **Debounce**: `SightingDebouncer` turns the per-frame signal stream
//!    into sighting start / end events, tolerating up to `gap_frames`
//!    consecutive misses.
//! 4. **React**: `Started` activates the alert sink, `Ended` deactivates it,
//!    and every event goes to the presentation observers.
//!
//! # Module Structure
//!
//! - `debounce`: the sighting state machine (no I/O, no threads)
//! - `frame`: RGB frames
//! - `detect`: detector backends and the backend registry
//! - `ingest`: frame sources (synthetic, V4L2, image directory)
//! - `alert`: alert sinks (line protocol, serial, MQTT)
//! - `present`, `ui`, `journal`, `snapshot`: observers
//! - `session`: start/stop, worker thread, event dispatch
//! - `config`: file + environment configuration

pub mod alert;
pub mod config;
pub mod debounce;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod journal;
pub mod present;
pub mod session;
#[cfg(feature = "snapshot")]
pub mod snapshot;
pub mod ui;

pub use alert::{open_alert_sink, AlertCommand, AlertSink, LineLink, LogAlertSink};
pub use config::{AlertKind, AlertSettings, DetectorSettings, SourceSettings, WatchConfig};
pub use debounce::{
    FrameSignal, SightingDebouncer, SightingEvent, SightingPhase, SightingState,
    DEFAULT_GAP_FRAMES,
};
pub use detect::{
    BackendRegistry, ConfidenceBand, Detection, DetectionResult, DetectorBackend, MotionBackend,
    SharedBackend, StubBackend,
};
pub use frame::Frame;
pub use ingest::{FrameSource, SourceOpener, SourceStats};
pub use journal::{SightingJournal, SightingRecord};
pub use present::{status_text, LogObserver, ObserverSet, SessionPhase, SightingObserver};
pub use session::{CycleStats, PumpOutcome, SessionSettings, WatchSession};
#[cfg(feature = "snapshot")]
pub use snapshot::SnapshotWriter;
