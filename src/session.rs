//! Watch session: start/stop surface and the inference worker.
//!
//! The worker thread owns the frame source. Each cycle it grabs a frame, runs
//! the detector and sends the frame with its `FrameSignal` back over a
//! channel. The debouncer lives in the session itself and is only touched
//! from `pump` / `handle_signal`, i.e. from whichever thread owns the
//! `WatchSession`.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alert::AlertSink;
use crate::config::WatchConfig;
use crate::debounce::{FrameSignal, SightingDebouncer, SightingEvent};
use crate::detect::{Detection, SharedBackend};
use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceOpener};
use crate::present::{SessionPhase, SightingObserver};

/// How long `start` waits for the worker to open and connect the source.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionSettings {
    pub confidence_threshold: f32,
    pub gap_frames: u32,
    /// Time budget per cycle. Zero runs cycles back to back.
    pub frame_interval: Duration,
}

impl SessionSettings {
    pub fn from_config(cfg: &WatchConfig) -> Self {
        Self {
            confidence_threshold: cfg.detector.confidence_threshold,
            gap_frames: cfg.gap_frames,
            frame_interval: cfg.frame_interval(),
        }
    }
}

#[derive(Debug)]
pub enum WorkerMessage {
    /// Source connected and detector warmed up.
    Ready { location: String },
    Signal {
        frame: Frame,
        signal: FrameSignal,
        detections: Vec<Detection>,
    },
    /// A cycle was skipped because the source or detector failed.
    Fault(String),
    /// The worker has exited and released the source.
    Finished,
}

/// Result of one `pump` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpOutcome {
    pub signals: usize,
    pub faults: usize,
    /// The worker ended on its own (source exhausted or gone); the session
    /// has been stopped.
    pub finished: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub skipped: u64,
    pub signals: u64,
    pub faults: u64,
    pub deadline_misses: u64,
    pub alert_failures: u64,
}

#[derive(Default)]
struct WorkerCounters {
    cycles: AtomicU64,
    skipped: AtomicU64,
    deadline_misses: AtomicU64,
}

struct Worker {
    shutdown: Arc<AtomicBool>,
    rx: Receiver<WorkerMessage>,
    join: Option<JoinHandle<()>>,
}

pub struct WatchSession {
    settings: SessionSettings,
    debouncer: SightingDebouncer,
    detector: SharedBackend,
    alert: Box<dyn AlertSink>,
    observer: Box<dyn SightingObserver>,
    worker: Option<Worker>,
    counters: Arc<WorkerCounters>,
    stats: CycleStats,
    location: Option<String>,
}

impl WatchSession {
    pub fn new(
        settings: SessionSettings,
        detector: SharedBackend,
        alert: Box<dyn AlertSink>,
        observer: Box<dyn SightingObserver>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&settings.confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold {} outside [0, 1]",
                settings.confidence_threshold
            ));
        }
        Ok(Self {
            settings,
            debouncer: SightingDebouncer::new(settings.gap_frames)?,
            detector,
            alert,
            observer,
            worker: None,
            counters: Arc::new(WorkerCounters::default()),
            stats: CycleStats::default(),
            location: None,
        })
    }

    /// Reset sighting state, then open the source on a fresh worker thread.
    ///
    /// Returns once the source is connected, or with the worker's error if
    /// opening, connecting or warming up the detector failed.
    pub fn start(&mut self, opener: SourceOpener) -> Result<()> {
        if self.worker.is_some() {
            return Err(anyhow!("watch session is already running"));
        }
        self.debouncer.reset();
        self.stats = CycleStats::default();
        self.counters = Arc::new(WorkerCounters::default());

        let (tx, rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext {
            detector: self.detector.clone(),
            threshold: self.settings.confidence_threshold,
            interval: self.settings.frame_interval,
            shutdown: shutdown.clone(),
            counters: self.counters.clone(),
            tx,
        };
        let join = std::thread::Builder::new()
            .name("monkey-watch-worker".to_string())
            .spawn(move || run_worker(opener, ctx))
            .context("spawn inference worker")?;
        let mut worker = Worker {
            shutdown,
            rx,
            join: Some(join),
        };

        match worker.rx.recv_timeout(CONNECT_TIMEOUT) {
            Ok(WorkerMessage::Ready { location }) => {
                log::info!("watching {}", location);
                self.location = Some(location);
            }
            Ok(WorkerMessage::Fault(message)) => {
                worker.join()?;
                return Err(anyhow!("session start failed: {}", message));
            }
            Ok(other) => {
                worker.join()?;
                return Err(anyhow!("session start failed: unexpected {:?}", other));
            }
            Err(RecvTimeoutError::Timeout) => {
                // Leave the thread to notice the flag once the opener returns.
                worker.shutdown.store(true, Ordering::SeqCst);
                return Err(anyhow!(
                    "source did not connect within {}s",
                    CONNECT_TIMEOUT.as_secs()
                ));
            }
            Err(RecvTimeoutError::Disconnected) => {
                worker.join()?;
                return Err(anyhow!("inference worker exited during start"));
            }
        }

        self.worker = Some(worker);
        self.observer.on_session(SessionPhase::Started);
        Ok(())
    }

    /// Stop the worker and release the source.
    ///
    /// Signals the worker has produced but `pump` has not consumed are
    /// discarded. Sighting state stays as it is until the next `start`.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };
        worker.shutdown.store(true, Ordering::SeqCst);
        let joined = worker.join();

        let discarded = worker
            .rx
            .try_iter()
            .filter(|msg| matches!(msg, WorkerMessage::Signal { .. }))
            .count();
        if discarded > 0 {
            log::debug!("discarded {} undelivered signal(s) on stop", discarded);
        }

        if let Err(e) = self.alert.deactivate() {
            self.stats.alert_failures += 1;
            log::warn!("{} alert: deactivate on stop failed: {:#}", self.alert.name(), e);
        }
        self.location = None;
        self.observer.on_session(SessionPhase::Stopped);
        joined
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Deliver worker messages for up to `timeout`.
    ///
    /// Blocks for the first message, then drains whatever else is queued.
    pub fn pump(&mut self, timeout: Duration) -> Result<PumpOutcome> {
        let mut outcome = PumpOutcome::default();
        let first = {
            let worker = self
                .worker
                .as_ref()
                .ok_or_else(|| anyhow!("watch session is not running"))?;
            match worker.rx.recv_timeout(timeout) {
                Ok(msg) => Some(msg),
                Err(RecvTimeoutError::Timeout) => return Ok(outcome),
                Err(RecvTimeoutError::Disconnected) => None,
            }
        };

        let mut next = first;
        loop {
            match next {
                Some(WorkerMessage::Signal {
                    frame,
                    signal,
                    detections,
                }) => {
                    self.observer.on_detections(&frame, &detections);
                    self.handle_signal(signal);
                    outcome.signals += 1;
                }
                Some(WorkerMessage::Fault(message)) => {
                    self.stats.faults += 1;
                    outcome.faults += 1;
                    self.observer.on_fault(&message);
                }
                Some(WorkerMessage::Ready { .. }) => {}
                Some(WorkerMessage::Finished) | None => {
                    outcome.finished = true;
                    break;
                }
            }
            next = match self.worker.as_ref().map(|w| w.rx.try_recv()) {
                Some(Ok(msg)) => Some(msg),
                Some(Err(TryRecvError::Empty)) => break,
                Some(Err(TryRecvError::Disconnected)) | None => None,
            };
        }

        if outcome.finished {
            log::info!("inference worker finished; stopping session");
            self.stop()?;
        }
        Ok(outcome)
    }

    /// Advance the debouncer with one signal and dispatch the event.
    ///
    /// `Started` activates the alert, `Ended` deactivates it. Alert failures
    /// are logged and counted; they never roll back sighting state.
    pub fn handle_signal(&mut self, signal: FrameSignal) -> SightingEvent {
        self.stats.signals += 1;
        let event = self.debouncer.observe(signal);
        let delivery = match event {
            SightingEvent::Started { .. } => Some(self.alert.activate()),
            SightingEvent::Ended => Some(self.alert.deactivate()),
            SightingEvent::Ongoing { .. } | SightingEvent::Idle { .. } => None,
        };
        if let Some(Err(e)) = delivery {
            self.stats.alert_failures += 1;
            log::warn!("{} alert delivery failed: {:#}", self.alert.name(), e);
        }
        self.observer.on_event(&event, self.debouncer.state());
        event
    }

    pub fn sighting_count(&self) -> u64 {
        self.debouncer.sighting_count()
    }

    pub fn debouncer(&self) -> &SightingDebouncer {
        &self.debouncer
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Where the current source reads from, while running.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn cycle_stats(&self) -> CycleStats {
        CycleStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            deadline_misses: self.counters.deadline_misses.load(Ordering::Relaxed),
            ..self.stats
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("watch session stop on drop failed: {:#}", e);
        }
    }
}

impl Worker {
    fn join(&mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("inference worker thread panicked"))?;
        }
        Ok(())
    }
}

struct WorkerContext {
    detector: SharedBackend,
    threshold: f32,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
    tx: Sender<WorkerMessage>,
}

fn run_worker(opener: SourceOpener, ctx: WorkerContext) {
    let mut source = match open_source(opener, &ctx.detector) {
        Ok(source) => source,
        Err(e) => {
            let _ = ctx.tx.send(WorkerMessage::Fault(format!("{:#}", e)));
            let _ = ctx.tx.send(WorkerMessage::Finished);
            return;
        }
    };
    let location = source.stats().location;
    if ctx.tx.send(WorkerMessage::Ready { location }).is_err() {
        return;
    }

    while !ctx.shutdown.load(Ordering::SeqCst) {
        if source.is_exhausted() {
            log::info!("source {} exhausted", source.stats().location);
            break;
        }
        let cycle_start = Instant::now();
        ctx.counters.cycles.fetch_add(1, Ordering::Relaxed);

        let message = match run_cycle(source.as_mut(), &ctx) {
            Ok(Some(message)) => Some(message),
            Ok(None) => {
                ctx.counters.skipped.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                ctx.counters.skipped.fetch_add(1, Ordering::Relaxed);
                Some(WorkerMessage::Fault(format!("{:#}", e)))
            }
        };
        if let Some(message) = message {
            if ctx.tx.send(message).is_err() {
                break;
            }
        }

        if !ctx.interval.is_zero() {
            let elapsed = cycle_start.elapsed();
            if elapsed > ctx.interval {
                ctx.counters.deadline_misses.fetch_add(1, Ordering::Relaxed);
                log::trace!("cycle overran by {:?}", elapsed - ctx.interval);
            } else {
                std::thread::sleep(ctx.interval - elapsed);
            }
        }
    }

    let stats = source.stats();
    drop(source);
    log::debug!(
        "released {} after {} frame(s), {} skipped",
        stats.location,
        stats.frames_captured,
        stats.frames_skipped
    );
    let _ = ctx.tx.send(WorkerMessage::Finished);
}

fn open_source(opener: SourceOpener, detector: &SharedBackend) -> Result<Box<dyn FrameSource>> {
    let mut source = opener().context("open frame source")?;
    source.connect().context("connect frame source")?;
    let mut backend = detector
        .lock()
        .map_err(|_| anyhow!("detector lock poisoned"))?;
    backend
        .warm_up()
        .with_context(|| format!("warm up {} detector", backend.name()))?;
    Ok(source)
}

fn run_cycle(source: &mut dyn FrameSource, ctx: &WorkerContext) -> Result<Option<WorkerMessage>> {
    let Some(frame) = source.next_frame().context("frame source read")? else {
        return Ok(None);
    };
    let result = {
        let mut backend = ctx
            .detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        backend
            .detect(&frame, ctx.threshold)
            .with_context(|| format!("{} detector on frame {}", backend.name(), frame.seq))?
    };
    let signal = result.to_signal()?;
    Ok(Some(WorkerMessage::Signal {
        frame,
        signal,
        detections: result.detections,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertCommand;
    use crate::debounce::SightingState;
    use crate::detect::{DetectionResult, DetectorBackend, StubBackend};
    use crate::ingest::{SourceStats, SyntheticConfig, SyntheticSource};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingAlert {
        sent: Arc<Mutex<Vec<AlertCommand>>>,
        fail: bool,
    }

    impl AlertSink for RecordingAlert {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn send(&mut self, command: AlertCommand) -> Result<()> {
            self.sent.lock().unwrap().push(command);
            if self.fail {
                return Err(anyhow!("buzzer unplugged"));
            }
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingObserver {
        events: Arc<Mutex<Vec<SightingEvent>>>,
        faults: Arc<Mutex<Vec<String>>>,
        phases: Arc<Mutex<Vec<SessionPhase>>>,
    }

    impl SightingObserver for RecordingObserver {
        fn on_event(&mut self, event: &SightingEvent, _state: &SightingState) {
            self.events.lock().unwrap().push(*event);
        }

        fn on_fault(&mut self, message: &str) {
            self.faults.lock().unwrap().push(message.to_string());
        }

        fn on_session(&mut self, phase: SessionPhase) {
            self.phases.lock().unwrap().push(phase);
        }
    }

    struct BrokenSource;

    impl FrameSource for BrokenSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            Err(anyhow!("camera read failed"))
        }

        fn is_healthy(&self) -> bool {
            false
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                location: "broken".to_string(),
                ..SourceStats::default()
            }
        }
    }

    fn settings(gap_frames: u32) -> SessionSettings {
        SessionSettings {
            confidence_threshold: 0.5,
            gap_frames,
            frame_interval: Duration::ZERO,
        }
    }

    fn shared<B: DetectorBackend + 'static>(backend: B) -> SharedBackend {
        Arc::new(Mutex::new(backend))
    }

    fn session(
        gap_frames: u32,
        backend: SharedBackend,
        alert: RecordingAlert,
        observer: RecordingObserver,
    ) -> WatchSession {
        WatchSession::new(
            settings(gap_frames),
            backend,
            Box::new(alert),
            Box::new(observer),
        )
        .unwrap()
    }

    fn synthetic(frames: u64) -> SourceOpener {
        Box::new(move || {
            Ok(Box::new(SyntheticSource::new(SyntheticConfig {
                name: "test".to_string(),
                width: 16,
                height: 12,
                frame_limit: Some(frames),
            })) as Box<dyn FrameSource>)
        })
    }

    fn pump_until_finished(session: &mut WatchSession) -> usize {
        let mut signals = 0;
        for _ in 0..1000 {
            let outcome = session.pump(Duration::from_millis(200)).unwrap();
            signals += outcome.signals;
            if outcome.finished {
                return signals;
            }
        }
        panic!("worker never finished");
    }

    fn signal(detected: bool) -> FrameSignal {
        if detected {
            FrameSignal::present(0.9)
        } else {
            FrameSignal::absent()
        }
    }

    #[test]
    fn one_activate_per_sighting() {
        let alert = RecordingAlert::default();
        let mut session = session(
            3,
            shared(StubBackend::default()),
            alert.clone(),
            RecordingObserver::default(),
        );
        for detected in [true, true, false, false, false, true, true] {
            session.handle_signal(signal(detected));
        }
        assert_eq!(session.sighting_count(), 2);
        assert_eq!(
            *alert.sent.lock().unwrap(),
            vec![
                AlertCommand::Activate,
                AlertCommand::Deactivate,
                AlertCommand::Activate
            ]
        );
    }

    #[test]
    fn alert_failures_do_not_desync_sightings() {
        let alert = RecordingAlert {
            fail: true,
            ..RecordingAlert::default()
        };
        let observer = RecordingObserver::default();
        let mut session = session(
            2,
            shared(StubBackend::default()),
            alert.clone(),
            observer.clone(),
        );
        let first = session.handle_signal(signal(true));
        assert!(first.is_started());
        session.handle_signal(signal(false));
        assert!(session.handle_signal(signal(false)).is_ended());
        assert!(session.handle_signal(signal(true)).is_started());

        assert_eq!(session.sighting_count(), 2);
        assert_eq!(session.cycle_stats().alert_failures, 3);
        assert_eq!(observer.events.lock().unwrap().len(), 4);
    }

    #[test]
    fn runs_a_scripted_scene_to_completion() {
        let alert = RecordingAlert::default();
        let observer = RecordingObserver::default();
        let mut session = session(
            3,
            shared(StubBackend::from_pattern("TTFFFTTFT", 0.9)),
            alert.clone(),
            observer.clone(),
        );
        session.start(synthetic(9)).unwrap();
        assert!(session.is_running());
        assert_eq!(session.location(), Some("stub://test"));

        let signals = pump_until_finished(&mut session);
        assert_eq!(signals, 9);
        assert!(!session.is_running());
        assert_eq!(session.sighting_count(), 2);
        assert_eq!(session.cycle_stats().cycles, 9);

        // Stop always ends with a best-effort deactivate.
        assert_eq!(
            *alert.sent.lock().unwrap(),
            vec![
                AlertCommand::Activate,
                AlertCommand::Deactivate,
                AlertCommand::Activate,
                AlertCommand::Deactivate
            ]
        );
        assert_eq!(
            *observer.phases.lock().unwrap(),
            vec![SessionPhase::Started, SessionPhase::Stopped]
        );
    }

    #[test]
    fn restart_resets_sighting_count() {
        let stub = Arc::new(Mutex::new(StubBackend::from_pattern("TTT", 0.8)));
        let backend: SharedBackend = stub.clone();
        let mut session = session(
            5,
            backend,
            RecordingAlert::default(),
            RecordingObserver::default(),
        );
        session.start(synthetic(3)).unwrap();
        pump_until_finished(&mut session);
        assert_eq!(session.sighting_count(), 1);
        assert!(session.debouncer().state().present);

        *stub.lock().unwrap() = StubBackend::from_pattern("FF", 0.8);
        session.start(synthetic(2)).unwrap();
        assert_eq!(session.sighting_count(), 0);
        pump_until_finished(&mut session);
        assert_eq!(session.sighting_count(), 0);
        assert!(!session.debouncer().state().present);
    }

    #[test]
    fn faults_skip_cycles_without_touching_state() {
        let observer = RecordingObserver::default();
        let mut session = session(
            3,
            shared(StubBackend::default()),
            RecordingAlert::default(),
            observer.clone(),
        );
        session
            .start(Box::new(|| Ok(Box::new(BrokenSource) as Box<dyn FrameSource>)))
            .unwrap();
        let mut faults = 0;
        while faults < 3 {
            faults += session.pump(Duration::from_millis(200)).unwrap().faults;
        }
        session.stop().unwrap();

        assert!(observer.events.lock().unwrap().is_empty());
        assert!(observer.faults.lock().unwrap()[0].contains("camera read failed"));
        assert_eq!(session.sighting_count(), 0);
        assert_eq!(session.debouncer().state(), &SightingState::default());
        assert!(session.cycle_stats().faults >= 3);
    }

    #[test]
    fn start_reports_open_failures() {
        let mut session = session(
            3,
            shared(StubBackend::default()),
            RecordingAlert::default(),
            RecordingObserver::default(),
        );
        let err = session
            .start(Box::new(|| Err(anyhow!("no such camera"))))
            .unwrap_err();
        assert!(err.to_string().contains("no such camera"));
        assert!(!session.is_running());
        assert!(session.pump(Duration::ZERO).is_err());
    }

    #[test]
    fn double_start_is_rejected() {
        let mut session = session(
            3,
            shared(StubBackend::default()),
            RecordingAlert::default(),
            RecordingObserver::default(),
        );
        session.start(synthetic(1_000_000)).unwrap();
        assert!(session.start(synthetic(1)).is_err());
        session.stop().unwrap();
        assert!(!session.is_running());
        session.stop().unwrap();
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let backend = shared(StubBackend::default());
        let mut bad = settings(0);
        assert!(WatchSession::new(
            bad,
            backend.clone(),
            Box::new(RecordingAlert::default()),
            Box::new(RecordingObserver::default())
        )
        .is_err());
        bad = settings(3);
        bad.confidence_threshold = 1.5;
        assert!(WatchSession::new(
            bad,
            backend,
            Box::new(RecordingAlert::default()),
            Box::new(RecordingObserver::default())
        )
        .is_err());
    }

    #[test]
    fn detector_errors_become_faults() {
        struct Failing;
        impl DetectorBackend for Failing {
            fn name(&self) -> &'static str {
                "failing"
            }
            fn detect(&mut self, _frame: &Frame, _threshold: f32) -> Result<DetectionResult> {
                Err(anyhow!("inference crashed"))
            }
        }

        let observer = RecordingObserver::default();
        let mut session = session(
            3,
            shared(Failing),
            RecordingAlert::default(),
            observer.clone(),
        );
        session.start(synthetic(2)).unwrap();
        pump_until_finished(&mut session);
        let faults = observer.faults.lock().unwrap();
        assert_eq!(faults.len(), 2);
        assert!(faults[0].contains("failing detector on frame"));
        assert!(observer.events.lock().unwrap().is_empty());
    }
}
