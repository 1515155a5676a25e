//! monkey_watchd - Monkey detection daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by MONKEY_WATCH_CONFIG, env overrides)
//! 2. Opens the alert sink (log, serial buzzer or MQTT)
//! 3. Starts a watch session on the configured frame source
//! 4. Debounces detections into sightings and alerts once per sighting
//! 5. Runs until Ctrl-C or until a finite source runs dry

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use monkey_watch::detect::BackendRegistry;
use monkey_watch::ui::Ui;
use monkey_watch::{
    ingest, open_alert_sink, LogObserver, ObserverSet, SessionSettings, SightingJournal,
    WatchConfig, WatchSession,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch a camera for monkeys and sound the buzzer")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "MONKEY_WATCH_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Stop after this many seconds (0 = run until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    run_secs: u64,

    /// UI mode for the stderr status line (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = WatchConfig::load_from(args.config.as_deref())?;
    log::info!(
        "source={} backend={} confidence>{:.2} gap_frames={} alert={:?}",
        cfg.source.url,
        cfg.detector.backend,
        cfg.detector.confidence_threshold,
        cfg.gap_frames,
        cfg.alert.kind
    );

    let registry = BackendRegistry::from_settings(&cfg.detector)?;
    let detector = registry.select(Some(&cfg.detector.backend))?;

    let alert = {
        let _stage = ui.stage("Open alert output");
        open_alert_sink(&cfg.alert)?
    };

    let mut observers = ObserverSet::new()
        .with(LogObserver)
        .with(ui.status_line());
    if let Some(path) = &cfg.journal_path {
        let journal = SightingJournal::open(path)?;
        log::info!("journaling sightings to {}", journal.path().display());
        observers.push(journal);
    }
    if let Some(dir) = &cfg.snapshot_dir {
        #[cfg(feature = "snapshot")]
        {
            let snapshots = monkey_watch::SnapshotWriter::new(dir)?;
            log::info!("saving sighting snapshots to {}", snapshots.dir().display());
            observers.push(snapshots);
        }
        #[cfg(not(feature = "snapshot"))]
        {
            return Err(anyhow!(
                "snapshot_dir {} requires the snapshot feature",
                dir.display()
            ));
        }
    }

    let mut session = WatchSession::new(
        SessionSettings::from_config(&cfg),
        detector,
        alert,
        Box::new(observers),
    )?;
    {
        let _stage = ui.stage("Start detection");
        session.start(ingest::opener(&cfg.source))?;
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let started = Instant::now();
    let run_limit = (args.run_secs > 0).then(|| Duration::from_secs(args.run_secs));
    let mut last_health_log = Instant::now();

    log::info!("monkey_watchd running. press Ctrl-C to stop");
    loop {
        if rx.try_recv().is_ok() {
            log::info!("shutdown signal received, stopping detection...");
            break;
        }
        if run_limit.is_some_and(|limit| started.elapsed() >= limit) {
            log::info!("run time limit reached, stopping detection...");
            break;
        }

        let outcome = session.pump(Duration::from_millis(100))?;
        if outcome.finished {
            log::info!("frame source finished");
            break;
        }

        if last_health_log.elapsed() >= cfg.health_log_interval {
            let stats = session.cycle_stats();
            log::info!(
                "health cycles={} skipped={} faults={} deadline_misses={} alert_failures={} sightings={}",
                stats.cycles,
                stats.skipped,
                stats.faults,
                stats.deadline_misses,
                stats.alert_failures,
                session.sighting_count()
            );
            last_health_log = Instant::now();
        }
    }

    session.stop()?;
    log::info!(
        "monkey_watchd stopped after {} unique sighting(s)",
        session.sighting_count()
    );
    Ok(())
}
