use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::debounce::{SightingEvent, SightingState};
use crate::present::{status_text, SessionPhase, SightingObserver};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = spinner("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Live status line for a detection session.
    pub fn status_line(&self) -> StatusLine {
        let spinner = self
            .use_pretty()
            .then(|| spinner("{spinner} [{elapsed}] {msg}"));
        if let Some(spinner) = &spinner {
            spinner.set_message("Status: Monitoring...");
        }
        StatusLine {
            spinner,
            last_status: String::new(),
        }
    }
}

fn spinner(template: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style =
        ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Session status observer: a spinner line on a TTY, one stderr line per
/// status change otherwise.
pub struct StatusLine {
    spinner: Option<ProgressBar>,
    last_status: String,
}

impl StatusLine {
    pub fn last_status(&self) -> &str {
        &self.last_status
    }
}

impl SightingObserver for StatusLine {
    fn on_event(&mut self, event: &SightingEvent, state: &SightingState) {
        let status = format!(
            "{} | unique sightings: {}",
            status_text(event),
            state.sighting_count
        );
        if status == self.last_status {
            return;
        }
        match &self.spinner {
            Some(spinner) => spinner.set_message(status.clone()),
            None if event.is_started() || event.is_ended() => eprintln!("{status}"),
            None => {}
        }
        self.last_status = status;
    }

    fn on_session(&mut self, phase: SessionPhase) {
        if phase == SessionPhase::Stopped {
            if let Some(spinner) = &self.spinner {
                spinner.finish_with_message(format!("stopped | {}", self.last_status));
            }
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
