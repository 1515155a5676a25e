//! alert_check - Exercise the configured alert output without a camera.
//!
//! Sends `TEST` (short buzzer beep) or `STATUS` through the same sink the
//! daemon would use, so wiring can be checked before a real sighting.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use monkey_watch::ui::Ui;
use monkey_watch::{open_alert_sink, AlertCommand, AlertKind, WatchConfig};

#[derive(Parser, Debug)]
#[command(name = "alert_check", about = "Send a test command to the alert output")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "MONKEY_WATCH_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Command to send (test|status|activate|deactivate)
    #[arg(long, default_value = "test", value_name = "CMD")]
    command: String,

    /// For activate: send STOP_ALERT again after this many milliseconds.
    #[arg(long, value_name = "MS")]
    hold_ms: Option<u64>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let command = parse_command(&args.command)?;
    let cfg = WatchConfig::load_from(args.config.as_deref())?;
    if cfg.alert.kind == AlertKind::Log {
        log::warn!("alert kind is 'log': no hardware will be driven");
    }

    let mut sink = {
        let _stage = ui.stage("Open alert output");
        open_alert_sink(&cfg.alert)?
    };
    {
        let _stage = ui.stage(&format!("Send {}", command));
        sink.send(command)?;
    }
    if let (AlertCommand::Activate, Some(hold_ms)) = (command, args.hold_ms) {
        std::thread::sleep(Duration::from_millis(hold_ms));
        let _stage = ui.stage("Send STOP_ALERT");
        sink.deactivate()?;
    }

    println!("{} alert output accepted {}", sink.name(), command);
    Ok(())
}

fn parse_command(raw: &str) -> Result<AlertCommand> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "test" => Ok(AlertCommand::Test),
        "status" => Ok(AlertCommand::Status),
        "activate" => Ok(AlertCommand::Activate),
        "deactivate" | "stop" => Ok(AlertCommand::Deactivate),
        other => Err(anyhow!(
            "unknown command '{}' (expected test, status, activate or deactivate)",
            other
        )),
    }
}
