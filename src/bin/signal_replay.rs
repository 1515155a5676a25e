//! signal_replay - Replay a recorded per-frame signal through the debouncer.
//!
//! Input is one observation per line: `T`/`F` (also `1`/`0`), or a bare
//! confidence where anything above the threshold counts as a detection.
//! Blank lines and `#` comments are ignored. Useful for picking `gap_frames`
//! against footage where the monkey kept ducking out of view.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use monkey_watch::{FrameSignal, SightingDebouncer, SightingEvent, DEFAULT_GAP_FRAMES};

#[derive(Parser, Debug)]
#[command(
    name = "signal_replay",
    about = "Replay recorded frame signals through the sighting debouncer"
)]
struct Args {
    /// Signal file (reads stdin when omitted).
    #[arg(value_name = "PATH")]
    input: Option<PathBuf>,

    /// Consecutive missed frames tolerated before a sighting ends.
    #[arg(long, env = "MONKEY_WATCH_GAP_FRAMES", default_value_t = DEFAULT_GAP_FRAMES)]
    gap_frames: u32,

    /// Confidence threshold for numeric lines.
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,

    /// Also print ongoing/idle frames.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut debouncer = SightingDebouncer::new(args.gap_frames)?;
    let mut frame = 0u64;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let Some(signal) = parse_line(&line, args.threshold)
            .with_context(|| format!("line {}", line_no + 1))?
        else {
            continue;
        };
        let event = debouncer.observe(signal);
        match event {
            SightingEvent::Started { count, confidence } => {
                println!("frame {frame}: sighting #{count} started ({confidence:.2})")
            }
            SightingEvent::Ended => println!("frame {frame}: sighting ended"),
            SightingEvent::Ongoing { confidence } if args.verbose => {
                println!("frame {frame}: ongoing ({confidence:.2})")
            }
            SightingEvent::Idle { absent_run } if args.verbose => {
                println!("frame {frame}: idle (absent run {absent_run})")
            }
            _ => {}
        }
        frame += 1;
    }

    println!(
        "{} frame(s), {} unique sighting(s), gap_frames={}, still present: {}",
        frame,
        debouncer.sighting_count(),
        debouncer.gap_frames(),
        debouncer.state().present
    );
    Ok(())
}

fn parse_line(line: &str, threshold: f32) -> Result<Option<FrameSignal>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let signal = match line {
        "T" | "t" | "1" => FrameSignal::present(1.0),
        "F" | "f" | "0" => FrameSignal::absent(),
        other => {
            let confidence: f32 = other
                .parse()
                .map_err(|_| anyhow!("expected T, F or a confidence, got '{}'", other))?;
            if !(0.0..=1.0).contains(&confidence) {
                return Err(anyhow!("confidence {} outside [0, 1]", confidence));
            }
            if confidence > threshold {
                FrameSignal::present(confidence)
            } else {
                FrameSignal::absent()
            }
        }
    };
    Ok(Some(signal))
}
