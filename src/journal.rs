//! Append-only sighting journal.
//!
//! One JSON object per line, written when a sighting starts or ends. The file
//! is output only; nothing reads it back at startup and the sighting count is
//! not restored across restarts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::debounce::{SightingEvent, SightingState};
use crate::present::SightingObserver;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Started,
    Ended,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SightingRecord {
    pub kind: RecordKind,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confidence: Option<f32>,
    pub at_epoch_s: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_s: Option<f64>,
}

impl SightingRecord {
    /// Journal record for `event`, or `None` for events that are not journaled.
    pub fn from_event(event: &SightingEvent, state: &SightingState, now: SystemTime) -> Option<Self> {
        let at_epoch_s = now.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        match event {
            SightingEvent::Started { count, confidence } => Some(Self {
                kind: RecordKind::Started,
                count: *count,
                confidence: Some(*confidence),
                at_epoch_s,
                duration_s: None,
            }),
            SightingEvent::Ended => Some(Self {
                kind: RecordKind::Ended,
                count: state.sighting_count,
                confidence: None,
                at_epoch_s,
                duration_s: state
                    .started_at
                    .and_then(|started| now.duration_since(started).ok())
                    .map(|d| d.as_secs_f64()),
            }),
            SightingEvent::Ongoing { .. } | SightingEvent::Idle { .. } => None,
        }
    }
}

pub struct SightingJournal {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl SightingJournal {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create journal directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open sighting journal {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> u64 {
        self.written
    }

    pub fn append(&mut self, record: &SightingRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record).context("encode sighting record")?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().context("flush sighting journal")?;
        self.written += 1;
        Ok(())
    }
}

impl SightingObserver for SightingJournal {
    fn on_event(&mut self, event: &SightingEvent, state: &SightingState) {
        let Some(record) = SightingRecord::from_event(event, state, SystemTime::now()) else {
            return;
        };
        if let Err(e) = self.append(&record) {
            log::warn!("journal write to {} failed: {:#}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ended_record_carries_duration() {
        let start = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let state = SightingState {
            present: false,
            absent_run_length: 0,
            sighting_count: 2,
            started_at: Some(start),
        };
        let record =
            SightingRecord::from_event(&SightingEvent::Ended, &state, start + Duration::from_secs(5))
                .unwrap();
        assert_eq!(record.kind, RecordKind::Ended);
        assert_eq!(record.count, 2);
        assert_eq!(record.duration_s, Some(5.0));
        assert_eq!(record.at_epoch_s, 1_700_000_005);
    }

    #[test]
    fn ongoing_and_idle_are_not_journaled() {
        let state = SightingState::default();
        let now = SystemTime::now();
        assert!(
            SightingRecord::from_event(&SightingEvent::Ongoing { confidence: 0.7 }, &state, now)
                .is_none()
        );
        assert!(
            SightingRecord::from_event(&SightingEvent::Idle { absent_run: 1 }, &state, now)
                .is_none()
        );
    }

    #[test]
    fn journal_lines_parse_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("logs").join("sightings.jsonl");
        let mut journal = SightingJournal::open(&path)?;

        let mut state = SightingState {
            present: true,
            sighting_count: 1,
            started_at: Some(SystemTime::now()),
            ..SightingState::default()
        };
        journal.on_event(
            &SightingEvent::Started {
                count: 1,
                confidence: 0.75,
            },
            &state,
        );
        journal.on_event(&SightingEvent::Ongoing { confidence: 0.8 }, &state);
        state.present = false;
        journal.on_event(&SightingEvent::Ended, &state);
        assert_eq!(journal.records_written(), 2);

        let raw = std::fs::read_to_string(&path)?;
        let records: Vec<SightingRecord> = raw
            .lines()
            .map(serde_json::from_str)
            .collect::<std::result::Result<_, _>>()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, RecordKind::Started);
        assert_eq!(records[0].confidence, Some(0.75));
        assert_eq!(records[1].kind, RecordKind::Ended);
        assert!(records[1].duration_s.is_some());
        Ok(())
    }
}
