//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - Synthetic scenes (`stub://name`) for tests and bench runs
//! - USB webcams via V4L2 (`/dev/videoN`, feature: ingest-v4l2)
//! - Directories of still images (`dir://path`, feature: ingest-image)
//!
//! Sources are opened when a watch session starts and dropped when it stops,
//! so a camera is only held while detection is running.

mod synthetic;
#[cfg(feature = "ingest-image")]
pub mod image_dir;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::config::SourceSettings;
use crate::frame::Frame;

/// Deferred source construction, run on the worker thread at session start.
pub type SourceOpener = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>> + Send>;

#[cfg(feature = "ingest-image")]
pub use image_dir::ImageDirSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_skipped: u64,
    pub location: String,
}

/// Anything that yields frames once per poll cycle.
///
/// Sources are created, connected, polled and dropped on the session's
/// inference worker thread, so they need not be `Send` themselves.
pub trait FrameSource {
    /// Open the underlying device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame.
    ///
    /// `Ok(None)` means nothing usable this cycle (e.g. a dropped camera read);
    /// the caller skips the cycle without advancing detection state.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// True once a finite source (image directory, frame-limited synthetic
    /// scene) has nothing left to produce.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Opener for the source named by `settings`, for `WatchSession::start`.
pub fn opener(settings: &SourceSettings) -> SourceOpener {
    let settings = settings.clone();
    Box::new(move || open_source(&settings))
}

/// Build the source named by `settings.url`. The source is not connected yet.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if let Some(name) = url.strip_prefix("stub://") {
        return Ok(Box::new(SyntheticSource::new(SyntheticConfig {
            name: name.to_string(),
            width: settings.width,
            height: settings.height,
            frame_limit: None,
        })));
    }
    if let Some(path) = url.strip_prefix("dir://") {
        #[cfg(feature = "ingest-image")]
        {
            return Ok(Box::new(ImageDirSource::new(path)?));
        }
        #[cfg(not(feature = "ingest-image"))]
        {
            let _ = path;
            return Err(anyhow!("dir:// sources require the ingest-image feature"));
        }
    }
    if url.starts_with("/dev/video") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Source::new(V4l2Config {
                device: url.to_string(),
                target_fps: settings.target_fps,
                width: settings.width,
                height: settings.height,
            })));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!("{} requires the ingest-v4l2 feature", url));
        }
    }
    Err(anyhow!(
        "unsupported source url '{}' (expected stub://, dir:// or /dev/videoN)",
        url
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> SourceSettings {
        SourceSettings {
            url: url.to_string(),
            target_fps: 10,
            width: 32,
            height: 24,
        }
    }

    #[test]
    fn stub_url_opens_synthetic_source() -> Result<()> {
        let mut source = open_source(&settings("stub://backyard"))?;
        source.connect()?;
        let frame = source.next_frame()?.expect("synthetic frame");
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(source.stats().location, "stub://backyard");
        Ok(())
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(open_source(&settings("rtsp://camera")).is_err());
        assert!(open_source(&settings("")).is_err());
    }
}
