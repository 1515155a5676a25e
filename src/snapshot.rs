//! Annotated sighting snapshots.
//!
//! When a sighting starts, the frame that triggered it is written as a JPEG
//! with every detection boxed in its confidence-band colour. Files are named
//! `sighting_<count>_<epoch secs>_<confidence>.jpg`.

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::debounce::{SightingEvent, SightingState};
use crate::detect::Detection;
use crate::frame::Frame;
use crate::present::SightingObserver;

const BOX_THICKNESS: u32 = 2;

pub struct SnapshotWriter {
    dir: PathBuf,
    pending: Option<(Frame, Vec<Detection>)>,
    saved: Vec<PathBuf>,
}

impl SnapshotWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create snapshot directory {}", dir.display()))?;
        Ok(Self {
            dir,
            pending: None,
            saved: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }

    fn save(&mut self, count: u64, confidence: f32) -> Result<Option<PathBuf>> {
        let Some((frame, detections)) = self.pending.take() else {
            return Ok(None);
        };
        let image = annotate(&frame, &detections)?;
        let epoch_s = frame
            .captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = self.dir.join(format!(
            "sighting_{:04}_{}_{:.2}.jpg",
            count, epoch_s, confidence
        ));
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        self.saved.push(path.clone());
        Ok(Some(path))
    }
}

/// Copy of `frame` with a box drawn around each detection.
pub fn annotate(frame: &Frame, detections: &[Detection]) -> Result<RgbImage> {
    let mut image = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
        .ok_or_else(|| anyhow!("frame {} has a short pixel buffer", frame.seq))?;
    for det in detections {
        draw_box(&mut image, det, Rgb(det.band().color()));
    }
    Ok(image)
}

fn draw_box(image: &mut RgbImage, det: &Detection, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let to_px = |v: f32, extent: u32| ((v.clamp(0.0, 1.0) * extent as f32) as u32).min(extent - 1);
    let x0 = to_px(det.x, width);
    let y0 = to_px(det.y, height);
    let x1 = to_px(det.x + det.w, width).max(x0);
    let y1 = to_px(det.y + det.h, height).max(y0);

    for t in 0..BOX_THICKNESS {
        for x in x0..=x1 {
            image.put_pixel(x, (y0 + t).min(y1), color);
            image.put_pixel(x, y1.saturating_sub(t).max(y0), color);
        }
        for y in y0..=y1 {
            image.put_pixel((x0 + t).min(x1), y, color);
            image.put_pixel(x1.saturating_sub(t).max(x0), y, color);
        }
    }
}

impl SightingObserver for SnapshotWriter {
    fn on_detections(&mut self, frame: &Frame, detections: &[Detection]) {
        // A sighting can only start on a frame with detections.
        self.pending = if detections.is_empty() {
            None
        } else {
            Some((frame.clone(), detections.to_vec()))
        };
    }

    fn on_event(&mut self, event: &SightingEvent, _state: &SightingState) {
        if let SightingEvent::Started { count, confidence } = *event {
            match self.save(count, confidence) {
                Ok(Some(path)) => log::info!("sighting #{} snapshot: {}", count, path.display()),
                Ok(None) => log::debug!("sighting #{} started without a frame", count),
                Err(e) => log::warn!("sighting #{} snapshot failed: {:#}", count, e),
            }
        }
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREY: [u8; 3] = [90, 90, 90];

    fn grey_frame(width: u32, height: u32) -> Frame {
        Frame::from_rgb(7, width, height, GREY.repeat((width * height) as usize)).unwrap()
    }

    fn detection(confidence: f32) -> Detection {
        Detection {
            x: 0.25,
            y: 0.25,
            w: 0.5,
            h: 0.5,
            confidence,
        }
    }

    #[test]
    fn boxes_use_confidence_band_colours() {
        let frame = grey_frame(40, 20);
        let image = annotate(&frame, &[detection(0.9)]).unwrap();
        // Box spans x 10..=30, y 5..=15.
        assert_eq!(image.get_pixel(20, 5).0, [0, 255, 0]);
        assert_eq!(image.get_pixel(20, 6).0, [0, 255, 0]);
        assert_eq!(image.get_pixel(10, 10).0, [0, 255, 0]);
        assert_eq!(image.get_pixel(30, 15).0, [0, 255, 0]);
        assert_eq!(image.get_pixel(20, 10).0, GREY);
        assert_eq!(image.get_pixel(0, 0).0, GREY);

        let image = annotate(&frame, &[detection(0.65)]).unwrap();
        assert_eq!(image.get_pixel(20, 5).0, [255, 255, 0]);
        let image = annotate(&frame, &[detection(0.55)]).unwrap();
        assert_eq!(image.get_pixel(20, 5).0, [255, 165, 0]);
    }

    #[test]
    fn boxes_are_clipped_to_the_frame() {
        let frame = grey_frame(8, 8);
        let det = Detection {
            x: 0.75,
            y: 0.75,
            w: 0.9,
            h: 0.9,
            confidence: 0.9,
        };
        let image = annotate(&frame, &[det]).unwrap();
        assert_eq!(image.get_pixel(7, 7).0, [0, 255, 0]);
        assert_eq!(image.get_pixel(6, 6).0, [0, 255, 0]);
    }

    #[test]
    fn saves_one_snapshot_per_started_sighting() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SnapshotWriter::new(dir.path().join("snaps")).unwrap();
        let state = SightingState::default();
        let frame = grey_frame(32, 24);

        writer.on_detections(&frame, &[detection(0.91)]);
        writer.on_event(
            &SightingEvent::Started {
                count: 3,
                confidence: 0.91,
            },
            &state,
        );
        writer.on_detections(&frame, &[detection(0.88)]);
        writer.on_event(&SightingEvent::Ongoing { confidence: 0.88 }, &state);

        assert_eq!(writer.saved().len(), 1);
        let path = &writer.saved()[0];
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("sighting_0003_"));
        assert!(name.ends_with("_0.91.jpg"));

        let decoded = image::open(path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn started_without_detections_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SnapshotWriter::new(dir.path()).unwrap();
        writer.on_detections(&grey_frame(16, 16), &[]);
        writer.on_event(
            &SightingEvent::Started {
                count: 1,
                confidence: 0.9,
            },
            &SightingState::default(),
        );
        assert!(writer.saved().is_empty());
        assert_eq!(std::fs::read_dir(writer.dir()).unwrap().count(), 0);
    }
}
