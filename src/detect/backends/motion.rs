use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult};
use crate::frame::Frame;

const GRID: u32 = 4;
const MOTION_CONFIDENCE: f32 = 0.85;

/// Model-free fallback backend: reports grid cells whose pixels changed since
/// the previous frame.
///
/// Each cell of a 4x4 grid is hashed; a changed hash becomes a detection box
/// covering that cell. Useful for bench setups without a trained model, and
/// for exercising the alert path end to end.
#[derive(Default)]
pub struct MotionBackend {
    last_hashes: Option<Vec<[u8; 32]>>,
}

impl MotionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell_hashes(frame: &Frame) -> Vec<[u8; 32]> {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let cell_w = (frame.width / GRID).max(1) as usize;
        let cell_h = (frame.height / GRID).max(1) as usize;
        let pixels = frame.pixels();

        let mut hashes = Vec::with_capacity((GRID * GRID) as usize);
        for gy in 0..GRID as usize {
            let (y0, y1) = cell_span(gy, cell_h, height);
            for gx in 0..GRID as usize {
                let (x0, x1) = cell_span(gx, cell_w, width);
                let mut hasher = Sha256::new();
                for y in y0..y1 {
                    let start = (y * width + x0) * 3;
                    let end = (y * width + x1) * 3;
                    if start < end && end <= pixels.len() {
                        hasher.update(&pixels[start..end]);
                    }
                }
                hashes.push(hasher.finalize().into());
            }
        }
        hashes
    }
}

/// Pixel range of grid cell `index` along one axis. The last cell absorbs the
/// remainder so every pixel belongs to exactly one cell.
fn cell_span(index: usize, cell: usize, extent: usize) -> (usize, usize) {
    let start = (index * cell).min(extent);
    let end = if index + 1 == GRID as usize {
        extent
    } else {
        ((index + 1) * cell).min(extent)
    };
    (start, end)
}

impl DetectorBackend for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<DetectionResult> {
        let current = Self::cell_hashes(frame);
        let previous = self.last_hashes.replace(current.clone());

        let Some(previous) = previous else {
            return Ok(DetectionResult::empty());
        };
        if MOTION_CONFIDENCE <= threshold {
            return Ok(DetectionResult::empty());
        }

        let cell = 1.0 / GRID as f32;
        let detections = current
            .iter()
            .zip(previous.iter())
            .enumerate()
            .filter(|(_, (now, before))| now != before)
            .map(|(idx, _)| Detection {
                x: (idx as u32 % GRID) as f32 * cell,
                y: (idx as u32 / GRID) as f32 * cell,
                w: cell,
                h: cell,
                confidence: MOTION_CONFIDENCE,
            })
            .collect();

        Ok(DetectionResult { detections })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64, fill: u8) -> Frame {
        Frame::from_rgb(seq, 8, 8, vec![fill; 8 * 8 * 3]).unwrap()
    }

    #[test]
    fn motion_backend_detects_change() {
        let mut backend = MotionBackend::new();

        let r1 = backend.detect(&frame(1, 10), 0.5).unwrap();
        assert!(r1.detections.is_empty());

        let r2 = backend.detect(&frame(2, 20), 0.5).unwrap();
        assert_eq!(r2.detections.len(), 16);
        assert_eq!(r2.max_confidence(), 0.85);

        let r3 = backend.detect(&frame(3, 20), 0.5).unwrap();
        assert!(r3.detections.is_empty());
    }

    #[test]
    fn motion_backend_localizes_changed_cell() {
        let mut backend = MotionBackend::new();
        backend.detect(&frame(1, 0), 0.5).unwrap();

        // Touch one pixel in the bottom-right 2x2 cell.
        let mut pixels = vec![0u8; 8 * 8 * 3];
        let idx = (7 * 8 + 7) * 3;
        pixels[idx] = 255;
        let changed = Frame::from_rgb(2, 8, 8, pixels).unwrap();

        let result = backend.detect(&changed, 0.5).unwrap();
        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.detections[0].x, 0.75);
        assert_eq!(result.detections[0].y, 0.75);
    }

    #[test]
    fn edge_pixels_of_odd_sized_frames_are_watched() {
        for (w, h) in [(6u32, 6u32), (7, 5), (3, 2)] {
            let len = (w * h * 3) as usize;
            let mut backend = MotionBackend::new();
            backend
                .detect(&Frame::from_rgb(1, w, h, vec![0; len]).unwrap(), 0.5)
                .unwrap();

            let mut pixels = vec![0u8; len];
            pixels[len - 3] = 255;
            let changed = Frame::from_rgb(2, w, h, pixels).unwrap();
            let result = backend.detect(&changed, 0.5).unwrap();
            assert_eq!(result.detections.len(), 1, "{}x{}", w, h);
        }
    }

    #[test]
    fn cell_spans_cover_the_axis() {
        let spans: Vec<_> = (0..GRID as usize).map(|i| cell_span(i, 1, 6)).collect();
        assert_eq!(spans, vec![(0, 1), (1, 2), (2, 3), (3, 6)]);
        let spans: Vec<_> = (0..GRID as usize).map(|i| cell_span(i, 1, 2)).collect();
        assert_eq!(spans, vec![(0, 1), (1, 2), (2, 2), (2, 2)]);
    }

    #[test]
    fn motion_backend_respects_threshold() {
        let mut backend = MotionBackend::new();
        backend.detect(&frame(1, 0), 0.9).unwrap();
        let result = backend.detect(&frame(2, 1), 0.9).unwrap();
        assert!(result.detections.is_empty());
    }
}
