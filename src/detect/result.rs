use anyhow::{anyhow, Result};

use crate::debounce::FrameSignal;

/// Result of running detection on a frame.
///
/// Backends only return detections that cleared the caller's confidence
/// threshold, so an empty list means "no monkey in this frame".
#[derive(Clone, Debug, Default)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

/// One bounding box in normalized 0..1 coordinates (top-left origin).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
}

/// Overlay band for a detection. Mirrors the green / yellow / orange boxes
/// drawn by the viewer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn of(confidence: f32) -> Self {
        if confidence > 0.8 {
            ConfidenceBand::High
        } else if confidence > 0.6 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }

    /// RGB overlay color.
    pub fn color(self) -> [u8; 3] {
        match self {
            ConfidenceBand::High => [0, 255, 0],
            ConfidenceBand::Medium => [255, 255, 0],
            ConfidenceBand::Low => [255, 165, 0],
        }
    }
}

impl Detection {
    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);
        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::of(self.confidence)
    }
}

impl DetectionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn max_confidence(&self) -> f32 {
        self.detections
            .iter()
            .map(|d| d.confidence)
            .fold(0.0, f32::max)
    }

    /// Reduce the detections to the per-frame signal the debouncer consumes.
    ///
    /// Confidences must be finite and within [0, 1]; anything else is a backend
    /// fault and is rejected here rather than inside the debouncer.
    pub fn to_signal(&self) -> Result<FrameSignal> {
        for det in &self.detections {
            if !det.confidence.is_finite() || !(0.0..=1.0).contains(&det.confidence) {
                return Err(anyhow!(
                    "detection confidence {} outside [0, 1]",
                    det.confidence
                ));
            }
        }
        if self.detections.is_empty() {
            return Ok(FrameSignal::absent());
        }
        Ok(FrameSignal::present(self.max_confidence()))
    }

    /// Greedy non-maximum suppression: keep the most confident box of every
    /// cluster whose pairwise IoU exceeds `iou_threshold`.
    pub fn suppress_overlaps(mut self, iou_threshold: f32) -> Self {
        self.detections
            .sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut kept: Vec<Detection> = Vec::with_capacity(self.detections.len());
        for det in self.detections {
            if kept.iter().all(|k| k.iou(&det) <= iou_threshold) {
                kept.push(det);
            }
        }
        Self { detections: kept }
    }
}
