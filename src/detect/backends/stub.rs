use anyhow::Result;
use rand::Rng;
use std::collections::VecDeque;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult};
use crate::frame::Frame;

/// Stub backend for testing. Replays a script of per-frame confidences and
/// ignores pixel content.
///
/// `Some(c)` yields one centered box with confidence `c`; `None` yields
/// nothing. Once the script runs out every frame is empty.
pub struct StubBackend {
    script: VecDeque<Option<f32>>,
    dropout: f64,
}

impl StubBackend {
    pub fn new(script: Vec<Option<f32>>) -> Self {
        Self {
            script: script.into(),
            dropout: 0.0,
        }
    }

    /// Build a script from a `T`/`F` pattern, e.g. `"TTFFFT"`. `T` frames carry
    /// `confidence`; other characters are ignored.
    pub fn from_pattern(pattern: &str, confidence: f32) -> Self {
        let script = pattern
            .chars()
            .filter_map(|c| match c {
                'T' | 't' => Some(Some(confidence)),
                'F' | 'f' => Some(None),
                _ => None,
            })
            .collect();
        Self::new(script)
    }

    /// Randomly miss a scripted detection with probability `p`, the way a real
    /// model loses a partially occluded subject.
    pub fn with_dropout(mut self, p: f64) -> Self {
        self.dropout = p.clamp(0.0, 1.0);
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame, threshold: f32) -> Result<DetectionResult> {
        let Some(Some(confidence)) = self.script.pop_front() else {
            return Ok(DetectionResult::empty());
        };
        if confidence <= threshold {
            return Ok(DetectionResult::empty());
        }
        if self.dropout > 0.0 && rand::thread_rng().gen_bool(self.dropout) {
            log::debug!("stub backend: dropped scripted detection");
            return Ok(DetectionResult::empty());
        }
        Ok(DetectionResult {
            detections: vec![Detection {
                x: 0.4,
                y: 0.4,
                w: 0.2,
                h: 0.2,
                confidence,
            }],
        })
    }
}
