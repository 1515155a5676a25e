#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult};
use crate::frame::Frame;

const NMS_IOU: f32 = 0.45;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects the usual single-output export layout `[1, 4 + classes, anchors]`,
/// where the first four rows are `cx, cy, w, h` in input pixels and the rest
/// are per-class scores. The best class score is taken as the box confidence,
/// so a single-class "monkey" model and a multi-class model filtered down to
/// one class both work.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for square `input_size` inputs.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_size })
    }

    /// Nearest-neighbour resample into a normalized NCHW tensor.
    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("empty frame"));
        }
        let size = self.input_size as usize;
        let sx = frame.width as f32 / size as f32;
        let sy = frame.height as f32 / size as f32;
        let pixels = frame.pixels();
        let width = frame.width as usize;

        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            let src_x = ((x as f32 * sx) as usize).min(width - 1);
            let src_y = ((y as f32 * sy) as usize).min(frame.height as usize - 1);
            pixels[(src_y * width + src_x) * 3 + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn extract_detections(&self, outputs: TVec<TValue>, threshold: f32) -> Result<DetectionResult> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        decode_output(output, self.input_size, threshold)
    }
}

/// Decode a `[1, 4 + classes, anchors]` output into normalized boxes whose best
/// class score is strictly above `threshold`.
fn decode_output(output: &Tensor, input_size: u32, threshold: f32) -> Result<DetectionResult> {
    let view = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    let shape = view.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
        return Err(anyhow!("unexpected model output shape {:?}", shape));
    }
    let view = view
        .into_dimensionality::<tract_ndarray::Ix3>()
        .context("model output is not rank 3")?;
    let rows = shape[1];
    let anchors = shape[2];
    let scale = input_size as f32;

    let mut detections = Vec::new();
    for a in 0..anchors {
        let confidence = (4..rows)
            .map(|r| view[[0, r, a]])
            .fold(0.0f32, f32::max);
        if confidence <= threshold {
            continue;
        }
        let (cx, cy, w, h) = (
            view[[0, 0, a]],
            view[[0, 1, a]],
            view[[0, 2, a]],
            view[[0, 3, a]],
        );
        detections.push(Detection {
            x: ((cx - w / 2.0) / scale).clamp(0.0, 1.0),
            y: ((cy - h / 2.0) / scale).clamp(0.0, 1.0),
            w: (w / scale).clamp(0.0, 1.0),
            h: (h / scale).clamp(0.0, 1.0),
            confidence: confidence.min(1.0),
        });
    }

    Ok(DetectionResult { detections }.suppress_overlaps(NMS_IOU))
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<DetectionResult> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_detections(outputs, threshold)
    }
}
