use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend looks at one frame and reports monkey bounding boxes. It runs on
/// the inference worker thread, hence `Send`.
pub trait DetectorBackend: Send {
    /// Backend identifier, used for selection in config.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Only detections with confidence strictly above `threshold` are returned.
    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<DetectionResult>;

    /// Optional warm-up hook, called once when a session starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
