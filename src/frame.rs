//! Captured video frames.
//!
//! A `Frame` is produced by a frame source once per poll cycle and handed to a
//! detector backend. Pixels are packed RGB24, row-major. Frames are consumed
//! by the inference worker, then passed to the session owner together with
//! its `FrameSignal` so observers can draw overlays or keep a snapshot.

use anyhow::{anyhow, Result};
use std::time::SystemTime;

#[derive(Clone)]
pub struct Frame {
    /// Monotonic per-source sequence number, starting at 1.
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub captured_at: SystemTime,
    pixels: Vec<u8>,
}

impl Frame {
    /// Build a frame from packed RGB24 pixels.
    pub fn from_rgb(seq: u64, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            seq,
            width,
            height,
            captured_at: SystemTime::now(),
            pixels,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGB triple at (x, y). Out-of-bounds reads return `None`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("seq", &self.seq)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_pixel_buffer() {
        assert!(Frame::from_rgb(1, 4, 4, vec![0u8; 10]).is_err());
    }

    #[test]
    fn pixel_lookup_is_row_major() -> Result<()> {
        let mut pixels = vec![0u8; 2 * 2 * 3];
        pixels[9..12].copy_from_slice(&[7, 8, 9]);
        let frame = Frame::from_rgb(1, 2, 2, pixels)?;

        assert_eq!(frame.pixel(1, 1), Some([7, 8, 9]));
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(frame.pixel(2, 0), None);
        Ok(())
    }

    #[test]
    fn debug_output_omits_pixels() -> Result<()> {
        let frame = Frame::from_rgb(3, 1, 1, vec![1, 2, 3])?;
        let text = format!("{:?}", frame);
        assert!(text.contains("seq: 3"));
        assert!(text.contains("bytes: 3"));
        Ok(())
    }
}
