use anyhow::Result;
use rand::Rng;

use super::{FrameSource, SourceStats};
use crate::frame::{rgb_len, Frame};

/// Frames per simulated visit, then quiet frames until the next one.
const VISIT_FRAMES: u64 = 40;
const QUIET_FRAMES: u64 = 80;

/// Configuration for a synthetic scene.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Stop after this many frames. `None` runs forever.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "backyard".to_string(),
            width: 640,
            height: 480,
            frame_limit: None,
        }
    }
}

/// Synthetic scene: a static background with a periodic "visitor" square that
/// wanders across the frame for `VISIT_FRAMES` and then leaves.
///
/// Paired with the motion backend this produces regular sighting episodes
/// without a camera.
pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    visitor_row: u32,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            visitor_row: 0,
        }
    }

    fn generate_pixels(&mut self) -> Result<Vec<u8>> {
        let width = self.config.width;
        let height = self.config.height;
        let mut pixels = vec![0u8; rgb_len(width, height)?];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let y = (i as u32) / width.max(1);
            px.copy_from_slice(&[40, (90 + y % 60) as u8, 40]);
        }

        let phase = self.frame_count % (VISIT_FRAMES + QUIET_FRAMES);
        if phase == 0 {
            let side = (height / 4).max(1);
            self.visitor_row = rand::thread_rng().gen_range(0..height.saturating_sub(side).max(1));
        }
        if phase < VISIT_FRAMES {
            let side = (height / 4).max(1);
            let x0 = (phase as u32 * 4) % width.max(1);
            for y in self.visitor_row..(self.visitor_row + side).min(height) {
                for x in x0..(x0 + side).min(width) {
                    let idx = ((y * width + x) * 3) as usize;
                    pixels[idx..idx + 3].copy_from_slice(&[120, 80, 50]);
                }
            }
        }
        Ok(pixels)
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to stub://{} ({}x{})",
            self.config.name,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let pixels = self.generate_pixels()?;
        self.frame_count += 1;
        let frame = Frame::from_rgb(
            self.frame_count,
            self.config.width,
            self.config.height,
            pixels,
        )?;
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_skipped: 0,
            location: format!("stub://{}", self.config.name),
        }
    }

    fn is_exhausted(&self) -> bool {
        self.config
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(limit: Option<u64>) -> SyntheticSource {
        SyntheticSource::new(SyntheticConfig {
            name: "test".to_string(),
            width: 64,
            height: 48,
            frame_limit: limit,
        })
    }

    #[test]
    fn frames_are_numbered_from_one() -> Result<()> {
        let mut source = small(None);
        source.connect()?;
        let first = source.next_frame()?.unwrap();
        let second = source.next_frame()?.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(first.pixels().len(), 64 * 48 * 3);
        Ok(())
    }

    #[test]
    fn frame_limit_exhausts_source() -> Result<()> {
        let mut source = small(Some(2));
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        assert!(source.is_exhausted());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn quiet_phase_frames_are_identical() -> Result<()> {
        let mut source = small(None);
        for _ in 0..(VISIT_FRAMES + 1) {
            source.next_frame()?;
        }
        let a = source.next_frame()?.unwrap();
        let b = source.next_frame()?.unwrap();
        assert_eq!(a.pixels(), b.pixels());
        Ok(())
    }
}
