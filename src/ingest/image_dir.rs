//! Still-image directory source.
//!
//! Replays the JPEG/PNG files of a directory in file-name order, one per poll
//! cycle. Handy for checking a model against a folder of test shots before
//! pointing it at a live camera.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    frame_count: u64,
    skipped: u64,
}

impl ImageDirSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if dir.as_os_str().is_empty() {
            return Err(anyhow!("image directory path is empty"));
        }
        Ok(Self {
            dir,
            files: Vec::new(),
            next: 0,
            frame_count: 0,
            skipped: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    fn connect(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("read image directory {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        files.sort();
        log::info!(
            "ImageDirSource: {} images in {}",
            files.len(),
            self.dir.display()
        );
        self.files = files;
        self.next = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next).cloned() else {
            return Ok(None);
        };
        self.next += 1;

        let image = match image::open(&path) {
            Ok(image) => image.to_rgb8(),
            Err(err) => {
                self.skipped += 1;
                log::warn!("ImageDirSource: skipping {}: {}", path.display(), err);
                return Ok(None);
            }
        };
        self.frame_count += 1;
        let (width, height) = image.dimensions();
        let frame = Frame::from_rgb(self.frame_count, width, height, image.into_raw())?;
        log::debug!("ImageDirSource: frame {} <- {}", frame.seq, path.display());
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_skipped: self.skipped,
            location: format!("dir://{}", self.dir.display()),
        }
    }

    fn is_exhausted(&self) -> bool {
        self.next >= self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_images_in_name_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        image::RgbImage::from_pixel(4, 3, image::Rgb([1, 2, 3])).save(dir.path().join("b.png"))?;
        image::RgbImage::from_pixel(2, 2, image::Rgb([9, 9, 9])).save(dir.path().join("a.png"))?;
        std::fs::write(dir.path().join("notes.txt"), b"not an image")?;

        let mut source = ImageDirSource::new(dir.path())?;
        source.connect()?;
        assert_eq!(source.len(), 2);

        let first = source.next_frame()?.expect("first image");
        assert_eq!((first.width, first.height), (2, 2));
        let second = source.next_frame()?.expect("second image");
        assert_eq!(second.pixel(0, 0), Some([1, 2, 3]));

        assert!(source.is_exhausted());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn corrupt_image_skips_cycle() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("broken.jpg"), b"garbage")?;

        let mut source = ImageDirSource::new(dir.path())?;
        source.connect()?;
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_skipped, 1);
        Ok(())
    }
}
