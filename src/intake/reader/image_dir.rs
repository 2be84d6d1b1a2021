use image::DynamicImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::common::SourceId;
use crate::error::CaptureError;
use crate::intake::reader::FrameReader;

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Replays the still images of a directory in file-name order.
pub struct ImageDirectoryReader {
    source: SourceId,
    dir: PathBuf,
    pending: Option<VecDeque<PathBuf>>,
}

impl ImageDirectoryReader {
    pub fn new(source: SourceId, dir: impl AsRef<Path>) -> Self {
        Self {
            source,
            dir: dir.as_ref().to_path_buf(),
            pending: None,
        }
    }

    fn is_image(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    }
}

impl FrameReader for ImageDirectoryReader {
    fn open(&mut self) -> Result<(), CaptureError> {
        let open_error = |reason: String| CaptureError::Open {
            source_id: self.source,
            target: self.dir.display().to_string(),
            reason,
        };
        let entries = std::fs::read_dir(&self.dir).map_err(|e| open_error(e.to_string()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| open_error(e.to_string()))?.path();
            if path.is_file() && Self::is_image(&path) {
                files.push(path);
            }
        }
        files.sort();
        debug!("{}: {} images in {}", self.source, files.len(), self.dir.display());
        self.pending = Some(files.into());
        Ok(())
    }

    fn read(&mut self) -> Result<Option<DynamicImage>, CaptureError> {
        let pending = self
            .pending
            .as_mut()
            .ok_or(CaptureError::NotOpened(self.source))?;
        let Some(path) = pending.pop_front() else {
            return Ok(None);
        };
        image::open(&path)
            .map(Some)
            .map_err(|e| CaptureError::Read {
                source_id: self.source,
                reason: format!("{}: {e}", path.display()),
            })
    }

    fn describe(&self) -> String {
        format!("image_dir:{}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn replays_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, width) in [("b.png", 2), ("a.png", 1), ("c.png", 3)] {
            RgbImage::from_pixel(width, 1, Rgb([0, 0, 0]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut reader = ImageDirectoryReader::new(SourceId(0), dir.path());
        reader.open().unwrap();
        let widths: Vec<u32> = std::iter::from_fn(|| reader.read().unwrap())
            .map(|img| img.width())
            .collect();
        assert_eq!(widths, vec![1, 2, 3]);
    }

    #[test]
    fn missing_directory_fails_to_open() {
        let mut reader = ImageDirectoryReader::new(SourceId(4), "/definitely/not/here");
        assert!(matches!(
            reader.open(),
            Err(CaptureError::Open { source_id: SourceId(4), .. })
        ));
    }
}
