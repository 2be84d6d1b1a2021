use image::DynamicImage;
use std::path::{Path, PathBuf};

use crate::common::{PlayerSlot, SourceId};
use crate::pipeline::StatKind;

/// Saves classified crops as `<root>/<field>/<slot>/<source>/<frame:06>.png`, for
/// building training sets and inspecting misreads.
#[derive(Debug, Clone)]
pub struct CropWriter {
    root: PathBuf,
}

impl CropWriter {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(
        &self,
        kind: StatKind,
        slot: PlayerSlot,
        source: SourceId,
        frame_index: u64,
    ) -> PathBuf {
        self.root
            .join(kind.as_str())
            .join(slot.as_str())
            .join(source.to_string())
            .join(format!("{frame_index:06}.png"))
    }

    pub fn write(
        &self,
        kind: StatKind,
        slot: PlayerSlot,
        source: SourceId,
        frame_index: u64,
        crop: &DynamicImage,
    ) -> Result<PathBuf, image::ImageError> {
        let path = self.path_for(kind, slot, source, frame_index);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(image::ImageError::IoError)?;
        }
        crop.save(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_crop_under_field_slot_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CropWriter::new(dir.path());
        let path = writer
            .write(
                StatKind::Coins,
                PlayerSlot::P2,
                SourceId(1),
                42,
                &DynamicImage::new_rgb8(3, 2),
            )
            .unwrap();
        assert_eq!(path, dir.path().join("coins/p2/source1/000042.png"));
        assert_eq!(image::open(&path).unwrap().width(), 3);
    }
}
