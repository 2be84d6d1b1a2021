use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::sync::Arc;

use crate::common::SourceId;

/// A captured, downscaled frame on its way from a source to the extraction workers.
#[derive(Clone)]
pub struct Frame {
    source: SourceId,
    frame_index: u64,
    sequence: u64,
    image: Arc<DynamicImage>,
    captured_at: DateTime<Utc>,
}

impl Frame {
    /// `frame_index` counts every frame read by the source (1-based, including skipped
    /// ones); `sequence` counts only frames that made it into the queue.
    pub fn new(
        source: SourceId,
        frame_index: u64,
        sequence: u64,
        image: DynamicImage,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            frame_index,
            sequence,
            image: Arc::new(image),
            captured_at,
        }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("source", &self.source)
            .field("frame_index", &self.frame_index)
            .field("sequence", &self.sequence)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn cloning_frame_shares_image_buffer() {
        let img: DynamicImage = DynamicImage::ImageRgb8(
            ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(16, 16, Rgb([1, 2, 3])),
        );
        let f1 = Frame::new(SourceId(0), 1, 0, img, Utc::now());
        let f2 = f1.clone();
        assert!(Arc::ptr_eq(&f1.image, &f2.image));
    }
}
