use image::{DynamicImage, Rgb, RgbImage};

use crate::common::SourceId;
use crate::error::CaptureError;
use crate::intake::reader::FrameReader;

const PALETTE: [[u8; 3]; 4] = [[200, 30, 30], [30, 200, 30], [30, 30, 200], [220, 220, 40]];

/// Produces a fixed number of solid-colour frames.
pub struct SyntheticReader {
    source: SourceId,
    frames: u64,
    width: u32,
    height: u32,
    produced: u64,
    opened: bool,
}

impl SyntheticReader {
    pub fn new(source: SourceId, frames: u64) -> Self {
        Self {
            source,
            frames,
            width: 1280,
            height: 720,
            produced: 0,
            opened: false,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }
}

impl FrameReader for SyntheticReader {
    fn open(&mut self) -> Result<(), CaptureError> {
        self.opened = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<DynamicImage>, CaptureError> {
        if !self.opened {
            return Err(CaptureError::NotOpened(self.source));
        }
        if self.produced >= self.frames {
            return Ok(None);
        }
        let colour = PALETTE[(self.produced % PALETTE.len() as u64) as usize];
        self.produced += 1;
        Ok(Some(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            self.width,
            self.height,
            Rgb(colour),
        ))))
    }

    fn describe(&self) -> String {
        format!("synthetic:{}x{}x{}", self.width, self.height, self.frames)
    }
}
