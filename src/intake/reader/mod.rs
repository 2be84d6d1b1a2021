mod image_dir;
mod synthetic;

pub use image_dir::ImageDirectoryReader;
pub use synthetic::SyntheticReader;

use image::DynamicImage;

use crate::config::{SourceKind, SourceSpec};
use crate::error::CaptureError;

/// Blocking frame input driven by a source's capture thread.
pub trait FrameReader: Send {
    /// Prepares the underlying input. Called once before the first `read`.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Next frame, or `None` once the input is exhausted.
    fn read(&mut self) -> Result<Option<DynamicImage>, CaptureError>;

    /// Human-readable description of the input for logs.
    fn describe(&self) -> String;
}

pub fn open_reader(spec: &SourceSpec) -> Box<dyn FrameReader> {
    match &spec.kind {
        SourceKind::Synthetic { frames } => Box::new(SyntheticReader::new(spec.id, *frames)),
        SourceKind::ImageDir { path } => Box::new(ImageDirectoryReader::new(spec.id, path)),
    }
}
