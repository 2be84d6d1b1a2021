pub mod queue;
pub mod reader;
pub mod source;

pub use queue::{BackpressurePolicy, FrameConsumer, FrameProducer, PushOutcome, RecvOutcome, frame_queue};
pub use reader::{FrameReader, ImageDirectoryReader, SyntheticReader, open_reader};
pub use source::{FrameSource, SourceSettings, SourceSummary};
