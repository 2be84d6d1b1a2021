pub mod classifier;
pub mod crops;
pub mod export;
pub mod regions;
pub mod simulated;
pub mod worker;

pub use classifier::{Classifier, ClassifierSet};
pub use crops::CropWriter;
pub use export::RawFrameExport;
pub use regions::{CropRegion, RegionLayout};
pub use simulated::SimulatedClassifier;
pub use worker::{FrameExtractor, WorkerPool};
