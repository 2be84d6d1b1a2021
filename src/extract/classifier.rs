use image::DynamicImage;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ClassifierError;
use crate::pipeline::{FieldValue, StatKind};

/// Reads one HUD field from a cropped region of a frame.
pub trait Classifier: Send + Sync {
    fn classify(&self, crop: &DynamicImage) -> Result<FieldValue, ClassifierError>;
}

impl<F> Classifier for F
where
    F: Fn(&DynamicImage) -> Result<FieldValue, ClassifierError> + Send + Sync,
{
    fn classify(&self, crop: &DynamicImage) -> Result<FieldValue, ClassifierError> {
        self(crop)
    }
}

/// Classifier registered for each field. Fields without one are never read.
#[derive(Clone, Default)]
pub struct ClassifierSet {
    classifiers: HashMap<StatKind, Arc<dyn Classifier>>,
}

impl ClassifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: StatKind, classifier: impl Classifier + 'static) -> Self {
        self.insert(kind, Arc::new(classifier));
        self
    }

    pub fn insert(&mut self, kind: StatKind, classifier: Arc<dyn Classifier>) {
        self.classifiers.insert(kind, classifier);
    }

    pub fn get(&self, kind: StatKind) -> Option<&Arc<dyn Classifier>> {
        self.classifiers.get(&kind)
    }

    pub fn kinds(&self) -> Vec<StatKind> {
        let mut kinds: Vec<StatKind> = self.classifiers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.classifiers.is_empty()
    }
}
