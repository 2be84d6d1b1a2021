use image::DynamicImage;
use rand::Rng;

use crate::common::ItemCode;
use crate::error::ClassifierError;
use crate::extract::classifier::{Classifier, ClassifierSet};
use crate::pipeline::{FieldValue, StatKind};

/// Stand-in classifier producing random but plausible readings, with an optional
/// misread rate. Lets the pipeline run end to end without trained models.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedClassifier {
    kind: StatKind,
    failure_rate: f64,
}

impl SimulatedClassifier {
    pub fn new(kind: StatKind) -> Self {
        Self {
            kind,
            failure_rate: 0.0,
        }
    }

    /// Rates outside `0.0..=1.0` are clamped; a NaN or infinite rate disables misreads.
    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = if failure_rate.is_finite() {
            failure_rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// A simulated classifier for every field.
    pub fn full_set(failure_rate: f64) -> ClassifierSet {
        StatKind::ALL.into_iter().fold(ClassifierSet::new(), |set, kind| {
            set.with(kind, SimulatedClassifier::new(kind).with_failure_rate(failure_rate))
        })
    }
}

impl Classifier for SimulatedClassifier {
    fn classify(&self, _crop: &DynamicImage) -> Result<FieldValue, ClassifierError> {
        let mut rng = rand::rng();
        if rng.random_bool(self.failure_rate) {
            return Err(ClassifierError::Failed(format!("simulated misread of {}", self.kind)));
        }
        Ok(match self.kind {
            StatKind::Position => FieldValue::Number(rng.random_range(1..=12)),
            StatKind::ItemSlot1 | StatKind::ItemSlot2 => {
                FieldValue::Item(ItemCode::ALL[rng.random_range(0..ItemCode::ALL.len())])
            }
            StatKind::Coins => FieldValue::Number(rng.random_range(0..=10)),
            StatKind::LapNum => FieldValue::Number(rng.random_range(1..=3)),
            StatKind::RaceLaps => FieldValue::Number(3),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_stay_in_range_for_their_kind() {
        let crop = DynamicImage::new_rgb8(1, 1);
        for kind in StatKind::ALL {
            let classifier = SimulatedClassifier::new(kind);
            for _ in 0..50 {
                let value = classifier.classify(&crop).unwrap();
                assert!(kind.accept(value).is_ok());
                match (kind, value) {
                    (StatKind::Position, FieldValue::Number(n)) => assert!((1..=12).contains(&n)),
                    (StatKind::Coins, FieldValue::Number(n)) => assert!(n <= 10),
                    (StatKind::LapNum, FieldValue::Number(n)) => assert!((1..=3).contains(&n)),
                    (StatKind::RaceLaps, FieldValue::Number(n)) => assert_eq!(n, 3),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn full_failure_rate_always_misreads() {
        let classifier = SimulatedClassifier::new(StatKind::Coins).with_failure_rate(1.0);
        assert!(classifier.classify(&DynamicImage::new_rgb8(1, 1)).is_err());
        assert_eq!(SimulatedClassifier::full_set(0.0).kinds().len(), 6);
    }

    #[test]
    fn non_finite_failure_rate_never_misreads() {
        let crop = DynamicImage::new_rgb8(1, 1);
        for rate in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let classifier = SimulatedClassifier::new(StatKind::Coins).with_failure_rate(rate);
            for _ in 0..20 {
                assert!(classifier.classify(&crop).is_ok());
            }
        }
    }
}
