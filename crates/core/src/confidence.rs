//! Execution-mode policy over blended confidence scores.

use serde::{Deserialize, Serialize};

use crate::domain::classification::clamp_unit;
use crate::domain::negotiation::ExecutionMode;
use crate::errors::DomainError;

/// Invariant: `0 <= supervised_min <= auto_min <= 1`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    auto_min: f64,
    supervised_min: f64,
}

impl ConfidenceThresholds {
    pub const DEFAULT_AUTO_MIN: f64 = 0.8;
    pub const DEFAULT_SUPERVISED_MIN: f64 = 0.5;

    pub fn new(auto_min: f64, supervised_min: f64) -> Result<Self, DomainError> {
        let in_unit = |value: f64| (0.0..=1.0).contains(&value);
        if !in_unit(auto_min) || !in_unit(supervised_min) || supervised_min > auto_min {
            return Err(DomainError::InvariantViolation(format!(
                "confidence thresholds must satisfy 0 <= supervised_min ({supervised_min}) <= auto_min ({auto_min}) <= 1"
            )));
        }
        Ok(Self { auto_min, supervised_min })
    }

    pub fn auto_min(&self) -> f64 {
        self.auto_min
    }

    pub fn supervised_min(&self) -> f64 {
        self.supervised_min
    }
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self { auto_min: Self::DEFAULT_AUTO_MIN, supervised_min: Self::DEFAULT_SUPERVISED_MIN }
    }
}

/// Lower bound of each bucket is inclusive. NaN is treated as zero confidence.
pub fn evaluate(blended_confidence: f64, thresholds: &ConfidenceThresholds) -> ExecutionMode {
    let confidence = if blended_confidence.is_nan() { 0.0 } else { blended_confidence };
    if confidence >= thresholds.auto_min {
        ExecutionMode::Auto
    } else if confidence >= thresholds.supervised_min {
        ExecutionMode::Supervised
    } else {
        ExecutionMode::Handoff
    }
}

/// `classification * classification_weight + strategy * (1 - classification_weight)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    classification_weight: f64,
}

impl BlendWeights {
    pub const DEFAULT_CLASSIFICATION_WEIGHT: f64 = 0.4;

    pub fn new(classification_weight: f64) -> Result<Self, DomainError> {
        if !(0.0..=1.0).contains(&classification_weight) {
            return Err(DomainError::InvariantViolation(format!(
                "classification weight {classification_weight} must be within [0, 1]"
            )));
        }
        Ok(Self { classification_weight })
    }

    pub fn classification_weight(&self) -> f64 {
        self.classification_weight
    }

    pub fn strategy_weight(&self) -> f64 {
        1.0 - self.classification_weight
    }

    pub fn blend(&self, classification_confidence: f64, strategy_confidence: f64) -> f64 {
        clamp_unit(
            clamp_unit(classification_confidence) * self.classification_weight
                + clamp_unit(strategy_confidence) * self.strategy_weight(),
        )
    }
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self { classification_weight: Self::DEFAULT_CLASSIFICATION_WEIGHT }
    }
}

#[cfg(test)]
mod tests {
    use super::{evaluate, BlendWeights, ConfidenceThresholds};
    use crate::domain::negotiation::ExecutionMode;

    fn thresholds() -> ConfidenceThresholds {
        ConfidenceThresholds::new(0.8, 0.5).expect("valid thresholds")
    }

    #[test]
    fn boundary_values_map_to_lower_inclusive_bucket() {
        let thresholds = thresholds();
        assert_eq!(evaluate(0.8, &thresholds), ExecutionMode::Auto);
        assert_eq!(evaluate(0.5, &thresholds), ExecutionMode::Supervised);
        assert_eq!(evaluate(0.799_999_999, &thresholds), ExecutionMode::Supervised);
        assert_eq!(evaluate(0.499_999_999, &thresholds), ExecutionMode::Handoff);
        assert_eq!(evaluate(1.0, &thresholds), ExecutionMode::Auto);
        assert_eq!(evaluate(0.0, &thresholds), ExecutionMode::Handoff);
    }

    #[test]
    fn scenario_modes_for_mid_and_low_confidence() {
        let thresholds = thresholds();
        assert_eq!(evaluate(0.6, &thresholds), ExecutionMode::Supervised);
        assert_eq!(evaluate(0.3, &thresholds), ExecutionMode::Handoff);
    }

    #[test]
    fn evaluator_is_total_over_sampled_inputs() {
        let thresholds = thresholds();
        for step in -10..=110 {
            let confidence = f64::from(step) / 100.0;
            let mode = evaluate(confidence, &thresholds);
            let expected = if confidence >= 0.8 {
                ExecutionMode::Auto
            } else if confidence >= 0.5 {
                ExecutionMode::Supervised
            } else {
                ExecutionMode::Handoff
            };
            assert_eq!(mode, expected, "confidence {confidence}");
        }
        assert_eq!(evaluate(f64::NAN, &thresholds), ExecutionMode::Handoff);
    }

    #[test]
    fn collapsed_thresholds_skip_the_supervised_bucket() {
        let thresholds = ConfidenceThresholds::new(0.7, 0.7).expect("equal thresholds are valid");
        assert_eq!(evaluate(0.7, &thresholds), ExecutionMode::Auto);
        assert_eq!(evaluate(0.69, &thresholds), ExecutionMode::Handoff);
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        assert!(ConfidenceThresholds::new(0.5, 0.8).is_err());
        assert!(ConfidenceThresholds::new(1.2, 0.5).is_err());
        assert!(ConfidenceThresholds::new(0.8, -0.1).is_err());
        assert!(ConfidenceThresholds::new(f64::NAN, 0.5).is_err());
    }

    #[test]
    fn default_blend_weights_classification_forty_percent() {
        let weights = BlendWeights::default();
        assert!((weights.blend(1.0, 0.0) - 0.4).abs() < 1e-12);
        assert!((weights.blend(0.0, 1.0) - 0.6).abs() < 1e-12);
        assert!((weights.blend(0.875, 0.85) - 0.86).abs() < 1e-12);
        assert_eq!(weights.blend(2.0, 2.0), 1.0);
        assert!(BlendWeights::new(1.5).is_err());
    }
}
