use crate::angles::AngleValue;
use serde::{Deserialize, Serialize};
use std::fmt;

const PERIOD_DEG: f64 = 360.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MaeMissingReason {
    /// Every position was missing on at least one side.
    NoPairedPositions,
}

/// MAE for one angle name; `value` is `None` exactly when a reason is set.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AngleMae {
    pub value: Option<f64>,
    pub missing_reason: Option<MaeMissingReason>,
    pub paired_positions: usize,
}

impl AngleMae {
    fn present(value: f64, paired_positions: usize) -> Self {
        Self {
            value: Some(value),
            missing_reason: None,
            paired_positions,
        }
    }

    fn missing(reason: MaeMissingReason) -> Self {
        Self {
            value: None,
            missing_reason: Some(reason),
            paired_positions: 0,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScoreError {
    LengthMismatch { reference: usize, predicted: usize },
    NoScorableAngles,
}

impl ScoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::LengthMismatch { .. } => "LENGTH_MISMATCH",
            Self::NoScorableAngles => "NO_SCORABLE_ANGLES",
        }
    }
}

impl fmt::Display for ScoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LengthMismatch {
                reference,
                predicted,
            } => write!(
                f,
                "length mismatch: reference has {} residues, predicted has {}",
                reference, predicted
            ),
            Self::NoScorableAngles => write!(f, "no angle produced a usable MAE"),
        }
    }
}

impl std::error::Error for ScoreError {}

/// Angular separation in degrees on a circle of period 360, in `[0, 180]`.
///
/// Independent of whether inputs use `[-180, 180)` or `[0, 360)`.
pub fn circular_distance(a: f64, b: f64) -> f64 {
    // Reduce each operand first; `a - b` can overflow for large finite inputs.
    let diff = (a.rem_euclid(PERIOD_DEG) - b.rem_euclid(PERIOD_DEG)).abs();
    diff.min(PERIOD_DEG - diff)
}

/// Mean circular error over positions defined on both sides.
pub fn circular_mae(
    reference: &[AngleValue],
    predicted: &[AngleValue],
) -> Result<AngleMae, ScoreError> {
    if reference.len() != predicted.len() {
        return Err(ScoreError::LengthMismatch {
            reference: reference.len(),
            predicted: predicted.len(),
        });
    }

    let mut sum = 0.0;
    let mut paired = 0usize;
    for (left, right) in reference.iter().zip(predicted.iter()) {
        if let (AngleValue::Degrees(a), AngleValue::Degrees(b)) = (left, right) {
            sum += circular_distance(*a, *b);
            paired += 1;
        }
    }

    if paired == 0 {
        return Ok(AngleMae::missing(MaeMissingReason::NoPairedPositions));
    }
    Ok(AngleMae::present(sum / paired as f64, paired))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use AngleValue::{Degrees, Missing};

    #[test]
    fn distance_known_values() {
        assert_abs_diff_eq!(circular_distance(10.0, -170.0), 180.0, epsilon = 1e-12);
        assert_abs_diff_eq!(circular_distance(350.0, 10.0), 20.0, epsilon = 1e-12);
        assert_abs_diff_eq!(circular_distance(-90.0, 270.0), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(circular_distance(180.0, 0.0), 180.0, epsilon = 1e-12);
        assert_abs_diff_eq!(circular_distance(0.0, -180.0), 180.0, epsilon = 1e-12);
        assert_abs_diff_eq!(circular_distance(-179.0, 179.0), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn distance_is_symmetric_and_bounded() {
        let samples = [
            -1e308, -540.0, -180.0, -179.5, -90.0, 0.0, 0.25, 45.0, 180.0, 359.9, 725.0, 1e308,
            f64::MAX,
        ];
        for &a in &samples {
            assert_abs_diff_eq!(circular_distance(a, a), 0.0, epsilon = 1e-12);
            for &b in &samples {
                let d = circular_distance(a, b);
                assert!((0.0..=180.0).contains(&d), "a={} b={} d={}", a, b, d);
                assert_abs_diff_eq!(d, circular_distance(b, a), epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn distance_same_under_both_conventions() {
        let signed = [-150.0, -10.0, 95.0];
        for &a in &signed {
            for &b in &signed {
                let shifted_a = (a + 360.0_f64).rem_euclid(360.0);
                let shifted_b = (b + 360.0_f64).rem_euclid(360.0);
                assert_abs_diff_eq!(
                    circular_distance(a, b),
                    circular_distance(shifted_a, shifted_b),
                    epsilon = 1e-9
                );
            }
        }
    }

    #[test]
    fn missing_positions_are_excluded() {
        let reference = [Degrees(10.0), Missing, Degrees(30.0)];
        let predicted = [Degrees(15.0), Degrees(50.0), Missing];
        let mae = circular_mae(&reference, &predicted).expect("same length");
        assert_eq!(mae.paired_positions, 1);
        assert_abs_diff_eq!(mae.value.expect("present"), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn all_missing_is_reported_missing_not_zero() {
        let reference = [Missing, Degrees(1.0)];
        let predicted = [Degrees(2.0), Missing];
        let mae = circular_mae(&reference, &predicted).expect("same length");
        assert!(mae.is_missing());
        assert_eq!(
            mae.missing_reason,
            Some(MaeMissingReason::NoPairedPositions)
        );

        let empty = circular_mae(&[], &[]).expect("empty");
        assert!(empty.is_missing());
    }

    #[test]
    fn differing_lengths_fail() {
        let err = circular_mae(&[Degrees(1.0)], &[Degrees(1.0), Degrees(2.0)])
            .expect_err("must fail");
        assert_eq!(
            err,
            ScoreError::LengthMismatch {
                reference: 1,
                predicted: 2
            }
        );
    }

    #[test]
    fn huge_finite_angles_stay_finite() {
        let mae = circular_mae(&[Degrees(1e308)], &[Degrees(-1e308)]).expect("same length");
        let value = mae.value.expect("present");
        assert!(value.is_finite());
        assert!((0.0..=180.0).contains(&value));
    }

    #[test]
    fn wraparound_errors_average_on_the_circle() {
        let reference = [Degrees(170.0), Degrees(-170.0)];
        let predicted = [Degrees(-170.0), Degrees(170.0)];
        let mae = circular_mae(&reference, &predicted).expect("same length");
        assert_abs_diff_eq!(mae.value.expect("present"), 20.0, epsilon = 1e-12);
    }
}
