use crate::aggregate::EntityMae;
use crate::mae::ScoreError;

/// Arithmetic mean over the angle names that produced a value.
pub fn reduce_mean(mae: &EntityMae) -> Result<f64, ScoreError> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in mae.per_angle.values().filter_map(|angle| angle.value) {
        sum += value;
        count += 1;
    }
    if count == 0 {
        return Err(ScoreError::NoScorableAngles);
    }
    Ok(sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::angles::{AngleName, AngleValue};
    use crate::mae::circular_mae;
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeMap;

    fn angle_mae(reference: &[AngleValue], predicted: &[AngleValue]) -> crate::mae::AngleMae {
        circular_mae(reference, predicted).expect("same length")
    }

    #[test]
    fn missing_entries_are_ignored() {
        use AngleValue::{Degrees, Missing};
        let mut per_angle = BTreeMap::new();
        per_angle.insert(AngleName::Alpha, angle_mae(&[Degrees(0.0)], &[Degrees(5.0)]));
        per_angle.insert(AngleName::Beta, angle_mae(&[Missing], &[Degrees(5.0)]));
        per_angle.insert(AngleName::Gamma, angle_mae(&[Degrees(0.0)], &[Degrees(15.0)]));
        let mae = EntityMae { per_angle };
        assert_abs_diff_eq!(reduce_mean(&mae).expect("scorable"), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn empty_or_all_missing_fails() {
        let empty = EntityMae {
            per_angle: BTreeMap::new(),
        };
        assert_eq!(reduce_mean(&empty), Err(ScoreError::NoScorableAngles));

        let mut per_angle = BTreeMap::new();
        per_angle.insert(
            AngleName::Eta,
            angle_mae(&[AngleValue::Missing], &[AngleValue::Degrees(1.0)]),
        );
        let all_missing = EntityMae { per_angle };
        assert_eq!(reduce_mean(&all_missing), Err(ScoreError::NoScorableAngles));
    }
}
