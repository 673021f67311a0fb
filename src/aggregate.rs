use crate::angles::{AngleName, AngleVector};
use crate::collection::EntityCollection;
use crate::mae::{circular_mae, AngleMae, ScoreError};
use crate::reduce::reduce_mean;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-angle MAE for one entity, keyed by the angle names both sides carry.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct EntityMae {
    pub per_angle: BTreeMap<AngleName, AngleMae>,
}

/// Scoring outcome for one matched entity.
///
/// A length mismatch leaves `per_angle` empty and is reported through `score`.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityScore {
    pub per_angle: BTreeMap<AngleName, AngleMae>,
    pub score: Result<f64, ScoreError>,
}

impl EntityScore {
    pub fn value(&self) -> Option<f64> {
        self.score.as_ref().ok().copied()
    }
}

pub fn compare_vectors(
    reference: &AngleVector,
    predicted: &AngleVector,
) -> Result<EntityMae, ScoreError> {
    if reference.len() != predicted.len() {
        return Err(ScoreError::LengthMismatch {
            reference: reference.len(),
            predicted: predicted.len(),
        });
    }

    let mut per_angle = BTreeMap::new();
    for (angle, reference_values) in reference.angles() {
        let Some(predicted_values) = predicted.get(angle) else {
            continue;
        };
        per_angle.insert(angle.clone(), circular_mae(reference_values, predicted_values)?);
    }
    Ok(EntityMae { per_angle })
}

/// Compares and reduces one entity. Length mismatches are logged and carried
/// in the returned score; they never abort the caller.
pub fn score_entity(name: &str, reference: &AngleVector, predicted: &AngleVector) -> EntityScore {
    match compare_vectors(reference, predicted) {
        Ok(mae) => {
            let score = reduce_mean(&mae);
            if let Err(err) = &score {
                log::warn!("{}: {}", name, err);
            }
            EntityScore {
                per_angle: mae.per_angle,
                score,
            }
        }
        Err(err) => {
            log::warn!("{}: skipped, {}", name, err);
            EntityScore {
                per_angle: BTreeMap::new(),
                score: Err(err),
            }
        }
    }
}

/// Scores every entity name present in both collections, in name order.
pub fn aggregate(
    reference: &EntityCollection,
    predicted: &EntityCollection,
) -> BTreeMap<String, EntityScore> {
    let mut out = BTreeMap::new();
    for (name, reference_vector) in reference {
        let Some(predicted_vector) = predicted.get(name) else {
            log::debug!("{}: absent from predicted collection", name);
            continue;
        };
        out.insert(
            name.clone(),
            score_entity(name, reference_vector, predicted_vector),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::angles::AngleValue;
    use approx::assert_abs_diff_eq;

    fn vector(sequence: &str, angles: &[(AngleName, Vec<f64>)]) -> AngleVector {
        AngleVector::from_degrees(sequence, angles.iter().cloned().collect()).expect("valid")
    }

    #[test]
    fn only_shared_angle_names_are_scored() {
        let reference = vector(
            "AC",
            &[
                (AngleName::Alpha, vec![0.0, 10.0]),
                (AngleName::Chi, vec![0.0, 0.0]),
            ],
        );
        let predicted = vector(
            "AC",
            &[
                (AngleName::Alpha, vec![4.0, 14.0]),
                (AngleName::Eta, vec![0.0, 0.0]),
            ],
        );
        let mae = compare_vectors(&reference, &predicted).expect("same length");
        assert_eq!(mae.per_angle.len(), 1);
        assert_abs_diff_eq!(
            mae.per_angle[&AngleName::Alpha].value.expect("present"),
            4.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn key_intersection_only() {
        let mut reference = EntityCollection::new();
        let mut predicted = EntityCollection::new();
        reference.insert("A".into(), vector("G", &[(AngleName::Eta, vec![1.0])]));
        reference.insert("B".into(), vector("G", &[(AngleName::Eta, vec![1.0])]));
        predicted.insert("B".into(), vector("G", &[(AngleName::Eta, vec![3.0])]));
        predicted.insert("C".into(), vector("G", &[(AngleName::Eta, vec![3.0])]));

        let scores = aggregate(&reference, &predicted);
        assert_eq!(scores.keys().collect::<Vec<_>>(), vec!["B"]);
        assert_abs_diff_eq!(scores["B"].value().expect("scored"), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn length_mismatch_is_skipped_with_typed_error() {
        let mut reference = EntityCollection::new();
        let mut predicted = EntityCollection::new();
        reference.insert(
            "X".into(),
            vector("ACGUACGUAC", &[(AngleName::Beta, vec![0.0; 10])]),
        );
        predicted.insert(
            "X".into(),
            vector("ACGUACGUACGU", &[(AngleName::Beta, vec![0.0; 12])]),
        );

        let first = aggregate(&reference, &predicted);
        let second = aggregate(&reference, &predicted);
        assert_eq!(first, second);
        let score = &first["X"];
        assert!(score.per_angle.is_empty());
        assert_eq!(
            score.score,
            Err(ScoreError::LengthMismatch {
                reference: 10,
                predicted: 12
            })
        );
    }

    #[test]
    fn unscorable_entity_keeps_its_row() {
        let mut reference = EntityCollection::new();
        let mut predicted = EntityCollection::new();
        let mut missing = BTreeMap::new();
        missing.insert(AngleName::Zeta, vec![AngleValue::Missing]);
        reference.insert("Y".into(), AngleVector::new("U", missing).expect("valid"));
        predicted.insert("Y".into(), vector("U", &[(AngleName::Zeta, vec![12.0])]));

        let scores = aggregate(&reference, &predicted);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores["Y"].score, Err(ScoreError::NoScorableAngles));
        assert!(scores["Y"].per_angle[&AngleName::Zeta].is_missing());
    }
}
