use approx::assert_abs_diff_eq;
use std::collections::BTreeMap;
use tempfile::TempDir;
use torsion_a_core::{
    aggregate, read_collection, write_collection, AngleName, AngleValue, AngleVector,
    EntityCollection, CANONICAL_ANGLES,
};

fn fixture_vector() -> AngleVector {
    let sequence = "GGCAUCC";
    let mut angles = BTreeMap::new();
    for (offset, angle) in CANONICAL_ANGLES.iter().enumerate() {
        let values = (0..sequence.len())
            .map(|i| {
                if i == 0 || (i + offset) % 5 == 0 {
                    AngleValue::Missing
                } else {
                    AngleValue::Degrees(-179.875 + 37.3 * (i + offset) as f64)
                }
            })
            .collect();
        angles.insert(angle.clone(), values);
    }
    AngleVector::new(sequence, angles).expect("valid fixture")
}

#[test]
fn persisted_collection_round_trips() {
    let temp = TempDir::new().expect("tempdir");
    let dir = temp.path();
    let mut collection = EntityCollection::new();
    collection.insert("1ABC".to_string(), fixture_vector());

    let written = write_collection(&dir.join("angles"), &collection).expect("write");
    assert_eq!(written, dir.join("angles.json"));

    let load = read_collection(&written).expect("read");
    assert!(load.failures.is_empty());
    let original = &collection["1ABC"];
    let restored = &load.entities["1ABC"];
    assert_eq!(restored.sequence(), original.sequence());

    for angle in CANONICAL_ANGLES.iter() {
        assert_eq!(
            restored.missing_positions(angle),
            original.missing_positions(angle),
            "missing set for {}",
            angle
        );
        let pairs = original
            .get(angle)
            .expect("original")
            .iter()
            .zip(restored.get(angle).expect("restored"));
        for (before, after) in pairs {
            match (before, after) {
                (AngleValue::Degrees(a), AngleValue::Degrees(b)) => {
                    assert_abs_diff_eq!(*a, *b, epsilon = 1e-9)
                }
                (AngleValue::Missing, AngleValue::Missing) => {}
                other => panic!("value kind changed for {}: {:?}", angle, other),
            }
        }
    }
}

#[test]
fn collection_against_itself_scores_zero() {
    let mut collection = EntityCollection::new();
    collection.insert("self".to_string(), fixture_vector());
    let scores = aggregate(&collection, &collection);
    assert_abs_diff_eq!(scores["self"].value().expect("scored"), 0.0, epsilon = 1e-12);
    assert_eq!(scores["self"].per_angle.len(), CANONICAL_ANGLES.len());
    assert!(scores["self"].per_angle.contains_key(&AngleName::Theta));
}
