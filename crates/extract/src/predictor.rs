use crate::runner::run_tool;
use crate::ExtractError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use torsion_a_core::{AngleError, AngleName, AngleValue, AngleVector, EntityCollection};
use torsion_a_toolspec::ToolSpec;

/// Sequence-to-angle predictor.
pub trait AnglePredictor {
    fn predict(&self, name: &str, sequence: &str) -> Result<AngleVector, ExtractError>;
}

impl<F> AnglePredictor for F
where
    F: Fn(&str, &str) -> Result<AngleVector, ExtractError>,
{
    fn predict(&self, name: &str, sequence: &str) -> Result<AngleVector, ExtractError> {
        self(name, sequence)
    }
}

/// Invokes an external prediction command that prints a JSON angle map,
/// either `{"alpha": [...], ...}` or `{"angles": {"alpha": [...], ...}}`.
#[derive(Clone, Debug)]
pub struct CommandPredictor {
    spec: ToolSpec,
    program: PathBuf,
}

impl CommandPredictor {
    pub fn new(spec: ToolSpec, program: PathBuf) -> Self {
        Self { spec, program }
    }

    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl AnglePredictor for CommandPredictor {
    fn predict(&self, name: &str, sequence: &str) -> Result<AngleVector, ExtractError> {
        let args = self.spec.render_args(None, Some(sequence));
        log::info!("predicting angles for {} ({} nt)", name, sequence.chars().count());
        let stdout = run_tool(
            &self.program,
            &args,
            Duration::from_secs(self.spec.timeout_secs),
        )?;
        parse_prediction(sequence, &stdout).map_err(|err| match err {
            PredictionError::Angle(err) => ExtractError::Angle(err),
            PredictionError::Format(message) => ExtractError::OutputParse {
                program: self.spec.name.clone(),
                message,
            },
        })
    }
}

/// Serves angles from a persisted collection, keyed by entity name.
#[derive(Clone, Debug, Default)]
pub struct PrecomputedPredictor {
    collection: EntityCollection,
}

impl PrecomputedPredictor {
    pub fn new(collection: EntityCollection) -> Self {
        Self { collection }
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }
}

impl AnglePredictor for PrecomputedPredictor {
    fn predict(&self, name: &str, _sequence: &str) -> Result<AngleVector, ExtractError> {
        self.collection
            .get(name)
            .cloned()
            .ok_or_else(|| ExtractError::NotPrecomputed {
                name: name.to_string(),
            })
    }
}

#[derive(Debug, PartialEq)]
pub enum PredictionError {
    Format(String),
    Angle(AngleError),
}

pub fn parse_prediction(sequence: &str, text: &str) -> Result<AngleVector, PredictionError> {
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|err| PredictionError::Format(format!("not JSON: {}", err)))?;
    let map = match value.get("angles") {
        Some(Value::Object(map)) => map,
        Some(_) => return Err(PredictionError::Format("`angles` is not an object".to_string())),
        None => value
            .as_object()
            .ok_or_else(|| PredictionError::Format("expected a JSON object".to_string()))?,
    };

    let mut angles = BTreeMap::new();
    for (name, cells) in map {
        if name == "sequence" {
            continue;
        }
        let angle = AngleName::parse(name);
        if angles.contains_key(&angle) {
            return Err(PredictionError::Format(format!("duplicate angle {:?}", name)));
        }
        let cells = cells
            .as_array()
            .ok_or_else(|| PredictionError::Format(format!("`{}` is not a list", name)))?;
        let mut values = Vec::with_capacity(cells.len());
        for (position, cell) in cells.iter().enumerate() {
            let value = AngleValue::from_json(cell).ok_or_else(|| {
                PredictionError::Angle(AngleError::MalformedAngle {
                    angle: angle.clone(),
                    position,
                    raw: cell.to_string(),
                })
            })?;
            values.push(value);
        }
        angles.insert(angle, values);
    }
    AngleVector::new(sequence, angles).map_err(PredictionError::Angle)
}
