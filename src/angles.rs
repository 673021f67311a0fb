use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Tokens emitted by upstream geometry tools for positions where a torsion is
/// undefined: terminal residues, or the BI/BII backbone conformer labels.
pub const MISSING_TOKENS: [&str; 5] = ["NA", "", "None", "BI", "BII"];

/// Token written in place of a missing value when persisting angles.
pub const MISSING_TOKEN_OUT: &str = "NA";

pub const CANONICAL_ANGLES: [AngleName; 9] = [
    AngleName::Alpha,
    AngleName::Beta,
    AngleName::Gamma,
    AngleName::Delta,
    AngleName::Epsilon,
    AngleName::Zeta,
    AngleName::Chi,
    AngleName::Eta,
    AngleName::Theta,
];

/// Backbone torsion or pseudo-torsion name.
///
/// Names outside the canonical nine are carried as `Other` and sort after the
/// canonical ones.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AngleName {
    Alpha,
    Beta,
    Gamma,
    Delta,
    Epsilon,
    Zeta,
    Chi,
    Eta,
    Theta,
    Other(String),
}

impl AngleName {
    pub fn parse(name: &str) -> Self {
        let trimmed = name.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "alpha" => Self::Alpha,
            "beta" => Self::Beta,
            "gamma" => Self::Gamma,
            "delta" => Self::Delta,
            "epsilon" => Self::Epsilon,
            "zeta" => Self::Zeta,
            "chi" => Self::Chi,
            "eta" => Self::Eta,
            "theta" => Self::Theta,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    /// Canonical name only; `None` for anything that would parse to `Other`.
    pub fn canonical(name: &str) -> Option<Self> {
        match Self::parse(name) {
            Self::Other(_) => None,
            known => Some(known),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Gamma => "gamma",
            Self::Delta => "delta",
            Self::Epsilon => "epsilon",
            Self::Zeta => "zeta",
            Self::Chi => "chi",
            Self::Eta => "eta",
            Self::Theta => "theta",
            Self::Other(name) => name,
        }
    }

    pub fn is_canonical(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for AngleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AngleName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AngleName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// One per-residue angle: a value in degrees, or undefined at that position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AngleValue {
    Degrees(f64),
    Missing,
}

impl AngleValue {
    pub fn degrees(self) -> Option<f64> {
        match self {
            Self::Degrees(value) => Some(value),
            Self::Missing => None,
        }
    }

    pub fn is_missing(self) -> bool {
        matches!(self, Self::Missing)
    }

    /// NaN collapses to `Missing`; infinities are rejected.
    pub fn from_f64(value: f64) -> Option<Self> {
        if value.is_nan() {
            Some(Self::Missing)
        } else if value.is_finite() {
            Some(Self::Degrees(value))
        } else {
            None
        }
    }

    /// Parses a raw upstream token. Sentinels map to `Missing`; anything else
    /// must be a finite float (or NaN).
    pub fn parse_token(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if is_missing_token(trimmed) {
            return Some(Self::Missing);
        }
        trimmed.parse::<f64>().ok().and_then(Self::from_f64)
    }

    /// JSON cell: number, numeric string, sentinel string, or `null`.
    pub fn from_json(cell: &Value) -> Option<Self> {
        match cell {
            Value::Null => Some(Self::Missing),
            Value::Number(number) => number.as_f64().and_then(Self::from_f64),
            Value::String(token) => Self::parse_token(token),
            _ => None,
        }
    }
}

impl From<Option<f64>> for AngleValue {
    fn from(value: Option<f64>) -> Self {
        value
            .and_then(AngleValue::from_f64)
            .unwrap_or(AngleValue::Missing)
    }
}

pub fn is_missing_token(token: &str) -> bool {
    MISSING_TOKENS.contains(&token.trim())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AngleError {
    ShapeMismatch {
        angle: AngleName,
        expected: usize,
        actual: usize,
    },
    MalformedAngle {
        angle: AngleName,
        position: usize,
        raw: String,
    },
    /// Two keys name the same angle once case is folded, e.g. `ETA` and `eta`.
    DuplicateAngle {
        angle: AngleName,
    },
}

impl AngleError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ShapeMismatch { .. } => "SHAPE_MISMATCH",
            Self::MalformedAngle { .. } => "MALFORMED_ANGLE",
            Self::DuplicateAngle { .. } => "DUPLICATE_ANGLE",
        }
    }
}

impl fmt::Display for AngleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch {
                angle,
                expected,
                actual,
            } => write!(
                f,
                "angle {} has {} values but the sequence has {} residues",
                angle, actual, expected
            ),
            Self::MalformedAngle {
                angle,
                position,
                raw,
            } => write!(
                f,
                "angle {} at position {} is not a number or missing token: {:?}",
                angle, position, raw
            ),
            Self::DuplicateAngle { angle } => {
                write!(f, "angle {} is given more than once", angle)
            }
        }
    }
}

impl std::error::Error for AngleError {}

/// Sequence plus per-residue angle lists for one named RNA.
///
/// Every list has exactly one entry per sequence character; index `i` of any
/// list refers to residue `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct AngleVector {
    sequence: String,
    residues: usize,
    angles: BTreeMap<AngleName, Vec<AngleValue>>,
}

impl AngleVector {
    pub fn new(
        sequence: impl Into<String>,
        angles: BTreeMap<AngleName, Vec<AngleValue>>,
    ) -> Result<Self, AngleError> {
        let sequence = sequence.into();
        let residues = sequence.chars().count();
        for (angle, values) in &angles {
            if values.len() != residues {
                return Err(AngleError::ShapeMismatch {
                    angle: angle.clone(),
                    expected: residues,
                    actual: values.len(),
                });
            }
        }
        Ok(Self {
            sequence,
            residues,
            angles,
        })
    }

    /// Builds from raw string cells as emitted by upstream tools.
    pub fn from_raw<S: AsRef<str>>(
        sequence: impl Into<String>,
        raw: BTreeMap<AngleName, Vec<S>>,
    ) -> Result<Self, AngleError> {
        let mut angles = BTreeMap::new();
        for (angle, cells) in raw {
            let values = parse_cells(&angle, &cells)?;
            angles.insert(angle, values);
        }
        Self::new(sequence, angles)
    }

    /// Builds from plain degree lists, treating NaN as missing.
    pub fn from_degrees(
        sequence: impl Into<String>,
        degrees: BTreeMap<AngleName, Vec<f64>>,
    ) -> Result<Self, AngleError> {
        let mut angles = BTreeMap::new();
        for (angle, values) in degrees {
            let mut parsed = Vec::with_capacity(values.len());
            for (position, value) in values.into_iter().enumerate() {
                let value = AngleValue::from_f64(value).ok_or_else(|| {
                    AngleError::MalformedAngle {
                        angle: angle.clone(),
                        position,
                        raw: value.to_string(),
                    }
                })?;
                parsed.push(value);
            }
            angles.insert(angle, parsed);
        }
        Self::new(sequence, angles)
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    /// Residue count (characters, not bytes).
    pub fn len(&self) -> usize {
        self.residues
    }

    pub fn is_empty(&self) -> bool {
        self.residues == 0
    }

    pub fn angles(&self) -> &BTreeMap<AngleName, Vec<AngleValue>> {
        &self.angles
    }

    pub fn get(&self, angle: &AngleName) -> Option<&[AngleValue]> {
        self.angles.get(angle).map(Vec::as_slice)
    }

    pub fn angle_names(&self) -> impl Iterator<Item = &AngleName> {
        self.angles.keys()
    }

    pub fn missing_positions(&self, angle: &AngleName) -> Vec<usize> {
        self.get(angle)
            .map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, value)| value.is_missing())
                    .map(|(index, _)| index)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn parse_cells<S: AsRef<str>>(angle: &AngleName, cells: &[S]) -> Result<Vec<AngleValue>, AngleError> {
    cells
        .iter()
        .enumerate()
        .map(|(position, cell)| {
            let raw = cell.as_ref();
            AngleValue::parse_token(raw).ok_or_else(|| AngleError::MalformedAngle {
                angle: angle.clone(),
                position,
                raw: raw.to_string(),
            })
        })
        .collect()
}
