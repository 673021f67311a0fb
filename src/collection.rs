use crate::angles::{AngleError, AngleName, AngleValue, AngleVector, MISSING_TOKEN_OUT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Entity name -> angle vector.
pub type EntityCollection = BTreeMap<String, AngleVector>;

#[derive(Debug)]
pub enum CollectionError {
    NotJson { path: PathBuf },
    Io { path: PathBuf, message: String },
    Json { path: PathBuf, message: String },
}

impl CollectionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotJson { .. } => "COLLECTION_NOT_JSON",
            Self::Io { .. } => "COLLECTION_IO",
            Self::Json { .. } => "COLLECTION_JSON",
        }
    }
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotJson { path } => write!(f, "not a .json file: {}", path.display()),
            Self::Io { path, message } => write!(f, "I/O error at {}: {}", path.display(), message),
            Self::Json { path, message } => {
                write!(f, "invalid collection JSON at {}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for CollectionError {}

/// A read collection plus the entries that failed construction.
#[derive(Debug, Default)]
pub struct CollectionLoad {
    pub entities: EntityCollection,
    pub failures: Vec<(String, AngleError)>,
}

#[derive(Serialize)]
struct StoredEntity<'a> {
    sequence: &'a str,
    angles: BTreeMap<&'a AngleName, Vec<Value>>,
}

#[derive(Deserialize)]
struct RawEntity {
    sequence: String,
    #[serde(default)]
    angles: BTreeMap<String, Vec<Value>>,
}

/// Appends `.json` when the path lacks it.
pub fn json_path(path: &Path) -> PathBuf {
    if has_json_extension(path) {
        path.to_path_buf()
    } else {
        let mut raw = path.as_os_str().to_os_string();
        raw.push(".json");
        PathBuf::from(raw)
    }
}

pub fn to_json_value(collection: &EntityCollection) -> Result<Value, serde_json::Error> {
    let stored: BTreeMap<&str, StoredEntity<'_>> = collection
        .iter()
        .map(|(name, vector)| (name.as_str(), stored_entity(vector)))
        .collect();
    serde_json::to_value(stored)
}

/// Writes the collection and returns the path actually written.
pub fn write_collection(path: &Path, collection: &EntityCollection) -> Result<PathBuf, CollectionError> {
    let target = json_path(path);
    let json_error = |err: serde_json::Error| CollectionError::Json {
        path: target.clone(),
        message: err.to_string(),
    };
    let value = to_json_value(collection).map_err(json_error)?;
    let mut bytes = serde_json::to_vec_pretty(&value).map_err(json_error)?;
    bytes.push(b'\n');
    fs::write(&target, bytes).map_err(|err| CollectionError::Io {
        path: target.clone(),
        message: err.to_string(),
    })?;
    Ok(target)
}

pub fn read_collection(path: &Path) -> Result<CollectionLoad, CollectionError> {
    if !has_json_extension(path) {
        return Err(CollectionError::NotJson {
            path: path.to_path_buf(),
        });
    }
    let bytes = fs::read(path).map_err(|err| CollectionError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let raw: BTreeMap<String, RawEntity> =
        serde_json::from_slice(&bytes).map_err(|err| CollectionError::Json {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

    let mut load = CollectionLoad::default();
    for (name, entity) in raw {
        match parse_entity(entity) {
            Ok(vector) => {
                load.entities.insert(name, vector);
            }
            Err(err) => {
                log::warn!("{}: dropped from {}: {}", name, path.display(), err);
                load.failures.push((name, err));
            }
        }
    }
    Ok(load)
}

fn has_json_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn stored_entity(vector: &AngleVector) -> StoredEntity<'_> {
    let angles = vector
        .angles()
        .iter()
        .map(|(angle, values)| (angle, values.iter().map(|v| stored_value(*v)).collect()))
        .collect();
    StoredEntity {
        sequence: vector.sequence(),
        angles,
    }
}

fn stored_value(value: AngleValue) -> Value {
    match value {
        AngleValue::Degrees(degrees) => serde_json::Number::from_f64(degrees)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(MISSING_TOKEN_OUT.to_string())),
        AngleValue::Missing => Value::String(MISSING_TOKEN_OUT.to_string()),
    }
}

fn parse_entity(entity: RawEntity) -> Result<AngleVector, AngleError> {
    let mut angles = BTreeMap::new();
    for (name, cells) in entity.angles {
        let angle = AngleName::parse(&name);
        if angles.contains_key(&angle) {
            return Err(AngleError::DuplicateAngle { angle });
        }
        let mut values = Vec::with_capacity(cells.len());
        for (position, cell) in cells.iter().enumerate() {
            values.push(AngleValue::from_json(cell).ok_or_else(|| AngleError::MalformedAngle {
                angle: angle.clone(),
                position,
                raw: cell.to_string(),
            })?);
        }
        angles.insert(angle, values);
    }
    AngleVector::new(entity.sequence, angles)
}
