use crate::{blake3_hex, jcs_bytes, ConfigSource};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use torsion_a_toolspec::ToolSpec;

pub const CONFIG_ENV_KEY: &str = "TORSION_A_CONFIG";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const METRIC_ALGO_ID: &str = "circular_mae_v1_skip_missing_mean_over_angles";
pub const LENGTH_MISMATCH_POLICY: &str = "skip_with_warning";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
    pub metric_algo_id: String,
    pub extractor: ToolSpec,
    pub predictor: ToolSpec,
    pub input_extensions: Vec<String>,
    pub length_mismatch_policy: String,
}

pub fn default_scoring_config() -> ScoringConfig {
    ScoringConfig {
        metric_algo_id: METRIC_ALGO_ID.to_string(),
        extractor: ToolSpec::dssr(),
        predictor: ToolSpec::torsion_bert(),
        input_extensions: vec!["pdb".to_string()],
        length_mismatch_policy: LENGTH_MISMATCH_POLICY.to_string(),
    }
}

pub fn config_hash(config: &ScoringConfig) -> String {
    blake3_hex(&jcs_bytes(config))
}

/// Partial config file; absent fields keep their defaults. Policy fields are
/// fixed and not read from disk.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    extractor: Option<ToolSpec>,
    predictor: Option<ToolSpec>,
    input_extensions: Option<Vec<String>>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, message: String },
    Parse { path: PathBuf, message: String },
    Invalid { message: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "CONFIG_IO",
            Self::Parse { .. } => "CONFIG_PARSE",
            Self::Invalid { .. } => "CONFIG_INVALID",
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "failed to read config {}: {}", path.display(), message)
            }
            Self::Parse { path, message } => {
                write!(f, "invalid config {}: {}", path.display(), message)
            }
            Self::Invalid { message } => write!(f, "invalid config: {}", message),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug)]
pub struct LoadedConfig {
    pub config: ScoringConfig,
    pub source: ConfigSource,
    pub path: Option<PathBuf>,
}

/// Load order: explicit path, `TORSION_A_CONFIG`, `<config dir>/config.json`
/// when it exists, built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    if let Some(path) = explicit {
        return load_from(path, ConfigSource::File);
    }
    if let Ok(value) = env::var(CONFIG_ENV_KEY) {
        if !value.trim().is_empty() {
            return load_from(Path::new(&value), ConfigSource::Env);
        }
    }
    if let Some(path) = default_config_path() {
        if path.is_file() {
            return load_from(&path, ConfigSource::File);
        }
    }
    Ok(LoadedConfig {
        config: default_scoring_config(),
        source: ConfigSource::Default,
        path: None,
    })
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "torsion-a", "torsion-a")
        .map(|project| project.config_dir().join(CONFIG_FILE_NAME))
}

fn load_from(path: &Path, source: ConfigSource) -> Result<LoadedConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|err| ConfigError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let config = parse_config(&text).map_err(|err| match err {
        ConfigError::Parse { message, .. } => ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })?;
    log::debug!("loaded config from {}", path.display());
    Ok(LoadedConfig {
        config,
        source,
        path: Some(path.to_path_buf()),
    })
}

pub fn parse_config(text: &str) -> Result<ScoringConfig, ConfigError> {
    let file: ConfigFile = serde_json::from_str(text).map_err(|err| ConfigError::Parse {
        path: PathBuf::new(),
        message: err.to_string(),
    })?;
    let mut config = default_scoring_config();
    if let Some(extractor) = file.extractor {
        config.extractor = extractor;
    }
    if let Some(predictor) = file.predictor {
        config.predictor = predictor;
    }
    if let Some(extensions) = file.input_extensions {
        config.input_extensions = extensions;
    }
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &ScoringConfig) -> Result<(), ConfigError> {
    for spec in [&config.extractor, &config.predictor] {
        if spec.program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: format!("{}: program must not be empty", spec.name),
            });
        }
        if spec.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: format!("{}: timeout_secs must be >= 1", spec.name),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_hash_is_stable_and_sensitive() {
        let base = default_scoring_config();
        assert_eq!(config_hash(&base), config_hash(&default_scoring_config()));

        let mut variant = default_scoring_config();
        variant.extractor.timeout_secs += 1;
        assert_ne!(config_hash(&base), config_hash(&variant));
    }

    #[test]
    fn hashed_config_carries_only_effective_settings() {
        let value = serde_json::to_value(default_scoring_config()).expect("json");
        let mut keys: Vec<&str> = value
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "extractor",
                "input_extensions",
                "length_mismatch_policy",
                "metric_algo_id",
                "predictor"
            ]
        );
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let config = parse_config(
            r#"{"extractor": {"name": "dssr", "program": "/opt/x3dna/analyze", "args": ["-i", "{input}"], "timeout_secs": 30}}"#,
        )
        .expect("valid");
        assert_eq!(config.extractor.program, "/opt/x3dna/analyze");
        assert_eq!(config.predictor, ToolSpec::torsion_bert());
        assert_eq!(config.input_extensions, vec!["pdb"]);
        assert_eq!(config.length_mismatch_policy, LENGTH_MISMATCH_POLICY);
    }

    #[test]
    fn unknown_fields_and_zero_timeout_are_rejected() {
        assert_eq!(
            parse_config(r#"{"length_mismatch_policy": "fail"}"#)
                .expect_err("unknown")
                .code(),
            "CONFIG_PARSE"
        );
        assert_eq!(
            parse_config(
                r#"{"predictor": {"name": "p", "program": "p", "args": [], "timeout_secs": 0}}"#
            )
            .expect_err("zero")
            .code(),
            "CONFIG_INVALID"
        );
    }

    #[test]
    fn explicit_missing_file_is_io_error() {
        let err = load_config(Some(Path::new("/nonexistent/torsion-a.json"))).expect_err("io");
        assert_eq!(err.code(), "CONFIG_IO");
    }
}
