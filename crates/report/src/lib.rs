use serde::{Deserialize, Serialize};

mod config;
mod table;

pub use config::{
    config_hash, default_config_path, default_scoring_config, load_config, parse_config, validate,
    ConfigError, LoadedConfig, ScoringConfig, CONFIG_ENV_KEY, CONFIG_FILE_NAME,
    LENGTH_MISMATCH_POLICY, METRIC_ALGO_ID,
};
pub use table::{ResultTable, TableRow, WriteError, METRIC_MAE, METRIC_TORSION_A, RNA_COLUMN};

pub fn jcs_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_jcs::to_vec(value).expect("JCS serialization failed")
}

pub fn blake3_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Env,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuditTrace {
    pub metric_algo_id: String,
    pub length_mismatch_policy: String,
    pub tools: Vec<ToolTrace>,
    pub hashes: HashesTrace,
    #[serde(default)]
    pub warnings: Vec<AuditWarning>,
    pub config_source: ConfigSource,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolTrace {
    pub name: String,
    pub program: String,
    pub program_source: String,
    pub model_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HashesTrace {
    pub config_hash: String,
    pub inputs_hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditWarning {
    #[serde(rename = "type")]
    pub warning_type: String,
    pub entity: String,
    pub message: String,
}

/// Batch counts reported alongside a result table.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub inputs_total: usize,
    pub rows: usize,
    pub scored: usize,
    pub unscored: usize,
    pub omitted: usize,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn jcs_hash_stable_for_key_order() {
        let v1 = json!({"b": 1, "a": 2});
        let v2 = json!({"a": 2, "b": 1});
        assert_eq!(blake3_hex(&jcs_bytes(&v1)), blake3_hex(&jcs_bytes(&v2)));
    }

    #[test]
    fn audit_warning_serializes_type_key() {
        let warning = AuditWarning {
            warning_type: "LENGTH_MISMATCH".to_string(),
            entity: "1abc.pdb".to_string(),
            message: "reference 10 vs predicted 12".to_string(),
        };
        let value = serde_json::to_value(&warning).expect("json");
        assert_eq!(value["type"], "LENGTH_MISMATCH");
    }

    #[test]
    fn config_source_is_lowercase() {
        assert_eq!(
            serde_json::to_value(ConfigSource::Env).expect("json"),
            json!("env")
        );
    }
}
