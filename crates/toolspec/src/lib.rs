use serde::{Deserialize, Serialize};

pub const DSSR_TOOL_NAME: &str = "dssr";
pub const DSSR_PROGRAM: &str = "analyze";
pub const TORSION_BERT_TOOL_NAME: &str = "rna-torsionbert";
pub const TORSION_BERT_PROGRAM: &str = "rna-torsionbert-predict";
pub const TORSION_BERT_MODEL_ID: &str = "sayby/rna_torsionbert";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

pub const PLACEHOLDER_INPUT: &str = "{input}";
pub const PLACEHOLDER_SEQUENCE: &str = "{sequence}";
pub const PLACEHOLDER_MODEL: &str = "{model}";

/// How to invoke one external collaborator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    #[serde(default)]
    pub model_id: Option<String>,
}

impl ToolSpec {
    /// Geometry extraction: prints a per-residue CSV table for `{input}`.
    pub fn dssr() -> Self {
        Self {
            name: DSSR_TOOL_NAME.to_string(),
            program: DSSR_PROGRAM.to_string(),
            args: vec![PLACEHOLDER_INPUT.to_string()],
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            model_id: None,
        }
    }

    /// Angle prediction from sequence: prints a JSON angle map.
    pub fn torsion_bert() -> Self {
        Self {
            name: TORSION_BERT_TOOL_NAME.to_string(),
            program: TORSION_BERT_PROGRAM.to_string(),
            args: vec![
                "--model".to_string(),
                PLACEHOLDER_MODEL.to_string(),
                "--sequence".to_string(),
                PLACEHOLDER_SEQUENCE.to_string(),
            ],
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            model_id: Some(TORSION_BERT_MODEL_ID.to_string()),
        }
    }

    /// Substitutes placeholders in every argument. `{model}` falls back to an
    /// empty string when no model id is set.
    pub fn render_args(&self, input: Option<&str>, sequence: Option<&str>) -> Vec<String> {
        let model = self.model_id.as_deref().unwrap_or("");
        self.args
            .iter()
            .map(|arg| {
                let mut rendered = arg.replace(PLACEHOLDER_MODEL, model);
                if let Some(input) = input {
                    rendered = rendered.replace(PLACEHOLDER_INPUT, input);
                }
                if let Some(sequence) = sequence {
                    rendered = rendered.replace(PLACEHOLDER_SEQUENCE, sequence);
                }
                rendered
            })
            .collect()
    }
}
