use std::fmt;
use std::io;
use std::path::PathBuf;
use torsion_a_core::AngleError;

#[derive(Clone, Debug)]
pub enum ExtractError {
    InputMissing {
        path: PathBuf,
    },
    Spawn {
        program: String,
        message: String,
    },
    Timeout {
        program: String,
        timeout_secs: u64,
    },
    ToolFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
    EmptyOutput {
        program: String,
    },
    OutputParse {
        program: String,
        message: String,
    },
    Angle(AngleError),
    NotPrecomputed {
        name: String,
    },
    Io {
        path: Option<PathBuf>,
        message: String,
    },
}

impl ExtractError {
    pub(crate) fn io(path: Option<PathBuf>, error: io::Error) -> Self {
        Self::Io {
            path,
            message: error.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InputMissing { .. } => "INPUT_MISSING",
            Self::Spawn { .. } => "TOOL_SPAWN",
            Self::Timeout { .. } => "TOOL_TIMEOUT",
            Self::ToolFailed { .. } => "TOOL_FAILED",
            Self::EmptyOutput { .. } => "TOOL_EMPTY_OUTPUT",
            Self::OutputParse { .. } => "TOOL_OUTPUT_PARSE",
            Self::Angle(err) => err.code(),
            Self::NotPrecomputed { .. } => "NOT_PRECOMPUTED",
            Self::Io { .. } => "IO_ERROR",
        }
    }
}

impl From<AngleError> for ExtractError {
    fn from(value: AngleError) -> Self {
        Self::Angle(value)
    }
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputMissing { path } => write!(f, "input file not found: {}", path.display()),
            Self::Spawn { program, message } => {
                write!(f, "failed to launch {}: {}", program, message)
            }
            Self::Timeout {
                program,
                timeout_secs,
            } => write!(f, "{} did not finish within {}s", program, timeout_secs),
            Self::ToolFailed {
                program,
                status,
                stderr,
            } => {
                let status = status
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                write!(f, "{} exited with status {}: {}", program, status, stderr.trim())
            }
            Self::EmptyOutput { program } => write!(f, "{} produced no residues", program),
            Self::OutputParse { program, message } => {
                write!(f, "unreadable output from {}: {}", program, message)
            }
            Self::Angle(err) => write!(f, "{}", err),
            Self::NotPrecomputed { name } => {
                write!(f, "no precomputed angles for entity {}", name)
            }
            Self::Io { path, message } => {
                let detail = path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                write!(f, "I/O error at {}: {}", detail, message)
            }
        }
    }
}

impl std::error::Error for ExtractError {}
