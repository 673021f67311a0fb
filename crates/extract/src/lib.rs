mod error;
mod geometry;
mod paths;
mod predictor;
mod runner;

pub use error::ExtractError;
pub use geometry::{parse_angle_table, DssrExtractor, GeometryExtractor, TableError};
pub use paths::{
    discover_inputs, entity_name, file_label, hash_file, resolve_program, ProgramSource,
    DSSR_BIN_ENV, PREDICTOR_BIN_ENV,
};
pub use predictor::{
    parse_prediction, AnglePredictor, CommandPredictor, PrecomputedPredictor, PredictionError,
};
pub use runner::run_tool;
pub use torsion_a_toolspec::ToolSpec;
