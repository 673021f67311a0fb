use crate::runner::run_tool;
use crate::ExtractError;
use csv::{ReaderBuilder, Trim};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use torsion_a_core::{AngleName, AngleVector};
use torsion_a_toolspec::ToolSpec;

const SEQUENCE_COLUMN: &str = "sequence";

/// Source of experimental angles for one structure file.
pub trait GeometryExtractor {
    fn extract(&self, path: &Path) -> Result<AngleVector, ExtractError>;
}

impl<F> GeometryExtractor for F
where
    F: Fn(&Path) -> Result<AngleVector, ExtractError>,
{
    fn extract(&self, path: &Path) -> Result<AngleVector, ExtractError> {
        self(path)
    }
}

/// Runs the DSSR-based helper and parses its per-residue table.
#[derive(Clone, Debug)]
pub struct DssrExtractor {
    spec: ToolSpec,
    program: PathBuf,
}

impl DssrExtractor {
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

impl GeometryExtractor for DssrExtractor {
    fn extract(&self, path: &Path) -> Result<AngleVector, ExtractError> {
        if !path.is_file() {
            return Err(ExtractError::InputMissing {
                path: path.to_path_buf(),
            });
        }
        let input = path.display().to_string();
        let args = self.spec.render_args(Some(&input), None);
        log::info!("extracting angles from {}", input);
        let stdout = run_tool(
            &self.program,
            &args,
            Duration::from_secs(self.spec.timeout_secs),
        )?;
        parse_angle_table(&stdout).map_err(|err| match err {
            TableError::Angle(err) => ExtractError::Angle(err),
            TableError::Empty => ExtractError::EmptyOutput {
                program: self.spec.name.clone(),
            },
            TableError::Format(message) => ExtractError::OutputParse {
                program: self.spec.name.clone(),
                message,
            },
        })
    }
}

#[derive(Debug, PartialEq)]
pub enum TableError {
    Empty,
    Format(String),
    Angle(torsion_a_core::AngleError),
}

/// Parses a delimited per-residue table with a header row.
///
/// The `sequence` column holds one residue symbol per row. Every header that
/// names a canonical angle becomes an angle column; other columns are ignored.
/// Comma is the delimiter unless the header only contains tabs.
pub fn parse_angle_table(text: &str) -> Result<AngleVector, TableError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let header = text
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or(TableError::Empty)?;
    let delimiter = if !header.contains(',') && header.contains('\t') {
        b'\t'
    } else {
        b','
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .delimiter(delimiter)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let columns = reader.headers().map_err(format_error)?.clone();
    let sequence_index = columns
        .iter()
        .position(|name| name.eq_ignore_ascii_case(SEQUENCE_COLUMN))
        .ok_or_else(|| TableError::Format("missing sequence column".to_string()))?;
    let mut angle_columns: Vec<(usize, AngleName)> = Vec::new();
    for (index, name) in columns.iter().enumerate() {
        let Some(angle) = AngleName::canonical(name) else {
            continue;
        };
        if angle_columns.iter().any(|(_, seen)| *seen == angle) {
            return Err(TableError::Format(format!(
                "duplicate angle column {:?}",
                name
            )));
        }
        angle_columns.push((index, angle));
    }

    let mut sequence = String::new();
    let mut cells: BTreeMap<AngleName, Vec<String>> = angle_columns
        .iter()
        .map(|(_, angle)| (angle.clone(), Vec::new()))
        .collect();

    for record in reader.records() {
        let record = record.map_err(format_error)?;
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        let symbol = record.get(sequence_index).unwrap_or_default();
        let mut chars = symbol.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => sequence.push(ch),
            _ => {
                return Err(TableError::Format(format!(
                    "line {}: sequence cell must be one residue symbol, got {:?}",
                    line, symbol
                )))
            }
        }
        for (index, angle) in &angle_columns {
            if let Some(values) = cells.get_mut(angle) {
                values.push(record.get(*index).unwrap_or_default().to_string());
            }
        }
    }

    if sequence.is_empty() {
        return Err(TableError::Empty);
    }
    AngleVector::from_raw(sequence, cells).map_err(TableError::Angle)
}

fn format_error(err: csv::Error) -> TableError {
    TableError::Format(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use torsion_a_core::AngleValue;

    const TABLE: &str = "\
index,sequence,alpha,beta,gamma,delta,epsilon,zeta,chi,eta,theta,puckering
1,G,NA,NA,54.2,81.0,-152.3,-71.9,-163.4,NA,NA,C3'-endo
2,G,-68.0,176.1,52.9,82.4,-155.0,-70.1,-160.2,167.3,-151.0,C3'-endo
3,C,-70.5,BII,49.0,80.8,NA,NA,-158.1,NA,NA,C3'-endo
";

    #[test]
    fn parses_dssr_style_table() {
        let vector = parse_angle_table(TABLE).expect("valid");
        assert_eq!(vector.sequence(), "GGC");
        assert_eq!(vector.angle_names().count(), 9);
        assert_eq!(vector.missing_positions(&AngleName::Alpha), vec![0]);
        assert_eq!(vector.missing_positions(&AngleName::Beta), vec![0, 2]);
        assert_eq!(
            vector.get(&AngleName::Eta).expect("eta")[1],
            AngleValue::Degrees(167.3)
        );
    }

    #[test]
    fn tab_delimited_uppercase_headers() {
        let text = "sequence\tETA\tTHETA\nA\t163\tNA\nU\tNA\t-12.5\n";
        let vector = parse_angle_table(text).expect("valid");
        assert_eq!(vector.sequence(), "AU");
        assert_eq!(vector.missing_positions(&AngleName::Theta), vec![0]);
    }

    #[test]
    fn quoted_cells_are_unwrapped() {
        let text = "\"sequence\",\"eta\"\n\"A\",\"10.5\"\n\"G\",\"\"\n";
        let vector = parse_angle_table(text).expect("valid");
        assert_eq!(vector.missing_positions(&AngleName::Eta), vec![1]);
    }

    #[test]
    fn empty_output_is_reported() {
        assert_eq!(parse_angle_table(""), Err(TableError::Empty));
        assert_eq!(parse_angle_table("sequence,eta\n"), Err(TableError::Empty));
    }

    #[test]
    fn malformed_cell_is_angle_error() {
        let err = parse_angle_table("sequence,chi\nA,oops\n").expect_err("must fail");
        assert!(matches!(err, TableError::Angle(_)));
    }

    #[test]
    fn quoted_newline_stays_in_one_cell() {
        let text = "sequence,eta,note\nA,10,\"two\nlines\"\nG,20,x\n";
        let vector = parse_angle_table(text).expect("valid");
        assert_eq!(vector.sequence(), "AG");
        assert_eq!(
            vector.get(&AngleName::Eta).expect("eta"),
            &[AngleValue::Degrees(10.0), AngleValue::Degrees(20.0)]
        );
    }

    #[test]
    fn duplicate_angle_headers_are_rejected() {
        let err = parse_angle_table("sequence,eta,ETA\nA,1,2\n").expect_err("must fail");
        match err {
            TableError::Format(message) => assert!(message.contains("duplicate")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn bad_sequence_cell_reports_file_line() {
        let err = parse_angle_table("sequence,eta\nA,1\nGC,2\n").expect_err("must fail");
        match err {
            TableError::Format(message) => assert!(message.starts_with("line 3:"), "{}", message),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn ragged_row_is_format_error() {
        let err = parse_angle_table("sequence,chi\nA,1,2\n").expect_err("must fail");
        assert!(matches!(err, TableError::Format(_)));
    }

    #[test]
    fn closure_can_stand_in_for_extractor() {
        let fake = |_path: &Path| parse_angle_table("sequence,eta\nA,1\n").map_err(|_| {
            ExtractError::EmptyOutput {
                program: "fake".to_string(),
            }
        });
        let vector = fake.extract(Path::new("x.pdb")).expect("fake");
        assert_eq!(vector.len(), 1);
    }
}
