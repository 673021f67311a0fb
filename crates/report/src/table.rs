use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const RNA_COLUMN: &str = "RNA";
pub const METRIC_TORSION_A: &str = "RNA-Torsion-A";
pub const METRIC_MAE: &str = "MAE";

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TableRow {
    pub rna: String,
    pub score: Option<f64>,
}

/// One row per constructed entity; unscored entities keep a row with an empty
/// score cell.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ResultTable {
    pub metric: String,
    pub rows: Vec<TableRow>,
}

#[derive(Debug)]
pub struct WriteError {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to write {}: {}", self.path.display(), self.message)
    }
}

impl std::error::Error for WriteError {}

impl ResultTable {
    pub fn new(metric: &str) -> Self {
        Self {
            metric: metric.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, rna: impl Into<String>, score: Option<f64>) {
        self.rows.push(TableRow {
            rna: rna.into(),
            score,
        });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn scored(&self) -> usize {
        self.rows.iter().filter(|row| row.score.is_some()).count()
    }

    pub fn to_csv(&self) -> String {
        let mut out = format!("{},{}\n", RNA_COLUMN, csv_escape(&self.metric));
        for row in &self.rows {
            let score = row.score.map(fmt_score).unwrap_or_default();
            out.push_str(&csv_escape(&row.rna));
            out.push(',');
            out.push_str(&score);
            out.push('\n');
        }
        out
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), WriteError> {
        fs::write(path, self.to_csv()).map_err(|err| WriteError {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }
}

fn fmt_score(value: f64) -> String {
    if value.is_finite() {
        format!("{}", value)
    } else {
        String::new()
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_missing_cells() {
        let mut table = ResultTable::new(METRIC_TORSION_A);
        table.push("1abc.pdb", Some(12.5));
        table.push("2xyz.pdb", None);
        assert_eq!(
            table.to_csv(),
            "RNA,RNA-Torsion-A\n1abc.pdb,12.5\n2xyz.pdb,\n"
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.scored(), 1);
    }

    #[test]
    fn names_with_delimiters_are_quoted() {
        let mut table = ResultTable::new(METRIC_MAE);
        table.push("a,\"b\"", Some(1.0));
        assert_eq!(table.to_csv(), "RNA,MAE\n\"a,\"\"b\"\"\",1\n");
    }
}
