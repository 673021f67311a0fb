use crate::ExtractError;
use blake3::Hasher;
use directories::ProjectDirs;
use std::env;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use torsion_a_toolspec::ToolSpec;

pub const DSSR_BIN_ENV: &str = "TORSION_A_DSSR_BIN";
pub const PREDICTOR_BIN_ENV: &str = "TORSION_A_PREDICTOR_BIN";

/// Where a tool program was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgramSource {
    Explicit,
    Env,
    DataDir,
    Path,
}

impl ProgramSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Env => "env",
            Self::DataDir => "data_dir",
            Self::Path => "path",
        }
    }
}

/// Resolves the executable for `spec`.
///
/// A program that names a path (contains a separator) is used verbatim, then
/// `env_key`, then `<data dir>/tools/<program>`, then a bare PATH lookup.
pub fn resolve_program(spec: &ToolSpec, env_key: &str) -> (PathBuf, ProgramSource) {
    let configured = Path::new(&spec.program);
    if configured.components().count() > 1 {
        return (configured.to_path_buf(), ProgramSource::Explicit);
    }
    if let Ok(value) = env::var(env_key) {
        if !value.trim().is_empty() {
            return (PathBuf::from(value), ProgramSource::Env);
        }
    }
    if let Some(project) = ProjectDirs::from("org", "torsion-a", "torsion-a") {
        let candidate = project.data_dir().join("tools").join(&spec.program);
        if candidate.is_file() {
            return (candidate, ProgramSource::DataDir);
        }
    }
    (configured.to_path_buf(), ProgramSource::Path)
}

/// Lists scorable inputs: a file is taken as-is; a directory contributes its
/// regular files whose extension is in `extensions` (case-insensitive),
/// sorted by path. Anything else yields nothing.
pub fn discover_inputs(path: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, ExtractError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    let entries = fs::read_dir(path).map_err(|err| ExtractError::io(Some(path.to_path_buf()), err))?;
    for entry in entries {
        let entry = entry.map_err(|err| ExtractError::io(Some(path.to_path_buf()), err))?;
        let entry_path = entry.path();
        if entry_path.is_file() && has_extension(&entry_path, extensions) {
            found.push(entry_path);
        }
    }
    found.sort();
    Ok(found)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Entity name: the file name without its extension (`1abc.pdb` -> `1abc`).
pub fn entity_name(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Row label in result tables: the bare file name.
pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn hash_file(path: &Path) -> Result<String, ExtractError> {
    let mut file = File::open(path).map_err(|err| ExtractError::io(Some(path.to_path_buf()), err))?;
    let mut hasher = Hasher::new();
    let mut buf = [0_u8; 8192];
    loop {
        let read = file
            .read(&mut buf)
            .map_err(|err| ExtractError::io(Some(path.to_path_buf()), err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn directory_inputs_are_filtered_and_sorted() {
        let temp = TempDir::new().expect("tempdir");
        let dir = temp.path();
        for name in ["b.pdb", "a.PDB", "notes.txt", "c.cif"] {
            fs::write(dir.join(name), "x").expect("write");
        }
        fs::create_dir_all(dir.join("sub.pdb")).expect("subdir");

        let found = discover_inputs(dir, &["pdb".to_string()]).expect("list");
        let names: Vec<String> = found.iter().map(|p| file_label(p)).collect();
        assert_eq!(names, vec!["a.PDB", "b.pdb"]);

        let all = discover_inputs(dir, &[]).expect("list");
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn single_file_and_missing_path() {
        let temp = TempDir::new().expect("tempdir");
        let dir = temp.path();
        let file = dir.join("x.txt");
        fs::write(&file, "x").expect("write");
        assert_eq!(
            discover_inputs(&file, &["pdb".to_string()]).expect("file"),
            vec![file.clone()]
        );
        assert!(discover_inputs(&dir.join("absent"), &[])
            .expect("absent")
            .is_empty());
    }

    #[test]
    fn names_strip_extension() {
        assert_eq!(entity_name(Path::new("/data/1abc.pdb")), "1abc");
        assert_eq!(file_label(Path::new("/data/1abc.pdb")), "1abc.pdb");
    }

    #[test]
    fn file_hash_matches_blake3_of_bytes() {
        let temp = TempDir::new().expect("tempdir");
        let dir = temp.path();
        let file = dir.join("h.pdb");
        fs::write(&file, b"ATOM").expect("write");
        assert_eq!(
            hash_file(&file).expect("hash"),
            blake3::hash(b"ATOM").to_hex().to_string()
        );
    }

    #[test]
    fn explicit_program_path_wins() {
        let mut spec = ToolSpec::dssr();
        spec.program = "/opt/dssr/bin/analyze".to_string();
        let (program, source) = resolve_program(&spec, DSSR_BIN_ENV);
        assert_eq!(program, PathBuf::from("/opt/dssr/bin/analyze"));
        assert_eq!(source, ProgramSource::Explicit);
    }
}
