//! Template and descriptor file loading
//!
//! Reads template captures and locates descriptor tables on disk. Files are
//! read once at startup; nothing here is touched by encode or decode.

use crate::{PatchError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Read a template file named relative to a descriptor directory
pub fn read_template(dir: &Path, file: &str) -> Result<Vec<u8>> {
    let path = dir.join(file);
    fs::read(&path).map_err(|e| {
        PatchError::MalformedPreset(format!(
            "failed to read template '{}': {e}",
            path.display()
        ))
    })
}

/// Descriptor tables (`*.json`) in `dir`, sorted by path
pub fn table_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_paths_are_sorted_json_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("serum.json"), "{}").unwrap();
        fs::write(dir.path().join("3xosc.json"), "{}").unwrap();
        fs::write(dir.path().join("3xosc.fst"), [0u8; 4]).unwrap();

        let paths = table_paths(dir.path()).unwrap();
        let names: Vec<_> = paths
            .iter()
            .filter_map(|p| p.file_name()?.to_str())
            .collect();
        assert_eq!(names, vec!["3xosc.json", "serum.json"]);
    }

    #[test]
    fn test_missing_template_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_template(dir.path(), "missing.fst").unwrap_err();
        assert!(err.to_string().contains("missing.fst"));
    }
}
