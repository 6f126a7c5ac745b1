//! Source discovery and in-place replacement.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Regular files in `dir` with the given extension, sorted by name.
pub fn list_sources(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to open directory {}", dir.display()))?;

    let mut sources = Vec::new();
    for entry in entries {
        let entry = entry.context("Failed to read directory entry")?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        // Follows symlinks, like stat().
        if std::fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false) {
            sources.push(path);
        }
    }
    sources.sort();
    Ok(sources)
}

/// Temporary path used while replacing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Replaces `path` with `content`: temp file then rename.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let temp = temp_path(path);
    std::fs::write(&temp, content)
        .with_context(|| format!("Failed to write {}", temp.display()))?;
    std::fs::rename(&temp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_sources_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.dts", "a.dts", "c.dtb", "notes.txt", "d.dts.tmp"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.dts")).unwrap();

        let sources = list_sources(dir.path(), "dts").unwrap();
        let names: Vec<_> = sources
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.dts", "b.dts"]);
    }

    #[test]
    fn test_list_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_sources(&dir.path().join("dtbo_dts"), "dts").is_err());
    }

    #[test]
    fn test_write_atomic_replaces_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.dts");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, "new").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(temp_path(&path), dir.path().join("0.dts.tmp"));
        assert!(!temp_path(&path).exists());
    }
}
