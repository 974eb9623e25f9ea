//! Artifact validators used as `validate` predicates.

use std::path::{Path, PathBuf};

use crate::errors::ToolError;

/// Accepts a path that is an existing, non-empty file.
///
/// # Errors
///
/// Returns [`ToolError::InvalidOutput`] otherwise.
pub fn artifact_is_valid(path: &Path) -> Result<(), ToolError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        ToolError::invalid_output(format!("{} is not readable: {e}", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(ToolError::invalid_output(format!(
            "{} is not a file",
            path.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(ToolError::invalid_output(format!(
            "{} is empty",
            path.display()
        )));
    }
    Ok(())
}

/// Accepts a non-empty set of paths that are all valid artifacts.
///
/// # Errors
///
/// Returns the first failure, or [`ToolError::InvalidOutput`] for an empty set.
pub fn artifacts_are_valid<'a, I>(paths: I) -> Result<(), ToolError>
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut seen = false;
    for path in paths {
        artifact_is_valid(path)?;
        seen = true;
    }
    if seen {
        Ok(())
    } else {
        Err(ToolError::invalid_output("no artifacts produced"))
    }
}

/// Lists files in `dir` whose name ends with `suffix`, sorted by name.
///
/// # Errors
///
/// Returns an IO error if the directory cannot be read.
pub fn files_with_suffix(dir: &Path, suffix: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix));
        if matches && entry.file_type()?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_artifact_validation() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.sam");
        let empty = dir.path().join("empty.sam");
        let full = dir.path().join("full.sam");
        fs::write(&empty, b"").unwrap();
        fs::write(&full, b"@HD\tVN:1.6\n").unwrap();

        assert!(artifact_is_valid(&missing).is_err());
        assert!(artifact_is_valid(&empty).is_err());
        assert!(artifact_is_valid(dir.path()).is_err());
        assert!(artifact_is_valid(&full).is_ok());

        assert!(artifacts_are_valid([full.as_path()]).is_ok());
        assert!(artifacts_are_valid([full.as_path(), empty.as_path()]).is_err());
        assert!(artifacts_are_valid(std::iter::empty()).is_err());
    }

    #[test]
    fn test_files_with_suffix() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.sam"), b"x").unwrap();
        fs::write(dir.path().join("a.sam"), b"x").unwrap();
        fs::write(dir.path().join("a.log"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested.sam")).unwrap();

        let files = files_with_suffix(dir.path(), ".sam").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.sam", "b.sam"]);
    }
}
