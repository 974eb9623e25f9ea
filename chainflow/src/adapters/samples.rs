//! Grouping sequencing files into samples.
//!
//! `<sample>_1.fastq.gz` and `<sample>_2.fastq.gz` form a paired-end sample;
//! any other `<sample>.fastq.gz` is single-end.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use super::env::ProjectFiles;

/// Suffix of compressed FASTQ files.
pub const FASTQ_GZ: &str = ".fastq.gz";

/// Sample name to its files, mates in `_1`, `_2` order.
pub type Samples = BTreeMap<String, Vec<PathBuf>>;

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn mate_sample(name: &str) -> Option<&str> {
    if name.ends_with("_1.fastq.gz") || name.ends_with("_2.fastq.gz") {
        name.split('_').next()
    } else {
        None
    }
}

/// Groups compressed FASTQ paths by sample. Non-FASTQ paths are ignored.
#[must_use]
pub fn group_fastq(paths: &[PathBuf]) -> Samples {
    let mut samples = Samples::new();
    for path in paths {
        let Some(name) = file_name(path) else { continue };
        if let Some(sample) = mate_sample(name) {
            samples.entry(sample.to_string()).or_default().push(path.clone());
        } else if let Some(sample) = name.strip_suffix(FASTQ_GZ) {
            samples.insert(sample.to_string(), vec![path.clone()]);
        }
    }
    for files in samples.values_mut() {
        files.sort();
    }
    samples
}

/// Groups the FASTQ files of a directory, keeping a mate only when its
/// partner is present.
///
/// # Errors
///
/// Returns an IO error if the directory cannot be read.
pub fn group_fastq_dir(dir: &Path) -> io::Result<Samples> {
    let paths = crate::runner::files_with_suffix(dir, FASTQ_GZ)?;
    let mut samples = group_fastq(&paths);
    retain_complete_pairs(&mut samples);
    Ok(samples)
}

/// Drops paired-end samples missing one of their mates.
pub fn retain_complete_pairs(samples: &mut Samples) {
    samples.retain(|sample, files| {
        let names: Vec<&str> = files.iter().filter_map(|f| file_name(f)).collect();
        let has_mates = names.iter().any(|n| mate_sample(n).is_some());
        let first = format!("{sample}_1{FASTQ_GZ}");
        let second = format!("{sample}_2{FASTQ_GZ}");
        !has_mates || (names.contains(&first.as_str()) && names.contains(&second.as_str()))
    });
}

/// Collects files with `suffix` per project from a directory laid out as
/// `<root>/<project>/<file>`.
///
/// Files directly under `root` form a project named after `root` itself.
///
/// # Errors
///
/// Returns an IO error if a directory cannot be read.
pub fn project_files_in(root: &Path, suffix: &str) -> io::Result<ProjectFiles> {
    let mut projects = ProjectFiles::new();

    let top = crate::runner::files_with_suffix(root, suffix)?;
    if !top.is_empty() {
        let name = file_name(root).unwrap_or("default").to_string();
        projects.insert(name, top);
    }

    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    for dir in dirs {
        let files = crate::runner::files_with_suffix(&dir, suffix)?;
        if let (false, Some(name)) = (files.is_empty(), file_name(&dir)) {
            projects.insert(name.to_string(), files);
        }
    }
    Ok(projects)
}
