//! Leftover run directories.
//!
//! A run removes its own working directory, but a killed process can leave
//! `bootpatch-run-*` directories behind in the temp root.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::patch::WORKDIR_PREFIX;

/// Run directories directly under `root`.
pub fn stale_work_dirs(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| e.file_name().to_string_lossy().starts_with(WORKDIR_PREFIX))
        .map(|e| e.into_path())
        .collect()
}

/// Remove a directory tree, ignoring a missing one.
pub fn cleanup_work_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
