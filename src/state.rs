//! The active package: which Magisk APK `patch` uses when `--apk` is omitted.
//!
//! Stored as `active-package.json` in the state directory. Written after a
//! successful download or an explicit `--apk` selection.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "active-package.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePackage {
    pub path: PathBuf,
    /// Release tag, when the package came from a download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Local time of selection, `%Y-%m-%d %H:%M:%S`.
    pub selected_at: String,
}

impl ActivePackage {
    pub fn new(path: impl Into<PathBuf>, tag: Option<String>) -> Self {
        Self {
            path: path.into(),
            tag,
            selected_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Reads and writes the active-package record.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// `Ok(None)` when nothing was ever selected.
    pub fn load(&self) -> Result<Option<ActivePackage>> {
        let file = self.file();
        if !file.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let active = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt state file {}", file.display()))?;
        Ok(Some(active))
    }

    pub fn save(&self, active: &ActivePackage) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let json = serde_json::to_string_pretty(active)?;
        let file = self.file();
        fs::write(&file, json).with_context(|| format!("Failed to write {}", file.display()))
    }

    /// Record `path` as active, made absolute so it survives directory changes.
    pub fn select(&self, path: &Path, tag: Option<String>) -> Result<ActivePackage> {
        let path = fs::canonicalize(path)
            .with_context(|| format!("Package not found: {}", path.display()))?;
        let active = ActivePackage::new(path, tag);
        self.save(&active)?;
        Ok(active)
    }

    /// The active package, if one is recorded and still exists on disk.
    pub fn active_existing(&self) -> Result<Option<ActivePackage>> {
        Ok(self.load()?.filter(|a| a.path.is_file()))
    }
}
