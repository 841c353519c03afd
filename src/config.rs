//! Configuration management for bootpatch.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::arch::Arch;
use crate::release::DEFAULT_RELEASE_API;
use crate::toolkit;

/// bootpatch configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit toolkit binary (BOOTPATCH_TOOLKIT)
    pub toolkit: Option<PathBuf>,
    /// Release metadata endpoint
    pub release_api: String,
    /// Where downloaded packages land (default: current directory)
    pub download_dir: PathBuf,
    /// Architecture used when `--arch` is not given
    pub default_arch: Arch,
    /// Holds the active-package record
    pub state_dir: PathBuf,
}

impl Config {
    /// Load configuration from `base_dir/.env` and the environment.
    ///
    /// Relative paths are resolved against `base_dir`. An unparseable
    /// BOOTPATCH_ARCH falls back to the default with a warning.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if let Ok(content) = fs::read_to_string(&env_path) {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let value = value.trim().trim_matches('"').trim_matches('\'');
                    env_vars.insert(key.trim().to_string(), value.to_string());
                }
            }
        }

        // Environment variables override .env file
        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        let resolve = |s: &String| {
            let path = PathBuf::from(s);
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };

        let toolkit = env_vars
            .get("BOOTPATCH_TOOLKIT")
            .filter(|s| !s.is_empty())
            .map(resolve);

        let release_api = env_vars
            .get("BOOTPATCH_RELEASE_API")
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_RELEASE_API.to_string());

        let download_dir = env_vars
            .get("BOOTPATCH_DOWNLOAD_DIR")
            .filter(|s| !s.is_empty())
            .map(resolve)
            .unwrap_or_else(|| base_dir.to_path_buf());

        let default_arch = match env_vars.get("BOOTPATCH_ARCH") {
            Some(s) if !s.is_empty() => s.parse().unwrap_or_else(|e| {
                tracing::warn!("{}, using {}", e, Arch::default());
                Arch::default()
            }),
            _ => Arch::default(),
        };

        let state_dir = env_vars
            .get("BOOTPATCH_STATE_DIR")
            .filter(|s| !s.is_empty())
            .map(resolve)
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| base_dir.join(".config"))
                    .join("bootpatch")
            });

        Self {
            toolkit,
            release_api,
            download_dir,
            default_arch,
            state_dir,
        }
    }

    /// Resolve the toolkit binary: explicit setting, then the working
    /// directory, then PATH.
    pub fn locate_toolkit(&self) -> Option<PathBuf> {
        toolkit::locate(self.toolkit.as_deref())
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        match &self.toolkit {
            Some(p) => println!("  BOOTPATCH_TOOLKIT: {}", p.display()),
            None => println!("  BOOTPATCH_TOOLKIT: (not set)"),
        }
        println!("  BOOTPATCH_RELEASE_API: {}", self.release_api);
        println!("  BOOTPATCH_DOWNLOAD_DIR: {}", self.download_dir.display());
        println!("  BOOTPATCH_ARCH: {}", self.default_arch);
        println!("  BOOTPATCH_STATE_DIR: {}", self.state_dir.display());
        match self.locate_toolkit() {
            Some(p) => println!("  Toolkit: FOUND ({})", p.display()),
            None => println!("  Toolkit: NOT FOUND (set BOOTPATCH_TOOLKIT or add magiskboot to PATH)"),
        }
    }
}
