//! Per-run state: the in-progress gate and the working directory.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use super::options::PatchOptions;
use crate::toolkit::Invocation;

/// Prefix of every run's working directory under the temp root.
pub const WORKDIR_PREFIX: &str = "bootpatch-run-";

/// Shared flag allowing at most one patch run at a time.
///
/// Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct RunGate {
    busy: Arc<AtomicBool>,
}

impl RunGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> Option<RunGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard {
                busy: Arc::clone(&self.busy),
            })
    }
}

/// Holds the gate closed; releases it on drop.
#[derive(Debug)]
struct RunGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Everything a stage needs: the working directory, the run's options, and
/// the environment passed to the toolkit.
///
/// The working directory is removed when the context is dropped, before the
/// gate reopens.
#[derive(Debug)]
pub struct RunContext {
    // Field order is drop order: directory first, then the guard.
    workdir: TempDir,
    options: PatchOptions,
    env: Vec<(String, String)>,
    _guard: RunGuard,
}

impl RunContext {
    /// Start a run: close the gate and create a fresh working directory
    /// under `temp_root`.
    pub fn begin(gate: &RunGate, temp_root: &Path, options: PatchOptions) -> Result<Self> {
        let Some(guard) = gate.acquire() else {
            bail!("Patching already in progress!");
        };

        let workdir = tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .tempdir_in(temp_root)
            .with_context(|| {
                format!(
                    "Failed to create working directory in {}",
                    temp_root.display()
                )
            })?;

        Ok(Self {
            workdir,
            options,
            env: options.env(),
            _guard: guard,
        })
    }

    pub fn dir(&self) -> &Path {
        self.workdir.path()
    }

    /// Path of a file inside the working directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir().join(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    pub fn options(&self) -> &PatchOptions {
        &self.options
    }

    pub fn invocation(&self) -> Invocation<'_> {
        Invocation {
            dir: self.dir(),
            env: &self.env,
        }
    }

    /// Remove the working directory, reporting failure instead of ignoring it.
    pub fn finish(self) -> Result<()> {
        let dir = self.dir().to_path_buf();
        let Self { workdir, _guard, .. } = self;
        workdir
            .close()
            .with_context(|| format!("Failed to remove {}", dir.display()))
    }
}
