//! The boot-image toolkit seam.
//!
//! All binary-format work (header parsing, cpio, dtb, hex patching, repack)
//! happens in an external tool. The orchestrator talks to it only through
//! [`BootImageToolkit`], so another backend can be dropped in without
//! touching the patch sequence.
//!
//! Methods return the tool's raw exit code. [`LAUNCH_FAILURE`] means the tool
//! could not be started at all.

mod magiskboot;

use std::fmt;
use std::path::Path;

pub use magiskboot::{locate, Magiskboot};

/// Exit code reported when the toolkit could not be launched.
pub const LAUNCH_FAILURE: i32 = -1;

/// Working directory and environment of a toolkit call.
///
/// The toolkit operates on fixed file names, so every call within a run
/// shares the same directory.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub dir: &'a Path,
    pub env: &'a [(String, String)],
}

/// A single ramdisk (cpio) edit command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpioOp {
    /// Add `source` from the working directory at `path` with `mode`.
    Add {
        mode: &'static str,
        path: String,
        source: String,
    },
    Mkdir {
        mode: &'static str,
        path: String,
    },
    /// Apply the toolkit's root patch to the ramdisk.
    Patch,
    /// Record a backup of the ramdisk against the pristine copy `original`.
    Backup { original: String },
    /// Copy `path` out of the ramdisk to `dest`.
    Extract { path: String, dest: String },
    /// Restore the ramdisk from its embedded backup.
    Restore,
}

impl CpioOp {
    pub fn add(mode: &'static str, path: impl Into<String>, source: impl Into<String>) -> Self {
        CpioOp::Add {
            mode,
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn mkdir(mode: &'static str, path: impl Into<String>) -> Self {
        CpioOp::Mkdir {
            mode,
            path: path.into(),
        }
    }
}

impl fmt::Display for CpioOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpioOp::Add { mode, path, source } => write!(f, "add {} {} {}", mode, path, source),
            CpioOp::Mkdir { mode, path } => write!(f, "mkdir {} {}", mode, path),
            CpioOp::Patch => f.write_str("patch"),
            CpioOp::Backup { original } => write!(f, "backup {}", original),
            CpioOp::Extract { path, dest } => write!(f, "extract {} {}", path, dest),
            CpioOp::Restore => f.write_str("restore"),
        }
    }
}

/// Result of the ramdisk test command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamdiskStatus {
    /// Exit 0: never patched.
    Stock,
    /// Exit 1: already carries a Magisk patch.
    Patched,
    /// Anything else: patched by something unknown, or corrupt.
    Unsupported(i32),
}

impl RamdiskStatus {
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => RamdiskStatus::Stock,
            1 => RamdiskStatus::Patched,
            other => RamdiskStatus::Unsupported(other),
        }
    }
}

/// Capability interface over the boot-image toolkit.
pub trait BootImageToolkit: Send + Sync {
    /// Split `image` into its components inside the working directory.
    fn unpack(&self, at: &Invocation<'_>, image: &str) -> i32;

    /// Classify a ramdisk; see [`RamdiskStatus::from_exit_code`].
    fn test_ramdisk(&self, at: &Invocation<'_>, ramdisk: &str) -> i32;

    /// Apply `ops` to `ramdisk` in a single invocation.
    fn patch_ramdisk(&self, at: &Invocation<'_>, ramdisk: &str, ops: &[CpioOp]) -> i32;

    /// xz-compress `src` into `dst`.
    fn compress(&self, at: &Invocation<'_>, src: &Path, dst: &Path) -> i32;

    /// Replace every occurrence of `from` with `to` (both hex) in `file`.
    /// Exit 0 means at least one occurrence was replaced.
    fn hex_patch(&self, at: &Invocation<'_>, file: &str, from: &str, to: &str) -> i32;

    /// Non-zero when the device tree was already modified.
    fn test_device_tree(&self, at: &Invocation<'_>, file: &str) -> i32;

    fn patch_device_tree(&self, at: &Invocation<'_>, file: &str) -> i32;

    /// Rebuild `image` from the working directory into `new-boot.img`.
    fn repack(&self, at: &Invocation<'_>, image: &str) -> i32;

    /// SHA-1 of `file` as reported by the toolkit, if it produced one.
    fn digest(&self, at: &Invocation<'_>, file: &str) -> Option<String>;
}
