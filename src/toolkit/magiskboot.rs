//! `magiskboot` backend: runs the prebuilt binary as a subprocess.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{BootImageToolkit, CpioOp, Invocation, LAUNCH_FAILURE};
use crate::log::LogSink;
use crate::process::{self, Cmd};

/// Name of the binary on this host.
pub fn binary_name() -> &'static str {
    if cfg!(windows) {
        "magiskboot.exe"
    } else {
        "magiskboot"
    }
}

/// Find the toolkit binary.
///
/// Order: the explicitly configured path, the current directory, then PATH.
pub fn locate(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return path.is_file().then(|| path.to_path_buf());
    }

    let local = Path::new(binary_name());
    if local.is_file() {
        return std::path::absolute(local).ok();
    }

    process::which(binary_name())
}

pub struct Magiskboot {
    binary: PathBuf,
    log: Arc<dyn LogSink>,
}

impl Magiskboot {
    pub fn new(binary: impl Into<PathBuf>, log: Arc<dyn LogSink>) -> Self {
        Self {
            binary: binary.into(),
            log,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn cmd(&self, at: &Invocation<'_>) -> Cmd {
        let mut cmd = Cmd::new(self.binary.as_os_str()).dir(at.dir).allow_fail();
        for (key, value) in at.env {
            cmd = cmd.env(key, value);
        }
        cmd
    }

    /// Run with output streamed to the log; the exit code is returned as-is.
    fn stream(&self, cmd: Cmd) -> i32 {
        let line = cmd.display();
        tracing::debug!(command = %line, "running toolkit");
        self.log.debug(&format!("$ {}", line));

        match cmd.run_streaming(|out| self.log.info(out)) {
            Ok(status) => status.code().unwrap_or(LAUNCH_FAILURE),
            Err(e) => {
                self.log.error(&format!("Command failed: {:#}", e));
                LAUNCH_FAILURE
            }
        }
    }
}

impl BootImageToolkit for Magiskboot {
    fn unpack(&self, at: &Invocation<'_>, image: &str) -> i32 {
        self.stream(self.cmd(at).args(["unpack", image]))
    }

    fn test_ramdisk(&self, at: &Invocation<'_>, ramdisk: &str) -> i32 {
        self.stream(self.cmd(at).args(["cpio", ramdisk, "test"]))
    }

    fn patch_ramdisk(&self, at: &Invocation<'_>, ramdisk: &str, ops: &[CpioOp]) -> i32 {
        let cmd = self
            .cmd(at)
            .args(["cpio", ramdisk])
            .args(ops.iter().map(ToString::to_string));
        self.stream(cmd)
    }

    fn compress(&self, at: &Invocation<'_>, src: &Path, dst: &Path) -> i32 {
        let cmd = self.cmd(at).arg("compress=xz").arg_path(src).arg_path(dst);
        self.stream(cmd)
    }

    fn hex_patch(&self, at: &Invocation<'_>, file: &str, from: &str, to: &str) -> i32 {
        self.stream(self.cmd(at).args(["hexpatch", file, from, to]))
    }

    fn test_device_tree(&self, at: &Invocation<'_>, file: &str) -> i32 {
        self.stream(self.cmd(at).args(["dtb", file, "test"]))
    }

    fn patch_device_tree(&self, at: &Invocation<'_>, file: &str) -> i32 {
        self.stream(self.cmd(at).args(["dtb", file, "patch"]))
    }

    fn repack(&self, at: &Invocation<'_>, image: &str) -> i32 {
        self.stream(self.cmd(at).args(["repack", image]))
    }

    fn digest(&self, at: &Invocation<'_>, file: &str) -> Option<String> {
        let cmd = self.cmd(at).args(["sha1", file]);
        tracing::debug!(command = %cmd.display(), "querying toolkit");
        match cmd.run() {
            Ok(result) if result.success() => {
                let out = result.stdout_trimmed();
                (!out.is_empty()).then(|| out.to_string())
            }
            Ok(result) => {
                tracing::debug!(code = result.code(), "sha1 query failed");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "sha1 query could not run");
                None
            }
        }
    }
}
