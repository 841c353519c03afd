//! Patch orchestration.
//!
//! A run walks a fixed sequence of stages inside one working directory:
//!
//! 1. stage the boot image
//! 2. extract the payload from the package
//! 3. unpack the image
//! 4. classify the ramdisk (stock / patched / unsupported / absent)
//! 5. ask the toolkit for the image's SHA-1
//! 6. compress payloads
//! 7. write the `config` file
//! 8. patch the ramdisk
//! 9. patch the kernel
//! 10. patch device trees
//! 11. repack
//! 12. copy the result out
//!
//! Each toolkit call finishes before the next starts. Any fatal stage aborts
//! the run with a single error; the working directory is removed and the
//! gate reopened on every exit path.

pub mod context;
pub mod options;
pub mod tables;

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::apk::{self, PayloadSet};
use crate::arch::Arch;
use crate::hash;
use crate::log::LogSink;
use crate::timing::Timer;
use crate::toolkit::{BootImageToolkit, CpioOp, RamdiskStatus};

pub use context::{RunContext, RunGate, WORKDIR_PREFIX};
pub use options::PatchOptions;
use tables::*;

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct PatchRequest {
    pub boot_image: PathBuf,
    pub package: PathBuf,
    pub arch: Arch,
    pub options: PatchOptions,
    /// Where the patched image is copied to.
    pub output: PathBuf,
}

/// A successful run.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub output: PathBuf,
    pub size: u64,
    pub sha256: String,
    /// SHA-256 of the input image.
    pub original_sha256: String,
}

/// Runs patch sequences against a toolkit backend.
#[derive(Clone)]
pub struct Patcher {
    toolkit: Arc<dyn BootImageToolkit>,
    log: Arc<dyn LogSink>,
    gate: RunGate,
    temp_root: PathBuf,
}

impl Patcher {
    pub fn new(toolkit: Arc<dyn BootImageToolkit>, log: Arc<dyn LogSink>, gate: RunGate) -> Self {
        Self {
            toolkit,
            log,
            gate,
            temp_root: std::env::temp_dir(),
        }
    }

    /// Create working directories under `root` instead of the system temp dir.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    pub fn gate(&self) -> &RunGate {
        &self.gate
    }

    /// Execute one run. Errors carry the human-readable failure reason and
    /// have already been written to the log.
    pub fn run(&self, request: &PatchRequest) -> Result<PatchOutcome> {
        let logged = |e: anyhow::Error| {
            self.log.error(&format!("Error: {:#}", e));
            e
        };
        check_inputs(request).map_err(logged)?;

        let ctx =
            RunContext::begin(&self.gate, &self.temp_root, request.options).map_err(logged)?;

        self.log.rule();
        self.log.info("Starting patch process...");
        self.log.rule();
        self.log.info(&format!("Working directory: {}", ctx.dir().display()));

        let result = self.run_stages(&ctx, request).map_err(logged);

        match ctx.finish() {
            Ok(()) => self.log.info("Cleaned up temporary files"),
            Err(e) => self.log.warn(&format!("{:#}", e)),
        }

        result
    }

    fn run_stages(&self, ctx: &RunContext, request: &PatchRequest) -> Result<PatchOutcome> {
        let tk = self.toolkit.as_ref();
        let log = self.log.as_ref();

        let original_sha256 = stage_boot_image(ctx, &request.boot_image, log)?;

        log.info(&format!("Extracting files for architecture: {}", request.arch));
        let payload = apk::extract_payload(&request.package, request.arch, ctx.dir(), log)
            .context("Failed to extract necessary files from APK")?;

        log_options(ctx.options(), log);

        unpack(ctx, tk, log)?;
        let has_ramdisk = classify_ramdisk(ctx, tk, log)?;
        let sha1 = query_digest(ctx, tk, log);
        compress_payload(ctx, tk, &payload, log);
        write_config(ctx, sha1.as_deref())?;

        if has_ramdisk {
            patch_ramdisk(ctx, tk, log)?;
        }
        if ctx.has(KERNEL) {
            patch_kernel(ctx, tk, log)?;
        }
        patch_device_trees(ctx, tk, log);
        repack(ctx, tk, log)?;

        finalize(ctx, &request.output, original_sha256, log)
    }
}

fn check_inputs(request: &PatchRequest) -> Result<()> {
    if !request.boot_image.is_file() {
        bail!(
            "Boot image not found: {}. Please select a boot image first!",
            request.boot_image.display()
        );
    }
    if !request.package.is_file() {
        bail!(
            "Magisk APK not found: {}. Please select a Magisk APK first!",
            request.package.display()
        );
    }
    Ok(())
}

fn log_options(options: &PatchOptions, log: &dyn LogSink) {
    log.info("Configuration:");
    for (key, value) in options.pairs() {
        log.info(&format!("  {}: {}", key, value));
    }
}

/// Copy the input image in and record its SHA-256.
fn stage_boot_image(ctx: &RunContext, source: &Path, log: &dyn LogSink) -> Result<String> {
    fs::copy(source, ctx.path(BOOT_IMAGE))
        .with_context(|| format!("Failed to copy {} to working directory", source.display()))?;
    log.success("Copied boot image to working directory");

    let sha256 = hash::sha256_file(source)?;
    log.info(&format!("Original boot SHA256: {}", sha256));
    Ok(sha256)
}

fn unpack(ctx: &RunContext, tk: &dyn BootImageToolkit, log: &dyn LogSink) -> Result<()> {
    let timer = Timer::start("Unpack boot image");
    log.info("Unpacking boot image...");
    if tk.unpack(&ctx.invocation(), BOOT_IMAGE) != 0 {
        bail!("Failed to unpack boot image!");
    }
    timer.finish();
    Ok(())
}

/// Returns whether a ramdisk is present. A patched ramdisk is restored to
/// stock first, so the rest of the run always starts from a stock ramdisk.
fn classify_ramdisk(ctx: &RunContext, tk: &dyn BootImageToolkit, log: &dyn LogSink) -> Result<bool> {
    if !ctx.has(RAMDISK) {
        log.warn("No ramdisk found (skip_initramfs)");
        return Ok(false);
    }

    log.info("Checking ramdisk status...");
    let at = ctx.invocation();
    match RamdiskStatus::from_exit_code(tk.test_ramdisk(&at, RAMDISK)) {
        RamdiskStatus::Stock => {
            log.success("Stock boot image detected");
        }
        RamdiskStatus::Patched => {
            log.warn("Magisk patched boot image detected");
            let restore = [
                CpioOp::Extract {
                    path: BACKUP_CONFIG.to_string(),
                    dest: RESTORED_CONFIG.to_string(),
                },
                CpioOp::Restore,
            ];
            if tk.patch_ramdisk(&at, RAMDISK, &restore) != 0 {
                log.warn("Failed to restore ramdisk backup, continuing with current ramdisk");
            }
        }
        RamdiskStatus::Unsupported(code) => {
            bail!(
                "Boot image patched by unsupported programs! (ramdisk test exit code {})",
                code
            );
        }
    }

    fs::copy(ctx.path(RAMDISK), ctx.path(RAMDISK_ORIG))
        .context("Failed to back up ramdisk.cpio")?;
    Ok(true)
}

/// Best effort: a missing digest only drops the `SHA1` line from the config.
fn query_digest(ctx: &RunContext, tk: &dyn BootImageToolkit, log: &dyn LogSink) -> Option<String> {
    log.info("Getting boot image SHA1...");
    let sha1 = tk.digest(&ctx.invocation(), BOOT_IMAGE);
    match &sha1 {
        Some(sha1) => log.info(&format!("Boot image SHA1: {}", sha1)),
        None => log.warn("Could not determine boot image SHA1"),
    }
    sha1
}

/// Compress whatever the payload set holds. A failure is logged and the
/// file is simply left out of the ramdisk.
fn compress_payload(
    ctx: &RunContext,
    tk: &dyn BootImageToolkit,
    payload: &PayloadSet,
    log: &dyn LogSink,
) {
    log.info("Compressing files...");
    let at = ctx.invocation();
    for entry in COMPRESSED_PAYLOADS {
        let Some(src) = payload.get(entry.logical) else {
            continue;
        };
        log.info(&format!("Compressing {}...", entry.logical));
        let dst = ctx.path(entry.compressed);
        if tk.compress(&at, src, &dst) != 0 {
            log.warn(&format!("Failed to compress {}", entry.logical));
            let _ = fs::remove_file(&dst);
        }
    }
}

fn write_config(ctx: &RunContext, sha1: Option<&str>) -> Result<()> {
    let config = ctx.options().render_config(sha1);
    fs::write(ctx.path(CONFIG), config).context("Failed to write patch config")
}

/// The single cpio command list that installs the payload.
///
/// `present` reports whether a file exists in the working directory; only
/// compressed payloads that exist are added.
pub fn ramdisk_ops(present: impl Fn(&str) -> bool) -> Vec<CpioOp> {
    let mut ops = vec![
        CpioOp::add("0750", "init", INIT_BINARY),
        CpioOp::mkdir("0750", OVERLAY_DIR),
        CpioOp::mkdir("0750", OVERLAY_SBIN),
    ];

    for entry in COMPRESSED_PAYLOADS {
        if present(entry.compressed) {
            ops.push(CpioOp::add(
                "0644",
                format!("{}/{}", OVERLAY_SBIN, entry.compressed),
                entry.compressed,
            ));
        }
    }

    ops.extend([
        CpioOp::Patch,
        CpioOp::Backup {
            original: RAMDISK_ORIG.to_string(),
        },
        CpioOp::mkdir("000", BACKUP_DIR),
        CpioOp::add("000", BACKUP_CONFIG, CONFIG),
    ]);
    ops
}

fn patch_ramdisk(ctx: &RunContext, tk: &dyn BootImageToolkit, log: &dyn LogSink) -> Result<()> {
    let timer = Timer::start("Patch ramdisk");
    log.info("Patching ramdisk...");
    let ops = ramdisk_ops(|name| ctx.has(name));
    if tk.patch_ramdisk(&ctx.invocation(), RAMDISK, &ops) != 0 {
        bail!("Failed to patch ramdisk!");
    }
    timer.finish();
    Ok(())
}

/// Apply the hex patch table. With nothing applied the kernel is dropped
/// from the working directory so repack keeps the original one.
fn patch_kernel(ctx: &RunContext, tk: &dyn BootImageToolkit, log: &dyn LogSink) -> Result<()> {
    log.info("Patching kernel...");
    let at = ctx.invocation();
    let mut patched = false;

    for patch in kernel_patches(ctx.options().legacy_sar) {
        if tk.hex_patch(&at, KERNEL, patch.from, patch.to) == 0 {
            patched = true;
            log.success(&format!("Applied kernel patch: {}", patch.name));
        }
    }

    if !patched {
        fs::remove_file(ctx.path(KERNEL)).context("Failed to remove unpatched kernel")?;
        log.info("No kernel patches applied");
    }
    Ok(())
}

fn patch_device_trees(ctx: &RunContext, tk: &dyn BootImageToolkit, log: &dyn LogSink) {
    let at = ctx.invocation();
    for &dt in DEVICE_TREE_CANDIDATES {
        if !ctx.has(dt) {
            continue;
        }
        log.info(&format!("Checking {}...", dt));
        if tk.test_device_tree(&at, dt) != 0 {
            log.warn(&format!("{} was patched by old Magisk", dt));
        }
        if tk.patch_device_tree(&at, dt) == 0 {
            log.success(&format!("Patched {} successfully", dt));
        } else {
            log.warn(&format!("Could not patch {}", dt));
        }
    }
}

fn repack(ctx: &RunContext, tk: &dyn BootImageToolkit, log: &dyn LogSink) -> Result<()> {
    let timer = Timer::start("Repack boot image");
    log.info("Repacking boot image...");
    if tk.repack(&ctx.invocation(), BOOT_IMAGE) != 0 {
        bail!("Failed to repack boot image!");
    }
    if !ctx.has(NEW_BOOT_IMAGE) {
        bail!("Output boot image not found!");
    }
    timer.finish();
    Ok(())
}

fn finalize(
    ctx: &RunContext,
    output: &Path,
    original_sha256: String,
    log: &dyn LogSink,
) -> Result<PatchOutcome> {
    let built = ctx.path(NEW_BOOT_IMAGE);
    let sha256 = hash::sha256_file(&built)?;
    log.info(&format!("Patched boot SHA256: {}", sha256));

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let size = fs::copy(&built, output)
        .with_context(|| format!("Failed to save patched image to {}", output.display()))?;

    log.rule();
    log.success("Patching completed successfully!");
    log.rule();
    log.success(&format!("Saved to: {}", output.display()));
    log.info(&format!("Size: {:.2} MB", hash::size_mb(size)));

    Ok(PatchOutcome {
        output: output.to_path_buf(),
        size,
        sha256,
        original_sha256,
    })
}
