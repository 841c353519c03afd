//! Individual requirement checks.

use std::fs;
use std::path::Path;

use crate::apk;
use crate::arch::Arch;
use crate::hash;
use crate::log::MemoryLog;

use super::types::CheckResult;

/// Toolkit binary resolved from configuration, working directory or PATH.
pub fn check_toolkit(located: Option<&Path>) -> CheckResult {
    match located {
        Some(path) => CheckResult::pass_with("magiskboot", &path.display().to_string()),
        None => CheckResult::fail(
            "magiskboot",
            "Not found. Set BOOTPATCH_TOOLKIT, place magiskboot in the working directory, or add it to PATH.",
        ),
    }
}

pub fn check_boot_image(boot: Option<&Path>) -> CheckResult {
    let Some(boot) = boot else {
        return CheckResult::skip("Boot image", "not selected (use --boot)");
    };
    match fs::metadata(boot) {
        Ok(meta) if meta.is_file() => CheckResult::pass_with(
            "Boot image",
            &format!("{} ({:.2} MB)", boot.display(), hash::size_mb(meta.len())),
        ),
        _ => CheckResult::fail("Boot image", &format!("{} not found", boot.display())),
    }
}

/// Package readable and its declared version. Returns the check and
/// whether the payload check is worth running.
pub fn check_package(package: Option<&Path>) -> (CheckResult, bool) {
    let Some(package) = package else {
        return (
            CheckResult::skip("Magisk APK", "not selected (use --apk or `bootpatch download`)"),
            false,
        );
    };
    match apk::inspect(package) {
        Ok(info) => {
            let details = match &info.version {
                Some(v) => format!(
                    "{} (Magisk {} / {})",
                    package.display(),
                    v.name.as_deref().unwrap_or("unknown"),
                    v.code
                ),
                None => format!("{} (version unknown)", package.display()),
            };
            if info.version.is_some() {
                (CheckResult::pass_with("Magisk APK", &details), true)
            } else {
                (CheckResult::warn("Magisk APK", &details), true)
            }
        }
        Err(e) => (CheckResult::fail("Magisk APK", &e.to_string()), false),
    }
}

/// Dry-run extraction into a scratch directory.
pub fn check_payload(package: &Path, arch: Arch) -> CheckResult {
    let name = format!("Payload for {}", arch);
    let scratch = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => return CheckResult::warn(&name, &format!("could not create scratch dir: {}", e)),
    };
    let quiet = MemoryLog::new();
    match apk::extract_payload(package, arch, scratch.path(), &quiet) {
        Ok(payload) => {
            let names: Vec<&str> = payload.names().collect();
            CheckResult::pass_with(&name, &names.join(", "))
        }
        Err(e) if !e.arch_available() => CheckResult::fail(
            &name,
            &format!("{} (pick one of those with --arch)", e),
        ),
        Err(e) => CheckResult::fail(&name, &e.to_string()),
    }
}
