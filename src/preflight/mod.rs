//! Preflight checks for a patch run.
//!
//! Validates the toolkit and the selected inputs before patching.
//! Run with `bootpatch preflight` to check everything is ready.

mod checks;
mod types;

use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::arch::Arch;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// What a run would use.
#[derive(Debug, Clone)]
pub struct PreflightInputs {
    pub toolkit: Option<PathBuf>,
    pub boot_image: Option<PathBuf>,
    pub package: Option<PathBuf>,
    pub arch: Arch,
}

/// Run all preflight checks.
pub fn run_preflight(inputs: &PreflightInputs) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    checks.push(checks::check_toolkit(inputs.toolkit.as_deref()));
    checks.push(checks::check_boot_image(inputs.boot_image.as_deref()));

    let (package_check, inspectable) = checks::check_package(inputs.package.as_deref());
    checks.push(package_check);
    match inputs.package.as_deref() {
        Some(package) if inspectable => {
            checks.push(checks::check_payload(package, inputs.arch));
        }
        _ => checks.push(CheckResult::skip(
            &format!("Payload for {}", inputs.arch),
            "no readable package",
        )),
    }

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(inputs: &PreflightInputs) -> Result<()> {
    let report = run_preflight(inputs);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before patching.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}

