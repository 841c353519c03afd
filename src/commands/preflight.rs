//! Preflight command - runs requirement checks.

use anyhow::Result;
use std::path::PathBuf;

use bootpatch::arch::Arch;
use bootpatch::config::Config;
use bootpatch::preflight::{self, PreflightInputs};
use bootpatch::state::StateStore;

/// Execute the preflight command.
pub fn cmd_preflight(
    config: &Config,
    boot: Option<PathBuf>,
    apk: Option<PathBuf>,
    arch: Option<Arch>,
    strict: bool,
) -> Result<()> {
    let package = match apk {
        Some(apk) => Some(apk),
        None => StateStore::new(&config.state_dir)
            .active_existing()?
            .map(|a| a.path),
    };
    let inputs = PreflightInputs {
        toolkit: config.locate_toolkit(),
        boot_image: boot,
        package,
        arch: arch.unwrap_or(config.default_arch),
    };

    if strict {
        preflight::run_preflight_or_fail(&inputs)?;
    } else {
        let report = preflight::run_preflight(&inputs);
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to exit with an error.");
        }
    }
    Ok(())
}
