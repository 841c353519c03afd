//! Patch command - runs the patch sequence on a worker thread.

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use bootpatch::arch::Arch;
use bootpatch::config::Config;
use bootpatch::log::{ConsoleLog, Journal, LogSink};
use bootpatch::patch::{PatchOptions, PatchOutcome, PatchRequest, Patcher, RunGate};
use bootpatch::state::StateStore;
use bootpatch::toolkit::Magiskboot;

use super::download::fetch_and_select;

/// Everything the CLI collected for one run.
pub struct PatchArgs {
    pub boot: PathBuf,
    pub apk: Option<PathBuf>,
    /// Fetch the newest release first and patch with it.
    pub latest: bool,
    pub arch: Option<Arch>,
    pub options: PatchOptions,
    pub output: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub save_log: bool,
}

/// `magisk_patched_YYYYmmdd_HHMMSS.img` in the current directory.
pub fn default_output_name() -> PathBuf {
    PathBuf::from(format!(
        "magisk_patched_{}.img",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

/// `bootpatch_log_YYYYmmdd_HHMMSS.txt` in the current directory.
pub fn default_log_name() -> PathBuf {
    PathBuf::from(format!(
        "bootpatch_log_{}.txt",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

/// Execute the patch command.
pub async fn cmd_patch(config: &Config, gate: RunGate, args: PatchArgs) -> Result<()> {
    let journal = Arc::new(Journal::new(ConsoleLog));
    let log: Arc<dyn LogSink> = journal.clone();

    log.info(&format!("bootpatch {} ready", env!("CARGO_PKG_VERSION")));

    let log_path = args
        .log_file
        .clone()
        .or_else(|| args.save_log.then(default_log_name));

    let result = run(config, gate, args, Arc::clone(&log)).await;

    if let Some(path) = log_path {
        match journal.save(&path) {
            Ok(()) => println!("Log saved to: {}", path.display()),
            Err(e) => eprintln!("Warning: {:#}", e),
        }
    }

    result
}

async fn run(config: &Config, gate: RunGate, inputs: PatchArgs, log: Arc<dyn LogSink>) -> Result<()> {
    let store = StateStore::new(&config.state_dir);

    let package = if inputs.latest {
        fetch_and_select(config, &config.download_dir, log.as_ref()).await?
    } else if let Some(apk) = inputs.apk {
        if apk.is_file() {
            if let Err(e) = store.select(&apk, None) {
                log.warn(&format!("Could not record active package: {:#}", e));
            }
        }
        apk
    } else {
        match store.active_existing()? {
            Some(active) => {
                log.info(&format!("Using active package: {}", active.path.display()));
                active.path
            }
            None => bail!(
                "Please select a Magisk APK first! (pass --apk, --latest, or run 'bootpatch download')"
            ),
        }
    };

    let Some(binary) = config.locate_toolkit() else {
        bail!("magiskboot not found. Set BOOTPATCH_TOOLKIT or add magiskboot to PATH (see 'bootpatch preflight').");
    };
    let toolkit = Arc::new(Magiskboot::new(binary, Arc::clone(&log)));
    log.info(&format!("Using toolkit: {}", toolkit.binary().display()));

    let patcher = Patcher::new(toolkit, log, gate);
    let request = PatchRequest {
        boot_image: inputs.boot,
        package,
        arch: inputs.arch.unwrap_or(config.default_arch),
        options: inputs.options,
        output: inputs.output.unwrap_or_else(default_output_name),
    };

    let outcome = tokio::task::spawn_blocking(move || patcher.run(&request))
        .await
        .context("Patch worker stopped unexpectedly")?;
    let outcome = already_logged(outcome)?;

    println!();
    println!("Patched image: {}", outcome.output.display());
    println!("  SHA256: {}", outcome.sha256);
    Ok(())
}

/// The patcher writes its failure to the log; repeat only a short summary.
fn already_logged(outcome: Result<PatchOutcome>) -> Result<PatchOutcome> {
    outcome.map_err(|_| anyhow!("Patching failed; see the log above"))
}
