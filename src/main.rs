//! bootpatch - patch Android boot images with Magisk.
//!
//! Drives a prebuilt `magiskboot` binary through the unpack, ramdisk,
//! kernel, device-tree and repack stages, using the payload taken from a
//! Magisk APK.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use bootpatch::arch::Arch;
use bootpatch::config::Config;
use bootpatch::patch::{PatchOptions, RunGate};

#[derive(Parser)]
#[command(name = "bootpatch")]
#[command(about = "Patch Android boot images with Magisk")]
#[command(
    after_help = "QUICK START:\n  bootpatch preflight                 Check the toolkit is available\n  bootpatch download                  Fetch the latest Magisk APK\n  bootpatch patch --boot boot.img     Patch with the downloaded APK\n  bootpatch clean                     Remove leftover working directories"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch a boot image
    Patch {
        /// Boot (or recovery) image to patch
        #[arg(short, long)]
        boot: PathBuf,

        /// Magisk APK (default: the active package)
        #[arg(long, conflicts_with = "latest")]
        apk: Option<PathBuf>,

        /// Download the latest Magisk release first and use it
        #[arg(long)]
        latest: bool,

        /// Target architecture (default: BOOTPATCH_ARCH or arm64-v8a)
        #[arg(short, long)]
        arch: Option<Arch>,

        /// Do not keep AVB 2.0 / dm-verity
        #[arg(long)]
        no_keep_verity: bool,

        /// Do not keep forced encryption
        #[arg(long)]
        no_keep_force_encrypt: bool,

        /// Patch a recovery image
        #[arg(long)]
        recovery: bool,

        /// Patch the vbmeta flag in the boot image
        #[arg(long)]
        patch_vbmeta_flag: bool,

        /// Legacy System-as-Root device
        #[arg(long)]
        legacy_sar: bool,

        /// Output path (default: magisk_patched_<timestamp>.img)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Save the run log to this file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Save the run log as bootpatch_log_<timestamp>.txt
        #[arg(long, conflicts_with = "log_file")]
        save_log: bool,
    },

    /// Download the latest Magisk APK and make it the active package
    Download {
        /// Destination directory (default: BOOTPATCH_DOWNLOAD_DIR or current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Show the version and architectures of a Magisk APK
    Inspect {
        /// Path to the APK
        apk: PathBuf,
    },

    /// Remove working directories left by interrupted runs
    Clean,

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Run preflight checks (toolkit, inputs, payload)
    Preflight {
        #[arg(short, long)]
        boot: Option<PathBuf>,

        #[arg(long)]
        apk: Option<PathBuf>,

        #[arg(short, long)]
        arch: Option<Arch>,

        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// Show the active package
    Active,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let base_dir = std::env::current_dir()?;
    let config = Config::load(&base_dir);
    let gate = RunGate::new();

    match cli.command {
        Commands::Patch {
            boot,
            apk,
            latest,
            arch,
            no_keep_verity,
            no_keep_force_encrypt,
            recovery,
            patch_vbmeta_flag,
            legacy_sar,
            output,
            log_file,
            save_log,
        } => {
            let options = PatchOptions {
                keep_verity: !no_keep_verity,
                keep_force_encrypt: !no_keep_force_encrypt,
                recovery_mode: recovery,
                patch_vbmeta_flag,
                legacy_sar,
            };
            let args = commands::patch::PatchArgs {
                boot,
                apk,
                latest,
                arch,
                options,
                output,
                log_file,
                save_log,
            };
            commands::cmd_patch(&config, gate, args).await?;
        }

        Commands::Download { dir } => {
            commands::cmd_download(&config, dir).await?;
        }

        Commands::Inspect { apk } => {
            commands::cmd_inspect(&apk)?;
        }

        Commands::Clean => {
            commands::cmd_clean(&std::env::temp_dir())?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Active => commands::show::ShowTarget::Active,
            };
            commands::cmd_show(show_target, &config)?;
        }

        Commands::Preflight {
            boot,
            apk,
            arch,
            strict,
        } => {
            commands::cmd_preflight(&config, boot, apk, arch, strict)?;
        }
    }

    Ok(())
}
