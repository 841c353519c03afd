//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `patch` - Patch a boot image
//! - `download` - Fetch the latest Magisk package
//! - `inspect` - Show what a package contains
//! - `clean` - Remove leftover working directories
//! - `show` - Display information
//! - `preflight` - Run requirement checks

pub mod clean;
pub mod download;
mod inspect;
pub mod patch;
mod preflight;
pub mod show;

pub use clean::cmd_clean;
pub use download::cmd_download;
pub use inspect::cmd_inspect;
pub use patch::cmd_patch;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
