//! bootpatch library.
//!
//! Everything except argument parsing lives here so integration tests can
//! drive the patch sequence against a fake toolkit.

pub mod apk;
pub mod arch;
pub mod config;
pub mod hash;
pub mod log;
pub mod patch;
pub mod preflight;
pub mod process;
pub mod release;
pub mod state;
pub mod temp;
pub mod timing;
pub mod toolkit;
