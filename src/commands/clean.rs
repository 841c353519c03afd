//! Clean command - removes working directories left by interrupted runs.

use anyhow::Result;
use std::path::Path;

use bootpatch::log::{ConsoleLog, LogSink};
use bootpatch::temp;

/// Execute the clean command against `root` (normally the system temp dir).
pub fn cmd_clean(root: &Path) -> Result<()> {
    let log = ConsoleLog;
    let stale = temp::stale_work_dirs(root);
    if stale.is_empty() {
        log.info(&format!("No leftover working directories in {}", root.display()));
        return Ok(());
    }

    let mut removed = 0;
    for dir in &stale {
        match temp::cleanup_work_dir(dir) {
            Ok(()) => {
                log.info(&format!("Removed {}", dir.display()));
                removed += 1;
            }
            Err(e) => log.warn(&format!("{:#}", e)),
        }
    }
    log.success(&format!("Removed {} of {} leftover working directories", removed, stale.len()));
    Ok(())
}
