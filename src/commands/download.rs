//! Download command - fetches the latest Magisk package and makes it active.

use anyhow::Result;
use std::io::Write;
use std::path::{Path, PathBuf};

use bootpatch::config::Config;
use bootpatch::log::{ConsoleLog, LogSink};
use bootpatch::release::{Progress, ReleaseFetcher};
use bootpatch::state::StateStore;

/// Execute the download command.
pub async fn cmd_download(config: &Config, dest: Option<PathBuf>) -> Result<()> {
    let dest = dest.unwrap_or_else(|| config.download_dir.clone());
    fetch_and_select(config, &dest, &ConsoleLog).await?;
    Ok(())
}

/// Download the newest package into `dest` and record it as active.
pub async fn fetch_and_select(config: &Config, dest: &Path, log: &dyn LogSink) -> Result<PathBuf> {
    let fetcher = ReleaseFetcher::new(&config.release_api)?;
    let mut progress = ProgressLine::default();

    let result = fetcher
        .fetch_latest(dest, log, |p| progress.update(p))
        .await;
    progress.end();
    let fetched = match result {
        Ok(fetched) => fetched,
        Err(e) => {
            log.error(&format!("Download failed: {:#}", e));
            return Err(e);
        }
    };

    let store = StateStore::new(&config.state_dir);
    match store.select(&fetched.path, Some(fetched.tag.clone())) {
        Ok(active) => log.info(&format!("Active package: {}", active.path.display())),
        Err(e) => log.warn(&format!("Could not record active package: {:#}", e)),
    }
    Ok(fetched.path)
}

/// Single-line progress on stderr, redrawn only when the shown value changes.
#[derive(Default)]
struct ProgressLine {
    last: Option<String>,
}

impl ProgressLine {
    fn update(&mut self, progress: Progress) {
        // Whole percent, or whole megabytes when the size is unknown
        let shown = match progress.fraction() {
            Some(f) => format!("{}%", (f * 100.0) as u32),
            None => format!("{}MB", progress.downloaded / (1024 * 1024)),
        };
        if self.last.as_deref() == Some(shown.as_str()) {
            return;
        }
        self.last = Some(shown);
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "\r  Downloading: {}   ", progress.display());
        let _ = stderr.flush();
    }

    fn end(&mut self) {
        if self.last.take().is_some() {
            eprintln!();
        }
    }
}
