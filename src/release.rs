//! Fetching the newest Magisk package from the release API.
//!
//! The API returns a JSON document with `tag_name` and an `assets` list; the
//! installable package is the asset named `Magisk*.apk`. Downloads stream to
//! a `.part` file that is renamed into place only once complete, so a failed
//! download never leaves something that looks like a usable package.

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use serde::Deserialize;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::log::LogSink;

/// Default release endpoint.
pub const DEFAULT_RELEASE_API: &str =
    "https://api.github.com/repos/topjohnwu/Magisk/releases/latest";

pub const ASSET_PREFIX: &str = "Magisk";
pub const ASSET_SUFFIX: &str = ".apk";

const USER_AGENT: &str = concat!("bootpatch/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
}

impl Release {
    /// The first asset that is the installable package.
    pub fn package_asset(&self) -> Option<&Asset> {
        self.assets
            .iter()
            .find(|a| a.name.starts_with(ASSET_PREFIX) && a.name.ends_with(ASSET_SUFFIX))
    }
}

/// Download configuration options.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Timeout for the metadata request.
    pub metadata_timeout: Duration,
    /// Timeout for a whole package download, body included.
    pub download_timeout: Duration,
    /// Number of retry attempts for transient failures.
    pub retries: u32,
    /// Delay before the first retry; doubles each time.
    pub retry_delay: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(30 * 60),
            retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Progress information passed to callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub downloaded: u64,
    /// From `Content-Length`, when the server sent one.
    pub total: Option<u64>,
}

impl Progress {
    /// Completed fraction in `0.0..=1.0`, or `None` when the size is unknown.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.downloaded as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }

    /// Format as human-readable string.
    pub fn display(&self) -> String {
        let downloaded_mb = self.downloaded as f64 / (1024.0 * 1024.0);
        match (self.total, self.fraction()) {
            (Some(total), Some(fraction)) => {
                let total_mb = total as f64 / (1024.0 * 1024.0);
                format!(
                    "{:.1}/{:.1} MB ({:.1}%)",
                    downloaded_mb,
                    total_mb,
                    fraction * 100.0
                )
            }
            _ => format!("{:.1} MB", downloaded_mb),
        }
    }
}

/// A package that was fetched to disk.
#[derive(Debug, Clone)]
pub struct FetchedPackage {
    pub tag: String,
    pub path: PathBuf,
}

pub struct ReleaseFetcher {
    client: reqwest::Client,
    api_url: String,
    options: DownloadOptions,
}

impl ReleaseFetcher {
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        Self::with_options(api_url, DownloadOptions::default())
    }

    pub fn with_options(api_url: impl Into<String>, options: DownloadOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            options,
        })
    }

    /// Query the release API.
    pub async fn latest_release(&self) -> Result<Release> {
        let url = &self.api_url;
        self.retrying(|| async move {
            let response = self
                .client
                .get(url)
                .timeout(self.options.metadata_timeout)
                .send()
                .await
                .with_context(|| format!("HTTP request failed: {}", url))?;
            let response = check_status(response, url)?;
            response
                .json::<Release>()
                .await
                .with_context(|| format!("Failed to parse release information from {}", url))
        })
        .await
    }

    /// Download `asset` into `dest_dir`, reporting progress as chunks arrive.
    pub async fn download<F>(&self, asset: &Asset, dest_dir: &Path, on_progress: F) -> Result<PathBuf>
    where
        F: FnMut(Progress),
    {
        if asset.name.contains('/') || asset.name.contains('\\') {
            bail!("Refusing to download asset with path separators: {}", asset.name);
        }
        tokio::fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("Failed to create directory {}", dest_dir.display()))?;

        let dest = dest_dir.join(&asset.name);
        let partial = dest_dir.join(format!("{}.part", asset.name));
        let url = &asset.browser_download_url;

        let callback = RefCell::new(on_progress);
        let (part, progress) = (partial.as_path(), &callback);
        let result = self
            .retrying(move || self.download_attempt(url, part, progress))
            .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, &dest)
            .await
            .with_context(|| format!("Failed to move download into place at {}", dest.display()))?;
        Ok(dest)
    }

    /// Resolve the newest release and download its package into `dest_dir`.
    pub async fn fetch_latest<F>(&self, dest_dir: &Path, log: &dyn LogSink, on_progress: F) -> Result<FetchedPackage>
    where
        F: FnMut(Progress),
    {
        log.info("Fetching latest Magisk release...");
        let release = self.latest_release().await?;
        let Some(asset) = release.package_asset() else {
            bail!("Could not find Magisk APK in latest release {}", release.tag_name);
        };
        log.success(&format!("Found Magisk {}: {}", release.tag_name, asset.name));

        let path = self.download(asset, dest_dir, on_progress).await?;
        log.success(&format!("Downloaded to: {}", path.display()));

        Ok(FetchedPackage {
            tag: release.tag_name.clone(),
            path,
        })
    }

    async fn download_attempt<F>(&self, url: &str, partial: &Path, on_progress: &RefCell<F>) -> Result<()>
    where
        F: FnMut(Progress),
    {
        let report = |progress: Progress| {
            let mut callback = on_progress.borrow_mut();
            (*callback)(progress)
        };
        let response = self
            .client
            .get(url)
            .timeout(self.options.download_timeout)
            .send()
            .await
            .with_context(|| format!("HTTP request failed: {}", url))?;
        let response = check_status(response, url)?;

        let total = response.content_length();
        let file = tokio::fs::File::create(partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        let mut writer = tokio::io::BufWriter::new(file);

        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();
        report(Progress { downloaded, total });

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Failed to read chunk from {}", url))?;
            writer
                .write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write to {}", partial.display()))?;
            downloaded += chunk.len() as u64;
            report(Progress { downloaded, total });
        }

        writer
            .flush()
            .await
            .with_context(|| format!("Failed to flush {}", partial.display()))?;

        if let Some(expected) = total {
            if downloaded != expected {
                bail!(
                    "Download incomplete for {}: expected {} bytes, got {} bytes",
                    url,
                    expected,
                    downloaded
                );
            }
        }
        Ok(())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        // Exponential backoff, max 16x
        self.options.retry_delay * (1 << (attempt - 1).min(4))
    }

    async fn retrying<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_retryable_error(&e) && attempt <= self.options.retries => {
                    tracing::warn!(error = %e, attempt, "request failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        bail!(
            "HTTP {} for {}: {}",
            status.as_u16(),
            url,
            status.canonical_reason().unwrap_or("Unknown error")
        );
    }
    Ok(response)
}

/// Check if an error is likely transient and worth retrying.
fn is_retryable_error(e: &anyhow::Error) -> bool {
    let msg = format!("{:#}", e).to_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection reset")
        || msg.contains("connection refused")
        || msg.contains("temporarily unavailable")
        || msg.contains("try again")
        || msg.contains("http 502")
        || msg.contains("http 503")
        || msg.contains("http 504")
}
