//! Run log presentation.
//!
//! Every stage of a patch run, and every line the toolkit prints, goes to a
//! [`LogSink`]. The terminal front-end uses [`ConsoleLog`], optionally wrapped
//! in a [`Journal`] so the whole log can be saved afterwards.

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
    /// Echoed command lines.
    Debug,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Success => "SUCCESS",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for run log lines.
///
/// Sinks are shared between the orchestrator and the thread draining a
/// toolkit's stderr, hence `Send + Sync`.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn success(&self, message: &str) {
        self.log(Level::Success, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    /// Visual separator used around run banners.
    fn rule(&self) {
        self.log(Level::Info, &"=".repeat(60));
    }
}

/// Render a line the way it appears on screen.
pub fn render(level: Level, message: &str) -> String {
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    format!("[{}] [{}] {}", timestamp, level, message)
}

/// Prints log lines to stdout, errors to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleLog;

impl LogSink for ConsoleLog {
    fn log(&self, level: Level, message: &str) {
        let line = render(level, message);
        match level {
            Level::Error => eprintln!("{}", line),
            _ => println!("{}", line),
        }
    }
}

/// Forwards to an inner sink and keeps every rendered line.
pub struct Journal<S> {
    inner: S,
    lines: Mutex<Vec<String>>,
}

impl<S: LogSink> Journal<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of everything logged so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Write the recorded log to `path`, one line per entry.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut content = self.lines().join("\n");
        content.push('\n');
        fs::write(path, content)
            .with_context(|| format!("Failed to save log to {}", path.display()))
    }
}

impl<S: LogSink> LogSink for Journal<S> {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(render(level, message));
        }
        self.inner.log(level, message);
    }
}

/// Collects entries without printing. Used by tests and embedders.
#[derive(Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(Level, String)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// True if any entry at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }
}

impl LogSink for MemoryLog {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }
}

impl<T: LogSink + ?Sized> LogSink for std::sync::Arc<T> {
    fn log(&self, level: Level, message: &str) {
        (**self).log(level, message);
    }
}
