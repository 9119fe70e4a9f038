//! Index progress reporting.
//!
//! Reports what `orag index` is doing (scanning, extracting files,
//! embedding documents) on **stderr** so stdout stays parseable.

use std::io::Write;

/// A single progress event for an index run.
#[derive(Clone, Debug)]
pub enum IndexProgressEvent {
    /// Walking the module tree. Total unknown.
    Scanning { root: String },
    /// `n` of `total` files extracted.
    Extracting { n: u64, total: u64 },
    /// `n` of `total` documents stored (embedded or unchanged).
    Embedding { n: u64, total: u64 },
}

impl IndexProgressEvent {
    fn phase(&self) -> &'static str {
        match self {
            IndexProgressEvent::Scanning { .. } => "scanning",
            IndexProgressEvent::Extracting { .. } => "extracting",
            IndexProgressEvent::Embedding { .. } => "embedding",
        }
    }
}

/// Reports index progress. Implementations write to stderr (human or JSON).
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress: "index  extracting  120 / 1,450 files".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Scanning { root } => format!("index  scanning {}...\n", root),
            IndexProgressEvent::Extracting { n, total } => format!(
                "index  extracting  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Embedding { n, total } => format!(
                "index  embedding  {} / {} documents\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let mut obj = serde_json::json!({
            "event": "progress",
            "phase": event.phase(),
        });
        match &event {
            IndexProgressEvent::Scanning { root } => {
                obj["root"] = serde_json::json!(root);
            }
            IndexProgressEvent::Extracting { n, total }
            | IndexProgressEvent::Embedding { n, total } => {
                obj["n"] = serde_json::json!(n);
                obj["total"] = serde_json::json!(total);
            }
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn phases_are_named() {
        assert_eq!(
            IndexProgressEvent::Embedding { n: 1, total: 2 }.phase(),
            "embedding"
        );
    }
}
