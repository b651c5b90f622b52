//! Build progress reporting.
//!
//! Reports observable progress during `apidoc build` so users see how many
//! chunks were found and how far embedding has got. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use apidoc_rag_core::Category;
use std::io::{IsTerminal, Write};

/// A single progress event for a build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildProgressEvent {
    /// The document has been chunked.
    Chunked { classes: u64, methods: u64 },
    /// Embedding phase: n chunks of one category processed out of total.
    Embedding { category: Category, n: u64, total: u64 },
    /// The index pair of every category has been written.
    Saved { dir: String },
}

/// Reports build progress. Implementations write to stderr (human or JSON).
pub trait BuildProgressReporter: Send + Sync {
    fn report(&self, event: BuildProgressEvent);
}

/// Human-friendly progress on stderr: "build Methods  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl BuildProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgressEvent) {
        let line = match &event {
            BuildProgressEvent::Chunked { classes, methods } => format!(
                "build  chunked  {} classes, {} methods\n",
                format_number(*classes),
                format_number(*methods)
            ),
            BuildProgressEvent::Embedding { category, n, total } => format!(
                "build {}  embedding  {} / {} chunks\n",
                category,
                format_number(*n),
                format_number(*total)
            ),
            BuildProgressEvent::Saved { dir } => format!("build  saved to {}\n", dir),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &BuildProgressEvent) -> serde_json::Value {
        match event {
            BuildProgressEvent::Chunked { classes, methods } => serde_json::json!({
                "event": "progress",
                "phase": "chunked",
                "classes": classes,
                "methods": methods
            }),
            BuildProgressEvent::Embedding { category, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "category": category.as_str(),
                "n": n,
                "total": total
            }),
            BuildProgressEvent::Saved { dir } => serde_json::json!({
                "event": "progress",
                "phase": "saved",
                "dir": dir
            }),
        }
    }
}

impl BuildProgressReporter for JsonProgress {
    fn report(&self, event: BuildProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BuildProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
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
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn BuildProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
