//! Migration progress reporting.
//!
//! Reports what the run is doing (connecting, which collection is being
//! migrated, how many documents so far) so long migrations are observable.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::str::FromStr;

/// Documents between two `Documents` events for one collection.
pub const REPORT_EVERY: u64 = 1000;

/// A single progress event for a run.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// The coordinator entered a new state (e.g. "connecting", "committing").
    Phase { phase: String },
    /// Migration of a collection started.
    CollectionStarted { collection: String },
    /// n documents of a collection mapped so far.
    Documents { collection: String, n: u64 },
    /// A collection finished.
    CollectionDone {
        collection: String,
        documents: u64,
        rows: u64,
    },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the coordinator.
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "migrate projects  1,234 documents".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Phase { phase } => format!("{}...\n", phase),
            ProgressEvent::CollectionStarted { collection } => {
                format!("migrate {}  started\n", collection)
            }
            ProgressEvent::Documents { collection, n } => {
                format!("migrate {}  {} documents\n", collection, format_number(*n))
            }
            ProgressEvent::CollectionDone {
                collection,
                documents,
                rows,
            } => format!(
                "migrate {}  done  {} documents, {} rows\n",
                collection,
                format_number(*documents),
                format_number(*rows)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Phase { phase } => serde_json::json!({
                "event": "phase",
                "phase": phase
            }),
            ProgressEvent::CollectionStarted { collection } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "started"
            }),
            ProgressEvent::Documents { collection, n } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "migrating",
                "n": n
            }),
            ProgressEvent::CollectionDone {
                collection,
                documents,
                rows,
            } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "done",
                "documents": documents,
                "rows": rows
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!("unknown progress mode '{}' (off, human, json)", other)),
        }
    }
}
