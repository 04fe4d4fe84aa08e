//! In-memory sinks: a recording sink for tests and a discarding one for
//! `--dry-run`.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{MigrateError, Result};
use crate::models::Statement;
use crate::render::{render, BEGIN_MARKER, COMMIT_MARKER};
use crate::traits::{CommitReceipt, StatementSink};

#[derive(Debug, Default)]
struct Recorded {
    lines: Vec<String>,
    committed: bool,
    discarded: bool,
}

/// Shared view of what a [`MemorySink`] has recorded, usable after the sink
/// has been moved into a writer.
#[derive(Debug, Clone, Default)]
pub struct Recording(Arc<Mutex<Recorded>>);

impl Recording {
    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Script lines including the transaction markers.
    pub fn lines(&self) -> Vec<String> {
        self.lock().lines.clone()
    }

    pub fn is_committed(&self) -> bool {
        self.lock().committed
    }

    pub fn is_discarded(&self) -> bool {
        self.lock().discarded
    }
}

/// Renders statements into a shared line buffer.
///
/// Failures can be injected to exercise abort paths: `fail_on_write(n)`
/// rejects the n-th statement (1-based), `fail_on_finish()` rejects commit.
#[derive(Debug, Default)]
pub struct MemorySink {
    recording: Recording,
    written: u64,
    fail_on_write: Option<u64>,
    fail_on_finish: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recording(&self) -> Recording {
        self.recording.clone()
    }

    pub fn fail_on_write(mut self, n: u64) -> Self {
        self.fail_on_write = Some(n);
        self
    }

    pub fn fail_on_finish(mut self) -> Self {
        self.fail_on_finish = true;
        self
    }
}

#[async_trait]
impl StatementSink for MemorySink {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn open(&mut self) -> Result<()> {
        self.recording.lock().lines.push(BEGIN_MARKER.to_string());
        Ok(())
    }

    async fn write(&mut self, statement: &Statement) -> Result<()> {
        self.written += 1;
        if self.fail_on_write == Some(self.written) {
            return Err(MigrateError::CommitFailure(format!(
                "statement {} rejected by target",
                self.written
            )));
        }
        self.recording.lock().lines.push(render(statement));
        Ok(())
    }

    async fn finish(&mut self) -> Result<CommitReceipt> {
        if self.fail_on_finish {
            return Err(MigrateError::CommitFailure("injected commit failure".to_string()));
        }
        let mut recorded = self.recording.lock();
        recorded.lines.push(COMMIT_MARKER.to_string());
        recorded.committed = true;
        Ok(CommitReceipt {
            destination: self.describe(),
            statements: self.written,
            sha256: None,
        })
    }

    async fn discard(&mut self) {
        let mut recorded = self.recording.lock();
        recorded.lines.clear();
        recorded.committed = false;
        recorded.discarded = true;
    }
}

/// Counts statements and keeps none of them.
#[derive(Debug)]
pub struct DiscardSink {
    label: String,
    written: u64,
}

impl DiscardSink {
    pub fn new() -> Self {
        Self::labelled("dry run")
    }

    /// Stand-in for a destination that must not be touched.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            written: 0,
        }
    }
}

impl Default for DiscardSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatementSink for DiscardSink {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn write(&mut self, _statement: &Statement) -> Result<()> {
        self.written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<CommitReceipt> {
        Ok(CommitReceipt {
            destination: self.describe(),
            statements: self.written,
            sha256: None,
        })
    }

    async fn discard(&mut self) {}
}
