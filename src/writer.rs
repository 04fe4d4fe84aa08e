//! Transaction script writer.
//!
//! [`TransactionWriter`] enforces the `Idle → Open → {Committed, Aborted}`
//! lifecycle over a [`StatementSink`]. [`WriterHandle`] runs a writer on its
//! own task behind a bounded command channel, so every statement of a run is
//! appended from exactly one place.

use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{MigrateError, Result};
use crate::models::Statement;
use crate::traits::{CommitReceipt, StatementSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    Open,
    Committed,
    Aborted,
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriterState::Idle => "idle",
            WriterState::Open => "open",
            WriterState::Committed => "committed",
            WriterState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

pub struct TransactionWriter<S: StatementSink> {
    sink: S,
    state: WriterState,
    appended: u64,
}

impl<S: StatementSink> TransactionWriter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            state: WriterState::Idle,
            appended: 0,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub async fn begin(&mut self) -> Result<()> {
        self.require(WriterState::Idle, "begin")?;
        match self.sink.open().await {
            Ok(()) => {
                self.state = WriterState::Open;
                Ok(())
            }
            Err(err) => {
                self.release().await;
                Err(err)
            }
        }
    }

    /// Append one statement. A sink failure discards the output and leaves
    /// the writer aborted.
    pub async fn append(&mut self, statement: &Statement) -> Result<()> {
        self.require(WriterState::Open, "append")?;
        if let Err(err) = self.sink.write(statement).await {
            self.release().await;
            return Err(err);
        }
        self.appended += 1;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<CommitReceipt> {
        self.require(WriterState::Open, "commit")?;
        match self.sink.finish().await {
            Ok(receipt) => {
                self.state = WriterState::Committed;
                tracing::debug!(statements = self.appended, destination = %receipt.destination, "committed");
                Ok(receipt)
            }
            Err(err) => {
                self.release().await;
                Err(err)
            }
        }
    }

    /// Discard everything appended. Aborting twice is a no-op; aborting a
    /// committed script is an error.
    pub async fn abort(&mut self) -> Result<()> {
        match self.state {
            WriterState::Aborted => Ok(()),
            WriterState::Committed => Err(MigrateError::WriterStateError {
                state: self.state,
                operation: "abort",
            }),
            WriterState::Idle | WriterState::Open => {
                self.release().await;
                Ok(())
            }
        }
    }

    async fn release(&mut self) {
        self.sink.discard().await;
        self.state = WriterState::Aborted;
    }

    fn require(&self, expected: WriterState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MigrateError::WriterStateError {
                state: self.state,
                operation,
            })
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Writer task
// ═══════════════════════════════════════════════════════════════════════

enum Command {
    Begin(oneshot::Sender<Result<()>>),
    Append(Statement),
    Commit(oneshot::Sender<Result<CommitReceipt>>),
    Abort(oneshot::Sender<Result<()>>),
}

type FailureSlot = Arc<Mutex<Option<MigrateError>>>;

fn store_failure(slot: &FailureSlot, err: MigrateError) {
    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.get_or_insert(err);
}

fn take_failure(slot: &FailureSlot) -> Option<MigrateError> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}

fn has_failure(slot: &FailureSlot) -> bool {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .is_some()
}

/// Handle to a [`TransactionWriter`] running on a dedicated task.
///
/// Appends are fire-and-forget through the bounded channel; a failed append
/// is reported by the next call on the handle. Dropping the handle without
/// committing makes the task discard its output.
pub struct WriterHandle {
    tx: mpsc::Sender<Command>,
    failure: FailureSlot,
    task: JoinHandle<()>,
}

impl WriterHandle {
    pub fn spawn<S>(sink: S, capacity: usize) -> Self
    where
        S: StatementSink + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let failure = FailureSlot::default();
        let task = tokio::spawn(run_writer(TransactionWriter::new(sink), rx, failure.clone()));
        Self { tx, failure, task }
    }

    pub async fn begin(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Begin(ack)).await?;
        done.await.map_err(|_| writer_gone())?
    }

    pub async fn append(&self, statement: Statement) -> Result<()> {
        if let Some(err) = take_failure(&self.failure) {
            return Err(err);
        }
        self.send(Command::Append(statement)).await
    }

    pub async fn commit(&self) -> Result<CommitReceipt> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Commit(ack)).await?;
        done.await.map_err(|_| writer_gone())?
    }

    pub async fn abort(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Abort(ack)).await?;
        done.await.map_err(|_| writer_gone())?
    }

    /// Close the channel and wait for the task to release its sink.
    pub async fn close(self) {
        let WriterHandle { tx, task, .. } = self;
        drop(tx);
        if let Err(err) = task.await {
            tracing::error!(error = %err, "writer task ended abnormally");
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| writer_gone())
    }
}

fn writer_gone() -> MigrateError {
    MigrateError::CommitFailure("writer task is no longer running".to_string())
}

async fn run_writer<S: StatementSink>(
    mut writer: TransactionWriter<S>,
    mut rx: mpsc::Receiver<Command>,
    failure: FailureSlot,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Begin(ack) => {
                let _ = ack.send(writer.begin().await);
            }
            Command::Append(statement) => {
                if has_failure(&failure) {
                    continue;
                }
                if let Err(err) = writer.append(&statement).await {
                    tracing::debug!(error = %err, "append failed, output discarded");
                    store_failure(&failure, err);
                }
            }
            Command::Commit(ack) => {
                let result = match take_failure(&failure) {
                    Some(err) => {
                        let _ = writer.abort().await;
                        Err(err)
                    }
                    None => writer.commit().await,
                };
                let _ = ack.send(result);
            }
            Command::Abort(ack) => {
                let _ = ack.send(writer.abort().await);
            }
        }
    }

    if writer.state() != WriterState::Committed {
        let _ = writer.abort().await;
    }
}
