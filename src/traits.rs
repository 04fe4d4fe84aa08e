//! Extension traits at the two edges of the pipeline.
//!
//! A [`SourceReader`] produces documents; a [`StatementSink`] persists
//! statements. Everything in between (mapping, ordering, emission) is
//! independent of where the documents come from or where the statements go.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐                      ┌──────────────────────────┐
//! │       SourceReader       │                      │      StatementSink       │
//! │ ┌───────┐┌─────┐┌──────┐ │   ┌──────────────┐   │ ┌──────┐┌──────┐┌──────┐ │
//! │ │ Mongo ││JSONL││Memory│ │──▶│ Mapper/Emitter│──▶│ │Script││SQLite││Memory│ │
//! │ └───────┘└─────┘└──────┘ │   └──────────────┘   │ └──────┘└──────┘└──────┘ │
//! └──────────────────────────┘                      └──────────────────────────┘
//! ```

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::models::{Document, Statement};

/// Lazy, finite, non-restartable stream of one collection's documents.
pub type DocumentStream = BoxStream<'static, Result<Document>>;

// ═══════════════════════════════════════════════════════════════════════
// Source Reader
// ═══════════════════════════════════════════════════════════════════════

/// Read-only access to the collections of a document store.
///
/// Implementations never know the target schema. Connectivity failures are
/// reported as [`MigrateError::SourceUnavailable`](crate::error::MigrateError::SourceUnavailable),
/// including failures that happen mid-stream.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use docshift::error::Result;
/// use docshift::traits::{DocumentStream, SourceReader};
///
/// pub struct ArchiveReader { /* ... */ }
///
/// #[async_trait]
/// impl SourceReader for ArchiveReader {
///     fn name(&self) -> &str { "archive" }
///
///     async fn list_collections(&self) -> Result<Vec<String>> {
///         Ok(vec!["projects".to_string()])
///     }
///
///     async fn read_all(&self, collection: &str) -> Result<DocumentStream> {
///         // ... open the collection and stream its documents
///         # unimplemented!()
///     }
/// }
/// ```
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Short label for logs and the run summary (e.g. `"mongodb"`, `"jsonl"`).
    fn name(&self) -> &str;

    /// Names of all collections in the source, sorted.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Stream every document of `collection`, tagged with its 1-based position.
    ///
    /// An unknown collection is
    /// [`MigrateError::CollectionNotFound`](crate::error::MigrateError::CollectionNotFound).
    async fn read_all(&self, collection: &str) -> Result<DocumentStream>;
}

// ═══════════════════════════════════════════════════════════════════════
// Statement Sink
// ═══════════════════════════════════════════════════════════════════════

/// Proof that a sink made its statements durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Script path, database path, or a label for in-memory sinks.
    pub destination: String,
    /// Statements written between the begin and commit markers.
    pub statements: u64,
    /// SHA-256 of the committed artifact, for file sinks.
    pub sha256: Option<String>,
}

/// Storage behind the [`TransactionWriter`](crate::writer::TransactionWriter).
///
/// The writer guarantees the call order `open`, any number of `write`s,
/// then exactly one of `finish` or `discard`. A sink only has to make
/// `finish` all-or-nothing: after a failed `finish` or any `discard`, nothing
/// it wrote may remain visible.
#[async_trait]
pub trait StatementSink: Send {
    fn describe(&self) -> String;

    /// Acquire the output resource and write the begin marker.
    async fn open(&mut self) -> Result<()>;

    async fn write(&mut self, statement: &Statement) -> Result<()>;

    /// Write the commit marker and make everything durable.
    async fn finish(&mut self) -> Result<CommitReceipt>;

    /// Drop everything written so far. Must be safe to call after a failed
    /// `open` or `finish`.
    async fn discard(&mut self);
}

#[async_trait]
impl<S: StatementSink + ?Sized> StatementSink for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    async fn open(&mut self) -> Result<()> {
        (**self).open().await
    }

    async fn write(&mut self, statement: &Statement) -> Result<()> {
        (**self).write(statement).await
    }

    async fn finish(&mut self) -> Result<CommitReceipt> {
        (**self).finish().await
    }

    async fn discard(&mut self) {
        (**self).discard().await
    }
}
