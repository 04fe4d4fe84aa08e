//! Run coordinator: drives one migration from connection to commit.
//!
//! ```text
//! Idle ─▶ Connecting ─▶ Enumerating ─▶ Migrating ─▶ Committing ─▶ Committed
//!   │          │             │             │             │
//!   └──────────┴─────────────┴─────────────┴─────────────┴──────▶ Aborted
//! ```
//!
//! The dependency plan is built before anything is opened, so a cyclic
//! configuration never touches the source or the target. Every fatal error
//! aborts the writer, and the run always ends with a [`RunSummary`].

use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::emitter::{schema_statements, StatementEmitter};
use crate::error::{MigrateError, Result};
use crate::mapper::Mapper;
use crate::models::Warning;
use crate::plan::MigrationPlan;
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter, REPORT_EVERY};
use crate::rules::MappingRule;
use crate::traits::{CommitReceipt, DocumentStream, SourceReader, StatementSink};
use crate::translation::TranslationTable;
use crate::writer::WriterHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Connecting,
    Enumerating,
    Migrating,
    Committing,
    Committed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Committed | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Connecting => "connecting",
            RunState::Enumerating => "enumerating",
            RunState::Migrating => "migrating",
            RunState::Committing => "committing",
            RunState::Committed => "committed",
            RunState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Emit `CREATE TABLE IF NOT EXISTS` statements before any insert.
    pub create_tables: bool,
    pub parallel_reads: bool,
    /// Channel capacity of each prefetch task.
    pub prefetch: usize,
    /// Capacity of the writer's command channel.
    pub writer_queue: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            create_tables: false,
            parallel_reads: false,
            prefetch: 256,
            writer_queue: 256,
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            create_tables: config.output.create_tables,
            parallel_reads: config.source.parallel_reads,
            prefetch: config.source.prefetch,
            ..Self::default()
        }
    }
}

/// Outcome of a run, produced on every path.
#[derive(Debug)]
pub struct RunSummary {
    pub state: RunState,
    pub source: Option<String>,
    pub destination: String,
    pub collections_processed: Vec<String>,
    pub documents_read: u64,
    pub rows_per_table: BTreeMap<String, u64>,
    /// Statements handed to the writer, schema statements included.
    pub statements: u64,
    pub warnings: Vec<Warning>,
    pub receipt: Option<CommitReceipt>,
    pub error: Option<MigrateError>,
}

impl RunSummary {
    fn new(destination: String) -> Self {
        Self {
            state: RunState::Idle,
            source: None,
            destination,
            collections_processed: Vec::new(),
            documents_read: 0,
            rows_per_table: BTreeMap::new(),
            statements: 0,
            warnings: Vec::new(),
            receipt: None,
            error: None,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state == RunState::Committed
    }

    pub fn total_rows(&self) -> u64 {
        self.rows_per_table.values().sum()
    }

    /// Print the summary to stdout.
    pub fn print(&self) {
        println!("migrate {} -> {}", self.source.as_deref().unwrap_or("-"), self.destination);
        println!("  collections: {}", self.collections_processed.len());
        println!("  documents read: {}", self.documents_read);
        for (table, rows) in &self.rows_per_table {
            println!("  rows {}: {}", table, rows);
        }
        println!("  statements: {}", self.statements);
        println!("  warnings: {}", self.warnings.len());
        if let Some(sha) = self.receipt.as_ref().and_then(|r| r.sha256.as_deref()) {
            println!("  sha256: {}", sha);
        }
        match &self.error {
            Some(err) => println!("aborted: {}", err.kind()),
            None => println!("{}", if self.is_committed() { "ok" } else { "incomplete" }),
        }
    }
}

pub struct Coordinator {
    rules: Vec<MappingRule>,
    options: RunOptions,
    progress: Box<dyn ProgressReporter>,
    state: RunState,
}

impl Coordinator {
    pub fn new(rules: Vec<MappingRule>, options: RunOptions) -> Self {
        Self {
            rules,
            options,
            progress: Box::new(NoProgress),
            state: RunState::Idle,
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run against an already opened reader.
    pub async fn run_with_reader<R, S>(&mut self, reader: R, sink: S) -> RunSummary
    where
        R: SourceReader + 'static,
        S: StatementSink + 'static,
    {
        self.run(async move { Ok(Box::new(reader) as Box<dyn SourceReader>) }, sink)
            .await
    }

    /// Run the whole pipeline. `connect` is awaited in the `Connecting`
    /// state, after the dependency plan has been validated.
    pub async fn run<C, S>(&mut self, connect: C, sink: S) -> RunSummary
    where
        C: Future<Output = Result<Box<dyn SourceReader>>>,
        S: StatementSink + 'static,
    {
        let mut summary = RunSummary::new(sink.describe());
        if self.state != RunState::Idle {
            summary.state = RunState::Aborted;
            summary.error = Some(MigrateError::CommitFailure(format!(
                "coordinator already used (state {})",
                self.state
            )));
            return summary;
        }

        let plan = match MigrationPlan::build(&self.rules) {
            Ok(plan) => plan,
            Err(err) => return self.fail(summary, err),
        };

        self.enter(RunState::Connecting);
        let reader: Arc<dyn SourceReader> = match connect.await {
            Ok(reader) => Arc::from(reader),
            Err(err) => return self.fail(summary, err),
        };
        summary.source = Some(reader.name().to_string());

        let writer = WriterHandle::spawn(sink, self.options.writer_queue);
        if let Err(err) = writer.begin().await {
            writer.close().await;
            return self.fail(summary, err);
        }

        let mut emitter = StatementEmitter::new();
        let migrated = self
            .migrate(&plan, reader, &writer, &mut emitter, &mut summary)
            .await;
        summary.rows_per_table = emitter.rows_per_table().clone();

        if let Err(err) = migrated {
            if let Err(abort_err) = writer.abort().await {
                tracing::warn!(error = %abort_err, "writer abort failed");
            }
            writer.close().await;
            return self.fail(summary, err);
        }

        self.enter(RunState::Committing);
        let committed = writer.commit().await;
        writer.close().await;
        match committed {
            Ok(receipt) => {
                tracing::info!(
                    destination = %receipt.destination,
                    statements = receipt.statements,
                    "migration committed"
                );
                summary.receipt = Some(receipt);
                self.enter(RunState::Committed);
                summary.state = RunState::Committed;
                summary
            }
            Err(err) => self.fail(summary, err),
        }
    }

    async fn migrate(
        &mut self,
        plan: &MigrationPlan,
        reader: Arc<dyn SourceReader>,
        writer: &WriterHandle,
        emitter: &mut StatementEmitter,
        summary: &mut RunSummary,
    ) -> Result<()> {
        self.enter(RunState::Enumerating);
        let available: HashSet<String> = reader.list_collections().await?.into_iter().collect();
        for rule in &self.rules {
            if !available.contains(&rule.collection) {
                return Err(MigrateError::CollectionNotFound(rule.collection.clone()));
            }
        }
        let mut skipped: Vec<&String> = available
            .iter()
            .filter(|name| !self.rules.iter().any(|r| &r.collection == *name))
            .collect();
        skipped.sort();
        for name in skipped {
            tracing::info!(collection = %name, "no mapping rule, collection skipped");
        }

        self.enter(RunState::Migrating);
        if self.options.create_tables {
            for statement in schema_statements(&self.rules, plan.order()) {
                writer.append(statement).await?;
                summary.statements += 1;
            }
        }

        let mut mapper = Mapper::new(self.rules.clone());
        let mut translation = TranslationTable::new();

        for level in plan.levels() {
            let names: Vec<String> = level.iter().map(|&i| self.rules[i].collection.clone()).collect();
            let mut prefetched = if self.options.parallel_reads && names.len() > 1 {
                Some(Prefetch::start(&reader, &names, self.options.prefetch))
            } else {
                None
            };

            for (slot, name) in names.iter().enumerate() {
                let documents = match prefetched.as_mut() {
                    Some(prefetch) => prefetch.take(slot),
                    None => reader.read_all(name).await?,
                };
                self.migrate_collection(name, documents, &mut mapper, &mut translation, writer, emitter, summary)
                    .await?;
            }
        }

        tracing::debug!(identifiers = translation.len(), "translation table complete");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn migrate_collection(
        &self,
        collection: &str,
        mut documents: DocumentStream,
        mapper: &mut Mapper,
        translation: &mut TranslationTable,
        writer: &WriterHandle,
        emitter: &mut StatementEmitter,
        summary: &mut RunSummary,
    ) -> Result<()> {
        self.progress.report(ProgressEvent::CollectionStarted {
            collection: collection.to_string(),
        });
        let mut read = 0u64;
        let mut rows = 0u64;

        while let Some(item) = documents.next().await {
            let doc = item?;
            read += 1;
            summary.documents_read += 1;

            let mapped = mapper.map_document(collection, &doc, translation)?;
            for warning in &mapped.warnings {
                tracing::warn!("{}", warning);
            }
            summary.warnings.extend(mapped.warnings);

            for row in mapped.rows {
                writer.append(emitter.emit(row)).await?;
                summary.statements += 1;
                rows += 1;
            }

            if read % REPORT_EVERY == 0 {
                self.progress.report(ProgressEvent::Documents {
                    collection: collection.to_string(),
                    n: read,
                });
            }
        }

        summary.collections_processed.push(collection.to_string());
        self.progress.report(ProgressEvent::CollectionDone {
            collection: collection.to_string(),
            documents: read,
            rows,
        });
        Ok(())
    }

    fn enter(&mut self, state: RunState) {
        tracing::debug!(from = %self.state, to = %state, "run state");
        self.state = state;
        if !state.is_terminal() {
            self.progress.report(ProgressEvent::Phase {
                phase: state.to_string(),
            });
        }
    }

    fn fail(&mut self, mut summary: RunSummary, err: MigrateError) -> RunSummary {
        tracing::error!(kind = err.kind(), error = %err, "migration aborted");
        self.enter(RunState::Aborted);
        summary.state = RunState::Aborted;
        summary.error = Some(err);
        summary
    }
}

/// Concurrent readers for the collections of one dependency level.
///
/// Each collection is streamed by its own task into a bounded channel; the
/// coordinator drains the channels one after another in declaration order.
/// Dropping the prefetch aborts any task still running.
struct Prefetch {
    streams: Vec<Option<DocumentStream>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Prefetch {
    fn start(reader: &Arc<dyn SourceReader>, names: &[String], capacity: usize) -> Self {
        let mut streams = Vec::with_capacity(names.len());
        let mut tasks = Vec::with_capacity(names.len());
        for name in names {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            let reader = Arc::clone(reader);
            let name = name.clone();
            tasks.push(tokio::spawn(async move {
                let mut documents = match reader.read_all(&name).await {
                    Ok(documents) => documents,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                while let Some(item) = documents.next().await {
                    let failed = item.is_err();
                    if tx.send(item).await.is_err() || failed {
                        break;
                    }
                }
            }));
            let received = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
            streams.push(Some(received.boxed()));
        }
        Self { streams, tasks }
    }

    fn take(&mut self, slot: usize) -> DocumentStream {
        self.streams[slot].take().unwrap_or_else(|| stream::empty().boxed())
    }
}

impl Drop for Prefetch {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
