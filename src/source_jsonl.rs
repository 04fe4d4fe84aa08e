//! Reader for a recorded export: one `<collection>.jsonl` (or `.json`) file
//! per collection, one extended-JSON document per line, as written by
//! `mongoexport`.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::error::{MigrateError, Result};
use crate::models::Document;
use crate::traits::{DocumentStream, SourceReader};

const EXTENSIONS: [&str; 2] = ["jsonl", "json"];

pub struct JsonlReader {
    root: PathBuf,
}

impl JsonlReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open an export directory, failing if it is not there.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        match tokio::fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => Ok(Self { root }),
            Ok(_) => Err(MigrateError::SourceUnavailable(format!(
                "{} is not a directory",
                root.display()
            ))),
            Err(e) => Err(MigrateError::SourceUnavailable(format!("{}: {}", root.display(), e))),
        }
    }

    async fn collection_file(&self, collection: &str) -> Option<PathBuf> {
        for ext in EXTENSIONS {
            let path = self.root.join(format!("{}.{}", collection, ext));
            if tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
                return Some(path);
            }
        }
        None
    }
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> MigrateError {
    MigrateError::SourceUnavailable(format!("{}: {}", path.display(), err))
}

struct LineCursor {
    lines: Lines<BufReader<File>>,
    path: PathBuf,
    collection: String,
    line: u64,
    position: u64,
}

impl LineCursor {
    async fn next_document(&mut self) -> Option<Result<Document>> {
        loop {
            let text = match self.lines.next_line().await {
                Ok(Some(text)) => text,
                Ok(None) => return None,
                Err(e) => return Some(Err(unavailable(&self.path, e))),
            };
            self.line += 1;
            if text.trim().is_empty() {
                continue;
            }
            return Some(match serde_json::from_str(&text) {
                Ok(body) => {
                    self.position += 1;
                    Ok(Document::new(self.collection.clone(), self.position, body))
                }
                Err(e) => Err(MigrateError::SourceUnavailable(format!(
                    "{}:{}: malformed document: {}",
                    self.path.display(),
                    self.line,
                    e
                ))),
            });
        }
    }
}

#[async_trait]
impl SourceReader for JsonlReader {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| unavailable(&self.root, e))?;
        let mut names = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| unavailable(&self.root, e))? {
            let path = entry.path();
            let matches_ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| EXTENSIONS.contains(&e));
            if !matches_ext {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.insert(stem.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn read_all(&self, collection: &str) -> Result<DocumentStream> {
        let path = self
            .collection_file(collection)
            .await
            .ok_or_else(|| MigrateError::CollectionNotFound(collection.to_string()))?;
        let file = File::open(&path).await.map_err(|e| unavailable(&path, e))?;
        let cursor = LineCursor {
            lines: BufReader::new(file).lines(),
            path,
            collection: collection.to_string(),
            line: 0,
            position: 0,
        };

        // A malformed line ends the stream after its error.
        let documents = stream::unfold(Some(cursor), |state| async move {
            let mut cursor = state?;
            match cursor.next_document().await? {
                Ok(doc) => Some((Ok(doc), Some(cursor))),
                Err(err) => Some((Err(err), None)),
            }
        });
        Ok(documents.boxed())
    }
}
