//! Script file sink.
//!
//! Statements are written to `<path>.partial`. Commit appends the commit
//! marker, flushes, fsyncs and renames the partial file onto `<path>`, so a
//! reader never observes a script without its closing `COMMIT;`. Abort, a
//! failed commit, or dropping the sink unfinished removes the partial file.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::{MigrateError, Result};
use crate::models::Statement;
use crate::render::{render, BEGIN_MARKER, COMMIT_MARKER};
use crate::traits::{CommitReceipt, StatementSink};

pub struct FileSink {
    path: PathBuf,
    partial: PathBuf,
    out: Option<BufWriter<File>>,
    hasher: Sha256,
    statements: u64,
    pending: bool,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let partial = partial_path(&path);
        Self {
            path,
            partial,
            out: None,
            hasher: Sha256::new(),
            statements: 0,
            pending: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let out = self.out.as_mut().ok_or_else(|| {
            MigrateError::CommitFailure(format!("{} is not open", self.partial.display()))
        })?;
        out.write_all(line.as_bytes()).await.map_err(|e| io_failure(&self.partial, e))?;
        out.write_all(b"\n").await.map_err(|e| io_failure(&self.partial, e))?;
        self.hasher.update(line.as_bytes());
        self.hasher.update(b"\n");
        Ok(())
    }
}

pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

fn io_failure(path: &Path, err: std::io::Error) -> MigrateError {
    MigrateError::CommitFailure(format!("{}: {}", path.display(), err))
}

#[async_trait]
impl StatementSink for FileSink {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn open(&mut self) -> Result<()> {
        let file = File::create(&self.partial)
            .await
            .map_err(|e| io_failure(&self.partial, e))?;
        self.pending = true;
        self.out = Some(BufWriter::new(file));
        self.write_line(BEGIN_MARKER).await
    }

    async fn write(&mut self, statement: &Statement) -> Result<()> {
        self.write_line(&render(statement)).await?;
        self.statements += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<CommitReceipt> {
        self.write_line(COMMIT_MARKER).await?;
        if let Some(mut out) = self.out.take() {
            out.flush().await.map_err(|e| io_failure(&self.partial, e))?;
            out.get_mut()
                .sync_all()
                .await
                .map_err(|e| io_failure(&self.partial, e))?;
        }
        tokio::fs::rename(&self.partial, &self.path)
            .await
            .map_err(|e| io_failure(&self.path, e))?;
        self.pending = false;

        Ok(CommitReceipt {
            destination: self.describe(),
            statements: self.statements,
            sha256: Some(format!("{:x}", self.hasher.finalize_reset())),
        })
    }

    async fn discard(&mut self) {
        self.out = None;
        if self.pending {
            if let Err(err) = tokio::fs::remove_file(&self.partial).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.partial.display(), error = %err, "could not remove partial script");
                }
            }
            self.pending = false;
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if self.pending {
            let _ = std::fs::remove_file(&self.partial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Insert, SqlValue};

    fn insert(name: &str) -> Statement {
        Statement::Insert(Insert {
            table: "projects".into(),
            columns: vec!["name".into()],
            values: vec![SqlValue::Text(name.into())],
        })
    }

    #[tokio::test]
    async fn commit_renames_partial_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("importer.sql");
        let mut sink = FileSink::new(&path);

        sink.open().await.unwrap();
        sink.write(&insert("observatory")).await.unwrap();
        assert!(partial_path(&path).exists());
        assert!(!path.exists());

        let receipt = sink.finish().await.unwrap();
        assert!(!partial_path(&path).exists());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "BEGIN TRANSACTION;\nINSERT INTO \"projects\" (\"name\") VALUES ('observatory');\nCOMMIT;\n"
        );
        assert_eq!(receipt.statements, 1);

        let digest = format!("{:x}", Sha256::digest(content.as_bytes()));
        assert_eq!(receipt.sha256.as_deref(), Some(digest.as_str()));
    }

    #[tokio::test]
    async fn discard_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("importer.sql");
        let mut sink = FileSink::new(&path);
        sink.open().await.unwrap();
        sink.write(&insert("a")).await.unwrap();
        sink.discard().await;

        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn drop_without_commit_removes_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("importer.sql");
        {
            let mut sink = FileSink::new(&path);
            sink.open().await.unwrap();
        }
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn unwritable_destination_is_commit_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path().join("missing").join("importer.sql"));
        assert!(matches!(sink.open().await, Err(MigrateError::CommitFailure(_))));
        sink.discard().await;
    }
}
