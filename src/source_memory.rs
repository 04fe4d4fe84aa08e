//! In-memory source reader for fixtures and tests.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{MigrateError, Result};
use crate::models::Document;
use crate::traits::{DocumentStream, SourceReader};

#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    collections: BTreeMap<String, Vec<Value>>,
    unavailable: bool,
    fail_after: Option<(String, usize)>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, name: impl Into<String>, documents: Vec<Value>) -> Self {
        self.collections.insert(name.into(), documents);
        self
    }

    /// Every call fails as if the store could not be reached.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Stream `n` documents of `collection`, then lose the connection.
    pub fn fail_after(mut self, collection: impl Into<String>, n: usize) -> Self {
        self.fail_after = Some((collection.into(), n));
        self
    }

    fn check(&self) -> Result<()> {
        if self.unavailable {
            return Err(MigrateError::SourceUnavailable("memory source is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceReader for MemoryReader {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.collections.keys().cloned().collect())
    }

    async fn read_all(&self, collection: &str) -> Result<DocumentStream> {
        self.check()?;
        let documents = self
            .collections
            .get(collection)
            .ok_or_else(|| MigrateError::CollectionNotFound(collection.to_string()))?;

        let limit = match &self.fail_after {
            Some((name, n)) if name == collection => Some(*n),
            _ => None,
        };
        let name = collection.to_string();
        let mut items: Vec<Result<Document>> = documents
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .enumerate()
            .map(|(i, body)| Ok(Document::new(name.clone(), i as u64 + 1, body.clone())))
            .collect();
        if limit.is_some() {
            items.push(Err(MigrateError::SourceUnavailable(format!(
                "connection lost while reading '{}'",
                name
            ))));
        }
        Ok(stream::iter(items).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn streams_documents_with_positions() {
        let reader = MemoryReader::new()
            .with_collection("users", vec![json!({"_id": "u1"}), json!({"_id": "u2"})])
            .with_collection("projects", vec![]);
        assert_eq!(reader.list_collections().await.unwrap(), vec!["projects", "users"]);

        let docs: Vec<Document> = reader.read_all("users").await.unwrap().try_collect().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].position, 2);
        assert_eq!(docs[1].body["_id"], "u2");
    }

    #[tokio::test]
    async fn unknown_collection_and_outage() {
        let reader = MemoryReader::new().with_collection("users", vec![json!({"_id": 1})]);
        assert!(matches!(
            reader.read_all("groups").await,
            Err(MigrateError::CollectionNotFound(_))
        ));

        let reader = reader.fail_after("users", 0);
        let result: Result<Vec<Document>> = reader.read_all("users").await.unwrap().try_collect().await;
        assert!(matches!(result, Err(MigrateError::SourceUnavailable(_))));
    }
}
