//! Live MongoDB reader.

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::{doc, Bson};
use mongodb::{Client, Database};

use crate::error::{MigrateError, Result};
use crate::models::Document;
use crate::traits::{DocumentStream, SourceReader};

pub struct MongoReader {
    db: Database,
}

fn unavailable(err: mongodb::error::Error) -> MigrateError {
    MigrateError::SourceUnavailable(err.to_string())
}

impl MongoReader {
    /// Connect and ping. The connection string must name a database.
    ///
    /// Errors never repeat the connection string, which may carry credentials.
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await.map_err(unavailable)?;
        let db = client.default_database().ok_or_else(|| {
            MigrateError::SourceUnavailable("connection string does not name a database".to_string())
        })?;
        db.run_command(doc! { "ping": 1 }).await.map_err(unavailable)?;
        tracing::debug!(database = %db.name(), "connected to mongodb");
        Ok(Self { db })
    }
}

#[async_trait]
impl SourceReader for MongoReader {
    fn name(&self) -> &str {
        "mongodb"
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = self.db.list_collection_names().await.map_err(unavailable)?;
        names.sort();
        Ok(names)
    }

    async fn read_all(&self, collection: &str) -> Result<DocumentStream> {
        if !self.list_collections().await?.iter().any(|n| n == collection) {
            return Err(MigrateError::CollectionNotFound(collection.to_string()));
        }
        let cursor = self
            .db
            .collection::<mongodb::bson::Document>(collection)
            .find(doc! {})
            .await
            .map_err(unavailable)?;

        let name = collection.to_string();
        let documents = cursor.enumerate().map(move |(i, item)| {
            item.map(|d| Document::new(name.clone(), i as u64 + 1, Bson::Document(d).into_relaxed_extjson()))
                .map_err(unavailable)
        });
        Ok(documents.boxed())
    }
}
