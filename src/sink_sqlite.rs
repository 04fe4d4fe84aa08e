//! Live SQLite sink: applies statements inside one database transaction.

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool};
use sqlx::Transaction;

use crate::error::{MigrateError, Result};
use crate::models::{SqlValue, Statement};
use crate::render::{insert_with_placeholders, render};
use crate::traits::{CommitReceipt, StatementSink};

pub struct SqliteSink {
    pool: SqlitePool,
    label: String,
    tx: Option<Transaction<'static, Sqlite>>,
    statements: u64,
}

impl SqliteSink {
    pub fn new(pool: SqlitePool, label: impl Into<String>) -> Self {
        Self {
            pool,
            label: label.into(),
            tx: None,
            statements: 0,
        }
    }
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &SqlValue) -> SqliteQuery<'q> {
    match value {
        SqlValue::Null => query.bind(None::<i64>),
        SqlValue::Text(s) | SqlValue::Json(s) => query.bind(s.clone()),
        SqlValue::Integer(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Boolean(b) => query.bind(*b),
        SqlValue::Timestamp(ts) => query.bind(ts.timestamp()),
    }
}

#[async_trait]
impl StatementSink for SqliteSink {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn open(&mut self) -> Result<()> {
        let tx = self.pool.begin().await.map_err(|e| {
            MigrateError::CommitFailure(format!("cannot begin transaction on {}: {}", self.label, e))
        })?;
        self.tx = Some(tx);
        Ok(())
    }

    async fn write(&mut self, statement: &Statement) -> Result<()> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| MigrateError::CommitFailure(format!("no open transaction on {}", self.label)))?;

        let result = match statement {
            Statement::Insert(insert) => {
                let sql = insert_with_placeholders(insert);
                let query = insert
                    .values
                    .iter()
                    .fold(sqlx::query(&sql), |query, value| bind_value(query, value));
                query.execute(&mut **tx).await
            }
            Statement::CreateTable(_) => {
                let sql = render(statement);
                sqlx::query(&sql).execute(&mut **tx).await
            }
        };
        result.map_err(|e| {
            MigrateError::CommitFailure(format!(
                "statement {} ({}) rejected by target: {}",
                self.statements + 1,
                statement.table(),
                e
            ))
        })?;
        self.statements += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<CommitReceipt> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrateError::CommitFailure(format!("no open transaction on {}", self.label)))?;
        tx.commit()
            .await
            .map_err(|e| MigrateError::CommitFailure(format!("{}: {}", self.label, e)))?;
        Ok(CommitReceipt {
            destination: self.label.clone(),
            statements: self.statements,
            sha256: None,
        })
    }

    async fn discard(&mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(err) = tx.rollback().await {
                tracing::warn!(target_db = %self.label, error = %err, "rollback failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Insert;

    async fn memory_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::raw_sql("CREATE TABLE projects (id INTEGER PRIMARY KEY, name TEXT NOT NULL, stars INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    fn project(id: i64, name: &str) -> Statement {
        Statement::Insert(Insert {
            table: "projects".into(),
            columns: vec!["id".into(), "name".into(), "stars".into()],
            values: vec![SqlValue::Integer(id), SqlValue::Text(name.into()), SqlValue::Null],
        })
    }

    #[tokio::test]
    async fn commit_applies_rows() {
        let pool = memory_pool().await;
        let mut sink = SqliteSink::new(pool.clone(), "memory");
        sink.open().await.unwrap();
        sink.write(&project(1, "O'Brien's tool")).await.unwrap();
        let receipt = sink.finish().await.unwrap();
        assert_eq!(receipt.statements, 1);

        let name: String = sqlx::query_scalar("SELECT name FROM projects WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(name, "O'Brien's tool");
    }

    #[tokio::test]
    async fn conflict_is_commit_failure_and_rolls_back() {
        let pool = memory_pool().await;
        let mut sink = SqliteSink::new(pool.clone(), "memory");
        sink.open().await.unwrap();
        sink.write(&project(1, "a")).await.unwrap();
        let err = sink.write(&project(1, "b")).await.unwrap_err();
        assert_eq!(err.kind(), "CommitFailure");
        sink.discard().await;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
