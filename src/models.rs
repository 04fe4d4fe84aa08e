//! Core data types that flow through the migration pipeline.
//!
//! Documents come out of a [`SourceReader`](crate::traits::SourceReader),
//! the mapper turns them into [`Row`]s, the emitter turns rows into
//! [`Statement`]s, and the writer persists the statements.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

use crate::rules::ColumnType;

/// A schemaless source record, in relaxed extended JSON form.
#[derive(Debug, Clone)]
pub struct Document {
    pub collection: String,
    /// 1-based position of the document in its collection's stream.
    pub position: u64,
    pub body: Value,
}

impl Document {
    pub fn new(collection: impl Into<String>, position: u64, body: Value) -> Self {
        Self {
            collection: collection.into(),
            position,
            body,
        }
    }

    pub fn doc_ref(&self, id: Option<&str>) -> DocRef {
        DocRef::new(&self.collection, self.position, id.map(str::to_string))
    }
}

/// Attribution of a row, warning, or error to one source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRef {
    pub collection: String,
    pub position: u64,
    pub id: Option<String>,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, position: u64, id: Option<String>) -> Self {
        Self {
            collection: collection.into(),
            position,
            id,
        }
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} document #{}", self.collection, self.position)?;
        if let Some(id) = &self.id {
            write!(f, " (_id {})", id)?;
        }
        Ok(())
    }
}

/// A value after coercion, tagged with the type it was coerced to.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Json(String),
}

impl SqlValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

/// A fully resolved relational row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub table: String,
    pub columns: Vec<(String, SqlValue)>,
    pub origin: DocRef,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }
}

/// Column of a table created by the run.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub not_null: bool,
    /// `(table, column)` this column points at.
    pub references: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub key_column: Option<String>,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<SqlValue>,
}

/// One entry of the migration script.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(TableDef),
    Insert(Insert),
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::CreateTable(def) => &def.name,
            Statement::Insert(insert) => &insert.table,
        }
    }
}

/// A non-fatal dangling reference that was replaced by NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub doc: DocRef,
    pub field: String,
    pub collection: String,
    pub foreign_id: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: field '{}' references {} '{}', which was not migrated; inserted NULL",
            self.doc, self.field, self.collection, self.foreign_id
        )
    }
}
