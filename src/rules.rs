//! Declarative mapping rules: one per source collection.
//!
//! Rules are deserialized straight from the `[[collections]]` tables of the
//! configuration file:
//!
//! ```toml
//! [[collections]]
//! name = "projects"
//! table = "projects"
//! columns = [
//!     { name = "name", path = "name", type = "string" },
//!     { name = "homepage", path = "homepage", type = "string", required = false },
//! ]
//! foreign_keys = [
//!     { column = "owner_id", path = "owner", references = "users" },
//! ]
//!
//! [[collections.children]]
//! path = "members"
//! table = "relation_project_user"
//! parent_column = "project_id"
//! foreign_keys = [{ column = "user_id", path = ".", references = "users" }]
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use crate::fieldpath::FieldPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
}

impl ColumnType {
    /// SQLite type affinity used when the run creates the table.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::String | ColumnType::Json => "TEXT",
            ColumnType::Integer | ColumnType::Boolean | ColumnType::Timestamp => "INTEGER",
            ColumnType::Float => "REAL",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
        };
        f.write_str(name)
    }
}

/// What to do when a foreign key points at a document that was not migrated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DanglingPolicy {
    /// Abort the run.
    #[default]
    Fatal,
    /// Insert NULL and record a warning.
    Nullable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnRule {
    pub name: String,
    pub path: FieldPath,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub required: bool,
    /// Used when an optional field is missing; coerced like a source value.
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForeignKeyRule {
    pub column: String,
    pub path: FieldPath,
    /// Name of the referenced collection.
    pub references: String,
    #[serde(default)]
    pub policy: DanglingPolicy,
    #[serde(default = "default_true")]
    pub required: bool,
}

/// Expands an embedded list into rows of a second table.
#[derive(Debug, Clone, Deserialize)]
pub struct ChildRule {
    pub path: FieldPath,
    pub table: String,
    /// Receives the parent row's surrogate key.
    pub parent_column: String,
    #[serde(default)]
    pub key_column: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnRule>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyRule>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingRule {
    #[serde(rename = "name")]
    pub collection: String,
    pub table: String,
    #[serde(default = "default_key_column")]
    pub key_column: String,
    #[serde(default = "default_id_path")]
    pub id_path: FieldPath,
    #[serde(default)]
    pub columns: Vec<ColumnRule>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyRule>,
    #[serde(default)]
    pub children: Vec<ChildRule>,
}

fn default_true() -> bool {
    true
}

fn default_key_column() -> String {
    "id".to_string()
}

fn default_id_path() -> FieldPath {
    FieldPath::parse("_id").unwrap_or_else(|_| unreachable!("'_id' is a valid path"))
}

impl MappingRule {
    /// Every collection referenced by this rule or its children.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.foreign_keys
            .iter()
            .chain(self.children.iter().flat_map(|c| c.foreign_keys.iter()))
            .map(|fk| fk.references.as_str())
    }
}
