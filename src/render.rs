//! SQL text rendering for the script artifact.
//!
//! Values are rendered from their typed form only: text is always quoted
//! with embedded quotes doubled, identifiers are always double-quoted, and
//! numbers use their canonical representation. Nothing from a source
//! document is ever spliced into a statement as raw SQL.

use crate::models::{ColumnDef, Insert, SqlValue, Statement, TableDef};

pub const BEGIN_MARKER: &str = "BEGIN TRANSACTION;";
pub const COMMIT_MARKER: &str = "COMMIT;";

/// Table and column names accepted by config validation.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

pub fn literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Text(s) | SqlValue::Json(s) => quote_text(s),
        SqlValue::Integer(i) => i.to_string(),
        // Debug keeps a decimal point or exponent, so SQLite reads a REAL back.
        SqlValue::Float(f) => format!("{:?}", f),
        SqlValue::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
        SqlValue::Timestamp(ts) => ts.timestamp().to_string(),
    }
}

/// One statement, terminated by `;`.
pub fn render(statement: &Statement) -> String {
    match statement {
        Statement::Insert(insert) => render_insert(insert),
        Statement::CreateTable(def) => render_create(def),
    }
}

/// Parameterized form used when applying directly to a live database.
pub fn insert_with_placeholders(insert: &Insert) -> String {
    let placeholders = vec!["?"; insert.values.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&insert.table),
        column_list(&insert.columns),
        placeholders
    )
}

fn render_insert(insert: &Insert) -> String {
    let values: Vec<String> = insert.values.iter().map(literal).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote_ident(&insert.table),
        column_list(&insert.columns),
        values.join(", ")
    )
}

fn render_create(def: &TableDef) -> String {
    let columns: Vec<String> = def
        .columns
        .iter()
        .map(|c| column_definition(c, def.key_column.as_deref() == Some(c.name.as_str())))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        quote_ident(&def.name),
        columns.join(", ")
    )
}

fn column_definition(column: &ColumnDef, primary_key: bool) -> String {
    let mut sql = format!("{} {}", quote_ident(&column.name), column.column_type.sql_type());
    if primary_key {
        sql.push_str(" PRIMARY KEY");
    } else if column.not_null {
        sql.push_str(" NOT NULL");
    }
    if let Some((table, key)) = &column.references {
        sql.push_str(&format!(" REFERENCES {} ({})", quote_ident(table), quote_ident(key)));
    }
    sql
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}
