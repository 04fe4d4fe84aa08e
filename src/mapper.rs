//! Schema mapper: applies a [`MappingRule`] to one document.
//!
//! A document yields one parent row in the rule's table, plus one row per
//! element of every embedded list a child rule names. The parent's surrogate
//! key is allocated and registered before any child row is built, so child
//! rows can always point back at it.

use serde_json::Value;
use std::collections::HashMap;

use crate::coerce::{coerce, normalize_id};
use crate::error::{MigrateError, Result};
use crate::fieldpath::FieldPath;
use crate::models::{DocRef, Document, Row, SqlValue, Warning};
use crate::rules::{ChildRule, ColumnRule, DanglingPolicy, ForeignKeyRule, MappingRule};
use crate::translation::{KeyAllocator, TranslationTable};

/// The rows derived from one document.
#[derive(Debug, Clone)]
pub struct MappedDocument {
    pub source_id: String,
    pub key: i64,
    pub rows: Vec<Row>,
    pub warnings: Vec<Warning>,
}

pub struct Mapper {
    rules: Vec<MappingRule>,
    by_collection: HashMap<String, usize>,
    keys: KeyAllocator,
}

impl Mapper {
    pub fn new(rules: Vec<MappingRule>) -> Self {
        let by_collection = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| (rule.collection.clone(), i))
            .collect();
        Self {
            rules,
            by_collection,
            keys: KeyAllocator::new(),
        }
    }

    pub fn keys(&self) -> &KeyAllocator {
        &self.keys
    }

    pub fn map_document(
        &mut self,
        collection: &str,
        doc: &Document,
        translation: &mut TranslationTable,
    ) -> Result<MappedDocument> {
        let idx = *self
            .by_collection
            .get(collection)
            .ok_or_else(|| MigrateError::CollectionNotFound(collection.to_string()))?;
        let rule = &self.rules[idx];

        let source_id = source_id(rule, doc)?;
        let origin = doc.doc_ref(Some(&source_id));
        let mut warnings = Vec::new();

        let values = extract_columns(&rule.columns, &doc.body, None, &origin)?;
        let foreign = resolve_foreign_keys(
            &rule.foreign_keys,
            &doc.body,
            None,
            &origin,
            translation,
            &mut warnings,
        )?;

        if translation.contains(&rule.collection, &source_id) {
            return Err(MigrateError::DuplicateIdentifier {
                doc: origin,
                collection: rule.collection.clone(),
                id: source_id,
            });
        }
        let key = self.keys.next(&rule.table);
        // Checked above, so registration cannot collide.
        let _ = translation.register(&rule.collection, &source_id, key);

        let mut columns = Vec::with_capacity(1 + values.len() + foreign.len());
        columns.push((rule.key_column.clone(), SqlValue::Integer(key)));
        columns.extend(values);
        columns.extend(foreign);

        let mut rows = vec![Row {
            table: rule.table.clone(),
            columns,
            origin: origin.clone(),
        }];

        for child in &rule.children {
            let elements = child_elements(child, &doc.body, &origin)?;
            for (i, element) in elements.iter().enumerate() {
                let prefix = format!("{}[{}]", child.path, i);
                let values = extract_columns(&child.columns, element, Some(&prefix), &origin)?;
                let foreign = resolve_foreign_keys(
                    &child.foreign_keys,
                    element,
                    Some(&prefix),
                    &origin,
                    translation,
                    &mut warnings,
                )?;

                let mut columns = Vec::with_capacity(2 + values.len() + foreign.len());
                if let Some(key_column) = &child.key_column {
                    columns.push((key_column.clone(), SqlValue::Integer(self.keys.next(&child.table))));
                }
                columns.push((child.parent_column.clone(), SqlValue::Integer(key)));
                columns.extend(values);
                columns.extend(foreign);

                rows.push(Row {
                    table: child.table.clone(),
                    columns,
                    origin: origin.clone(),
                });
            }
        }

        Ok(MappedDocument {
            source_id,
            key,
            rows,
            warnings,
        })
    }
}

fn source_id(rule: &MappingRule, doc: &Document) -> Result<String> {
    let value = present(rule.id_path.lookup(&doc.body)).ok_or_else(|| MigrateError::MissingField {
        doc: doc.doc_ref(None),
        field: rule.id_path.to_string(),
    })?;
    normalize_id(value).ok_or_else(|| MigrateError::CoercionError {
        doc: doc.doc_ref(None),
        field: rule.id_path.to_string(),
        expected: "identifier".to_string(),
        detail: format!("unsupported identifier value {}", value),
    })
}

fn child_elements<'a>(child: &ChildRule, body: &'a Value, origin: &DocRef) -> Result<&'a [Value]> {
    match present(child.path.lookup(body)) {
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(other) => Err(MigrateError::CoercionError {
            doc: origin.clone(),
            field: child.path.to_string(),
            expected: "array".to_string(),
            detail: format!("found {}", other),
        }),
        None if child.required => Err(MigrateError::MissingField {
            doc: origin.clone(),
            field: child.path.to_string(),
        }),
        None => Ok(&[][..]),
    }
}

fn extract_columns(
    columns: &[ColumnRule],
    source: &Value,
    prefix: Option<&str>,
    origin: &DocRef,
) -> Result<Vec<(String, SqlValue)>> {
    columns
        .iter()
        .map(|column| {
            let field = qualify(prefix, &column.path);
            let value = match present(column.path.lookup(source)) {
                Some(value) => coerce(value, column.column_type),
                None if column.required => {
                    return Err(MigrateError::MissingField {
                        doc: origin.clone(),
                        field,
                    })
                }
                None => match &column.default {
                    Some(default) => coerce(default, column.column_type),
                    None => Ok(SqlValue::Null),
                },
            };
            value
                .map(|v| (column.name.clone(), v))
                .map_err(|detail| MigrateError::CoercionError {
                    doc: origin.clone(),
                    field,
                    expected: column.column_type.to_string(),
                    detail,
                })
        })
        .collect()
}

fn resolve_foreign_keys(
    foreign_keys: &[ForeignKeyRule],
    source: &Value,
    prefix: Option<&str>,
    origin: &DocRef,
    translation: &TranslationTable,
    warnings: &mut Vec<Warning>,
) -> Result<Vec<(String, SqlValue)>> {
    let mut resolved = Vec::with_capacity(foreign_keys.len());
    for fk in foreign_keys {
        let field = qualify(prefix, &fk.path);
        let value = match present(fk.path.lookup(source)) {
            None if fk.required => {
                return Err(MigrateError::MissingField {
                    doc: origin.clone(),
                    field,
                })
            }
            None => SqlValue::Null,
            Some(raw) => {
                let foreign_id = normalize_id(raw).ok_or_else(|| MigrateError::CoercionError {
                    doc: origin.clone(),
                    field: field.clone(),
                    expected: "identifier".to_string(),
                    detail: format!("unsupported identifier value {}", raw),
                })?;
                match (translation.resolve(&fk.references, &foreign_id), fk.policy) {
                    (Some(key), _) => SqlValue::Integer(key),
                    (None, DanglingPolicy::Fatal) => {
                        return Err(MigrateError::DanglingReference {
                            doc: origin.clone(),
                            field,
                            collection: fk.references.clone(),
                            foreign_id,
                        })
                    }
                    (None, DanglingPolicy::Nullable) => {
                        warnings.push(Warning {
                            doc: origin.clone(),
                            field,
                            collection: fk.references.clone(),
                            foreign_id,
                        });
                        SqlValue::Null
                    }
                }
            }
        };
        resolved.push((fk.column.clone(), value));
    }
    Ok(resolved)
}

/// Missing and explicit `null` are treated the same.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn qualify(prefix: Option<&str>, path: &FieldPath) -> String {
    match prefix {
        Some(prefix) if path.is_self() => prefix.to_string(),
        Some(prefix) => format!("{}.{}", prefix, path),
        None => path.to_string(),
    }
}
