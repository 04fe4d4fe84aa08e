//! Statement emitter: rows in, typed statements out, in production order.

use std::collections::{BTreeMap, HashMap};

use crate::models::{ColumnDef, Insert, Row, Statement, TableDef};
use crate::rules::{ColumnType, MappingRule};

#[derive(Debug, Default)]
pub struct StatementEmitter {
    rows_per_table: BTreeMap<String, u64>,
}

impl StatementEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, row: Row) -> Statement {
        *self.rows_per_table.entry(row.table.clone()).or_insert(0) += 1;
        let (columns, values) = row.columns.into_iter().unzip();
        Statement::Insert(Insert {
            table: row.table,
            columns,
            values,
        })
    }

    pub fn rows_per_table(&self) -> &BTreeMap<String, u64> {
        &self.rows_per_table
    }

    pub fn total_rows(&self) -> u64 {
        self.rows_per_table.values().sum()
    }
}

/// `CREATE TABLE` statements for every table the rules write, visiting rules
/// in `order` so referenced tables are created first.
///
/// Columns of a table written by several rules are merged; the first
/// declaration of a column wins.
pub fn schema_statements(rules: &[MappingRule], order: impl IntoIterator<Item = usize>) -> Vec<Statement> {
    let targets: HashMap<&str, (&str, &str)> = rules
        .iter()
        .map(|r| (r.collection.as_str(), (r.table.as_str(), r.key_column.as_str())))
        .collect();
    let reference = |collection: &str| {
        targets
            .get(collection)
            .map(|(table, key)| (table.to_string(), key.to_string()))
    };

    let mut tables: Vec<TableDef> = Vec::new();
    let mut add = |def: TableDef| match tables.iter_mut().find(|t| t.name == def.name) {
        Some(existing) => {
            if existing.key_column.is_none() {
                existing.key_column = def.key_column;
            }
            for column in def.columns {
                if !existing.columns.iter().any(|c| c.name == column.name) {
                    existing.columns.push(column);
                }
            }
        }
        None => tables.push(def),
    };

    for i in order {
        let rule = &rules[i];
        let mut columns = vec![column(&rule.key_column, ColumnType::Integer, true, None)];
        columns.extend(
            rule.columns
                .iter()
                .map(|c| column(&c.name, c.column_type, c.required || c.default.is_some(), None)),
        );
        columns.extend(rule.foreign_keys.iter().map(|fk| {
            column(&fk.column, ColumnType::Integer, false, reference(&fk.references))
        }));
        add(TableDef {
            name: rule.table.clone(),
            key_column: Some(rule.key_column.clone()),
            columns,
        });

        for child in &rule.children {
            let mut columns = Vec::new();
            if let Some(key) = &child.key_column {
                columns.push(column(key, ColumnType::Integer, true, None));
            }
            columns.push(column(
                &child.parent_column,
                ColumnType::Integer,
                true,
                Some((rule.table.clone(), rule.key_column.clone())),
            ));
            columns.extend(
                child
                    .columns
                    .iter()
                    .map(|c| column(&c.name, c.column_type, c.required || c.default.is_some(), None)),
            );
            columns.extend(child.foreign_keys.iter().map(|fk| {
                column(&fk.column, ColumnType::Integer, false, reference(&fk.references))
            }));
            add(TableDef {
                name: child.table.clone(),
                key_column: child.key_column.clone(),
                columns,
            });
        }
    }

    tables.into_iter().map(Statement::CreateTable).collect()
}

fn column(
    name: &str,
    column_type: ColumnType,
    not_null: bool,
    references: Option<(String, String)>,
) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        column_type,
        not_null,
        references,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocRef, SqlValue};

    #[test]
    fn emit_preserves_column_order_and_counts_rows() {
        let mut emitter = StatementEmitter::new();
        let row = Row {
            table: "projects".into(),
            columns: vec![
                ("id".into(), SqlValue::Integer(1)),
                ("name".into(), SqlValue::Text("observatory".into())),
            ],
            origin: DocRef::new("projects", 1, Some("p1".into())),
        };
        let statement = emitter.emit(row.clone());
        emitter.emit(row);

        match statement {
            Statement::Insert(insert) => {
                assert_eq!(insert.table, "projects");
                assert_eq!(insert.columns, vec!["id", "name"]);
                assert_eq!(insert.values[1], SqlValue::Text("observatory".into()));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(emitter.rows_per_table().get("projects"), Some(&2));
        assert_eq!(emitter.total_rows(), 2);
    }

    #[test]
    fn schema_merges_tables_and_links_references() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            collections: Vec<MappingRule>,
        }
        let rules = toml::from_str::<Wrapper>(
            r#"
            [[collections]]
            name = "users"
            table = "users"
            columns = [{ name = "handle", path = "handle", type = "string" }]

            [[collections]]
            name = "projects"
            table = "projects"
            columns = [{ name = "homepage", path = "homepage", type = "string", required = false }]
            foreign_keys = [{ column = "owner_id", path = "owner", references = "users" }]
            [[collections.children]]
            path = "members"
            table = "relation_project_user"
            parent_column = "project_id"
            foreign_keys = [{ column = "user_id", path = ".", references = "users" }]
            "#,
        )
        .unwrap()
        .collections;

        let statements = schema_statements(&rules, [0, 1]);
        let names: Vec<&str> = statements.iter().map(Statement::table).collect();
        assert_eq!(names, vec!["users", "projects", "relation_project_user"]);

        let Statement::CreateTable(projects) = &statements[1] else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(projects.key_column.as_deref(), Some("id"));
        let homepage = projects.columns.iter().find(|c| c.name == "homepage").unwrap();
        assert!(!homepage.not_null);
        let owner = projects.columns.iter().find(|c| c.name == "owner_id").unwrap();
        assert_eq!(owner.references, Some(("users".to_string(), "id".to_string())));

        let Statement::CreateTable(relation) = &statements[2] else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(relation.key_column, None);
        assert_eq!(relation.columns[0].name, "project_id");
    }
}
