use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::coerce::coerce;
use crate::render::is_valid_identifier;
use crate::rules::{ColumnRule, ForeignKeyRule, MappingRule};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub collections: Vec<MappingRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Connection string used when none is given on the command line.
    #[serde(default)]
    pub uri: Option<String>,
    /// Read the collections of one dependency level concurrently.
    #[serde(default)]
    pub parallel_reads: bool,
    /// Documents buffered per collection when reading in parallel.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: None,
            parallel_reads: false,
            prefetch: default_prefetch(),
        }
    }
}

fn default_prefetch() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Write a `BEGIN TRANSACTION; ... COMMIT;` script file.
    #[default]
    Script,
    /// Apply statements directly to a SQLite database.
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default)]
    pub mode: OutputMode,
    #[serde(default = "default_script_path")]
    pub script_path: PathBuf,
    /// Live target. When unset, the first existing `search_paths` entry is used.
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default = "default_search_paths")]
    pub search_paths: Vec<PathBuf>,
    /// Emit `CREATE TABLE IF NOT EXISTS` for every mapped table first.
    #[serde(default)]
    pub create_tables: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::default(),
            script_path: default_script_path(),
            database: None,
            search_paths: default_search_paths(),
            create_tables: false,
        }
    }
}

fn default_script_path() -> PathBuf {
    PathBuf::from("importer.sql")
}

fn default_search_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("../../observ.db"),
        PathBuf::from("/var/lib/observatory/observ.db"),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.source.prefetch == 0 {
        bail!("source.prefetch must be > 0");
    }

    if config.collections.is_empty() {
        bail!("no [[collections]] mapping rules configured");
    }

    let mut names = HashSet::new();
    for rule in &config.collections {
        if rule.collection.is_empty() {
            bail!("collections.name must not be empty");
        }
        if !names.insert(rule.collection.as_str()) {
            bail!("collection '{}' is mapped more than once", rule.collection);
        }
    }

    for rule in &config.collections {
        let ctx = format!("collection '{}'", rule.collection);
        identifier(&ctx, "table", &rule.table)?;

        let mut row = vec![rule.key_column.as_str()];
        row.extend(rule.columns.iter().map(|c| c.name.as_str()));
        row.extend(rule.foreign_keys.iter().map(|fk| fk.column.as_str()));
        unique_columns(&ctx, &rule.table, &row)?;
        columns(&ctx, &rule.columns)?;
        foreign_keys(&ctx, &rule.foreign_keys, &names)?;

        for child in &rule.children {
            let ctx = format!("{} child '{}'", ctx, child.path);
            identifier(&ctx, "table", &child.table)?;
            if child.path.is_self() {
                bail!("{}: child path must name an embedded list", ctx);
            }
            let mut row: Vec<&str> = child.key_column.iter().map(String::as_str).collect();
            row.push(child.parent_column.as_str());
            row.extend(child.columns.iter().map(|c| c.name.as_str()));
            row.extend(child.foreign_keys.iter().map(|fk| fk.column.as_str()));
            unique_columns(&ctx, &child.table, &row)?;
            columns(&ctx, &child.columns)?;
            foreign_keys(&ctx, &child.foreign_keys, &names)?;
        }
    }

    Ok(())
}

fn identifier(ctx: &str, what: &str, name: &str) -> Result<()> {
    if !is_valid_identifier(name) {
        bail!(
            "{}: {} '{}' is not a valid identifier (letters, digits and '_', not starting with a digit)",
            ctx,
            what,
            name
        );
    }
    Ok(())
}

fn unique_columns(ctx: &str, table: &str, row: &[&str]) -> Result<()> {
    let mut seen = HashSet::new();
    for name in row {
        identifier(ctx, "column", name)?;
        if !seen.insert(*name) {
            bail!("{}: column '{}' appears twice in table '{}'", ctx, name, table);
        }
    }
    Ok(())
}

fn columns(ctx: &str, columns: &[ColumnRule]) -> Result<()> {
    for column in columns {
        if let Some(default) = &column.default {
            if column.required {
                bail!(
                    "{}: column '{}' has a default, so it must set required = false",
                    ctx,
                    column.name
                );
            }
            if let Err(detail) = coerce(default, column.column_type) {
                bail!("{}: default of column '{}' is invalid: {}", ctx, column.name, detail);
            }
        }
    }
    Ok(())
}

fn foreign_keys(ctx: &str, fks: &[ForeignKeyRule], collections: &HashSet<&str>) -> Result<()> {
    for fk in fks {
        if !collections.contains(fk.references.as_str()) {
            bail!(
                "{}: foreign key '{}' references '{}', which has no mapping rule",
                ctx,
                fk.column,
                fk.references
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[collections]]
        name = "users"
        table = "users"
        columns = [{ name = "handle", path = "handle", type = "string" }]
    "#;

    #[test]
    fn defaults_apply() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.output.mode, OutputMode::Script);
        assert_eq!(config.output.script_path, PathBuf::from("importer.sql"));
        assert_eq!(config.output.search_paths.len(), 2);
        assert_eq!(config.source.prefetch, 256);
        assert!(!config.source.parallel_reads);
    }

    #[test]
    fn full_config_parses() {
        let config = parse_config(
            r#"
            [source]
            uri = "mongodb://localhost:27017/observatory"
            parallel_reads = true
            prefetch = 16

            [output]
            mode = "sqlite"
            database = "/tmp/observ.db"
            create_tables = true

            [[collections]]
            name = "users"
            table = "users"

            [[collections]]
            name = "projects"
            table = "projects"
            foreign_keys = [{ column = "owner_id", path = "owner", references = "users" }]
            "#,
        )
        .unwrap();
        assert_eq!(config.output.mode, OutputMode::Sqlite);
        assert_eq!(config.output.database, Some(PathBuf::from("/tmp/observ.db")));
        assert_eq!(config.collections.len(), 2);
        assert_eq!(config.source.prefetch, 16);
    }

    #[test]
    fn rejects_bad_identifiers() {
        let err = parse_config(
            r#"
            [[collections]]
            name = "users"
            table = "users; DROP TABLE x"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a valid identifier"), "{err}");
    }

    #[test]
    fn rejects_duplicate_collections_and_columns() {
        let dup = format!("{}{}", MINIMAL, MINIMAL);
        assert!(parse_config(&dup).is_err());

        let err = parse_config(
            r#"
            [[collections]]
            name = "users"
            table = "users"
            columns = [{ name = "id", path = "legacy_id", type = "integer" }]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("appears twice"), "{err}");
    }

    #[test]
    fn rejects_unknown_reference_target() {
        let err = parse_config(
            r#"
            [[collections]]
            name = "projects"
            table = "projects"
            foreign_keys = [{ column = "owner_id", path = "owner", references = "people" }]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no mapping rule"), "{err}");
    }

    #[test]
    fn defaults_only_on_optional_columns() {
        let err = parse_config(
            r#"
            [[collections]]
            name = "news"
            table = "news"
            columns = [{ name = "published", path = "published", type = "boolean", default = false }]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("required = false"), "{err}");

        assert!(parse_config(
            r#"
            [[collections]]
            name = "news"
            table = "news"
            columns = [{ name = "score", path = "score", type = "integer", required = false, default = "many" }]
            "#,
        )
        .is_err());
    }

    #[test]
    fn rejects_zero_prefetch_and_empty_rules() {
        assert!(parse_config("[source]\nprefetch = 0\n").is_err());
        assert!(parse_config("").is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/docshift.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
