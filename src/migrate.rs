//! Wiring for one `docshift` invocation: resolve the destination, build the
//! sink, connect the source and hand everything to the [`Coordinator`].

use anyhow::Result;
use std::path::PathBuf;

use crate::config::{Config, OutputMode};
use crate::coordinator::{Coordinator, RunOptions, RunSummary};
use crate::db;
use crate::plan::MigrationPlan;
use crate::progress::ProgressMode;
use crate::sink_file::FileSink;
use crate::sink_memory::DiscardSink;
use crate::sink_sqlite::SqliteSink;
use crate::sources::{open_source, SourceKind};
use crate::traits::StatementSink;

/// Where the statements of a run end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Script(PathBuf),
    Sqlite(PathBuf),
    /// Map everything, keep nothing.
    DryRun,
}

impl Destination {
    /// Resolve from the config, with command-line overrides taking precedence.
    pub fn resolve(
        config: &Config,
        output: Option<PathBuf>,
        target: Option<PathBuf>,
        dry_run: bool,
    ) -> Result<Self> {
        if dry_run {
            return Ok(Destination::DryRun);
        }
        match (output, target) {
            (Some(_), Some(_)) => anyhow::bail!("--output and --target are mutually exclusive"),
            (Some(path), None) => Ok(Destination::Script(path)),
            (None, Some(path)) => Ok(Destination::Sqlite(path)),
            (None, None) => match config.output.mode {
                OutputMode::Script => Ok(Destination::Script(config.output.script_path.clone())),
                OutputMode::Sqlite => Ok(Destination::Sqlite(db::locate_target(&config.output)?)),
            },
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Destination::Script(path) | Destination::Sqlite(path) => path.display().to_string(),
            Destination::DryRun => "dry run".to_string(),
        }
    }

    async fn sink(&self, create_tables: bool) -> Result<Box<dyn StatementSink>> {
        Ok(match self {
            Destination::Script(path) => Box::new(FileSink::new(path)),
            Destination::Sqlite(path) => {
                let pool = db::connect_target(path, create_tables).await?;
                Box::new(SqliteSink::new(pool, path.display().to_string()))
            }
            Destination::DryRun => Box::new(DiscardSink::new()),
        })
    }
}

/// Run a migration. Startup problems (unusable connection string, target
/// that cannot be opened) are errors; everything after that is reported in
/// the returned summary.
pub async fn run_migration(
    config: &Config,
    source: &str,
    destination: &Destination,
    progress: ProgressMode,
) -> Result<RunSummary> {
    SourceKind::parse(source)?;
    let options = RunOptions::from_config(config);

    // A plan that cannot run never opens the destination; the coordinator
    // reports the plan error against a stand-in.
    let sink: Box<dyn StatementSink> = match MigrationPlan::build(&config.collections) {
        Ok(_) => destination.sink(options.create_tables).await?,
        Err(err) => {
            tracing::debug!(error = %err, "plan rejected, destination left untouched");
            Box::new(DiscardSink::labelled(destination.describe()))
        }
    };
    tracing::debug!(destination = %sink.describe(), "sink ready");

    let mut coordinator =
        Coordinator::new(config.collections.clone(), options).with_progress(progress.reporter());
    Ok(coordinator.run(open_source(source), sink).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::error::MigrateError;

    const RULES: &str = r#"
        [[collections]]
        name = "news"
        table = "news"
    "#;

    #[test]
    fn overrides_take_precedence() {
        let config = parse_config(RULES).unwrap();
        assert_eq!(
            Destination::resolve(&config, None, None, false).unwrap(),
            Destination::Script(PathBuf::from("importer.sql"))
        );
        assert_eq!(
            Destination::resolve(&config, Some("out.sql".into()), None, false).unwrap(),
            Destination::Script(PathBuf::from("out.sql"))
        );
        assert_eq!(
            Destination::resolve(&config, None, Some("t.db".into()), false).unwrap(),
            Destination::Sqlite(PathBuf::from("t.db"))
        );
        assert_eq!(
            Destination::resolve(&config, Some("out.sql".into()), None, true).unwrap(),
            Destination::DryRun
        );
        assert!(Destination::resolve(&config, Some("a".into()), Some("b".into()), false).is_err());
    }

    #[test]
    fn sqlite_mode_needs_a_target() {
        let mut config = parse_config(RULES).unwrap();
        config.output.mode = OutputMode::Sqlite;
        config.output.search_paths = vec![PathBuf::from("/nonexistent/observ.db")];
        assert!(Destination::resolve(&config, None, None, false).is_err());
    }

    #[tokio::test]
    async fn cyclic_rules_leave_the_target_untouched() {
        let config = parse_config(
            r#"
            [output]
            create_tables = true

            [[collections]]
            name = "users"
            table = "users"
            foreign_keys = [{ column = "group_id", path = "group", references = "groups" }]

            [[collections]]
            name = "groups"
            table = "groups"
            foreign_keys = [{ column = "owner_id", path = "owner", references = "users" }]
            "#,
        )
        .unwrap();
        let tmp = tempfile::TempDir::new().unwrap();
        let export = tmp.path().join("export");
        std::fs::create_dir_all(&export).unwrap();
        let target = tmp.path().join("fresh").join("observ.db");

        let summary = run_migration(
            &config,
            export.to_str().unwrap(),
            &Destination::Sqlite(target.clone()),
            ProgressMode::Off,
        )
        .await
        .unwrap();

        assert!(matches!(summary.error, Some(MigrateError::ConfigurationCycleError(_))));
        assert_eq!(summary.destination, target.display().to_string());
        assert!(!target.exists());
        assert!(!tmp.path().join("fresh").exists());
    }
}
