use anyhow::{bail, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::OutputConfig;

/// Open the live target database.
///
/// A single connection is enough: the whole run is one transaction.
pub async fn connect_target(path: &Path, create_if_missing: bool) -> Result<SqlitePool> {
    if create_if_missing {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(create_if_missing)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open target database: {}", path.display()))?;

    Ok(pool)
}

/// Pick the target database: `database` if configured, otherwise the first
/// existing entry of `search_paths`.
pub fn locate_target(output: &OutputConfig) -> Result<PathBuf> {
    if let Some(path) = &output.database {
        return Ok(path.clone());
    }
    match output.search_paths.iter().find(|p| p.is_file()) {
        Some(path) => Ok(path.clone()),
        None => {
            let searched: Vec<String> = output
                .search_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            bail!(
                "no target database configured and none found (searched: {})",
                searched.join(", ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_database_wins() {
        let output = OutputConfig {
            database: Some(PathBuf::from("/data/observ.db")),
            ..OutputConfig::default()
        };
        assert_eq!(locate_target(&output).unwrap(), PathBuf::from("/data/observ.db"));
    }

    #[test]
    fn first_existing_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("observ.db");
        std::fs::write(&present, b"").unwrap();
        let output = OutputConfig {
            search_paths: vec![dir.path().join("missing.db"), present.clone()],
            ..OutputConfig::default()
        };
        assert_eq!(locate_target(&output).unwrap(), present);

        let output = OutputConfig {
            search_paths: vec![dir.path().join("missing.db")],
            ..OutputConfig::default()
        };
        assert!(locate_target(&output).is_err());
    }
}
