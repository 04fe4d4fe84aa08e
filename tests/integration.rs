use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docshift_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docshift"))
}

fn fixture_export() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/export")
}

/// Temp dir holding a copy of the shipped config, optionally edited.
fn setup_test_env(edit: impl Fn(String) -> String) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let shipped = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/docshift.toml");
    let content = fs::read_to_string(shipped).unwrap();

    let config_path = tmp.path().join("docshift.toml");
    fs::write(&config_path, edit(content)).unwrap();
    (tmp, config_path)
}

fn run_docshift(config_path: &Path, args: &[&str]) -> (String, String, Option<i32>) {
    let binary = docshift_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docshift binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code())
}

#[test]
fn test_script_from_export() {
    let (tmp, config) = setup_test_env(|c| c);
    let out = tmp.path().join("importer.sql");
    let source = fixture_export();

    let (stdout, stderr, code) = run_docshift(
        &config,
        &[source.to_str().unwrap(), "--output", out.to_str().unwrap()],
    );
    assert_eq!(code, Some(0), "stdout: {stdout}\nstderr: {stderr}");
    assert!(stdout.contains("documents read: 8"), "{stdout}");
    assert!(stdout.contains("rows users: 2"), "{stdout}");
    assert!(stdout.contains("rows relation_project_user: 3"), "{stdout}");
    assert!(stdout.contains("rows meetings: 1"), "{stdout}");
    assert!(stdout.contains("rows events: 1"), "{stdout}");
    assert!(stdout.contains("warnings: 1"), "{stdout}");
    assert!(stdout.trim_end().ends_with("ok"), "{stdout}");
    assert!(stderr.contains("Warning:"), "{stderr}");
    assert!(stderr.contains("5d6e8f1a2b3c4d5e6f7081ff"), "{stderr}");

    let script = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = script.lines().collect();
    assert_eq!(lines.first(), Some(&"BEGIN TRANSACTION;"));
    assert_eq!(lines.last(), Some(&"COMMIT;"));
    assert_eq!(lines.len(), 16);
    assert!(script.contains("'Brian O''Neil'"), "{script}");
    assert!(!script.contains("sessions"));
}

#[test]
fn test_source_from_config() {
    let source = fixture_export();
    let uri = format!("file://{}", source.display());
    let (tmp, config) = setup_test_env(|c| {
        c.replace(
            "# uri = \"mongodb://127.0.0.1:27017/observatory\"",
            &format!("uri = \"{}\"", uri),
        )
    });
    let out = tmp.path().join("from-config.sql");

    let (stdout, stderr, code) = run_docshift(&config, &["--output", out.to_str().unwrap()]);
    assert_eq!(code, Some(0), "stdout: {stdout}\nstderr: {stderr}");
    assert!(out.exists());
}

#[test]
fn test_dry_run_writes_nothing() {
    let (tmp, config) = setup_test_env(|c| c);
    let out = tmp.path().join("importer.sql");
    let source = fixture_export();

    let (stdout, stderr, code) = run_docshift(
        &config,
        &[
            source.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
            "--dry-run",
            "--progress",
            "json",
        ],
    );
    assert_eq!(code, Some(0), "stdout: {stdout}\nstderr: {stderr}");
    assert!(stdout.contains("dry run"), "{stdout}");
    assert!(stderr.contains("\"event\":\"phase\""), "{stderr}");
    assert!(!out.exists());
}

#[test]
fn test_abort_leaves_no_script() {
    let (tmp, config) = setup_test_env(|c| c);
    let export = tmp.path().join("export");
    fs::create_dir_all(&export).unwrap();
    for name in ["users.jsonl", "news.jsonl", "events.jsonl", "projects.jsonl", "groups.jsonl"] {
        fs::copy(fixture_export().join(name), export.join(name)).unwrap();
    }
    fs::write(
        export.join("users.jsonl"),
        "{\"_id\":\"u1\",\"real_name\":\"A\",\"handle\":\"a\",\"email\":\"a@x\",\"password_hash\":\"h\",\"joined_on\":\"2019-01-01\",\"tier\":\"gold\"}\n",
    )
    .unwrap();
    let out = tmp.path().join("importer.sql");

    let (stdout, stderr, code) = run_docshift(
        &config,
        &[export.to_str().unwrap(), "--output", out.to_str().unwrap()],
    );
    assert_eq!(code, Some(1), "stdout: {stdout}\nstderr: {stderr}");
    assert!(stderr.contains("CoercionError"), "{stderr}");
    assert!(stderr.contains("users document #1"), "{stderr}");
    assert!(stdout.contains("aborted: CoercionError"), "{stdout}");
    assert!(!out.exists());
    assert!(!tmp.path().join("importer.sql.partial").exists());
}

#[test]
fn test_live_target_rerun_fails() {
    let (tmp, config) = setup_test_env(|c| c.replace("create_tables = false", "create_tables = true"));
    let db = tmp.path().join("observ.db");
    let source = fixture_export();

    let (stdout, stderr, code) = run_docshift(
        &config,
        &[source.to_str().unwrap(), "--target", db.to_str().unwrap()],
    );
    assert_eq!(code, Some(0), "stdout: {stdout}\nstderr: {stderr}");
    assert!(db.exists());

    let (stdout, stderr, code) = run_docshift(
        &config,
        &[source.to_str().unwrap(), "--target", db.to_str().unwrap()],
    );
    assert_eq!(code, Some(1), "stdout: {stdout}\nstderr: {stderr}");
    assert!(stderr.contains("CommitFailure"), "{stderr}");
}

#[test]
fn test_startup_errors_exit_2() {
    let (tmp, config) = setup_test_env(|c| c);

    let (_, stderr, code) = run_docshift(&tmp.path().join("missing.toml"), &[fixture_export().to_str().unwrap()]);
    assert_eq!(code, Some(2));
    assert!(stderr.contains("Failed to read config file"), "{stderr}");

    let (_, stderr, code) = run_docshift(&config, &["postgres://db/observatory"]);
    assert_eq!(code, Some(2));
    assert!(stderr.contains("unsupported source scheme"), "{stderr}");

    let (_, stderr, code) = run_docshift(&config, &["mongodb://127.0.0.1:27017"]);
    assert_eq!(code, Some(2));
    assert!(stderr.contains("must name a database"), "{stderr}");

    let (_, stderr, code) = run_docshift(&config, &[]);
    assert_eq!(code, Some(2));
    assert!(stderr.contains("no source given"), "{stderr}");
}
