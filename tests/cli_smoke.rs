//! End-to-end CLI smoke test against the offline provider.

use assert_cmd::Command;
use tempfile::TempDir;

fn suite_file(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("suite.yaml");
    std::fs::write(
        &path,
        "- name: smoke\n  body: open the landing page and confirm it loads\n",
    )
    .expect("write suite");
    path
}

fn run_cmd(dir: &TempDir, suite: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("agentest").expect("binary");
    cmd.env("AGENTEST_CACHE_DIR", dir.path().join("cache"))
        .env_remove("RUST_LOG")
        .arg("run")
        .arg(suite)
        .arg("--offline");
    cmd
}

#[test]
fn offline_run_passes_and_second_run_hits_the_cache() {
    let dir = TempDir::new().expect("tempdir");
    let suite = suite_file(&dir);

    let first = run_cmd(&dir, &suite).output().expect("first run");
    assert!(first.status.success(), "first run failed: {first:?}");
    let stdout = String::from_utf8_lossy(&first.stdout);
    assert!(stdout.contains("passed"), "unexpected output: {stdout}");
    assert!(stdout.contains("[live]"), "unexpected output: {stdout}");

    let second = run_cmd(&dir, &suite).output().expect("second run");
    assert!(second.status.success(), "second run failed: {second:?}");
    let stdout = String::from_utf8_lossy(&second.stdout);
    assert!(stdout.contains("[cache]"), "unexpected output: {stdout}");
}

#[test]
fn no_cache_flag_forces_a_live_run() {
    let dir = TempDir::new().expect("tempdir");
    let suite = suite_file(&dir);

    run_cmd(&dir, &suite).assert().success();
    let output = run_cmd(&dir, &suite)
        .arg("--no-cache")
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[live]"), "unexpected output: {stdout}");
}

#[test]
fn missing_test_filter_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    let suite = suite_file(&dir);
    run_cmd(&dir, &suite)
        .arg("--test")
        .arg("does-not-exist")
        .assert()
        .failure();
}

#[test]
fn cache_invalidate_rejects_non_digest_arguments() {
    let dir = TempDir::new().expect("tempdir");
    let escape = dir.path().join("escape.json");
    std::fs::write(&escape, b"{}").expect("plant file outside the cache root");

    let mut cmd = Command::cargo_bin("agentest").expect("binary");
    cmd.env("AGENTEST_CACHE_DIR", dir.path().join("cache"))
        .arg("cache")
        .arg("invalidate")
        .arg("../escape")
        .assert()
        .failure();
    assert!(escape.exists(), "path traversal must not delete files");
}

#[test]
fn cache_sweep_runs_clean() {
    let dir = TempDir::new().expect("tempdir");
    let mut cmd = Command::cargo_bin("agentest").expect("binary");
    cmd.env("AGENTEST_CACHE_DIR", dir.path().join("cache"))
        .arg("cache")
        .arg("sweep")
        .assert()
        .success();
}
