use predicates::prelude::*;

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let tmp = tempfile::tempdir().expect("tempdir");
    assert_cmd::cargo::cargo_bin_cmd!("medical-rag")
        .env("RUST_LOG", "debug")
        .args(["convert", "--only", "stomach"])
        .arg("--data-dir")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("parsed cli"));
}

#[test]
fn unknown_target_id_is_rejected() {
    let tmp = tempfile::tempdir().expect("tempdir");
    assert_cmd::cargo::cargo_bin_cmd!("medical-rag")
        .args(["crawl", "--engine", "http", "--only", "pancreas"])
        .arg("--data-dir")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown target id: pancreas"));
}

#[test]
fn ask_requires_a_built_index() {
    let tmp = tempfile::tempdir().expect("tempdir");
    assert_cmd::cargo::cargo_bin_cmd!("medical-rag")
        .args(["ask", "--query", "위암", "--embedding-engine", "hashing", "--chat-engine", "noop"])
        .arg("--data-dir")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("run `medical-rag index` first"));
}

#[test]
fn server_refuses_to_start_without_index() {
    let tmp = tempfile::tempdir().expect("tempdir");
    assert_cmd::cargo::cargo_bin_cmd!("medical-rag-server")
        .args(["--addr", "127.0.0.1:0", "--embedding-engine", "hashing", "--chat-engine", "noop"])
        .arg("--data-dir")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("initialize rag service"));
}
