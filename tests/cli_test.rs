//! Binary smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_commands() {
    Command::cargo_bin("evident")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("research"))
        .stdout(predicate::str::contains("ingest"));
}

#[test]
fn init_creates_data_dir_and_indexes() {
    let tmp = tempfile::tempdir().unwrap();
    Command::cargo_bin("evident")
        .unwrap()
        .args(["--data-dir"])
        .arg(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("documents"));
    assert!(tmp.path().join("records.db").exists());
}

#[test]
fn search_requires_known_case() {
    let tmp = tempfile::tempdir().unwrap();
    Command::cargo_bin("evident")
        .unwrap()
        .args(["--data-dir"])
        .arg(tmp.path())
        .args(["search", "contract", "--case", "NO-SUCH-CASE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn end_to_end_case_ingest_search() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");

    let evidence = tmp.path().join("exhibit.txt");
    std::fs::write(
        &evidence,
        "The contract was signed on Jan 15.\n\nPlaintiff seeks damages of $50,000.",
    )
    .unwrap();

    let run = |args: &[&str]| {
        let mut cmd = Command::cargo_bin("evident").unwrap();
        cmd.arg("--data-dir").arg(&data_dir).args(args);
        cmd
    };

    run(&["init"]).assert().success();
    run(&[
        "case-new",
        "--number",
        "2024-CV-7",
        "--client",
        "Acme",
        "--matter",
        "contract",
    ])
    .assert()
    .success();
    run(&["ingest", "--case", "2024-CV-7", evidence.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("success=true"));
    run(&["search", "agreement", "--case", "2024-CV-7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("results"));
}
