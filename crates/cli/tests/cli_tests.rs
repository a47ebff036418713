// End-to-end tests for the `rappro` binary: exit codes, the --json stdout
// contract, and scripted session actions.
//
// Run with: cargo test -p rappro-cli --test cli_tests -- --nocapture

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn rappro() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rappro"));
    cmd.env_remove("RAPPRO_LOG");
    cmd
}

const BANK_CSV: &str = "\
Date;Libelle;Montant
10/01/2024;CB SUPERMARCHE;-100,00
12/01/2024;REMISE CHEQUES;150,00
15/01/2024;VIR CLIENT DUPONT;80,00
";

const BOOKS_CSV: &str = "\
Date,Libelle,Debit,Credit
2024-01-10,Achat fournitures,,100.00
2024-01-12,Cheque Martin,90.00,
2024-01-12,Cheque Durand,60.00,
2024-01-19,Client Dupont,80.00,
";

const CONFIG_HEAD: &str = r#"
name = "January close"

[bank]
file = "bank.csv"
[bank.columns]
date = "Date"
label = "Libelle"
amount = "Montant"

[accounting]
file = "books.csv"
[accounting.columns]
date = "Date"
label = "Libelle"
debit = "Debit"
credit = "Credit"
"#;

/// Temp dir holding bank.csv, books.csv and recon.toml (CONFIG_HEAD + extra).
fn workspace(extra_toml: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "bank.csv", BANK_CSV);
    write(dir.path(), "books.csv", BOOKS_CSV);
    write(dir.path(), "recon.toml", &format!("{CONFIG_HEAD}\n{extra_toml}"));
    dir
}

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

fn run_json(dir: &TempDir, extra_args: &[&str]) -> (Output, serde_json::Value) {
    let output = rappro()
        .arg("run")
        .arg(dir.path().join("recon.toml"))
        .arg("--json")
        .args(extra_args)
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(stdout.trim())
        .unwrap_or_else(|e| panic!("stdout must be one JSON value: {e}\nstdout:\n{stdout}"));
    (output, json)
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ===========================================================================
// run
// ===========================================================================

#[test]
fn leftovers_exit_5_with_full_snapshot() {
    // Dupont is 4 days apart in the books: outside the default tolerance of 3
    let dir = workspace("");
    let (output, json) = run_json(&dir, &[]);

    assert_eq!(output.status.code(), Some(5), "stderr: {}", stderr(&output));
    assert_eq!(json["name"], "January close");
    assert_eq!(json["run"]["status"], "completed");
    assert_eq!(json["summary"]["exact"], 1);
    assert_eq!(json["summary"]["grouped"], 1);
    assert_eq!(json["summary"]["unmatched_bank"], 1);
    assert_eq!(json["unmatched_bank"][0]["id"], "bank-2");
    assert_eq!(json["matches"].as_array().unwrap().len(), 2);
    assert_eq!(json["extracts"]["bank"]["transactions"], 3);
    assert!(stderr(&output).contains("error: 1 bank / 1 accounting line(s) unmatched"));
}

#[test]
fn day_tolerance_flag_reconciles_everything() {
    let dir = workspace("");
    let (output, json) = run_json(&dir, &["--day-tolerance", "4"]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(json["summary"]["exact"], 2);
    assert_eq!(json["summary"]["unmatched_bank"], 0);
    assert_eq!(json["summary"]["unmatched_accounting"], 0);
}

#[test]
fn human_summary_goes_to_stderr_only() {
    let dir = workspace("");
    let output = rappro()
        .arg("run")
        .arg(dir.path().join("recon.toml"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(5));
    assert!(output.stdout.is_empty());
    let err = stderr(&output);
    assert!(err.contains("January close: 2 groups"), "stderr: {err}");
    assert!(err.contains("unmatched: 1 bank"), "stderr: {err}");
}

#[test]
fn output_file_is_written() {
    let dir = workspace("");
    let out_path = dir.path().join("result.json");
    let output = rappro()
        .arg("run")
        .arg(dir.path().join("recon.toml"))
        .arg("--output")
        .arg(&out_path)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(5));
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(written["summary"]["total_groups"], 2);
}

#[test]
fn scripted_actions_settle_the_leftovers() {
    let dir = workspace(
        r#"
[[actions]]
op = "match"
ids = ["bank-2", "acc-3"]

[[actions]]
op = "unmatch"
group = "g:bank-99"
"#,
    );
    let (output, json) = run_json(&dir, &[]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(json["summary"]["manual"], 1);
    assert_eq!(json["matches"][0]["type"], "MANUAL");
    assert_eq!(json["actions"][0]["ok"], true);
    assert_eq!(json["actions"][0]["detail"], "g:bank-2");
    assert_eq!(json["actions"][1]["ok"], false);
    assert!(stderr(&output).contains("1 scripted action(s) failed"));
}

#[test]
fn ignore_action_and_rerun() {
    let dir = workspace(
        r#"
[[actions]]
op = "rerun"
day_tolerance = 1

[[actions]]
op = "ignore"
ids = ["bank-2", "acc-3"]
"#,
    );
    let (output, json) = run_json(&dir, &[]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(json["actions"][0]["detail"], "NoNewMatches: 0 new group(s)");
    assert_eq!(json["summary"]["excluded"], 2);
}

#[test]
fn proposals_file_is_revalidated() {
    let dir = workspace("");
    write(
        dir.path(),
        "fuzzy.json",
        r#"[
            {"bankId": "bank-2", "accountingIds": ["acc-3"], "type": "FUZZY", "confidence": 0.6,
             "reasoning": "same customer name"},
            {"bankId": "bank-0", "accountingIds": ["acc-0"], "type": "FUZZY", "confidence": 0.9}
        ]"#,
    );
    let proposals = dir.path().join("fuzzy.json");
    let (output, json) = run_json(&dir, &["--proposals", proposals.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(json["fuzzy"]["accepted"][0], "g:bank-2");
    assert_eq!(json["fuzzy"]["rejected"][0]["index"], 1);
    assert_eq!(json["summary"]["fuzzy"], 1);
    assert_eq!(json["matches"][0]["confidence"], 0.6);
}

#[test]
fn broken_fuzzy_command_degrades_to_no_proposals() {
    let dir = workspace("");
    let (output, json) = run_json(&dir, &["--fuzzy-cmd", "/nonexistent/rappro-fuzzy"]);

    assert_eq!(output.status.code(), Some(5));
    assert!(json["fuzzy"]["error"].as_str().unwrap().contains("unavailable"));
    assert_eq!(json["summary"]["fuzzy"], 0);
}

#[cfg(unix)]
#[test]
fn stuck_fuzzy_command_is_cancelled_after_timeout() {
    use std::os::unix::fs::PermissionsExt;

    let dir = workspace("");
    let script = dir.path().join("slow-matcher.sh");
    write(dir.path(), "slow-matcher.sh", "#!/bin/sh\nexec sleep 30\n");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let started = std::time::Instant::now();
    let (output, json) = run_json(
        &dir,
        &["--fuzzy-cmd", script.to_str().unwrap(), "--fuzzy-timeout", "1"],
    );

    assert!(started.elapsed() < std::time::Duration::from_secs(20));
    assert_eq!(output.status.code(), Some(5), "stderr: {}", stderr(&output));
    assert!(json["fuzzy"]["error"].as_str().unwrap().contains("cancelled"));
    assert_eq!(json["summary"]["fuzzy"], 0);
    assert_eq!(json["summary"]["unmatched_bank"], 1);
}

// ===========================================================================
// Errors
// ===========================================================================

#[test]
fn invalid_mapping_exits_3() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "bank.csv", BANK_CSV);
    write(dir.path(), "books.csv", BOOKS_CSV);
    write(
        dir.path(),
        "recon.toml",
        &CONFIG_HEAD.replace("amount = \"Montant\"", ""),
    );

    let output = rappro()
        .arg("run")
        .arg(dir.path().join("recon.toml"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("error:"));
    assert!(stderr(&output).contains("hint:"));
}

#[test]
fn missing_column_exits_3() {
    let dir = workspace("");
    write(dir.path(), "bank.csv", "Date;Label;Montant\n10/01/2024;CB;-100,00\n");

    let output = rappro()
        .arg("validate")
        .arg(dir.path().join("recon.toml"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("missing column 'Libelle'"), "stderr: {}", stderr(&output));
}

#[test]
fn missing_extract_exits_4() {
    let dir = workspace("");
    std::fs::remove_file(dir.path().join("books.csv")).unwrap();

    let output = rappro()
        .arg("run")
        .arg(dir.path().join("recon.toml"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("cannot read"));
}

#[test]
fn missing_argument_is_usage_error() {
    let output = rappro().arg("run").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ===========================================================================
// validate
// ===========================================================================

#[test]
fn validate_reports_counts() {
    let dir = workspace("");
    let output = rappro()
        .arg("validate")
        .arg(dir.path().join("recon.toml"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    let err = stderr(&output);
    assert!(err.contains("bank 3 lines"), "stderr: {err}");
    assert!(err.contains("accounting 4 lines"), "stderr: {err}");
}
