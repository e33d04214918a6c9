//! CLI smoke tests: exit-code contract, pre-flight validation, JSON summaries.

mod common;

use common::{BankFixture, category_filter, run_cli_case};
use serde_json::Value;

fn json_line(stdout: &str) -> Value {
    let line = stdout
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .unwrap_or_else(|| panic!("no JSON summary in stdout:\n{stdout}"));
    serde_json::from_str(line).expect("summary is valid JSON")
}

/// System context with two duplicate pairs in category 10, one pair bound to a slot.
fn seeded() -> BankFixture {
    let fx = BankFixture::new();
    fx.system_context(1)
        .category(10, 1, 0)
        .category(20, 1, 0)
        .random_slot(1, 1, &category_filter(20, false))
        .question(1, 10, "A", "same")
        .question(2, 10, "A", "same")
        .question(3, 10, "B", "other")
        .question(4, 10, "B", "other")
        .slot_reference(1, 4);
    fx
}

#[test]
fn help_and_version_exit_zero() {
    let home = tempfile::tempdir().unwrap();
    let help = run_cli_case("help", home.path(), &["--help"]);
    assert!(help.status.success(), "log: {}", help.log_path.display());
    assert!(help.stdout.contains("build-protected"));

    let version = run_cli_case("version", home.path(), &["--version"]);
    assert!(version.status.success());
    assert!(version.stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn usage_errors_exit_one() {
    let home = tempfile::tempdir().unwrap();
    for (case, args) in [
        ("bad-dry-run", vec!["dedup", "--dry-run", "2"]),
        ("unknown-subcommand", vec!["shred"]),
        ("zero-budget", vec!["run", "--max-deletions", "0"]),
    ] {
        let result = run_cli_case(case, home.path(), &args);
        assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    }
}

#[test]
fn invalid_scope_exits_one_without_touching_store() {
    let home = tempfile::tempdir().unwrap();
    let db = home.path().join("never-created.sqlite3");
    let db_arg = db.to_string_lossy().into_owned();

    for (case, args) in [
        ("level-99", vec!["--db", db_arg.as_str(), "dedup", "--context-level", "99", "--dry-run", "0"]),
        ("course-no-instance", vec!["--db", db_arg.as_str(), "run", "--context-level", "50"]),
        ("audit-level-99", vec!["--db", db_arg.as_str(), "audit", "--context-level", "99"]),
    ] {
        let result = run_cli_case(case, home.path(), &args);
        assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
        assert!(result.stderr.contains("QBJ-1101"), "log: {}", result.log_path.display());
    }
    assert!(!db.exists());
}

#[test]
fn dedup_without_context_level_exits_one() {
    let home = tempfile::tempdir().unwrap();
    let db = home.path().join("never-created.sqlite3");
    let result = run_cli_case(
        "dedup-no-level",
        home.path(),
        &["--db", &db.to_string_lossy(), "dedup", "--dry-run", "0"],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("QBJ-1101"), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("--context-level"));
    assert!(!db.exists());
}

#[test]
fn dedup_without_context_level_leaves_existing_bank_alone() {
    let fx = seeded();
    let db = fx.db_path();
    let result = run_cli_case(
        "dedup-no-level-seeded",
        fx.dir.path(),
        &["--db", &db.to_string_lossy(), "dedup", "--dry-run", "0"],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert_eq!(fx.count("SELECT COUNT(*) FROM question"), 4);
}

#[test]
fn unknown_context_exits_one() {
    let fx = seeded();
    let db = fx.db_path();
    let result = run_cli_case(
        "unknown-course",
        fx.dir.path(),
        &[
            "--db",
            &db.to_string_lossy(),
            "dedup",
            "--context-level",
            "50",
            "--instance",
            "42",
            "--dry-run",
            "0",
        ],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("QBJ-1102"));
    assert_eq!(fx.count("SELECT COUNT(*) FROM question"), 4);
}

#[test]
fn missing_explicit_config_exits_one() {
    let home = tempfile::tempdir().unwrap();
    let missing = home.path().join("nope.toml");
    let result = run_cli_case(
        "missing-config",
        home.path(),
        &["--config", &missing.to_string_lossy(), "audit"],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("QBJ-1002"));
}

#[test]
fn dedup_dry_run_is_the_default() {
    let fx = seeded();
    let db = fx.db_path();
    let result = run_cli_case(
        "dedup-default-dry-run",
        fx.dir.path(),
        &["--db", &db.to_string_lossy(), "--json", "dedup", "--context-level", "10"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let summary = json_line(&result.stdout);
    assert_eq!(summary["command"], "dedup");
    assert_eq!(summary["report"]["dry_run"], true);
    assert_eq!(summary["report"]["deleted"], 1);
    assert_eq!(summary["duplicate_fingerprints"], 2);
    assert_eq!(fx.count("SELECT COUNT(*) FROM question"), 4);
}

#[test]
fn dedup_live_deletes_unused_copies() {
    let fx = seeded();
    let db = fx.db_path();
    let result = run_cli_case(
        "dedup-live",
        fx.dir.path(),
        &[
            "--db",
            &db.to_string_lossy(),
            "--json",
            "dedup",
            "--context-level",
            "10",
            "--dry-run",
            "0",
        ],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let summary = json_line(&result.stdout);
    assert_eq!(summary["report"]["deleted"], 1);
    assert_eq!(summary["report"]["slot_referenced"], 1);
    assert!(!fx.question_exists(2));
    assert!(fx.question_exists(4));

    let jsonl = std::fs::read_to_string(fx.dir.path().join("activity.jsonl")).unwrap();
    assert!(jsonl.lines().any(|l| l.contains("\"run_start\"")));
    assert!(jsonl.lines().any(|l| l.contains("\"batch_committed\"")));
}

#[test]
fn build_protected_reports_snapshot() {
    let fx = seeded();
    let db = fx.db_path();
    let result = run_cli_case(
        "build-protected",
        fx.dir.path(),
        &["--db", &db.to_string_lossy(), "--json", "build-protected"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let summary = json_line(&result.stdout);
    assert_eq!(summary["categories"], 1);
    assert!(summary["run_id"].as_str().unwrap().starts_with("pcs-"));
    assert_eq!(fx.count("SELECT COUNT(*) FROM protected_category_members"), 1);
}

#[test]
fn audit_reports_counters() {
    let fx = seeded();
    let db = fx.db_path();
    let result = run_cli_case(
        "audit",
        fx.dir.path(),
        &["--db", &db.to_string_lossy(), "--json", "audit"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let summary = json_line(&result.stdout);
    assert_eq!(summary["consistent"], true);
    assert_eq!(summary["report"]["broken_slots"], 0);
    assert_eq!(summary["report"]["reconciliation"]["deletable_now"], 1);
}

#[test]
fn run_writes_transcript_under_log_dir() {
    let fx = seeded();
    let db = fx.db_path();
    let result = run_cli_case(
        "run-pipeline",
        fx.dir.path(),
        &["--db", &db.to_string_lossy(), "--json", "run", "--dry-run", "0"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let summary = json_line(&result.stdout);
    let transcript = std::path::PathBuf::from(summary["transcript"].as_str().unwrap());
    assert!(transcript.starts_with(fx.dir.path().join("logs")));
    let text = std::fs::read_to_string(&transcript).unwrap();
    assert!(text.contains(">> Step 3/3"));
    assert_eq!(summary["dedup"]["report"]["deleted"], 1);
    assert_eq!(summary["consistent"], true);
}

#[test]
fn completions_generate_script() {
    let home = tempfile::tempdir().unwrap();
    let result = run_cli_case("completions-bash", home.path(), &["completions", "bash"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("qbj"));
}
