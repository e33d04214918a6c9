#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use question_bank_janitor::store::sqlite::SqliteQuestionBank;
use rusqlite::params;
use tempfile::TempDir;

// ──────────────────── bank fixture ────────────────────

/// Bank entry ids are derived from question ids so tests can reason about them.
pub const fn entry_of(question_id: i64) -> i64 {
    1000 + question_id
}

/// A throwaway question bank on disk, with seeding helpers.
pub struct BankFixture {
    pub dir: TempDir,
    pub bank: SqliteQuestionBank,
}

impl BankFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create fixture dir");
        let bank = SqliteQuestionBank::open(&dir.path().join("bank.sqlite3"), 2_000)
            .expect("open fixture bank");
        Self { dir, bank }
    }

    pub fn db_path(&self) -> PathBuf {
        self.bank.path().to_path_buf()
    }

    pub fn exec(&self, sql: &str) {
        self.bank
            .connection()
            .execute_batch(sql)
            .unwrap_or_else(|e| panic!("fixture sql failed: {e}\n{sql}"));
    }

    pub fn count(&self, sql: &str) -> i64 {
        self.bank
            .connection()
            .query_row(sql, [], |row| row.get(0))
            .unwrap_or_else(|e| panic!("fixture count failed: {e}\n{sql}"))
    }

    pub fn question_exists(&self, id: i64) -> bool {
        self.bank
            .connection()
            .query_row("SELECT COUNT(*) FROM question WHERE id = ?1", [id], |row| {
                row.get::<_, i64>(0)
            })
            .expect("query question")
            > 0
    }

    pub fn system_context(&self, id: i64) -> &Self {
        self.context(id, 10, 0)
    }

    pub fn course_context(&self, id: i64, course_id: i64) -> &Self {
        self.context(id, 50, course_id)
    }

    fn context(&self, id: i64, level: i64, instance: i64) -> &Self {
        self.bank
            .connection()
            .execute(
                "INSERT INTO context (id, contextlevel, instanceid) VALUES (?1, ?2, ?3)",
                params![id, level, instance],
            )
            .expect("insert context");
        self
    }

    pub fn category(&self, id: i64, context_id: i64, parent: i64) -> &Self {
        self.bank
            .connection()
            .execute(
                "INSERT INTO question_categories (id, name, contextid, parent) VALUES (?1, ?2, ?3, ?4)",
                params![id, format!("cat {id}"), context_id, parent],
            )
            .expect("insert category");
        self
    }

    /// Question with its own bank entry (`entry_of(id)`) and version 1.
    pub fn question(&self, id: i64, category_id: i64, name: &str, body: &str) -> &Self {
        self.question_full(id, category_id, Some("multichoice"), Some(name), Some(body), None)
    }

    pub fn question_full(
        &self,
        id: i64,
        category_id: i64,
        qtype: Option<&str>,
        name: Option<&str>,
        body: Option<&str>,
        feedback: Option<&str>,
    ) -> &Self {
        let conn = self.bank.connection();
        conn.execute(
            "INSERT INTO question (id, qtype, name, questiontext, generalfeedback)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, qtype, name, body, feedback],
        )
        .expect("insert question");
        conn.execute(
            "INSERT INTO question_bank_entries (id, questioncategoryid) VALUES (?1, ?2)",
            params![entry_of(id), category_id],
        )
        .expect("insert bank entry");
        conn.execute(
            "INSERT INTO question_versions (questionbankentryid, questionid, version)
             VALUES (?1, ?2, 1)",
            params![entry_of(id), id],
        )
        .expect("insert version");
        conn.execute(
            "INSERT INTO question_answers (question, answer) VALUES (?1, 'answer')",
            [id],
        )
        .expect("insert answer");
        self
    }

    /// Bind `question_id`'s bank entry to a fixed quiz slot.
    pub fn slot_reference(&self, slot_id: i64, question_id: i64) -> &Self {
        let conn = self.bank.connection();
        conn.execute(
            "INSERT INTO quiz_slots (id, quizid, slot) VALUES (?1, 1, ?1)",
            [slot_id],
        )
        .expect("insert slot");
        conn.execute(
            "INSERT INTO question_references (component, questionarea, itemid, questionbankentryid)
             VALUES ('mod_quiz', 'slot', ?1, ?2)",
            params![slot_id, entry_of(question_id)],
        )
        .expect("insert reference");
        self
    }

    /// A random-draw slot whose filter blob is `filter`.
    pub fn random_slot(&self, id: i64, context_id: i64, filter: &str) -> &Self {
        self.bank
            .connection()
            .execute(
                "INSERT INTO question_set_references
                   (id, component, questionarea, itemid, questionscontextid, filtercondition)
                 VALUES (?1, 'mod_quiz', 'slot', ?1, ?2, ?3)",
                params![id, context_id, filter],
            )
            .expect("insert set reference");
        self
    }
}

/// JSON filter drawing from one category, in the shape quiz slots store.
pub fn category_filter(category_id: i64, include_subcategories: bool) -> String {
    let flag = u8::from(include_subcategories);
    format!(
        r#"{{"questioncategoryid":"{category_id}","includingsubcategories":"{flag}","filter":{{"category":{{"jointype":1,"values":[{category_id}],"filteroptions":{{"includesubcategories":{include_subcategories}}}}}}}}}"#
    )
}

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Some(path) = option_env!("CARGO_BIN_EXE_qbj") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "qbj.exe" } else { "qbj" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve qbj binary path for integration test"),
    }
}

/// Run `qbj` with `home` as HOME and its data paths, so no user config leaks in.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("qbj-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home)
        .env("QBJ_PATHS_LOG_DIR", home.join("logs"))
        .env("QBJ_PATHS_JSONL_LOG", home.join("activity.jsonl"))
        .env_remove("QBJ_OUTPUT_FORMAT")
        .env_remove("QBJ_DATABASE_PATH")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute qbj command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
