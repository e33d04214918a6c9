//! SQLite question bank: the janitor's store binding over the host tables.
//!
//! Opens in WAL mode with a busy timeout, creates the touched tables if they are
//! missing, and registers `qbj_fingerprint(qtype, name, questiontext,
//! generalfeedback)` so SQL filters and Rust code share one fingerprint.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, params, params_from_iter};

use super::{QuestionBank, SLOT_COMPONENT, SLOT_QUESTION_AREA};
use crate::category::protected::ProtectedCategorySet;
use crate::category::tree::CategoryEdge;
use crate::core::errors::{QbjError, Result};
use crate::core::model::{
    CategoryId, ContextId, ContextScope, QuestionId, QuestionRecord, QuestionScope, RandomSetFilterRecord,
};
use crate::dedup::fingerprint::Fingerprint;

/// Upper bound on bound parameters per `IN (...)` query.
const IN_CHUNK: usize = 500;

const SCOPE_SELECT: &str = "SELECT q.id, q.qtype, q.name, q.questiontext, q.generalfeedback,
            qbe.questioncategoryid
     FROM question q
     JOIN question_versions qv ON qv.questionid = q.id
     JOIN question_bank_entries qbe ON qbe.id = qv.questionbankentryid
     JOIN question_categories qc ON qc.id = qbe.questioncategoryid
     WHERE qc.contextid = ?1 AND (?2 IS NULL OR qc.id = ?2)";

pub struct SqliteQuestionBank {
    conn: Connection,
    path: PathBuf,
}

impl SqliteQuestionBank {
    /// Open (or create) the bank at `path`, applying pragmas and schema.
    pub fn open(path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| QbjError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.create_scalar_function(
            "qbj_fingerprint",
            4,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let qtype: Option<String> = ctx.get(0)?;
                let name: Option<String> = ctx.get(1)?;
                let text: Option<String> = ctx.get(2)?;
                let feedback: Option<String> = ctx.get(3)?;
                Ok(Fingerprint::of(
                    qtype.as_deref(),
                    name.as_deref(),
                    text.as_deref(),
                    feedback.as_deref(),
                )
                .as_str()
                .to_string())
            },
        )?;

        apply_pragmas(&conn, busy_timeout_ms)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrow the underlying connection (fixtures, diagnostics).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }

    fn query_scope(
        &self,
        scope: &QuestionScope,
        fingerprint: Option<&Fingerprint>,
    ) -> Result<Vec<QuestionRecord>> {
        let sql = match fingerprint {
            None => format!("{SCOPE_SELECT} ORDER BY q.id"),
            Some(_) => format!(
                "{SCOPE_SELECT}
                   AND qbj_fingerprint(q.qtype, q.name, q.questiontext, q.generalfeedback) = ?3
                 ORDER BY q.id"
            ),
        };
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(QuestionRecord {
                id: row.get(0)?,
                qtype: row.get(1)?,
                name: row.get(2)?,
                body: row.get(3)?,
                feedback: row.get(4)?,
                category_id: row.get(5)?,
            })
        };
        let rows = match fingerprint {
            None => stmt
                .query_map(params![scope.context_id, scope.category_id], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            Some(fp) => stmt
                .query_map(
                    params![scope.context_id, scope.category_id, fp.as_str()],
                    map_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }
}

impl QuestionBank for SqliteQuestionBank {
    fn resolve_context(&self, scope: ContextScope) -> Result<Option<ContextId>> {
        let (level, instance) = scope.level_and_instance();
        let id = self
            .conn
            .query_row(
                "SELECT id FROM context WHERE contextlevel = ?1 AND instanceid = ?2
                 ORDER BY id LIMIT 1",
                params![level, instance],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn scan_scope(&self, scope: &QuestionScope) -> Result<Vec<QuestionRecord>> {
        self.query_scope(scope, None)
    }

    fn scan_fingerprint(
        &self,
        scope: &QuestionScope,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<QuestionRecord>> {
        self.query_scope(scope, Some(fingerprint))
    }

    fn slot_referenced_questions(&self, ids: &[QuestionId]) -> Result<BTreeSet<QuestionId>> {
        let mut referenced = BTreeSet::new();
        for chunk in ids.chunks(IN_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT DISTINCT qv.questionid
                 FROM question_versions qv
                 JOIN question_references qr ON qr.questionbankentryid = qv.questionbankentryid
                 WHERE qr.component = '{SLOT_COMPONENT}' AND qr.questionarea = '{SLOT_QUESTION_AREA}'
                   AND qv.questionid IN ({placeholders})"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                row.get::<_, QuestionId>(0)
            })?;
            for id in rows {
                referenced.insert(id?);
            }
        }
        Ok(referenced)
    }

    fn category_edges(&self) -> Result<Vec<CategoryEdge>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, parent FROM question_categories ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CategoryEdge {
                    id: row.get(0)?,
                    parent: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn random_set_filters(&self) -> Result<Vec<RandomSetFilterRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, questionscontextid, filtercondition
             FROM question_set_references
             WHERE component = ?1 AND questionarea = ?2
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![SLOT_COMPONENT, SLOT_QUESTION_AREA], |row| {
                Ok(RandomSetFilterRecord {
                    id: row.get(0)?,
                    questions_context_id: row.get(1)?,
                    filter_condition: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn delete_questions(
        &mut self,
        ids: &[QuestionId],
        progress: &mut dyn FnMut(usize),
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0;
        for &id in ids {
            if delete_question_cascade(&tx, id).map_err(|e| QbjError::DeleteFailed {
                question_id: id,
                details: e.to_string(),
            })? {
                deleted += 1;
                progress(deleted);
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn write_protected_snapshot(&mut self, snapshot: &ProtectedCategorySet) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO protected_category_runs (run_id, created_at, category_count)
             VALUES (?1, ?2, ?3)",
            params![
                snapshot.run_id,
                snapshot
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
                i64::try_from(snapshot.len()).unwrap_or(i64::MAX),
            ],
        )?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO protected_category_members (run_id, category_id) VALUES (?1, ?2)",
            )?;
            for category in &snapshot.categories {
                insert.execute(params![snapshot.run_id, category])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn latest_protected_snapshot(&self) -> Result<Option<ProtectedCategorySet>> {
        let head: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT run_id, created_at FROM protected_category_runs
                 ORDER BY rowid DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((run_id, created_at)) = head else {
            return Ok(None);
        };

        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| QbjError::Serialization {
                context: "protected_category_runs.created_at",
                details: e.to_string(),
            })?
            .with_timezone(&Utc);

        let mut stmt = self.conn.prepare_cached(
            "SELECT category_id FROM protected_category_members WHERE run_id = ?1",
        )?;
        let categories = stmt
            .query_map(params![run_id], |row| row.get::<_, CategoryId>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;

        Ok(Some(ProtectedCategorySet {
            run_id,
            created_at,
            categories,
        }))
    }

    fn prune_protected_snapshots(&mut self, retain: usize) -> Result<usize> {
        let keep = i64::try_from(retain).unwrap_or(i64::MAX);
        let tx = self.conn.transaction()?;
        let stale = "SELECT run_id FROM protected_category_runs
                     ORDER BY rowid DESC LIMIT -1 OFFSET ?1";
        tx.execute(
            &format!("DELETE FROM protected_category_members WHERE run_id IN ({stale})"),
            params![keep],
        )?;
        let pruned = tx.execute(
            &format!("DELETE FROM protected_category_runs WHERE run_id IN ({stale})"),
            params![keep],
        )?;
        tx.commit()?;
        Ok(pruned)
    }

    fn count_broken_slots(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM quiz_slots s
             JOIN question_references qr
               ON qr.component = ?1 AND qr.questionarea = ?2 AND qr.itemid = s.id
             LEFT JOIN (
               SELECT questionbankentryid, MAX(version) AS maxv
               FROM question_versions
               GROUP BY questionbankentryid
             ) latest ON latest.questionbankentryid = qr.questionbankentryid
             LEFT JOIN question_versions qv
               ON qv.questionbankentryid = qr.questionbankentryid AND qv.version = latest.maxv
             LEFT JOIN question q ON q.id = qv.questionid
             WHERE q.id IS NULL",
            params![SLOT_COMPONENT, SLOT_QUESTION_AREA],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

// ──────────────────── delete cascade ────────────────────

/// Remove one question and its dependent rows. `Ok(false)` if it was already gone.
fn delete_question_cascade(tx: &Transaction<'_>, id: QuestionId) -> rusqlite::Result<bool> {
    let entry: Option<i64> = tx
        .query_row(
            "SELECT questionbankentryid FROM question_versions WHERE questionid = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    tx.prepare_cached("DELETE FROM question_answers WHERE question = ?1")?
        .execute(params![id])?;
    tx.prepare_cached("DELETE FROM question_hints WHERE question = ?1")?
        .execute(params![id])?;
    tx.prepare_cached("DELETE FROM question_versions WHERE questionid = ?1")?
        .execute(params![id])?;

    if let Some(entry) = entry {
        tx.prepare_cached(
            "DELETE FROM question_bank_entries
             WHERE id = ?1
               AND NOT EXISTS (SELECT 1 FROM question_versions WHERE questionbankentryid = ?1)",
        )?
        .execute(params![entry])?;
    }

    let removed = tx
        .prepare_cached("DELETE FROM question WHERE id = ?1")?
        .execute(params![id])?;
    Ok(removed > 0)
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection, busy_timeout_ms: u64) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = {busy_timeout_ms};"
    ))?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[QBJ-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS context (
            id INTEGER PRIMARY KEY,
            contextlevel INTEGER NOT NULL,
            instanceid INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS question_categories (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            contextid INTEGER NOT NULL,
            parent INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS question (
            id INTEGER PRIMARY KEY,
            qtype TEXT,
            name TEXT,
            questiontext TEXT,
            generalfeedback TEXT
        );

        CREATE TABLE IF NOT EXISTS question_bank_entries (
            id INTEGER PRIMARY KEY,
            questioncategoryid INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS question_versions (
            id INTEGER PRIMARY KEY,
            questionbankentryid INTEGER NOT NULL,
            questionid INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS question_references (
            id INTEGER PRIMARY KEY,
            component TEXT NOT NULL,
            questionarea TEXT NOT NULL,
            itemid INTEGER NOT NULL,
            questionbankentryid INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS question_set_references (
            id INTEGER PRIMARY KEY,
            component TEXT NOT NULL,
            questionarea TEXT NOT NULL,
            itemid INTEGER NOT NULL,
            questionscontextid INTEGER,
            filtercondition TEXT
        );

        CREATE TABLE IF NOT EXISTS quiz_slots (
            id INTEGER PRIMARY KEY,
            quizid INTEGER NOT NULL,
            slot INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS question_answers (
            id INTEGER PRIMARY KEY,
            question INTEGER NOT NULL,
            answer TEXT
        );

        CREATE TABLE IF NOT EXISTS question_hints (
            id INTEGER PRIMARY KEY,
            question INTEGER NOT NULL,
            hint TEXT
        );

        CREATE TABLE IF NOT EXISTS protected_category_runs (
            run_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            category_count INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS protected_category_members (
            run_id TEXT NOT NULL,
            category_id INTEGER NOT NULL,
            PRIMARY KEY (run_id, category_id)
        );

        CREATE INDEX IF NOT EXISTS idx_qc_context ON question_categories(contextid);
        CREATE INDEX IF NOT EXISTS idx_qv_question ON question_versions(questionid);
        CREATE INDEX IF NOT EXISTS idx_qv_entry ON question_versions(questionbankentryid, version);
        CREATE INDEX IF NOT EXISTS idx_qr_entry ON question_references(questionbankentryid);
        CREATE INDEX IF NOT EXISTS idx_qr_item ON question_references(component, questionarea, itemid);
        CREATE INDEX IF NOT EXISTS idx_qa_question ON question_answers(question);
        CREATE INDEX IF NOT EXISTS idx_qh_question ON question_hints(question);",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────
