//! Activity events and the shared logging handle.
//!
//! Every component reports through an [`ActivityLoggerHandle`]. Each event is
//! written as one structured JSONL row and, when echo is enabled, rendered as a
//! human progress line on stdout. In pipeline mode a transcript file receives the
//! same human lines. All writes are synchronous; the handle is a cheap clone of an
//! `Arc<Mutex<..>>`.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::errors::{QbjError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    RunStarted {
        command: String,
        version: String,
        config_hash: String,
    },
    RunFinished {
        command: String,
        duration_ms: u64,
    },
    ProtectedSetBuilding,
    ProtectedSetBuilt {
        run_id: String,
        categories: usize,
        filters_scanned: usize,
        undecodable_filters: usize,
    },
    ProtectedSetUnavailable {
        reason: String,
    },
    DedupStarted {
        scope: String,
        context_id: i64,
        category: Option<i64>,
        dry_run: bool,
        max_deletions: usize,
        max_fingerprints: usize,
    },
    DuplicateScan {
        fingerprints: usize,
    },
    FingerprintProcessed {
        fingerprint: String,
        keeper: i64,
        candidates: usize,
    },
    FingerprintSkipped {
        fingerprint: String,
        reason: String,
    },
    DeletionProgress {
        deleted: usize,
    },
    BatchCommitted {
        fingerprint: String,
        deleted: usize,
        duration_ms: u64,
    },
    BatchRolledBack {
        fingerprint: String,
        attempted: usize,
        error_code: String,
        error_message: String,
    },
    DedupFinished {
        fingerprints_processed: usize,
        deleted: usize,
        dry_run: bool,
    },
    BrokenSlots {
        count: u64,
    },
    Reconciliation {
        deletable_now: u64,
        in_random_sets: u64,
        truly_deletable_now: u64,
        snapshot: Option<String>,
    },
    AuditCheckFailed {
        check: &'static str,
        error_code: String,
        error_message: String,
    },
    Error {
        code: String,
        message: String,
    },
}

// ──────────────────── sinks ────────────────────

struct Sinks {
    jsonl: Option<JsonlWriter>,
    echo: Option<Box<dyn Write + Send>>,
    transcript: Option<(PathBuf, BufWriter<File>)>,
}

impl Sinks {
    fn human(&mut self, line: &str) {
        if let Some(out) = self.echo.as_mut() {
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
        if let Some((_, file)) = self.transcript.as_mut() {
            let _ = writeln!(file, "{line}");
            let _ = file.flush();
        }
    }
}

// ──────────────────── public handle ────────────────────

/// Cloneable handle shared by the builder, deleter and auditor.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    sinks: Arc<Mutex<Sinks>>,
}

impl std::fmt::Debug for ActivityLoggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sinks = self.sinks.lock();
        f.debug_struct("ActivityLoggerHandle")
            .field("jsonl", &sinks.jsonl.as_ref().map(JsonlWriter::state))
            .field("echo", &sinks.echo.is_some())
            .field("transcript", &sinks.transcript.as_ref().map(|(p, _)| p))
            .finish()
    }
}

impl ActivityLoggerHandle {
    /// Handle that writes structured rows to `jsonl` (if any) and nothing else.
    pub fn new(jsonl: Option<JsonlConfig>) -> Self {
        Self {
            sinks: Arc::new(Mutex::new(Sinks {
                jsonl: jsonl.map(JsonlWriter::open),
                echo: None,
                transcript: None,
            })),
        }
    }

    /// Handle that drops everything.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Echo human lines to stdout.
    #[must_use]
    pub fn with_stdout_echo(self) -> Self {
        self.with_echo(Box::new(io::stdout()))
    }

    /// Echo human lines to an arbitrary writer.
    #[must_use]
    pub fn with_echo(self, out: Box<dyn Write + Send>) -> Self {
        self.sinks.lock().echo = Some(out);
        self
    }

    /// Mirror human lines into a transcript file from now on (created or appended).
    pub fn attach_transcript(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| QbjError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| QbjError::io(path, e))?;
        self.sinks.lock().transcript = Some((path.to_path_buf(), BufWriter::new(file)));
        Ok(())
    }

    /// Stop mirroring into the transcript; returns its path if one was attached.
    pub fn detach_transcript(&self) -> Option<PathBuf> {
        let (path, mut file) = self.sinks.lock().transcript.take()?;
        let _ = file.flush();
        Some(path)
    }

    /// Record an event.
    pub fn send(&self, event: ActivityEvent) {
        let entry = event_to_log_entry(&event);
        let line = human_line(&event);
        let mut sinks = self.sinks.lock();
        if let Some(jsonl) = sinks.jsonl.as_mut() {
            jsonl.write_entry(&entry);
        }
        if let Some(line) = line {
            sinks.human(&line);
        }
    }

    /// Emit a human line that has no structured counterpart (headers, blank lines).
    pub fn line(&self, text: &str) {
        self.sinks.lock().human(text);
    }
}

// ──────────────────── event conversion ────────────────────

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::RunStarted {
            command,
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::RunStart, Severity::Info);
            e.details = Some(format!("command={command} version={version} config_hash={config_hash}"));
            e
        }
        ActivityEvent::RunFinished {
            command,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::RunFinish, Severity::Info);
            e.details = Some(format!("command={command}"));
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::ProtectedSetBuilding => {
            let mut e = LogEntry::new(EventType::ProtectedSetBuilt, Severity::Info);
            e.details = Some("started".to_string());
            e
        }
        ActivityEvent::ProtectedSetBuilt {
            run_id,
            categories,
            filters_scanned,
            undecodable_filters,
        } => {
            let mut e = LogEntry::new(EventType::ProtectedSetBuilt, Severity::Info);
            e.run_id = Some(run_id.clone());
            e.count = Some(*categories as u64);
            e.details = Some(format!(
                "filters_scanned={filters_scanned} undecodable_filters={undecodable_filters}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ProtectedSetUnavailable { reason } => {
            let mut e = LogEntry::new(EventType::ProtectedSetBuilt, Severity::Warning);
            e.ok = Some(false);
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::DedupStarted {
            scope,
            context_id,
            category,
            dry_run,
            max_deletions,
            max_fingerprints,
        } => {
            let mut e = LogEntry::new(EventType::DuplicateScan, Severity::Info);
            e.dry_run = Some(*dry_run);
            e.details = Some(format!(
                "scope={scope} context_id={context_id} category={} max_deletions={max_deletions} max_fingerprints={max_fingerprints}",
                category.map_or_else(|| "all".to_string(), |c| c.to_string())
            ));
            e
        }
        ActivityEvent::DuplicateScan { fingerprints } => {
            let mut e = LogEntry::new(EventType::DuplicateScan, Severity::Info);
            e.count = Some(*fingerprints as u64);
            e.ok = Some(true);
            e
        }
        ActivityEvent::FingerprintProcessed {
            fingerprint,
            keeper,
            candidates,
        } => {
            let mut e = LogEntry::new(EventType::FingerprintProcessed, Severity::Info);
            e.fingerprint = Some(fingerprint.clone());
            e.count = Some(*candidates as u64);
            e.details = Some(format!("keeper={keeper}"));
            e
        }
        ActivityEvent::FingerprintSkipped {
            fingerprint,
            reason,
        } => {
            let mut e = LogEntry::new(EventType::FingerprintSkipped, Severity::Info);
            e.fingerprint = Some(fingerprint.clone());
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::DeletionProgress { deleted } => {
            let mut e = LogEntry::new(EventType::BatchCommitted, Severity::Info);
            e.count = Some(*deleted as u64);
            e.details = Some("in_progress".to_string());
            e
        }
        ActivityEvent::BatchCommitted {
            fingerprint,
            deleted,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::BatchCommitted, Severity::Info);
            e.fingerprint = Some(fingerprint.clone());
            e.count = Some(*deleted as u64);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::BatchRolledBack {
            fingerprint,
            attempted,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::BatchRolledBack, Severity::Warning);
            e.fingerprint = Some(fingerprint.clone());
            e.count = Some(*attempted as u64);
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::DedupFinished {
            fingerprints_processed,
            deleted,
            dry_run,
        } => {
            let mut e = LogEntry::new(EventType::RunFinish, Severity::Info);
            e.count = Some(*deleted as u64);
            e.dry_run = Some(*dry_run);
            e.details = Some(format!("fingerprints_processed={fingerprints_processed}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::BrokenSlots { count } => {
            let severity = if *count == 0 {
                Severity::Info
            } else {
                Severity::Critical
            };
            let mut e = LogEntry::new(EventType::AuditResult, severity);
            e.count = Some(*count);
            e.details = Some("broken_slots".to_string());
            e.ok = Some(*count == 0);
            e
        }
        ActivityEvent::Reconciliation {
            deletable_now,
            in_random_sets,
            truly_deletable_now,
            snapshot,
        } => {
            let mut e = LogEntry::new(EventType::AuditResult, Severity::Info);
            e.run_id.clone_from(snapshot);
            e.count = Some(*deletable_now);
            e.details = Some(format!(
                "deletable_now={deletable_now} in_random_sets={in_random_sets} truly_deletable_now={truly_deletable_now}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::AuditCheckFailed {
            check,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::AuditResult, Severity::Warning);
            e.details = Some((*check).to_string());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
    }
}

/// Human progress line for an event, if it has one.
fn human_line(event: &ActivityEvent) -> Option<String> {
    let line = match event {
        ActivityEvent::RunStarted { .. } | ActivityEvent::RunFinished { .. } => return None,
        ActivityEvent::ProtectedSetBuilding => "Building protected category set...".to_string(),
        ActivityEvent::ProtectedSetBuilt {
            run_id, categories, ..
        } => {
            if *categories == 0 {
                format!("Protected set {run_id}: 0 category ids (no random-set categories detected).")
            } else {
                format!("Protected set {run_id}: {categories} category ids.")
            }
        }
        ActivityEvent::ProtectedSetUnavailable { reason } => {
            format!("Protected set unavailable: {reason}")
        }
        ActivityEvent::DedupStarted {
            scope,
            context_id,
            category,
            dry_run,
            max_deletions,
            max_fingerprints,
        } => format!(
            "Scope={scope}, ctxid={context_id}, dryrun={}, max_deletions={max_deletions}, max_fingerprints={max_fingerprints}, category={}\nStarting duplicate fingerprint scan...",
            u8::from(*dry_run),
            category.map_or_else(|| "ALL".to_string(), |c| c.to_string())
        ),
        ActivityEvent::DuplicateScan { fingerprints } => {
            if *fingerprints == 0 {
                "Found duplicate fingerprints: 0\nNo duplicate fingerprints found in this scope."
                    .to_string()
            } else {
                format!("Found duplicate fingerprints: {fingerprints}")
            }
        }
        ActivityEvent::FingerprintProcessed {
            fingerprint,
            keeper,
            candidates,
        } => format!("Fingerprint {fingerprint}: keeper={keeper}, unused_to_delete={candidates}"),
        ActivityEvent::FingerprintSkipped {
            fingerprint,
            reason,
        } => format!("Fingerprint {fingerprint}: {reason} (skipping)."),
        ActivityEvent::DeletionProgress { deleted } => format!("  deleted so far: {deleted}"),
        ActivityEvent::BatchCommitted { .. } => return None,
        ActivityEvent::BatchRolledBack {
            fingerprint,
            error_message,
            ..
        } => format!("Fingerprint {fingerprint}: rolled back: {error_message}"),
        ActivityEvent::DedupFinished {
            fingerprints_processed,
            deleted,
            dry_run,
        } => {
            let verb = if *dry_run { "Would delete" } else { "Deleted" };
            format!("Processed fingerprints: {fingerprints_processed}\n{verb}: {deleted}")
        }
        ActivityEvent::BrokenSlots { count } => format!("[audit] Broken slots (expect 0): {count}"),
        ActivityEvent::Reconciliation {
            deletable_now,
            in_random_sets,
            truly_deletable_now,
            snapshot,
        } => format!(
            "[audit] Counters: deletable_now={deletable_now} | in_random_sets={in_random_sets} | truly_deletable_now={truly_deletable_now} (protected set: {})",
            snapshot.as_deref().unwrap_or("none")
        ),
        ActivityEvent::AuditCheckFailed {
            check,
            error_message,
            ..
        } => format!("[audit] {check} query error: {error_message}"),
        ActivityEvent::Error { code, message } => format!("error {code}: {message}"),
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer that appends into a shared buffer.
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    #[test]
    fn events_reach_jsonl_and_echo() {
        let dir = tempfile::tempdir().unwrap();
        let jsonl = dir.path().join("activity.jsonl");
        let capture = Capture::default();
        let logger = ActivityLoggerHandle::new(Some(JsonlConfig::at(&jsonl)))
            .with_echo(Box::new(capture.clone()));

        logger.send(ActivityEvent::FingerprintProcessed {
            fingerprint: "abc".to_string(),
            keeper: 7,
            candidates: 2,
        });
        logger.send(ActivityEvent::BatchCommitted {
            fingerprint: "abc".to_string(),
            deleted: 2,
            duration_ms: 1,
        });
        drop(logger);

        let rows: Vec<serde_json::Value> = fs::read_to_string(&jsonl)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["event"], "fingerprint_processed");
        assert_eq!(rows[1]["count"], 2);

        let text = capture.text();
        assert_eq!(text, "Fingerprint abc: keeper=7, unused_to_delete=2\n");
    }

    #[test]
    fn transcript_mirrors_human_lines_only_while_attached() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = dir.path().join("logs").join("run.log");
        let logger = ActivityLoggerHandle::disabled();

        logger.line("before");
        logger.attach_transcript(&transcript).unwrap();
        logger.line("== header ==");
        logger.send(ActivityEvent::BrokenSlots { count: 0 });
        assert_eq!(logger.detach_transcript(), Some(transcript.clone()));
        logger.line("after");

        let text = fs::read_to_string(&transcript).unwrap();
        assert_eq!(text, "== header ==\n[audit] Broken slots (expect 0): 0\n");
    }

    #[test]
    fn broken_slots_severity_tracks_count() {
        let ok = event_to_log_entry(&ActivityEvent::BrokenSlots { count: 0 });
        let bad = event_to_log_entry(&ActivityEvent::BrokenSlots { count: 3 });
        assert_eq!(ok.severity, Severity::Info);
        assert_eq!(bad.severity, Severity::Critical);
        assert_eq!(bad.ok, Some(false));
    }

    #[test]
    fn dry_run_summary_wording() {
        let line = human_line(&ActivityEvent::DedupFinished {
            fingerprints_processed: 3,
            deleted: 3,
            dry_run: true,
        })
        .unwrap();
        assert_eq!(line, "Processed fingerprints: 3\nWould delete: 3");
    }
}
