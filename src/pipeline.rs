//! Operation entry points shared by the CLI subcommands, and the three-step
//! cleanup pipeline (protected set → detect-and-delete → audit).

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;
use serde::Serialize;

use crate::audit::{AuditReport, Auditor};
use crate::category::protected::{BuildReport, ProtectedCategorySet, ProtectedSetBuilder};
use crate::core::errors::{QbjError, Result};
use crate::core::model::{CategoryId, ContextScope, QuestionScope};
use crate::dedup::deleter::{DeletionConfig, DeletionExecutor, DeletionReport};
use crate::dedup::detector::detect_duplicates;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::store::QuestionBank;

/// Inputs of one detect-and-delete pass.
#[derive(Debug, Clone)]
pub struct DedupRequest {
    pub scope: ContextScope,
    pub category: Option<CategoryId>,
    pub max_fingerprints: usize,
    pub deletion: DeletionConfig,
    /// Build a fresh protected set and exclude its categories from deletion.
    pub respect_random_sets: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DedupOutcome {
    pub scope: QuestionScope,
    pub duplicate_fingerprints: usize,
    pub report: DeletionReport,
    /// Run id of the shield, when one was applied.
    pub shield_run_id: Option<String>,
}

/// Resolve a context scope plus optional category into a record scope.
pub fn resolve_scope<B: QuestionBank + ?Sized>(
    bank: &B,
    scope: ContextScope,
    category: Option<CategoryId>,
) -> Result<QuestionScope> {
    let context_id = bank
        .resolve_context(scope)?
        .ok_or_else(|| QbjError::ContextNotFound {
            details: format!("no context row for {scope}"),
        })?;
    Ok(QuestionScope::new(context_id, category))
}

/// Detect duplicate classes in scope and delete their unused non-keepers.
///
/// `shield` is consulted only when `request.respect_random_sets` is set; if it
/// is and no shield is given, one is computed (not persisted) from current state.
pub fn detect_and_delete<B: QuestionBank + ?Sized>(
    bank: &mut B,
    request: &DedupRequest,
    shield: Option<&ProtectedCategorySet>,
    logger: &ActivityLoggerHandle,
) -> Result<DedupOutcome> {
    let scope = resolve_scope(&*bank, request.scope, request.category)?;

    let computed;
    let shield = match (request.respect_random_sets, shield) {
        (false, _) => None,
        (true, Some(set)) => Some(set),
        (true, None) => {
            computed = ProtectedSetBuilder::new(logger.clone()).compute(&*bank)?.0;
            Some(&computed)
        }
    };

    logger.send(ActivityEvent::DedupStarted {
        scope: request.scope.to_string(),
        context_id: scope.context_id,
        category: scope.category_id,
        dry_run: request.deletion.dry_run,
        max_deletions: request.deletion.max_deletions,
        max_fingerprints: request.max_fingerprints,
    });

    let classes = detect_duplicates(&*bank, &scope, request.max_fingerprints)?;
    logger.send(ActivityEvent::DuplicateScan {
        fingerprints: classes.len(),
    });

    let executor = DeletionExecutor::new(request.deletion.clone(), logger.clone());
    let report = executor.execute(bank, &scope, &classes, shield)?;
    logger.send(ActivityEvent::DedupFinished {
        fingerprints_processed: report.fingerprints_processed,
        deleted: report.deleted,
        dry_run: report.dry_run,
    });

    Ok(DedupOutcome {
        scope,
        duplicate_fingerprints: classes.len(),
        report,
        shield_run_id: shield.map(|s| s.run_id.clone()),
    })
}

// ──────────────────── pipeline ────────────────────

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub dedup: DedupRequest,
    pub snapshot_retain: usize,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub transcript: PathBuf,
    pub protected: BuildReport,
    pub dedup: DedupOutcome,
    pub audit: AuditReport,
}

/// `<log_dir>/cleanup-pipeline_<YYYY-mm-dd_HHMMSS>.log` for the current local time.
pub fn transcript_path(log_dir: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y-%m-%d_%H%M%S");
    log_dir.join(format!("cleanup-pipeline_{stamp}.log"))
}

/// Run the three steps in order, mirroring every human line into a transcript.
///
/// The scope is resolved before anything is written. Audit failures are lines
/// in the transcript and entries in the report, not errors.
pub fn run_pipeline<B: QuestionBank + ?Sized>(
    bank: &mut B,
    options: &PipelineOptions,
    logger: &ActivityLoggerHandle,
) -> Result<PipelineReport> {
    let scope = resolve_scope(&*bank, options.dedup.scope, options.dedup.category)?;
    let started = Instant::now();

    let transcript = transcript_path(&options.log_dir);
    logger.attach_transcript(&transcript)?;
    let result = pipeline_steps(bank, options, &scope, &transcript, logger);
    logger.line(&format!(
        "== Cleanup pipeline finished in {:.1}s. Log: {} ==",
        started.elapsed().as_secs_f64(),
        transcript.display()
    ));
    logger.detach_transcript();
    result
}

fn pipeline_steps<B: QuestionBank + ?Sized>(
    bank: &mut B,
    options: &PipelineOptions,
    scope: &QuestionScope,
    transcript: &Path,
    logger: &ActivityLoggerHandle,
) -> Result<PipelineReport> {
    let request = &options.dedup;
    logger.line(&format!(
        "== Cleanup pipeline started @ {} ==",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    logger.line(&format!(
        "context={} ctxid={} category={}",
        request.scope,
        scope.context_id,
        scope
            .category_id
            .map_or_else(|| "ALL".to_string(), |c| c.to_string())
    ));
    logger.line(&format!(
        "max_fingerprints={} max_deletions={} dryrun={} respect_random_sets={}",
        request.max_fingerprints,
        request.deletion.max_deletions,
        u8::from(request.deletion.dry_run),
        u8::from(request.respect_random_sets)
    ));
    logger.line(&format!("log={}", transcript.display()));
    logger.line("");

    logger.line(">> Step 1/3: Building protected category set...");
    let protected =
        ProtectedSetBuilder::new(logger.clone()).build(bank, options.snapshot_retain)?;
    logger.line("");

    logger.line(">> Step 2/3: Running duplicate cleanup...");
    let dedup = detect_and_delete(bank, request, Some(&protected.snapshot), logger)?;
    logger.line("");

    logger.line(">> Step 3/3: Running consistency checks...");
    let audit =
        Auditor::new(logger.clone()).run(&*bank, scope.context_id, Some(&protected.snapshot));

    Ok(PipelineReport {
        transcript: transcript.to_path_buf(),
        protected,
        dedup,
        audit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_name_format() {
        let path = transcript_path(Path::new("/var/log/qbj"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("cleanup-pipeline_"));
        assert!(name.ends_with(".log"));
        // cleanup-pipeline_ + YYYY-mm-dd_HHMMSS + .log
        assert_eq!(name.len(), "cleanup-pipeline_".len() + 17 + ".log".len());
        assert_eq!(path.parent(), Some(Path::new("/var/log/qbj")));
    }
}
