//! Keeper selection and safe deletion, one transaction per fingerprint.
//!
//! Per class, in the order the detector supplied:
//! 1. Re-derive the class from current state and pick the keeper (minimum id).
//! 2. Candidates = members minus keeper minus slot-referenced questions (minus
//!    random-set categories when a shield is given), ascending, capped to the
//!    remaining run budget.
//! 3. Dry run: tally. Live: delete the candidates in one transaction.
//!
//! A rolled-back fingerprint is reported and the run moves on. Once the budget is
//! spent the run halts after the current fingerprint's transaction.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::category::protected::ProtectedCategorySet;
use crate::core::config::CleanupConfig;
use crate::core::errors::{QbjError, Result};
use crate::core::model::{QuestionId, QuestionScope};
use crate::dedup::detector::{DuplicateClass, select_keeper};
use crate::dedup::fingerprint::Fingerprint;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::store::QuestionBank;

// ──────────────────── configuration ────────────────────

#[derive(Debug, Clone)]
pub struct DeletionConfig {
    /// Global deletion budget for the run.
    pub max_deletions: usize,
    /// Tally candidates without deleting.
    pub dry_run: bool,
    /// Emit a progress line every this many deletions.
    pub progress_every: usize,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            max_deletions: 2000,
            dry_run: true,
            progress_every: 200,
        }
    }
}

impl From<&CleanupConfig> for DeletionConfig {
    fn from(cleanup: &CleanupConfig) -> Self {
        Self {
            max_deletions: cleanup.max_deletions,
            dry_run: cleanup.dry_run,
            progress_every: cleanup.progress_every,
        }
    }
}

// ──────────────────── report types ────────────────────

/// Why a fingerprint produced no deletion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No in-scope record carries the fingerprint any more.
    NoKeeper,
    /// Every non-keeper member is in use or shielded.
    NothingDeletable,
}

impl SkipReason {
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::NoKeeper => "no keeper found",
            Self::NothingDeletable => "nothing deletable",
        }
    }
}

/// What one fingerprint's attempt ended as.
#[derive(Debug)]
pub enum BatchOutcome {
    /// Dry run: this many would have been deleted.
    Tallied(usize),
    Committed(usize),
    RolledBack(QbjError),
}

/// Candidates for one fingerprint after all exclusions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintPlan {
    pub fingerprint: Fingerprint,
    pub keeper: QuestionId,
    /// Ascending, capped to the budget left when the plan was made.
    pub candidates: Vec<QuestionId>,
    pub slot_referenced: usize,
    pub shielded: usize,
}

/// A rolled-back fingerprint.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionError {
    pub fingerprint: Fingerprint,
    pub attempted: usize,
    pub error_code: String,
    pub error: String,
    pub recoverable: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionReport {
    pub dry_run: bool,
    pub fingerprints_processed: usize,
    /// Deleted, or would-delete in dry run.
    pub deleted: usize,
    pub fingerprints_committed: usize,
    pub fingerprints_rolled_back: usize,
    pub skipped_no_keeper: usize,
    pub skipped_nothing_deletable: usize,
    pub slot_referenced: usize,
    pub shielded_by_random_sets: usize,
    pub budget_exhausted: bool,
    pub errors: Vec<DeletionError>,
    #[serde(skip)]
    pub duration: Duration,
}

// ──────────────────── executor ────────────────────

pub struct DeletionExecutor {
    config: DeletionConfig,
    logger: ActivityLoggerHandle,
}

impl DeletionExecutor {
    pub fn new(config: DeletionConfig, logger: ActivityLoggerHandle) -> Self {
        Self { config, logger }
    }

    /// Work out what deleting `fingerprint` would remove, given `budget` left.
    ///
    /// `None` when no in-scope record carries the fingerprint any more. The plan's
    /// candidate list may be empty when every copy is in use or shielded.
    pub fn plan<B: QuestionBank + ?Sized>(
        &self,
        bank: &B,
        scope: &QuestionScope,
        fingerprint: &Fingerprint,
        budget: usize,
        shield: Option<&ProtectedCategorySet>,
    ) -> Result<Option<FingerprintPlan>> {
        let records = bank.scan_fingerprint(scope, fingerprint)?;
        let Some(keeper) = select_keeper(records.iter().map(|r| r.id)) else {
            return Ok(None);
        };

        let others: Vec<QuestionId> = records
            .iter()
            .map(|r| r.id)
            .filter(|id| *id != keeper)
            .collect();
        let in_use = bank.slot_referenced_questions(&others)?;

        let mut shielded = 0;
        let mut candidates: Vec<QuestionId> = records
            .iter()
            .filter(|r| r.id != keeper && !in_use.contains(&r.id))
            .filter(|r| {
                let protected = shield.is_some_and(|set| set.contains(r.category_id));
                shielded += usize::from(protected);
                !protected
            })
            .map(|r| r.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        candidates.truncate(budget);

        Ok(Some(FingerprintPlan {
            fingerprint: fingerprint.clone(),
            keeper,
            candidates,
            slot_referenced: in_use.len(),
            shielded,
        }))
    }

    /// Process `classes` in order until they run out or the budget is spent.
    ///
    /// Store read failures abort with `Err`; delete failures are per-fingerprint
    /// outcomes recorded in the report.
    pub fn execute<B: QuestionBank + ?Sized>(
        &self,
        bank: &mut B,
        scope: &QuestionScope,
        classes: &[DuplicateClass],
        shield: Option<&ProtectedCategorySet>,
    ) -> Result<DeletionReport> {
        let start = Instant::now();
        let mut report = DeletionReport {
            dry_run: self.config.dry_run,
            ..DeletionReport::default()
        };

        for class in classes {
            let budget = self.config.max_deletions.saturating_sub(report.deleted);
            if budget == 0 {
                report.budget_exhausted = true;
                break;
            }
            report.fingerprints_processed += 1;

            let Some(plan) = self.plan(&*bank, scope, &class.fingerprint, budget, shield)? else {
                self.skip(&mut report, class, SkipReason::NoKeeper);
                continue;
            };
            report.slot_referenced += plan.slot_referenced;
            report.shielded_by_random_sets += plan.shielded;
            if plan.candidates.is_empty() {
                self.skip(&mut report, class, SkipReason::NothingDeletable);
                continue;
            }

            self.logger.send(ActivityEvent::FingerprintProcessed {
                fingerprint: plan.fingerprint.short().to_string(),
                keeper: plan.keeper,
                candidates: plan.candidates.len(),
            });

            match self.attempt(bank, &plan, report.deleted) {
                BatchOutcome::Tallied(n) => report.deleted += n,
                BatchOutcome::Committed(n) => {
                    report.deleted += n;
                    report.fingerprints_committed += 1;
                }
                BatchOutcome::RolledBack(err) => {
                    report.fingerprints_rolled_back += 1;
                    self.logger.send(ActivityEvent::BatchRolledBack {
                        fingerprint: plan.fingerprint.short().to_string(),
                        attempted: plan.candidates.len(),
                        error_code: err.code().to_string(),
                        error_message: err.to_string(),
                    });
                    report.errors.push(DeletionError {
                        fingerprint: plan.fingerprint.clone(),
                        attempted: plan.candidates.len(),
                        error_code: err.code().to_string(),
                        error: err.to_string(),
                        recoverable: err.is_retryable(),
                    });
                }
            }

            if report.deleted >= self.config.max_deletions {
                report.budget_exhausted = true;
                break;
            }
        }

        report.duration = start.elapsed();
        Ok(report)
    }

    fn skip(&self, report: &mut DeletionReport, class: &DuplicateClass, reason: SkipReason) {
        match reason {
            SkipReason::NoKeeper => report.skipped_no_keeper += 1,
            SkipReason::NothingDeletable => report.skipped_nothing_deletable += 1,
        }
        self.logger.send(ActivityEvent::FingerprintSkipped {
            fingerprint: class.fingerprint.short().to_string(),
            reason: reason.describe().to_string(),
        });
    }

    /// Run one fingerprint's batch. `deleted_before` feeds the progress lines.
    fn attempt<B: QuestionBank + ?Sized>(
        &self,
        bank: &mut B,
        plan: &FingerprintPlan,
        deleted_before: usize,
    ) -> BatchOutcome {
        if self.config.dry_run {
            return BatchOutcome::Tallied(plan.candidates.len());
        }

        let every = self.config.progress_every.max(1);
        let logger = &self.logger;
        let mut progress = |n: usize| {
            let total = deleted_before + n;
            if total % every == 0 {
                logger.send(ActivityEvent::DeletionProgress { deleted: total });
            }
        };

        let started = Instant::now();
        match bank.delete_questions(&plan.candidates, &mut progress) {
            Ok(n) => {
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = started.elapsed().as_millis() as u64;
                self.logger.send(ActivityEvent::BatchCommitted {
                    fingerprint: plan.fingerprint.short().to_string(),
                    deleted: n,
                    duration_ms,
                });
                BatchOutcome::Committed(n)
            }
            Err(err) => BatchOutcome::RolledBack(err),
        }
    }
}

// ──────────────────── tests ────────────────────
