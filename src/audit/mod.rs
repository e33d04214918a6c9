//! Post-run consistency checks. Read-only and diagnostic: a failing check is
//! reported in the result, never raised.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::category::protected::ProtectedCategorySet;
use crate::core::errors::{QbjError, Result};
use crate::core::model::{CategoryId, ContextId, QuestionId, QuestionScope};
use crate::dedup::detector::group_duplicates;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::store::QuestionBank;

/// "Deletable now" counters split by random-set membership.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub deletable_now: u64,
    pub in_random_sets: u64,
    pub truly_deletable_now: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditFailure {
    pub check: &'static str,
    pub error_code: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    /// `None` when the check itself failed.
    pub broken_slots: Option<u64>,
    pub reconciliation: Option<Reconciliation>,
    /// Snapshot the reconciliation partitioned against, if any.
    pub protected_run_id: Option<String>,
    pub failures: Vec<AuditFailure>,
}

impl AuditReport {
    /// A positive broken-slot count means a referenced question was removed.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.broken_slots == Some(0)
    }
}

/// Recompute the reconciliation counters for `context_id` against `protected`.
///
/// A record counts as deletable when its fingerprint class (within the context)
/// has more than one member, it is not the class keeper, and no quiz slot
/// references it.
pub fn reconcile<B: QuestionBank + ?Sized>(
    bank: &B,
    context_id: ContextId,
    protected: &ProtectedCategorySet,
) -> Result<Reconciliation> {
    let records = bank.scan_scope(&QuestionScope::new(context_id, None))?;
    let category_of: BTreeMap<QuestionId, CategoryId> =
        records.iter().map(|r| (r.id, r.category_id)).collect();

    let non_keepers: Vec<QuestionId> = group_duplicates(&records)
        .iter()
        .flat_map(|class| class.members.iter().skip(1).copied())
        .collect();
    let in_use = bank.slot_referenced_questions(&non_keepers)?;

    let mut counts = Reconciliation::default();
    for id in non_keepers.iter().filter(|id| !in_use.contains(id)) {
        counts.deletable_now += 1;
        if category_of.get(id).is_some_and(|c| protected.contains(*c)) {
            counts.in_random_sets += 1;
        } else {
            counts.truly_deletable_now += 1;
        }
    }
    Ok(counts)
}

pub struct Auditor {
    logger: ActivityLoggerHandle,
}

impl Auditor {
    pub fn new(logger: ActivityLoggerHandle) -> Self {
        Self { logger }
    }

    /// Run both checks. With no explicit set, the newest persisted snapshot is
    /// used; with neither, every deletable record counts as unprotected.
    pub fn run<B: QuestionBank + ?Sized>(
        &self,
        bank: &B,
        context_id: ContextId,
        protected: Option<&ProtectedCategorySet>,
    ) -> AuditReport {
        let mut report = AuditReport::default();

        match bank.count_broken_slots() {
            Ok(count) => {
                report.broken_slots = Some(count);
                self.logger.send(ActivityEvent::BrokenSlots { count });
            }
            Err(err) => self.record_failure(&mut report, "broken slots", &err),
        }

        let latest;
        let fallback;
        let (set, run_id) = match protected {
            Some(set) => (set, Some(set.run_id.clone())),
            None => match bank.latest_protected_snapshot() {
                Ok(Some(found)) => {
                    latest = found;
                    (&latest, Some(latest.run_id.clone()))
                }
                Ok(None) => {
                    self.logger.send(ActivityEvent::ProtectedSetUnavailable {
                        reason: "no protected snapshot has been built".to_string(),
                    });
                    fallback = ProtectedCategorySet::new(BTreeSet::new());
                    (&fallback, None)
                }
                Err(err) => {
                    self.record_failure(&mut report, "protected snapshot", &err);
                    return report;
                }
            },
        };

        match reconcile(bank, context_id, set) {
            Ok(counts) => {
                report.reconciliation = Some(counts);
                report.protected_run_id.clone_from(&run_id);
                self.logger.send(ActivityEvent::Reconciliation {
                    deletable_now: counts.deletable_now,
                    in_random_sets: counts.in_random_sets,
                    truly_deletable_now: counts.truly_deletable_now,
                    snapshot: run_id,
                });
            }
            Err(err) => self.record_failure(&mut report, "counters", &err),
        }

        report
    }

    fn record_failure(&self, report: &mut AuditReport, check: &'static str, err: &QbjError) {
        self.logger.send(ActivityEvent::AuditCheckFailed {
            check,
            error_code: err.code().to_string(),
            error_message: err.to_string(),
        });
        report.failures.push(AuditFailure {
            check,
            error_code: err.code().to_string(),
            error: err.to_string(),
        });
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteQuestionBank;

    /// Context 1 with categories 10 and 20. Class A = {1, 2, 3} in 10, class B =
    /// {4, 5} in 20 with 5 slot-bound, 6 unique.
    fn seeded() -> (tempfile::TempDir, SqliteQuestionBank) {
        let dir = tempfile::tempdir().unwrap();
        let bank = SqliteQuestionBank::open(&dir.path().join("audit.db"), 1000).unwrap();
        bank.connection()
            .execute_batch(
                "INSERT INTO context (id, contextlevel, instanceid) VALUES (1, 10, 0);
                 INSERT INTO question_categories (id, contextid, parent) VALUES (10, 1, 0), (20, 1, 0);
                 INSERT INTO question (id, qtype, name) VALUES
                   (1, 'essay', 'A'), (2, 'essay', 'A'), (3, 'essay', 'A'),
                   (4, 'essay', 'B'), (5, 'essay', 'B'), (6, 'essay', 'C');
                 INSERT INTO question_bank_entries (id, questioncategoryid) VALUES
                   (101, 10), (102, 10), (103, 10), (104, 20), (105, 20), (106, 20);
                 INSERT INTO question_versions (questionbankentryid, questionid, version) VALUES
                   (101, 1, 1), (102, 2, 1), (103, 3, 1), (104, 4, 1), (105, 5, 1), (106, 6, 1);
                 INSERT INTO quiz_slots (id, quizid, slot) VALUES (1, 1, 1);
                 INSERT INTO question_references (component, questionarea, itemid, questionbankentryid)
                   VALUES ('mod_quiz', 'slot', 1, 105);",
            )
            .unwrap();
        (dir, bank)
    }

    #[test]
    fn counters_partition_by_protected_set() {
        let (_dir, bank) = seeded();
        let set = ProtectedCategorySet::new(BTreeSet::from([10]));
        let counts = reconcile(&bank, 1, &set).unwrap();
        assert_eq!(
            counts,
            Reconciliation {
                deletable_now: 2,
                in_random_sets: 2,
                truly_deletable_now: 0,
            }
        );

        let none = ProtectedCategorySet::new(BTreeSet::new());
        let counts = reconcile(&bank, 1, &none).unwrap();
        assert_eq!(counts.truly_deletable_now, 2);
    }

    #[test]
    fn auditor_falls_back_to_latest_snapshot() {
        let (_dir, mut bank) = seeded();
        let auditor = Auditor::new(ActivityLoggerHandle::disabled());

        let report = auditor.run(&bank, 1, None);
        assert_eq!(report.protected_run_id, None);
        assert_eq!(report.reconciliation.unwrap().truly_deletable_now, 2);

        let snapshot = ProtectedCategorySet::new(BTreeSet::from([10, 20]));
        bank.write_protected_snapshot(&snapshot).unwrap();
        let report = auditor.run(&bank, 1, None);
        assert!(report.is_consistent());
        assert_eq!(report.protected_run_id.as_deref(), Some(snapshot.run_id.as_str()));
        assert_eq!(report.reconciliation.unwrap().in_random_sets, 2);
    }

    #[test]
    fn failed_check_is_reported_not_raised() {
        let (_dir, bank) = seeded();
        bank.connection().execute_batch("DROP TABLE quiz_slots;").unwrap();
        let report = Auditor::new(ActivityLoggerHandle::disabled()).run(&bank, 1, None);
        assert_eq!(report.broken_slots, None);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error_code, "QBJ-2102");
        assert!(report.reconciliation.is_some());
        assert!(!report.is_consistent());
    }
}
