//! Question bank access: the narrow capability surface the janitor needs from
//! the host store.
//!
//! Every call is blocking I/O against one connection. Mutating calls take
//! `&mut self`; `delete_questions` is the only one that removes question data
//! and does so inside a single transaction.

use std::collections::BTreeSet;

use crate::category::protected::ProtectedCategorySet;
use crate::category::tree::CategoryEdge;
use crate::core::errors::Result;
use crate::core::model::{
    ContextId, ContextScope, QuestionId, QuestionRecord, QuestionScope, RandomSetFilterRecord,
};
use crate::dedup::fingerprint::Fingerprint;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Host component that owns quiz slot references.
pub const SLOT_COMPONENT: &str = "mod_quiz";
/// Question area of a reference that binds a quiz slot to a question or draw.
pub const SLOT_QUESTION_AREA: &str = "slot";

/// Read and write access to a host question bank.
///
/// Implemented by `SqliteQuestionBank` for the host database and by
/// in-memory banks in tests.
pub trait QuestionBank {
    /// Context row id for a scope, or `None` if the host has no such context.
    fn resolve_context(&self, scope: ContextScope) -> Result<Option<ContextId>>;

    /// Every question whose category lives in `scope`, ordered by id.
    fn scan_scope(&self, scope: &QuestionScope) -> Result<Vec<QuestionRecord>>;

    /// Questions in `scope` with the given fingerprint, ordered by id.
    fn scan_fingerprint(
        &self,
        scope: &QuestionScope,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<QuestionRecord>>;

    /// The subset of `ids` whose bank entry is bound by a quiz slot reference.
    fn slot_referenced_questions(&self, ids: &[QuestionId]) -> Result<BTreeSet<QuestionId>>;

    /// `(id, parent)` for every category in the store.
    fn category_edges(&self) -> Result<Vec<CategoryEdge>>;

    /// Slot-level random draw definitions.
    fn random_set_filters(&self) -> Result<Vec<RandomSetFilterRecord>>;

    /// Delete `ids` with their dependent rows inside one transaction.
    ///
    /// `progress` is called after each question with the number removed so far in
    /// this call. On any failure the transaction is rolled back and nothing from
    /// this call persists.
    fn delete_questions(
        &mut self,
        ids: &[QuestionId],
        progress: &mut dyn FnMut(usize),
    ) -> Result<usize>;

    /// Persist a snapshot under its own run id.
    fn write_protected_snapshot(&mut self, snapshot: &ProtectedCategorySet) -> Result<()>;

    /// Most recently written snapshot.
    fn latest_protected_snapshot(&self) -> Result<Option<ProtectedCategorySet>>;

    /// Drop all but the newest `retain` snapshots. Returns how many were removed.
    fn prune_protected_snapshots(&mut self, retain: usize) -> Result<usize>;

    /// Quiz slots whose fixed-question reference resolves to no question.
    fn count_broken_slots(&self) -> Result<u64>;
}
