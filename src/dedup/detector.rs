//! Duplicate-class detection: group in-scope questions by content fingerprint.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::errors::Result;
use crate::core::model::{QuestionId, QuestionRecord, QuestionScope};
use crate::dedup::fingerprint::Fingerprint;
use crate::store::QuestionBank;

/// Questions sharing one fingerprint within a scope. Always more than one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateClass {
    pub fingerprint: Fingerprint,
    /// Member ids, ascending.
    pub members: Vec<QuestionId>,
}

impl DuplicateClass {
    /// The retained record: the lowest id.
    #[must_use]
    pub fn keeper(&self) -> QuestionId {
        self.members[0]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Minimum id, independent of iteration order.
pub fn select_keeper<I>(ids: I) -> Option<QuestionId>
where
    I: IntoIterator<Item = QuestionId>,
{
    ids.into_iter().min()
}

/// All classes of size > 1, largest first. Equal sizes order by fingerprint so a
/// capped run always picks the same classes.
pub fn group_duplicates(records: &[QuestionRecord]) -> Vec<DuplicateClass> {
    let mut groups: BTreeMap<Fingerprint, Vec<QuestionId>> = BTreeMap::new();
    for record in records {
        groups.entry(record.fingerprint()).or_default().push(record.id);
    }

    let mut classes: Vec<DuplicateClass> = groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(fingerprint, mut members)| {
            members.sort_unstable();
            members.dedup();
            DuplicateClass {
                fingerprint,
                members,
            }
        })
        .filter(|class| class.len() > 1)
        .collect();

    classes.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
    classes
}

/// Scan `scope` and return at most `max_classes` duplicate classes.
pub fn detect_duplicates<B: QuestionBank + ?Sized>(
    bank: &B,
    scope: &QuestionScope,
    max_classes: usize,
) -> Result<Vec<DuplicateClass>> {
    let records = bank.scan_scope(scope)?;
    let mut classes = group_duplicates(&records);
    classes.truncate(max_classes);
    Ok(classes)
}
