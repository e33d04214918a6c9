//! Protected-category set: every category a random draw can pull from.
//!
//! Built from all slot-level random-set filters. Each rule contributes its own
//! category, or its whole subtree when it includes subcategories. A build is a
//! versioned snapshot (`run_id` + `created_at`), so two builds never share rows.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::category::tree::CategoryTree;
use crate::core::errors::Result;
use crate::core::model::{CategoryId, RandomSetFilterRecord};
use crate::filter::rules::{self, CategoryRule, MatchOrigin};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::store::QuestionBank;

static RUN_SEQUENCE: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectedCategorySet {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub categories: BTreeSet<CategoryId>,
}

impl ProtectedCategorySet {
    /// Fresh snapshot stamped now, with a run id unique to this process and instant.
    #[must_use]
    pub fn new(categories: BTreeSet<CategoryId>) -> Self {
        let created_at = Utc::now();
        let seq = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self {
            run_id: format!(
                "pcs-{}-{}-{seq}",
                created_at.timestamp_millis(),
                std::process::id()
            ),
            created_at,
            categories,
        }
    }

    #[must_use]
    pub fn contains(&self, category: CategoryId) -> bool {
        self.categories.contains(&category)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Counters from one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub filters_scanned: usize,
    /// Filters with a blob that decoded as neither JSON nor the legacy format.
    pub undecodable_filters: usize,
    /// Distinct rules per filter, summed over filters.
    pub rules_found: usize,
    /// Raw matches recognised by the `filtertype` discriminator.
    pub discriminated_matches: usize,
    /// Raw matches recognised by a category-id field alone.
    pub flat_matches: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub snapshot: ProtectedCategorySet,
    pub stats: BuildStats,
    pub pruned_snapshots: usize,
}

/// Union of every rule's reach over `tree`.
pub fn protected_categories(
    tree: &CategoryTree,
    filters: &[RandomSetFilterRecord],
) -> (BTreeSet<CategoryId>, BuildStats) {
    let mut stats = BuildStats::default();
    let mut categories = BTreeSet::new();

    for filter in filters {
        stats.filters_scanned += 1;
        let Some(raw) = filter.filter_condition.as_deref().filter(|r| !r.trim().is_empty()) else {
            continue;
        };
        let Some((_, node)) = rules::decode_blob(raw) else {
            stats.undecodable_filters += 1;
            continue;
        };
        let matches = rules::find_rules(&node);
        for found in &matches {
            match found.origin {
                MatchOrigin::Discriminated => stats.discriminated_matches += 1,
                MatchOrigin::Flat => stats.flat_matches += 1,
            }
        }
        let found: Vec<CategoryRule> = rules::distinct_rules(&matches);
        stats.rules_found += found.len();
        for rule in found {
            if rule.include_subcategories {
                categories.extend(tree.expand(rule.category_id));
            } else {
                categories.insert(rule.category_id);
            }
        }
    }

    (categories, stats)
}

pub struct ProtectedSetBuilder {
    logger: ActivityLoggerHandle,
}

impl ProtectedSetBuilder {
    pub fn new(logger: ActivityLoggerHandle) -> Self {
        Self { logger }
    }

    /// Compute a snapshot from the current store state without persisting it.
    pub fn compute<B: QuestionBank + ?Sized>(
        &self,
        bank: &B,
    ) -> Result<(ProtectedCategorySet, BuildStats)> {
        let tree = CategoryTree::from_edges(bank.category_edges()?);
        let filters = bank.random_set_filters()?;
        let (categories, stats) = protected_categories(&tree, &filters);
        Ok((ProtectedCategorySet::new(categories), stats))
    }

    /// Compute, persist as a new snapshot, then prune old snapshots down to `retain`.
    pub fn build<B: QuestionBank + ?Sized>(
        &self,
        bank: &mut B,
        retain: usize,
    ) -> Result<BuildReport> {
        self.logger.send(ActivityEvent::ProtectedSetBuilding);
        let (snapshot, stats) = self.compute(&*bank)?;
        bank.write_protected_snapshot(&snapshot)?;
        let pruned_snapshots = bank.prune_protected_snapshots(retain)?;

        self.logger.send(ActivityEvent::ProtectedSetBuilt {
            run_id: snapshot.run_id.clone(),
            categories: snapshot.len(),
            filters_scanned: stats.filters_scanned,
            undecodable_filters: stats.undecodable_filters,
        });

        Ok(BuildReport {
            snapshot,
            stats,
            pruned_snapshots,
        })
    }
}
