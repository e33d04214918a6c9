//! Shared domain types for the question bank tables the janitor touches.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::core::errors::{QbjError, Result};

pub type QuestionId = i64;
pub type CategoryId = i64;
pub type ContextId = i64;

/// Host context level for the site-wide question bank.
pub const CONTEXT_LEVEL_SYSTEM: i64 = 10;
/// Host context level for a course question bank.
pub const CONTEXT_LEVEL_COURSE: i64 = 50;

/// Which question bank a run operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum ContextScope {
    System,
    Course { course_id: i64 },
}

impl ContextScope {
    /// Build a scope from the host CLI convention (`10` = system, `50` = course).
    ///
    /// Rejected before any store access: unknown levels, and course level without
    /// a positive course id.
    pub fn from_level(level: i64, instance_id: i64) -> Result<Self> {
        match level {
            CONTEXT_LEVEL_SYSTEM => Ok(Self::System),
            CONTEXT_LEVEL_COURSE if instance_id > 0 => Ok(Self::Course {
                course_id: instance_id,
            }),
            CONTEXT_LEVEL_COURSE => Err(QbjError::InvalidScope {
                details: "course scope (context level 50) requires a positive instance id"
                    .to_string(),
            }),
            other => Err(QbjError::InvalidScope {
                details: format!("context level must be 10 (system) or 50 (course), got {other}"),
            }),
        }
    }

    /// `(contextlevel, instanceid)` pair used to look the context row up.
    #[must_use]
    pub const fn level_and_instance(self) -> (i64, i64) {
        match self {
            Self::System => (CONTEXT_LEVEL_SYSTEM, 0),
            Self::Course { course_id } => (CONTEXT_LEVEL_COURSE, course_id),
        }
    }
}

impl std::fmt::Display for ContextScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Course { course_id } => write!(f, "course {course_id}"),
        }
    }
}

/// A resolved record scope: one context, optionally narrowed to one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionScope {
    pub context_id: ContextId,
    pub category_id: Option<CategoryId>,
}

impl QuestionScope {
    /// `category` values of zero or less mean "all categories in the context".
    #[must_use]
    pub fn new(context_id: ContextId, category: Option<CategoryId>) -> Self {
        Self {
            context_id,
            category_id: category.filter(|id| *id > 0),
        }
    }
}

/// One question row joined up to its owning category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRecord {
    pub id: QuestionId,
    pub qtype: Option<String>,
    pub name: Option<String>,
    pub body: Option<String>,
    pub feedback: Option<String>,
    pub category_id: CategoryId,
}

impl QuestionRecord {
    /// Content fingerprint of this record.
    #[must_use]
    pub fn fingerprint(&self) -> crate::dedup::fingerprint::Fingerprint {
        crate::dedup::fingerprint::Fingerprint::of(
            self.qtype.as_deref(),
            self.name.as_deref(),
            self.body.as_deref(),
            self.feedback.as_deref(),
        )
    }
}

/// A slot-level random draw definition with its raw filter blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomSetFilterRecord {
    pub id: i64,
    pub questions_context_id: Option<ContextId>,
    pub filter_condition: Option<String>,
}
