//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use question_bank_janitor::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{QbjError, Result};
pub use crate::core::model::{
    CategoryId, ContextId, ContextScope, QuestionId, QuestionRecord, QuestionScope,
    RandomSetFilterRecord,
};

// Filters and categories
pub use crate::category::protected::{ProtectedCategorySet, ProtectedSetBuilder};
pub use crate::category::tree::CategoryTree;
pub use crate::filter::rules::{CategoryRule, extract_rules};

// Dedup
pub use crate::dedup::deleter::{DeletionConfig, DeletionExecutor, DeletionReport};
pub use crate::dedup::detector::{DuplicateClass, detect_duplicates};
pub use crate::dedup::fingerprint::Fingerprint;

// Audit
pub use crate::audit::{AuditReport, Auditor};

// Pipeline
pub use crate::pipeline::{DedupRequest, PipelineOptions, detect_and_delete, run_pipeline};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

// Store
pub use crate::store::QuestionBank;
#[cfg(feature = "sqlite")]
pub use crate::store::sqlite::SqliteQuestionBank;
