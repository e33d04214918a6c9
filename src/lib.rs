#![forbid(unsafe_code)]

//! Question Bank Janitor (qbj): removes duplicate questions from an LMS
//! question bank without breaking quizzes.
//!
//! One cleanup run has three steps:
//! 1. **Protected set**: every category a random quiz slot can draw from,
//!    stored as a versioned snapshot
//! 2. **Dedup**: questions grouped by content fingerprint; the lowest id of each
//!    group is kept and unreferenced copies are deleted one group per transaction
//! 3. **Audit**: broken quiz slots and the remaining deletable counts
//!
//! # Library usage
//!
//! ```rust,no_run
//! use question_bank_janitor::prelude::*;
//! ```

pub mod prelude;

pub mod audit;
pub mod category;
pub mod core;
pub mod dedup;
pub mod filter;
pub mod logger;
pub mod pipeline;
pub mod store;
