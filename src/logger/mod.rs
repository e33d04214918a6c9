//! Activity logging: structured JSONL rows plus human progress lines.

pub mod activity;
pub mod jsonl;
