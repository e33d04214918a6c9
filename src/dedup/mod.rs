//! Duplicate detection and safe deletion.

pub mod deleter;
pub mod detector;
pub mod fingerprint;
