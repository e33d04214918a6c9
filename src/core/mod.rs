//! Core types: errors, configuration, shared domain model.

pub mod config;
pub mod errors;
pub mod model;
