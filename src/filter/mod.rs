//! Random-set filter blobs: untyped node model, legacy decoder, and rule extraction.

pub mod legacy;
pub mod node;
pub mod rules;
