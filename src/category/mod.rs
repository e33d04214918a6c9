//! Category tree expansion and the protected-category set built on it.

pub mod protected;
pub mod tree;
