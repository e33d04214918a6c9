//! Content fingerprints: the duplicate-equality key over question text fields.
//!
//! `concat_ws('|', qtype, name, questiontext, generalfeedback)` with NULL fields
//! skipped, hashed with SHA-256 and rendered as lowercase hex. Ids and
//! timestamps never enter the hash.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Field separator, matching the upstream `CONCAT_WS('|', ...)` convention.
const SEPARATOR: &str = "|";

/// Hex-encoded SHA-256 content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of the four content fields.
    #[must_use]
    pub fn of(
        qtype: Option<&str>,
        name: Option<&str>,
        body: Option<&str>,
        feedback: Option<&str>,
    ) -> Self {
        let joined = [qtype, name, body, feedback]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(SEPARATOR);
        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        Self(hex_encode(&hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for progress lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
