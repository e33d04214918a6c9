//! Untyped filter tree shared by the JSON and legacy decoders.
//!
//! Filter blobs change shape between host versions, so nothing here assumes a
//! schema: a node is a mapping, a sequence, or a scalar, and callers walk it.

#![allow(missing_docs)]

use serde_json::Value;

/// One decoded node of a filter blob.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    /// Keyed entries in source order. Integer keys of legacy arrays are stringified.
    Mapping(Vec<(String, FilterNode)>),
    Sequence(Vec<FilterNode>),
    Scalar(Scalar),
}

/// Leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FilterNode {
    /// Value stored under `key`, if this is a mapping holding it.
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Mapping(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// First non-null value among `keys`, tried in order.
    pub fn first_present(&self, keys: &[&str]) -> Option<&Self> {
        keys.iter()
            .filter_map(|key| self.get(key))
            .find(|value| !value.is_null())
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Scalar::Null))
    }

    pub const fn is_mapping(&self) -> bool {
        matches!(self, Self::Mapping(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Direct children, for mappings and sequences.
    pub fn children(&self) -> Box<dyn Iterator<Item = &Self> + '_> {
        match self {
            Self::Mapping(entries) => Box::new(entries.iter().map(|(_, v)| v)),
            Self::Sequence(items) => Box::new(items.iter()),
            Self::Scalar(_) => Box::new(std::iter::empty()),
        }
    }

    /// Integer reading of a scalar: numbers truncate, text parses its leading
    /// integer (`"12abc"` -> 12, `"abc"` -> 0). Containers and null have none.
    pub fn to_int_lossy(&self) -> Option<i64> {
        match self {
            Self::Scalar(Scalar::Bool(b)) => Some(i64::from(*b)),
            Self::Scalar(Scalar::Int(i)) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Self::Scalar(Scalar::Float(f)) if f.is_finite() => Some(f.trunc() as i64),
            Self::Scalar(Scalar::Text(s)) => Some(leading_int(s)),
            _ => None,
        }
    }

    /// Flag reading through the integer reading: non-zero is set. Words are
    /// not special, so `"true"` reads as 0.
    pub fn to_flag(&self) -> bool {
        self.to_int_lossy().is_some_and(|v| v != 0)
    }
}

fn leading_int(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let (sign, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1, &trimmed[1..]),
        Some(b'+') => (1, &trimmed[1..]),
        _ => (1, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map_or(0, |v| v * sign)
}

impl From<Value> for FilterNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Scalar(Scalar::Null),
            Value::Bool(b) => Self::Scalar(Scalar::Bool(b)),
            Value::Number(n) => n.as_i64().map_or_else(
                || Self::Scalar(n.as_f64().map_or(Scalar::Null, Scalar::Float)),
                |i| Self::Scalar(Scalar::Int(i)),
            ),
            Value::String(s) => Self::Scalar(Scalar::Text(s)),
            Value::Array(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Mapping(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}
