//! Category rule extraction from random-set filter blobs.
//!
//! A blob is decoded as JSON first, then as the legacy serialization; if both
//! fail it yields no rules. The decoded tree is walked once and every fragment
//! that looks like a category rule is collected:
//!
//! - **Discriminated**: `filtertype` is `category` or `question_category`; the id
//!   and include flag are read from `filteroptions`/`options`, or from the
//!   fragment itself when neither sub-structure exists.
//! - **Flat**: the fragment carries a category-id-like field directly.
//!
//! Field synonyms are tried in the priority order of the tables below; the
//! first non-null value wins.

#![allow(missing_docs)]

use serde::Serialize;

use super::legacy;
use super::node::FilterNode;
use crate::core::model::CategoryId;

/// Category id spellings, highest priority first.
pub const CATEGORY_ID_KEYS: &[&str] = &["questioncategoryid", "categoryid", "category"];

/// Include-subcategories spellings, highest priority first.
pub const INCLUDE_SUBCATEGORIES_KEYS: &[&str] = &[
    "includingsubcategories",
    "includesubcategories",
    "includeSubcategories",
    "includesubcats",
];

/// serde_json's recursion limit for `from_str`.
pub const JSON_MAX_DEPTH: usize = 128;

const DISCRIMINATOR_KEY: &str = "filtertype";
const DISCRIMINATOR_VALUES: &[&str] = &["category", "question_category"];
const OPTIONS_KEYS: &[&str] = &["filteroptions", "options"];

/// A category a random draw pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CategoryRule {
    pub category_id: CategoryId,
    pub include_subcategories: bool,
}

/// Which recognition form matched a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOrigin {
    Discriminated,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule: CategoryRule,
    pub origin: MatchOrigin,
}

/// Which decoder accepted a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobFormat {
    Json,
    Legacy,
}

/// Decode a raw filter blob. `None` for empty or undecodable input.
///
/// JSON scalars are not filter structures and fall through to the legacy decoder.
/// JSON must nest fewer than [`JSON_MAX_DEPTH`] levels; a deeper blob fails both decoders
/// and yields no rules, like the legacy decoder's own bound.
pub fn decode_blob(raw: &str) -> Option<(BlobFormat, FilterNode)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed)
        && (value.is_object() || value.is_array())
    {
        return Some((BlobFormat::Json, FilterNode::from(value)));
    }
    legacy::decode(trimmed).map(|node| (BlobFormat::Legacy, node))
}

/// Decode `raw` and return its distinct category rules in discovery order.
pub fn extract_rules(raw: &str) -> Vec<CategoryRule> {
    decode_blob(raw).map_or_else(Vec::new, |(_, node)| rules_in(&node))
}

/// Distinct rules of an already decoded tree, in discovery order.
pub fn rules_in(root: &FilterNode) -> Vec<CategoryRule> {
    distinct_rules(&find_rules(root))
}

/// Walk `root` once and report every rule-like fragment.
pub fn find_rules(root: &FilterNode) -> Vec<RuleMatch> {
    let mut found = Vec::new();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if node.is_mapping() {
            if is_discriminated(node) {
                let options = OPTIONS_KEYS
                    .iter()
                    .filter_map(|key| node.get(key))
                    .find(|value| value.is_mapping())
                    .unwrap_or(node);
                if let Some(rule) = read_rule(options) {
                    found.push(RuleMatch {
                        rule,
                        origin: MatchOrigin::Discriminated,
                    });
                }
            }
            if let Some(rule) = read_rule(node) {
                found.push(RuleMatch {
                    rule,
                    origin: MatchOrigin::Flat,
                });
            }
        }
        // Reverse keeps source order on the LIFO stack.
        let children: Vec<&FilterNode> = node.children().collect();
        stack.extend(children.into_iter().rev());
    }

    found
}

fn is_discriminated(node: &FilterNode) -> bool {
    node.get(DISCRIMINATOR_KEY)
        .and_then(FilterNode::as_text)
        .is_some_and(|kind| DISCRIMINATOR_VALUES.contains(&kind))
}

/// Read a rule from a fragment's own fields. Non-positive ids are discarded.
fn read_rule(fragment: &FilterNode) -> Option<CategoryRule> {
    let category_id = fragment
        .first_present(CATEGORY_ID_KEYS)
        .and_then(FilterNode::to_int_lossy)
        .filter(|id| *id > 0)?;
    let include_subcategories = fragment
        .first_present(INCLUDE_SUBCATEGORIES_KEYS)
        .is_some_and(FilterNode::to_flag);
    Some(CategoryRule {
        category_id,
        include_subcategories,
    })
}

/// The rules of `matches` with repeats dropped, first occurrence kept.
pub fn distinct_rules(matches: &[RuleMatch]) -> Vec<CategoryRule> {
    let mut rules: Vec<CategoryRule> = Vec::with_capacity(matches.len());
    for m in matches {
        if !rules.contains(&m.rule) {
            rules.push(m.rule);
        }
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rule(category_id: CategoryId, include_subcategories: bool) -> CategoryRule {
        CategoryRule {
            category_id,
            include_subcategories,
        }
    }

    #[test]
    fn discriminated_rule_with_filteroptions() {
        let raw = r#"{"filtertype":"category","filteroptions":{"questioncategoryid":5,"includingsubcategories":1}}"#;
        assert_eq!(extract_rules(raw), vec![rule(5, true)]);
    }

    #[test]
    fn discriminated_rule_reads_fragment_when_no_options() {
        let raw = r#"{"filtertype":"question_category","categoryid":"12","includesubcats":"0"}"#;
        let (_, node) = decode_blob(raw).unwrap();
        let matches = find_rules(&node);
        assert_eq!(matches.len(), 2, "both forms match the same fragment");
        assert_eq!(extract_rules(raw), vec![rule(12, false)]);
    }

    #[test]
    fn other_discriminators_are_not_rules() {
        let raw = r#"{"filtertype":"tag","filteroptions":{"tagid":3}}"#;
        assert!(extract_rules(raw).is_empty());
    }

    #[test]
    fn flat_current_host_shape() {
        let raw = r#"{"questioncategoryid":"31","includingsubcategories":"1","filter":{"category":{"jointype":1,"values":[31],"filteroptions":{"includesubcategories":true}}}}"#;
        assert_eq!(extract_rules(raw), vec![rule(31, true)]);
    }

    #[test]
    fn synonym_priority_first_non_null_wins() {
        let raw = r#"{"questioncategoryid":null,"categoryid":8,"category":9,"includingsubcategories":null,"includeSubcategories":true}"#;
        assert_eq!(extract_rules(raw), vec![rule(8, true)]);
    }

    #[test]
    fn multiple_rules_in_one_blob() {
        let raw = r#"[{"categoryid":1},{"wrapper":{"filtertype":"category","options":{"category":2,"includesubcategories":1}}}]"#;
        assert_eq!(extract_rules(raw), vec![rule(1, false), rule(2, true)]);
    }

    #[test]
    fn non_positive_ids_discarded() {
        assert!(extract_rules(r#"{"categoryid":0}"#).is_empty());
        assert!(extract_rules(r#"{"categoryid":-4}"#).is_empty());
        assert!(extract_rules(r#"{"categoryid":"abc"}"#).is_empty());
    }

    #[test]
    fn legacy_blob_is_decoded() {
        let raw = r#"a:2:{s:10:"filtertype";s:8:"category";s:13:"filteroptions";a:2:{s:18:"questioncategoryid";s:2:"44";s:22:"includingsubcategories";i:1;}}"#;
        let (format, _) = decode_blob(raw).unwrap();
        assert_eq!(format, BlobFormat::Legacy);
        assert_eq!(extract_rules(raw), vec![rule(44, true)]);
    }

    #[test]
    fn empty_and_malformed_blobs_yield_nothing() {
        for raw in ["", "   ", "{not json", "b:0;", "42", r#""categoryid""#, "a:1:{"] {
            assert!(extract_rules(raw).is_empty(), "expected no rules for {raw:?}");
        }
    }

    #[test]
    fn blob_without_category_fields_yields_nothing() {
        let raw = r#"{"tags":[1,2],"filter":{"qtype":{"values":["essay"]}}}"#;
        assert!(extract_rules(raw).is_empty());
    }

    fn wrap(depth: usize, inner: serde_json::Value) -> serde_json::Value {
        (0..depth).fold(inner, |acc, i| {
            if i % 2 == 0 {
                serde_json::json!({ "level": acc })
            } else {
                serde_json::json!([acc])
            }
        })
    }

    #[test]
    fn json_past_nesting_bound_yields_nothing() {
        let nested = |depth: usize| {
            format!(
                "{}{{\"categoryid\":9}}{}",
                "[".repeat(depth),
                "]".repeat(depth)
            )
        };
        assert_eq!(extract_rules(&nested(JSON_MAX_DEPTH - 2)), vec![rule(9, false)]);
        assert!(decode_blob(&nested(200)).is_none());
        assert!(extract_rules(&nested(200)).is_empty());
    }

    fn legacy_str(text: &str) -> String {
        format!("s:{}:\"{text}\";", text.len())
    }

    /// `form` picks `i:`, `s:` or `b:`; ids have no bool form, so `b:` falls back to `i:`.
    fn legacy_scalar(value: i64, form: usize) -> String {
        match form {
            1 => legacy_str(&value.to_string()),
            2 if value == 0 || value == 1 => format!("b:{value};"),
            _ => format!("i:{value};"),
        }
    }

    fn wrap_legacy(depth: usize, inner: String) -> String {
        (0..depth).fold(inner, |acc, _| format!("a:1:{{i:0;{acc}}}"))
    }

    proptest! {
        #[test]
        fn any_legacy_synonym_at_any_depth_is_found(
            id in 1i64..100_000,
            include in any::<bool>(),
            cat_key in 0usize..3,
            inc_key in 0usize..4,
            id_form in 0usize..2,
            flag_form in 0usize..3,
            depth in 0usize..8,
        ) {
            let fragment = format!(
                "a:2:{{{}{}{}{}}}",
                legacy_str(CATEGORY_ID_KEYS[cat_key]),
                legacy_scalar(id, id_form),
                legacy_str(INCLUDE_SUBCATEGORIES_KEYS[inc_key]),
                legacy_scalar(i64::from(include), flag_form),
            );
            let blob = wrap_legacy(depth, fragment);
            let (format, _) = decode_blob(&blob).expect("legacy blob decodes");
            prop_assert_eq!(format, BlobFormat::Legacy);
            prop_assert_eq!(extract_rules(&blob), vec![rule(id, include)]);
        }

        #[test]
        fn any_synonym_at_any_depth_is_found(
            id in 1i64..100_000,
            include in any::<bool>(),
            cat_key in 0usize..3,
            inc_key in 0usize..4,
            depth in 0usize..12,
        ) {
            let mut fragment = serde_json::Map::new();
            fragment.insert(CATEGORY_ID_KEYS[cat_key].to_string(), serde_json::json!(id));
            fragment.insert(
                INCLUDE_SUBCATEGORIES_KEYS[inc_key].to_string(),
                serde_json::json!(i32::from(include)),
            );
            let blob = wrap(depth, serde_json::Value::Object(fragment)).to_string();
            prop_assert_eq!(extract_rules(&blob), vec![rule(id, include)]);
        }

        #[test]
        fn arbitrary_text_never_panics(raw in ".{0,200}") {
            let _ = extract_rules(&raw);
        }
    }
}
