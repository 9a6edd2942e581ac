//! # Value module
//!
//! This module provides the dynamic, schemaless value type that flows through
//! the aggregation, rendering and reconciliation pipeline, along with the
//! small set of recursive combinators ([`merge`], [`common`], [`unique_dict`])
//! the pipeline is built on top of.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

// -----------------------------------------------------------------------------
// recursive_get

/// Accesses a nested field of a [`Value`] by a dotted path, e.g.
/// `recursive_get(doc, "metadata.labels.name")`.
pub fn recursive_get<'v>(doc: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(doc, |acc, key| match acc {
        Value::Object(map) => map.get(key),
        Value::Array(list) => key.parse::<usize>().ok().and_then(|idx| list.get(idx)),
        _ => None,
    })
}

/// Same as [`recursive_get`] but returns the string representation of the
/// leaf, when the leaf is a string.
pub fn recursive_get_str<'v>(doc: &'v Value, path: &str) -> Option<&'v str> {
    recursive_get(doc, path).and_then(Value::as_str)
}

// -----------------------------------------------------------------------------
// merge

/// Recursively unions `a` and `b`. On a leaf conflict (both sides define the
/// same key with different, non-object values), `b` wins. This is the
/// "override" variant used across every aggregator projection (see
/// SPEC_FULL.md §9 Open Questions).
pub fn merge(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Object(am), Value::Object(bm)) => {
            let mut out = am.clone();

            for (k, bv) in bm {
                let merged = match out.get(k) {
                    Some(av) => merge(av, bv),
                    None => bv.clone(),
                };

                out.insert(k.clone(), merged);
            }

            Value::Object(out)
        }
        (_, b) => b.clone(),
    }
}

/// Merges every value in `items` left to right, starting from `Value::Null`.
pub fn merge_all<'i, I: IntoIterator<Item = &'i Value>>(items: I) -> Value {
    items
        .into_iter()
        .fold(Value::Object(Map::new()), |acc, v| merge(&acc, v))
}

// -----------------------------------------------------------------------------
// common

/// Recursively intersects `a` and `b`: a key survives only when both sides
/// define it with the same scalar value, or with sub-objects that
/// recursively share some common core (which may be empty).
pub fn common(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Object(am), Value::Object(bm)) => {
            let mut out = Map::new();

            for (k, av) in am {
                if let Some(bv) = bm.get(k) {
                    match (av, bv) {
                        (Value::Object(_), Value::Object(_)) => {
                            out.insert(k.clone(), common(av, bv));
                        }
                        _ if av == bv => {
                            out.insert(k.clone(), av.clone());
                        }
                        _ => {}
                    }
                }
            }

            Value::Object(out)
        }
        _ if a == b => a.clone(),
        _ => Value::Object(Map::new()),
    }
}

/// Computes the common projection of a non-empty slice of values.
///
/// # Panics
///
/// Panics if `items` is empty; callers must only invoke this on a non-empty
/// group (every call site groups objects first and only calls `common_all`
/// on the resulting, necessarily non-empty, groups).
pub fn common_all(items: &[Value]) -> Value {
    items
        .split_first()
        .map(|(head, tail)| tail.iter().fold(head.clone(), |acc, v| common(&acc, v)))
        .expect("common_all to be called with a non-empty slice")
}

// -----------------------------------------------------------------------------
// unique_dict

/// Deduplicates a list of [`Value`] maps by their canonical YAML
/// representation. Order of the surviving, first-seen occurrences is
/// preserved.
pub fn unique_dict(items: Vec<Value>) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(items.len());

    for item in items {
        let canonical = serde_yaml::to_string(&item).unwrap_or_default();

        if seen.insert(canonical) {
            out.push(item);
        }
    }

    out
}

// -----------------------------------------------------------------------------
// cheap_hash

/// Returns the first `length` hex digits of the SHA-256 digest of `s`, or
/// `None` when `s` is empty.
pub fn cheap_hash(s: &str, length: usize) -> Option<String> {
    if s.is_empty() {
        return None;
    }

    let digest = Sha256::digest(s.as_bytes());
    let hex = hex::encode(digest);

    Some(hex[..length.min(hex.len())].to_string())
}

// -----------------------------------------------------------------------------
// path_join

/// Joins non-empty segments with `/`, mirroring the renderer's `path_join`
/// filter.
pub fn path_join<'s, I: IntoIterator<Item = &'s str>>(segments: I) -> String {
    segments
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Joins non-empty segments with `-`, used by the aggregator to compute
/// `_name`.
pub fn dash_join<'s, I: IntoIterator<Item = Option<&'s str>>>(segments: I) -> String {
    segments
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

// -----------------------------------------------------------------------------
// is_subset / is_superset

/// Returns `true` when every key/value pair of `subset` is present, with an
/// equal value, in `superset`, recursing into nested objects.
pub fn is_subset(subset: &Value, superset: &Value) -> bool {
    match (subset, superset) {
        (Value::Object(sm), Value::Object(lm)) => sm.iter().all(|(k, v)| match lm.get(k) {
            Some(lv) => is_subset(v, lv),
            None => false,
        }),
        _ => subset == superset,
    }
}

/// `is_superset(a, b) == is_subset(b, a)`.
pub fn is_superset(superset: &Value, subset: &Value) -> bool {
    is_subset(subset, superset)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_overrides_leaf_conflicts() {
        let a = json!({"a": 1, "b": {"c": 1, "d": 1}});
        let b = json!({"a": 2, "b": {"c": 2}});

        assert_eq!(merge(&a, &b), json!({"a": 2, "b": {"c": 2, "d": 1}}));
    }

    #[test]
    fn merge_is_idempotent_and_associative_on_disjoint_leaves() {
        let a = json!({"a": 1});
        let b = json!({"b": 2});
        let c = json!({"c": 3});

        assert_eq!(merge(&a, &a), a);
        assert_eq!(merge(&merge(&a, &b), &c), merge(&a, &merge(&b, &c)));
    }

    #[test]
    fn common_keeps_only_equal_leaves() {
        let a = json!({"a": 1, "b": {"c": 1, "d": 1}});
        let b = json!({"a": 1, "b": {"c": 2, "d": 1}});

        assert_eq!(common(&a, &b), json!({"a": 1, "b": {"d": 1}}));
    }

    #[test]
    fn common_is_idempotent() {
        let x = json!({"a": 1, "b": {"c": 2}});
        assert_eq!(common(&x, &x), x);
    }

    #[test]
    fn unique_dict_dedupes_and_shrinks() {
        let items = vec![json!({"a": 1}), json!({"a": 1}), json!({"a": 2})];
        let out = unique_dict(items.clone());

        assert_eq!(out.len(), 2);
        assert!(out.len() <= items.len());

        let twice = unique_dict(out.clone());
        assert_eq!(twice, out);
    }

    #[test]
    fn cheap_hash_is_six_hex_digits_or_none() {
        assert_eq!(cheap_hash("", 6), None);
        assert_eq!(cheap_hash("example.com", 6).unwrap().len(), 6);
    }

    #[test]
    fn is_subset_recurses_into_nested_objects() {
        let sub = json!({"a": {"b": 1}});
        let sup = json!({"a": {"b": 1, "c": 2}, "d": 3});

        assert!(is_subset(&sub, &sup));
        assert!(is_superset(&sup, &sub));
        assert!(!is_subset(&json!({"a": {"b": 2}}), &sup));
    }
}
