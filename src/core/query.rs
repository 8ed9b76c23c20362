
//! Predicate matcher for full-scan queries.
//!
//! Plain keys match by equality; a sub-object value is a set of comparison
//! operators; `$or` / `$and` take lists of sub-queries. Numeric comparison
//! coerces through f64, everything else falls back to comparing string
//! representations.

use crate::core::document::Document;
use serde_json::Value;
use std::cmp::Ordering;

pub fn matches(doc: &Document, query: &Document) -> bool {
    for (key, query_val) in query {
        if key == "$or" {
            if let Value::Array(list) = query_val {
                if !match_or(doc, list) {
                    return false;
                }
            }
            continue;
        }

        if key == "$and" {
            if let Value::Array(list) = query_val {
                if !match_and(doc, list) {
                    return false;
                }
            }
            continue;
        }

        let doc_val = match doc.get(key) {
            Some(v) => v,
            None => return false,
        };

        match query_val {
            Value::Object(ops) => {
                if !match_operators(doc_val, ops) {
                    return false;
                }
            }
            _ => {
                if !value_equal(doc_val, query_val) {
                    return false;
                }
            }
        }
    }
    true
}

fn match_or(doc: &Document, list: &[Value]) -> bool {
    for item in list {
        if let Value::Object(sub_query) = item {
            if matches(doc, sub_query) {
                return true;
            }
        }
    }
    false
}

fn match_and(doc: &Document, list: &[Value]) -> bool {
    for item in list {
        if let Value::Object(sub_query) = item {
            if !matches(doc, sub_query) {
                return false;
            }
        }
    }
    true
}

fn match_operators(doc_val: &Value, ops: &Document) -> bool {
    for (op, target) in ops {
        let ok = match op.as_str() {
            "$eq" => value_equal(doc_val, target),
            "$ne" => !value_equal(doc_val, target),
            "$gt" => compare(doc_val, target) == Ordering::Greater,
            "$gte" => compare(doc_val, target) != Ordering::Less,
            "$lt" => compare(doc_val, target) == Ordering::Less,
            "$lte" => compare(doc_val, target) != Ordering::Greater,
            _ => false,
        };
        if !ok {
            return false;
        }
    }
    true
}

fn value_equal(a: &Value, b: &Value) -> bool {
    if let (Some(fa), Some(fb)) = (to_f64(a), to_f64(b)) {
        return fa == fb;
    }
    repr(a) == repr(b)
}

fn compare(a: &Value, b: &Value) -> Ordering {
    if let (Some(fa), Some(fb)) = (to_f64(a), to_f64(b)) {
        return fa.partial_cmp(&fb).unwrap_or(Ordering::Equal);
    }
    repr(a).cmp(&repr(b))
}

fn to_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn repr(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_equality_default() {
        let d = doc(json!({"name": "ada", "age": 36}));

        assert!(matches(&d, &doc(json!({"name": "ada"}))));
        assert!(matches(&d, &doc(json!({"age": 36}))));
        assert!(matches(&d, &doc(json!({"age": 36.0}))));
        assert!(!matches(&d, &doc(json!({"name": "bob"}))));
        assert!(!matches(&d, &doc(json!({"missing": 1}))));
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let d = doc(json!({"k": 1}));
        assert!(matches(&d, &Document::new()));
    }

    #[test]
    fn test_comparison_operators() {
        let d = doc(json!({"k": 10}));

        assert!(matches(&d, &doc(json!({"k": {"$eq": 10}}))));
        assert!(matches(&d, &doc(json!({"k": {"$ne": 11}}))));
        assert!(matches(&d, &doc(json!({"k": {"$gt": 9}}))));
        assert!(!matches(&d, &doc(json!({"k": {"$gt": 10}}))));
        assert!(matches(&d, &doc(json!({"k": {"$gte": 10}}))));
        assert!(matches(&d, &doc(json!({"k": {"$lt": 11}}))));
        assert!(!matches(&d, &doc(json!({"k": {"$lt": 10}}))));
        assert!(matches(&d, &doc(json!({"k": {"$lte": 10}}))));
        assert!(matches(&d, &doc(json!({"k": {"$gt": 5, "$lt": 15}}))));
        assert!(!matches(&d, &doc(json!({"k": {"$gt": 5, "$lt": 10}}))));
    }

    #[test]
    fn test_unknown_operator_never_matches() {
        let d = doc(json!({"k": 10}));
        assert!(!matches(&d, &doc(json!({"k": {"$regex": "x"}}))));
    }

    #[test]
    fn test_string_comparison_fallback() {
        let d = doc(json!({"name": "carol"}));

        assert!(matches(&d, &doc(json!({"name": {"$gt": "bob"}}))));
        assert!(matches(&d, &doc(json!({"name": {"$lt": "dave"}}))));
    }

    #[test]
    fn test_logical_combinators() {
        let d = doc(json!({"k": 10, "name": "ada"}));

        assert!(matches(
            &d,
            &doc(json!({"$or": [{"k": 99}, {"name": "ada"}]}))
        ));
        assert!(!matches(
            &d,
            &doc(json!({"$or": [{"k": 99}, {"name": "bob"}]}))
        ));
        assert!(matches(
            &d,
            &doc(json!({"$and": [{"k": {"$gte": 10}}, {"name": "ada"}]}))
        ));
        assert!(!matches(
            &d,
            &doc(json!({"$and": [{"k": {"$gt": 10}}, {"name": "ada"}]}))
        ));
    }
}
