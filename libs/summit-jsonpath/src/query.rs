//! Path evaluation over JSON trees

use crate::error::Result;
use crate::parser::{parse, Segment};
use serde_json::Value;

/// Result of [`query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Matched value; for wildcard expressions an array of all matches.
    pub value: Value,
    /// True when the expression contained a wildcard.
    pub is_array: bool,
    /// Number of leaf matches (0 when nothing matched).
    pub matched_count: usize,
}

fn resolve_index(arr: &[Value], idx: i64) -> Option<&Value> {
    if idx >= 0 {
        arr.get(idx as usize)
    } else {
        let back = idx.unsigned_abs() as usize;
        if back <= arr.len() {
            arr.get(arr.len() - back)
        } else {
            None
        }
    }
}

fn collect<'a>(node: &'a Value, segments: &[Segment], out: &mut Vec<&'a Value>) {
    let Some((seg, rest)) = segments.split_first() else {
        out.push(node);
        return;
    };
    match seg {
        Segment::Key(k) => {
            if let Some(child) = node.as_object().and_then(|o| o.get(k)) {
                collect(child, rest, out);
            }
        },
        Segment::Index(i) => {
            if let Some(child) = node.as_array().and_then(|a| resolve_index(a, *i)) {
                collect(child, rest, out);
            }
        },
        Segment::Wildcard => {
            if let Some(arr) = node.as_array() {
                for child in arr {
                    collect(child, rest, out);
                }
            }
        },
    }
}

/// Extract a single value (deep copy). Returns `None` on any miss:
/// unknown key, out-of-range index, or type mismatch along the path.
/// For wildcard expressions the matches are returned as an array.
pub fn get(root: &Value, expr: &str) -> Option<Value> {
    let segments = parse(expr).ok()?;
    let mut matches = Vec::new();
    collect(root, &segments, &mut matches);
    if segments.contains(&Segment::Wildcard) {
        if matches.is_empty() {
            None
        } else {
            Some(Value::Array(matches.into_iter().cloned().collect()))
        }
    } else {
        matches.first().map(|v| (*v).clone())
    }
}

/// Evaluate an expression and report match shape. A syntactically valid
/// expression that matches nothing is `Ok` with `matched_count == 0`.
pub fn query(root: &Value, expr: &str) -> Result<QueryResult> {
    let segments = parse(expr)?;
    let is_array = segments.contains(&Segment::Wildcard);
    let mut matches = Vec::new();
    collect(root, &segments, &mut matches);
    let matched_count = matches.len();
    let value = if is_array {
        Value::Array(matches.into_iter().cloned().collect())
    } else {
        matches.first().map(|v| (*v).clone()).unwrap_or(Value::Null)
    };
    Ok(QueryResult {
        value,
        is_array,
        matched_count,
    })
}

/// Batch extraction: one parse + walk per expression over a shared root.
pub fn get_multi(root: &Value, exprs: &[&str]) -> Vec<Option<Value>> {
    exprs.iter().map(|e| get(root, e)).collect()
}

/// Typed getter with default.
pub fn get_f64(root: &Value, expr: &str, default: f64) -> f64 {
    get(root, expr).and_then(|v| v.as_f64()).unwrap_or(default)
}

/// Typed getter with default.
pub fn get_i64(root: &Value, expr: &str, default: i64) -> i64 {
    get(root, expr).and_then(|v| v.as_i64()).unwrap_or(default)
}

/// Typed getter with default.
pub fn get_bool(root: &Value, expr: &str, default: bool) -> bool {
    get(root, expr).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// Typed getter with default.
pub fn get_string(root: &Value, expr: &str, default: &str) -> String {
    get(root, expr)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| default.to_string())
}
