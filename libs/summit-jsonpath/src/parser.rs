//! Path expression parser
//!
//! Expressions are parsed once into a segment list; evaluation walks the
//! segments against a JSON tree.

use crate::error::{PathError, Result};

/// One step of a parsed path expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Object key lookup (`a` in `a.b`)
    Key(String),
    /// Array index; negative counts from the end (`[-1]` is the last element)
    Index(i64),
    /// All elements of an array (`[*]`)
    Wildcard,
}

/// Parse a path expression into segments.
pub fn parse(expr: &str) -> Result<Vec<Segment>> {
    if expr.is_empty() {
        return Err(PathError::syntax(expr, "empty expression"));
    }

    let mut segments = Vec::new();
    for part in expr.split('.') {
        if part.is_empty() {
            return Err(PathError::syntax(expr, "empty key (consecutive dots)"));
        }
        let (key, brackets) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            if key.contains(']') {
                return Err(PathError::syntax(expr, "']' outside brackets"));
            }
            segments.push(Segment::Key(key.to_string()));
        } else if brackets.is_empty() {
            return Err(PathError::syntax(expr, "missing key"));
        }

        let mut rest = brackets;
        while !rest.is_empty() {
            if !rest.starts_with('[') {
                return Err(PathError::syntax(expr, "expected '['"));
            }
            let close = rest
                .find(']')
                .ok_or_else(|| PathError::syntax(expr, "unterminated '['"))?;
            let inner = &rest[1..close];
            if inner == "*" {
                segments.push(Segment::Wildcard);
            } else {
                let idx: i64 = inner
                    .parse()
                    .map_err(|_| PathError::syntax(expr, format!("bad index '{}'", inner)))?;
                segments.push(Segment::Index(idx));
            }
            rest = &rest[close + 1..];
        }
    }

    if segments.is_empty() {
        return Err(PathError::syntax(expr, "no segments"));
    }
    Ok(segments)
}

/// Check expression syntax without evaluating it.
pub fn validate(expr: &str) -> bool {
    parse(expr).is_ok()
}
