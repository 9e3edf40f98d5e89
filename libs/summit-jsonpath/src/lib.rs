//! Summit JsonPath - Minimal JSON Path Evaluator
//!
//! Extracts values from `serde_json::Value` trees using a deliberately
//! small expression grammar (no filters, no recursive descent):
//!
//! - `a.b.c` — object keys
//! - `a[0]` — array index, `a[-1]` counts from the end
//! - `a[*]` — wildcard over array elements
//! - mixed forms such as `sensors[0].reading.value`
//!
//! Lookups never panic: out-of-range indices and missing keys simply
//! produce no match.

mod error;
mod parser;
mod query;

// Re-export public API
pub use error::{PathError, Result};
pub use parser::{parse, validate, Segment};
pub use query::{get, get_bool, get_f64, get_i64, get_multi, get_string, query, QueryResult};
