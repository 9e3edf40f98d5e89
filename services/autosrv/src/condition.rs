//! Condition evaluation
//!
//! Comparison is tri-state: values of incompatible shapes (string vs
//! number) are incomparable rather than an error. `ne` is the exact
//! negation of `eq`, so incomparable values are always "not equal".

use crate::types::{CompareOp, Condition, ConditionGroup, LogicOp};
use dashmap::DashMap;
use std::cmp::Ordering;
use std::sync::Arc;
use summit_vars::{Value, VarStore};
use tracing::{trace, warn};

/// Tolerance for float comparisons. Telemetry values pass through JSON
/// and f32 hardware registers, so exact equality is meaningless.
const FLOAT_EPSILON: f64 = 1e-4;

/// Compare two values.
///
/// - same tag: natural order (strings byte-lexicographic, bools
///   false < true, ints exact, floats within [`FLOAT_EPSILON`])
/// - numeric/bool mix: both widened to f64 (bool -> 0/1)
/// - string vs non-string: `None` (incomparable)
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
        (Value::Str(_), _) | (_, Value::Str(_)) => None,
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => {
            // at least one float in a numeric/bool mix
            let x = a.as_number()?;
            let y = b.as_number()?;
            if (x - y).abs() < FLOAT_EPSILON {
                Some(Ordering::Equal)
            } else if x < y {
                Some(Ordering::Less)
            } else {
                Some(Ordering::Greater)
            }
        },
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal)
}

/// Evaluates condition groups against the variable store.
///
/// Keeps the previous sample per (rule id, condition index) so `changed`
/// and `changed_to` can detect edges across evaluations.
pub struct ConditionEvaluator {
    vars: Arc<VarStore>,
    last_samples: DashMap<(String, usize), Value>,
}

impl ConditionEvaluator {
    pub fn new(vars: Arc<VarStore>) -> Self {
        Self {
            vars,
            last_samples: DashMap::new(),
        }
    }

    /// Evaluate a rule's condition group. An empty group is vacuously
    /// true under both operators.
    ///
    /// `changed`/`changed_to` conditions resample on every pass, even
    /// once the group's outcome is already decided. Skipping them would
    /// leave their last-seen value stale, and a long-past edge would
    /// fire the moment an earlier condition flips.
    pub fn evaluate_group(&self, rule_id: &str, group: &ConditionGroup) -> bool {
        if group.conditions.is_empty() {
            return true;
        }
        let mut decided = None;
        for (idx, cond) in group.conditions.iter().enumerate() {
            let is_edge = matches!(cond.op, CompareOp::Changed | CompareOp::ChangedTo);
            if decided.is_some() && !is_edge {
                continue;
            }
            let hit = self.evaluate_condition(rule_id, idx, cond);
            if decided.is_some() {
                continue;
            }
            match group.logic {
                LogicOp::And if !hit => {
                    trace!(rule_id, idx, "AND group decided false");
                    decided = Some(false);
                },
                LogicOp::Or if hit => {
                    trace!(rule_id, idx, "OR group decided true");
                    decided = Some(true);
                },
                _ => {},
            }
        }
        decided.unwrap_or(group.logic == LogicOp::And)
    }

    fn evaluate_condition(&self, rule_id: &str, idx: usize, cond: &Condition) -> bool {
        let current = match self.vars.get(&cond.variable) {
            Ok(v) => v,
            Err(_) => {
                warn!(
                    rule_id,
                    variable = %cond.variable,
                    "condition references unknown variable"
                );
                return false;
            },
        };

        match cond.op {
            CompareOp::Changed | CompareOp::ChangedTo => {
                self.evaluate_edge(rule_id, idx, cond, current)
            },
            op => {
                let Some(literal) = cond.value.as_ref() else {
                    // normalize() rejects this at registration; a rule
                    // injected another way still must not panic
                    warn!(rule_id, idx, "condition missing literal");
                    return false;
                };
                match op {
                    CompareOp::Eq => values_equal(&current, literal),
                    CompareOp::Ne => !values_equal(&current, literal),
                    CompareOp::Lt => {
                        compare_values(&current, literal) == Some(Ordering::Less)
                    },
                    CompareOp::Le => matches!(
                        compare_values(&current, literal),
                        Some(Ordering::Less) | Some(Ordering::Equal)
                    ),
                    CompareOp::Gt => {
                        compare_values(&current, literal) == Some(Ordering::Greater)
                    },
                    CompareOp::Ge => matches!(
                        compare_values(&current, literal),
                        Some(Ordering::Greater) | Some(Ordering::Equal)
                    ),
                    CompareOp::Contains => match (&current, literal) {
                        (Value::Str(haystack), Value::Str(needle)) => {
                            haystack.contains(needle.as_str())
                        },
                        _ => false,
                    },
                    CompareOp::Changed | CompareOp::ChangedTo => unreachable!(),
                }
            },
        }
    }

    /// Edge detection: the first observation only records the sample.
    fn evaluate_edge(&self, rule_id: &str, idx: usize, cond: &Condition, current: Value) -> bool {
        let key = (rule_id.to_string(), idx);
        let previous = self.last_samples.insert(key, current.clone());
        let Some(previous) = previous else {
            return false;
        };
        let changed = !values_equal(&previous, &current);
        match cond.op {
            CompareOp::Changed => changed,
            CompareOp::ChangedTo => {
                changed
                    && cond
                        .value
                        .as_ref()
                        .map(|lit| values_equal(&current, lit))
                        .unwrap_or(false)
            },
            _ => unreachable!(),
        }
    }

    /// Drop edge-detection state for a rule. Called when the rule is
    /// unregistered or replaced so a new definition starts fresh.
    pub fn forget_rule(&self, rule_id: &str) {
        self.last_samples.retain(|(id, _), _| id != rule_id);
    }
}
