//! Rule table
//!
//! A single mutex guards the whole table. The lock is scoped strictly to
//! table access; callers must never hold it across condition evaluation
//! or action dispatch. Registration order is the only ordering the
//! engine guarantees across rules.

use crate::error::{EngineError, Result};
use crate::types::Rule;
use parking_lot::Mutex;
use tracing::{debug, info};

pub const DEFAULT_MAX_RULES: usize = 32;

/// Fixed-capacity rule table.
pub struct RuleStore {
    rules: Mutex<Vec<Rule>>,
    capacity: usize,
}

impl RuleStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a rule, replacing any existing rule with the same id in
    /// place. The swap happens as one assignment under the lock, so
    /// concurrent readers see either the old rule or the new one, never
    /// a mix. Runtime counters start fresh. Returns true on replace.
    pub fn register(&self, mut rule: Rule) -> Result<bool> {
        rule.normalize()?;
        rule.last_trigger_ms = 0;
        rule.trigger_count = 0;

        let mut rules = self.rules.lock();
        if let Some(slot) = rules.iter_mut().find(|r| r.id == rule.id) {
            info!(rule_id = %rule.id, "rule replaced");
            *slot = rule;
            return Ok(true);
        }
        if rules.len() >= self.capacity {
            return Err(EngineError::ResourceExhausted(format!(
                "rule table full ({} rules)",
                self.capacity
            )));
        }
        info!(rule_id = %rule.id, enabled = rule.enabled, "rule registered");
        rules.push(rule);
        Ok(false)
    }

    pub fn unregister(&self, id: &str) -> Result<()> {
        let mut rules = self.rules.lock();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        if rules.len() == before {
            return Err(EngineError::NotFound(format!("rule '{}'", id)));
        }
        debug!(rule_id = id, "rule unregistered");
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut rules = self.rules.lock();
        let rule = rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("rule '{}'", id)))?;
        rule.enabled = enabled;
        info!(rule_id = id, enabled, "rule enable state changed");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Rule> {
        self.rules
            .lock()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("rule '{}'", id)))
    }

    /// Clone of the whole table in registration order.
    pub fn list(&self) -> Vec<Rule> {
        self.rules.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.rules.lock().len()
    }

    /// Ids in registration order; the evaluation pass iterates over this
    /// snapshot so the lock is not held across evaluations.
    pub fn snapshot_ids(&self) -> Vec<String> {
        self.rules.lock().iter().map(|r| r.id.clone()).collect()
    }

    /// Record a trigger: bump the counter and stamp `last_trigger_ms`.
    pub fn record_trigger(&self, id: &str, now_ms: i64) {
        let mut rules = self.rules.lock();
        if let Some(rule) = rules.iter_mut().find(|r| r.id == id) {
            rule.last_trigger_ms = now_ms;
            rule.trigger_count += 1;
        }
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RULES)
    }
}
