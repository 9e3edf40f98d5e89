//! In-memory variable store
//!
//! Uses DashMap for lock-free concurrent access. Every write is a
//! create-or-overwrite with per-call atomicity; there are no transactions
//! and no cross-variable consistency guarantees.

use crate::error::{Result, VarError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use dashmap::DashMap;

/// A named variable with its last update timestamp (epoch milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: Value,
    pub last_update_ms: i64,
}

/// Statistics about store usage
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub variable_count: usize,
    pub total_writes: u64,
}

/// Flat-namespace variable store shared by data sources, the rule engine
/// and the action dispatcher.
pub struct VarStore {
    vars: Arc<DashMap<String, Variable>>,
    total_writes: std::sync::atomic::AtomicU64,
}

impl VarStore {
    pub fn new() -> Self {
        Self {
            vars: Arc::new(DashMap::new()),
            total_writes: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Get a variable's current value.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.vars
            .get(name)
            .map(|v| v.value.clone())
            .ok_or_else(|| VarError::NotFound(name.to_string()))
    }

    /// Get the full variable record including its update timestamp.
    pub fn get_var(&self, name: &str) -> Result<Variable> {
        self.vars
            .get(name)
            .map(|v| v.clone())
            .ok_or_else(|| VarError::NotFound(name.to_string()))
    }

    /// Create or overwrite a variable. The tag may change freely; last
    /// writer wins. Oversized strings are truncated.
    pub fn set(&self, name: &str, value: Value, now_ms: i64) -> Result<()> {
        if name.is_empty() {
            return Err(VarError::Invalid("empty variable name".to_string()));
        }
        let value = value.bounded();
        self.vars.insert(
            name.to_string(),
            Variable {
                name: name.to_string(),
                value,
                last_update_ms: now_ms,
            },
        );
        self.total_writes
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Remove a variable. Returns true if it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Snapshot of all variable names (unordered).
    pub fn names(&self) -> Vec<String> {
        self.vars.iter().map(|e| e.key().clone()).collect()
    }

    /// Point-in-time copy of all variables (unordered).
    pub fn entries(&self) -> Vec<Variable> {
        self.vars.iter().map(|e| e.value().clone()).collect()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        self.vars.clear();
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            variable_count: self.vars.len(),
            total_writes: self
                .total_writes
                .load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    /// Write a point-in-time JSON snapshot of the store. Best-effort
    /// persistence: the file is fully rewritten, not appended.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let mut entries = self.entries();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let json = serde_json::to_string_pretty(&entries)?;
        std::fs::write(path.as_ref(), json)?;
        debug!(count = entries.len(), "variable snapshot saved");
        Ok(entries.len())
    }

    /// Load a snapshot produced by [`save_snapshot`]. Existing variables
    /// with the same names are overwritten; timestamps are reset to
    /// `now_ms` since the stored ones predate this process. A missing
    /// file is not an error (fresh boot).
    pub fn load_snapshot<P: AsRef<Path>>(&self, path: P, now_ms: i64) -> Result<usize> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no variable snapshot found");
            return Ok(0);
        }
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<Variable> = serde_json::from_str(&raw)?;
        let mut loaded = 0;
        for entry in entries {
            if entry.name.is_empty() {
                warn!("skipping snapshot entry with empty name");
                continue;
            }
            self.set(&entry.name, entry.value, now_ms)?;
            loaded += 1;
        }
        debug!(count = loaded, "variable snapshot loaded");
        Ok(loaded)
    }
}

impl Default for VarStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_overwrite() {
        let store = VarStore::new();
        store.set("cpu.temp", Value::Float(41.5), 1000).unwrap();
        assert_eq!(store.get("cpu.temp").unwrap(), Value::Float(41.5));

        // tag change on overwrite is allowed
        store.set("cpu.temp", Value::Str("hot".into()), 2000).unwrap();
        let var = store.get_var("cpu.temp").unwrap();
        assert_eq!(var.value, Value::Str("hot".to_string()));
        assert_eq!(var.last_update_ms, 2000);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let store = VarStore::new();
        assert!(matches!(store.get("nope"), Err(VarError::NotFound(_))));
    }

    #[test]
    fn test_empty_name_rejected() {
        let store = VarStore::new();
        assert!(matches!(
            store.set("", Value::Int(1), 0),
            Err(VarError::Invalid(_))
        ));
    }

    #[test]
    fn test_remove_and_contains() {
        let store = VarStore::new();
        store.set("a", Value::Int(1), 0).unwrap();
        assert!(store.contains("a"));
        assert!(store.remove("a"));
        assert!(!store.contains("a"));
        assert!(!store.remove("a"));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let store = VarStore::new();
        store.set("fan.speed", Value::Int(1200), 10).unwrap();
        store.set("mode", Value::Str("auto".into()), 20).unwrap();
        store.set("alarm", Value::Bool(false), 30).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.json");
        assert_eq!(store.save_snapshot(&path).unwrap(), 3);

        let restored = VarStore::new();
        assert_eq!(restored.load_snapshot(&path, 99).unwrap(), 3);
        assert_eq!(restored.get("fan.speed").unwrap(), Value::Int(1200));
        assert_eq!(restored.get("mode").unwrap(), Value::Str("auto".into()));
        assert_eq!(restored.get_var("alarm").unwrap().last_update_ms, 99);
    }

    #[test]
    fn test_load_missing_snapshot_is_fresh_boot() {
        let store = VarStore::new();
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(store.load_snapshot(dir.path().join("none.json"), 0).unwrap(), 0);
        assert!(store.is_empty());
    }
}
