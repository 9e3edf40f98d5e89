//! Data source manager
//!
//! REST sources are polled from the evaluation tick; push sources own a
//! spawned connection task each and publish their state through a shared
//! handle, so the tick never blocks on a socket. A failed fetch keeps the
//! previously mapped variables untouched: stale-but-valid readings beat
//! holes in the namespace.

use crate::error::{EngineError, Result};
use crate::push::{spawn_push_task, PushShared};
use crate::types::{ConnectionState, DataSource, FieldMapping, SourceKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use summit_vars::{Value, VarStore};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_SOURCES: usize = 16;
const REST_TIMEOUT_SECS: u64 = 10;

/// Extract every mapping from a payload into the variable store.
/// Non-scalar matches are skipped. Returns the number of variables set.
pub(crate) fn apply_mappings(
    vars: &VarStore,
    source_id: &str,
    mappings: &[FieldMapping],
    payload: &serde_json::Value,
    now_ms: i64,
) -> usize {
    let mut applied = 0;
    for mapping in mappings {
        let Some(json) = summit_jsonpath::get(payload, &mapping.path) else {
            debug!(source_id, path = %mapping.path, "no match in payload");
            continue;
        };
        let Some(value) = Value::from_json(&json) else {
            debug!(
                source_id,
                path = %mapping.path,
                "non-scalar match skipped"
            );
            continue;
        };
        if vars.set(&mapping.variable, value, now_ms).is_ok() {
            applied += 1;
        }
    }
    applied
}

struct SourceEntry {
    config: DataSource,
    next_due_ms: i64,
    state: ConnectionState,
    total_polls: u64,
    successful_polls: u64,
    failed_polls: u64,
    last_update_ms: i64,
    push: Option<Arc<PushShared>>,
}

impl SourceEntry {
    fn stop_push(&mut self) {
        if let Some(shared) = self.push.take() {
            shared.stop();
        }
    }
}

/// Point-in-time view of a source, for the management API.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    #[serde(flatten)]
    pub config: DataSource,
    pub state: ConnectionState,
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub frames_received: u64,
    pub last_update_ms: i64,
}

/// Fixed-capacity source table plus the REST polling loop body.
pub struct SourceManager {
    vars: Arc<VarStore>,
    sources: Mutex<Vec<SourceEntry>>,
    capacity: usize,
    http_client: reqwest::Client,
}

impl SourceManager {
    pub fn new(vars: Arc<VarStore>, capacity: usize) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            vars,
            sources: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            http_client,
        }
    }

    /// Register a source, replacing an existing one with the same id
    /// (its push task is stopped first). Push sources that are enabled
    /// get their connection task spawned immediately.
    pub fn register(&self, config: DataSource) -> Result<bool> {
        config.normalize()?;

        let push = if config.enabled && config.kind != SourceKind::RestPoll {
            let shared = Arc::new(PushShared::new());
            spawn_push_task(config.clone(), self.vars.clone(), shared.clone());
            Some(shared)
        } else {
            None
        };
        let entry = SourceEntry {
            next_due_ms: 0,
            state: if push.is_some() {
                ConnectionState::Connecting
            } else {
                ConnectionState::Idle
            },
            total_polls: 0,
            successful_polls: 0,
            failed_polls: 0,
            last_update_ms: 0,
            push,
            config,
        };

        let mut sources = self.sources.lock();
        if let Some(slot) = sources.iter_mut().find(|s| s.config.id == entry.config.id) {
            slot.stop_push();
            info!(source_id = %entry.config.id, "source replaced");
            *slot = entry;
            return Ok(true);
        }
        if sources.len() >= self.capacity {
            if let Some(shared) = entry.push {
                shared.stop();
            }
            return Err(EngineError::ResourceExhausted(format!(
                "source table full ({} sources)",
                self.capacity
            )));
        }
        info!(source_id = %entry.config.id, kind = ?entry.config.kind, "source registered");
        sources.push(entry);
        Ok(false)
    }

    pub fn unregister(&self, id: &str) -> Result<()> {
        let mut sources = self.sources.lock();
        let pos = sources
            .iter()
            .position(|s| s.config.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("source '{}'", id)))?;
        sources[pos].stop_push();
        sources.remove(pos);
        debug!(source_id = id, "source unregistered");
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut sources = self.sources.lock();
        let entry = sources
            .iter_mut()
            .find(|s| s.config.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("source '{}'", id)))?;
        if entry.config.enabled == enabled {
            return Ok(());
        }
        entry.config.enabled = enabled;
        match entry.config.kind {
            SourceKind::RestPoll => {
                entry.next_due_ms = 0;
                entry.state = ConnectionState::Idle;
            },
            _ => {
                if enabled {
                    let shared = Arc::new(PushShared::new());
                    spawn_push_task(entry.config.clone(), self.vars.clone(), shared.clone());
                    entry.push = Some(shared);
                    entry.state = ConnectionState::Connecting;
                } else {
                    entry.stop_push();
                    entry.state = ConnectionState::Disconnected;
                }
            },
        }
        info!(source_id = id, enabled, "source enable state changed");
        Ok(())
    }

    pub fn list(&self) -> Vec<SourceStatus> {
        self.sources.lock().iter().map(Self::status_of).collect()
    }

    pub fn get(&self, id: &str) -> Result<SourceStatus> {
        self.sources
            .lock()
            .iter()
            .find(|s| s.config.id == id)
            .map(Self::status_of)
            .ok_or_else(|| EngineError::NotFound(format!("source '{}'", id)))
    }

    pub fn count(&self) -> usize {
        self.sources.lock().len()
    }

    fn status_of(entry: &SourceEntry) -> SourceStatus {
        let (state, frames, push_update) = match &entry.push {
            Some(shared) => (
                shared.state(),
                shared.frames_received.load(Ordering::Relaxed),
                shared.last_update_ms.load(Ordering::Relaxed),
            ),
            None => (entry.state, 0, 0),
        };
        SourceStatus {
            config: entry.config.clone(),
            state,
            total_polls: entry.total_polls,
            successful_polls: entry.successful_polls,
            failed_polls: entry.failed_polls,
            frames_received: frames,
            last_update_ms: entry.last_update_ms.max(push_update),
        }
    }

    /// Poll every enabled REST source whose deadline has passed. The
    /// table lock is dropped before any network I/O.
    pub async fn poll_all(&self, now_ms: i64) -> usize {
        let due: Vec<DataSource> = {
            let mut sources = self.sources.lock();
            sources
                .iter_mut()
                .filter(|s| {
                    s.config.enabled
                        && s.config.kind == SourceKind::RestPoll
                        && s.next_due_ms <= now_ms
                })
                .map(|s| {
                    // advance before fetching so a slow endpoint cannot
                    // cause a tight retry loop
                    s.next_due_ms = now_ms + s.config.poll_interval_ms as i64;
                    s.total_polls += 1;
                    s.config.clone()
                })
                .collect()
        };

        let mut polled = 0;
        for config in due {
            let outcome = self.fetch_and_map(&config, now_ms).await;
            let mut sources = self.sources.lock();
            if let Some(entry) = sources.iter_mut().find(|s| s.config.id == config.id) {
                match outcome {
                    Ok(applied) => {
                        entry.successful_polls += 1;
                        entry.last_update_ms = now_ms;
                        entry.state = ConnectionState::Connected;
                        debug!(source_id = %config.id, applied, "poll ok");
                    },
                    Err(ref err) => {
                        entry.failed_polls += 1;
                        entry.state = ConnectionState::Error;
                        warn!(source_id = %config.id, error = %err, "poll failed, keeping stale values");
                    },
                }
            }
            polled += 1;
        }
        polled
    }

    async fn fetch_and_map(&self, config: &DataSource, now_ms: i64) -> Result<usize> {
        let response = self.http_client.get(&config.endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Transport(format!(
                "{} returned HTTP {}",
                config.endpoint,
                status.as_u16()
            )));
        }
        let payload: serde_json::Value = response.json().await?;
        Ok(apply_mappings(
            &self.vars,
            &config.id,
            &config.mappings,
            &payload,
            now_ms,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rest_source(id: &str, interval: u64) -> DataSource {
        DataSource {
            id: id.to_string(),
            kind: SourceKind::RestPoll,
            endpoint: "http://127.0.0.1:1/metrics".to_string(),
            poll_interval_ms: interval,
            reconnect_ms: 5000,
            event: None,
            enabled: true,
            mappings: vec![FieldMapping {
                path: "cpu.load".to_string(),
                variable: "cpu_load_pct".to_string(),
            }],
        }
    }

    #[test]
    fn test_apply_mappings_scalars_only() {
        let vars = VarStore::new();
        let mappings = vec![
            FieldMapping {
                path: "cpu.load".into(),
                variable: "cpu_load_pct".into(),
            },
            FieldMapping {
                path: "cpu".into(), // object, skipped
                variable: "cpu_blob".into(),
            },
            FieldMapping {
                path: "missing".into(),
                variable: "nope".into(),
            },
        ];
        let payload = json!({ "cpu": { "load": 62.5 } });
        let applied = apply_mappings(&vars, "s", &mappings, &payload, 100);
        assert_eq!(applied, 1);
        assert_eq!(vars.get("cpu_load_pct").unwrap(), Value::Float(62.5));
        assert!(vars.get("cpu_blob").is_err());
    }

    #[test]
    fn test_register_replace_and_capacity() {
        let vars = Arc::new(VarStore::new());
        let mgr = SourceManager::new(vars, 2);
        assert!(!mgr.register(rest_source("a", 1000)).unwrap());
        assert!(mgr.register(rest_source("a", 2000)).unwrap());
        assert!(!mgr.register(rest_source("b", 1000)).unwrap());
        assert!(matches!(
            mgr.register(rest_source("c", 1000)),
            Err(EngineError::ResourceExhausted(_))
        ));
        assert_eq!(mgr.count(), 2);
        assert_eq!(mgr.get("a").unwrap().config.poll_interval_ms, 2000);
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_stale_values() {
        let vars = Arc::new(VarStore::new());
        vars.set("cpu_load_pct", Value::Float(10.0), 0).unwrap();
        // port 1 refuses connections
        let mgr = SourceManager::new(vars.clone(), 4);
        mgr.register(rest_source("a", 1000)).unwrap();

        assert_eq!(mgr.poll_all(0).await, 1);
        let status = mgr.get("a").unwrap();
        assert_eq!(status.failed_polls, 1);
        assert_eq!(status.state, ConnectionState::Error);
        // stale value survives
        assert_eq!(vars.get("cpu_load_pct").unwrap(), Value::Float(10.0));
    }

    #[tokio::test]
    async fn test_poll_due_selection() {
        let vars = Arc::new(VarStore::new());
        let mgr = SourceManager::new(vars, 4);
        mgr.register(rest_source("a", 1000)).unwrap();

        assert_eq!(mgr.poll_all(0).await, 1);
        // not due again until t=1000
        assert_eq!(mgr.poll_all(500).await, 0);
        assert_eq!(mgr.poll_all(1000).await, 1);

        // disabled sources are never due
        mgr.set_enabled("a", false).unwrap();
        assert_eq!(mgr.poll_all(10_000).await, 0);
    }
}
