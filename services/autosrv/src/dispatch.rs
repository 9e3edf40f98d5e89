//! Dispatch worker
//!
//! Triggered action arrays are handed to a dedicated worker task through
//! a bounded queue, so the evaluation tick never blocks on GPIO, SSH or
//! HTTP. A single worker runs each array to completion before taking the
//! next job, which keeps arrays from different rules from interleaving.

use crate::actions::{ActionCallback, ActionExecutor};
use crate::types::ActionSpec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One triggered rule's action array
pub struct DispatchJob {
    pub rule_id: String,
    pub actions: Vec<ActionSpec>,
    pub callback: Option<ActionCallback>,
}

/// Queue counters
#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub dropped: u64,
}

/// Handle for enqueueing jobs and shutting the worker down.
pub struct Dispatcher {
    tx: mpsc::Sender<DispatchJob>,
    enqueued: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    /// Spawn the worker. `timeout_ms` bounds each array's total run time;
    /// on expiry the remainder of that array is abandoned.
    pub fn start(executor: Arc<ActionExecutor>, queue_size: usize, timeout_ms: u64) -> Self {
        let (tx, mut rx) = mpsc::channel::<DispatchJob>(queue_size.max(1));
        let deadline = Duration::from_millis(timeout_ms);

        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                debug!(rule_id = %job.rule_id, actions = job.actions.len(), "dispatching");
                let run = executor.execute_array(&job.rule_id, &job.actions, job.callback.as_ref());
                match tokio::time::timeout(deadline, run).await {
                    Ok(results) => {
                        let failed = results.iter().filter(|r| !r.success).count();
                        if failed > 0 {
                            warn!(
                                rule_id = %job.rule_id,
                                failed,
                                total = results.len(),
                                "action array completed with failures"
                            );
                        }
                    },
                    Err(_) => {
                        error!(
                            rule_id = %job.rule_id,
                            timeout_ms,
                            "action array exceeded dispatch deadline, abandoned"
                        );
                    },
                }
            }
            info!("dispatch worker stopped");
        });

        Self {
            tx,
            enqueued: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            worker,
        }
    }

    /// Non-blocking enqueue. A full queue drops the trigger (the tick
    /// thread must never wait on slow actions).
    pub fn enqueue(&self, job: DispatchJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            },
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(rule_id = %job.rule_id, "dispatch queue full, trigger dropped");
                false
            },
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(rule_id = %job.rule_id, "dispatch worker gone, trigger dropped");
                false
            },
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Close the queue and wait for in-flight work to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!("dispatch worker join error: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sim::SimBackend;
    use crate::types::Action;
    use summit_vars::{Value, VarStore};

    fn executor(vars: Arc<VarStore>) -> Arc<ActionExecutor> {
        Arc::new(ActionExecutor::with_sim(vars, Arc::new(SimBackend::new())))
    }

    fn set_var_job(rule_id: &str, variable: &str, value: i64, delay_ms: u64) -> DispatchJob {
        DispatchJob {
            rule_id: rule_id.to_string(),
            actions: vec![ActionSpec {
                delay_ms,
                action: Action::SetVariable {
                    variable: variable.to_string(),
                    value: Value::Int(value),
                },
            }],
            callback: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_run() {
        let vars = Arc::new(VarStore::new());
        let dispatcher = Dispatcher::start(executor(vars.clone()), 8, 1000);
        assert!(dispatcher.enqueue(set_var_job("r1", "x", 1, 0)));
        assert!(dispatcher.enqueue(set_var_job("r2", "y", 2, 0)));
        dispatcher.shutdown().await;
        assert_eq!(vars.get("x").unwrap(), Value::Int(1));
        assert_eq!(vars.get("y").unwrap(), Value::Int(2));
    }

    #[tokio::test]
    async fn test_full_queue_drops_trigger() {
        let vars = Arc::new(VarStore::new());
        // queue of 1 with a slow job in flight
        let dispatcher = Dispatcher::start(executor(vars.clone()), 1, 5000);
        dispatcher.enqueue(set_var_job("slow", "a", 1, 200));
        dispatcher.enqueue(set_var_job("q1", "b", 2, 200));
        // worker busy, queue holds one, next must drop
        let mut dropped = false;
        for i in 0..8 {
            if !dispatcher.enqueue(set_var_job("burst", "c", i, 0)) {
                dropped = true;
                break;
            }
        }
        assert!(dropped);
        assert!(dispatcher.stats().dropped >= 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_deadline_abandons_array() {
        let vars = Arc::new(VarStore::new());
        let dispatcher = Dispatcher::start(executor(vars.clone()), 4, 50);
        // delay beyond the deadline, then a write that must not happen
        dispatcher.enqueue(set_var_job("r", "late", 1, 500));
        // a later job still runs
        dispatcher.enqueue(set_var_job("r2", "ok", 1, 0));
        dispatcher.shutdown().await;
        assert!(vars.get("late").is_err());
        assert_eq!(vars.get("ok").unwrap(), Value::Int(1));
    }
}
