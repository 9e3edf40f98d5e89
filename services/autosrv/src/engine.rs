//! Automation engine and evaluation scheduler
//!
//! The engine is an owned object wired together in `main` (or a test);
//! there is no global instance. Time is injected: `tick`, `evaluate` and
//! `evaluate_all` take `now_ms` from the caller, which keeps every
//! cooldown and polling decision reproducible under test.

use crate::actions::{ActionExecutor, ExecutorStats};
use crate::condition::ConditionEvaluator;
use crate::dispatch::{DispatchJob, DispatchStats, Dispatcher};
use crate::error::{EngineError, Result};
use crate::sources::{SourceManager, SourceStatus, DEFAULT_MAX_SOURCES};
use crate::store::{RuleStore, DEFAULT_MAX_RULES};
use crate::types::{DataSource, Rule};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use summit_vars::VarStore;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TICK_MS: u64 = 1000;
pub const DEFAULT_QUEUE_SIZE: usize = 64;
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 30_000;

/// Sizing knobs, usually taken from the service config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_rules: usize,
    pub max_sources: usize,
    pub action_queue_size: usize,
    pub dispatch_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_rules: DEFAULT_MAX_RULES,
            max_sources: DEFAULT_MAX_SOURCES,
            action_queue_size: DEFAULT_QUEUE_SIZE,
            dispatch_timeout_ms: DEFAULT_DISPATCH_TIMEOUT_MS,
        }
    }
}

/// Counters exposed via the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub rule_count: usize,
    pub source_count: usize,
    pub variable_count: usize,
    pub total_evaluations: u64,
    pub total_triggers: u64,
    pub last_evaluation_ms: i64,
    pub executor: ExecutorStats,
    pub dispatch: DispatchStats,
}

/// The automation engine: variable store, rule table, evaluator, source
/// manager and dispatch worker behind one object.
pub struct AutomationEngine {
    vars: Arc<VarStore>,
    rules: RuleStore,
    evaluator: ConditionEvaluator,
    executor: Arc<ActionExecutor>,
    sources: SourceManager,
    dispatcher: Mutex<Option<Dispatcher>>,
    total_evaluations: AtomicU64,
    total_triggers: AtomicU64,
    last_evaluation_ms: AtomicI64,
}

impl AutomationEngine {
    pub fn new(
        vars: Arc<VarStore>,
        executor: Arc<ActionExecutor>,
        settings: EngineSettings,
    ) -> Self {
        let dispatcher = Dispatcher::start(
            executor.clone(),
            settings.action_queue_size,
            settings.dispatch_timeout_ms,
        );
        Self {
            rules: RuleStore::new(settings.max_rules),
            evaluator: ConditionEvaluator::new(vars.clone()),
            sources: SourceManager::new(vars.clone(), settings.max_sources),
            vars,
            executor,
            dispatcher: Mutex::new(Some(dispatcher)),
            total_evaluations: AtomicU64::new(0),
            total_triggers: AtomicU64::new(0),
            last_evaluation_ms: AtomicI64::new(0),
        }
    }

    pub fn vars(&self) -> &Arc<VarStore> {
        &self.vars
    }

    // Rule management. Replacement and removal drop the evaluator's
    // edge-detection state so a redefined rule starts fresh.

    pub fn register_rule(&self, rule: Rule) -> Result<bool> {
        let id = rule.id.clone();
        let replaced = self.rules.register(rule)?;
        if replaced {
            self.evaluator.forget_rule(&id);
        }
        Ok(replaced)
    }

    pub fn unregister_rule(&self, id: &str) -> Result<()> {
        self.rules.unregister(id)?;
        self.evaluator.forget_rule(id);
        Ok(())
    }

    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.rules.set_enabled(id, enabled)
    }

    pub fn get_rule(&self, id: &str) -> Result<Rule> {
        self.rules.get(id)
    }

    pub fn list_rules(&self) -> Vec<Rule> {
        self.rules.list()
    }

    // Source management

    pub fn register_source(&self, source: DataSource) -> Result<bool> {
        self.sources.register(source)
    }

    pub fn unregister_source(&self, id: &str) -> Result<()> {
        self.sources.unregister(id)
    }

    pub fn set_source_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.sources.set_enabled(id, enabled)
    }

    pub fn get_source(&self, id: &str) -> Result<SourceStatus> {
        self.sources.get(id)
    }

    pub fn list_sources(&self) -> Vec<SourceStatus> {
        self.sources.list()
    }

    /// Register rule and source definitions from configuration at boot.
    /// A rejected definition is logged and skipped so one bad entry does
    /// not block bring-up. Returns (rules, sources) registered.
    pub fn load_definitions(
        &self,
        rules: Vec<Rule>,
        sources: Vec<DataSource>,
    ) -> (usize, usize) {
        let mut rules_ok = 0;
        for rule in rules {
            let id = rule.id.clone();
            match self.register_rule(rule) {
                Ok(_) => rules_ok += 1,
                Err(err) => warn!(rule_id = %id, error = %err, "configured rule rejected"),
            }
        }
        let mut sources_ok = 0;
        for source in sources {
            let id = source.id.clone();
            match self.register_source(source) {
                Ok(_) => sources_ok += 1,
                Err(err) => warn!(source_id = %id, error = %err, "configured source rejected"),
            }
        }
        (rules_ok, sources_ok)
    }

    /// Evaluate one rule. Returns true when it triggered. The rule table
    /// lock is released before conditions are evaluated; the action
    /// array goes to the dispatch worker, never run inline.
    pub fn evaluate(&self, rule_id: &str, now_ms: i64) -> Result<bool> {
        let rule = self.rules.get(rule_id)?;
        self.total_evaluations.fetch_add(1, Ordering::Relaxed);
        self.last_evaluation_ms.store(now_ms, Ordering::Relaxed);

        if !rule.enabled {
            return Ok(false);
        }
        // a rule that has never triggered is never in cooldown
        if rule.cooldown_ms > 0
            && rule.last_trigger_ms > 0
            && now_ms - rule.last_trigger_ms < rule.cooldown_ms as i64
        {
            debug!(rule_id, "in cooldown, skipped");
            return Ok(false);
        }
        if !self.evaluator.evaluate_group(rule_id, &rule.conditions) {
            return Ok(false);
        }

        info!(rule_id, "rule triggered");
        Ok(self.fire(&rule, now_ms))
    }

    /// Evaluate every rule in registration order against a snapshot of
    /// ids. Rules removed mid-pass are skipped. Returns the trigger count.
    pub fn evaluate_all(&self, now_ms: i64) -> usize {
        let mut triggered = 0;
        for id in self.rules.snapshot_ids() {
            match self.evaluate(&id, now_ms) {
                Ok(true) => triggered += 1,
                Ok(false) => {},
                Err(EngineError::NotFound(_)) => {}, // deleted mid-pass
                Err(err) => warn!(rule_id = %id, error = %err, "evaluation error"),
            }
        }
        triggered
    }

    /// Fire a rule regardless of conditions, cooldown or enable state.
    /// Management surface for testing rules by hand.
    pub fn trigger(&self, rule_id: &str, now_ms: i64) -> Result<()> {
        let rule = self.rules.get(rule_id)?;
        info!(rule_id, "rule triggered manually");
        if self.fire(&rule, now_ms) {
            Ok(())
        } else {
            Err(EngineError::ResourceExhausted(
                "dispatch queue full, trigger dropped".to_string(),
            ))
        }
    }

    /// Hand the rule's action array to the dispatch worker. The trigger
    /// is recorded only when the job was actually enqueued; a dropped
    /// trigger ran nothing, so it must not start the cooldown window or
    /// count as a trigger.
    fn fire(&self, rule: &Rule, now_ms: i64) -> bool {
        let job = DispatchJob {
            rule_id: rule.id.clone(),
            actions: rule.actions.clone(),
            callback: None,
        };
        let enqueued = match self.dispatcher.lock().as_ref() {
            Some(dispatcher) => dispatcher.enqueue(job),
            None => {
                warn!(rule_id = %rule.id, "engine shut down, trigger dropped");
                false
            },
        };
        if enqueued {
            self.rules.record_trigger(&rule.id, now_ms);
            self.total_triggers.fetch_add(1, Ordering::Relaxed);
        }
        enqueued
    }

    /// One evaluation cycle: poll due REST sources, then evaluate all
    /// rules. Push sources feed the store from their own tasks.
    pub async fn tick(&self, now_ms: i64) -> usize {
        self.sources.poll_all(now_ms).await;
        self.evaluate_all(now_ms)
    }

    pub fn status(&self) -> EngineStatus {
        let dispatch = self
            .dispatcher
            .lock()
            .as_ref()
            .map(|d| d.stats())
            .unwrap_or(DispatchStats {
                enqueued: 0,
                dropped: 0,
            });
        EngineStatus {
            rule_count: self.rules.count(),
            source_count: self.sources.count(),
            variable_count: self.vars.len(),
            total_evaluations: self.total_evaluations.load(Ordering::Relaxed),
            total_triggers: self.total_triggers.load(Ordering::Relaxed),
            last_evaluation_ms: self.last_evaluation_ms.load(Ordering::Relaxed),
            executor: self.executor.stats(),
            dispatch,
        }
    }

    /// Stop the dispatch worker after draining queued arrays. Further
    /// triggers are dropped with a warning.
    pub async fn shutdown(&self) {
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.shutdown().await;
        }
        for source in self.sources.list() {
            let _ = self.sources.set_enabled(&source.config.id, false);
        }
        info!("engine shut down");
    }
}

/// Scheduler status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub tick_ms: u64,
}

/// Drives [`AutomationEngine::tick`] on a fixed interval until stopped.
pub struct Scheduler {
    engine: Arc<AutomationEngine>,
    tick_ms: u64,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(engine: Arc<AutomationEngine>, tick_ms: u64) -> Self {
        Self {
            engine,
            tick_ms: tick_ms.max(10),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler already running");
            return;
        }
        let engine = self.engine.clone();
        let running = self.running.clone();
        let shutdown = self.shutdown.clone();
        let tick_ms = self.tick_ms;

        let handle = tokio::spawn(async move {
            info!(tick_ms, "scheduler started");
            let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        engine.tick(now_ms).await;
                    },
                    _ = shutdown.notified() => break,
                }
            }
            running.store(false, Ordering::SeqCst);
            info!("scheduler stopped");
        });
        *self.handle.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        self.shutdown.notify_waiters();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("scheduler join error: {}", e);
            }
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.running.load(Ordering::SeqCst),
            tick_ms: self.tick_ms,
        }
    }
}
