//! Autosrv - Automation Engine Service
//!
//! Event-condition-action automation for a fleet of attached devices:
//! - Data sources (WebSocket push, Socket.IO push, REST polling) feed a
//!   typed variable store
//! - Rules compare variables against literals and fire ordered action
//!   arrays (GPIO, LEDs, device power, SSH, webhooks, logs)
//! - A dedicated dispatch worker runs action arrays so the evaluation
//!   tick never blocks on I/O
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │  Scheduler  │────▶│    Engine    │────▶│  Dispatcher │
//! │   (tick)    │     │ (poll+eval)  │     │  (worker)   │
//! └─────────────┘     └──────┬───────┘     └──────┬──────┘
//!                            │                    │
//!                     ┌──────▼───────┐     ┌──────▼──────┐
//!                     │   VarStore   │     │   Drivers   │
//!                     │ (summit-vars)│     │ (gpio/ssh/…)│
//!                     └──────────────┘     └─────────────┘
//! ```

pub mod actions;
pub mod condition;
pub mod config;
pub mod dispatch;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod push;
pub mod routes;
pub mod sources;
pub mod store;
pub mod types;

// Re-export public API
pub use actions::{ActionCallback, ActionExecutor, ActionResult};
pub use condition::{compare_values, ConditionEvaluator};
pub use config::Config;
pub use engine::{AutomationEngine, EngineSettings, EngineStatus, Scheduler, DEFAULT_TICK_MS};
pub use error::{EngineError, Result};
pub use sources::{SourceManager, SourceStatus};
pub use store::RuleStore;
pub use types::{
    Action, ActionSpec, CompareOp, Condition, ConditionGroup, ConnectionState, DataSource,
    FieldMapping, HttpMethod, LogicOp, PowerCommand, Rule, SourceKind,
};
