//! Service configuration
//!
//! Merge order: built-in defaults, then an optional YAML file, then
//! `AUTOSRV_`-prefixed environment variables (nested keys split on `__`,
//! e.g. `AUTOSRV_ENGINE__TICK_MS=250`).

use crate::engine::{
    EngineSettings, DEFAULT_DISPATCH_TIMEOUT_MS, DEFAULT_QUEUE_SIZE, DEFAULT_TICK_MS,
};
use crate::error::{EngineError, Result};
use crate::sources::DEFAULT_MAX_SOURCES;
use crate::store::DEFAULT_MAX_RULES;
use crate::types::{DataSource, Rule};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub engine: EngineConfig,
    pub snapshot: SnapshotConfig,

    /// Rules registered at boot, before the scheduler starts. The
    /// management API can change them afterwards.
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Data sources registered at boot.
    #[serde(default)]
    pub sources: Vec<DataSource>,

    /// Log level filter (tracing syntax)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Management API port
    #[serde(default = "default_service_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Evaluation loop interval
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default = "default_max_rules")]
    pub max_rules: usize,

    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    /// Bounded dispatch queue depth; full = trigger dropped
    #[serde(default = "default_action_queue_size")]
    pub action_queue_size: usize,

    /// Per-array execution deadline
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
}

/// Variable snapshot persistence (load at boot, save at shutdown)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_enabled")]
    pub enabled: bool,

    #[serde(default = "default_snapshot_path")]
    pub path: String,
}

impl Config {
    /// Load configuration, probing the usual file locations.
    pub fn load() -> Result<Self> {
        let config_paths = ["config/autosrv.yaml", "autosrv.yaml"];
        let yaml_path = config_paths.iter().find(|p| Path::new(p).exists());

        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = yaml_path {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed("AUTOSRV_").split("__"))
            .extract()
            .map_err(|e| EngineError::Config(format!("failed to load config: {}", e)))
    }

    /// Load configuration from an explicit file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("AUTOSRV_").split("__"))
            .extract()
            .map_err(|e| EngineError::Config(format!("failed to load config: {}", e)))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_rules: self.engine.max_rules,
            max_sources: self.engine.max_sources,
            action_queue_size: self.engine.action_queue_size,
            dispatch_timeout_ms: self.engine.dispatch_timeout_ms,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service: ServiceConfig::default(),
            engine: EngineConfig::default(),
            snapshot: SnapshotConfig::default(),
            rules: Vec::new(),
            sources: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            name: default_service_name(),
            port: default_service_port(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tick_ms: default_tick_ms(),
            max_rules: default_max_rules(),
            max_sources: default_max_sources(),
            action_queue_size: default_action_queue_size(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            enabled: default_snapshot_enabled(),
            path: default_snapshot_path(),
        }
    }
}

// Default value functions
fn default_service_name() -> String {
    "autosrv".to_string()
}

fn default_service_port() -> u16 {
    6080
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

fn default_max_rules() -> usize {
    DEFAULT_MAX_RULES
}

fn default_max_sources() -> usize {
    DEFAULT_MAX_SOURCES
}

fn default_action_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_dispatch_timeout_ms() -> u64 {
    DEFAULT_DISPATCH_TIMEOUT_MS
}

fn default_snapshot_enabled() -> bool {
    true
}

fn default_snapshot_path() -> String {
    "data/variables.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
