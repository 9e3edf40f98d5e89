//! Core data model: rules, conditions, actions, data sources
//!
//! All wire formats are serde-tagged JSON. Free-form strings from the
//! historical config format (power commands, HTTP methods, colors) are
//! parsed into closed types at the registration boundary so the
//! dispatcher never matches on raw strings.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use summit_vars::Value;

/// Comparison operators for rule conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Substring test; only defined on string/string pairs
    Contains,
    /// Value differs from the previous evaluation's sample
    Changed,
    /// Changed, and the new value equals the literal
    ChangedTo,
}

/// Logical operators for condition groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicOp {
    And,
    Or,
}

impl Default for LogicOp {
    fn default() -> Self {
        LogicOp::And
    }
}

/// A single comparison against a variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub variable: String,
    pub op: CompareOp,
    /// Comparison literal; optional only for `changed`
    #[serde(default)]
    pub value: Option<Value>,
}

/// Ordered condition list combined with one logical operator.
/// An empty list is vacuously true under both operators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub logic: LogicOp,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Power commands accepted by device controllers.
///
/// Parsed from the historical case-insensitive strings at decode time;
/// unknown strings are a registration error, not a dispatch-time branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PowerCommand {
    PowerOn,
    PowerOff,
    ForceOff,
    Reset,
    Recovery,
}

impl FromStr for PowerCommand {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "power_on" | "on" => Ok(PowerCommand::PowerOn),
            "power_off" | "off" => Ok(PowerCommand::PowerOff),
            "force_off" => Ok(PowerCommand::ForceOff),
            "reset" | "reboot" => Ok(PowerCommand::Reset),
            "recovery" => Ok(PowerCommand::Recovery),
            other => Err(EngineError::InvalidArgument(format!(
                "unknown power command '{}'",
                other
            ))),
        }
    }
}

impl PowerCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerCommand::PowerOn => "power_on",
            PowerCommand::PowerOff => "power_off",
            PowerCommand::ForceOff => "force_off",
            PowerCommand::Reset => "reset",
            PowerCommand::Recovery => "recovery",
        }
    }
}

impl TryFrom<String> for PowerCommand {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PowerCommand> for String {
    fn from(cmd: PowerCommand) -> String {
        cmd.as_str().to_string()
    }
}

/// HTTP methods supported by webhook actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Get
    }
}

/// Log levels for log actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogActionLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl Default for LogActionLevel {
    fn default() -> Self {
        LogActionLevel::Info
    }
}

/// LED index meaning "every pixel on the strip"
pub const LED_INDEX_ALL: u8 = 0xFF;

/// Action variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SetVariable {
        variable: String,
        value: Value,
    },
    Gpio {
        pin: u8,
        level: bool,
        /// 0 = set level and leave it; otherwise hold then invert
        #[serde(default)]
        pulse_ms: u32,
    },
    LedColor {
        device: String,
        /// Pixel index, or [`LED_INDEX_ALL`] to fill the strip
        index: u8,
        #[serde(default)]
        r: u8,
        #[serde(default)]
        g: u8,
        #[serde(default)]
        b: u8,
        /// Optional color string ("#RRGGBB", "rgb(r,g,b)" or a named
        /// color); resolved into r/g/b when the rule is registered
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    DevicePower {
        device: String,
        command: PowerCommand,
    },
    SshCommand {
        /// Host registry reference (`hosts.<ref>.*` variables) or a
        /// literal hostname
        host_ref: String,
        command: String,
        /// 0 = default (10s)
        #[serde(default)]
        timeout_ms: u64,
    },
    Webhook {
        url: String,
        #[serde(default)]
        method: HttpMethod,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
    },
    Log {
        #[serde(default)]
        level: LogActionLevel,
        message: String,
    },
}

/// An action plus its pre-execution delay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Sleep before executing this element (sequential, so it delays
    /// everything after it too)
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

/// An automation rule: condition group, ordered actions, cooldown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: ConditionGroup,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    /// Minimum interval between triggers; 0 = no cooldown
    #[serde(default)]
    pub cooldown_ms: u64,

    // Runtime state, kept here so list/get can report it
    /// Epoch ms of the last trigger; 0 = never triggered
    #[serde(default)]
    pub last_trigger_ms: i64,
    #[serde(default)]
    pub trigger_count: u64,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Validate and normalize a rule at the registration boundary:
    /// non-empty id, literals present where the operator needs one,
    /// color strings resolved to RGB.
    pub fn normalize(&mut self) -> Result<()> {
        if self.id.is_empty() {
            return Err(EngineError::InvalidArgument("empty rule id".to_string()));
        }
        for cond in &self.conditions.conditions {
            if cond.variable.is_empty() {
                return Err(EngineError::InvalidArgument(format!(
                    "rule '{}': condition with empty variable name",
                    self.id
                )));
            }
            if cond.value.is_none() && cond.op != CompareOp::Changed {
                return Err(EngineError::InvalidArgument(format!(
                    "rule '{}': operator {:?} requires a literal",
                    self.id, cond.op
                )));
            }
        }
        for spec in &mut self.actions {
            if let Action::LedColor {
                r, g, b, color, ..
            } = &mut spec.action
            {
                if let Some(s) = color.take() {
                    let (pr, pg, pb) = parse_color(&s)?;
                    *r = pr;
                    *g = pg;
                    *b = pb;
                }
            }
            if let Action::Webhook { url, .. } = &spec.action {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(EngineError::InvalidArgument(format!(
                        "rule '{}': webhook url '{}' is not http(s)",
                        self.id, url
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Parse a color string: `#RRGGBB`, `rgb(r,g,b)` or a named color.
pub fn parse_color(s: &str) -> Result<(u8, u8, u8)> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('#') {
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EngineError::InvalidArgument(format!(
                "bad hex color '{}'",
                s
            )));
        }
        let r = u8::from_str_radix(&hex[0..2], 16)
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        let g = u8::from_str_radix(&hex[2..4], 16)
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        let b = u8::from_str_radix(&hex[4..6], 16)
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        return Ok((r, g, b));
    }
    if let Some(inner) = s
        .strip_prefix("rgb(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(EngineError::InvalidArgument(format!(
                "bad rgb() color '{}'",
                s
            )));
        }
        let mut rgb = [0u8; 3];
        for (slot, part) in rgb.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| EngineError::InvalidArgument(format!("bad rgb() color '{}'", s)))?;
        }
        return Ok((rgb[0], rgb[1], rgb[2]));
    }
    match s.to_ascii_lowercase().as_str() {
        "red" => Ok((255, 0, 0)),
        "green" => Ok((0, 255, 0)),
        "blue" => Ok((0, 0, 255)),
        "white" => Ok((255, 255, 255)),
        "black" | "off" => Ok((0, 0, 0)),
        "yellow" => Ok((255, 255, 0)),
        "cyan" => Ok((0, 255, 255)),
        "magenta" => Ok((255, 0, 255)),
        "orange" => Ok((255, 128, 0)),
        other => Err(EngineError::InvalidArgument(format!(
            "unknown color '{}'",
            other
        ))),
    }
}

/// Data source transport kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    WebsocketPush,
    SocketioPush,
    RestPoll,
}

/// Connection lifecycle of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Error,
}

/// One extraction: path expression over the payload -> target variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub path: String,
    pub variable: String,
}

/// External data source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub kind: SourceKind,
    /// URL: ws(s):// for push sources, http(s):// for REST polling
    pub endpoint: String,
    /// REST polling interval; ignored for push sources
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Fixed delay before a push source reconnects
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,
    /// Socket.IO event name to consume (socketio_push only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub mappings: Vec<FieldMapping>,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_reconnect_ms() -> u64 {
    5000
}

impl DataSource {
    /// Validate a source at the registration boundary: non-empty id,
    /// scheme matching the transport, well-formed mapping paths.
    pub fn normalize(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(EngineError::InvalidArgument("empty source id".to_string()));
        }
        let scheme_ok = match self.kind {
            SourceKind::WebsocketPush | SourceKind::SocketioPush => {
                self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")
            },
            SourceKind::RestPoll => {
                self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")
            },
        };
        if !scheme_ok {
            return Err(EngineError::InvalidArgument(format!(
                "source '{}': endpoint '{}' does not match transport {:?}",
                self.id, self.endpoint, self.kind
            )));
        }
        if self.kind == SourceKind::RestPoll && self.poll_interval_ms == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "source '{}': poll_interval_ms must be > 0",
                self.id
            )));
        }
        for mapping in &self.mappings {
            if !summit_jsonpath::validate(&mapping.path) {
                return Err(EngineError::InvalidArgument(format!(
                    "source '{}': bad path expression '{}'",
                    self.id, mapping.path
                )));
            }
            if mapping.variable.is_empty() {
                return Err(EngineError::InvalidArgument(format!(
                    "source '{}': mapping for '{}' has empty variable name",
                    self.id, mapping.path
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_deserialization_defaults() {
        let json = r#"{
            "id": "fan_boost",
            "conditions": {
                "logic": "AND",
                "conditions": [
                    { "variable": "cpu.temp", "op": "gt", "value": 75.0 }
                ]
            },
            "actions": [
                { "type": "set_variable", "variable": "fan.target", "value": 255 },
                { "type": "log", "message": "fan boost engaged", "delay_ms": 100 }
            ],
            "cooldown_ms": 30000
        }"#;
        let rule: Rule = serde_json::from_str(json).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.cooldown_ms, 30000);
        assert_eq!(rule.last_trigger_ms, 0);
        assert_eq!(rule.actions.len(), 2);
        assert_eq!(rule.actions[0].delay_ms, 0);
        assert_eq!(rule.actions[1].delay_ms, 100);
        match &rule.actions[0].action {
            Action::SetVariable { variable, value } => {
                assert_eq!(variable, "fan.target");
                assert_eq!(*value, Value::Int(255));
            },
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_power_command_compat_table() {
        for (s, expect) in [
            ("power_on", PowerCommand::PowerOn),
            ("ON", PowerCommand::PowerOn),
            ("off", PowerCommand::PowerOff),
            ("POWER_OFF", PowerCommand::PowerOff),
            ("force_off", PowerCommand::ForceOff),
            ("reboot", PowerCommand::Reset),
            ("Reset", PowerCommand::Reset),
            ("recovery", PowerCommand::Recovery),
        ] {
            assert_eq!(s.parse::<PowerCommand>().unwrap(), expect, "input {}", s);
        }
        assert!("explode".parse::<PowerCommand>().is_err());
    }

    #[test]
    fn test_device_power_action_parses_string_command() {
        let json = r#"{ "type": "device_power", "device": "agx0", "command": "reboot" }"#;
        let spec: ActionSpec = serde_json::from_str(json).unwrap();
        match spec.action {
            Action::DevicePower { device, command } => {
                assert_eq!(device, "agx0");
                assert_eq!(command, PowerCommand::Reset);
            },
            other => panic!("unexpected action {:?}", other),
        }

        let bad = r#"{ "type": "device_power", "device": "agx0", "command": "explode" }"#;
        assert!(serde_json::from_str::<ActionSpec>(bad).is_err());
    }

    #[test]
    fn test_parse_color_forms() {
        assert_eq!(parse_color("#FF8000").unwrap(), (255, 128, 0));
        assert_eq!(parse_color("rgb(1, 2, 3)").unwrap(), (1, 2, 3));
        assert_eq!(parse_color("Red").unwrap(), (255, 0, 0));
        assert_eq!(parse_color("off").unwrap(), (0, 0, 0));
        assert!(parse_color("#F80").is_err());
        assert!(parse_color("rgb(1,2)").is_err());
        assert!(parse_color("chartreuse-ish").is_err());
    }

    #[test]
    fn test_normalize_resolves_color_string() {
        let mut rule: Rule = serde_json::from_str(
            r#"{
                "id": "alert_led",
                "actions": [
                    { "type": "led_color", "device": "board", "index": 255, "color": "red" }
                ]
            }"#,
        )
        .unwrap();
        rule.normalize().unwrap();
        match &rule.actions[0].action {
            Action::LedColor { index, r, g, b, color, .. } => {
                assert_eq!(*index, LED_INDEX_ALL);
                assert_eq!((*r, *g, *b), (255, 0, 0));
                assert!(color.is_none());
            },
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_normalize_rejects_missing_literal() {
        let mut rule: Rule = serde_json::from_str(
            r#"{
                "id": "r1",
                "conditions": { "conditions": [ { "variable": "x", "op": "gt" } ] }
            }"#,
        )
        .unwrap();
        assert!(rule.normalize().is_err());

        // `changed` needs no literal
        let mut rule: Rule = serde_json::from_str(
            r#"{
                "id": "r2",
                "conditions": { "conditions": [ { "variable": "x", "op": "changed" } ] }
            }"#,
        )
        .unwrap();
        rule.normalize().unwrap();
    }

    #[test]
    fn test_source_normalize() {
        let src = DataSource {
            id: "metrics".to_string(),
            kind: SourceKind::RestPoll,
            endpoint: "http://127.0.0.1:9000/metrics".to_string(),
            poll_interval_ms: 1000,
            reconnect_ms: 5000,
            event: None,
            enabled: true,
            mappings: vec![FieldMapping {
                path: "cpu.load".to_string(),
                variable: "cpu_load_pct".to_string(),
            }],
        };
        src.normalize().unwrap();

        let mut bad_scheme = src.clone();
        bad_scheme.endpoint = "ws://127.0.0.1:9000".to_string();
        assert!(bad_scheme.normalize().is_err());

        let mut bad_path = src.clone();
        bad_path.mappings[0].path = "cpu..load".to_string();
        assert!(bad_path.normalize().is_err());

        let mut zero_interval = src;
        zero_interval.poll_interval_ms = 0;
        assert!(zero_interval.normalize().is_err());
    }

    #[test]
    fn test_empty_condition_group_default() {
        let group = ConditionGroup::default();
        assert_eq!(group.logic, LogicOp::And);
        assert!(group.conditions.is_empty());
    }
}
