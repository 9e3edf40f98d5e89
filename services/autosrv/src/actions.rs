//! Action execution
//!
//! Arrays run strictly sequentially. A failing element is logged and
//! counted but never aborts the rest of its array; the per-element
//! callback fires exactly once per element either way.

use crate::drivers::{GpioDriver, LedDriver, PowerController, SshHost, SshTransport};
use crate::error::{EngineError, Result};
use crate::types::{Action, ActionSpec, HttpMethod, LogActionLevel, LED_INDEX_ALL};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use summit_vars::{Value, VarStore};
use tracing::{debug, error, info, warn};

const DEFAULT_SSH_TIMEOUT_MS: u64 = 10_000;
const WEBHOOK_TIMEOUT_SECS: u64 = 5;

/// Outcome of one executed action
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub action_type: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Per-element observer; receives (index, spec, result) after every
/// element, including failed ones.
pub type ActionCallback = Arc<dyn Fn(usize, &ActionSpec, &ActionResult) + Send + Sync>;

/// Dispatch counters (monotonic since process start)
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub total_actions: u64,
    pub failed_actions: u64,
}

/// Executes action arrays against the variable store, driver seams and
/// outbound HTTP.
pub struct ActionExecutor {
    vars: Arc<VarStore>,
    gpio: Arc<dyn GpioDriver>,
    leds: Arc<dyn LedDriver>,
    power: Arc<dyn PowerController>,
    ssh: Arc<dyn SshTransport>,
    http_client: reqwest::Client,
    total_actions: AtomicU64,
    failed_actions: AtomicU64,
}

impl ActionExecutor {
    pub fn new(
        vars: Arc<VarStore>,
        gpio: Arc<dyn GpioDriver>,
        leds: Arc<dyn LedDriver>,
        power: Arc<dyn PowerController>,
        ssh: Arc<dyn SshTransport>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            vars,
            gpio,
            leds,
            power,
            ssh,
            http_client,
            total_actions: AtomicU64::new(0),
            failed_actions: AtomicU64::new(0),
        }
    }

    /// Wire every driver seam to one shared simulator backend.
    pub fn with_sim(vars: Arc<VarStore>, sim: Arc<crate::drivers::sim::SimBackend>) -> Self {
        Self::new(vars, sim.clone(), sim.clone(), sim.clone(), sim)
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            total_actions: self.total_actions.load(Ordering::Relaxed),
            failed_actions: self.failed_actions.load(Ordering::Relaxed),
        }
    }

    /// Run an action array in order. Each element waits out its
    /// `delay_ms` first; failures are recorded and the array continues.
    pub async fn execute_array(
        &self,
        rule_id: &str,
        actions: &[ActionSpec],
        callback: Option<&ActionCallback>,
    ) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(actions.len());
        for (idx, spec) in actions.iter().enumerate() {
            if spec.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(spec.delay_ms)).await;
            }

            let started = Instant::now();
            let outcome = self.execute_one(rule_id, &spec.action).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            self.total_actions.fetch_add(1, Ordering::Relaxed);
            let result = match outcome {
                Ok(detail) => {
                    debug!(rule_id, idx, action = action_type(&spec.action), "action ok");
                    ActionResult {
                        action_type: action_type(&spec.action).to_string(),
                        success: true,
                        detail,
                        error: None,
                        duration_ms,
                    }
                },
                Err(err) => {
                    self.failed_actions.fetch_add(1, Ordering::Relaxed);
                    error!(
                        rule_id,
                        idx,
                        action = action_type(&spec.action),
                        error = %err,
                        "action failed"
                    );
                    ActionResult {
                        action_type: action_type(&spec.action).to_string(),
                        success: false,
                        detail: None,
                        error: Some(err.to_string()),
                        duration_ms,
                    }
                },
            };

            if let Some(cb) = callback {
                cb(idx, spec, &result);
            }
            results.push(result);
        }
        results
    }

    async fn execute_one(&self, rule_id: &str, action: &Action) -> Result<Option<String>> {
        match action {
            Action::SetVariable { variable, value } => {
                self.vars.set(variable, value.clone(), now_ms())?;
                Ok(None)
            },
            Action::Gpio { pin, level, pulse_ms } => {
                self.gpio.set_level(*pin, *level).await?;
                if *pulse_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(u64::from(*pulse_ms))).await;
                    self.gpio.set_level(*pin, !*level).await?;
                }
                Ok(None)
            },
            Action::LedColor { device, index, r, g, b, .. } => {
                if *index == LED_INDEX_ALL {
                    self.leds.fill(device, (*r, *g, *b)).await?;
                } else {
                    self.leds.set_pixel(device, *index, (*r, *g, *b)).await?;
                }
                Ok(None)
            },
            Action::DevicePower { device, command } => {
                self.power.execute(device, *command).await?;
                Ok(Some(format!("{} {}", device, command.as_str())))
            },
            Action::SshCommand { host_ref, command, timeout_ms } => {
                self.execute_ssh(rule_id, host_ref, command, *timeout_ms).await
            },
            Action::Webhook { url, method, body } => {
                self.execute_webhook(url, *method, body.as_ref()).await
            },
            Action::Log { level, message } => {
                let message = self.expand_vars(message);
                match level {
                    LogActionLevel::Error => error!(rule_id, "{}", message),
                    LogActionLevel::Warn => warn!(rule_id, "{}", message),
                    LogActionLevel::Info => info!(rule_id, "{}", message),
                    LogActionLevel::Debug => debug!(rule_id, "{}", message),
                }
                Ok(None)
            },
        }
    }

    /// Resolve `hosts.<ref>.*` from the variable store, falling back to
    /// treating the ref as a literal hostname with user `root`.
    fn resolve_ssh_host(&self, host_ref: &str) -> SshHost {
        let key = |field: &str| format!("hosts.{}.{}", host_ref, field);
        let host = self
            .vars
            .get(&key("ip"))
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| host_ref.to_string());
        let port = self
            .vars
            .get(&key("port"))
            .ok()
            .and_then(|v| v.as_i64())
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(22);
        let username = self
            .vars
            .get(&key("username"))
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "root".to_string());
        let password = self
            .vars
            .get(&key("password"))
            .ok()
            .and_then(|v| v.as_str().map(str::to_string));
        SshHost {
            host,
            port,
            username,
            password,
        }
    }

    async fn execute_ssh(
        &self,
        rule_id: &str,
        host_ref: &str,
        command: &str,
        timeout_ms: u64,
    ) -> Result<Option<String>> {
        let host = self.resolve_ssh_host(host_ref);
        let command = self.expand_vars(command);
        let timeout = Duration::from_millis(if timeout_ms == 0 {
            DEFAULT_SSH_TIMEOUT_MS
        } else {
            timeout_ms
        });

        debug!(rule_id, host = %host.host, port = host.port, "ssh exec: {}", command);
        let exit_code = self.ssh.exec(&host, &command, timeout).await?;

        // expose the exit code so follow-up rules can chain on it
        self.vars
            .set(&format!("ssh.{}.exit_code", host_ref), Value::Int(i64::from(exit_code)), now_ms())?;

        if exit_code == 0 {
            Ok(Some(format!("exit_code=0 on {}", host.host)))
        } else {
            Err(EngineError::Transport(format!(
                "ssh command on {} exited with {}",
                host.host, exit_code
            )))
        }
    }

    async fn execute_webhook(
        &self,
        url: &str,
        method: HttpMethod,
        body: Option<&serde_json::Value>,
    ) -> Result<Option<String>> {
        let mut request = match method {
            HttpMethod::Get => self.http_client.get(url),
            HttpMethod::Post => self.http_client.post(url),
            HttpMethod::Put => self.http_client.put(url),
        };
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(Some(format!("HTTP {}", status.as_u16())))
        } else {
            Err(EngineError::Transport(format!(
                "webhook {} returned HTTP {}",
                url,
                status.as_u16()
            )))
        }
    }

    /// Substitute `${name}` with the variable's display value. Unknown
    /// names are left in place so the gap is visible in logs.
    fn expand_vars(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.vars.get(name) {
                        Ok(value) => out.push_str(&value.to_string()),
                        Err(_) => {
                            out.push_str("${");
                            out.push_str(name);
                            out.push('}');
                        },
                    }
                    rest = &after[end + 1..];
                },
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                },
            }
        }
        out.push_str(rest);
        out
    }
}

fn action_type(action: &Action) -> &'static str {
    match action {
        Action::SetVariable { .. } => "set_variable",
        Action::Gpio { .. } => "gpio",
        Action::LedColor { .. } => "led_color",
        Action::DevicePower { .. } => "device_power",
        Action::SshCommand { .. } => "ssh_command",
        Action::Webhook { .. } => "webhook",
        Action::Log { .. } => "log",
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
