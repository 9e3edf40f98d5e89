//! Hardware and remote-execution seams
//!
//! The dispatcher talks to GPIO pins, LED strips, device power control
//! and SSH through these traits. Real backends live outside this crate;
//! the simulators here back the default wiring and the test suite.

use crate::error::{EngineError, Result};
use crate::types::PowerCommand;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::info;

/// Resolved SSH target
#[derive(Debug, Clone, PartialEq)]
pub struct SshHost {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
}

/// GPIO output control
#[async_trait]
pub trait GpioDriver: Send + Sync {
    async fn set_level(&self, pin: u8, level: bool) -> Result<()>;
}

/// Addressable LED strips, one strip per named device
#[async_trait]
pub trait LedDriver: Send + Sync {
    async fn set_pixel(&self, device: &str, index: u8, rgb: (u8, u8, u8)) -> Result<()>;
    async fn fill(&self, device: &str, rgb: (u8, u8, u8)) -> Result<()>;
}

/// Power sequencing for attached compute devices
#[async_trait]
pub trait PowerController: Send + Sync {
    async fn execute(&self, device: &str, command: PowerCommand) -> Result<()>;
}

/// Remote command execution. Returns the remote exit code.
#[async_trait]
pub trait SshTransport: Send + Sync {
    async fn exec(&self, host: &SshHost, command: &str, timeout: Duration) -> Result<i32>;
}

/// In-memory simulators. They log and record every call so tests can
/// assert on dispatch order and arguments.
pub mod sim {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum SimCall {
        Gpio { pin: u8, level: bool },
        LedPixel { device: String, index: u8, rgb: (u8, u8, u8) },
        LedFill { device: String, rgb: (u8, u8, u8) },
        Power { device: String, command: PowerCommand },
        Ssh { host: String, command: String },
    }

    /// Records calls; optionally fails everything to exercise error paths.
    #[derive(Default)]
    pub struct SimBackend {
        pub calls: Mutex<Vec<SimCall>>,
        pub fail_all: bool,
        /// Exit code returned by simulated SSH runs
        pub ssh_exit_code: i32,
    }

    impl SimBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail_all: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<SimCall> {
            self.calls.lock().clone()
        }

        fn check(&self, what: &str) -> Result<()> {
            if self.fail_all {
                Err(EngineError::Hardware(format!("simulated {} failure", what)))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl GpioDriver for SimBackend {
        async fn set_level(&self, pin: u8, level: bool) -> Result<()> {
            self.check("gpio")?;
            info!(pin, level, "sim gpio");
            self.calls.lock().push(SimCall::Gpio { pin, level });
            Ok(())
        }
    }

    #[async_trait]
    impl LedDriver for SimBackend {
        async fn set_pixel(&self, device: &str, index: u8, rgb: (u8, u8, u8)) -> Result<()> {
            self.check("led")?;
            self.calls.lock().push(SimCall::LedPixel {
                device: device.to_string(),
                index,
                rgb,
            });
            Ok(())
        }

        async fn fill(&self, device: &str, rgb: (u8, u8, u8)) -> Result<()> {
            self.check("led")?;
            self.calls.lock().push(SimCall::LedFill {
                device: device.to_string(),
                rgb,
            });
            Ok(())
        }
    }

    #[async_trait]
    impl PowerController for SimBackend {
        async fn execute(&self, device: &str, command: PowerCommand) -> Result<()> {
            self.check("power")?;
            info!(device, command = command.as_str(), "sim device power");
            self.calls.lock().push(SimCall::Power {
                device: device.to_string(),
                command,
            });
            Ok(())
        }
    }

    #[async_trait]
    impl SshTransport for SimBackend {
        async fn exec(&self, host: &SshHost, command: &str, _timeout: Duration) -> Result<i32> {
            if self.fail_all {
                return Err(EngineError::Transport(format!(
                    "simulated ssh failure to {}",
                    host.host
                )));
            }
            self.calls.lock().push(SimCall::Ssh {
                host: host.host.clone(),
                command: command.to_string(),
            });
            Ok(self.ssh_exit_code)
        }
    }
}
