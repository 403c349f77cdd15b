//! Simulated-input delivery
//!
//! Moves the pointer to the agent's chat input, focuses it, clears whatever
//! is there, types the message and presses the submit key. Success means the
//! sequence completed without an error; there is no confirmation that the
//! agent processed the text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::InputConfig;
use crate::domain::{DeliveryMethod, Message};
use crate::registry::{AgentCoordinates, CoordinateRegistry};

use super::error::{BackendError, DeliveryError, InputStep};
use super::{DeliveryProvider, DeliveryTarget};

/// Pointer and keyboard automation
#[async_trait]
pub trait InputBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Whether the automation tooling can be driven at all
    async fn is_available(&self) -> bool;

    async fn move_pointer(&self, x: u32, y: u32, monitor: u32) -> Result<(), BackendError>;

    async fn click(&self) -> Result<(), BackendError>;

    /// Press a key chord such as `ctrl+a` or `Return`
    async fn key(&self, chord: &str) -> Result<(), BackendError>;

    /// Type literal text; never contains line breaks
    async fn type_text(&self, text: &str) -> Result<(), BackendError>;
}

/// Backend for hosts without automation support
pub struct UnavailableBackend;

#[async_trait]
impl InputBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn move_pointer(&self, _x: u32, _y: u32, _monitor: u32) -> Result<(), BackendError> {
        Err(BackendError::new("input not supported"))
    }

    async fn click(&self) -> Result<(), BackendError> {
        Err(BackendError::new("input not supported"))
    }

    async fn key(&self, _chord: &str) -> Result<(), BackendError> {
        Err(BackendError::new("input not supported"))
    }

    async fn type_text(&self, _text: &str) -> Result<(), BackendError> {
        Err(BackendError::new("input not supported"))
    }
}

/// X11 automation through the `xdotool` binary
pub struct XdotoolBackend {
    binary: String,
    type_delay_ms: u64,
    available: OnceCell<bool>,
}

impl XdotoolBackend {
    pub fn new(type_delay_ms: u64) -> Self {
        Self::with_binary("xdotool", type_delay_ms)
    }

    pub fn with_binary(binary: impl Into<String>, type_delay_ms: u64) -> Self {
        Self {
            binary: binary.into(),
            type_delay_ms,
            available: OnceCell::new(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(), BackendError> {
        debug!(binary = %self.binary, ?args, "XdotoolBackend::run: called");
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::new(format!("failed to spawn {}: {}", self.binary, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(BackendError::new(format!(
                "{} {} exited with {}: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl InputBackend for XdotoolBackend {
    fn name(&self) -> &str {
        "xdotool"
    }

    async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let found = Command::new(&self.binary)
                    .arg("version")
                    .kill_on_drop(true)
                    .output()
                    .await
                    .map(|o| o.status.success())
                    .unwrap_or(false);
                debug!(binary = %self.binary, found, "XdotoolBackend::is_available: probed");
                found
            })
            .await
    }

    async fn move_pointer(&self, x: u32, y: u32, monitor: u32) -> Result<(), BackendError> {
        let (x, y, screen) = (x.to_string(), y.to_string(), monitor.to_string());
        self.run(&["mousemove", "--screen", &screen, "--sync", &x, &y]).await
    }

    async fn click(&self) -> Result<(), BackendError> {
        self.run(&["click", "1"]).await
    }

    async fn key(&self, chord: &str) -> Result<(), BackendError> {
        self.run(&["key", "--clearmodifiers", chord]).await
    }

    async fn type_text(&self, text: &str) -> Result<(), BackendError> {
        let delay = self.type_delay_ms.to_string();
        self.run(&["type", "--clearmodifiers", "--delay", &delay, "--", text]).await
    }
}

/// Delivers by driving the pointer and keyboard at an agent's coordinates
pub struct SimulatedInputProvider {
    backend: Arc<dyn InputBackend>,
    registry: Arc<CoordinateRegistry>,
    config: InputConfig,
}

impl SimulatedInputProvider {
    pub fn new(backend: Arc<dyn InputBackend>, registry: Arc<CoordinateRegistry>, config: InputConfig) -> Self {
        debug!(backend = backend.name(), attempts = config.attempts, "SimulatedInputProvider::new: called");
        Self {
            backend,
            registry,
            config,
        }
    }

    /// Run the full sequence, retrying transient failures with linear backoff
    pub async fn send(&self, body: &str, coordinates: &AgentCoordinates) -> Result<(), DeliveryError> {
        debug!(agent_id = %coordinates.agent_id, x = coordinates.x, y = coordinates.y, "SimulatedInputProvider::send: called");
        let attempts = self.config.attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.run_sequence(body, coordinates).await {
                Ok(()) => {
                    info!(agent_id = %coordinates.agent_id, attempt, "Simulated input delivered");
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let backoff = self.config.backoff() * attempt;
                    warn!(agent_id = %coordinates.agent_id, attempt, ?backoff, error = %e, "Simulated input failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(agent_id = %coordinates.agent_id, attempt, error = %e, "Simulated input failed");
                    return Err(e);
                }
            }
        }
    }

    async fn run_sequence(&self, body: &str, c: &AgentCoordinates) -> Result<(), DeliveryError> {
        let delay = self.config.step_delay();

        self.step(InputStep::Move, self.backend.move_pointer(c.x, c.y, c.monitor))
            .await?;
        pause(delay).await;

        self.step(InputStep::Click, self.backend.click()).await?;
        pause(delay).await;

        self.step(InputStep::Clear, self.backend.key("ctrl+a")).await?;
        self.step(InputStep::Clear, self.backend.key("Delete")).await?;
        pause(delay).await;

        // Line breaks go in as the newline chord so the text is not submitted early
        for (i, line) in body.split('\n').enumerate() {
            if i > 0 {
                self.step(InputStep::Type, self.backend.key(&self.config.newline_key))
                    .await?;
            }
            if !line.is_empty() {
                self.step(InputStep::Type, self.backend.type_text(line)).await?;
            }
        }
        pause(delay).await;

        match self
            .step(InputStep::Submit, self.backend.key(&self.config.submit_key))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => Err(DeliveryError::AmbiguousSubmit { reason: e.to_string() }),
        }
    }

    async fn step<F>(&self, step: InputStep, fut: F) -> Result<(), DeliveryError>
    where
        F: std::future::Future<Output = Result<(), BackendError>>,
    {
        let timeout = self.config.command_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(DeliveryError::Automation { step, source }),
            Err(_) => Err(DeliveryError::StepTimeout { step, timeout }),
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl DeliveryProvider for SimulatedInputProvider {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::SimulatedInput
    }

    /// Enabled, backend loadable and at least one coordinate registered
    async fn is_available(&self) -> bool {
        self.config.enabled && !self.registry.is_empty() && self.backend.is_available().await
    }

    async fn deliver(&self, message: &Message, body: &str, target: &DeliveryTarget) -> Result<(), DeliveryError> {
        debug!(id = %message.id(), recipient = %message.recipient(), "SimulatedInputProvider::deliver: called");
        match target {
            DeliveryTarget::SimulatedInput(coordinates) => self.send(body, coordinates).await,
            other => Err(DeliveryError::TargetMismatch {
                method: DeliveryMethod::SimulatedInput,
                target: other.method(),
            }),
        }
    }
}
