//! Test doubles for the automation seam
//!
//! [`RecordingBackend`] stands in for a real pointer/keyboard backend. It
//! records every call with a timestamp and can be told to fail or hang.
//! [`orchestrator`] wires one into a full delivery chain with no delays.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;

use crate::config::{AmbiguousSubmitPolicy, InputConfig};
use crate::delivery::{BackendError, FileDropProvider, InputBackend, SimulatedInputProvider};
use crate::metrics::DeliveryMetrics;
use crate::orchestrator::FallbackOrchestrator;
use crate::registry::CoordinateRegistry;

/// Input settings without pauses, for tests
pub fn fast_input_config() -> InputConfig {
    InputConfig {
        backoff_ms: 1,
        step_delay_ms: 0,
        type_delay_ms: 0,
        ..Default::default()
    }
}

/// Orchestrator over `backend` and a file-drop root, with fresh metrics
pub fn orchestrator(
    backend: Arc<dyn InputBackend>,
    registry: Arc<CoordinateRegistry>,
    workspace_root: &Path,
    policy: AmbiguousSubmitPolicy,
) -> FallbackOrchestrator {
    let input = Arc::new(SimulatedInputProvider::new(backend, registry.clone(), fast_input_config()));
    FallbackOrchestrator::new(
        registry,
        input,
        Arc::new(FileDropProvider::new(workspace_root)),
        policy,
        Arc::new(DeliveryMetrics::new()),
    )
}

/// A call made against the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Move { x: u32, y: u32, monitor: u32 },
    Click,
    Key(String),
    Type(String),
}

#[derive(Debug, Default)]
struct Behaviour {
    available: bool,
    blocking: bool,
    fail_moves: usize,
    fail_clicks: usize,
    fail_keys: Vec<String>,
}

/// In-memory backend that records calls
#[derive(Debug)]
pub struct RecordingBackend {
    behaviour: Mutex<Behaviour>,
    calls: Mutex<Vec<(Instant, BackendCall)>>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    /// Available backend where every call succeeds
    pub fn new() -> Self {
        Self {
            behaviour: Mutex::new(Behaviour {
                available: true,
                ..Default::default()
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Report the backend as not loadable
    pub fn unavailable(self) -> Self {
        self.behaviour.lock().unwrap_or_else(PoisonError::into_inner).available = false;
        self
    }

    /// Every call records itself and then never completes
    pub fn blocking(self) -> Self {
        self.behaviour.lock().unwrap_or_else(PoisonError::into_inner).blocking = true;
        self
    }

    /// Fail the next `n` pointer moves
    pub fn fail_moves(self, n: usize) -> Self {
        self.behaviour.lock().unwrap_or_else(PoisonError::into_inner).fail_moves = n;
        self
    }

    /// Fail the next `n` clicks
    pub fn fail_clicks(self, n: usize) -> Self {
        self.behaviour.lock().unwrap_or_else(PoisonError::into_inner).fail_clicks = n;
        self
    }

    /// Always fail when `chord` is pressed
    pub fn fail_submit(self, chord: &str) -> Self {
        self.behaviour.lock().unwrap_or_else(PoisonError::into_inner).fail_keys.push(chord.to_string());
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).iter().map(|(_, c)| c.clone()).collect()
    }

    /// Number of sequences begun (each starts with a pointer move)
    pub fn sequences_started(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, c)| matches!(c, BackendCall::Move { .. }))
            .count()
    }

    /// Text typed across all sequences
    pub fn typed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::Type(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Time of the first recorded call
    pub fn first_call_at(&self) -> Option<Instant> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).first().map(|(at, _)| *at)
    }

    async fn record(&self, call: BackendCall) -> Result<(), BackendError> {
        let outcome = {
            let mut behaviour = self.behaviour.lock().unwrap_or_else(PoisonError::into_inner);
            let outcome = match &call {
                BackendCall::Move { .. } if behaviour.fail_moves > 0 => {
                    behaviour.fail_moves -= 1;
                    Err(BackendError::new("scripted move failure"))
                }
                BackendCall::Click if behaviour.fail_clicks > 0 => {
                    behaviour.fail_clicks -= 1;
                    Err(BackendError::new("scripted click failure"))
                }
                BackendCall::Key(chord) if behaviour.fail_keys.contains(chord) => {
                    Err(BackendError::new(format!("scripted failure on {}", chord)))
                }
                _ => Ok(()),
            };
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).push((Instant::now(), call));
            if behaviour.blocking { None } else { Some(outcome) }
        };

        match outcome {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl InputBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    async fn is_available(&self) -> bool {
        self.behaviour.lock().unwrap_or_else(PoisonError::into_inner).available
    }

    async fn move_pointer(&self, x: u32, y: u32, monitor: u32) -> Result<(), BackendError> {
        self.record(BackendCall::Move { x, y, monitor }).await
    }

    async fn click(&self) -> Result<(), BackendError> {
        self.record(BackendCall::Click).await
    }

    async fn key(&self, chord: &str) -> Result<(), BackendError> {
        self.record(BackendCall::Key(chord.to_string())).await
    }

    async fn type_text(&self, text: &str) -> Result<(), BackendError> {
        self.record(BackendCall::Type(text.to_string())).await
    }
}
