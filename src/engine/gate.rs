//! Human confirmation gates.
//!
//! A gate step parks the run on a single-use channel and races it against
//! the gate timeout and the run's cancellation token. The sending half is
//! wrapped in a `GateResponder` that travels inside the
//! `confirmation_required` event and is also indexed by request id in the
//! `ConfirmationBroker`, so both an in-process consumer and a remote
//! transport can answer. Whichever answers first wins; later answers are
//! rejected.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// A human's answer to a gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Approved,
    Denied { reason: Option<String> },
}

/// Single-use handle that answers one gate
#[derive(Clone)]
pub struct GateResponder {
    request_id: String,
    slot: Arc<Mutex<Option<oneshot::Sender<GateDecision>>>>,
}

impl GateResponder {
    /// Create a responder and the receiver the gate waits on
    pub fn pair(request_id: impl Into<String>) -> (Self, oneshot::Receiver<GateDecision>) {
        let (tx, rx) = oneshot::channel();
        let responder = Self {
            request_id: request_id.into(),
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (responder, rx)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Deliver a decision. Fails if the gate was already answered or closed.
    pub fn respond(&self, decision: GateDecision) -> Result<()> {
        let sender = self
            .slot
            .lock()
            .map_err(|_| EngineError::confirmation("responder lock poisoned"))?
            .take()
            .ok_or_else(|| {
                EngineError::confirmation(format!(
                    "request {} was already answered",
                    self.request_id
                ))
            })?;

        sender.send(decision).map_err(|_| {
            EngineError::confirmation(format!("request {} is no longer waiting", self.request_id))
        })
    }

    pub fn approve(&self) -> Result<()> {
        self.respond(GateDecision::Approved)
    }

    pub fn deny(&self, reason: impl Into<String>) -> Result<()> {
        self.respond(GateDecision::Denied {
            reason: Some(reason.into()),
        })
    }

    /// True until a decision has been delivered
    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }
}

impl fmt::Debug for GateResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateResponder")
            .field("request_id", &self.request_id)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// A gate currently waiting for an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingConfirmation {
    pub request_id: String,
    pub run_id: String,
    pub step: String,
    pub message: String,
}

/// Index of open gates across all runs of an engine
#[derive(Debug, Clone, Default)]
pub struct ConfirmationBroker {
    open: Arc<Mutex<HashMap<String, (PendingConfirmation, GateResponder)>>>,
}

impl ConfirmationBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new gate and return its responder and receiver
    pub(crate) fn open(
        &self,
        run_id: &str,
        step: &str,
        message: &str,
    ) -> (GateResponder, oneshot::Receiver<GateDecision>) {
        let request_id = Uuid::new_v4().to_string();
        let (responder, rx) = GateResponder::pair(request_id.clone());
        let info = PendingConfirmation {
            request_id: request_id.clone(),
            run_id: run_id.to_string(),
            step: step.to_string(),
            message: message.to_string(),
        };
        if let Ok(mut open) = self.open.lock() {
            open.insert(request_id, (info, responder.clone()));
        }
        (responder, rx)
    }

    /// Forget a gate once it has resolved
    pub(crate) fn close(&self, request_id: &str) {
        if let Ok(mut open) = self.open.lock() {
            open.remove(request_id);
        }
    }

    /// Answer a gate by request id
    pub fn respond(&self, request_id: &str, decision: GateDecision) -> Result<()> {
        let responder = {
            let open = self
                .open
                .lock()
                .map_err(|_| EngineError::confirmation("broker lock poisoned"))?;
            open.get(request_id)
                .map(|(_, responder)| responder.clone())
                .ok_or_else(|| {
                    EngineError::confirmation(format!("unknown request {}", request_id))
                })?
        };
        info!("Confirmation {} answered: {:?}", request_id, decision);
        responder.respond(decision)
    }

    /// Gates currently waiting, in no particular order
    pub fn pending(&self) -> Vec<PendingConfirmation> {
        self.open
            .lock()
            .map(|open| open.values().map(|(info, _)| info.clone()).collect())
            .unwrap_or_default()
    }
}

/// How a gate wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GateOutcome {
    Approved,
    Denied(Option<String>),
    TimedOut,
    Cancelled,
}

/// Wait for a decision, the deadline, or cancellation, whichever comes first
pub(crate) async fn wait(
    rx: oneshot::Receiver<GateDecision>,
    deadline: Instant,
    cancel: &CancellationToken,
) -> GateOutcome {
    tokio::select! {
        decision = rx => match decision {
            Ok(GateDecision::Approved) => GateOutcome::Approved,
            Ok(GateDecision::Denied { reason }) => GateOutcome::Denied(reason),
            Err(_) => {
                debug!("Gate responder dropped without an answer");
                GateOutcome::Denied(Some("confirmation channel closed".to_string()))
            }
        },
        _ = tokio::time::sleep_until(deadline) => GateOutcome::TimedOut,
        _ = cancel.cancelled() => GateOutcome::Cancelled,
    }
}
