//! Single-slot gate that pauses a request while credentials are obtained.
//!
//! The worker arms the gate and awaits it; a delegate (through an
//! [`AuthResponder`]) or a cancel signals it exactly once. Only one waiter
//! can be pending at a time.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use super::{AuthChallenge, Credential};

/// Value delivered through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateSignal {
    /// Resume with these credentials.
    Credentials(Credential),
    /// The delegate will not supply credentials.
    Declined,
    /// The request was cancelled while paused.
    Cancelled,
}

/// Error returned when arming a gate that already has a pending waiter.
#[derive(Debug, thiserror::Error)]
#[error("authentication gate already has a pending waiter")]
pub struct GateBusy;

/// The pending-credentials gate.
#[derive(Debug, Default)]
pub struct Gate {
    slot: Mutex<Option<oneshot::Sender<GateSignal>>>,
}

impl Gate {
    /// Creates an unarmed gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the gate and returns the receiver the worker waits on.
    ///
    /// # Errors
    ///
    /// Returns [`GateBusy`] if a waiter is already pending.
    pub fn arm(&self) -> Result<oneshot::Receiver<GateSignal>, GateBusy> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|sender| !sender.is_closed()) {
            return Err(GateBusy);
        }
        let (sender, receiver) = oneshot::channel();
        *slot = Some(sender);
        Ok(receiver)
    }

    /// Delivers `signal` to the pending waiter.
    ///
    /// Returns false if nothing was waiting.
    pub fn signal(&self, signal: GateSignal) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => sender.send(signal).is_ok(),
            None => false,
        }
    }

    /// Whether a waiter is currently pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }
}

/// Handle given to a delegate so it can resume or decline a paused request,
/// from any thread, now or later.
#[derive(Debug, Clone)]
pub struct AuthResponder {
    gate: Arc<Gate>,
    challenge: AuthChallenge,
}

impl AuthResponder {
    pub(crate) fn new(gate: Arc<Gate>, challenge: AuthChallenge) -> Self {
        Self { gate, challenge }
    }

    /// The challenge being answered.
    #[must_use]
    pub fn challenge(&self) -> &AuthChallenge {
        &self.challenge
    }

    /// The realm being answered.
    #[must_use]
    pub fn realm(&self) -> &str {
        self.challenge.realm()
    }

    /// Resumes the request with the given credentials.
    ///
    /// Returns false if the request is no longer waiting.
    pub fn retry_with_credentials(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> bool {
        debug!(realm = %self.realm(), "delegate supplied credentials");
        self.gate
            .signal(GateSignal::Credentials(Credential::new(username, password)))
    }

    /// Declines the challenge; the request fails with an authentication error.
    ///
    /// Returns false if the request is no longer waiting.
    pub fn decline(&self) -> bool {
        debug!(realm = %self.realm(), "delegate declined challenge");
        self.gate.signal(GateSignal::Declined)
    }
}
