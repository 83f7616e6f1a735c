/// Biometric authentication for software-gated signing.
///
/// Only one signing request may wait on the authenticator at a time. Starting
/// a new one supersedes the pending one: the old request resolves to
/// `VaultError::Cancelled` and its caller never sees a signature.
///
/// ```text
/// Idle -> AwaitingBiometric -> Signed | Denied | Cancelled -> Idle
///              |
///              +-- new request --> (old) Cancelled, (new) AwaitingBiometric
/// ```
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Result, VaultError};

/// Result of one biometric evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Approved,
    /// The user failed or refused the check.
    Denied(String),
    /// The device could not evaluate the policy at all.
    Unavailable(String),
    /// The evaluation was dismissed by the app.
    Cancelled,
}

impl AuthOutcome {
    pub fn into_result(self) -> Result<()> {
        match self {
            AuthOutcome::Approved => Ok(()),
            AuthOutcome::Denied(reason) => Err(VaultError::AuthenticationDenied(reason)),
            AuthOutcome::Unavailable(reason) => {
                Err(VaultError::AuthenticationUnavailable(reason))
            }
            AuthOutcome::Cancelled => Err(VaultError::Cancelled),
        }
    }
}

/// Device biometric check.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether biometrics are enrolled and usable.
    fn can_evaluate(&self) -> bool;

    /// Prompt the user and wait for the outcome.
    async fn evaluate(&self, prompt: &str) -> AuthOutcome;

    /// Dismiss any prompt currently shown.
    fn invalidate(&self);
}

/// Authenticator for devices without biometrics; every check is unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBiometrics;

#[async_trait]
impl Authenticator for NoBiometrics {
    fn can_evaluate(&self) -> bool {
        false
    }

    async fn evaluate(&self, _prompt: &str) -> AuthOutcome {
        AuthOutcome::Unavailable("biometric authentication is not available".into())
    }

    fn invalidate(&self) {}
}

/// Authenticator that approves every check. For tests and headless tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysApprove;

#[async_trait]
impl Authenticator for AlwaysApprove {
    fn can_evaluate(&self) -> bool {
        true
    }

    async fn evaluate(&self, _prompt: &str) -> AuthOutcome {
        AuthOutcome::Approved
    }

    fn invalidate(&self) {}
}

struct ActiveSession {
    id: u64,
    cancel: oneshot::Sender<()>,
}

/// Receipt for a started session. `cancelled` resolves when the session is
/// superseded or cancelled. Dropping the ticket releases the slot if this
/// session still owns it.
pub(crate) struct SessionTicket<'a> {
    slot: &'a SessionSlot,
    pub id: u64,
    pub cancelled: oneshot::Receiver<()>,
    pub superseded: bool,
}

impl Drop for SessionTicket<'_> {
    fn drop(&mut self) {
        self.slot.finish(self.id);
    }
}

/// Holds the single pending signing session.
#[derive(Default)]
pub(crate) struct SessionSlot {
    current: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
}

impl SessionSlot {
    /// Recovers a poisoned lock.
    fn lock(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session, cancelling whichever one was pending.
    pub fn begin(&self) -> SessionTicket<'_> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let previous = self.lock().replace(ActiveSession { id, cancel: tx });

        let superseded = match previous {
            Some(old) => {
                debug!(old = old.id, new = id, "superseding pending signing request");
                let _ = old.cancel.send(());
                true
            }
            None => false,
        };

        SessionTicket {
            slot: self,
            id,
            cancelled: rx,
            superseded,
        }
    }

    /// Clear the slot if `id` still owns it.
    pub fn finish(&self, id: u64) {
        let mut current = self.lock();
        if current.as_ref().is_some_and(|s| s.id == id) {
            current.take();
        }
    }

    /// Cancel the pending session. Returns false when there was none.
    pub fn cancel(&self) -> bool {
        let taken = self.lock().take();
        match taken {
            Some(session) => {
                debug!(id = session.id, "cancelling pending signing request");
                let _ = session.cancel.send(());
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }
}
