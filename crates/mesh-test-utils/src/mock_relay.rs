//! Mock signal relay for mesh testing.
//!
//! One [`MockRelay`] is shared by every participant of a test. Messages are
//! routed to the subscriber of `to`. The relay can be configured to:
//! - Deliver every message twice (at-least-once replay)
//! - Hold messages until the test releases them, in any order
//! - Accept and silently drop everything
//! - Refuse every send

use async_trait::async_trait;
use common::types::ParticipantId;
use mesh_coordinator::errors::RelayError;
use mesh_coordinator::session::SignalRelay;
use mesh_coordinator::signaling::SignalMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Per-subscriber inbound buffer.
const INBOX_BUFFER: usize = 256;

/// In-memory relay shared by all participants of a test.
#[derive(Debug, Default)]
pub struct MockRelay {
    subscribers: Mutex<HashMap<ParticipantId, mpsc::Sender<SignalMessage>>>,
    sent: Mutex<Vec<SignalMessage>>,
    held: Mutex<Vec<SignalMessage>>,
    duplicate: AtomicBool,
    hold: AtomicBool,
    drop_all: AtomicBool,
    fail_sends: AtomicBool,
}

impl MockRelay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver every message twice.
    pub fn set_duplicate(&self, enabled: bool) {
        self.duplicate.store(enabled, Ordering::SeqCst);
    }

    /// Hold messages instead of delivering them.
    pub fn set_hold(&self, enabled: bool) {
        self.hold.store(enabled, Ordering::SeqCst);
    }

    /// Accept sends but never deliver them.
    pub fn set_drop_all(&self, enabled: bool) {
        self.drop_all.store(enabled, Ordering::SeqCst);
    }

    /// Refuse every send with `RelayError::SendFailed`.
    pub fn set_fail_sends(&self, enabled: bool) {
        self.fail_sends.store(enabled, Ordering::SeqCst);
    }

    /// Every message accepted by the relay, in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<SignalMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages currently held.
    #[must_use]
    pub fn held(&self) -> Vec<SignalMessage> {
        self.held.lock().unwrap().clone()
    }

    /// Deliver held messages newest first, then stop holding.
    pub async fn release_held_reversed(&self) {
        self.set_hold(false);
        let held: Vec<SignalMessage> = std::mem::take(&mut *self.held.lock().unwrap());
        for message in held.into_iter().rev() {
            self.deliver(message).await;
        }
    }

    /// Deliver held messages in send order, then stop holding.
    pub async fn release_held(&self) {
        self.set_hold(false);
        let held: Vec<SignalMessage> = std::mem::take(&mut *self.held.lock().unwrap());
        for message in held {
            self.deliver(message).await;
        }
    }

    /// Deliver a message to its recipient, bypassing every mode.
    pub async fn inject(&self, message: SignalMessage) {
        self.deliver(message).await;
    }

    async fn deliver(&self, message: SignalMessage) {
        let subscriber = self.subscribers.lock().unwrap().get(&message.to).cloned();
        match subscriber {
            Some(subscriber) => {
                let _ = subscriber.send(message).await;
            }
            None => {
                tracing::debug!(
                    target: "mesh.test.relay",
                    to = %message.to,
                    "No subscriber, message dropped"
                );
            }
        }
    }
}

#[async_trait]
impl SignalRelay for MockRelay {
    async fn send(&self, message: SignalMessage) -> Result<(), RelayError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(RelayError::SendFailed("relay unavailable".to_string()));
        }

        self.sent.lock().unwrap().push(message.clone());

        if self.drop_all.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().unwrap().push(message);
            return Ok(());
        }

        if self.duplicate.load(Ordering::SeqCst) {
            self.deliver(message.clone()).await;
        }
        self.deliver(message).await;
        Ok(())
    }

    async fn subscribe(
        &self,
        local: &ParticipantId,
    ) -> Result<mpsc::Receiver<SignalMessage>, RelayError> {
        let (tx, rx) = mpsc::channel(INBOX_BUFFER);
        self.subscribers.lock().unwrap().insert(local.clone(), tx);
        Ok(rx)
    }
}
