//! Signal Relay seam.

use crate::errors::RelayError;
use crate::signaling::SignalMessage;
use common::types::ParticipantId;
use tokio::sync::mpsc;

/// Out-of-band transport for signaling messages.
///
/// Delivery is at-least-once and unordered; `send` returning `Ok` only means
/// the relay accepted the message.
#[async_trait::async_trait]
pub trait SignalRelay: Send + Sync {
    /// Hand a message to the relay. Fire-and-forget.
    async fn send(&self, message: SignalMessage) -> Result<(), RelayError>;

    /// Subscribe to messages addressed to `local`.
    async fn subscribe(
        &self,
        local: &ParticipantId,
    ) -> Result<mpsc::Receiver<SignalMessage>, RelayError>;
}
