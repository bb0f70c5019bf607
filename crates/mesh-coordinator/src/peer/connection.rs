//! Peer-connection seam.
//!
//! The connection layer produces and consumes the opaque negotiation blob,
//! gathers candidates and carries media. Everything it learns asynchronously
//! is pushed as a [`ConnectionEvent`] on the channel it was created with.

use crate::errors::ConnectionError;
use crate::media::{InboundStream, StreamHandle};
use crate::signaling::{IceCandidate, SessionDescription};
use common::types::{ParticipantId, StreamId};
use tokio::sync::mpsc;

/// Asynchronous notification from a peer connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A local candidate was gathered and should be sent to the remote.
    LocalCandidate(IceCandidate),
    /// The remote started sending a stream.
    RemoteStream(InboundStream),
    /// A remote stream went away.
    RemoteStreamEnded(StreamId),
    /// Local streams changed after the link was established.
    NegotiationNeeded,
    /// Permanent failure.
    Failed(String),
}

/// One direct connection to one remote participant.
#[async_trait::async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_stream(&mut self, stream: &StreamHandle) -> Result<(), ConnectionError>;

    async fn remove_local_stream(&mut self, stream_id: StreamId) -> Result<(), ConnectionError>;

    async fn create_offer(&mut self) -> Result<SessionDescription, ConnectionError>;

    /// Create an answer to the remote description last applied.
    async fn create_answer(&mut self) -> Result<SessionDescription, ConnectionError>;

    async fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), ConnectionError>;

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), ConnectionError>;

    /// Release the connection. Idempotent.
    async fn close(&mut self);
}

/// Creates peer connections.
#[async_trait::async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        local: &ParticipantId,
        remote: &ParticipantId,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Box<dyn PeerConnection>, ConnectionError>;
}
