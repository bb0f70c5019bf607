//! Message and event types for peer actors.

use crate::media::{StreamHandle, StreamKind};
use crate::signaling::{NegotiationState, SignalMessage};
use common::types::{ParticipantId, StreamId};
use serde::Serialize;
use tokio::sync::oneshot;

/// How a peer link came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// The roster reported the remote as joined.
    Roster,
    /// A signal arrived before the roster did. Such a link never sends the
    /// first offer.
    InboundSignal,
}

/// Messages handled by a `PeerActor`.
#[derive(Debug)]
pub enum PeerMessage {
    /// Inbound signal from the relay.
    Signal(SignalMessage),

    /// Start sending a shared local stream.
    AttachLocalStream(StreamHandle),

    /// Stop sending a local stream.
    DetachLocalStream(StreamId),

    /// The roster confirmed the remote; a lazily created link may now
    /// originate the first offer.
    Promote,

    Snapshot {
        respond_to: oneshot::Sender<PeerSnapshot>,
    },
}

/// Event emitted by a `PeerActor`, tagged with the link generation.
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub remote: ParticipantId,
    pub link_id: u64,
    pub kind: PeerEventKind,
}

#[derive(Debug, Clone)]
pub enum PeerEventKind {
    StateChanged(NegotiationState),

    RemoteStreamAdded {
        kind: StreamKind,
        stream: StreamHandle,
    },

    RemoteStreamRemoved {
        kind: StreamKind,
    },

    /// Permanent failure. The link is already closed.
    Failed {
        reason: String,
        timed_out: bool,
    },
}

/// Point-in-time view of a peer link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSnapshot {
    pub remote: ParticipantId,
    pub link_id: u64,
    pub state: NegotiationState,
    pub is_initiator: bool,
    pub origin: Origin,
    pub remote_streams: Vec<StreamKind>,
    pub local_streams: usize,
    pub dedup_entries: usize,
    pub deferred_candidates: usize,
    pub negotiations_completed: u64,
}
