//! Message types for the session coordinator.

use crate::errors::MeshError;
use crate::media::{MediaSink, StreamHandle, StreamKind};
use crate::peer::PeerSnapshot;
use crate::signaling::NegotiationState;
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, SessionId};
use serde::Serialize;
use tokio::sync::oneshot;

/// Messages handled by the `SessionCoordinator`.
pub enum SessionMessage {
    /// Acquire local media, join the registry and connect to every joined
    /// participant.
    Join {
        respond_to: oneshot::Sender<Result<JoinResult, MeshError>>,
    },

    /// Tear down every peer, unsubscribe and leave the registry.
    Leave {
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    /// Flip the camera video track. Responds with the new enabled state.
    ToggleCamera {
        respond_to: oneshot::Sender<Result<bool, MeshError>>,
    },

    /// Flip the microphone track. Responds with the new enabled state.
    ToggleMicrophone {
        respond_to: oneshot::Sender<Result<bool, MeshError>>,
    },

    StartScreenShare {
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    StopScreenShare {
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    /// Bind a consumer to a participant's stream slot.
    AttachSink {
        participant: ParticipantId,
        kind: StreamKind,
        sink: Box<dyn MediaSink>,
        respond_to: oneshot::Sender<()>,
    },

    /// Unbind a consumer. Responds with whether one was bound.
    DetachSink {
        participant: ParticipantId,
        kind: StreamKind,
        respond_to: oneshot::Sender<bool>,
    },

    GetState {
        respond_to: oneshot::Sender<SessionState>,
    },

    PeerSnapshot {
        participant: ParticipantId,
        respond_to: oneshot::Sender<Result<Option<PeerSnapshot>, MeshError>>,
    },
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinResult {
    /// Remote participants a link was created for.
    pub peers: Vec<ParticipantId>,
    pub joined_at: DateTime<Utc>,
}

/// Peer status reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "state")]
pub enum PeerState {
    Signaling(NegotiationState),
    /// The link failed and was torn down. Other peers are unaffected.
    Failed,
    /// The link was closed by a leave.
    Closed,
}

/// Event delivered to the application.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    RemoteStreamAdded {
        participant: ParticipantId,
        kind: StreamKind,
        stream: StreamHandle,
    },

    RemoteStreamRemoved {
        participant: ParticipantId,
        kind: StreamKind,
    },

    PeerStateChanged {
        participant: ParticipantId,
        state: PeerState,
    },

    /// The registry reported the session ended; the local side has left.
    SessionEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Joined,
    Left,
}

/// Snapshot of the coordinator state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub local_id: ParticipantId,
    pub phase: SessionPhase,
    /// Remote participants with a live link, sorted.
    pub peers: Vec<ParticipantId>,
    pub camera_enabled: bool,
    pub microphone_enabled: bool,
    pub screen_sharing: bool,
    /// Published remote streams.
    pub remote_streams: usize,
    pub joined_at: Option<DateTime<Utc>>,
}
