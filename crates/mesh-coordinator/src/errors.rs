//! Mesh coordinator error types.
//!
//! Only errors that the caller can act on are represented here. Transient
//! signaling rejections are not errors: they are absorbed inside the peer
//! link and surface only as logs and metrics (see [`RejectReason`]).
//!
//! [`RejectReason`]: crate::signaling::RejectReason

use thiserror::Error;

/// Session-level error returned by [`SessionHandle`](crate::session::SessionHandle) controls.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Local camera, microphone or screen capture could not be acquired.
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaError),

    /// Signal relay operation failed (subscribe).
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Session registry operation failed.
    #[error("Session registry error: {0}")]
    Registry(String),

    /// The session already holds the maximum number of participants.
    #[error("Session is full (max {max} participants)")]
    SessionFull { max: usize },

    /// The session has ended.
    #[error("Session has ended")]
    SessionEnded,

    /// Operation requires the local participant to have joined.
    #[error("Not joined to a session")]
    NotJoined,

    /// `join_session` called twice.
    #[error("Already joined")]
    AlreadyJoined,

    /// Screen share is already running.
    #[error("Screen share already active")]
    ScreenShareActive,

    /// No screen share to stop.
    #[error("No active screen share")]
    NoScreenShare,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor channel closed, task gone).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeshError {
    /// Whether this error prevents the local participant from being in the session.
    ///
    /// Only failing to acquire the local capture is fatal: nobody can join
    /// without media. Everything scoped to a single peer is recovered locally.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, MeshError::MediaAcquisition(_))
    }
}

/// Local media capture errors reported by the Local Media Controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// The user or OS refused capture permission.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No usable device.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Anything else the capture layer reports.
    #[error("{0}")]
    Other(String),
}

/// Signal relay errors.
///
/// Send failures are logged and never retried by the coordinator; retry
/// policy, if any, belongs to the relay itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The message could not be handed to the relay.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Subscribing to inbound signals failed.
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),
}

/// Errors from the peer-connection layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The connection could not be created.
    #[error("Failed to create connection: {0}")]
    Create(String),

    /// A description or candidate was refused by the connection layer.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Operation on a closed connection.
    #[error("Connection closed")]
    Closed,
}
