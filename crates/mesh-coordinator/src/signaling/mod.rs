//! Negotiation primitives shared by every peer link.
//!
//! - [`tiebreak`] - coordination-free initiator assignment
//! - [`message`] - relay wire types and content-derived dedup keys
//! - [`state`] - the per-link negotiation state machine
//! - [`dedup`] - bounded replay memory
//! - [`pending`] - buffer for signals that arrive before their link exists

pub mod dedup;
pub mod message;
pub mod pending;
pub mod state;
pub mod tiebreak;

pub use dedup::SignalDeduplicator;
pub use message::{
    DedupKey, IceCandidate, SessionDescription, SignalKind, SignalMessage, SignalPayload,
    StreamAnnouncement, StreamPurpose,
};
pub use pending::{Enqueued, PendingSignalQueue};
pub use state::{Applied, Direction, NegotiationState, RejectReason, SignalingStateMachine};
pub use tiebreak::is_initiator;
