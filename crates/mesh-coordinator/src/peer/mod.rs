//! Peer links: one actor per remote participant.
//!
//! - [`link`] - synchronous negotiation state of one link
//! - [`actor`] - the actor that drives a link and its connection
//! - [`manager`] - creation, routing and teardown of all links
//! - [`connection`] - the peer-connection seam
//! - [`messages`] - actor messages, events and snapshots

pub mod actor;
pub mod connection;
pub mod link;
pub mod manager;
pub mod messages;

pub use actor::{PeerActor, PeerActorHandle, PeerContext};
pub use connection::{ConnectionEvent, PeerConnection, PeerConnectionFactory};
pub use link::{PeerLink, Received};
pub use manager::{
    CreateOutcome, Crashed, DestroyReason, DropReason, PeerConnectionManager, RefuseReason,
    Routed,
};
pub use messages::{Origin, PeerEvent, PeerEventKind, PeerMessage, PeerSnapshot};
