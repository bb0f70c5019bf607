//! Mesh Coordinator library.
//!
//! Coordinates a full-mesh, peer-to-peer media session: every participant
//! keeps one peer link to every other participant, negotiated over an
//! unordered, at-least-once signaling relay.
//!
//! # Architecture
//!
//! - [`session::SessionCoordinator`] - one actor per local participant and
//!   session. Owns local capture, the roster view and all peer links.
//! - [`peer::PeerActor`] - one actor per remote participant, driving a
//!   [`peer::PeerLink`] and its peer connection.
//! - [`signaling`] - tie-break, state machine, dedup and pending queue.
//! - [`media`] - shared local tracks, stream classification and the
//!   registry that binds remote streams to sinks.
//!
//! The relay, registry, media device layer and peer-connection engine are
//! traits; the embedding application supplies them.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod errors;
pub mod media;
pub mod observability;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::Config;
pub use errors::{ConnectionError, MediaError, MeshError, RelayError};
pub use session::{Collaborators, SessionCoordinator, SessionEvent, SessionHandle};
