//! Session coordination.
//!
//! - [`coordinator`] - the per-session actor and its handle
//! - [`messages`] - coordinator messages, application events and state
//! - [`roster`] - read-only registry roster types
//! - [`registry`] / [`relay`] - the external collaborator seams

pub mod coordinator;
pub mod messages;
pub mod registry;
pub mod relay;
pub mod roster;

pub use coordinator::{Collaborators, SessionCoordinator, SessionHandle};
pub use messages::{JoinResult, PeerState, SessionEvent, SessionPhase, SessionState};
pub use registry::SessionRegistry;
pub use relay::SignalRelay;
pub use roster::{JoinStatus, Participant, RosterEvent, Session, SessionStatus};
