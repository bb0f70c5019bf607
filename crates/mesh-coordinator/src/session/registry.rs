//! Session Registry seam.

use super::roster::{RosterEvent, Session};
use crate::errors::MeshError;
use common::types::{ParticipantId, SessionId};
use tokio::sync::mpsc;

/// External owner of session and participant records.
#[async_trait::async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Mark `participant` joined and return the roster as of the join.
    async fn join(
        &self,
        session: &SessionId,
        participant: &ParticipantId,
    ) -> Result<Session, MeshError>;

    async fn leave(&self, session: &SessionId, participant: &ParticipantId)
        -> Result<(), MeshError>;

    /// Stream of roster changes for `session`.
    async fn subscribe(&self, session: &SessionId) -> Result<mpsc::Receiver<RosterEvent>, MeshError>;
}
