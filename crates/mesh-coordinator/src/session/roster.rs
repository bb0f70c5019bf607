//! Read-only view of the session roster owned by the Session Registry.

use common::types::{ParticipantId, SessionId};
use serde::{Deserialize, Serialize};

/// Participant lifecycle as recorded by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    Invited,
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub join_status: JoinStatus,
}

impl Participant {
    #[must_use]
    pub fn new(id: impl Into<ParticipantId>, display_name: impl Into<String>, join_status: JoinStatus) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            join_status,
        }
    }

    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.join_status == JoinStatus::Joined
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
}

/// A session and its participants. Membership matters, order does not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    pub participants: Vec<Participant>,
}

impl Session {
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }

    /// Joined participants other than `local`.
    pub fn joined_remotes<'a>(
        &'a self,
        local: &'a ParticipantId,
    ) -> impl Iterator<Item = &'a ParticipantId> + 'a {
        self.participants
            .iter()
            .filter(move |p| p.is_joined() && &p.id != local)
            .map(|p| &p.id)
    }

    /// Number of joined participants, local included.
    #[must_use]
    pub fn joined_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_joined()).count()
    }
}

/// Roster change pushed by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEvent {
    ParticipantJoined(Participant),
    ParticipantLeft(ParticipantId),
    /// Full replacement view, used for reconciliation.
    RosterUpdated(Session),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            id: SessionId::from("M"),
            status: SessionStatus::Active,
            participants: vec![
                Participant::new("111", "Ann", JoinStatus::Joined),
                Participant::new("222", "Bo", JoinStatus::Joined),
                Participant::new("333", "Cy", JoinStatus::Invited),
                Participant::new("444", "Di", JoinStatus::Left),
            ],
        }
    }

    #[test]
    fn test_joined_remotes_excludes_local_and_not_joined() {
        let session = session();
        let local = ParticipantId::from("111");
        let remotes: Vec<&ParticipantId> = session.joined_remotes(&local).collect();
        assert_eq!(remotes, vec![&ParticipantId::from("222")]);
        assert_eq!(session.joined_count(), 2);
    }

    #[test]
    fn test_session_status_serde() {
        let json = serde_json::to_string(&SessionStatus::Ended).unwrap();
        assert_eq!(json, "\"ended\"");
        let status: JoinStatus = serde_json::from_str("\"invited\"").unwrap();
        assert_eq!(status, JoinStatus::Invited);
    }
}
