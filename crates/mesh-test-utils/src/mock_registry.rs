//! Mock session registry for mesh testing.
//!
//! Keeps sessions in memory. `join` and `leave` update the roster and
//! broadcast the change to every subscriber of the session, the way a real
//! registry pushes roster updates.

use async_trait::async_trait;
use common::types::{ParticipantId, SessionId};
use mesh_coordinator::errors::MeshError;
use mesh_coordinator::session::{
    JoinStatus, Participant, RosterEvent, Session, SessionRegistry, SessionStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Per-subscriber roster event buffer.
const ROSTER_BUFFER: usize = 64;

#[derive(Debug, Default)]
pub struct MockRegistry {
    sessions: Mutex<HashMap<SessionId, Session>>,
    subscribers: Mutex<HashMap<SessionId, Vec<mpsc::Sender<RosterEvent>>>>,
    fail_joins: AtomicBool,
    joins: AtomicUsize,
    leaves: AtomicUsize,
}

impl MockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a session, replacing any existing one with the same id.
    #[must_use]
    pub fn with_session(self, session: Session) -> Self {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
        self
    }

    /// Make every join fail with `MeshError::Registry`.
    pub fn set_fail_joins(&self, enabled: bool) {
        self.fail_joins.store(enabled, Ordering::SeqCst);
    }

    #[must_use]
    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn leave_count(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn session(&self, id: &SessionId) -> Option<Session> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    /// Mark the session ended and push the updated roster.
    pub fn end_session(&self, id: &SessionId) {
        let updated = {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(id) else {
                return;
            };
            session.status = SessionStatus::Ended;
            session.clone()
        };
        self.broadcast(id, &RosterEvent::RosterUpdated(updated));
    }

    /// Push an arbitrary roster event to the session's subscribers.
    pub fn push(&self, id: &SessionId, event: RosterEvent) {
        self.broadcast(id, &event);
    }

    fn broadcast(&self, id: &SessionId, event: &RosterEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(senders) = subscribers.get_mut(id) {
            senders.retain(|tx| !tx.is_closed());
            for tx in senders.iter() {
                let _ = tx.try_send(event.clone());
            }
        }
    }
}

#[async_trait]
impl SessionRegistry for MockRegistry {
    async fn join(
        &self,
        session: &SessionId,
        participant: &ParticipantId,
    ) -> Result<Session, MeshError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        if self.fail_joins.load(Ordering::SeqCst) {
            return Err(MeshError::Registry("registry unavailable".to_string()));
        }

        let (snapshot, joined) = {
            let mut sessions = self.sessions.lock().unwrap();
            let record = sessions.entry(session.clone()).or_insert_with(|| Session {
                id: session.clone(),
                status: SessionStatus::Active,
                participants: Vec::new(),
            });
            if record.status == SessionStatus::Ended {
                return Ok(record.clone());
            }

            let joined = match record.participants.iter_mut().find(|p| &p.id == participant) {
                Some(existing) => {
                    existing.join_status = JoinStatus::Joined;
                    existing.clone()
                }
                None => {
                    let added =
                        Participant::new(participant.clone(), participant.as_str(), JoinStatus::Joined);
                    record.participants.push(added.clone());
                    added
                }
            };
            (record.clone(), joined)
        };

        self.broadcast(session, &RosterEvent::ParticipantJoined(joined));
        Ok(snapshot)
    }

    async fn leave(
        &self,
        session: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), MeshError> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        {
            let mut sessions = self.sessions.lock().unwrap();
            if let Some(record) = sessions.get_mut(session) {
                if let Some(existing) = record.participants.iter_mut().find(|p| &p.id == participant) {
                    existing.join_status = JoinStatus::Left;
                }
            }
        }
        self.broadcast(session, &RosterEvent::ParticipantLeft(participant.clone()));
        Ok(())
    }

    async fn subscribe(&self, session: &SessionId) -> Result<mpsc::Receiver<RosterEvent>, MeshError> {
        let (tx, rx) = mpsc::channel(ROSTER_BUFFER);
        self.subscribers
            .lock()
            .unwrap()
            .entry(session.clone())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_broadcasts_to_subscribers() {
        let registry = MockRegistry::new();
        let session = SessionId::from("s-1");
        let mut roster = registry.subscribe(&session).await.unwrap();

        let snapshot = registry
            .join(&session, &ParticipantId::from("111"))
            .await
            .unwrap();
        assert_eq!(snapshot.joined_count(), 1);

        match roster.recv().await.unwrap() {
            RosterEvent::ParticipantJoined(p) => assert_eq!(p.id, ParticipantId::from("111")),
            other => unreachable!("unexpected event {other:?}"),
        }

        registry
            .leave(&session, &ParticipantId::from("111"))
            .await
            .unwrap();
        assert_eq!(
            roster.recv().await.unwrap(),
            RosterEvent::ParticipantLeft(ParticipantId::from("111"))
        );
        assert_eq!(registry.session(&session).unwrap().joined_count(), 0);
    }

    #[tokio::test]
    async fn test_end_session() {
        let registry = MockRegistry::new();
        let session = SessionId::from("s-1");
        registry.join(&session, &ParticipantId::from("111")).await.unwrap();
        let mut roster = registry.subscribe(&session).await.unwrap();

        registry.end_session(&session);
        match roster.recv().await.unwrap() {
            RosterEvent::RosterUpdated(updated) => assert!(updated.is_ended()),
            other => unreachable!("unexpected event {other:?}"),
        }
    }
}
