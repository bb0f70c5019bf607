//! `PeerLink` - the negotiation state for one remote participant.
//!
//! Every signal, inbound or outbound, passes through the link before anything
//! touches the connection layer:
//!
//! 1. closed links reject everything
//! 2. the deduplicator rejects relay replays
//! 3. candidates wait in a FIFO until a remote description is applied
//! 4. the state machine accepts or rejects the step
//!
//! The link is plain data. Its owning actor performs the asynchronous
//! connection work that each accepted step calls for.

use super::messages::{Origin, PeerSnapshot};
use crate::media::{Classified, InboundStream, RemoteStreams, StreamHandle, StreamKind};
use crate::signaling::{
    is_initiator, Applied, Direction, IceCandidate, NegotiationState, RejectReason,
    SessionDescription, SignalDeduplicator, SignalKind, SignalMessage, SignalPayload,
    SignalingStateMachine, StreamAnnouncement, StreamPurpose,
};
use common::types::{ParticipantId, StreamId};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// What the owner must do with an inbound signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Apply the remote offer, then answer it.
    Offer(SessionDescription),
    /// Apply the remote answer.
    Answer(SessionDescription),
    /// Hand the candidate to the connection.
    Candidate(IceCandidate),
    /// Parked until a remote description is applied.
    Deferred,
    Rejected(RejectReason),
}

pub struct PeerLink {
    local: ParticipantId,
    remote: ParticipantId,
    is_initiator: bool,
    origin: Origin,
    machine: SignalingStateMachine,
    dedup: SignalDeduplicator,
    deferred: VecDeque<IceCandidate>,
    has_remote_description: bool,
    remote_purposes: HashMap<StreamId, StreamPurpose>,
    remote_streams: RemoteStreams,
    local_streams: Vec<StreamHandle>,
    next_sequence: u64,
    renegotiation_pending: bool,
    negotiations_completed: u64,
    unstable_since: Option<Instant>,
    last_negotiation: Option<Duration>,
}

impl PeerLink {
    #[must_use]
    pub fn new(
        local: ParticipantId,
        remote: ParticipantId,
        origin: Origin,
        dedup_window: usize,
    ) -> Self {
        let is_initiator = is_initiator(&local, &remote);
        Self {
            local,
            remote,
            is_initiator,
            origin,
            machine: SignalingStateMachine::new(),
            dedup: SignalDeduplicator::new(dedup_window),
            deferred: VecDeque::new(),
            has_remote_description: false,
            remote_purposes: HashMap::new(),
            remote_streams: RemoteStreams::new(),
            local_streams: Vec::new(),
            next_sequence: 1,
            renegotiation_pending: false,
            negotiations_completed: 0,
            unstable_since: None,
            last_negotiation: None,
        }
    }

    #[must_use]
    pub fn remote(&self) -> &ParticipantId {
        &self.remote
    }

    #[must_use]
    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.machine.state()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.machine.is_closed()
    }

    /// Mark the link as roster-confirmed.
    pub fn promote(&mut self) {
        self.origin = Origin::Roster;
    }

    /// Whether this side may originate an offer at all.
    ///
    /// The first offer belongs to the tie-break initiator of a roster-confirmed
    /// link. After one completed negotiation either side may renegotiate.
    #[must_use]
    pub fn may_originate(&self) -> bool {
        self.negotiations_completed > 0 || (self.is_initiator && self.origin == Origin::Roster)
    }

    /// Whether the initial offer is still owed by this side.
    #[must_use]
    pub fn owes_initial_offer(&self) -> bool {
        self.negotiations_completed == 0
            && self.is_initiator
            && self.origin == Origin::Roster
            && self.state() == NegotiationState::Stable
            && !self.has_remote_description
    }

    /// Whether any description has been exchanged on this link, so that a
    /// change of local streams needs a renegotiation to reach the remote.
    #[must_use]
    pub fn negotiation_started(&self) -> bool {
        self.negotiations_completed > 0 || self.state() != NegotiationState::Stable
    }

    /// Run an inbound signal through dedup, deferral and the state machine.
    pub fn receive(&mut self, signal: &SignalMessage, now: Instant) -> Received {
        if self.is_closed() {
            return Received::Rejected(RejectReason::Closed);
        }

        if !self.dedup.should_apply(signal.dedup_key()) {
            return Received::Rejected(RejectReason::Duplicate);
        }

        match &signal.payload {
            SignalPayload::IceCandidate(candidate) => {
                if !self.has_remote_description {
                    self.deferred.push_back(candidate.clone());
                    return Received::Deferred;
                }
                match self.apply(Direction::Inbound, SignalKind::IceCandidate, now) {
                    Ok(()) => Received::Candidate(candidate.clone()),
                    Err(reason) => Received::Rejected(reason),
                }
            }
            SignalPayload::Offer(description) => {
                match self.apply(Direction::Inbound, SignalKind::Offer, now) {
                    Ok(()) => {
                        self.learn_remote_purposes(description);
                        Received::Offer(description.clone())
                    }
                    Err(reason) => Received::Rejected(reason),
                }
            }
            SignalPayload::Answer(description) => {
                match self.apply(Direction::Inbound, SignalKind::Answer, now) {
                    Ok(()) => {
                        self.learn_remote_purposes(description);
                        Received::Answer(description.clone())
                    }
                    Err(reason) => Received::Rejected(reason),
                }
            }
        }
    }

    /// Record that the connection accepted a remote description, and return
    /// the parked candidates in receipt order.
    pub fn remote_description_applied(&mut self, now: Instant) -> Vec<IceCandidate> {
        self.has_remote_description = true;
        let mut ready = Vec::with_capacity(self.deferred.len());
        while let Some(candidate) = self.deferred.pop_front() {
            if self
                .apply(Direction::Inbound, SignalKind::IceCandidate, now)
                .is_ok()
            {
                ready.push(candidate);
            }
        }
        ready
    }

    /// Check that a local offer would be accepted, without changing state.
    pub fn check_offer(&self) -> Result<(), RejectReason> {
        match self.machine.evaluate(Direction::Outbound, SignalKind::Offer) {
            Applied::Transition { .. } => Ok(()),
            Applied::Rejected(reason) => Err(reason),
        }
    }

    /// Turn a locally generated payload into an addressed, sequenced message.
    ///
    /// This is the only way outbound signals are produced, so a second offer
    /// for the same negotiation step is rejected here and never reaches the
    /// relay. Descriptions are tagged with the purpose of every local stream.
    pub fn seal(
        &mut self,
        mut payload: SignalPayload,
        now: Instant,
    ) -> Result<SignalMessage, RejectReason> {
        self.apply(Direction::Outbound, payload.kind(), now)?;

        if let SignalPayload::Offer(description) | SignalPayload::Answer(description) =
            &mut payload
        {
            description.streams = self.announcements();
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        Ok(SignalMessage {
            from: self.local.clone(),
            to: self.remote.clone(),
            sequence,
            payload,
        })
    }

    pub fn note_negotiation_needed(&mut self) {
        self.renegotiation_pending = true;
    }

    /// Consume a pending renegotiation if the link can serve it now.
    pub fn take_renegotiation(&mut self) -> bool {
        if self.renegotiation_pending
            && self.state() == NegotiationState::Stable
            && self.may_originate()
        {
            self.renegotiation_pending = false;
            return true;
        }
        false
    }

    /// Duration of the negotiation that last returned the link to `Stable`.
    pub fn take_negotiation_duration(&mut self) -> Option<Duration> {
        self.last_negotiation.take()
    }

    /// Whether the link has been out of `Stable` for at least `timeout`.
    #[must_use]
    pub fn negotiation_overdue(&self, now: Instant, timeout: Duration) -> bool {
        !self.is_closed()
            && self
                .unstable_since
                .is_some_and(|since| now.saturating_duration_since(since) >= timeout)
    }

    /// Classify and store a remote stream.
    pub fn accept_remote_stream(&mut self, stream: &InboundStream) -> Option<Classified> {
        if self.is_closed() {
            return None;
        }
        let purpose = self.remote_purposes.get(&stream.stream_id).copied();
        Some(self.remote_streams.merge(&self.remote, stream, purpose))
    }

    pub fn remote_stream_ended(&mut self, stream_id: StreamId) -> Option<StreamKind> {
        self.remote_streams.remove_stream(stream_id)
    }

    /// Track a local stream. Returns `false` if it is already tracked.
    pub fn add_local_stream(&mut self, stream: StreamHandle) -> bool {
        if self.local_streams.iter().any(|s| s.id() == stream.id()) {
            return false;
        }
        self.local_streams.push(stream);
        true
    }

    /// Stop tracking a local stream. Returns `false` if it was not tracked.
    pub fn remove_local_stream(&mut self, stream_id: StreamId) -> bool {
        let before = self.local_streams.len();
        self.local_streams.retain(|s| s.id() != stream_id);
        self.local_streams.len() != before
    }

    #[must_use]
    pub fn local_streams(&self) -> &[StreamHandle] {
        &self.local_streams
    }

    /// Close the link and release everything it holds. Returns the kinds of
    /// the remote streams that were released.
    pub fn close(&mut self) -> Vec<StreamKind> {
        self.machine.close();
        self.dedup.clear();
        self.deferred.clear();
        self.remote_purposes.clear();
        self.local_streams.clear();
        self.renegotiation_pending = false;
        self.unstable_since = None;
        self.remote_streams.release_all()
    }

    #[must_use]
    pub fn snapshot(&self, link_id: u64) -> PeerSnapshot {
        PeerSnapshot {
            remote: self.remote.clone(),
            link_id,
            state: self.state(),
            is_initiator: self.is_initiator,
            origin: self.origin,
            remote_streams: self.remote_streams.kinds(),
            local_streams: self.local_streams.len(),
            dedup_entries: self.dedup.len(),
            deferred_candidates: self.deferred.len(),
            negotiations_completed: self.negotiations_completed,
        }
    }

    fn apply(
        &mut self,
        direction: Direction,
        kind: SignalKind,
        now: Instant,
    ) -> Result<(), RejectReason> {
        match self.machine.apply(direction, kind) {
            Applied::Transition { from, to } => {
                self.on_transition(from, to, now);
                Ok(())
            }
            Applied::Rejected(reason) => Err(reason),
        }
    }

    fn on_transition(&mut self, from: NegotiationState, to: NegotiationState, now: Instant) {
        use NegotiationState::Stable;

        if from == Stable && to != Stable {
            self.unstable_since = Some(now);
        } else if from != Stable && to == Stable {
            self.negotiations_completed += 1;
            self.last_negotiation = self
                .unstable_since
                .take()
                .map(|since| now.saturating_duration_since(since));
        }
    }

    fn learn_remote_purposes(&mut self, description: &SessionDescription) {
        self.remote_purposes = description
            .streams
            .iter()
            .map(|a| (a.stream_id, a.purpose))
            .collect();
    }

    fn announcements(&self) -> Vec<StreamAnnouncement> {
        self.local_streams
            .iter()
            .map(|stream| StreamAnnouncement {
                stream_id: stream.id(),
                purpose: match stream.kind() {
                    StreamKind::Camera => StreamPurpose::Camera,
                    StreamKind::ScreenShare => StreamPurpose::ScreenShare,
                },
            })
            .collect()
    }
}
