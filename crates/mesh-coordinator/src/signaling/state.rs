//! Per-link negotiation state machine.
//!
//! Transition table:
//!
//! | From            | Signal              | To              |
//! |-----------------|---------------------|-----------------|
//! | Stable          | send Offer          | HaveLocalOffer  |
//! | Stable          | receive Offer       | HaveRemoteOffer |
//! | HaveLocalOffer  | receive Answer      | Stable          |
//! | HaveLocalOffer  | receive Offer       | HaveRemoteOffer (glare, last offer wins) |
//! | HaveRemoteOffer | receive Offer       | HaveRemoteOffer (newer offer replaces)   |
//! | HaveRemoteOffer | send Answer         | Stable          |
//! | any open        | send/recv candidate | unchanged       |
//! | any             | close               | Closed          |
//!
//! Everything else is rejected without a transition. Rejections are the
//! normal consequence of an unordered, at-least-once relay and are absorbed
//! by the caller, never escalated.

use super::message::SignalKind;
use serde::Serialize;
use std::fmt;

/// Negotiation state of one peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

impl NegotiationState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Stable => "stable",
            NegotiationState::HaveLocalOffer => "have_local_offer",
            NegotiationState::HaveRemoteOffer => "have_remote_offer",
            NegotiationState::Closed => "closed",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side produced the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Generated locally, about to be sent.
    Outbound,
    /// Received from the remote participant.
    Inbound,
}

/// Why a signal was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Answer received while `Stable`: stale or duplicate.
    StaleAnswer,
    /// Answer received while we hold the remote's offer.
    UnexpectedAnswer,
    /// Local offer already in flight.
    OfferInFlight,
    /// Local offer attempted while the remote's offer awaits our answer.
    RemoteOfferPending,
    /// Local answer attempted without a remote offer.
    NoRemoteOffer,
    /// Link is closed.
    Closed,
    /// Already applied (dedup).
    Duplicate,
}

impl RejectReason {
    /// Returns the reason as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RejectReason::StaleAnswer => "stale_answer",
            RejectReason::UnexpectedAnswer => "unexpected_answer",
            RejectReason::OfferInFlight => "offer_in_flight",
            RejectReason::RemoteOfferPending => "remote_offer_pending",
            RejectReason::NoRemoteOffer => "no_remote_offer",
            RejectReason::Closed => "closed",
            RejectReason::Duplicate => "duplicate",
        }
    }
}

/// Outcome of [`SignalingStateMachine::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Signal accepted. `from == to` for candidates.
    Transition {
        from: NegotiationState,
        to: NegotiationState,
    },
    /// Signal absorbed without any change.
    Rejected(RejectReason),
}

impl Applied {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Applied::Transition { .. })
    }
}

/// The negotiation state machine for one link.
#[derive(Debug)]
pub struct SignalingStateMachine {
    state: NegotiationState,
}

impl Default for SignalingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: NegotiationState::Stable,
        }
    }

    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Check a transition without performing it.
    #[must_use]
    pub fn evaluate(&self, direction: Direction, kind: SignalKind) -> Applied {
        use Direction::{Inbound, Outbound};
        use NegotiationState::{Closed, HaveLocalOffer, HaveRemoteOffer, Stable};

        let from = self.state;
        let to = match (from, direction, kind) {
            (Closed, _, _) => return Applied::Rejected(RejectReason::Closed),

            (_, _, SignalKind::IceCandidate) => from,

            (Stable, Outbound, SignalKind::Offer) => HaveLocalOffer,
            (HaveLocalOffer, Outbound, SignalKind::Offer) => {
                return Applied::Rejected(RejectReason::OfferInFlight)
            }
            (HaveRemoteOffer, Outbound, SignalKind::Offer) => {
                return Applied::Rejected(RejectReason::RemoteOfferPending)
            }

            (Stable | HaveLocalOffer | HaveRemoteOffer, Inbound, SignalKind::Offer) => {
                HaveRemoteOffer
            }

            (HaveLocalOffer, Inbound, SignalKind::Answer) => Stable,
            (Stable, Inbound, SignalKind::Answer) => {
                return Applied::Rejected(RejectReason::StaleAnswer)
            }
            (HaveRemoteOffer, Inbound, SignalKind::Answer) => {
                return Applied::Rejected(RejectReason::UnexpectedAnswer)
            }

            (HaveRemoteOffer, Outbound, SignalKind::Answer) => Stable,
            (Stable | HaveLocalOffer, Outbound, SignalKind::Answer) => {
                return Applied::Rejected(RejectReason::NoRemoteOffer)
            }
        };

        Applied::Transition { from, to }
    }

    /// Apply a signal, transitioning if the table allows it.
    pub fn apply(&mut self, direction: Direction, kind: SignalKind) -> Applied {
        let outcome = self.evaluate(direction, kind);
        if let Applied::Transition { to, .. } = outcome {
            self.state = to;
        }
        outcome
    }

    /// Move to `Closed`. Idempotent.
    pub fn close(&mut self) {
        self.state = NegotiationState::Closed;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == NegotiationState::Closed
    }
}
