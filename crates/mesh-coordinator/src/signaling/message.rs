//! Signaling message types exchanged over the relay.
//!
//! Messages are serialized as JSON by the relay. The negotiation blob (`sdp`,
//! `candidate`) is opaque to the coordinator; the only structured metadata it
//! reads is the per-stream purpose tag carried in every description.

use common::types::{ParticipantId, StreamId};
use ring::digest;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a signaling message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    /// Returns the kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice_candidate",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a sender says one of its streams is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPurpose {
    Camera,
    ScreenShare,
}

/// Declares the purpose of one stream carried by a description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAnnouncement {
    pub stream_id: StreamId,
    pub purpose: StreamPurpose,
}

/// An offer or answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Opaque negotiation blob produced by the connection layer.
    pub sdp: String,
    /// Purpose tags for every stream the sender is sending.
    #[serde(default)]
    pub streams: Vec<StreamAnnouncement>,
}

impl SessionDescription {
    /// Look up the announced purpose of a stream, if any.
    #[must_use]
    pub fn purpose_of(&self, stream_id: StreamId) -> Option<StreamPurpose> {
        self.streams
            .iter()
            .find(|a| a.stream_id == stream_id)
            .map(|a| a.purpose)
    }
}

/// A trickled connectivity candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_mline_index: Option<u16>,
}

/// Signal body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl SignalPayload {
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalPayload::Offer(_) => SignalKind::Offer,
            SignalPayload::Answer(_) => SignalKind::Answer,
            SignalPayload::IceCandidate(_) => SignalKind::IceCandidate,
        }
    }
}

/// A signaling message addressed from one participant to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub from: ParticipantId,
    pub to: ParticipantId,
    /// Per-link counter assigned by the sender, starting at 1.
    pub sequence: u64,
    pub payload: SignalPayload,
}

impl SignalMessage {
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        self.payload.kind()
    }

    /// Structural hash identifying this message.
    ///
    /// Every relay copy of a message hashes to the same key. Distinct
    /// negotiation steps differ at least in `sequence`, so they never collide.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        let mut ctx = digest::Context::new(&digest::SHA256);

        update_field(&mut ctx, self.from.as_str().as_bytes());
        update_field(&mut ctx, self.to.as_str().as_bytes());
        update_field(&mut ctx, self.kind().as_str().as_bytes());
        ctx.update(&self.sequence.to_be_bytes());

        match &self.payload {
            SignalPayload::Offer(desc) | SignalPayload::Answer(desc) => {
                update_field(&mut ctx, desc.sdp.as_bytes());
                for announcement in &desc.streams {
                    ctx.update(announcement.stream_id.0.as_bytes());
                    let purpose: &[u8] = match announcement.purpose {
                        StreamPurpose::Camera => b"c",
                        StreamPurpose::ScreenShare => b"s",
                    };
                    ctx.update(purpose);
                }
            }
            SignalPayload::IceCandidate(candidate) => {
                update_field(&mut ctx, candidate.candidate.as_bytes());
                update_field(
                    &mut ctx,
                    candidate.sdp_mid.as_deref().unwrap_or_default().as_bytes(),
                );
                ctx.update(
                    &candidate
                        .sdp_mline_index
                        .map_or([0xff; 2], u16::to_be_bytes),
                );
            }
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(ctx.finish().as_ref());
        DedupKey(key)
    }
}

/// Length-prefix a variable-size field so adjacent fields cannot alias.
fn update_field(ctx: &mut digest::Context, bytes: &[u8]) {
    ctx.update(&(bytes.len() as u64).to_be_bytes());
    ctx.update(bytes);
}

/// Content-derived identity of a signaling message.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey([u8; 32]);

impl fmt::Debug for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DedupKey({self})")
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(self.0);
        f.write_str(encoded.get(..16).unwrap_or(&encoded))
    }
}
