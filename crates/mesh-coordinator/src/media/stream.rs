//! Stream handles and media tracks.
//!
//! A [`StreamHandle`] is a cheap, cloneable reference. Clones share the same
//! track state, so the local capture is one resource referenced by every peer
//! link: disabling the camera through any clone is a single mutation that all
//! holders observe.

use common::types::{ParticipantId, StreamId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kind of a single media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// What a stream is for, as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Camera and/or microphone.
    Camera,
    ScreenShare,
}

impl StreamKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Camera => "camera",
            StreamKind::ScreenShare => "screen_share",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media track. Clones share the enabled flag.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
}

impl MediaTrack {
    /// Create an enabled track.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether two tracks are the same underlying track, not just equal.
    #[must_use]
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.enabled, &other.enabled)
    }
}

/// Reference to a stream of tracks owned by one participant.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    id: StreamId,
    owner: ParticipantId,
    kind: StreamKind,
    tracks: Arc<[MediaTrack]>,
}

impl StreamHandle {
    #[must_use]
    pub fn new(owner: ParticipantId, kind: StreamKind, tracks: Vec<MediaTrack>) -> Self {
        Self::with_id(StreamId::new(), owner, kind, tracks)
    }

    #[must_use]
    pub fn with_id(
        id: StreamId,
        owner: ParticipantId,
        kind: StreamKind,
        tracks: Vec<MediaTrack>,
    ) -> Self {
        Self {
            id,
            owner,
            kind,
            tracks: tracks.into(),
        }
    }

    #[must_use]
    pub fn id(&self) -> StreamId {
        self.id
    }

    #[must_use]
    pub fn owner(&self) -> &ParticipantId {
        &self.owner
    }

    #[must_use]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    #[must_use]
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    #[must_use]
    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind() == kind)
    }

    /// Whether every track of `kind` is enabled. `false` if there is none.
    #[must_use]
    pub fn is_enabled(&self, kind: TrackKind) -> bool {
        let mut matching = self.tracks.iter().filter(|t| t.kind() == kind).peekable();
        matching.peek().is_some() && matching.all(MediaTrack::is_enabled)
    }

    /// Enable or disable every track of `kind`. Returns `false` if the stream
    /// has no such track.
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        let mut found = false;
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
            found = true;
        }
        found
    }

    /// Disable every track.
    pub fn disable_all(&self) {
        for track in self.tracks.iter() {
            track.set_enabled(false);
        }
    }

    /// Whether `other` references the same tracks (not a copy).
    #[must_use]
    pub fn shares_tracks_with(&self, other: &StreamHandle) -> bool {
        Arc::ptr_eq(&self.tracks, &other.tracks)
    }
}

/// Track description reported by the connection layer for an inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
}

/// A stream that arrived over a peer connection, not yet classified.
#[derive(Debug, Clone)]
pub struct InboundStream {
    pub stream_id: StreamId,
    /// Human-readable device label. Informational only.
    pub label: String,
    pub tracks: Vec<TrackInfo>,
}
