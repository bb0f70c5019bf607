//! Inbound stream classification.
//!
//! A stream is a screen share only when the sender tagged it so in the
//! description it negotiated with. Device labels are never consulted.

use super::stream::{InboundStream, MediaTrack, StreamHandle, StreamKind};
use crate::signaling::StreamPurpose;
use common::types::{ParticipantId, StreamId};
use std::collections::HashMap;

/// Classify a stream from its announced purpose.
#[must_use]
pub fn classify(purpose: Option<StreamPurpose>) -> StreamKind {
    match purpose {
        Some(StreamPurpose::ScreenShare) => StreamKind::ScreenShare,
        Some(StreamPurpose::Camera) | None => StreamKind::Camera,
    }
}

/// Result of merging a classified stream into a link's stream map.
#[derive(Debug, Clone)]
pub struct Classified {
    pub handle: StreamHandle,
    /// Handle of the same kind that this one replaced, if any.
    pub replaced: Option<StreamHandle>,
}

/// Remote streams of one peer link, at most one per kind.
#[derive(Debug, Default)]
pub struct RemoteStreams {
    by_kind: HashMap<StreamKind, StreamHandle>,
}

impl RemoteStreams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `stream` and store it, replacing any prior stream of the same kind.
    pub fn merge(
        &mut self,
        owner: &ParticipantId,
        stream: &InboundStream,
        purpose: Option<StreamPurpose>,
    ) -> Classified {
        let kind = classify(purpose);
        let tracks = stream
            .tracks
            .iter()
            .map(|t| MediaTrack::new(t.id.clone(), t.kind))
            .collect();
        let handle = StreamHandle::with_id(stream.stream_id, owner.clone(), kind, tracks);

        let replaced = self.by_kind.insert(kind, handle.clone());
        Classified { handle, replaced }
    }

    /// Remove the stream with `stream_id`, returning its kind.
    pub fn remove_stream(&mut self, stream_id: StreamId) -> Option<StreamKind> {
        let kind = self
            .by_kind
            .iter()
            .find(|(_, handle)| handle.id() == stream_id)
            .map(|(kind, _)| *kind)?;
        self.by_kind.remove(&kind);
        Some(kind)
    }

    /// Release every handle, returning the kinds that were held.
    pub fn release_all(&mut self) -> Vec<StreamKind> {
        self.by_kind.drain().map(|(kind, _)| kind).collect()
    }

    #[must_use]
    pub fn get(&self, kind: StreamKind) -> Option<&StreamHandle> {
        self.by_kind.get(&kind)
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<StreamKind> {
        let mut kinds: Vec<StreamKind> = self.by_kind.keys().copied().collect();
        kinds.sort_by_key(StreamKind::as_str);
        kinds
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::stream::{TrackInfo, TrackKind};

    fn inbound(label: &str) -> InboundStream {
        InboundStream {
            stream_id: StreamId::new(),
            label: label.to_string(),
            tracks: vec![TrackInfo {
                id: "v".to_string(),
                kind: TrackKind::Video,
            }],
        }
    }

    #[test]
    fn test_explicit_tag_decides_kind() {
        assert_eq!(
            classify(Some(StreamPurpose::ScreenShare)),
            StreamKind::ScreenShare
        );
        assert_eq!(classify(Some(StreamPurpose::Camera)), StreamKind::Camera);
        assert_eq!(classify(None), StreamKind::Camera);
    }

    #[test]
    fn test_label_is_ignored() {
        let owner = ParticipantId::from("222");
        let mut streams = RemoteStreams::new();

        // A label that mentions "screen" but is not tagged stays a camera
        let classified = streams.merge(&owner, &inbound("Screen 1"), None);
        assert_eq!(classified.handle.kind(), StreamKind::Camera);

        // A tagged stream with a camera-like label is a screen share
        let classified = streams.merge(
            &owner,
            &inbound("FaceTime HD Camera"),
            Some(StreamPurpose::ScreenShare),
        );
        assert_eq!(classified.handle.kind(), StreamKind::ScreenShare);
    }

    #[test]
    fn test_same_kind_replaces() {
        let owner = ParticipantId::from("222");
        let mut streams = RemoteStreams::new();

        let first = streams.merge(&owner, &inbound("cam"), Some(StreamPurpose::Camera));
        assert!(first.replaced.is_none());

        let second = streams.merge(&owner, &inbound("cam"), Some(StreamPurpose::Camera));
        assert_eq!(second.replaced.unwrap().id(), first.handle.id());
        assert_eq!(streams.len(), 1);
        assert_eq!(
            streams.get(StreamKind::Camera).unwrap().id(),
            second.handle.id()
        );
    }

    #[test]
    fn test_remove_and_release() {
        let owner = ParticipantId::from("222");
        let mut streams = RemoteStreams::new();
        let cam = streams.merge(&owner, &inbound("cam"), None);
        streams.merge(&owner, &inbound("screen"), Some(StreamPurpose::ScreenShare));

        assert_eq!(
            streams.kinds(),
            vec![StreamKind::Camera, StreamKind::ScreenShare]
        );

        assert_eq!(
            streams.remove_stream(cam.handle.id()),
            Some(StreamKind::Camera)
        );
        assert_eq!(streams.remove_stream(StreamId::new()), None);

        assert_eq!(streams.release_all(), vec![StreamKind::ScreenShare]);
        assert!(streams.is_empty());
    }

    #[test]
    fn test_handle_owner_and_tracks() {
        let owner = ParticipantId::from("222");
        let mut streams = RemoteStreams::new();
        let stream = inbound("cam");

        let classified = streams.merge(&owner, &stream, None);
        assert_eq!(classified.handle.owner(), &owner);
        assert_eq!(classified.handle.id(), stream.stream_id);
        assert!(classified.handle.has_track(TrackKind::Video));
    }
}
