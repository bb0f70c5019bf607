//! Stream Registry: the published remote streams and their bound sinks.

use super::sink::MediaSink;
use super::stream::{StreamHandle, StreamKind};
use common::types::ParticipantId;
use std::collections::HashMap;
use tracing::debug;

type Slot = (ParticipantId, StreamKind);

/// Current `(participant, kind) -> stream` map with optional sink bindings.
#[derive(Default)]
pub struct StreamRegistry {
    streams: HashMap<Slot, StreamHandle>,
    sinks: HashMap<Slot, Box<dyn MediaSink>>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a stream, replacing any stream in the same slot.
    ///
    /// A bound sink is detached from the old stream and attached to the new one.
    pub fn publish(&mut self, stream: StreamHandle) -> Option<StreamHandle> {
        let slot = (stream.owner().clone(), stream.kind());
        let replaced = self.streams.insert(slot.clone(), stream.clone());

        if let Some(sink) = self.sinks.get_mut(&slot) {
            if replaced.is_some() {
                sink.detach();
            }
            sink.attach(stream);
        }

        debug!(
            target: "mesh.media",
            participant_id = %slot.0,
            kind = %slot.1,
            replaced = replaced.is_some(),
            "Stream published"
        );
        replaced
    }

    /// Remove the stream in a slot, detaching its sink.
    pub fn unpublish(&mut self, participant: &ParticipantId, kind: StreamKind) -> Option<StreamHandle> {
        let slot = (participant.clone(), kind);
        let removed = self.streams.remove(&slot)?;
        if let Some(sink) = self.sinks.get_mut(&slot) {
            sink.detach();
        }
        Some(removed)
    }

    /// Remove every stream owned by `participant`. Returns the removed kinds.
    pub fn unpublish_participant(&mut self, participant: &ParticipantId) -> Vec<StreamKind> {
        let kinds: Vec<StreamKind> = self
            .streams
            .keys()
            .filter(|(owner, _)| owner == participant)
            .map(|(_, kind)| *kind)
            .collect();

        for kind in &kinds {
            self.unpublish(participant, *kind);
        }
        kinds
    }

    /// Bind a sink to a slot. Attaches immediately if a stream is present.
    pub fn bind_sink(
        &mut self,
        participant: ParticipantId,
        kind: StreamKind,
        mut sink: Box<dyn MediaSink>,
    ) {
        let slot = (participant, kind);
        if let Some(stream) = self.streams.get(&slot) {
            sink.attach(stream.clone());
        }
        if let Some(mut previous) = self.sinks.insert(slot, sink) {
            previous.detach();
        }
    }

    /// Unbind the sink for a slot, detaching it. Returns whether one was bound.
    pub fn unbind_sink(&mut self, participant: &ParticipantId, kind: StreamKind) -> bool {
        match self.sinks.remove(&(participant.clone(), kind)) {
            Some(mut sink) => {
                sink.detach();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, participant: &ParticipantId, kind: StreamKind) -> Option<&StreamHandle> {
        self.streams.get(&(participant.clone(), kind))
    }

    /// Remove every stream, detaching bound sinks. Sink bindings are kept.
    pub fn clear(&mut self) -> Vec<(ParticipantId, StreamKind)> {
        let slots: Vec<Slot> = self.streams.drain().map(|(slot, _)| slot).collect();
        for slot in &slots {
            if let Some(sink) = self.sinks.get_mut(slot) {
                sink.detach();
            }
        }
        slots
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
