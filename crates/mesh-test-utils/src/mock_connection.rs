//! Loopback peer connections for mesh testing.
//!
//! A [`LoopbackConnection`] stands in for a media engine. Its session
//! descriptions list the local streams, one per line:
//!
//! ```text
//! v=0
//! o=<local>
//! stream <stream-id> <label> audio,video
//! ```
//!
//! Applying a remote description diffs the listed streams against the ones
//! already seen and reports `RemoteStream` / `RemoteStreamEnded`. Every
//! created offer or answer is followed by one local candidate. Candidates
//! are refused until a remote description is applied.

use async_trait::async_trait;
use common::types::{ParticipantId, StreamId};
use mesh_coordinator::errors::ConnectionError;
use mesh_coordinator::media::{InboundStream, StreamHandle, TrackInfo, TrackKind};
use mesh_coordinator::peer::{ConnectionEvent, PeerConnection, PeerConnectionFactory};
use mesh_coordinator::signaling::{IceCandidate, SessionDescription};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Counters shared by every connection a factory creates.
#[derive(Debug, Default)]
pub struct LoopbackStats {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub offers: AtomicUsize,
    pub answers: AtomicUsize,
    pub candidates_applied: AtomicUsize,
    pub candidates_refused: AtomicUsize,
}

/// Factory for [`LoopbackConnection`]s.
#[derive(Debug, Default)]
pub struct LoopbackConnectionFactory {
    stats: Arc<LoopbackStats>,
    refuse: Mutex<HashSet<ParticipantId>>,
    fail_offers: Arc<AtomicBool>,
    taps: Mutex<HashMap<(ParticipantId, ParticipantId), mpsc::Sender<ConnectionEvent>>>,
}

impl LoopbackConnectionFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stats(&self) -> &LoopbackStats {
        &self.stats
    }

    /// Refuse to create connections towards `remote`.
    pub fn refuse(&self, remote: impl Into<ParticipantId>) {
        self.refuse.lock().unwrap().insert(remote.into());
    }

    /// Make `create_offer` fail on every connection.
    pub fn set_fail_offers(&self, enabled: bool) {
        self.fail_offers.store(enabled, Ordering::SeqCst);
    }

    /// Inject a connection-level failure into the link `local -> remote`.
    pub async fn fail_link(&self, local: &ParticipantId, remote: &ParticipantId, reason: &str) {
        let tap = self
            .taps
            .lock()
            .unwrap()
            .get(&(local.clone(), remote.clone()))
            .cloned();
        if let Some(tap) = tap {
            let _ = tap.send(ConnectionEvent::Failed(reason.to_string())).await;
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for LoopbackConnectionFactory {
    async fn create(
        &self,
        local: &ParticipantId,
        remote: &ParticipantId,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Box<dyn PeerConnection>, ConnectionError> {
        if self.refuse.lock().unwrap().contains(remote) {
            return Err(ConnectionError::Create(format!("no route to {remote}")));
        }

        self.stats.created.fetch_add(1, Ordering::SeqCst);
        self.taps
            .lock()
            .unwrap()
            .insert((local.clone(), remote.clone()), events.clone());

        Ok(Box::new(LoopbackConnection {
            local: local.clone(),
            remote: remote.clone(),
            events,
            stats: self.stats.clone(),
            fail_offers: self.fail_offers.clone(),
            local_streams: Vec::new(),
            remote_streams: HashSet::new(),
            has_remote_description: false,
            candidates_sent: 0,
            closed: false,
        }))
    }
}

pub struct LoopbackConnection {
    local: ParticipantId,
    remote: ParticipantId,
    events: mpsc::Sender<ConnectionEvent>,
    stats: Arc<LoopbackStats>,
    fail_offers: Arc<AtomicBool>,
    local_streams: Vec<StreamHandle>,
    remote_streams: HashSet<StreamId>,
    has_remote_description: bool,
    candidates_sent: u32,
    closed: bool,
}

impl LoopbackConnection {
    fn describe(&self) -> SessionDescription {
        let mut sdp = format!("v=0\no={}\n", self.local);
        for stream in &self.local_streams {
            let kinds: Vec<&str> = stream
                .tracks()
                .iter()
                .map(|t| match t.kind() {
                    TrackKind::Audio => "audio",
                    TrackKind::Video => "video",
                })
                .collect();
            sdp.push_str(&format!(
                "stream {} {}-{} {}\n",
                stream.id(),
                self.local,
                stream.kind(),
                kinds.join(",")
            ));
        }
        SessionDescription {
            sdp,
            streams: Vec::new(),
        }
    }

    fn emit_candidate(&mut self) {
        self.candidates_sent += 1;
        let candidate = IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp {} {}->{}",
                self.candidates_sent, self.candidates_sent, self.local, self.remote
            ),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        let _ = self.events.try_send(ConnectionEvent::LocalCandidate(candidate));
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }
}

fn parse_streams(sdp: &str) -> Result<Vec<InboundStream>, ConnectionError> {
    let mut streams = Vec::new();
    for line in sdp.lines() {
        let Some(rest) = line.strip_prefix("stream ") else {
            continue;
        };
        let mut fields = rest.split_whitespace();
        let (Some(id), Some(label), kinds) = (fields.next(), fields.next(), fields.next()) else {
            return Err(ConnectionError::Negotiation(format!("bad stream line: {line}")));
        };
        let uuid = Uuid::parse_str(id)
            .map_err(|e| ConnectionError::Negotiation(format!("bad stream id {id}: {e}")))?;
        let tracks = kinds
            .unwrap_or_default()
            .split(',')
            .filter_map(|kind| match kind {
                "audio" => Some(TrackKind::Audio),
                "video" => Some(TrackKind::Video),
                _ => None,
            })
            .map(|kind| TrackInfo {
                id: format!("{id}-{kind:?}"),
                kind,
            })
            .collect();
        streams.push(InboundStream {
            stream_id: StreamId(uuid),
            label: label.to_string(),
            tracks,
        });
    }
    Ok(streams)
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn add_local_stream(&mut self, stream: &StreamHandle) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        if !self.local_streams.iter().any(|s| s.id() == stream.id()) {
            self.local_streams.push(stream.clone());
        }
        Ok(())
    }

    async fn remove_local_stream(&mut self, stream_id: StreamId) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.local_streams.retain(|s| s.id() != stream_id);
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, ConnectionError> {
        self.ensure_open()?;
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(ConnectionError::Negotiation("offer creation failed".to_string()));
        }
        self.stats.offers.fetch_add(1, Ordering::SeqCst);
        let offer = self.describe();
        self.emit_candidate();
        Ok(offer)
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, ConnectionError> {
        self.ensure_open()?;
        if !self.has_remote_description {
            return Err(ConnectionError::Negotiation("no remote offer".to_string()));
        }
        self.stats.answers.fetch_add(1, Ordering::SeqCst);
        let answer = self.describe();
        self.emit_candidate();
        Ok(answer)
    }

    async fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let streams = parse_streams(&description.sdp)?;
        self.has_remote_description = true;

        let listed: HashSet<StreamId> = streams.iter().map(|s| s.stream_id).collect();
        let ended: Vec<StreamId> = self.remote_streams.difference(&listed).copied().collect();
        for stream_id in ended {
            self.remote_streams.remove(&stream_id);
            let _ = self.events.try_send(ConnectionEvent::RemoteStreamEnded(stream_id));
        }
        for stream in streams {
            if self.remote_streams.insert(stream.stream_id) {
                let _ = self.events.try_send(ConnectionEvent::RemoteStream(stream));
            }
        }
        Ok(())
    }

    async fn add_ice_candidate(&mut self, _candidate: &IceCandidate) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        if !self.has_remote_description {
            self.stats.candidates_refused.fetch_add(1, Ordering::SeqCst);
            return Err(ConnectionError::Negotiation(
                "candidate before remote description".to_string(),
            ));
        }
        self.stats.candidates_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
