//! `SessionCoordinator` - top-level actor for one local participant in one
//! session.
//!
//! The coordinator:
//! - Owns the local capture, the peer connection manager and the stream
//!   registry
//! - Reconciles the registry roster against live peer links
//! - Routes relay signals to peer links
//! - Turns peer events into application [`SessionEvent`]s
//!
//! # Lifecycle
//!
//! 1. `spawn` starts the actor idle, with no subscriptions
//! 2. `join_session` acquires the camera, subscribes, then joins the registry
//! 3. `leave_session` tears every link down, unsubscribes, then leaves
//! 4. Cancelling the handle performs a leave before the actor exits

use super::messages::{
    JoinResult, PeerState, SessionEvent, SessionMessage, SessionPhase, SessionState,
};
use super::registry::SessionRegistry;
use super::relay::SignalRelay;
use super::roster::{RosterEvent, Session};
use crate::config::Config;
use crate::errors::MeshError;
use crate::media::{
    LocalMediaController, MediaSink, StreamHandle, StreamKind, StreamRegistry, TrackKind,
};
use crate::observability::metrics;
use crate::peer::{
    CreateOutcome, DestroyReason, Origin, PeerConnectionFactory, PeerConnectionManager,
    PeerContext, PeerEvent, PeerEventKind, PeerSnapshot, RefuseReason,
};
use crate::signaling::SignalMessage;
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, SessionId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// External collaborators of a session.
#[derive(Clone)]
pub struct Collaborators {
    pub relay: Arc<dyn SignalRelay>,
    pub registry: Arc<dyn SessionRegistry>,
    pub media: Arc<dyn LocalMediaController>,
    pub connections: Arc<dyn PeerConnectionFactory>,
}

/// Handle to the `SessionCoordinator`.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: SessionId,
    local_id: ParticipantId,
}

impl SessionHandle {
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Join the session.
    ///
    /// # Errors
    ///
    /// - `MediaAcquisition` if the camera cannot be acquired (the registry is
    ///   not contacted)
    /// - `SessionEnded` / `SessionFull` / `Registry` from the registry join
    /// - `Relay` if the relay subscription fails
    /// - `AlreadyJoined` if called twice
    pub async fn join_session(&self) -> Result<JoinResult, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::Join { respond_to: tx }).await?;
        Self::reply(rx).await?
    }

    /// Leave the session. Local teardown completes even if the registry
    /// leave fails.
    ///
    /// # Errors
    ///
    /// `NotJoined`, or the registry's error.
    pub async fn leave_session(&self) -> Result<(), MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::Leave { respond_to: tx }).await?;
        Self::reply(rx).await?
    }

    /// Toggle the camera for every peer at once. Returns the new state.
    ///
    /// # Errors
    ///
    /// `NotJoined` if there is no local capture.
    pub async fn toggle_camera(&self) -> Result<bool, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::ToggleCamera { respond_to: tx })
            .await?;
        Self::reply(rx).await?
    }

    /// Toggle the microphone for every peer at once. Returns the new state.
    ///
    /// # Errors
    ///
    /// `NotJoined` if there is no local capture.
    pub async fn toggle_microphone(&self) -> Result<bool, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::ToggleMicrophone { respond_to: tx })
            .await?;
        Self::reply(rx).await?
    }

    /// # Errors
    ///
    /// `NotJoined`, `ScreenShareActive`, or `MediaAcquisition`.
    pub async fn start_screen_share(&self) -> Result<(), MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::StartScreenShare { respond_to: tx })
            .await?;
        Self::reply(rx).await?
    }

    /// # Errors
    ///
    /// `NoScreenShare` if no screen share is running.
    pub async fn stop_screen_share(&self) -> Result<(), MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::StopScreenShare { respond_to: tx })
            .await?;
        Self::reply(rx).await?
    }

    /// Bind `sink` to the `kind` stream of `participant`. It is attached as
    /// soon as such a stream is published.
    pub async fn attach_sink(
        &self,
        participant: ParticipantId,
        kind: StreamKind,
        sink: Box<dyn MediaSink>,
    ) -> Result<(), MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::AttachSink {
            participant,
            kind,
            sink,
            respond_to: tx,
        })
        .await?;
        Self::reply(rx).await
    }

    pub async fn detach_sink(
        &self,
        participant: ParticipantId,
        kind: StreamKind,
    ) -> Result<bool, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::DetachSink {
            participant,
            kind,
            respond_to: tx,
        })
        .await?;
        Self::reply(rx).await
    }

    pub async fn get_state(&self) -> Result<SessionState, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::GetState { respond_to: tx })
            .await?;
        Self::reply(rx).await
    }

    /// Snapshot of the link to `participant`, if one exists.
    pub async fn peer_snapshot(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<PeerSnapshot>, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::PeerSnapshot {
            participant,
            respond_to: tx,
        })
        .await?;
        Self::reply(rx).await?
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: SessionMessage) -> Result<(), MeshError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))
    }

    async fn reply<T>(rx: oneshot::Receiver<T>) -> Result<T, MeshError> {
        rx.await
            .map_err(|e| MeshError::Internal(format!("response receive failed: {e}")))
    }
}

/// The `SessionCoordinator` implementation.
pub struct SessionCoordinator {
    session_id: SessionId,
    local: ParticipantId,
    max_participants: usize,
    collaborators: Collaborators,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    events: mpsc::Sender<SessionEvent>,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    manager: PeerConnectionManager,
    streams: StreamRegistry,
    roster: Option<mpsc::Receiver<RosterEvent>>,
    inbound: Option<mpsc::Receiver<SignalMessage>>,
    camera: Option<StreamHandle>,
    screen: Option<StreamHandle>,
    phase: SessionPhase,
    joined_at: Option<DateTime<Utc>>,
}

impl SessionCoordinator {
    /// Spawn the coordinator for `local` in `session_id`.
    ///
    /// Returns the handle, the application event stream and the task join
    /// handle.
    pub fn spawn(
        session_id: SessionId,
        local: ParticipantId,
        config: &Config,
        collaborators: Collaborators,
        cancel_token: CancellationToken,
    ) -> (SessionHandle, mpsc::Receiver<SessionEvent>, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.session_mailbox_buffer);
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        let (peer_events_tx, peer_events) = mpsc::unbounded_channel();

        let ctx = PeerContext {
            relay: collaborators.relay.clone(),
            events: peer_events_tx,
            negotiation_timeout: config.negotiation_timeout,
            mailbox_buffer: config.peer_mailbox_buffer,
        };
        let manager = PeerConnectionManager::new(
            local.clone(),
            config,
            collaborators.connections.clone(),
            ctx,
            cancel_token.child_token(),
        );

        let actor = Self {
            session_id: session_id.clone(),
            local: local.clone(),
            max_participants: config.max_participants,
            collaborators,
            receiver,
            cancel_token: cancel_token.clone(),
            events: events_tx,
            peer_events,
            manager,
            streams: StreamRegistry::new(),
            roster: None,
            inbound: None,
            camera: None,
            screen: None,
            phase: SessionPhase::Idle,
            joined_at: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionHandle {
            sender,
            cancel_token,
            session_id,
            local_id: local,
        };

        (handle, events_rx, task_handle)
    }

    #[instrument(
        skip_all,
        name = "mesh.session",
        fields(session_id = %self.session_id, participant_id = %self.local)
    )]
    async fn run(mut self) {
        info!(
            target: "mesh.session",
            session_id = %self.session_id,
            participant_id = %self.local,
            "SessionCoordinator started"
        );

        loop {
            self.check_peer_health().await;

            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "mesh.session",
                        session_id = %self.session_id,
                        "SessionCoordinator received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                // Inputs queued ahead of a control message are handled first
                Some(event) = self.peer_events.recv() => {
                    self.handle_peer_event(event).await;
                }

                event = next_or_pending(&mut self.roster) => {
                    self.handle_roster_event(event).await;
                }

                signal = next_or_pending(&mut self.inbound) => {
                    self.handle_inbound_signal(signal).await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "mesh.session",
                                session_id = %self.session_id,
                                "SessionCoordinator channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "mesh.session",
            session_id = %self.session_id,
            participant_id = %self.local,
            "SessionCoordinator stopped"
        );
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Join { respond_to } => {
                let result = self.handle_join().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Leave { respond_to } => {
                let result = self.handle_leave().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::ToggleCamera { respond_to } => {
                let result = self.toggle_track(TrackKind::Video).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::ToggleMicrophone { respond_to } => {
                let result = self.toggle_track(TrackKind::Audio).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::StartScreenShare { respond_to } => {
                let result = self.start_screen_share().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::StopScreenShare { respond_to } => {
                let result = self.stop_screen_share().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::AttachSink {
                participant,
                kind,
                sink,
                respond_to,
            } => {
                self.streams.bind_sink(participant, kind, sink);
                let _ = respond_to.send(());
            }

            SessionMessage::DetachSink {
                participant,
                kind,
                respond_to,
            } => {
                let _ = respond_to.send(self.streams.unbind_sink(&participant, kind));
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }

            SessionMessage::PeerSnapshot {
                participant,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.snapshot(&participant).await);
            }
        }
    }

    async fn handle_join(&mut self) -> Result<JoinResult, MeshError> {
        if self.phase == SessionPhase::Joined {
            return Err(MeshError::AlreadyJoined);
        }

        // No media, no join: the registry is only contacted once we have it
        let camera = self
            .collaborators
            .media
            .acquire_camera(&self.local, true, true)
            .await
            .map_err(|e| {
                warn!(
                    target: "mesh.session",
                    session_id = %self.session_id,
                    error = %e,
                    "Camera acquisition failed"
                );
                MeshError::from(e)
            })?;

        // Subscriptions must exist before the join makes us visible
        let subscribed = match self.subscribe().await {
            Ok(subscriptions) => self.enter_registry().await.map(|session| (session, subscriptions)),
            Err(e) => Err(e),
        };
        let (session, (inbound, roster)) = match subscribed {
            Ok(joined) => joined,
            Err(e) => {
                self.collaborators.media.release(&camera).await;
                return Err(e);
            }
        };
        self.inbound = Some(inbound);
        self.roster = Some(roster);

        self.camera = Some(camera.clone());
        self.manager.attach_local_stream(camera).await;
        self.phase = SessionPhase::Joined;
        let joined_at = Utc::now();
        self.joined_at = Some(joined_at);

        let remotes: Vec<ParticipantId> = session.joined_remotes(&self.local).cloned().collect();
        for remote in &remotes {
            self.connect(remote, Origin::Roster).await;
        }

        info!(
            target: "mesh.session",
            session_id = %self.session_id,
            participant_id = %self.local,
            peers = self.manager.len(),
            "Joined session"
        );

        Ok(JoinResult {
            peers: self.manager.remotes(),
            joined_at,
        })
    }

    /// Join the registry and check the roster it returns.
    async fn enter_registry(&self) -> Result<Session, MeshError> {
        let registry = &self.collaborators.registry;
        let session = registry.join(&self.session_id, &self.local).await?;

        if session.is_ended() {
            return Err(MeshError::SessionEnded);
        }

        let listed = session
            .participants
            .iter()
            .any(|p| p.id == self.local && p.is_joined());
        let occupants = session.joined_count() + usize::from(!listed);
        if occupants > self.max_participants {
            let _ = registry.leave(&self.session_id, &self.local).await;
            return Err(MeshError::SessionFull {
                max: self.max_participants,
            });
        }

        Ok(session)
    }

    async fn subscribe(
        &self,
    ) -> Result<(mpsc::Receiver<SignalMessage>, mpsc::Receiver<RosterEvent>), MeshError> {
        let inbound = self.collaborators.relay.subscribe(&self.local).await?;
        let roster = self
            .collaborators
            .registry
            .subscribe(&self.session_id)
            .await?;
        Ok((inbound, roster))
    }

    async fn handle_leave(&mut self) -> Result<(), MeshError> {
        if self.phase != SessionPhase::Joined {
            return Err(MeshError::NotJoined);
        }

        self.leave_locally().await;

        info!(
            target: "mesh.session",
            session_id = %self.session_id,
            participant_id = %self.local,
            "Left session"
        );

        self.collaborators
            .registry
            .leave(&self.session_id, &self.local)
            .await
    }

    /// Tear down every link, then unsubscribe and release local media.
    async fn leave_locally(&mut self) {
        let destroyed = self.manager.teardown_all().await;

        self.roster = None;
        self.inbound = None;

        for (remote, _) in destroyed {
            self.release_remote(&remote, PeerState::Closed);
        }
        for (participant, kind) in self.streams.clear() {
            self.emit(SessionEvent::RemoteStreamRemoved { participant, kind });
        }

        if let Some(screen) = self.screen.take() {
            screen.disable_all();
            self.collaborators.media.release(&screen).await;
        }
        if let Some(camera) = self.camera.take() {
            self.collaborators.media.release(&camera).await;
        }

        self.phase = SessionPhase::Left;
    }

    async fn toggle_track(&mut self, kind: TrackKind) -> Result<bool, MeshError> {
        let camera = self.camera.as_ref().ok_or(MeshError::NotJoined)?;

        // One mutation on the shared capture, seen by every link
        let enabled = !camera.is_enabled(kind);
        camera.set_enabled(kind, enabled);
        self.collaborators.media.set_enabled(kind, enabled).await;

        debug!(
            target: "mesh.session",
            session_id = %self.session_id,
            track = ?kind,
            enabled = enabled,
            "Local track toggled"
        );
        Ok(enabled)
    }

    async fn start_screen_share(&mut self) -> Result<(), MeshError> {
        if self.phase != SessionPhase::Joined {
            return Err(MeshError::NotJoined);
        }
        if self.screen.is_some() {
            return Err(MeshError::ScreenShareActive);
        }

        let screen = self
            .collaborators
            .media
            .acquire_screen_share(&self.local)
            .await?;
        self.screen = Some(screen.clone());
        self.manager.attach_local_stream(screen).await;

        info!(
            target: "mesh.session",
            session_id = %self.session_id,
            "Screen share started"
        );
        Ok(())
    }

    async fn stop_screen_share(&mut self) -> Result<(), MeshError> {
        let screen = self.screen.take().ok_or(MeshError::NoScreenShare)?;

        self.manager.detach_local_stream(screen.id()).await;
        screen.disable_all();
        self.collaborators.media.release(&screen).await;

        info!(
            target: "mesh.session",
            session_id = %self.session_id,
            "Screen share stopped"
        );
        Ok(())
    }

    async fn handle_roster_event(&mut self, event: Option<RosterEvent>) {
        let Some(event) = event else {
            warn!(
                target: "mesh.session",
                session_id = %self.session_id,
                "Roster subscription closed"
            );
            self.roster = None;
            return;
        };

        match event {
            RosterEvent::ParticipantJoined(participant) => {
                if participant.id != self.local && participant.is_joined() {
                    self.connect(&participant.id, Origin::Roster).await;
                }
            }

            RosterEvent::ParticipantLeft(participant) => {
                if participant != self.local {
                    self.disconnect(&participant, DestroyReason::Left).await;
                }
            }

            RosterEvent::RosterUpdated(session) => {
                if session.is_ended() {
                    info!(
                        target: "mesh.session",
                        session_id = %self.session_id,
                        "Session ended by registry"
                    );
                    self.leave_locally().await;
                    self.emit(SessionEvent::SessionEnded);
                    return;
                }
                self.reconcile(&session).await;
            }
        }
    }

    /// Create links for joined participants without one and destroy links to
    /// participants no longer joined.
    async fn reconcile(&mut self, session: &Session) {
        let joined: HashSet<ParticipantId> =
            session.joined_remotes(&self.local).cloned().collect();

        for remote in self.manager.remotes() {
            if !joined.contains(&remote) {
                self.disconnect(&remote, DestroyReason::Left).await;
            }
        }

        let mut missing: Vec<&ParticipantId> = joined
            .iter()
            .filter(|remote| !self.manager.contains(remote))
            .collect();
        missing.sort();
        for remote in missing {
            self.connect(remote, Origin::Roster).await;
        }
    }

    async fn handle_inbound_signal(&mut self, signal: Option<SignalMessage>) {
        let Some(signal) = signal else {
            warn!(
                target: "mesh.session",
                session_id = %self.session_id,
                "Relay subscription closed"
            );
            self.inbound = None;
            return;
        };

        let from = signal.from.clone();
        if let Err(e) = self.manager.handle_inbound_signal(signal).await {
            warn!(
                target: "mesh.session",
                remote_id = %from,
                error = %e,
                "Could not create peer for inbound signal"
            );
            metrics::record_peer_failure("create");
            self.emit_peer_state(&from, PeerState::Failed);
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        if !self.manager.is_current(&event.remote, event.link_id) {
            debug!(
                target: "mesh.session",
                remote_id = %event.remote,
                link_id = event.link_id,
                "Stale peer event dropped"
            );
            return;
        }

        match event.kind {
            PeerEventKind::StateChanged(state) => {
                self.emit_peer_state(&event.remote, PeerState::Signaling(state));
            }

            PeerEventKind::RemoteStreamAdded { kind, stream } => {
                self.streams.publish(stream.clone());
                self.emit(SessionEvent::RemoteStreamAdded {
                    participant: event.remote,
                    kind,
                    stream,
                });
            }

            PeerEventKind::RemoteStreamRemoved { kind } => {
                if self.streams.unpublish(&event.remote, kind).is_some() {
                    self.emit(SessionEvent::RemoteStreamRemoved {
                        participant: event.remote,
                        kind,
                    });
                }
            }

            PeerEventKind::Failed { reason, timed_out } => {
                warn!(
                    target: "mesh.session",
                    remote_id = %event.remote,
                    reason = %reason,
                    "Peer failed, tearing down"
                );
                metrics::record_peer_failure(if timed_out { "timeout" } else { "connection" });
                self.disconnect(&event.remote, DestroyReason::Failed).await;
            }
        }
    }

    async fn connect(&mut self, remote: &ParticipantId, origin: Origin) {
        match self.manager.create_peer(remote, origin).await {
            Ok(CreateOutcome::Created { link_id }) => {
                debug!(
                    target: "mesh.session",
                    remote_id = %remote,
                    link_id = link_id,
                    "Peer link created"
                );
            }
            Ok(CreateOutcome::Existing { .. } | CreateOutcome::Refused(RefuseReason::SelfLink)) => {}
            Ok(CreateOutcome::Refused(RefuseReason::AtCapacity)) => {
                warn!(
                    target: "mesh.session",
                    remote_id = %remote,
                    max_participants = self.max_participants,
                    "Not connecting, participant cap reached"
                );
            }
            Err(e) => {
                warn!(
                    target: "mesh.session",
                    remote_id = %remote,
                    error = %e,
                    "Peer connection could not be created"
                );
                metrics::record_peer_failure("create");
                self.emit_peer_state(remote, PeerState::Failed);
            }
        }
    }

    async fn disconnect(&mut self, remote: &ParticipantId, reason: DestroyReason) {
        if self.manager.destroy_peer(remote, reason).await.is_some() {
            let state = match reason {
                DestroyReason::Failed => PeerState::Failed,
                DestroyReason::Left | DestroyReason::Teardown => PeerState::Closed,
            };
            self.release_remote(remote, state);
        }
    }

    /// Unpublish a destroyed peer's streams and report its final state.
    fn release_remote(&mut self, remote: &ParticipantId, state: PeerState) {
        for kind in self.streams.unpublish_participant(remote) {
            self.emit(SessionEvent::RemoteStreamRemoved {
                participant: remote.clone(),
                kind,
            });
        }
        self.emit_peer_state(remote, state);
    }

    async fn check_peer_health(&mut self) {
        for crashed in self.manager.check_health().await {
            self.release_remote(&crashed.remote, PeerState::Failed);
        }
    }

    fn get_state(&self) -> SessionState {
        let camera = self.camera.as_ref();
        SessionState {
            session_id: self.session_id.clone(),
            local_id: self.local.clone(),
            phase: self.phase,
            peers: self.manager.remotes(),
            camera_enabled: camera.is_some_and(|c| c.is_enabled(TrackKind::Video)),
            microphone_enabled: camera.is_some_and(|c| c.is_enabled(TrackKind::Audio)),
            screen_sharing: self.screen.is_some(),
            remote_streams: self.streams.len(),
            joined_at: self.joined_at,
        }
    }

    fn emit_peer_state(&self, participant: &ParticipantId, state: PeerState) {
        self.emit(SessionEvent::PeerStateChanged {
            participant: participant.clone(),
            state,
        });
    }

    /// Deliver an application event. A lagging consumer loses events rather
    /// than stalling the session.
    fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    target: "mesh.session",
                    session_id = %self.session_id,
                    event = ?event,
                    "Event buffer full, event dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    async fn graceful_shutdown(&mut self) {
        if self.phase != SessionPhase::Joined {
            return;
        }

        info!(
            target: "mesh.session",
            session_id = %self.session_id,
            peers = self.manager.len(),
            "Performing graceful shutdown"
        );

        self.leave_locally().await;
        if let Err(e) = self
            .collaborators
            .registry
            .leave(&self.session_id, &self.local)
            .await
        {
            warn!(
                target: "mesh.session",
                session_id = %self.session_id,
                error = %e,
                "Registry leave failed during shutdown"
            );
        }
    }
}

/// Receive from an optional subscription; never resolves when absent.
async fn next_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::{ConnectionError, MediaError, RelayError};
    use crate::media::MediaTrack;
    use crate::peer::{ConnectionEvent, PeerConnection};
    use crate::session::roster::{JoinStatus, Participant, SessionStatus};
    use crate::signaling::{IceCandidate, SessionDescription};
    use common::types::StreamId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct NullConnection;

    #[async_trait::async_trait]
    impl PeerConnection for NullConnection {
        async fn add_local_stream(&mut self, _stream: &StreamHandle) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn remove_local_stream(&mut self, _stream_id: StreamId) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn create_offer(&mut self) -> Result<SessionDescription, ConnectionError> {
            Ok(SessionDescription {
                sdp: "offer".to_string(),
                streams: Vec::new(),
            })
        }

        async fn create_answer(&mut self) -> Result<SessionDescription, ConnectionError> {
            Ok(SessionDescription {
                sdp: "answer".to_string(),
                streams: Vec::new(),
            })
        }

        async fn set_remote_description(
            &mut self,
            _description: &SessionDescription,
        ) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn add_ice_candidate(&mut self, _candidate: &IceCandidate) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn close(&mut self) {}
    }

    struct NullFactory;

    #[async_trait::async_trait]
    impl PeerConnectionFactory for NullFactory {
        async fn create(
            &self,
            _local: &ParticipantId,
            _remote: &ParticipantId,
            _events: mpsc::Sender<ConnectionEvent>,
        ) -> Result<Box<dyn PeerConnection>, ConnectionError> {
            Ok(Box::new(NullConnection))
        }
    }

    #[derive(Default)]
    struct StubRelay {
        inbound: Mutex<Option<mpsc::Sender<SignalMessage>>>,
    }

    #[async_trait::async_trait]
    impl SignalRelay for StubRelay {
        async fn send(&self, _message: SignalMessage) -> Result<(), RelayError> {
            Ok(())
        }

        async fn subscribe(
            &self,
            _local: &ParticipantId,
        ) -> Result<mpsc::Receiver<SignalMessage>, RelayError> {
            let (tx, rx) = mpsc::channel(16);
            *self.inbound.lock().unwrap() = Some(tx);
            Ok(rx)
        }
    }

    struct StubRegistry {
        session: Session,
        joins: AtomicUsize,
        leaves: AtomicUsize,
        roster: Mutex<Option<mpsc::Sender<RosterEvent>>>,
    }

    impl StubRegistry {
        fn new(status: SessionStatus, joined: &[&str]) -> Self {
            Self {
                session: Session {
                    id: SessionId::from("s-1"),
                    status,
                    participants: joined
                        .iter()
                        .map(|id| Participant::new(*id, *id, JoinStatus::Joined))
                        .collect(),
                },
                joins: AtomicUsize::new(0),
                leaves: AtomicUsize::new(0),
                roster: Mutex::new(None),
            }
        }

        fn roster_sender(&self) -> mpsc::Sender<RosterEvent> {
            self.roster.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl SessionRegistry for StubRegistry {
        async fn join(
            &self,
            _session: &SessionId,
            _participant: &ParticipantId,
        ) -> Result<Session, MeshError> {
            self.joins.fetch_add(1, Ordering::SeqCst);
            Ok(self.session.clone())
        }

        async fn leave(
            &self,
            _session: &SessionId,
            _participant: &ParticipantId,
        ) -> Result<(), MeshError> {
            self.leaves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn subscribe(
            &self,
            _session: &SessionId,
        ) -> Result<mpsc::Receiver<RosterEvent>, MeshError> {
            let (tx, rx) = mpsc::channel(16);
            *self.roster.lock().unwrap() = Some(tx);
            Ok(rx)
        }
    }

    struct StubMedia {
        deny: bool,
        released: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl LocalMediaController for StubMedia {
        async fn acquire_camera(
            &self,
            owner: &ParticipantId,
            _video: bool,
            _audio: bool,
        ) -> Result<StreamHandle, MediaError> {
            if self.deny {
                return Err(MediaError::PermissionDenied("camera".to_string()));
            }
            Ok(StreamHandle::new(
                owner.clone(),
                StreamKind::Camera,
                vec![
                    MediaTrack::new("mic", TrackKind::Audio),
                    MediaTrack::new("cam", TrackKind::Video),
                ],
            ))
        }

        async fn acquire_screen_share(
            &self,
            owner: &ParticipantId,
        ) -> Result<StreamHandle, MediaError> {
            Ok(StreamHandle::new(
                owner.clone(),
                StreamKind::ScreenShare,
                vec![MediaTrack::new("screen", TrackKind::Video)],
            ))
        }

        async fn set_enabled(&self, _kind: TrackKind, _enabled: bool) {}

        async fn release(&self, _stream: &StreamHandle) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        handle: SessionHandle,
        events: mpsc::Receiver<SessionEvent>,
        task: JoinHandle<()>,
        registry: Arc<StubRegistry>,
        media: Arc<StubMedia>,
    }

    fn spawn_session(local: &str, registry: StubRegistry, deny_media: bool, max: usize) -> Fixture {
        let registry = Arc::new(registry);
        let media = Arc::new(StubMedia {
            deny: deny_media,
            released: AtomicUsize::new(0),
        });
        let collaborators = Collaborators {
            relay: Arc::new(StubRelay::default()),
            registry: registry.clone(),
            media: media.clone(),
            connections: Arc::new(NullFactory),
        };
        let config = Config {
            max_participants: max,
            ..Config::default()
        };
        let (handle, events, task) = SessionCoordinator::spawn(
            SessionId::from("s-1"),
            ParticipantId::from(local),
            &config,
            collaborators,
            CancellationToken::new(),
        );
        Fixture {
            handle,
            events,
            task,
            registry,
            media,
        }
    }

    #[tokio::test]
    async fn test_join_connects_to_joined_participants() {
        let registry = StubRegistry::new(SessionStatus::Active, &["111", "222", "333"]);
        let fx = spawn_session("111", registry, false, 8);

        let joined = fx.handle.join_session().await.unwrap();
        assert_eq!(
            joined.peers,
            vec![ParticipantId::from("222"), ParticipantId::from("333")]
        );

        let state = fx.handle.get_state().await.unwrap();
        assert_eq!(state.phase, SessionPhase::Joined);
        assert!(state.camera_enabled);
        assert!(state.microphone_enabled);
        assert_eq!(state.joined_at, Some(joined.joined_at));

        let snapshot = fx
            .handle
            .peer_snapshot(ParticipantId::from("222"))
            .await
            .unwrap()
            .unwrap();
        assert!(snapshot.is_initiator);
        assert_eq!(snapshot.local_streams, 1);

        assert!(matches!(
            fx.handle.join_session().await,
            Err(MeshError::AlreadyJoined)
        ));

        fx.handle.cancel();
    }

    #[tokio::test]
    async fn test_media_failure_never_reaches_registry() {
        let registry = StubRegistry::new(SessionStatus::Active, &["222"]);
        let fx = spawn_session("111", registry, true, 8);

        let result = fx.handle.join_session().await;
        assert!(matches!(
            result,
            Err(MeshError::MediaAcquisition(MediaError::PermissionDenied(_)))
        ));
        assert_eq!(fx.registry.joins.load(Ordering::SeqCst), 0);

        let state = fx.handle.get_state().await.unwrap();
        assert_eq!(state.phase, SessionPhase::Idle);
        assert!(state.peers.is_empty());

        fx.handle.cancel();
    }

    #[tokio::test]
    async fn test_full_session_is_refused() {
        let registry = StubRegistry::new(SessionStatus::Active, &["222", "333"]);
        let fx = spawn_session("111", registry, false, 2);

        let result = fx.handle.join_session().await;
        assert!(matches!(result, Err(MeshError::SessionFull { max: 2 })));
        assert_eq!(fx.registry.leaves.load(Ordering::SeqCst), 1);
        assert_eq!(fx.media.released.load(Ordering::SeqCst), 1);

        fx.handle.cancel();
    }

    #[tokio::test]
    async fn test_ended_session_is_refused() {
        let registry = StubRegistry::new(SessionStatus::Ended, &["222"]);
        let fx = spawn_session("111", registry, false, 8);

        let result = fx.handle.join_session().await;
        assert!(matches!(result, Err(MeshError::SessionEnded)));
        assert_eq!(fx.media.released.load(Ordering::SeqCst), 1);

        fx.handle.cancel();
    }

    #[tokio::test]
    async fn test_controls_require_join() {
        let registry = StubRegistry::new(SessionStatus::Active, &[]);
        let fx = spawn_session("111", registry, false, 8);

        assert!(matches!(
            fx.handle.toggle_camera().await,
            Err(MeshError::NotJoined)
        ));
        assert!(matches!(
            fx.handle.start_screen_share().await,
            Err(MeshError::NotJoined)
        ));
        assert!(matches!(
            fx.handle.leave_session().await,
            Err(MeshError::NotJoined)
        ));

        fx.handle.cancel();
    }

    #[tokio::test]
    async fn test_toggles_flip_shared_tracks() {
        let registry = StubRegistry::new(SessionStatus::Active, &["222"]);
        let fx = spawn_session("111", registry, false, 8);
        fx.handle.join_session().await.unwrap();

        assert!(!fx.handle.toggle_camera().await.unwrap());
        assert!(!fx.handle.toggle_microphone().await.unwrap());
        assert!(fx.handle.toggle_camera().await.unwrap());

        let state = fx.handle.get_state().await.unwrap();
        assert!(state.camera_enabled);
        assert!(!state.microphone_enabled);

        fx.handle.cancel();
    }

    #[tokio::test]
    async fn test_screen_share_lifecycle() {
        let registry = StubRegistry::new(SessionStatus::Active, &["222"]);
        let fx = spawn_session("111", registry, false, 8);
        fx.handle.join_session().await.unwrap();

        assert!(matches!(
            fx.handle.stop_screen_share().await,
            Err(MeshError::NoScreenShare)
        ));

        fx.handle.start_screen_share().await.unwrap();
        assert!(matches!(
            fx.handle.start_screen_share().await,
            Err(MeshError::ScreenShareActive)
        ));
        let snapshot = fx
            .handle
            .peer_snapshot(ParticipantId::from("222"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.local_streams, 2);

        fx.handle.stop_screen_share().await.unwrap();
        assert!(!fx.handle.get_state().await.unwrap().screen_sharing);
        assert_eq!(fx.media.released.load(Ordering::SeqCst), 1);

        fx.handle.cancel();
    }

    #[tokio::test]
    async fn test_roster_changes_create_and_destroy_links() {
        let registry = StubRegistry::new(SessionStatus::Active, &["111"]);
        let fx = spawn_session("111", registry, false, 8);
        fx.handle.join_session().await.unwrap();
        let roster = fx.registry.roster_sender();

        roster
            .send(RosterEvent::ParticipantJoined(Participant::new(
                "222",
                "Bob",
                JoinStatus::Joined,
            )))
            .await
            .unwrap();
        let state = fx.handle.get_state().await.unwrap();
        assert_eq!(state.peers, vec![ParticipantId::from("222")]);

        roster
            .send(RosterEvent::ParticipantLeft(ParticipantId::from("222")))
            .await
            .unwrap();
        let state = fx.handle.get_state().await.unwrap();
        assert!(state.peers.is_empty());

        fx.handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_ending_session_leaves_locally() {
        let registry = StubRegistry::new(SessionStatus::Active, &["111", "222"]);
        let mut fx = spawn_session("111", registry, false, 8);
        fx.handle.join_session().await.unwrap();

        let mut ended = fx.registry.session.clone();
        ended.status = SessionStatus::Ended;
        fx.registry
            .roster_sender()
            .send(RosterEvent::RosterUpdated(ended))
            .await
            .unwrap();

        let state = fx.handle.get_state().await.unwrap();
        assert_eq!(state.phase, SessionPhase::Left);
        assert!(state.peers.is_empty());

        let mut saw_end = false;
        while let Ok(event) = fx.events.try_recv() {
            saw_end |= matches!(event, SessionEvent::SessionEnded);
        }
        assert!(saw_end);

        fx.handle.cancel();
    }

    #[tokio::test]
    async fn test_leave_then_cancel() {
        let registry = StubRegistry::new(SessionStatus::Active, &["111", "222"]);
        let fx = spawn_session("111", registry, false, 8);
        fx.handle.join_session().await.unwrap();

        fx.handle.leave_session().await.unwrap();
        let state = fx.handle.get_state().await.unwrap();
        assert_eq!(state.phase, SessionPhase::Left);
        assert!(state.peers.is_empty());
        assert_eq!(fx.registry.leaves.load(Ordering::SeqCst), 1);
        assert_eq!(fx.media.released.load(Ordering::SeqCst), 1);

        fx.handle.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), fx.task).await;
        assert!(result.is_ok(), "coordinator should exit after cancellation");
        // No second registry leave after an explicit leave
        assert_eq!(fx.registry.leaves.load(Ordering::SeqCst), 1);
    }
}
