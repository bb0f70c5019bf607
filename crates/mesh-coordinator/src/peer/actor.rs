//! `PeerActor` - one actor per remote participant.
//!
//! Each `PeerActor`:
//! - Owns the [`PeerLink`] and the peer connection for one remote
//! - Processes inbound signals, local stream changes and connection events
//!   strictly one at a time from its mailbox
//! - Sends its own outbound signals straight to the relay
//! - Reports state changes, remote streams and failures to the coordinator
//!
//! # Lifecycle
//!
//! 1. Spawned by the `PeerConnectionManager` on roster join or first signal
//! 2. Sends the initial offer if it is the roster-confirmed initiator
//! 3. On failure, closes the link and reports it, then idles until cancelled
//! 4. Cancellation via child token of the session token

use super::connection::{ConnectionEvent, PeerConnection};
use super::link::{PeerLink, Received};
use super::messages::{PeerEvent, PeerEventKind, PeerMessage, PeerSnapshot};
use crate::errors::MeshError;
use crate::media::StreamHandle;
use crate::observability::metrics;
use crate::session::SignalRelay;
use crate::signaling::{
    NegotiationState, RejectReason, SessionDescription, SignalMessage, SignalPayload,
};
use common::types::{ParticipantId, StreamId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Lower bound for the inactivity check period.
const MIN_CHECK_PERIOD: Duration = Duration::from_millis(1);

/// Shared wiring handed to every peer actor of a session.
#[derive(Clone)]
pub struct PeerContext {
    pub relay: Arc<dyn SignalRelay>,
    /// Unbounded so a peer never waits on the coordinator, which may itself
    /// be waiting on this peer's mailbox.
    pub events: mpsc::UnboundedSender<PeerEvent>,
    pub negotiation_timeout: Duration,
    pub mailbox_buffer: usize,
}

/// Handle to a `PeerActor`.
#[derive(Clone, Debug)]
pub struct PeerActorHandle {
    sender: mpsc::Sender<PeerMessage>,
    cancel_token: CancellationToken,
    remote: ParticipantId,
    link_id: u64,
}

impl PeerActorHandle {
    #[must_use]
    pub fn remote(&self) -> &ParticipantId {
        &self.remote
    }

    /// Generation of the link this handle drives.
    #[must_use]
    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Deliver an inbound signal.
    pub async fn deliver(&self, signal: SignalMessage) -> Result<(), MeshError> {
        self.send(PeerMessage::Signal(signal)).await
    }

    pub async fn attach_local_stream(&self, stream: StreamHandle) -> Result<(), MeshError> {
        self.send(PeerMessage::AttachLocalStream(stream)).await
    }

    pub async fn detach_local_stream(&self, stream_id: StreamId) -> Result<(), MeshError> {
        self.send(PeerMessage::DetachLocalStream(stream_id)).await
    }

    /// Tell a lazily created link that the roster now confirms the remote.
    pub async fn promote(&self) -> Result<(), MeshError> {
        self.send(PeerMessage::Promote).await
    }

    pub async fn snapshot(&self) -> Result<PeerSnapshot, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(PeerMessage::Snapshot { respond_to: tx }).await?;

        rx.await
            .map_err(|e| MeshError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: PeerMessage) -> Result<(), MeshError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))
    }
}

/// The `PeerActor` implementation.
pub struct PeerActor {
    link: PeerLink,
    link_id: u64,
    connection: Box<dyn PeerConnection>,
    connection_events: mpsc::Receiver<ConnectionEvent>,
    receiver: mpsc::Receiver<PeerMessage>,
    cancel_token: CancellationToken,
    ctx: PeerContext,
    messages_processed: u64,
}

impl PeerActor {
    /// Spawn a new peer actor.
    ///
    /// `link` should already carry the local streams to send. Returns a handle
    /// and the task join handle.
    pub fn spawn(
        link: PeerLink,
        link_id: u64,
        connection: Box<dyn PeerConnection>,
        connection_events: mpsc::Receiver<ConnectionEvent>,
        ctx: PeerContext,
        cancel_token: CancellationToken,
    ) -> (PeerActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ctx.mailbox_buffer);
        let remote = link.remote().clone();

        let actor = Self {
            link,
            link_id,
            connection,
            connection_events,
            receiver,
            cancel_token: cancel_token.clone(),
            ctx,
            messages_processed: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = PeerActorHandle {
            sender,
            cancel_token,
            remote,
            link_id,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "mesh.peer",
        fields(remote_id = %self.link.remote(), link_id = self.link_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "mesh.peer",
            remote_id = %self.link.remote(),
            link_id = self.link_id,
            is_initiator = self.link.is_initiator(),
            "PeerActor started"
        );

        self.start().await;

        let period = (self.ctx.negotiation_timeout / 4).max(MIN_CHECK_PERIOD);
        let mut inactivity = tokio::time::interval(period);
        inactivity.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "mesh.peer",
                        remote_id = %self.link.remote(),
                        "PeerActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.messages_processed += 1;
                        }
                        None => {
                            debug!(
                                target: "mesh.peer",
                                remote_id = %self.link.remote(),
                                "PeerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }

                Some(event) = self.connection_events.recv() => {
                    self.handle_connection_event(event).await;
                }

                _ = inactivity.tick() => {
                    self.check_inactivity().await;
                }
            }
        }

        self.link.close();
        self.connection.close().await;

        info!(
            target: "mesh.peer",
            remote_id = %self.link.remote(),
            link_id = self.link_id,
            messages_processed = self.messages_processed,
            "PeerActor stopped"
        );
    }

    /// Attach the initial local streams and send the first offer if owed.
    async fn start(&mut self) {
        for stream in self.link.local_streams().to_vec() {
            if let Err(e) = self.connection.add_local_stream(&stream).await {
                self.fail(format!("failed to attach local stream: {e}"), false)
                    .await;
                return;
            }
        }

        if self.link.owes_initial_offer() {
            self.originate_offer().await;
        }
    }

    async fn handle_message(&mut self, message: PeerMessage) {
        match message {
            PeerMessage::Signal(signal) => self.handle_signal(signal).await,

            PeerMessage::AttachLocalStream(stream) => {
                if self.link.is_closed() || !self.link.add_local_stream(stream.clone()) {
                    return;
                }
                if let Err(e) = self.connection.add_local_stream(&stream).await {
                    self.fail(format!("failed to attach local stream: {e}"), false)
                        .await;
                    return;
                }
                self.local_streams_changed().await;
            }

            PeerMessage::DetachLocalStream(stream_id) => {
                if self.link.is_closed() || !self.link.remove_local_stream(stream_id) {
                    return;
                }
                if let Err(e) = self.connection.remove_local_stream(stream_id).await {
                    self.fail(format!("failed to detach local stream: {e}"), false)
                        .await;
                    return;
                }
                self.local_streams_changed().await;
            }

            PeerMessage::Promote => {
                self.link.promote();
                if self.link.owes_initial_offer() {
                    self.originate_offer().await;
                }
            }

            PeerMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.link.snapshot(self.link_id));
            }
        }
    }

    async fn handle_signal(&mut self, signal: SignalMessage) {
        let kind = signal.kind();
        let before = self.link.state();

        match self.link.receive(&signal, Instant::now()) {
            Received::Rejected(RejectReason::Duplicate) => {
                debug!(
                    target: "mesh.peer",
                    remote_id = %self.link.remote(),
                    kind = %kind,
                    dedup_key = %signal.dedup_key(),
                    "Duplicate signal dropped"
                );
                metrics::record_duplicate(kind.as_str());
                metrics::record_signal(kind.as_str(), RejectReason::Duplicate.as_str());
            }
            Received::Rejected(reason) => {
                debug!(
                    target: "mesh.peer",
                    remote_id = %self.link.remote(),
                    kind = %kind,
                    state = %before,
                    reason = reason.as_str(),
                    "Signal rejected"
                );
                metrics::record_signal(kind.as_str(), reason.as_str());
            }
            Received::Deferred => {
                debug!(
                    target: "mesh.peer",
                    remote_id = %self.link.remote(),
                    "Candidate deferred until remote description"
                );
                metrics::record_signal(kind.as_str(), "deferred");
            }
            Received::Candidate(candidate) => {
                metrics::record_signal(kind.as_str(), "applied");
                if let Err(e) = self.connection.add_ice_candidate(&candidate).await {
                    warn!(
                        target: "mesh.peer",
                        remote_id = %self.link.remote(),
                        error = %e,
                        "Connection refused candidate"
                    );
                }
            }
            Received::Offer(description) => {
                metrics::record_signal(kind.as_str(), "applied");
                self.state_changed(before).await;
                self.accept_offer(&description).await;
            }
            Received::Answer(description) => {
                metrics::record_signal(kind.as_str(), "applied");
                self.state_changed(before).await;
                self.accept_answer(&description).await;
            }
        }
    }

    async fn accept_offer(&mut self, description: &SessionDescription) {
        if !self.apply_remote_description(description).await {
            return;
        }

        let answer = match self.connection.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                self.fail(format!("failed to create answer: {e}"), false)
                    .await;
                return;
            }
        };
        self.send_signal(SignalPayload::Answer(answer)).await;
        self.serve_renegotiation().await;
    }

    async fn accept_answer(&mut self, description: &SessionDescription) {
        if self.apply_remote_description(description).await {
            self.serve_renegotiation().await;
        }
    }

    /// Hand a remote description to the connection and replay any candidates
    /// that were waiting for it. Returns `false` if the link failed.
    async fn apply_remote_description(&mut self, description: &SessionDescription) -> bool {
        if let Err(e) = self.connection.set_remote_description(description).await {
            self.fail(format!("remote description refused: {e}"), false)
                .await;
            return false;
        }

        let ready = self.link.remote_description_applied(Instant::now());
        if !ready.is_empty() {
            debug!(
                target: "mesh.peer",
                remote_id = %self.link.remote(),
                count = ready.len(),
                "Replaying deferred candidates"
            );
        }
        for candidate in ready {
            if let Err(e) = self.connection.add_ice_candidate(&candidate).await {
                warn!(
                    target: "mesh.peer",
                    remote_id = %self.link.remote(),
                    error = %e,
                    "Connection refused deferred candidate"
                );
            }
        }
        true
    }

    async fn originate_offer(&mut self) {
        if let Err(reason) = self.link.check_offer() {
            debug!(
                target: "mesh.peer",
                remote_id = %self.link.remote(),
                reason = reason.as_str(),
                "Offer not originated"
            );
            return;
        }

        match self.connection.create_offer().await {
            Ok(offer) => self.send_signal(SignalPayload::Offer(offer)).await,
            Err(e) => {
                self.fail(format!("failed to create offer: {e}"), false)
                    .await;
            }
        }
    }

    /// Seal a local payload through the link and hand it to the relay.
    ///
    /// Relay failures are logged and not retried.
    async fn send_signal(&mut self, payload: SignalPayload) {
        if self.cancel_token.is_cancelled() {
            return;
        }

        let kind = payload.kind();
        let before = self.link.state();

        let message = match self.link.seal(payload, Instant::now()) {
            Ok(message) => message,
            Err(reason) => {
                debug!(
                    target: "mesh.peer",
                    remote_id = %self.link.remote(),
                    kind = %kind,
                    reason = reason.as_str(),
                    "Outbound signal suppressed"
                );
                metrics::record_signal(kind.as_str(), reason.as_str());
                return;
            }
        };

        self.state_changed(before).await;

        debug!(
            target: "mesh.peer",
            remote_id = %self.link.remote(),
            kind = %kind,
            sequence = message.sequence,
            "Sending signal"
        );
        metrics::record_signal(kind.as_str(), "sent");

        if let Err(e) = self.ctx.relay.send(message).await {
            warn!(
                target: "mesh.peer",
                remote_id = %self.link.remote(),
                kind = %kind,
                error = %e,
                "Relay send failed"
            );
            metrics::record_relay_send_failure();
        }
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        if self.link.is_closed() {
            return;
        }

        match event {
            ConnectionEvent::LocalCandidate(candidate) => {
                self.send_signal(SignalPayload::IceCandidate(candidate))
                    .await;
            }
            ConnectionEvent::RemoteStream(stream) => {
                if let Some(classified) = self.link.accept_remote_stream(&stream) {
                    debug!(
                        target: "mesh.peer",
                        remote_id = %self.link.remote(),
                        stream_id = %stream.stream_id,
                        kind = %classified.handle.kind(),
                        replaced = classified.replaced.is_some(),
                        "Remote stream added"
                    );
                    self.emit(PeerEventKind::RemoteStreamAdded {
                        kind: classified.handle.kind(),
                        stream: classified.handle,
                    });
                }
            }
            ConnectionEvent::RemoteStreamEnded(stream_id) => {
                if let Some(kind) = self.link.remote_stream_ended(stream_id) {
                    self.emit(PeerEventKind::RemoteStreamRemoved { kind });
                }
            }
            ConnectionEvent::NegotiationNeeded => {
                self.link.note_negotiation_needed();
                self.serve_renegotiation().await;
            }
            ConnectionEvent::Failed(reason) => {
                self.fail(reason, false).await;
            }
        }
    }

    async fn local_streams_changed(&mut self) {
        if self.link.negotiation_started() {
            self.link.note_negotiation_needed();
            self.serve_renegotiation().await;
        }
    }

    async fn serve_renegotiation(&mut self) {
        if self.link.take_renegotiation() {
            debug!(
                target: "mesh.peer",
                remote_id = %self.link.remote(),
                "Renegotiating"
            );
            self.originate_offer().await;
        }
    }

    async fn check_inactivity(&mut self) {
        if self
            .link
            .negotiation_overdue(Instant::now(), self.ctx.negotiation_timeout)
        {
            self.fail("negotiation timed out".to_string(), true).await;
        }
    }

    /// Report a state transition and, when a negotiation just completed, its
    /// duration.
    async fn state_changed(&mut self, before: NegotiationState) {
        let after = self.link.state();
        if after == before {
            return;
        }

        debug!(
            target: "mesh.peer",
            remote_id = %self.link.remote(),
            from = %before,
            state = %after,
            "Negotiation state changed"
        );

        if let Some(duration) = self.link.take_negotiation_duration() {
            info!(
                target: "mesh.peer",
                remote_id = %self.link.remote(),
                duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                "Negotiation complete"
            );
            metrics::record_negotiation_duration(duration);
        }

        self.emit(PeerEventKind::StateChanged(after));
    }

    /// Close the link and report the failure. The actor keeps running until
    /// the manager cancels it, rejecting everything it receives.
    async fn fail(&mut self, reason: String, timed_out: bool) {
        if self.link.is_closed() {
            return;
        }

        warn!(
            target: "mesh.peer",
            remote_id = %self.link.remote(),
            link_id = self.link_id,
            reason = %reason,
            "Peer link failed"
        );

        self.link.close();
        self.connection.close().await;
        self.emit(PeerEventKind::Failed { reason, timed_out });
    }

    /// Report to the coordinator. Dropped if the session is gone.
    fn emit(&self, kind: PeerEventKind) {
        let event = PeerEvent {
            remote: self.link.remote().clone(),
            link_id: self.link_id,
            kind,
        };
        if self.ctx.events.send(event).is_err() {
            debug!(
                target: "mesh.peer",
                remote_id = %self.link.remote(),
                "Coordinator gone, peer event dropped"
            );
        }
    }
}
