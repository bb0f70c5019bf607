//! `PeerConnectionManager` - the set of live peer links of one session.
//!
//! The manager is owned by the session coordinator and is the only place
//! peer actors are created or destroyed, so at most one link per remote
//! exists at any time. Signals for a remote without a link are buffered in
//! the [`PendingSignalQueue`] and drained, in receipt order, into the new
//! actor's mailbox as soon as it exists. Gating on readiness happens inside
//! the link, never by waiting.

use super::actor::{PeerActor, PeerActorHandle, PeerContext};
use super::connection::PeerConnectionFactory;
use super::link::PeerLink;
use super::messages::{Origin, PeerSnapshot};
use crate::config::Config;
use crate::errors::{ConnectionError, MeshError};
use crate::media::StreamHandle;
use crate::observability::metrics;
use crate::signaling::{Enqueued, PendingSignalQueue, SignalMessage};
use common::types::{ParticipantId, StreamId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long to wait for a cancelled peer actor to finish.
const PEER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of [`PeerConnectionManager::create_peer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { link_id: u64 },
    /// A link already exists; nothing was created.
    Existing { link_id: u64 },
    Refused(RefuseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefuseReason {
    /// The remote is the local participant.
    SelfLink,
    /// The participant cap is reached.
    AtCapacity,
}

/// Outcome of [`PeerConnectionManager::handle_inbound_signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Handed to the existing link.
    Delivered,
    /// Buffered for a link that was created for it.
    Queued { link_id: u64 },
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Addressed to someone else.
    Misaddressed,
    /// Sent by the local participant.
    FromSelf,
    /// Sender has left the session.
    Departed,
    /// The link to the sender failed and the roster has not re-added it.
    LinkFailed,
    /// No room for another link.
    AtCapacity,
}

impl DropReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DropReason::Misaddressed => "misaddressed",
            DropReason::FromSelf => "from_self",
            DropReason::Departed => "departed",
            DropReason::LinkFailed => "link_failed",
            DropReason::AtCapacity => "at_capacity",
        }
    }
}

/// Why a link is being destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// The remote left the session.
    Left,
    /// The link failed.
    Failed,
    /// The local participant is leaving.
    Teardown,
}

impl DestroyReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DestroyReason::Left => "left",
            DestroyReason::Failed => "failed",
            DestroyReason::Teardown => "teardown",
        }
    }
}

/// A peer actor whose task ended without being destroyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crashed {
    pub remote: ParticipantId,
    pub link_id: u64,
}

struct ManagedPeer {
    handle: PeerActorHandle,
    task_handle: JoinHandle<()>,
}

pub struct PeerConnectionManager {
    local: ParticipantId,
    max_participants: usize,
    dedup_window: usize,
    factory: Arc<dyn PeerConnectionFactory>,
    ctx: PeerContext,
    cancel_token: CancellationToken,
    peers: HashMap<ParticipantId, ManagedPeer>,
    pending: PendingSignalQueue,
    departed: HashSet<ParticipantId>,
    failed: HashSet<ParticipantId>,
    local_streams: Vec<StreamHandle>,
    next_link_id: u64,
}

impl PeerConnectionManager {
    /// Create a manager. Peer actors run on child tokens of `cancel_token`.
    #[must_use]
    pub fn new(
        local: ParticipantId,
        config: &Config,
        factory: Arc<dyn PeerConnectionFactory>,
        ctx: PeerContext,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            local,
            max_participants: config.max_participants,
            dedup_window: config.dedup_window,
            factory,
            ctx,
            cancel_token,
            peers: HashMap::new(),
            pending: PendingSignalQueue::new(config.pending_queue_limit),
            departed: HashSet::new(),
            failed: HashSet::new(),
            local_streams: Vec::new(),
            next_link_id: 1,
        }
    }

    /// Create the link for `remote`, unless one exists or it is refused.
    ///
    /// A roster-originated create on an existing lazily created link promotes
    /// it so the tie-break initiator can send the first offer. Buffered signals
    /// for `remote` are delivered to a new link in receipt order.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if the connection layer cannot create the
    /// connection. Buffered signals for `remote` are discarded in that case.
    pub async fn create_peer(
        &mut self,
        remote: &ParticipantId,
        origin: Origin,
    ) -> Result<CreateOutcome, ConnectionError> {
        if let Some(existing) = self.peers.get(remote) {
            let link_id = existing.handle.link_id();
            if origin == Origin::Roster {
                let _ = existing.handle.promote().await;
            }
            return Ok(CreateOutcome::Existing { link_id });
        }

        if remote == &self.local {
            return Ok(CreateOutcome::Refused(RefuseReason::SelfLink));
        }

        // The local participant occupies one slot
        if self.peers.len() + 1 >= self.max_participants {
            warn!(
                target: "mesh.peer.manager",
                remote_id = %remote,
                max_participants = self.max_participants,
                "Participant cap reached, refusing peer"
            );
            return Ok(CreateOutcome::Refused(RefuseReason::AtCapacity));
        }

        if origin == Origin::Roster {
            self.departed.remove(remote);
            self.failed.remove(remote);
        }

        let (connection_tx, connection_rx) = mpsc::channel(self.ctx.mailbox_buffer);
        let connection = match self
            .factory
            .create(&self.local, remote, connection_tx)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                self.pending.clear(remote);
                return Err(e);
            }
        };

        let link_id = self.next_link_id;
        self.next_link_id += 1;

        let mut link = PeerLink::new(self.local.clone(), remote.clone(), origin, self.dedup_window);
        for stream in &self.local_streams {
            link.add_local_stream(stream.clone());
        }

        let (handle, task_handle) = PeerActor::spawn(
            link,
            link_id,
            connection,
            connection_rx,
            self.ctx.clone(),
            self.cancel_token.child_token(),
        );

        let buffered = self.pending.drain(remote);
        let buffered_count = buffered.len();
        for signal in buffered {
            if let Err(e) = handle.deliver(signal).await {
                warn!(
                    target: "mesh.peer.manager",
                    remote_id = %remote,
                    error = %e,
                    "Failed to deliver buffered signal"
                );
            }
        }

        self.peers.insert(
            remote.clone(),
            ManagedPeer {
                handle,
                task_handle,
            },
        );
        metrics::set_peers_active(self.peers.len());

        info!(
            target: "mesh.peer.manager",
            remote_id = %remote,
            link_id = link_id,
            origin = ?origin,
            buffered = buffered_count,
            "Peer created"
        );

        Ok(CreateOutcome::Created { link_id })
    }

    /// Route a signal from the relay to its link, creating the link lazily.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if a lazily created link could not get a
    /// connection.
    pub async fn handle_inbound_signal(
        &mut self,
        signal: SignalMessage,
    ) -> Result<Routed, ConnectionError> {
        let routed = self.route(signal).await;
        if let Ok(Routed::Dropped(reason)) = &routed {
            debug!(
                target: "mesh.peer.manager",
                reason = reason.as_str(),
                "Inbound signal dropped"
            );
        }
        routed
    }

    async fn route(&mut self, signal: SignalMessage) -> Result<Routed, ConnectionError> {
        if signal.to != self.local {
            metrics::record_signal(signal.kind().as_str(), DropReason::Misaddressed.as_str());
            return Ok(Routed::Dropped(DropReason::Misaddressed));
        }
        if signal.from == self.local {
            metrics::record_signal(signal.kind().as_str(), DropReason::FromSelf.as_str());
            return Ok(Routed::Dropped(DropReason::FromSelf));
        }
        if self.departed.contains(&signal.from) {
            metrics::record_signal(signal.kind().as_str(), DropReason::Departed.as_str());
            return Ok(Routed::Dropped(DropReason::Departed));
        }
        if self.failed.contains(&signal.from) {
            metrics::record_signal(signal.kind().as_str(), DropReason::LinkFailed.as_str());
            return Ok(Routed::Dropped(DropReason::LinkFailed));
        }

        if let Some(peer) = self.peers.get(&signal.from) {
            if let Err(e) = peer.handle.deliver(signal).await {
                warn!(
                    target: "mesh.peer.manager",
                    error = %e,
                    "Failed to deliver signal to peer"
                );
            }
            return Ok(Routed::Delivered);
        }

        let remote = signal.from.clone();
        let kind = signal.kind();
        if self.pending.enqueue(remote.clone(), signal) == Enqueued::QueuedDroppedOldest {
            metrics::record_pending_dropped();
        }
        metrics::record_signal(kind.as_str(), "queued");

        match self.create_peer(&remote, Origin::InboundSignal).await? {
            CreateOutcome::Created { link_id } | CreateOutcome::Existing { link_id } => {
                Ok(Routed::Queued { link_id })
            }
            CreateOutcome::Refused(_) => {
                self.pending.clear(&remote);
                Ok(Routed::Dropped(DropReason::AtCapacity))
            }
        }
    }

    /// Destroy the link for `remote`. Returns its link id if one existed.
    ///
    /// Buffered signals for `remote` are discarded either way. `Left` marks
    /// the remote as departed and `Failed` marks its link as failed; late
    /// signals from it are dropped until the roster announces it again.
    pub async fn destroy_peer(
        &mut self,
        remote: &ParticipantId,
        reason: DestroyReason,
    ) -> Option<u64> {
        let discarded = self.pending.clear(remote);
        match reason {
            DestroyReason::Left => {
                self.departed.insert(remote.clone());
            }
            DestroyReason::Failed => {
                self.failed.insert(remote.clone());
            }
            DestroyReason::Teardown => {}
        }

        let managed = self.peers.remove(remote)?;
        let link_id = managed.handle.link_id();
        managed.handle.cancel();
        Self::await_shutdown(remote, managed.task_handle).await;
        metrics::set_peers_active(self.peers.len());

        info!(
            target: "mesh.peer.manager",
            remote_id = %remote,
            link_id = link_id,
            reason = reason.as_str(),
            discarded = discarded,
            "Peer destroyed"
        );

        Some(link_id)
    }

    /// Destroy every link. All actors are cancelled before any is awaited.
    pub async fn teardown_all(&mut self) -> Vec<(ParticipantId, u64)> {
        for managed in self.peers.values() {
            managed.handle.cancel();
        }

        let mut destroyed = Vec::with_capacity(self.peers.len());
        for (remote, managed) in self.peers.drain() {
            Self::await_shutdown(&remote, managed.task_handle).await;
            destroyed.push((remote, managed.handle.link_id()));
        }

        self.pending.clear_all();
        self.failed.clear();
        self.local_streams.clear();
        metrics::set_peers_active(0);

        info!(
            target: "mesh.peer.manager",
            peers = destroyed.len(),
            "All peers torn down"
        );
        destroyed
    }

    /// Send a shared local stream to every current and future link.
    pub async fn attach_local_stream(&mut self, stream: StreamHandle) {
        if self.local_streams.iter().any(|s| s.id() == stream.id()) {
            return;
        }
        self.local_streams.push(stream.clone());
        for managed in self.peers.values() {
            let _ = managed.handle.attach_local_stream(stream.clone()).await;
        }
    }

    /// Stop sending a local stream on every link.
    pub async fn detach_local_stream(&mut self, stream_id: StreamId) {
        self.local_streams.retain(|s| s.id() != stream_id);
        for managed in self.peers.values() {
            let _ = managed.handle.detach_local_stream(stream_id).await;
        }
    }

    /// # Errors
    ///
    /// Returns `MeshError::Internal` if the peer actor is gone.
    pub async fn snapshot(&self, remote: &ParticipantId) -> Result<Option<PeerSnapshot>, MeshError> {
        match self.peers.get(remote) {
            Some(managed) => managed.handle.snapshot().await.map(Some),
            None => Ok(None),
        }
    }

    /// Remove peer actors whose task ended on its own. A peer actor only
    /// exits when cancelled, so any such task crashed.
    pub async fn check_health(&mut self) -> Vec<Crashed> {
        let finished: Vec<ParticipantId> = self
            .peers
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(remote, _)| remote.clone())
            .collect();

        let mut crashed = Vec::new();
        for remote in finished {
            let Some(managed) = self.peers.remove(&remote) else {
                continue;
            };
            let link_id = managed.handle.link_id();
            match managed.task_handle.await {
                Ok(()) => {
                    warn!(
                        target: "mesh.peer.manager",
                        remote_id = %remote,
                        link_id = link_id,
                        "Peer actor exited unexpectedly"
                    );
                }
                Err(join_error) => {
                    error!(
                        target: "mesh.peer.manager",
                        remote_id = %remote,
                        link_id = link_id,
                        error = ?join_error,
                        "Peer actor panicked"
                    );
                }
            }
            self.pending.clear(&remote);
            self.failed.insert(remote.clone());
            metrics::record_peer_failure("panic");
            crashed.push(Crashed { remote, link_id });
        }

        if !crashed.is_empty() {
            metrics::set_peers_active(self.peers.len());
        }
        crashed
    }

    /// Whether `link_id` is the live link for `remote`.
    #[must_use]
    pub fn is_current(&self, remote: &ParticipantId, link_id: u64) -> bool {
        self.peers
            .get(remote)
            .is_some_and(|managed| managed.handle.link_id() == link_id)
    }

    #[must_use]
    pub fn contains(&self, remote: &ParticipantId) -> bool {
        self.peers.contains_key(remote)
    }

    #[must_use]
    pub fn remotes(&self) -> Vec<ParticipantId> {
        let mut remotes: Vec<ParticipantId> = self.peers.keys().cloned().collect();
        remotes.sort();
        remotes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    #[must_use]
    pub fn pending_len(&self, remote: &ParticipantId) -> usize {
        self.pending.len_for(remote)
    }

    #[must_use]
    pub fn is_departed(&self, remote: &ParticipantId) -> bool {
        self.departed.contains(remote)
    }

    /// Whether the last link to `remote` failed and was not re-announced.
    #[must_use]
    pub fn is_failed(&self, remote: &ParticipantId) -> bool {
        self.failed.contains(remote)
    }

    async fn await_shutdown(remote: &ParticipantId, task_handle: JoinHandle<()>) {
        match tokio::time::timeout(PEER_SHUTDOWN_TIMEOUT, task_handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    target: "mesh.peer.manager",
                    remote_id = %remote,
                    error = ?e,
                    "Peer task panicked during shutdown"
                );
            }
            Err(_) => {
                warn!(
                    target: "mesh.peer.manager",
                    remote_id = %remote,
                    "Peer shutdown timed out"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::RelayError;
    use crate::peer::connection::{ConnectionEvent, PeerConnection};
    use crate::peer::messages::PeerEvent;
    use crate::session::SignalRelay;
    use crate::signaling::{
        IceCandidate, NegotiationState, SessionDescription, SignalPayload,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

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

    struct CountingFactory {
        created: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl PeerConnectionFactory for CountingFactory {
        async fn create(
            &self,
            _local: &ParticipantId,
            _remote: &ParticipantId,
            _events: mpsc::Sender<ConnectionEvent>,
        ) -> Result<Box<dyn PeerConnection>, ConnectionError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ConnectionError::Create("no transport".to_string()));
            }
            Ok(Box::new(NullConnection))
        }
    }

    #[derive(Default)]
    struct RecordingRelay {
        sent: Mutex<Vec<SignalMessage>>,
    }

    #[async_trait::async_trait]
    impl SignalRelay for RecordingRelay {
        async fn send(&self, message: SignalMessage) -> Result<(), RelayError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn subscribe(
            &self,
            _local: &ParticipantId,
        ) -> Result<mpsc::Receiver<SignalMessage>, RelayError> {
            Err(RelayError::SubscribeFailed("not supported".to_string()))
        }
    }

    struct Fixture {
        manager: PeerConnectionManager,
        factory: Arc<CountingFactory>,
        _events: mpsc::UnboundedReceiver<PeerEvent>,
    }

    fn manager(local: &str, max_participants: usize, fail: bool) -> Fixture {
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
            fail,
        });
        let (events_tx, events) = mpsc::unbounded_channel();
        let config = Config {
            max_participants,
            ..Config::default()
        };
        let ctx = PeerContext {
            relay: Arc::new(RecordingRelay::default()),
            events: events_tx,
            negotiation_timeout: config.negotiation_timeout,
            mailbox_buffer: config.peer_mailbox_buffer,
        };
        let manager = PeerConnectionManager::new(
            ParticipantId::from(local),
            &config,
            factory.clone(),
            ctx,
            CancellationToken::new(),
        );
        Fixture {
            manager,
            factory,
            _events: events,
        }
    }

    fn signal(from: &str, to: &str, sequence: u64, payload: SignalPayload) -> SignalMessage {
        SignalMessage {
            from: ParticipantId::from(from),
            to: ParticipantId::from(to),
            sequence,
            payload,
        }
    }

    fn offer(from: &str, to: &str) -> SignalMessage {
        signal(
            from,
            to,
            1,
            SignalPayload::Offer(SessionDescription {
                sdp: "offer".to_string(),
                streams: Vec::new(),
            }),
        )
    }

    fn candidate(from: &str, to: &str, sequence: u64) -> SignalMessage {
        signal(
            from,
            to,
            sequence,
            SignalPayload::IceCandidate(IceCandidate {
                candidate: format!("candidate:{sequence}"),
                sdp_mid: None,
                sdp_mline_index: Some(0),
            }),
        )
    }

    #[tokio::test]
    async fn test_create_peer_is_idempotent() {
        let mut fx = manager("111", 8, false);
        let remote = ParticipantId::from("222");

        let first = fx.manager.create_peer(&remote, Origin::Roster).await.unwrap();
        let second = fx.manager.create_peer(&remote, Origin::Roster).await.unwrap();

        assert_eq!(first, CreateOutcome::Created { link_id: 1 });
        assert_eq!(second, CreateOutcome::Existing { link_id: 1 });
        assert_eq!(fx.manager.len(), 1);
        assert_eq!(fx.factory.created.load(Ordering::SeqCst), 1);

        fx.manager.teardown_all().await;
    }

    #[tokio::test]
    async fn test_create_peer_refusals() {
        let mut fx = manager("111", 2, false);

        let outcome = fx
            .manager
            .create_peer(&ParticipantId::from("111"), Origin::Roster)
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Refused(RefuseReason::SelfLink));

        fx.manager
            .create_peer(&ParticipantId::from("222"), Origin::Roster)
            .await
            .unwrap();
        let outcome = fx
            .manager
            .create_peer(&ParticipantId::from("333"), Origin::Roster)
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Refused(RefuseReason::AtCapacity));
        assert_eq!(fx.manager.len(), 1);

        fx.manager.teardown_all().await;
    }

    #[tokio::test]
    async fn test_unknown_sender_is_queued_and_drained_in_order() {
        let mut fx = manager("222", 8, false);
        let remote = ParticipantId::from("111");

        // Candidate first, then the offer it belongs to
        let routed = fx
            .manager
            .handle_inbound_signal(candidate("111", "222", 2))
            .await
            .unwrap();
        assert_eq!(routed, Routed::Queued { link_id: 1 });
        assert_eq!(fx.manager.pending_len(&remote), 0);

        let routed = fx
            .manager
            .handle_inbound_signal(offer("111", "222"))
            .await
            .unwrap();
        assert_eq!(routed, Routed::Delivered);

        let snapshot = fx.manager.snapshot(&remote).await.unwrap().unwrap();
        assert_eq!(snapshot.origin, Origin::InboundSignal);
        assert!(!snapshot.is_initiator);
        assert_eq!(snapshot.state, NegotiationState::Stable);
        assert_eq!(snapshot.negotiations_completed, 1);
        assert_eq!(snapshot.deferred_candidates, 0);

        fx.manager.teardown_all().await;
    }

    #[tokio::test]
    async fn test_misaddressed_and_self_signals_dropped() {
        let mut fx = manager("222", 8, false);

        let routed = fx
            .manager
            .handle_inbound_signal(offer("111", "333"))
            .await
            .unwrap();
        assert_eq!(routed, Routed::Dropped(DropReason::Misaddressed));

        let routed = fx
            .manager
            .handle_inbound_signal(offer("222", "222"))
            .await
            .unwrap();
        assert_eq!(routed, Routed::Dropped(DropReason::FromSelf));
        assert!(fx.manager.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_on_leave_drops_late_signals() {
        let mut fx = manager("111", 8, false);
        let remote = ParticipantId::from("222");

        fx.manager.create_peer(&remote, Origin::Roster).await.unwrap();
        assert_eq!(
            fx.manager.destroy_peer(&remote, DestroyReason::Left).await,
            Some(1)
        );
        assert!(!fx.manager.contains(&remote));
        assert!(fx.manager.is_departed(&remote));
        assert!(fx.manager.snapshot(&remote).await.unwrap().is_none());

        let routed = fx
            .manager
            .handle_inbound_signal(candidate("222", "111", 9))
            .await
            .unwrap();
        assert_eq!(routed, Routed::Dropped(DropReason::Departed));
        assert_eq!(fx.manager.pending_len(&remote), 0);
        assert!(fx.manager.is_empty());

        // Rejoining clears the departed mark and gets a new generation
        let outcome = fx.manager.create_peer(&remote, Origin::Roster).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Created { link_id: 2 });
        assert!(!fx.manager.is_departed(&remote));
        assert!(fx.manager.is_current(&remote, 2));
        assert!(!fx.manager.is_current(&remote, 1));

        fx.manager.teardown_all().await;
    }

    #[tokio::test]
    async fn test_failed_link_is_not_revived_by_late_signal() {
        let mut fx = manager("111", 8, false);
        let remote = ParticipantId::from("222");

        fx.manager.create_peer(&remote, Origin::Roster).await.unwrap();
        assert_eq!(
            fx.manager.destroy_peer(&remote, DestroyReason::Failed).await,
            Some(1)
        );
        assert!(fx.manager.is_failed(&remote));

        // A late copy from the still-joined remote must not create a lazy
        // link that would never send the initiator's offer
        let routed = fx
            .manager
            .handle_inbound_signal(candidate("222", "111", 4))
            .await
            .unwrap();
        assert_eq!(routed, Routed::Dropped(DropReason::LinkFailed));
        assert!(fx.manager.is_empty());
        assert_eq!(fx.manager.pending_len(&remote), 0);
        assert_eq!(fx.factory.created.load(Ordering::SeqCst), 1);

        // The roster announcing the remote again clears the mark
        let outcome = fx.manager.create_peer(&remote, Origin::Roster).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Created { link_id: 2 });
        assert!(!fx.manager.is_failed(&remote));
        let snapshot = fx.manager.snapshot(&remote).await.unwrap().unwrap();
        assert_eq!(snapshot.origin, Origin::Roster);
        assert!(snapshot.is_initiator);

        fx.manager.teardown_all().await;
    }

    #[tokio::test]
    async fn test_factory_failure_discards_buffered_signals() {
        let mut fx = manager("222", 8, true);
        let remote = ParticipantId::from("111");

        let result = fx
            .manager
            .handle_inbound_signal(offer("111", "222"))
            .await;
        assert!(matches!(result, Err(ConnectionError::Create(_))));
        assert_eq!(fx.manager.pending_len(&remote), 0);
        assert!(fx.manager.is_empty());
    }

    #[tokio::test]
    async fn test_teardown_all_cancels_everything() {
        let mut fx = manager("111", 8, false);
        for remote in ["222", "333", "444"] {
            fx.manager
                .create_peer(&ParticipantId::from(remote), Origin::Roster)
                .await
                .unwrap();
        }
        assert_eq!(
            fx.manager.remotes(),
            vec![
                ParticipantId::from("222"),
                ParticipantId::from("333"),
                ParticipantId::from("444"),
            ]
        );

        let mut destroyed = fx.manager.teardown_all().await;
        destroyed.sort();
        assert_eq!(destroyed.len(), 3);
        assert!(fx.manager.is_empty());
        assert!(fx.manager.check_health().await.is_empty());
    }
}
