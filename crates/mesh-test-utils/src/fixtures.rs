//! Fixtures for mesh tests: a shared mesh of mocks and participants spawned
//! on it.

use crate::mock_connection::LoopbackConnectionFactory;
use crate::mock_media::MockMediaController;
use crate::mock_registry::MockRegistry;
use crate::mock_relay::MockRelay;
use common::types::{ParticipantId, SessionId};
use mesh_coordinator::config::Config;
use mesh_coordinator::session::{
    Collaborators, SessionCoordinator, SessionEvent, SessionHandle, SessionState,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long `wait_until` polls before giving up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with short negotiation timeouts for tests.
#[must_use]
pub fn test_config() -> Config {
    Config {
        negotiation_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

/// Mocks shared by every participant of one session.
pub struct TestMesh {
    pub session_id: SessionId,
    pub relay: Arc<MockRelay>,
    pub registry: Arc<MockRegistry>,
    pub connections: Arc<LoopbackConnectionFactory>,
}

impl TestMesh {
    #[must_use]
    pub fn new(session_id: &str) -> Self {
        Self::with_registry(session_id, MockRegistry::new())
    }

    /// Mesh over a pre-seeded registry.
    #[must_use]
    pub fn with_registry(session_id: &str, registry: MockRegistry) -> Self {
        Self {
            session_id: SessionId::from(session_id),
            relay: Arc::new(MockRelay::new()),
            registry: Arc::new(registry),
            connections: Arc::new(LoopbackConnectionFactory::new()),
        }
    }

    /// Spawn a coordinator for `id` with an accepting media controller.
    #[must_use]
    pub fn spawn(&self, id: &str, config: &Config) -> TestParticipant {
        self.spawn_with_media(id, config, MockMediaController::accepting())
    }

    #[must_use]
    pub fn spawn_with_media(
        &self,
        id: &str,
        config: &Config,
        media: MockMediaController,
    ) -> TestParticipant {
        let media = Arc::new(media);
        let collaborators = Collaborators {
            relay: self.relay.clone(),
            registry: self.registry.clone(),
            media: media.clone(),
            connections: self.connections.clone(),
        };
        let (handle, events, task) = SessionCoordinator::spawn(
            self.session_id.clone(),
            ParticipantId::from(id),
            config,
            collaborators,
            CancellationToken::new(),
        );
        TestParticipant {
            id: ParticipantId::from(id),
            handle,
            events,
            task,
            media,
        }
    }
}

/// One spawned coordinator.
pub struct TestParticipant {
    pub id: ParticipantId,
    pub handle: SessionHandle,
    pub events: mpsc::Receiver<SessionEvent>,
    pub task: JoinHandle<()>,
    pub media: Arc<MockMediaController>,
}

impl TestParticipant {
    #[must_use]
    pub async fn state(&self) -> SessionState {
        self.handle.get_state().await.unwrap()
    }

    /// Poll the coordinator state until `predicate` holds.
    ///
    /// # Panics
    ///
    /// Panics if it does not hold within [`WAIT_TIMEOUT`].
    pub async fn wait_for_state<P>(&self, what: &str, predicate: P) -> SessionState
    where
        P: Fn(&SessionState) -> bool,
    {
        let handle = self.handle.clone();
        wait_until(
            what,
            || {
                let handle = handle.clone();
                async move { handle.get_state().await.ok() }
            },
            predicate,
        )
        .await
    }

    /// Drain events that are already queued.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Receive events until one matches, discarding the rest.
    ///
    /// # Panics
    ///
    /// Panics if no match arrives within [`WAIT_TIMEOUT`].
    pub async fn expect_event<P>(&mut self, what: &str, predicate: P) -> SessionEvent
    where
        P: Fn(&SessionEvent) -> bool,
    {
        let found = tokio::time::timeout(WAIT_TIMEOUT, async {
            while let Some(event) = self.events.recv().await {
                if predicate(&event) {
                    return Some(event);
                }
            }
            None
        })
        .await;
        match found {
            Ok(Some(event)) => event,
            _ => panic!("timed out waiting for event: {what}"),
        }
    }

    /// Cancel the coordinator and wait for it to stop.
    pub async fn shutdown(self) {
        self.handle.cancel();
        let _ = tokio::time::timeout(WAIT_TIMEOUT, self.task).await;
    }
}

/// Poll `probe` until it yields a value accepted by `predicate`.
///
/// # Panics
///
/// Panics if no accepted value is seen within [`WAIT_TIMEOUT`].
pub async fn wait_until<T, F, Fut, P>(what: &str, mut probe: F, predicate: P) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
    P: Fn(&T) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(value) = probe().await {
            if predicate(&value) {
                return value;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
