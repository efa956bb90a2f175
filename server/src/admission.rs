//! Connection admission and registration handshake
//!
//! Every upgraded connection walks the same path:
//!
//! ```text
//! Upgraded -> Checked -> Registering -> Registered -> PlayerJoining -> Active
//!                |
//!                +-> Rejected
//! ```
//!
//! The only suspension point is `Registering`: the connection is handed to
//! the hub and the handshake waits for the hub's completion signal before the
//! game hears about the player. That wait is bounded; a hub that never
//! answers turns into [`AdmissionError::RegistrationStall`] instead of a
//! task parked forever.

use crate::client::{ClientHandle, ClientId, Outbound};
use crate::error::AdmissionError;
use crate::identity::ConnectionIdentity;
use crate::registry::{AdmissionRegistry, AdmitDecision};
use log::{debug, info};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

/// Hub side of the handshake
pub trait Registrar: Send + Sync {
    /// Submits a client; the receiver fires once the hub can route to it
    fn register(&self, client: ClientHandle) -> oneshot::Receiver<()>;

    fn unregister(&self, client_id: ClientId);
}

/// Game side of the handshake
pub trait PlayerSink: Send + Sync {
    /// Hands an admitted player to the simulation without waiting for it
    fn new_player_connect(&self, client: ClientHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Upgraded,
    Checked,
    Registering,
    Registered,
    PlayerJoining,
    Active,
    Rejected,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A connection that made it all the way to `Active`
#[derive(Debug)]
pub struct Admitted {
    pub client: ClientHandle,
    /// States traversed, in order
    pub trace: Vec<HandshakeState>,
}

/// Runs the admission handshake for every inbound connection
pub struct Gatekeeper<R, P> {
    registry: Arc<AdmissionRegistry>,
    hub: R,
    game: P,
    next_client_id: AtomicU32,
    register_timeout: Duration,
}

impl<R: Registrar, P: PlayerSink> Gatekeeper<R, P> {
    pub fn new(registry: Arc<AdmissionRegistry>, hub: R, game: P, register_timeout: Duration) -> Self {
        Self {
            registry,
            hub,
            game,
            next_client_id: AtomicU32::new(1),
            register_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<AdmissionRegistry> {
        &self.registry
    }

    /// Admits the connection reporting `origin` whose outbound queue is `outbound`
    ///
    /// On success the hub has confirmed registration and the game has been
    /// notified. On failure nothing stays registered: the identity is freed
    /// again and the game never hears about the client.
    pub async fn admit(
        &self,
        origin: &str,
        outbound: mpsc::Sender<Outbound>,
    ) -> Result<Admitted, AdmissionError> {
        let mut trace = vec![HandshakeState::Upgraded];
        let identity = ConnectionIdentity::from_origin(origin);
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let client = ClientHandle::new(client_id, identity.clone(), origin, outbound);

        info!("Registering {} (client {})", identity, client_id);

        let decision = self.registry.admit(identity.clone(), &client).await;
        advance(&mut trace, client_id, HandshakeState::Checked);
        if let AdmitDecision::Duplicate { holder } = decision {
            advance(&mut trace, client_id, HandshakeState::Rejected);
            return Err(AdmissionError::DuplicateIdentity { identity, holder });
        }

        advance(&mut trace, client_id, HandshakeState::Registering);
        let completion = self.hub.register(client.clone());
        match timeout(self.register_timeout, completion).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.abandon(&client).await;
                return Err(AdmissionError::HubUnavailable { client_id });
            }
            Err(_) => {
                self.abandon(&client).await;
                return Err(AdmissionError::RegistrationStall {
                    client_id,
                    waited: self.register_timeout,
                });
            }
        }
        advance(&mut trace, client_id, HandshakeState::Registered);

        advance(&mut trace, client_id, HandshakeState::PlayerJoining);
        self.game.new_player_connect(client.clone());
        advance(&mut trace, client_id, HandshakeState::Active);

        Ok(Admitted { client, trace })
    }

    /// Undoes a partial admission
    async fn abandon(&self, client: &ClientHandle) {
        self.hub.unregister(client.id());
        self.registry.release(client.identity(), client.id()).await;
    }
}

fn advance(trace: &mut Vec<HandshakeState>, client_id: ClientId, next: HandshakeState) {
    if let Some(previous) = trace.last() {
        debug!("Client {}: {} -> {}", client_id, previous, next);
    }
    trace.push(next);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::outbound_channel;
    use std::sync::Mutex;
    use tokio_test::{assert_pending, assert_ready};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Register(ClientId),
        Unregister(ClientId),
        NewPlayer(ClientId),
    }

    type CallLog = Arc<Mutex<Vec<Call>>>;

    #[derive(Clone, Copy)]
    enum HubMode {
        /// Confirms immediately
        Confirm,
        /// Keeps completion senders for the test to fire
        Manual,
        /// Drops the completion sender
        Abandon,
    }

    #[derive(Clone)]
    struct FakeHub {
        mode: HubMode,
        calls: CallLog,
        pending: Arc<Mutex<Vec<oneshot::Sender<()>>>>,
    }

    impl FakeHub {
        fn complete_all(&self) {
            for done in self.pending.lock().unwrap().drain(..) {
                let _ = done.send(());
            }
        }
    }

    impl Registrar for FakeHub {
        fn register(&self, client: ClientHandle) -> oneshot::Receiver<()> {
            self.calls.lock().unwrap().push(Call::Register(client.id()));
            let (done, completion) = oneshot::channel();
            match self.mode {
                HubMode::Confirm => {
                    let _ = done.send(());
                }
                HubMode::Manual => self.pending.lock().unwrap().push(done),
                HubMode::Abandon => drop(done),
            }
            completion
        }

        fn unregister(&self, client_id: ClientId) {
            self.calls.lock().unwrap().push(Call::Unregister(client_id));
        }
    }

    #[derive(Clone)]
    struct FakeGame {
        calls: CallLog,
    }

    impl PlayerSink for FakeGame {
        fn new_player_connect(&self, client: ClientHandle) {
            self.calls.lock().unwrap().push(Call::NewPlayer(client.id()));
        }
    }

    fn gatekeeper(mode: HubMode, register_timeout: Duration) -> (Gatekeeper<FakeHub, FakeGame>, FakeHub, CallLog) {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let hub = FakeHub {
            mode,
            calls: Arc::clone(&calls),
            pending: Arc::new(Mutex::new(Vec::new())),
        };
        let game = FakeGame {
            calls: Arc::clone(&calls),
        };
        let gatekeeper = Gatekeeper::new(
            Arc::new(AdmissionRegistry::default()),
            hub.clone(),
            game,
            register_timeout,
        );
        (gatekeeper, hub, calls)
    }

    fn calls(log: &CallLog) -> Vec<Call> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_admitted_connection_walks_every_state() {
        let (gatekeeper, _hub, log) = gatekeeper(HubMode::Confirm, Duration::from_secs(5));
        let (tx, _rx) = outbound_channel();

        let admitted = gatekeeper.admit("10.0.0.5:4242", tx).await.unwrap();

        assert_eq!(
            admitted.trace,
            vec![
                HandshakeState::Upgraded,
                HandshakeState::Checked,
                HandshakeState::Registering,
                HandshakeState::Registered,
                HandshakeState::PlayerJoining,
                HandshakeState::Active,
            ]
        );
        assert_eq!(admitted.client.identity().as_str(), "10.0.0.5");
        assert_eq!(calls(&log), vec![Call::Register(1), Call::NewPlayer(1)]);
    }

    #[tokio::test]
    async fn test_second_connection_from_same_host_is_rejected() {
        let (gatekeeper, _hub, log) = gatekeeper(HubMode::Confirm, Duration::from_secs(5));
        let (tx1, _rx1) = outbound_channel();
        let (tx2, _rx2) = outbound_channel();

        gatekeeper.admit("10.0.0.5:4242", tx1).await.unwrap();
        let before = calls(&log);

        let err = gatekeeper.admit("10.0.0.5:5555", tx2).await.unwrap_err();

        assert_eq!(err.failed_in(), HandshakeState::Rejected);
        assert!(matches!(
            err,
            AdmissionError::DuplicateIdentity { ref identity, holder: 1 } if identity.as_str() == "10.0.0.5"
        ));
        // No hub or game call for the rejected attempt
        assert_eq!(calls(&log), before);
    }

    #[tokio::test]
    async fn test_malformed_origin_admitted_once() {
        let (gatekeeper, _hub, log) = gatekeeper(HubMode::Confirm, Duration::from_secs(5));
        let (tx1, _rx1) = outbound_channel();
        let (tx2, _rx2) = outbound_channel();

        let first = gatekeeper.admit("::1", tx1).await.unwrap();
        assert!(first.client.identity().is_empty());

        let err = gatekeeper.admit("::1", tx2).await.unwrap_err();
        assert_eq!(err.failed_in(), HandshakeState::Rejected);
        assert_eq!(calls(&log), vec![Call::Register(1), Call::NewPlayer(1)]);
    }

    #[tokio::test]
    async fn test_game_notified_only_after_hub_confirms() {
        let (gatekeeper, hub, log) = gatekeeper(HubMode::Manual, Duration::from_secs(5));
        let (tx, _rx) = outbound_channel();

        let mut handshake = tokio_test::task::spawn(gatekeeper.admit("10.0.0.5:4242", tx));

        assert_pending!(handshake.poll());
        assert_eq!(calls(&log), vec![Call::Register(1)]);

        // Still waiting: nothing reaches the game while the hub is silent
        assert_pending!(handshake.poll());
        assert_eq!(calls(&log), vec![Call::Register(1)]);

        hub.complete_all();
        assert!(handshake.is_woken());
        let admitted = assert_ready!(handshake.poll()).unwrap();

        assert_eq!(admitted.trace.last(), Some(&HandshakeState::Active));
        assert_eq!(calls(&log), vec![Call::Register(1), Call::NewPlayer(1)]);
    }

    #[tokio::test]
    async fn test_stalled_registration_is_bounded() {
        let (gatekeeper, _hub, log) = gatekeeper(HubMode::Manual, Duration::from_millis(50));
        let (tx, _rx) = outbound_channel();

        let err = gatekeeper.admit("10.0.0.5:4242", tx).await.unwrap_err();

        assert!(matches!(err, AdmissionError::RegistrationStall { client_id: 1, .. }));
        assert_eq!(calls(&log), vec![Call::Register(1), Call::Unregister(1)]);
        assert!(gatekeeper.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_identity_reusable_after_stall() {
        let (gatekeeper, hub, _log) = gatekeeper(HubMode::Manual, Duration::from_millis(50));
        let (tx1, _rx1) = outbound_channel();
        let (tx2, _rx2) = outbound_channel();

        gatekeeper.admit("10.0.0.5:4242", tx1).await.unwrap_err();

        let mut retry = tokio_test::task::spawn(gatekeeper.admit("10.0.0.5:4243", tx2));
        assert_pending!(retry.poll());
        hub.complete_all();
        let admitted = assert_ready!(retry.poll()).unwrap();
        assert_eq!(admitted.client.id(), 2);
    }

    #[tokio::test]
    async fn test_dropped_completion_means_hub_unavailable() {
        let (gatekeeper, _hub, log) = gatekeeper(HubMode::Abandon, Duration::from_secs(5));
        let (tx, _rx) = outbound_channel();

        let err = gatekeeper.admit("10.0.0.5:4242", tx).await.unwrap_err();

        assert!(matches!(err, AdmissionError::HubUnavailable { client_id: 1 }));
        assert!(!calls(&log).contains(&Call::NewPlayer(1)));
        assert!(gatekeeper.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_client_ids_are_unique() {
        let (gatekeeper, _hub, _log) = gatekeeper(HubMode::Confirm, Duration::from_secs(5));
        let mut ids = Vec::new();

        for host in 1..=5 {
            let (tx, _rx) = outbound_channel();
            let admitted = gatekeeper
                .admit(&format!("10.0.0.{}:4000", host), tx)
                .await
                .unwrap();
            ids.push(admitted.client.id());
        }

        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_handshakes_admit_exactly_one() {
        let (gatekeeper, _hub, log) = gatekeeper(HubMode::Confirm, Duration::from_secs(5));
        let gatekeeper = Arc::new(gatekeeper);

        let attempts: Vec<_> = (0..2)
            .map(|n| {
                let gatekeeper = Arc::clone(&gatekeeper);
                tokio::spawn(async move {
                    let (tx, _rx) = outbound_channel();
                    gatekeeper.admit(&format!("10.0.0.5:{}", 4000 + n), tx).await.is_ok()
                })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 1);
        let new_players = calls(&log)
            .into_iter()
            .filter(|call| matches!(call, Call::NewPlayer(_)))
            .count();
        assert_eq!(new_players, 1);
    }
}
