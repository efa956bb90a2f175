//! Admitted client connections and their socket pumps
//!
//! A [`ClientHandle`] is the shared identity of one admitted connection. The
//! admission registry, the hub and the game all hold clones of it; none of
//! them owns the connection exclusively. Outbound traffic goes through a
//! bounded queue that the write pump drains into the socket. Any holder can
//! ask for the connection to be torn down through [`ClientHandle::disconnect`].

use crate::admission::Registrar;
use crate::game::GameHandle;
use crate::hub::HubHandle;
use crate::identity::ConnectionIdentity;
use crate::registry::AdmissionRegistry;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{Notice, RejectReason};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Server-assigned identifier of an admitted connection
pub type ClientId = u32;

/// Capacity of each client's outbound queue
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Frames queued for delivery to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Payload(Vec<u8>),
}

pub fn outbound_channel() -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
    mpsc::channel(OUTBOUND_QUEUE_SIZE)
}

struct ClientInner {
    id: ClientId,
    identity: ConnectionIdentity,
    origin: String,
    connected_at: Instant,
    sender: mpsc::Sender<Outbound>,
    disconnect: CancellationToken,
}

/// Cheaply clonable reference to one admitted connection
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<ClientInner>,
}

impl ClientHandle {
    pub fn new(
        id: ClientId,
        identity: ConnectionIdentity,
        origin: impl Into<String>,
        sender: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                id,
                identity,
                origin: origin.into(),
                connected_at: Instant::now(),
                sender,
                disconnect: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.inner.identity
    }

    /// Origin string the connection reported, port included
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn connected_for(&self) -> Duration {
        self.inner.connected_at.elapsed()
    }

    /// False once the write pump has gone away
    pub fn is_open(&self) -> bool {
        !self.inner.sender.is_closed()
    }

    /// Queues a payload without waiting
    ///
    /// Returns false when the queue is full or the connection is gone, so
    /// fan-out never blocks on a slow reader.
    pub fn try_send(&self, payload: Vec<u8>) -> bool {
        self.inner.sender.try_send(Outbound::Payload(payload)).is_ok()
    }

    /// Asks the connection task to run its teardown
    pub fn disconnect(&self) {
        self.inner.disconnect.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.disconnect.is_cancelled()
    }

    /// Resolves once [`ClientHandle::disconnect`] has been called
    pub async fn disconnected(&self) {
        self.inner.disconnect.cancelled().await
    }

    pub fn same_client(&self, other: &ClientHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.inner.id)
            .field("identity", &self.inner.identity)
            .field("origin", &self.inner.origin)
            .field("open", &self.is_open())
            .finish()
    }
}

fn to_message(outbound: Outbound) -> Message {
    match outbound {
        Outbound::Payload(bytes) => Message::Binary(bytes.into()),
    }
}

/// Drains the outbound queue into the socket until the queue closes or the
/// socket fails
pub async fn write_pump(
    client_id: ClientId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sink.send(to_message(frame)).await {
            debug!("Client {} write failed: {}", client_id, e);
            break;
        }
    }
    let _ = sink.close().await;
}

/// Forwards inbound frames to the game until the peer goes away
pub async fn read_pump(client: &ClientHandle, mut stream: SplitStream<WebSocket>, game: &GameHandle) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Binary(bytes)) => game.player_message(client.id(), bytes.to_vec()),
            Ok(Message::Text(text)) => {
                game.player_message(client.id(), text.as_str().as_bytes().to_vec())
            }
            Ok(Message::Close(frame)) => {
                debug!("Client {} sent close {:?}", client.id(), frame);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                debug!("Client {} read failed: {}", client.id(), e);
                break;
            }
        }
    }
}

/// Runs both pumps for an admitted client and tears it down afterwards
///
/// The connection ends when the peer goes away or when some holder of the
/// handle calls [`ClientHandle::disconnect`].
pub async fn serve(
    client: ClientHandle,
    sink: SplitSink<WebSocket, Message>,
    stream: SplitStream<WebSocket>,
    outbound: mpsc::Receiver<Outbound>,
    hub: &HubHandle,
    game: &GameHandle,
    registry: &AdmissionRegistry,
) {
    let writer = tokio::spawn(write_pump(client.id(), sink, outbound));

    tokio::select! {
        _ = read_pump(&client, stream, game) => {}
        _ = client.disconnected() => info!("Client {} disconnected by the server", client.id()),
    }

    teardown(&client, hub, game, registry).await;
    writer.abort();
}

/// Unregisters from the hub, removes the player from the game and releases
/// the identity so the same origin can connect again
pub async fn teardown(
    client: &ClientHandle,
    hub: &HubHandle,
    game: &GameHandle,
    registry: &AdmissionRegistry,
) -> bool {
    client.disconnect();
    hub.unregister(client.id());
    game.player_disconnect(client.id());
    let released = registry
        .release_on_disconnect(client.identity(), client.id())
        .await;

    info!(
        "Client {} from {} disconnected after {:.1}s (identity released: {})",
        client.id(),
        client.identity(),
        client.connected_for().as_secs_f32(),
        released
    );
    released
}

/// Tells a refused peer why and closes the socket
pub async fn reject(mut sink: SplitSink<WebSocket, Message>, reason: RejectReason) {
    let notice = Notice::Rejected { reason };
    match notice.encode() {
        Ok(bytes) => {
            if let Err(e) = sink.send(Message::Binary(bytes.into())).await {
                debug!("Failed to send rejection notice: {}", e);
                return;
            }
        }
        Err(e) => warn!("{}", e),
    }

    let close = Message::Close(Some(CloseFrame {
        code: reason.close_code(),
        reason: reason.description().into(),
    }));
    if let Err(e) = sink.send(close).await {
        debug!("Failed to send close frame: {}", e);
    }
    let _ = sink.close().await;
}
