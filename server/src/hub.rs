//! Live-connection hub
//!
//! The hub task owns the routing table of registered clients. Everything else
//! talks to it through a [`HubHandle`]; registration answers with a one-shot
//! completion signal once the client is in the table. A client whose outbound
//! queue is full or closed is dropped from the table and told to disconnect,
//! so its connection task tears it down everywhere else too.

use crate::admission::Registrar;
use crate::client::{ClientHandle, ClientId};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Commands accepted by the hub task
#[derive(Debug)]
pub enum HubCommand {
    Register {
        client: ClientHandle,
        done: oneshot::Sender<()>,
    },
    Unregister {
        client_id: ClientId,
    },
    Broadcast {
        payload: Vec<u8>,
    },
    SendTo {
        client_id: ClientId,
        payload: Vec<u8>,
    },
}

/// Sending side of the hub, cheap to clone
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    registered: Arc<AtomicUsize>,
}

impl HubHandle {
    fn submit(&self, command: HubCommand) {
        if let Err(e) = self.tx.send(command) {
            warn!("Hub is not running, dropped {:?}", e.0);
        }
    }

    pub fn broadcast(&self, payload: Vec<u8>) {
        self.submit(HubCommand::Broadcast { payload });
    }

    pub fn send_to(&self, client_id: ClientId, payload: Vec<u8>) {
        self.submit(HubCommand::SendTo { client_id, payload });
    }

    /// Number of clients currently in the routing table
    pub fn client_count(&self) -> usize {
        self.registered.load(Ordering::Relaxed)
    }
}

impl Registrar for HubHandle {
    fn register(&self, client: ClientHandle) -> oneshot::Receiver<()> {
        let (done, completion) = oneshot::channel();
        // If the hub is gone the command (and `done`) is dropped, which the
        // caller observes as a closed completion signal.
        self.submit(HubCommand::Register { client, done });
        completion
    }

    fn unregister(&self, client_id: ClientId) {
        self.submit(HubCommand::Unregister { client_id });
    }
}

/// The hub task state
pub struct Hub {
    rx: mpsc::UnboundedReceiver<HubCommand>,
    clients: HashMap<ClientId, ClientHandle>,
    registered: Arc<AtomicUsize>,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registered = Arc::new(AtomicUsize::new(0));
        let hub = Self {
            rx,
            clients: HashMap::new(),
            registered: Arc::clone(&registered),
        };
        (hub, HubHandle { tx, registered })
    }

    /// Processes commands until every handle is dropped
    pub async fn run(mut self) {
        info!("Hub started");
        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }
        info!("Hub stopped with {} clients registered", self.clients.len());
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { client, done } => {
                let client_id = client.id();
                if self.clients.insert(client_id, client).is_some() {
                    warn!("Client {} registered twice", client_id);
                }
                self.update_gauge();
                debug!("Client {} registered ({} live)", client_id, self.clients.len());
                // The waiting admission task may have given up already.
                let _ = done.send(());
            }
            HubCommand::Unregister { client_id } => {
                if self.clients.remove(&client_id).is_some() {
                    self.update_gauge();
                    debug!("Client {} unregistered ({} live)", client_id, self.clients.len());
                }
            }
            HubCommand::Broadcast { payload } => {
                let stalled: Vec<ClientId> = self
                    .clients
                    .values()
                    .filter(|client| !client.try_send(payload.clone()))
                    .map(|client| client.id())
                    .collect();

                for client_id in stalled {
                    self.drop_stalled(client_id);
                }
            }
            HubCommand::SendTo { client_id, payload } => match self.clients.get(&client_id) {
                Some(client) => {
                    if !client.try_send(payload) {
                        self.drop_stalled(client_id);
                    }
                }
                None => debug!("SendTo unknown client {}", client_id),
            },
        }
    }

    fn drop_stalled(&mut self, client_id: ClientId) {
        if let Some(client) = self.clients.remove(&client_id) {
            warn!("Dropping client {} from hub, outbound queue unavailable", client_id);
            client.disconnect();
            self.update_gauge();
        }
    }

    fn update_gauge(&self) {
        self.registered.store(self.clients.len(), Ordering::Relaxed);
    }
}
