//! Game simulation collaborator
//!
//! Owns the player roster and the fixed-rate tick. The admission path only
//! ever hands players over through [`GameHandle`], which never waits on the
//! simulation: a slow tick cannot stall new connections.

use crate::admission::PlayerSink;
use crate::client::{ClientHandle, ClientId};
use crate::hub::HubHandle;
use log::{debug, info, warn};
use shared::Notice;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Commands processed by the game task
#[derive(Debug)]
pub enum GameCommand {
    NewPlayerConnect { client: ClientHandle },
    PlayerDisconnect { client_id: ClientId },
    PlayerMessage { client_id: ClientId, payload: Vec<u8> },
}

#[derive(Clone)]
pub struct GameHandle {
    tx: mpsc::UnboundedSender<GameCommand>,
    players: Arc<AtomicUsize>,
}

impl GameHandle {
    fn submit(&self, command: GameCommand) {
        if let Err(e) = self.tx.send(command) {
            warn!("Game is not running, dropped {:?}", e.0);
        }
    }

    pub fn player_disconnect(&self, client_id: ClientId) {
        self.submit(GameCommand::PlayerDisconnect { client_id });
    }

    pub fn player_message(&self, client_id: ClientId, payload: Vec<u8>) {
        self.submit(GameCommand::PlayerMessage { client_id, payload });
    }

    pub fn player_count(&self) -> usize {
        self.players.load(Ordering::Relaxed)
    }
}

impl PlayerSink for GameHandle {
    fn new_player_connect(&self, client: ClientHandle) {
        self.submit(GameCommand::NewPlayerConnect { client });
    }
}

struct Player {
    client: ClientHandle,
    joined_tick: u64,
}

pub struct Game {
    rx: mpsc::UnboundedReceiver<GameCommand>,
    hub: HubHandle,
    players: HashMap<ClientId, Player>,
    player_gauge: Arc<AtomicUsize>,
    tick: u64,
    tick_rate: u32,
}

impl Game {
    pub fn new(hub: HubHandle, tick_rate: u32) -> (Self, GameHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let players = Arc::new(AtomicUsize::new(0));
        let game = Self {
            rx,
            hub,
            players: HashMap::new(),
            player_gauge: Arc::clone(&players),
            tick: 0,
            tick_rate: tick_rate.max(1),
        };
        (game, GameHandle { tx, players })
    }

    /// Runs the simulation until every handle is dropped
    pub async fn run(mut self) {
        let mut tick_interval = interval(Duration::from_secs_f64(1.0 / self.tick_rate as f64));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Game started at {}Hz", self.tick_rate);

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => break,
                    }
                },
                _ = tick_interval.tick() => self.on_tick(),
            }
        }

        info!("Game stopped after {} ticks", self.tick);
    }

    fn handle(&mut self, command: GameCommand) {
        match command {
            GameCommand::NewPlayerConnect { client } => self.add_player(client),
            GameCommand::PlayerDisconnect { client_id } => self.remove_player(client_id),
            GameCommand::PlayerMessage { client_id, payload } => {
                if self.players.contains_key(&client_id) {
                    self.hub.broadcast(payload);
                } else {
                    debug!("Ignoring message from unknown player {}", client_id);
                }
            }
        }
    }

    fn add_player(&mut self, client: ClientHandle) {
        let client_id = client.id();
        if !client.is_open() {
            debug!("Player {} left before joining", client_id);
            return;
        }

        info!("Player {} joined at tick {}", client_id, self.tick);
        self.players.insert(
            client_id,
            Player {
                client,
                joined_tick: self.tick,
            },
        );
        self.update_gauge();

        // Registration with the hub completes before the game hears about a
        // player, so the welcome can be routed like any other message.
        match (Notice::Admitted { client_id }).encode() {
            Ok(welcome) => self.hub.send_to(client_id, welcome),
            Err(e) => warn!("Could not encode welcome for player {}: {}", client_id, e),
        }
    }

    fn remove_player(&mut self, client_id: ClientId) {
        if let Some(player) = self.players.remove(&client_id) {
            info!(
                "Player {} left after {} ticks",
                client_id,
                self.tick.saturating_sub(player.joined_tick)
            );
            self.update_gauge();
        }
    }

    fn on_tick(&mut self) {
        self.tick += 1;

        // Players whose connection went away without a disconnect command
        let before = self.players.len();
        self.players
            .retain(|_, player| player.client.is_open() && !player.client.is_disconnected());
        if self.players.len() != before {
            self.update_gauge();
        }

        if self.tick % self.tick_rate as u64 == 0 && !self.players.is_empty() {
            debug!("Tick {}: {} players", self.tick, self.players.len());
        }
    }

    fn update_gauge(&self) {
        self.player_gauge.store(self.players.len(), Ordering::Relaxed);
    }
}
