//! # Game Server Gateway
//!
//! Connection admission front door for the multiplayer game server. Clients
//! open a WebSocket on [`shared::GAME_PATH`]; the gateway decides whether the
//! connection is admitted, registers it with the hub and only then hands the
//! player to the game simulation.
//!
//! ## Admission
//!
//! Each connection is identified by the host part of its remote address.
//! At most one live connection per identity is admitted; later ones receive
//! a [`shared::Notice::Rejected`] notice and a policy-violation close frame.
//! Identities are released when their connection closes, unless the server
//! runs with identity retention enabled.
//!
//! ## Ordering
//!
//! The handshake blocks on the hub's completion signal before notifying the
//! game, so the game never sends to a connection the hub cannot route to.
//! The wait is bounded by [`GatewayConfig::register_timeout`]. Notifying the
//! game is a plain channel send and never waits on the tick loop.
//!
//! ## Module Organization
//!
//! - `identity`: origin string to deduplication key
//! - `registry`: identity table with atomic check-then-insert
//! - `admission`: the handshake state machine and its collaborator traits
//! - `client`: shared client handle and the per-connection socket pumps
//! - `hub`: routing table task
//! - `game`: simulation task
//! - `network`: axum router, upgrade handler and server loop
//! - `profiling`: optional CPU sampler and heap profiler
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::GatewayConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig {
//!         addr: "127.0.0.1:8080".to_string(),
//!         ..GatewayConfig::default()
//!     };
//!     server::network::run(config).await
//! }
//! ```

pub mod admission;
pub mod client;
pub mod config;
pub mod error;
pub mod game;
pub mod hub;
pub mod identity;
pub mod network;
pub mod profiling;
pub mod registry;

pub use admission::{Admitted, Gatekeeper, HandshakeState, PlayerSink, Registrar};
pub use config::GatewayConfig;
pub use error::AdmissionError;
pub use identity::ConnectionIdentity;
pub use registry::{AdmissionRegistry, AdmitDecision};
