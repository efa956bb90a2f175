//! HTTP front door: WebSocket upgrades on the game path, static assets elsewhere

use crate::admission::Gatekeeper;
use crate::client::{self, outbound_channel};
use crate::config::GatewayConfig;
use crate::error::AdmissionError;
use crate::game::{Game, GameHandle};
use crate::hub::{Hub, HubHandle};
use crate::registry::AdmissionRegistry;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocket;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use log::{error, info, warn};
use shared::GAME_PATH;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

/// Process-wide singletons shared by every connection task
pub struct Gateway {
    gatekeeper: Gatekeeper<HubHandle, GameHandle>,
    hub: HubHandle,
    game: GameHandle,
}

impl Gateway {
    /// Creates the registry and starts the hub and game tasks
    pub fn spawn(config: &GatewayConfig) -> Arc<Self> {
        let (hub, hub_handle) = Hub::new();
        let (game, game_handle) = Game::new(hub_handle.clone(), config.tick_rate);
        tokio::spawn(hub.run());
        tokio::spawn(game.run());

        Self::new(config, hub_handle, game_handle)
    }

    /// Wires a gateway to hub and game tasks that are run elsewhere
    pub fn new(config: &GatewayConfig, hub: HubHandle, game: GameHandle) -> Arc<Self> {
        let registry = Arc::new(AdmissionRegistry::new(config.retain_identities));
        let gatekeeper = Gatekeeper::new(registry, hub.clone(), game.clone(), config.register_timeout);

        Arc::new(Self {
            gatekeeper,
            hub,
            game,
        })
    }

    pub fn registry(&self) -> &AdmissionRegistry {
        self.gatekeeper.registry()
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn game(&self) -> &GameHandle {
        &self.game
    }
}

/// Builds the router (shared between the binary and tests)
///
/// The game path and everything below it upgrade to WebSocket.
pub fn build_router(gateway: Arc<Gateway>, static_dir: Option<PathBuf>) -> Router {
    let router = Router::new()
        .route(GAME_PATH, get(ws_upgrade_handler))
        .route(&format!("{}{{*rest}}", GAME_PATH), get(ws_upgrade_handler))
        .with_state(gateway);

    match static_dir {
        Some(dir) => {
            info!("Serving static files from {}", dir.display());
            router.fallback_service(ServeDir::new(dir))
        }
        None => router,
    }
}

/// Serves `router` on `listener` until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

/// Binds the configured address and runs the gateway until Ctrl+C
pub async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = Gateway::spawn(&config);
    let router = build_router(gateway, config.static_dir.clone());

    let listener = TcpListener::bind(&config.addr).await?;
    info!("Listening to {}", listener.local_addr()?);

    serve(listener, router, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down gracefully...");
    })
    .await?;

    info!("Stop listening to {}", config.addr);
    Ok(())
}

async fn ws_upgrade_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(gateway): State<Arc<Gateway>>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            warn!("{} from {}", AdmissionError::UpgradeFailure(rejection.to_string()), addr);
            return rejection.into_response();
        }
    };

    upgrade
        .on_failed_upgrade(move |e: axum::Error| {
            error!("{} from {}", AdmissionError::UpgradeFailure(e.to_string()), addr);
        })
        .on_upgrade(move |socket| handle_connection(socket, addr, gateway))
}

/// Runs the admission handshake for one upgraded socket, then serves it
async fn handle_connection(socket: WebSocket, addr: SocketAddr, gateway: Arc<Gateway>) {
    let origin = addr.to_string();
    let (sink, stream) = socket.split();
    let (outbound_tx, outbound_rx) = outbound_channel();

    match gateway.gatekeeper.admit(&origin, outbound_tx).await {
        Ok(admitted) => {
            client::serve(
                admitted.client,
                sink,
                stream,
                outbound_rx,
                &gateway.hub,
                &gateway.game,
                gateway.registry(),
            )
            .await;
        }
        Err(e) => {
            match &e {
                AdmissionError::DuplicateIdentity { .. } => info!("Rejected {}: {}", origin, e),
                AdmissionError::RegistrationStall { .. } => warn!("Rejected {}: {}", origin, e),
                _ => error!("Rejected {}: {}", origin, e),
            }
            if let Some(reason) = e.reject_reason() {
                client::reject(sink, reason).await;
            }
        }
    }
}
