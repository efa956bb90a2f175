use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the HTTP listener binds to
    pub addr: String,
    /// Directory served on every path except the game endpoint
    pub static_dir: Option<PathBuf>,
    /// Upper bound on waiting for the hub to confirm a registration
    pub register_timeout: Duration,
    /// Keep identities claimed after their connection closes
    pub retain_identities: bool,
    /// Game ticks per second
    pub tick_rate: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            static_dir: None,
            register_timeout: Duration::from_millis(5000),
            retain_identities: false,
            tick_rate: 30,
        }
    }
}
