use serde::{Deserialize, Serialize};

/// Path of the WebSocket endpoint every game client connects to.
pub const GAME_PATH: &str = "/game/";

/// Close code sent when a connection is refused by admission policy (RFC 6455 1008).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code sent when the server could not finish registering a connection (RFC 6455 1011).
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Why the server refused a connection.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Another live connection already holds this origin's identity.
    DuplicateAddress,
    /// The connection registry did not confirm registration in time.
    RegistrationTimeout,
    /// The connection registry is gone.
    ServerUnavailable,
}

impl RejectReason {
    pub fn close_code(&self) -> u16 {
        match self {
            RejectReason::DuplicateAddress => CLOSE_POLICY_VIOLATION,
            RejectReason::RegistrationTimeout | RejectReason::ServerUnavailable => {
                CLOSE_INTERNAL_ERROR
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RejectReason::DuplicateAddress => "Duplicated Address",
            RejectReason::RegistrationTimeout => "Registration timed out",
            RejectReason::ServerUnavailable => "Server unavailable",
        }
    }
}

/// Admission notices the server sends before any game traffic.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Notice {
    Admitted { client_id: u32 },
    Rejected { reason: RejectReason },
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode notice: {0}")]
    Encode(bincode::Error),
    #[error("failed to decode notice: {0}")]
    Decode(bincode::Error),
}

impl Notice {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(CodecError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(bytes).map_err(CodecError::Decode)
    }
}
