//! Failures of a single connection attempt
//!
//! None of these affect other connections or the process.

use crate::admission::HandshakeState;
use crate::client::ClientId;
use crate::identity::ConnectionIdentity;
use shared::RejectReason;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The HTTP request could not be turned into a WebSocket
    #[error("websocket upgrade failed: {0}")]
    UpgradeFailure(String),

    /// Another live connection already holds this identity
    #[error("duplicate identity {identity} (held by client {holder})")]
    DuplicateIdentity {
        identity: ConnectionIdentity,
        holder: ClientId,
    },

    /// The hub did not confirm registration within the configured bound
    #[error("hub did not confirm registration of client {client_id} within {waited:?}")]
    RegistrationStall { client_id: ClientId, waited: Duration },

    /// The hub dropped the completion signal without confirming
    #[error("hub unavailable while registering client {client_id}")]
    HubUnavailable { client_id: ClientId },
}

impl AdmissionError {
    /// What the peer is told before its socket is closed
    ///
    /// Upgrade failures have no socket to tell.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            AdmissionError::UpgradeFailure(_) => None,
            AdmissionError::DuplicateIdentity { .. } => Some(RejectReason::DuplicateAddress),
            AdmissionError::RegistrationStall { .. } => Some(RejectReason::RegistrationTimeout),
            AdmissionError::HubUnavailable { .. } => Some(RejectReason::ServerUnavailable),
        }
    }

    /// Handshake state the attempt ended in
    pub fn failed_in(&self) -> HandshakeState {
        match self {
            AdmissionError::UpgradeFailure(_) => HandshakeState::Upgraded,
            AdmissionError::DuplicateIdentity { .. } => HandshakeState::Rejected,
            AdmissionError::RegistrationStall { .. } | AdmissionError::HubUnavailable { .. } => {
                HandshakeState::Registering
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_maps_to_rejected() {
        let err = AdmissionError::DuplicateIdentity {
            identity: ConnectionIdentity::from("10.0.0.5"),
            holder: 1,
        };

        assert_eq!(err.failed_in(), HandshakeState::Rejected);
        assert_eq!(err.reject_reason(), Some(RejectReason::DuplicateAddress));
        assert_eq!(err.to_string(), "duplicate identity 10.0.0.5 (held by client 1)");
    }

    #[test]
    fn test_stall_is_reported_with_bound() {
        let err = AdmissionError::RegistrationStall {
            client_id: 3,
            waited: Duration::from_millis(250),
        };

        assert_eq!(err.failed_in(), HandshakeState::Registering);
        assert_eq!(err.reject_reason(), Some(RejectReason::RegistrationTimeout));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_upgrade_failure_has_no_peer_notice() {
        let err = AdmissionError::UpgradeFailure("missing Sec-WebSocket-Key".to_string());
        assert_eq!(err.reject_reason(), None);
        assert_eq!(err.failed_in(), HandshakeState::Upgraded);
    }
}
