//! Caller identity derived from the network origin of a connection
//!
//! The identity is the host portion of the reported `host:port` origin. It is
//! only a deduplication key: it is not verified and several players behind one
//! NAT or proxy share it.

use log::warn;
use std::fmt;

/// Deduplication key for inbound connections
///
/// Malformed origins all map to the empty identity, so they collide with one
/// another in the admission registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionIdentity(String);

impl ConnectionIdentity {
    /// Derives the identity from an origin string such as `10.0.0.5:4242`
    ///
    /// The origin is split on every `:`. Exactly two parts yield the host;
    /// anything else (no colon, bare or bracketed IPv6) yields the empty
    /// identity.
    pub fn from_origin(origin: &str) -> Self {
        let parts: Vec<&str> = origin.split(':').collect();
        if parts.len() == 2 {
            Self(parts[0].to_string())
        } else {
            warn!(
                "Origin {:?} is not host:port, falling back to empty identity",
                origin
            );
            Self(String::new())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for ConnectionIdentity {
    fn from(host: &str) -> Self {
        Self(host.to_string())
    }
}
