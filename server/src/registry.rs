//! Process-wide admission registry
//!
//! Maps each connection identity to the client currently holding it and
//! enforces at most one live connection per identity. The check and the
//! insert happen under a single lock, so two simultaneous connections from
//! one origin can never both be admitted.

use crate::client::{ClientHandle, ClientId};
use crate::identity::ConnectionIdentity;
use log::{debug, info};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Result of trying to claim an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitDecision {
    Admitted,
    /// The identity is already held by `holder`
    Duplicate { holder: ClientId },
}

/// Identity table shared by every admission task
pub struct AdmissionRegistry {
    entries: Mutex<HashMap<ConnectionIdentity, ClientHandle>>,
    /// When set, identities stay claimed after their connection closes
    retain_identities: bool,
}

impl AdmissionRegistry {
    pub fn new(retain_identities: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retain_identities,
        }
    }

    /// Claims `identity` for `client` unless someone already holds it
    pub async fn admit(&self, identity: ConnectionIdentity, client: &ClientHandle) -> AdmitDecision {
        let mut entries = self.entries.lock().await;
        match entries.entry(identity) {
            Entry::Occupied(existing) => AdmitDecision::Duplicate {
                holder: existing.get().id(),
            },
            Entry::Vacant(slot) => {
                info!("Client {} admitted as {}", client.id(), slot.key());
                slot.insert(client.clone());
                AdmitDecision::Admitted
            }
        }
    }

    /// Frees `identity` if it is still held by `client_id`
    ///
    /// A release from a connection that no longer owns the entry is a no-op,
    /// so a late cleanup can never evict a newer connection.
    pub async fn release(&self, identity: &ConnectionIdentity, client_id: ClientId) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(identity) {
            Some(holder) if holder.id() == client_id => {
                entries.remove(identity);
                debug!("Identity {} released by client {}", identity, client_id);
                true
            }
            _ => false,
        }
    }

    /// Release applied when a connection closes; honours `retain_identities`
    pub async fn release_on_disconnect(&self, identity: &ConnectionIdentity, client_id: ClientId) -> bool {
        if self.retain_identities {
            return false;
        }
        self.release(identity, client_id).await
    }

    pub async fn holder(&self, identity: &ConnectionIdentity) -> Option<ClientId> {
        self.entries.lock().await.get(identity).map(|c| c.id())
    }

    pub async fn contains(&self, identity: &ConnectionIdentity) -> bool {
        self.entries.lock().await.contains_key(identity)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub fn retains_identities(&self) -> bool {
        self.retain_identities
    }
}

impl Default for AdmissionRegistry {
    fn default() -> Self {
        Self::new(false)
    }
}
