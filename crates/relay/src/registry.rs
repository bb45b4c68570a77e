use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use chrono::{DateTime, Local};
use tracing::*;

pub type ClientId = u64;

#[derive(Clone, Debug)]
pub struct ClientInfo {
    pub address: Option<SocketAddr>,
    pub connected_at: DateTime<Local>,
}

/// Bookkeeping for connected clients. Sessions do not go through the
/// registry to receive frames, so it is only locked on connect and
/// disconnect.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    clients: Mutex<HashMap<ClientId, ClientInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, ClientInfo>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a client. It stays registered until the returned handle is
    /// dropped.
    pub fn register(self: &Arc<Self>, address: Option<SocketAddr>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        self.clients().insert(
            id,
            ClientInfo {
                address,
                connected_at: Local::now(),
            },
        );

        Registration {
            id,
            registry: self.clone(),
        }
    }

    fn remove(&self, id: ClientId) -> Option<ClientInfo> {
        self.clients().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.clients().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// A live entry in the [`SessionRegistry`].
#[derive(Debug)]
pub struct Registration {
    id: ClientId,
    registry: Arc<SessionRegistry>,
}

impl Registration {
    pub fn id(&self) -> ClientId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(info) = self.registry.remove(self.id) {
            let connected_for = Local::now() - info.connected_at;
            debug!(
                "client {} at {:?} deregistered after {}s",
                self.id,
                info.address,
                connected_for.num_seconds()
            );
        }
    }
}
