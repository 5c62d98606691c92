//! Connection registry — remote address to cancellation handle.
//!
//! Backed by a sharded `DashMap`, so the accept loop, every connection task
//! and any number of `close_remote` callers can insert and remove entries
//! without further locking. Each entry carries the id of the connection that
//! registered it, so a connection tearing itself down never removes an entry
//! that has since been claimed by a newer connection from the same address.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifies one accepted connection for the lifetime of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct Entry {
    id: ConnectionId,
    token: CancellationToken,
}

/// Concurrent map of live connections keyed by remote address string.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<DashMap<String, Entry>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's cancellation handle.
    ///
    /// An address maps to at most one live handle, so a stale entry under the
    /// same address is cancelled and replaced.
    pub(crate) fn register(&self, remote: String, token: CancellationToken) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Some(stale) = self.entries.insert(remote.clone(), Entry { id, token }) {
            debug!(remote = %remote, "replacing stale registry entry");
            stale.token.cancel();
        }
        id
    }

    /// Remove the entry for `remote` and cancel its scope.
    ///
    /// Returns `false` if no connection is registered under that address.
    pub fn cancel(&self, remote: &str) -> bool {
        match self.entries.remove(remote) {
            Some((_, entry)) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `remote` if it still belongs to connection `id`.
    pub(crate) fn release(&self, remote: &str, id: ConnectionId) {
        self.entries.remove_if(remote, |_, entry| entry.id == id);
    }

    /// Snapshot of registered remote addresses, in no particular order.
    pub fn remote_addrs(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn contains(&self, remote: &str) -> bool {
        self.entries.contains_key(remote)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
