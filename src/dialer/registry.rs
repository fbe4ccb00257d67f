// Copyright 2024 litep2p developers
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Registry of established connections.

use crate::{transport::Connection, types::ConnectionId, Error, PeerId};

use parking_lot::RwLock;

use std::{collections::HashMap, sync::Arc};

/// Logging target for the file.
const LOG_TARGET: &str = "litep2p::dialer::registry";

/// Bookkeeping of established connections.
///
/// The registry is the single source of truth for whether a usable connection to a peer
/// exists. Adding a connection must be atomic with respect to [`Self::best_connection`].
pub trait ConnectionRegistry: Send + Sync {
    /// Register a freshly dialed connection.
    ///
    /// On error, the connection is closed and not registered.
    fn add_connection(&self, connection: Box<dyn Connection>) -> crate::Result<Arc<dyn Connection>>;

    /// Get the best connection to `peer`, if any.
    ///
    /// Connections that aren't transient are preferred over transient ones.
    fn best_connection(&self, peer: &PeerId) -> Option<Arc<dyn Connection>>;
}

/// In-memory [`ConnectionRegistry`].
#[derive(Debug, Default)]
pub struct MemoryConnectionRegistry {
    /// Registered connections.
    connections: RwLock<HashMap<PeerId, Vec<Arc<dyn Connection>>>>,

    /// Whether the registry accepts new connections.
    closed: RwLock<bool>,
}

impl MemoryConnectionRegistry {
    /// Create new [`MemoryConnectionRegistry`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove connection `connection_id` of `peer`.
    pub fn remove_connection(&self, peer: &PeerId, connection_id: ConnectionId) {
        let mut connections = self.connections.write();

        if let Some(peer_connections) = connections.get_mut(peer) {
            peer_connections.retain(|connection| connection.connection_id() != connection_id);

            if peer_connections.is_empty() {
                connections.remove(peer);
            }
        }
    }

    /// Get all connections of `peer`.
    pub fn connections(&self, peer: &PeerId) -> Vec<Arc<dyn Connection>> {
        self.connections.read().get(peer).cloned().unwrap_or_default()
    }

    /// Refuse all new connections and close the registered ones.
    pub fn close(&self) {
        *self.closed.write() = true;

        for (_, connections) in self.connections.write().drain() {
            for connection in connections {
                connection.close();
            }
        }
    }
}

impl ConnectionRegistry for MemoryConnectionRegistry {
    fn add_connection(
        &self,
        connection: Box<dyn Connection>,
    ) -> crate::Result<Arc<dyn Connection>> {
        let closed = self.closed.read();

        if *closed {
            tracing::debug!(
                target: LOG_TARGET,
                peer = ?connection.peer(),
                connection_id = ?connection.connection_id(),
                "registry closed, refusing connection",
            );
            connection.close();
            return Err(Error::DialerClosed);
        }

        let connection: Arc<dyn Connection> = Arc::from(connection);
        self.connections
            .write()
            .entry(connection.peer())
            .or_default()
            .push(connection.clone());

        tracing::trace!(
            target: LOG_TARGET,
            peer = ?connection.peer(),
            endpoint = ?connection.endpoint(),
            "connection registered",
        );

        Ok(connection)
    }

    fn best_connection(&self, peer: &PeerId) -> Option<Arc<dyn Connection>> {
        let connections = self.connections.read();
        let peer_connections = connections.get(peer)?;

        peer_connections
            .iter()
            .rev()
            .find(|connection| !connection.is_transient())
            .or_else(|| peer_connections.last())
            .cloned()
    }
}
