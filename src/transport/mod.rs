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

//! Transport abstraction used by the dialer.
//!
//! The dialer doesn't implement any transport itself, it only decides when and which address
//! is dialed and hands the actual connection establishment to a [`Transport`].

use crate::{types::ConnectionId, PeerId};

use indexmap::IndexMap;
use multiaddr::Multiaddr;

use std::{fmt::Debug, sync::Arc};

/// Connection endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Successful outbound connection.
    Dialer {
        /// Address that was dialed.
        address: Multiaddr,

        /// Connection ID.
        connection_id: ConnectionId,
    },

    /// Successful inbound connection.
    Listener {
        /// Local connection address.
        address: Multiaddr,

        /// Connection ID.
        connection_id: ConnectionId,
    },
}

impl Endpoint {
    /// Get `Multiaddr` of the [`Endpoint`].
    pub fn address(&self) -> &Multiaddr {
        match self {
            Self::Dialer { address, .. } => address,
            Self::Listener { address, .. } => address,
        }
    }

    /// Create dialer.
    pub fn dialer(address: Multiaddr, connection_id: ConnectionId) -> Self {
        Endpoint::Dialer {
            address,
            connection_id,
        }
    }

    /// Get `ConnectionId` of the `Endpoint`.
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Dialer { connection_id, .. } => *connection_id,
            Self::Listener { connection_id, .. } => *connection_id,
        }
    }
}

/// Established connection to a remote peer.
pub trait Connection: Debug + Send + Sync {
    /// Remote peer of the connection, as verified by the security handshake.
    fn peer(&self) -> PeerId;

    /// Connection endpoint.
    fn endpoint(&self) -> &Endpoint;

    /// Returns `true` if the connection is limited and unsuitable for general use,
    /// e.g., a relayed connection with a data cap.
    fn is_transient(&self) -> bool;

    /// Close the connection.
    fn close(&self);

    /// Get `ConnectionId` of the connection.
    fn connection_id(&self) -> ConnectionId {
        self.endpoint().connection_id()
    }

    /// Returns `true` if the connection doesn't go through a relay.
    fn is_direct(&self) -> bool {
        !crate::dialer::address::is_relay(self.endpoint().address())
    }
}

/// Transport capable of dialing a subset of addresses.
#[async_trait::async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Name of the transport.
    fn name(&self) -> &'static str;

    /// Returns `true` if the transport can dial `address`.
    fn can_dial(&self, address: &Multiaddr) -> bool;

    /// Returns `true` if the transport tunnels connections through another peer.
    fn is_proxy(&self) -> bool {
        false
    }

    /// Dial `peer` at `address`.
    ///
    /// The transport must verify that the remote end of the returned connection is `peer`.
    async fn dial(
        &self,
        connection_id: ConnectionId,
        peer: PeerId,
        address: Multiaddr,
    ) -> crate::Result<Box<dyn Connection>>;
}

/// Ordered set of enabled transports.
#[derive(Debug, Default, Clone)]
pub struct TransportSet {
    transports: IndexMap<&'static str, Arc<dyn Transport>>,
}

impl TransportSet {
    /// Create new empty [`TransportSet`].
    pub fn new() -> Self {
        Self {
            transports: IndexMap::new(),
        }
    }

    /// Insert `transport`, replacing a previously inserted transport with the same name.
    pub fn insert(&mut self, transport: Arc<dyn Transport>) {
        self.transports.insert(transport.name(), transport);
    }

    /// Get the first transport that can dial `address`.
    pub fn transport_for(&self, address: &Multiaddr) -> Option<Arc<dyn Transport>> {
        self.transports
            .values()
            .find(|transport| transport.can_dial(address))
            .cloned()
    }

    /// Returns `true` if any transport can dial `address`.
    pub fn can_dial(&self, address: &Multiaddr) -> bool {
        self.transports.values().any(|transport| transport.can_dial(address))
    }

    /// Returns `true` if the transport used for `address` is a proxy transport.
    pub fn is_proxy_address(&self, address: &Multiaddr) -> bool {
        self.transport_for(address).is_some_and(|transport| transport.is_proxy())
    }

    /// Number of enabled transports.
    pub fn len(&self) -> usize {
        self.transports.len()
    }

    /// Check if no transport is enabled.
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}
