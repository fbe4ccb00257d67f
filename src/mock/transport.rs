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

//! Scripted transport and connection.

use crate::{
    dialer::address,
    transport::{Connection, Endpoint, Transport},
    types::ConnectionId,
    Error, PeerId,
};

use multiaddr::Multiaddr;
use parking_lot::Mutex;
use tokio::time::Instant;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Connection handed out by [`MockTransport`].
#[derive(Debug)]
pub struct MockConnection {
    peer: PeerId,
    endpoint: Endpoint,
    transient: bool,
    closed: Arc<AtomicBool>,
}

impl MockConnection {
    pub fn new(peer: PeerId, address: Multiaddr, connection_id: impl Into<ConnectionId>) -> Self {
        Self {
            peer,
            endpoint: Endpoint::dialer(address, connection_id.into()),
            transient: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn transient(
        peer: PeerId,
        address: Multiaddr,
        connection_id: impl Into<ConnectionId>,
    ) -> Self {
        Self {
            transient: true,
            ..Self::new(peer, address, connection_id)
        }
    }

    /// Flag that is set once the connection is closed.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

impl Connection for MockConnection {
    fn peer(&self) -> PeerId {
        self.peer
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_transient(&self) -> bool {
        self.transient
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Outcome of a scripted dial.
#[derive(Debug, Clone)]
pub enum DialOutcome {
    /// Connect to the dialed peer.
    Connect,

    /// Connect to the dialed peer over a transient connection.
    ConnectTransient,

    /// Connect to some other peer.
    ConnectAs(PeerId),

    /// Fail with the error.
    Fail(Error),

    /// Never finish.
    Hang,
}

/// Transport whose dials finish after a scripted delay with a scripted outcome.
///
/// Addresses without a script connect immediately.
#[derive(Debug)]
pub struct MockTransport {
    name: &'static str,
    proxy: bool,
    scripts: Mutex<HashMap<Multiaddr, (Duration, DialOutcome)>>,
    dials: Mutex<Vec<(Multiaddr, Instant)>>,
    connections: Mutex<Vec<Arc<AtomicBool>>>,
}

impl MockTransport {
    /// Create new [`MockTransport`].
    ///
    /// `tcp` dials direct TCP addresses and `quic` direct QUIC addresses.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            proxy: false,
            scripts: Mutex::new(HashMap::new()),
            dials: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Create a proxy transport that dials relayed addresses.
    pub fn relay() -> Self {
        Self {
            proxy: true,
            ..Self::new("relay")
        }
    }

    /// Script the dial of `address`.
    pub fn script(&self, address: Multiaddr, delay: Duration, outcome: DialOutcome) {
        self.scripts.lock().insert(address, (delay, outcome));
    }

    /// Dialed addresses, in dial order.
    pub fn dials(&self) -> Vec<Multiaddr> {
        self.dials.lock().iter().map(|(address, _)| address.clone()).collect()
    }

    /// Dialed addresses and the instants they were dialed at.
    pub fn dial_times(&self) -> Vec<(Multiaddr, Instant)> {
        self.dials.lock().clone()
    }

    /// Number of connections this transport established that were later closed.
    pub fn closed_connections(&self) -> usize {
        self.connections.lock().iter().filter(|closed| closed.load(Ordering::SeqCst)).count()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_dial(&self, address: &Multiaddr) -> bool {
        match self.name {
            "tcp" => address::is_tcp(address) && !address::is_relay(address),
            "quic" => address::is_quic(address) && !address::is_relay(address),
            "relay" => address::is_relay(address),
            _ => false,
        }
    }

    fn is_proxy(&self) -> bool {
        self.proxy
    }

    async fn dial(
        &self,
        connection_id: ConnectionId,
        peer: PeerId,
        address: Multiaddr,
    ) -> crate::Result<Box<dyn Connection>> {
        self.dials.lock().push((address.clone(), Instant::now()));

        let (delay, outcome) = self
            .scripts
            .lock()
            .get(&address)
            .cloned()
            .unwrap_or((Duration::ZERO, DialOutcome::Connect));

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let connection = match outcome {
            DialOutcome::Connect => MockConnection::new(peer, address, connection_id),
            DialOutcome::ConnectTransient =>
                MockConnection::transient(peer, address, connection_id),
            DialOutcome::ConnectAs(other) => MockConnection::new(other, address, connection_id),
            DialOutcome::Fail(error) => return Err(error),
            DialOutcome::Hang => futures::future::pending().await,
        };
        self.connections.lock().push(connection.closed_flag());

        Ok(Box::new(connection))
    }
}
