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

//! Fake transport shared by the integration tests.

use litep2p_dialer::{
    config::ConfigBuilder,
    dialer::address,
    transport::{Connection, Endpoint, Transport},
    ConnectionId, Dialer, Error, MemoryConnectionRegistry, PeerId,
};

use multiaddr::Multiaddr;
use parking_lot::Mutex;
use tokio::time::Instant;

use std::{collections::HashMap, sync::Arc, time::Duration};

pub fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Debug)]
pub struct TestConnection {
    peer: PeerId,
    endpoint: Endpoint,
}

impl Connection for TestConnection {
    fn peer(&self) -> PeerId {
        self.peer
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_transient(&self) -> bool {
        false
    }

    fn close(&self) {}
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Connect,
    Fail,
    Hang,
}

/// Transport dialing either QUIC or TCP addresses with scripted results.
#[derive(Debug)]
pub struct TestTransport {
    name: &'static str,
    scripts: Mutex<HashMap<Multiaddr, (Duration, Outcome)>>,
    dials: Mutex<Vec<(Multiaddr, Instant)>>,
}

impl TestTransport {
    pub fn quic() -> Arc<Self> {
        Arc::new(Self::new("quic"))
    }

    pub fn tcp() -> Arc<Self> {
        Arc::new(Self::new("tcp"))
    }

    fn new(name: &'static str) -> Self {
        Self {
            name,
            scripts: Mutex::new(HashMap::new()),
            dials: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, address: &Multiaddr, delay: Duration, outcome: Outcome) {
        self.scripts.lock().insert(address.clone(), (delay, outcome));
    }

    pub fn dials(&self) -> Vec<(Multiaddr, Instant)> {
        self.dials.lock().clone()
    }

    pub fn dial_count(&self, address: &Multiaddr) -> usize {
        self.dials.lock().iter().filter(|(dialed, _)| dialed == address).count()
    }
}

#[async_trait::async_trait]
impl Transport for TestTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_dial(&self, address: &Multiaddr) -> bool {
        match self.name {
            "quic" => address::is_quic(address),
            _ => address::is_tcp(address),
        }
    }

    async fn dial(
        &self,
        connection_id: ConnectionId,
        peer: PeerId,
        address: Multiaddr,
    ) -> litep2p_dialer::Result<Box<dyn Connection>> {
        self.dials.lock().push((address.clone(), Instant::now()));

        let (delay, outcome) = self
            .scripts
            .lock()
            .get(&address)
            .cloned()
            .unwrap_or((Duration::ZERO, Outcome::Connect));
        tokio::time::sleep(delay).await;

        match outcome {
            Outcome::Connect => Ok(Box::new(TestConnection {
                peer,
                endpoint: Endpoint::dialer(address, connection_id),
            })),
            Outcome::Fail => Err(Error::IoError(std::io::ErrorKind::ConnectionRefused)),
            Outcome::Hang => futures::future::pending().await,
        }
    }
}

/// Create a dialer using `quic` and `tcp`.
pub fn dialer(
    quic: &Arc<TestTransport>,
    tcp: &Arc<TestTransport>,
    configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder,
) -> Dialer {
    init_logger();

    let config = configure(
        ConfigBuilder::new(PeerId::random())
            .with_transport(quic.clone())
            .with_transport(tcp.clone()),
    )
    .build();

    Dialer::new(config, Arc::new(MemoryConnectionRegistry::new())).unwrap()
}
