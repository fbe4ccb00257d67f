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

//! [`Dialer`](`crate::dialer::Dialer`) configuration.

use crate::{
    dialer::{
        address::{AddressBook, MemoryAddressBook},
        backoff::BackoffConfig,
        black_hole::BlackHoleConfig,
        limits::DialGater,
        ranker::RankerConfig,
        resolver::{Resolver, MAX_RESOLUTION_STEPS},
    },
    executor::{DefaultExecutor, Executor},
    metrics::MetricsRegistry,
    transport::{Transport, TransportSet},
    PeerId,
};

use multiaddr::Multiaddr;

use std::{sync::Arc, time::Duration};

/// Timeout for dialing a single public address.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for dialing a single private or loopback address.
pub const DIAL_TIMEOUT_LOCAL: Duration = Duration::from_secs(5);

/// Timeout for the whole [`connect()`](`crate::dialer::Dialer::connect`) call.
pub const DIAL_PEER_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum number of raw dials in flight for a single peer.
pub const MAX_PARALLEL_DIALS_PER_PEER: usize = 8;

/// Maximum number of file-descriptor consuming dials in flight across all peers.
pub const MAX_FD_CONSUMING_DIALS: usize = 160;

/// Configuration builder for [`Dialer`](`crate::dialer::Dialer`).
pub struct ConfigBuilder {
    /// Local peer ID.
    local_peer_id: PeerId,

    /// Enabled transports, in order of preference.
    transports: TransportSet,

    /// Address book.
    address_book: Option<Arc<dyn AddressBook>>,

    /// Address resolver.
    resolver: Option<Arc<dyn Resolver>>,

    /// Dial policy.
    gater: Option<Arc<dyn DialGater>>,

    /// Metrics registry.
    metrics_registry: Option<MetricsRegistry>,

    /// Executor for running futures.
    executor: Option<Arc<dyn Executor>>,

    /// Known addresses.
    known_addresses: Vec<(PeerId, Vec<Multiaddr>)>,

    /// Local listen addresses.
    listen_addresses: Vec<Multiaddr>,

    /// Timeout for dialing a public address.
    dial_timeout: Duration,

    /// Timeout for dialing a private address.
    dial_timeout_local: Duration,

    /// Timeout for `connect()`.
    dial_peer_timeout: Duration,

    /// Backoff configuration.
    backoff: BackoffConfig,

    /// UDP black hole filter configuration, `None` if disabled.
    udp_black_hole: Option<BlackHoleConfig>,

    /// IPv6 black hole filter configuration, `None` if disabled.
    ipv6_black_hole: Option<BlackHoleConfig>,

    /// Ranker delays.
    ranker: RankerConfig,

    /// Maximum number of parallel dials per peer.
    max_parallel_dials_per_peer: usize,

    /// Maximum number of concurrent file-descriptor consuming dials.
    max_fd_consuming_dials: usize,

    /// Maximum number of address resolution steps.
    max_resolution_steps: usize,

    /// Whether IPv6 link-local addresses are filtered.
    filter_ipv6_link_local: bool,

    /// Whether dials abandoned by the worker are recorded as black hole failures.
    record_abandoned_dials: bool,
}

impl ConfigBuilder {
    /// Create new [`ConfigBuilder`] for the local peer `local_peer_id`.
    pub fn new(local_peer_id: PeerId) -> Self {
        Self {
            local_peer_id,
            transports: TransportSet::new(),
            address_book: None,
            resolver: None,
            gater: None,
            metrics_registry: None,
            executor: None,
            known_addresses: Vec::new(),
            listen_addresses: Vec::new(),
            dial_timeout: DIAL_TIMEOUT,
            dial_timeout_local: DIAL_TIMEOUT_LOCAL,
            dial_peer_timeout: DIAL_PEER_TIMEOUT,
            backoff: BackoffConfig::default(),
            udp_black_hole: Some(BlackHoleConfig::udp()),
            ipv6_black_hole: Some(BlackHoleConfig::ipv6()),
            ranker: RankerConfig::default(),
            max_parallel_dials_per_peer: MAX_PARALLEL_DIALS_PER_PEER,
            max_fd_consuming_dials: MAX_FD_CONSUMING_DIALS,
            max_resolution_steps: MAX_RESOLUTION_STEPS,
            filter_ipv6_link_local: true,
            record_abandoned_dials: true,
        }
    }

    /// Enable transport.
    ///
    /// Transports are consulted in the order they were added when picking a transport for an
    /// address.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(transport);
        self
    }

    /// Use `address_book` for looking up peer addresses.
    ///
    /// Defaults to an in-memory address book.
    pub fn with_address_book(mut self, address_book: Arc<dyn AddressBook>) -> Self {
        self.address_book = Some(address_book);
        self
    }

    /// Use `resolver` for expanding DNS addresses.
    ///
    /// Defaults to a DNS resolver using the system configuration.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Install dial policy.
    pub fn with_gater(mut self, gater: Arc<dyn DialGater>) -> Self {
        self.gater = Some(gater);
        self
    }

    /// Register dialer metrics in `registry`.
    pub fn with_metrics_registry(mut self, registry: MetricsRegistry) -> Self {
        self.metrics_registry = Some(registry);
        self
    }

    /// Add executor for running the dialer's background tasks.
    ///
    /// If no executor is specified, the dialer defaults to calling `tokio::spawn()`.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Add known address(es) for one or more peers.
    pub fn with_known_addresses(
        mut self,
        addresses: impl Iterator<Item = (PeerId, Vec<Multiaddr>)>,
    ) -> Self {
        self.known_addresses = addresses.collect();
        self
    }

    /// Set local listen addresses, they are never dialed.
    pub fn with_listen_addresses(mut self, addresses: Vec<Multiaddr>) -> Self {
        self.listen_addresses = addresses;
        self
    }

    /// Set timeouts for dialing a single public and private address.
    pub fn with_dial_timeouts(mut self, public: Duration, local: Duration) -> Self {
        self.dial_timeout = public;
        self.dial_timeout_local = local;
        self
    }

    /// Set timeout for a whole `connect()` call.
    pub fn with_dial_peer_timeout(mut self, timeout: Duration) -> Self {
        self.dial_peer_timeout = timeout;
        self
    }

    /// Set dial backoff timing.
    pub fn with_backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = config;
        self
    }

    /// Configure the UDP black hole filter, `None` disables it.
    pub fn with_udp_black_hole(mut self, config: Option<BlackHoleConfig>) -> Self {
        self.udp_black_hole = config;
        self
    }

    /// Configure the IPv6 black hole filter, `None` disables it.
    pub fn with_ipv6_black_hole(mut self, config: Option<BlackHoleConfig>) -> Self {
        self.ipv6_black_hole = config;
        self
    }

    /// Set dial ranking delays.
    pub fn with_ranker(mut self, config: RankerConfig) -> Self {
        self.ranker = config;
        self
    }

    /// How many addresses of a single peer may be dialed in parallel.
    pub fn with_max_parallel_dials_per_peer(mut self, max_parallel_dials: usize) -> Self {
        self.max_parallel_dials_per_peer = max_parallel_dials;
        self
    }

    /// How many file-descriptor consuming dials may be in flight across all peers.
    pub fn with_max_fd_consuming_dials(mut self, max_dials: usize) -> Self {
        self.max_fd_consuming_dials = max_dials;
        self
    }

    /// Maximum number of resolution steps taken when expanding the addresses of a peer.
    pub fn with_max_resolution_steps(mut self, steps: usize) -> Self {
        self.max_resolution_steps = steps;
        self
    }

    /// Whether IPv6 link-local addresses are dropped before dialing.
    pub fn with_ipv6_link_local_filtering(mut self, enabled: bool) -> Self {
        self.filter_ipv6_link_local = enabled;
        self
    }

    /// Whether dials still in flight when a worker exits are recorded as black hole failures.
    pub fn with_record_abandoned_dials(mut self, enabled: bool) -> Self {
        self.record_abandoned_dials = enabled;
        self
    }

    /// Build [`Config`].
    pub fn build(self) -> Config {
        let address_book = self.address_book.unwrap_or_else(|| Arc::new(MemoryAddressBook::new()));

        for (peer, addresses) in self.known_addresses {
            address_book.add_addresses(peer, addresses);
        }

        Config {
            local_peer_id: self.local_peer_id,
            transports: self.transports,
            address_book,
            resolver: self.resolver,
            gater: self.gater,
            metrics_registry: self.metrics_registry,
            executor: self.executor.unwrap_or_else(|| Arc::new(DefaultExecutor {})),
            listen_addresses: self.listen_addresses,
            dial_timeout: self.dial_timeout,
            dial_timeout_local: self.dial_timeout_local,
            dial_peer_timeout: self.dial_peer_timeout,
            backoff: self.backoff,
            udp_black_hole: self.udp_black_hole,
            ipv6_black_hole: self.ipv6_black_hole,
            ranker: self.ranker,
            max_parallel_dials_per_peer: self.max_parallel_dials_per_peer,
            max_fd_consuming_dials: self.max_fd_consuming_dials,
            max_resolution_steps: self.max_resolution_steps,
            filter_ipv6_link_local: self.filter_ipv6_link_local,
            record_abandoned_dials: self.record_abandoned_dials,
        }
    }
}

/// Configuration for [`Dialer`](`crate::dialer::Dialer`).
pub struct Config {
    /// Local peer ID.
    pub(crate) local_peer_id: PeerId,

    /// Enabled transports.
    pub(crate) transports: TransportSet,

    /// Address book.
    pub(crate) address_book: Arc<dyn AddressBook>,

    /// Address resolver, `None` if the DNS resolver should be used.
    pub(crate) resolver: Option<Arc<dyn Resolver>>,

    /// Dial policy.
    pub(crate) gater: Option<Arc<dyn DialGater>>,

    /// Metrics registry.
    pub(crate) metrics_registry: Option<MetricsRegistry>,

    /// Executor.
    pub(crate) executor: Arc<dyn Executor>,

    /// Local listen addresses.
    pub(crate) listen_addresses: Vec<Multiaddr>,

    /// Timeout for dialing a public address.
    pub(crate) dial_timeout: Duration,

    /// Timeout for dialing a private address.
    pub(crate) dial_timeout_local: Duration,

    /// Timeout for `connect()`.
    pub(crate) dial_peer_timeout: Duration,

    /// Backoff configuration.
    pub(crate) backoff: BackoffConfig,

    /// UDP black hole filter configuration.
    pub(crate) udp_black_hole: Option<BlackHoleConfig>,

    /// IPv6 black hole filter configuration.
    pub(crate) ipv6_black_hole: Option<BlackHoleConfig>,

    /// Ranker delays.
    pub(crate) ranker: RankerConfig,

    /// Maximum number of parallel dials per peer.
    pub(crate) max_parallel_dials_per_peer: usize,

    /// Maximum number of concurrent file-descriptor consuming dials.
    pub(crate) max_fd_consuming_dials: usize,

    /// Maximum number of address resolution steps.
    pub(crate) max_resolution_steps: usize,

    /// Whether IPv6 link-local addresses are filtered.
    pub(crate) filter_ipv6_link_local: bool,

    /// Whether abandoned dials are recorded as black hole failures.
    pub(crate) record_abandoned_dials: bool,
}

impl Config {
    /// Get local peer ID.
    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConfigBuilder::new(PeerId::random()).build();

        assert_eq!(config.dial_timeout, Duration::from_secs(15));
        assert_eq!(config.dial_timeout_local, Duration::from_secs(5));
        assert_eq!(config.dial_peer_timeout, Duration::from_secs(60));
        assert_eq!(config.backoff.base, Duration::from_secs(5));
        assert_eq!(config.backoff.max, Duration::from_secs(300));
        assert_eq!(config.udp_black_hole.as_ref().map(|config| config.n), Some(100));
        assert_eq!(
            config.ipv6_black_hole.as_ref().map(|config| config.min_successes),
            Some(5)
        );
        assert_eq!(config.ranker.relay_delay, Duration::from_millis(500));
        assert_eq!(config.max_parallel_dials_per_peer, 8);
        assert_eq!(config.max_fd_consuming_dials, 160);
        assert_eq!(config.max_resolution_steps, 32);
        assert!(config.filter_ipv6_link_local);
        assert!(config.record_abandoned_dials);
    }

    #[test]
    fn known_addresses_are_added_to_address_book() {
        let peer = PeerId::random();
        let address: Multiaddr = "/ip4/1.1.1.1/tcp/4001".parse().unwrap();

        let config = ConfigBuilder::new(PeerId::random())
            .with_known_addresses(vec![(peer, vec![address.clone()])].into_iter())
            .with_udp_black_hole(None)
            .build();

        assert_eq!(config.address_book.addresses(&peer), vec![address]);
        assert!(config.udp_black_hole.is_none());
    }
}
