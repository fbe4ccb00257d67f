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

//! Address filtering.
//!
//! Removes addresses that can't or shouldn't be dialed before they are ranked.

use crate::{
    dialer::{address, black_hole::BlackHoleDetector, limits::DialGater},
    transport::TransportSet,
    Error, PeerId,
};

use multiaddr::{Multiaddr, Protocol};
use parking_lot::RwLock;

use std::{
    collections::HashSet,
    net::IpAddr,
    sync::Arc,
};

/// Logging target for the file.
const LOG_TARGET: &str = "litep2p::dialer::filter";

/// Result of filtering the addresses of a peer.
#[derive(Debug, Default)]
pub struct FilteredAddresses {
    /// Addresses that may be dialed.
    pub addresses: Vec<Multiaddr>,

    /// Addresses that were refused, with the reason.
    pub refused: Vec<(Multiaddr, Error)>,
}

/// Address filter.
pub struct AddressFilter {
    /// Enabled transports.
    transports: TransportSet,

    /// Black hole detector.
    black_holes: Arc<BlackHoleDetector>,

    /// Dial policy.
    gater: Option<Arc<dyn DialGater>>,

    /// Local listen addresses, without `/p2p` suffix.
    listen_addresses: RwLock<HashSet<Multiaddr>>,

    /// Whether IPv6 link-local addresses are dropped.
    filter_ipv6_link_local: bool,
}

impl AddressFilter {
    /// Create new [`AddressFilter`].
    pub fn new(
        transports: TransportSet,
        black_holes: Arc<BlackHoleDetector>,
        gater: Option<Arc<dyn DialGater>>,
        listen_addresses: Vec<Multiaddr>,
        filter_ipv6_link_local: bool,
    ) -> Self {
        Self {
            transports,
            black_holes,
            gater,
            listen_addresses: RwLock::new(
                listen_addresses.into_iter().filter_map(listen_address_key).collect(),
            ),
            filter_ipv6_link_local,
        }
    }

    /// Register a local listen address so it is never dialed.
    pub fn add_listen_address(&self, address: Multiaddr) {
        if let Some(address) = listen_address_key(address) {
            self.listen_addresses.write().insert(address);
        }
    }

    /// Filter the resolved addresses of `peer`.
    ///
    /// `force_direct` drops addresses whose transport is a proxy.
    pub fn filter(
        &self,
        peer: &PeerId,
        addresses: Vec<Multiaddr>,
        force_direct: bool,
    ) -> FilteredAddresses {
        let mut refused = Vec::new();
        let mut seen = HashSet::with_capacity(addresses.len());

        // transport check must happen before low-priority filtering, otherwise a
        // `/quic` address could be dropped for a `/quic-v1` address we can't dial
        let addresses = addresses
            .into_iter()
            .filter(|address| seen.insert(address.clone()))
            .filter(|address| match self.transports.can_dial(address) {
                true => true,
                false => {
                    refused.push((address.clone(), Error::TransportNotSupported(address.clone())));
                    false
                }
            })
            .collect::<Vec<_>>();

        let addresses = filter_low_priority_addresses(addresses);

        let (addresses, black_holed) = self.black_holes.filter_addresses(addresses);
        refused.extend(black_holed.into_iter().map(|address| (address, Error::BlackHoled)));

        let listen_addresses = self.listen_addresses.read();
        let mut filtered = Vec::with_capacity(addresses.len());

        for address in addresses {
            if address::ip_addr(&address).is_some_and(|ip| ip.is_unspecified()) {
                continue;
            }

            if address::ip_addr(&address).is_some() &&
                listen_addresses.contains(&strip_peer_id(&address))
            {
                refused.push((address, Error::TriedToDialSelf));
                continue;
            }

            if self.filter_ipv6_link_local && address::is_ip6_link_local(&address) {
                continue;
            }

            if let Some(gater) = &self.gater {
                if !gater.allow_address_dial(peer, &address) {
                    refused.push((address, Error::GaterDisallowedConnection(*peer)));
                    continue;
                }
            }

            if force_direct && self.transports.is_proxy_address(&address) {
                continue;
            }

            filtered.push(address);
        }
        drop(listen_addresses);

        if !refused.is_empty() {
            tracing::trace!(
                target: LOG_TARGET,
                ?peer,
                ?refused,
                "addresses refused",
            );
        }

        FilteredAddresses {
            addresses: filtered,
            refused,
        }
    }
}

/// Drop `address` trailing `/p2p` component.
fn strip_peer_id(address: &Multiaddr) -> Multiaddr {
    let mut address = address.clone();

    if std::matches!(address.iter().last(), Some(Protocol::P2p(_))) {
        address.pop();
    }

    address
}

/// Listen addresses are only compared if they start with an IP address.
fn listen_address_key(address: Multiaddr) -> Option<Multiaddr> {
    address::ip_addr(&address).map(|_| strip_peer_id(&address))
}

/// Drop addresses for which a better variant on the same `ip:port` exists.
///
/// QUIC draft-29 addresses are dropped if a QUIC v1 address shares their UDP socket, WebSocket
/// addresses are dropped if a plain TCP address shares their TCP socket.
pub fn filter_low_priority_addresses(addresses: Vec<Multiaddr>) -> Vec<Multiaddr> {
    let mut quic_v1 = HashSet::<(IpAddr, u16)>::new();
    let mut tcp = HashSet::<(IpAddr, u16)>::new();

    for address in &addresses {
        let Some(key) = address::socket_key(address) else {
            continue;
        };

        if address::is_websocket(address) {
            continue;
        }

        if address::is_quic_v1(address) {
            quic_v1.insert(key);
        } else if address::is_tcp(address) && !address::is_relay(address) {
            tcp.insert(key);
        }
    }

    addresses
        .into_iter()
        .filter(|address| {
            let Some(key) = address::socket_key(address) else {
                return true;
            };

            if address::is_quic_draft29(address) {
                return !quic_v1.contains(&key);
            }

            if address::is_websocket(address) {
                return !tcp.contains(&key);
            }

            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dialer::black_hole::{BlackHoleConfig, BlackHoleFilter},
        mock::{gater::MockDialGater, transport::MockTransport},
    };

    fn addr(address: &str) -> Multiaddr {
        address.parse().unwrap()
    }

    fn transports() -> TransportSet {
        let mut transports = TransportSet::new();
        transports.insert(Arc::new(MockTransport::new("tcp")));
        transports.insert(Arc::new(MockTransport::new("quic")));
        transports.insert(Arc::new(MockTransport::relay()));
        transports
    }

    fn filter(gater: Option<Arc<dyn DialGater>>) -> AddressFilter {
        AddressFilter::new(
            transports(),
            Arc::new(BlackHoleDetector::default()),
            gater,
            vec![addr("/ip4/192.168.1.2/tcp/30333")],
            true,
        )
    }

    #[test]
    fn low_priority_addresses() {
        let addresses = vec![
            addr("/ip4/1.2.3.4/udp/1/quic-v1"),
            addr("/ip4/1.2.3.4/udp/1/quic"),
            addr("/ip4/1.2.3.4/udp/2/quic"),
            addr("/ip4/1.2.3.4/tcp/1"),
            addr("/ip4/1.2.3.4/tcp/1/ws"),
            addr("/ip4/1.2.3.4/tcp/2/wss"),
        ];

        assert_eq!(
            filter_low_priority_addresses(addresses),
            vec![
                addr("/ip4/1.2.3.4/udp/1/quic-v1"),
                addr("/ip4/1.2.3.4/udp/2/quic"),
                addr("/ip4/1.2.3.4/tcp/1"),
                addr("/ip4/1.2.3.4/tcp/2/wss"),
            ]
        );
    }

    #[test]
    fn unsupported_duplicate_and_unspecified_addresses_are_removed() {
        let filter = filter(None);
        let peer = PeerId::random();

        let filtered = filter.filter(
            &peer,
            vec![
                addr("/ip4/1.2.3.4/tcp/1"),
                addr("/ip4/1.2.3.4/tcp/1"),
                addr("/ip4/1.2.3.4/udp/1"),
                addr("/ip4/0.0.0.0/tcp/1"),
            ],
            false,
        );

        assert_eq!(filtered.addresses, vec![addr("/ip4/1.2.3.4/tcp/1")]);
        assert_eq!(filtered.refused.len(), 1);
        assert!(std::matches!(
            filtered.refused[0].1,
            Error::TransportNotSupported(_)
        ));
    }

    #[test]
    fn own_and_link_local_addresses_are_removed() {
        let filter = filter(None);
        let peer = PeerId::random();
        filter.add_listen_address(addr("/ip6/2604:1380::9/udp/30333/quic-v1"));

        let filtered = filter.filter(
            &peer,
            vec![
                addr("/ip4/192.168.1.2/tcp/30333"),
                addr("/ip4/192.168.1.2/tcp/30333/p2p/12D3KooWGC6TvWhfapngX6wvJHMYvKpDMXPb3ZnCZ6dMoaMtimQ5"),
                addr("/ip6/2604:1380::9/udp/30333/quic-v1"),
                addr("/ip6/fe80::1/tcp/1"),
                addr("/ip4/192.168.1.3/tcp/30333"),
            ],
            false,
        );

        assert_eq!(filtered.addresses, vec![addr("/ip4/192.168.1.3/tcp/30333")]);
        assert_eq!(
            filtered
                .refused
                .iter()
                .filter(|(_, error)| std::matches!(error, Error::TriedToDialSelf))
                .count(),
            3
        );
    }

    #[test]
    fn link_local_filtering_can_be_disabled() {
        let filter = AddressFilter::new(
            transports(),
            Arc::new(BlackHoleDetector::default()),
            None,
            Vec::new(),
            false,
        );

        let filtered = filter.filter(&PeerId::random(), vec![addr("/ip6/fe80::1/tcp/1")], false);
        assert_eq!(filtered.addresses, vec![addr("/ip6/fe80::1/tcp/1")]);
    }

    #[test]
    fn gater_refuses_address() {
        let blocked = addr("/ip4/1.2.3.4/tcp/1");
        let allowed = addr("/ip4/1.2.3.5/tcp/1");

        let mut gater = MockDialGater::new();
        let expected = blocked.clone();
        gater
            .expect_allow_address_dial()
            .times(2)
            .returning(move |_, address| address != &expected);

        let filter = filter(Some(Arc::new(gater)));
        let peer = PeerId::random();
        let filtered = filter.filter(&peer, vec![blocked.clone(), allowed.clone()], false);

        assert_eq!(filtered.addresses, vec![allowed]);
        assert!(std::matches!(
            filtered.refused.as_slice(),
            [(address, Error::GaterDisallowedConnection(refused_peer))]
                if address == &blocked && refused_peer == &peer
        ));
    }

    #[test]
    fn force_direct_drops_proxy_addresses() {
        let filter = filter(None);
        let relay = addr(
            "/ip4/1.2.3.4/tcp/1/p2p/12D3KooWGC6TvWhfapngX6wvJHMYvKpDMXPb3ZnCZ6dMoaMtimQ5/p2p-circuit",
        );
        let direct = addr("/ip4/1.2.3.5/tcp/1");

        let filtered = filter.filter(&PeerId::random(), vec![relay.clone(), direct.clone()], false);
        assert_eq!(filtered.addresses, vec![relay.clone(), direct.clone()]);

        let filtered = filter.filter(&PeerId::random(), vec![relay, direct.clone()], true);
        assert_eq!(filtered.addresses, vec![direct]);
    }

    #[test]
    fn black_holed_addresses_are_refused() {
        let detector = Arc::new(BlackHoleDetector::new(
            Some(BlackHoleFilter::new(
                BlackHoleConfig {
                    name: "UDP",
                    n: 2,
                    min_successes: 1,
                },
                None,
            )),
            None,
        ));
        let quic = addr("/ip4/1.2.3.4/udp/1/quic-v1");
        let tcp = addr("/ip4/1.2.3.4/tcp/1");

        detector.record_result(&quic, false);
        detector.record_result(&quic, false);

        let filter = AddressFilter::new(transports(), detector, None, Vec::new(), true);
        let filtered = filter.filter(&PeerId::random(), vec![quic.clone(), tcp.clone()], false);

        assert_eq!(filtered.addresses, vec![tcp]);
        assert!(std::matches!(
            filtered.refused.as_slice(),
            [(address, Error::BlackHoled)] if address == &quic
        ));
    }
}
