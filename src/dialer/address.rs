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

//! Address classification and the address book consulted by the dialer.

use crate::PeerId;

use indexmap::IndexSet;
use multiaddr::{Multiaddr, Protocol};
use parking_lot::RwLock;

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

/// Maximum number of addresses tracked for a peer.
const MAX_ADDRESSES: usize = 32;

/// Get the IP address of `address`, if it starts with one.
pub fn ip_addr(address: &Multiaddr) -> Option<IpAddr> {
    match address.iter().next() {
        Some(Protocol::Ip4(ip)) => Some(IpAddr::V4(ip)),
        Some(Protocol::Ip6(ip)) => Some(IpAddr::V6(ip)),
        _ => None,
    }
}

/// Returns `true` if `address` is relayed through another peer.
pub fn is_relay(address: &Multiaddr) -> bool {
    address.iter().any(|protocol| std::matches!(protocol, Protocol::P2pCircuit))
}

/// Returns `true` if `address` starts with an IPv4 address.
pub fn is_ip4(address: &Multiaddr) -> bool {
    std::matches!(address.iter().next(), Some(Protocol::Ip4(_)))
}

/// Returns `true` if `address` starts with an IPv6 address.
pub fn is_ip6(address: &Multiaddr) -> bool {
    std::matches!(address.iter().next(), Some(Protocol::Ip6(_)))
}

/// Returns `true` if `address` must be resolved before it can be dialed.
pub fn is_dns(address: &Multiaddr) -> bool {
    std::matches!(
        address.iter().next(),
        Some(Protocol::Dns(_) | Protocol::Dns4(_) | Protocol::Dns6(_) | Protocol::Dnsaddr(_))
    )
}

/// Returns `true` if `address` carries UDP.
pub fn is_udp(address: &Multiaddr) -> bool {
    address.iter().any(|protocol| std::matches!(protocol, Protocol::Udp(_)))
}

/// Returns `true` if `address` carries TCP.
pub fn is_tcp(address: &Multiaddr) -> bool {
    address.iter().any(|protocol| std::matches!(protocol, Protocol::Tcp(_)))
}

/// Returns `true` if `address` is a QUIC address, either draft-29 or v1.
pub fn is_quic(address: &Multiaddr) -> bool {
    address
        .iter()
        .any(|protocol| std::matches!(protocol, Protocol::Quic | Protocol::QuicV1))
}

/// Returns `true` if `address` is a QUIC v1 address.
pub fn is_quic_v1(address: &Multiaddr) -> bool {
    address.iter().any(|protocol| std::matches!(protocol, Protocol::QuicV1))
}

/// Returns `true` if `address` is a draft-29 QUIC address.
pub fn is_quic_draft29(address: &Multiaddr) -> bool {
    address.iter().any(|protocol| std::matches!(protocol, Protocol::Quic))
}

/// Returns `true` if `address` is a WebSocket address, secure or not.
pub fn is_websocket(address: &Multiaddr) -> bool {
    address
        .iter()
        .any(|protocol| std::matches!(protocol, Protocol::Ws(_) | Protocol::Wss(_)))
}

/// Returns `true` if dialing `address` opens a socket that counts against the
/// file-descriptor limit, i.e., a direct TCP dial.
pub fn is_fd_consuming(address: &Multiaddr) -> bool {
    !is_relay(address) &&
        (is_tcp(address) ||
            address.iter().any(|protocol| std::matches!(protocol, Protocol::Unix(_))))
}

/// Get the transport port of `address`.
pub fn port(address: &Multiaddr) -> Option<u16> {
    address.iter().find_map(|protocol| match protocol {
        Protocol::Tcp(port) | Protocol::Udp(port) => Some(port),
        _ => None,
    })
}

/// Get the `(ip, port)` pair `address` listens on, if it has one.
pub fn socket_key(address: &Multiaddr) -> Option<(IpAddr, u16)> {
    Some((ip_addr(address)?, port(address)?))
}

fn is_private_ip4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();

    ip.is_private() ||
        ip.is_loopback() ||
        ip.is_link_local() ||
        // 100.64.0.0/10
        (octets[0] == 100 && (octets[1] & 0b1100_0000) == 64)
}

fn is_private_ip6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();

    ip.is_loopback() ||
        // fe80::/10
        (segments[0] & 0xffc0) == 0xfe80 ||
        // fc00::/7
        (segments[0] & 0xfe00) == 0xfc00
}

fn is_unroutable_ip4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();

    ip.is_unspecified() ||
        ip.is_broadcast() ||
        ip.is_documentation() ||
        octets[0] == 0 ||
        // 198.18.0.0/15
        (octets[0] == 198 && (octets[1] & 0xfe) == 18) ||
        // 240.0.0.0/4
        octets[0] >= 240
}

fn is_unroutable_ip6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();

    ip.is_unspecified() ||
        ip.is_multicast() ||
        // 2001:db8::/32
        (segments[0] == 0x2001 && segments[1] == 0x0db8) ||
        // 100::/64
        (segments[0] == 0x0100 && segments[1..4] == [0, 0, 0])
}

/// Returns `true` if `address` is on a private network or the loopback interface.
pub fn is_private(address: &Multiaddr) -> bool {
    match ip_addr(address) {
        Some(IpAddr::V4(ip)) => is_private_ip4(&ip),
        Some(IpAddr::V6(ip)) => is_private_ip6(&ip),
        None => match address.iter().next() {
            Some(Protocol::Dns(host) | Protocol::Dns4(host) | Protocol::Dns6(host)) =>
                host == "localhost" || host.ends_with(".localhost"),
            _ => false,
        },
    }
}

/// Returns `true` if `address` is reachable over the public internet.
pub fn is_public(address: &Multiaddr) -> bool {
    match ip_addr(address) {
        Some(IpAddr::V4(ip)) => !is_private_ip4(&ip) && !is_unroutable_ip4(&ip),
        Some(IpAddr::V6(ip)) => !is_private_ip6(&ip) && !is_unroutable_ip6(&ip),
        None => is_dns(address) && !is_private(address),
    }
}

/// Returns `true` if `address` is an IPv6 link-local address.
pub fn is_ip6_link_local(address: &Multiaddr) -> bool {
    match address.iter().next() {
        Some(Protocol::Ip6(ip)) => (ip.segments()[0] & 0xffc0) == 0xfe80,
        _ => false,
    }
}

/// Returns `true` if `address` ends with a `/p2p` component.
pub fn has_peer_id(address: &Multiaddr) -> bool {
    std::matches!(address.iter().last(), Some(Protocol::P2p(_)))
}

/// Source of peer addresses.
pub trait AddressBook: Send + Sync {
    /// Get known addresses of `peer`.
    fn addresses(&self, peer: &PeerId) -> Vec<Multiaddr>;

    /// Add `addresses` for `peer`.
    fn add_addresses(&self, peer: PeerId, addresses: Vec<Multiaddr>);
}

/// In-memory [`AddressBook`] keeping at most 32 addresses per peer.
///
/// When full, the oldest address of the peer is evicted.
#[derive(Debug, Default)]
pub struct MemoryAddressBook {
    addresses: RwLock<HashMap<PeerId, IndexSet<Multiaddr>>>,
}

impl MemoryAddressBook {
    /// Create new [`MemoryAddressBook`].
    pub fn new() -> Self {
        Self {
            addresses: RwLock::new(HashMap::new()),
        }
    }

    /// Remove all addresses of `peer`.
    pub fn remove_peer(&self, peer: &PeerId) {
        self.addresses.write().remove(peer);
    }
}

impl AddressBook for MemoryAddressBook {
    fn addresses(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.addresses
            .read()
            .get(peer)
            .map(|addresses| addresses.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn add_addresses(&self, peer: PeerId, addresses: Vec<Multiaddr>) {
        let mut book = self.addresses.write();
        let entry = book.entry(peer).or_default();

        for address in addresses {
            if entry.contains(&address) {
                continue;
            }

            if entry.len() == MAX_ADDRESSES {
                entry.shift_remove_index(0);
            }
            entry.insert(address);
        }
    }
}
