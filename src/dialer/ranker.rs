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

//! Dial ranking.
//!
//! Assigns every address a delay, relative to the start of dialing, after which it is dialed.
//! QUIC is preferred over TCP and IPv6 over IPv4, with an IPv4 QUIC address raced against the
//! best IPv6 QUIC address shortly after it. Relayed addresses are only dialed once the direct
//! public addresses had a chance to connect.

use crate::dialer::address;

use multiaddr::Multiaddr;

use std::time::Duration;

/// Delay of the second TCP dial to a public address.
const PUBLIC_TCP_DELAY: Duration = Duration::from_millis(250);

/// Delay of the second TCP dial to a private address.
const PRIVATE_TCP_DELAY: Duration = Duration::from_millis(30);

/// Delay of the second QUIC dial to a public address.
const PUBLIC_QUIC_DELAY: Duration = Duration::from_millis(250);

/// Delay of the second QUIC dial to a private address.
const PRIVATE_QUIC_DELAY: Duration = Duration::from_millis(30);

/// Delay of relayed addresses when the peer has public direct addresses.
const RELAY_DELAY: Duration = Duration::from_millis(500);

/// Address with the delay after which it should be dialed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressDelay {
    /// Address.
    pub address: Multiaddr,

    /// Delay relative to the start of dialing.
    pub delay: Duration,
}

/// Ranking delays.
#[derive(Debug, Clone)]
pub struct RankerConfig {
    /// TCP delay for public addresses.
    pub public_tcp_delay: Duration,

    /// QUIC delay for public addresses.
    pub public_quic_delay: Duration,

    /// TCP delay for private addresses.
    pub private_tcp_delay: Duration,

    /// QUIC delay for private addresses.
    pub private_quic_delay: Duration,

    /// Offset of relayed addresses.
    pub relay_delay: Duration,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            public_tcp_delay: PUBLIC_TCP_DELAY,
            public_quic_delay: PUBLIC_QUIC_DELAY,
            private_tcp_delay: PRIVATE_TCP_DELAY,
            private_quic_delay: PRIVATE_QUIC_DELAY,
            relay_delay: RELAY_DELAY,
        }
    }
}

/// Rank `addresses`.
///
/// When `simultaneous_connect` is set, both ends are dialing each other and every address
/// is dialed immediately.
pub fn rank(
    addresses: Vec<Multiaddr>,
    simultaneous_connect: bool,
    config: &RankerConfig,
) -> Vec<AddressDelay> {
    if simultaneous_connect {
        return addresses
            .into_iter()
            .map(|address| AddressDelay {
                address,
                delay: Duration::ZERO,
            })
            .collect();
    }

    let (relay, rest): (Vec<_>, Vec<_>) = addresses.into_iter().partition(address::is_relay);
    let (private, rest): (Vec<_>, Vec<_>) = rest.into_iter().partition(address::is_private);
    let (public, other): (Vec<_>, Vec<_>) = rest
        .into_iter()
        .partition(|address| address::is_ip4(address) || address::is_ip6(address));

    let relay_offset = match public.is_empty() {
        true => Duration::ZERO,
        false => config.relay_delay,
    };

    let mut ranked = Vec::with_capacity(relay.len() + private.len() + public.len() + other.len());
    ranked.extend(group_delays(
        private,
        config.private_tcp_delay,
        config.private_quic_delay,
        Duration::ZERO,
    ));
    ranked.extend(group_delays(
        public,
        config.public_tcp_delay,
        config.public_quic_delay,
        Duration::ZERO,
    ));
    ranked.extend(group_delays(
        relay,
        config.public_tcp_delay,
        config.public_quic_delay,
        relay_offset,
    ));
    ranked.extend(other.into_iter().map(|address| AddressDelay {
        address,
        delay: Duration::ZERO,
    }));

    ranked
}

/// Assign delays to one group of addresses.
fn group_delays(
    mut addresses: Vec<Multiaddr>,
    tcp_delay: Duration,
    quic_delay: Duration,
    offset: Duration,
) -> Vec<AddressDelay> {
    addresses.sort_by(|a, b| {
        score(a).cmp(&score(b)).then_with(|| a.to_vec().cmp(&b.to_vec()))
    });

    let mut happy_eyeballs = false;

    if addresses.first().is_some_and(|first| address::is_quic(first) && address::is_ip6(first)) {
        if let Some(index) = addresses
            .iter()
            .skip(1)
            .position(|address| address::is_quic(address) && address::is_ip4(address))
        {
            let ip4 = addresses.remove(index + 1);
            addresses.insert(1, ip4);
            happy_eyeballs = true;
        }
    }

    let mut tcp_start = Duration::ZERO;

    addresses
        .into_iter()
        .enumerate()
        .map(|(i, address)| {
            let mut delay = Duration::ZERO;

            if address::is_quic(&address) {
                delay = match i {
                    0 => Duration::ZERO,
                    1 => quic_delay,
                    _ if happy_eyeballs => 2 * quic_delay,
                    _ => quic_delay,
                };
                tcp_start = delay + tcp_delay;
            } else if address::is_tcp(&address) {
                delay = tcp_start;
            }

            AddressDelay {
                address,
                delay: offset + delay,
            }
        })
        .collect()
}

/// Score of `address`, lower is better.
///
/// Lower ports are preferred as they are more likely to be listen ports than ephemeral ones.
fn score(address: &Multiaddr) -> u32 {
    let ip4_weight = match address::is_ip4(address) {
        true => 1 << 18,
        false => 0,
    };
    let port = address::port(address).map_or(0u32, u32::from);

    if address::is_quic_draft29(address) {
        return ip4_weight + (1 << 17) + port;
    }
    if address::is_quic_v1(address) {
        return ip4_weight + port;
    }
    if address::is_tcp(address) {
        return ip4_weight + (1 << 20) + port;
    }

    1 << 30
}
