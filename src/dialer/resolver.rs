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

//! Address resolution.
//!
//! `/dns`, `/dns4` and `/dns6` addresses are resolved into IP addresses and `/dnsaddr`
//! addresses into the addresses published in the `_dnsaddr` TXT records of the domain.
//! Resolution is recursive and bounded by a maximum number of steps.

use crate::{dialer::address, Error, PeerId};

use hickory_resolver::{
    config::ResolverConfig, name_server::TokioConnectionProvider, TokioResolver,
};
use multiaddr::{Multiaddr, Protocol};

use std::net::IpAddr;

/// Logging target for the file.
const LOG_TARGET: &str = "litep2p::dialer::resolver";

/// Maximum number of resolution steps taken for the addresses of one peer.
pub const MAX_RESOLUTION_STEPS: usize = 32;

/// Prefix of `dnsaddr` TXT records.
const DNSADDR_PREFIX: &str = "dnsaddr=";

/// Resolver of DNS addresses.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve one step of `address`.
    ///
    /// The returned addresses may themselves need further resolution.
    async fn resolve(&self, address: &Multiaddr) -> crate::Result<Vec<Multiaddr>>;
}

/// Resolve `addresses` of `peer` into dialable addresses.
///
/// Addresses that need no resolution are returned as-is. At most `max_steps` addresses are
/// resolved, the rest of the unresolved addresses are dropped. Resolved addresses that belong
/// to another peer are discarded.
pub async fn resolve_addresses(
    resolver: &dyn Resolver,
    peer: PeerId,
    addresses: Vec<Multiaddr>,
    max_steps: usize,
) -> Vec<Multiaddr> {
    let mut to_resolve = addresses;
    let mut resolved = Vec::with_capacity(to_resolve.len());
    let mut steps = 0usize;

    while let Some(address) = to_resolve.pop() {
        if !address::is_dns(&address) {
            resolved.push(address);
            continue;
        }

        if steps == max_steps {
            tracing::warn!(
                target: LOG_TARGET,
                ?peer,
                ?address,
                ?max_steps,
                "too many addresses to resolve, skipping",
            );
            continue;
        }
        steps += 1;

        let request = match address::has_peer_id(&address) {
            true => address.clone(),
            false => address.clone().with(Protocol::P2p(peer.into())),
        };

        match resolver.resolve(&request).await {
            Ok(addresses) =>
                for result in addresses {
                    match PeerId::try_from_multiaddr(&result) {
                        Some(result_peer) if result_peer != peer => {
                            tracing::debug!(
                                target: LOG_TARGET,
                                ?peer,
                                ?result_peer,
                                ?result,
                                "resolved address belongs to another peer",
                            );
                        }
                        Some(_) => {
                            let mut result = result;
                            result.pop();
                            to_resolve.push(result);
                        }
                        None => to_resolve.push(result),
                    }
                },
            Err(error) => tracing::debug!(
                target: LOG_TARGET,
                ?peer,
                ?address,
                ?error,
                "failed to resolve address",
            ),
        }
    }

    resolved
}

/// DNS resolver backed by `hickory-resolver`.
pub struct DnsResolver {
    resolver: TokioResolver,
}

impl DnsResolver {
    /// Create new [`DnsResolver`] using the system configuration.
    ///
    /// Falls back to the default upstream servers if the system configuration can't be read.
    pub fn new() -> Self {
        let resolver = match TokioResolver::builder_tokio() {
            Ok(builder) => builder.build(),
            Err(error) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    ?error,
                    "failed to read system dns configuration, using defaults",
                );

                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            }
        };

        Self { resolver }
    }

    async fn resolve_dnsaddr(
        &self,
        host: &str,
        address: &Multiaddr,
    ) -> crate::Result<Vec<Multiaddr>> {
        let lookup = self.resolver.txt_lookup(format!("_dnsaddr.{host}")).await?;
        let expected = PeerId::try_from_multiaddr(address);

        Ok(lookup
            .iter()
            .filter_map(|record| {
                let text = record
                    .txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect::<String>();

                text.strip_prefix(DNSADDR_PREFIX)?.parse::<Multiaddr>().ok()
            })
            .filter(|result| match (expected, PeerId::try_from_multiaddr(result)) {
                (Some(expected), Some(actual)) => expected == actual,
                _ => true,
            })
            .collect())
    }

    async fn resolve_ip(
        &self,
        host: &str,
        address: &Multiaddr,
        filter: fn(&IpAddr) -> bool,
    ) -> crate::Result<Vec<Multiaddr>> {
        let lookup = self.resolver.lookup_ip(host).await?;
        let rest = address.iter().skip(1).collect::<Vec<_>>();

        Ok(lookup
            .iter()
            .filter(filter)
            .map(|ip| {
                rest.iter()
                    .cloned()
                    .fold(Multiaddr::empty().with(Protocol::from(ip)), |address, protocol| {
                        address.with(protocol)
                    })
            })
            .collect())
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, address: &Multiaddr) -> crate::Result<Vec<Multiaddr>> {
        let result = match address.iter().next() {
            Some(Protocol::Dnsaddr(host)) => self.resolve_dnsaddr(&host, address).await,
            Some(Protocol::Dns(host)) => self.resolve_ip(&host, address, |_| true).await,
            Some(Protocol::Dns4(host)) => self.resolve_ip(&host, address, IpAddr::is_ipv4).await,
            Some(Protocol::Dns6(host)) => self.resolve_ip(&host, address, IpAddr::is_ipv6).await,
            _ => return Ok(vec![address.clone()]),
        };

        tracing::trace!(target: LOG_TARGET, ?address, ?result, "address resolved");

        match result {
            Ok(addresses) if addresses.is_empty() => Err(Error::DnsAddressResolutionFailed),
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::resolver::StaticResolver;

    fn addr(address: &str) -> Multiaddr {
        address.parse().unwrap()
    }

    #[tokio::test]
    async fn plain_addresses_are_not_resolved() {
        let resolver = StaticResolver::new();
        let addresses = vec![addr("/ip4/1.1.1.1/tcp/1"), addr("/ip6/::1/udp/1/quic-v1")];

        let mut resolved =
            resolve_addresses(&resolver, PeerId::random(), addresses.clone(), 32).await;
        resolved.reverse();

        assert_eq!(resolved, addresses);
        assert_eq!(resolver.calls(), 0);
    }

    #[tokio::test]
    async fn recursive_resolution() {
        let peer = PeerId::random();
        let resolver = StaticResolver::new();
        let p2p = |address: &str| addr(address).with(Protocol::P2p(peer.into()));

        resolver.insert(
            p2p("/dnsaddr/bootstrap.example.com"),
            vec![p2p("/dns4/node.example.com/tcp/30333"), p2p("/ip4/2.2.2.2/udp/1/quic-v1")],
        );
        resolver.insert(
            p2p("/dns4/node.example.com/tcp/30333"),
            vec![p2p("/ip4/3.3.3.3/tcp/30333")],
        );

        let mut resolved = resolve_addresses(
            &resolver,
            peer,
            vec![addr("/dnsaddr/bootstrap.example.com"), addr("/ip4/1.1.1.1/tcp/1")],
            32,
        )
        .await;
        resolved.sort_by_key(|address| address.to_string());

        assert_eq!(
            resolved,
            vec![
                addr("/ip4/1.1.1.1/tcp/1"),
                addr("/ip4/2.2.2.2/udp/1/quic-v1"),
                addr("/ip4/3.3.3.3/tcp/30333"),
            ]
        );
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn addresses_of_other_peers_are_discarded() {
        let peer = PeerId::random();
        let other = PeerId::random();
        let resolver = StaticResolver::new();

        resolver.insert(
            addr("/dnsaddr/example.com").with(Protocol::P2p(peer.into())),
            vec![
                addr("/ip4/1.1.1.1/tcp/1").with(Protocol::P2p(other.into())),
                addr("/ip4/2.2.2.2/tcp/1"),
            ],
        );

        let resolved =
            resolve_addresses(&resolver, peer, vec![addr("/dnsaddr/example.com")], 32).await;
        assert_eq!(resolved, vec![addr("/ip4/2.2.2.2/tcp/1")]);
    }

    #[tokio::test]
    async fn resolution_is_bounded() {
        let peer = PeerId::random();
        let resolver = StaticResolver::new();

        // each step resolves into another dns address, forming a loop
        resolver.insert(
            addr("/dns/a.example.com/tcp/1").with(Protocol::P2p(peer.into())),
            vec![addr("/dns/b.example.com/tcp/1"), addr("/ip4/1.1.1.1/tcp/1")],
        );
        resolver.insert(
            addr("/dns/b.example.com/tcp/1").with(Protocol::P2p(peer.into())),
            vec![addr("/dns/a.example.com/tcp/1")],
        );

        let resolved =
            resolve_addresses(&resolver, peer, vec![addr("/dns/a.example.com/tcp/1")], 5).await;

        assert_eq!(resolver.calls(), 5);
        assert_eq!(resolved, vec![addr("/ip4/1.1.1.1/tcp/1"); 3]);
    }

    #[tokio::test]
    async fn resolution_errors_are_skipped() {
        let resolver = StaticResolver::new();

        let resolved = resolve_addresses(
            &resolver,
            PeerId::random(),
            vec![addr("/dns/unknown.example.com/tcp/1"), addr("/ip4/1.1.1.1/tcp/1")],
            32,
        )
        .await;

        assert_eq!(resolved, vec![addr("/ip4/1.1.1.1/tcp/1")]);
        assert_eq!(resolver.calls(), 1);
    }
}
