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

//! Dial policy and admission limits.

use crate::{dialer::address, Error, PeerId};

use multiaddr::Multiaddr;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use std::sync::Arc;

/// Policy deciding which peers and addresses may be dialed.
///
/// The gater interacts with the dialer at two entry points:
/// - [`Self::allow_dial`] when a connection to a peer is requested, before any address is looked
///   up
/// - [`Self::allow_address_dial`] for every resolved address of the peer, before it is ranked
///
/// Returning `false` from either of the methods refuses the peer or the address.
pub trait DialGater: Send + Sync {
    /// Returns `true` if `peer` may be dialed.
    fn allow_dial(&self, peer: &PeerId) -> bool;

    /// Returns `true` if `address` of `peer` may be dialed.
    fn allow_address_dial(&self, peer: &PeerId, address: &Multiaddr) -> bool;
}

/// Permit held for the duration of a raw dial.
#[derive(Debug)]
pub struct DialPermit {
    _peer: OwnedSemaphorePermit,
    _fd: Option<OwnedSemaphorePermit>,
}

/// Admission limits for raw dials.
///
/// Limits the number of parallel dials to a single peer and the number of file-descriptor
/// consuming dials across all peers. A dial waits for its permits after it has passed backoff
/// and black hole checks, the limits only delay it.
#[derive(Debug, Clone)]
pub struct DialLimits {
    /// Permits for file-descriptor consuming dials.
    fd_permits: Arc<Semaphore>,

    /// Maximum number of parallel dials per peer.
    per_peer: usize,
}

impl DialLimits {
    /// Create new [`DialLimits`].
    pub fn new(max_fd_consuming_dials: usize, max_parallel_dials_per_peer: usize) -> Self {
        Self {
            fd_permits: Arc::new(Semaphore::new(max_fd_consuming_dials.max(1))),
            per_peer: max_parallel_dials_per_peer.max(1),
        }
    }

    /// Create permits for the dials of one peer.
    pub fn peer_permits(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(self.per_peer))
    }

    /// Wait until `address` may be dialed.
    pub async fn acquire(
        &self,
        peer_permits: Arc<Semaphore>,
        address: &Multiaddr,
    ) -> crate::Result<DialPermit> {
        let peer = peer_permits.acquire_owned().await.map_err(|_| Error::DialerClosed)?;
        let fd = match address::is_fd_consuming(address) {
            true => Some(
                self.fd_permits.clone().acquire_owned().await.map_err(|_| Error::DialerClosed)?,
            ),
            false => None,
        };

        Ok(DialPermit {
            _peer: peer,
            _fd: fd,
        })
    }

    #[cfg(test)]
    fn available_fd_permits(&self) -> usize {
        self.fd_permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr(address: &str) -> Multiaddr {
        address.parse().unwrap()
    }

    #[tokio::test]
    async fn fd_permits_only_for_tcp() {
        let limits = DialLimits::new(2, 8);
        let peer = limits.peer_permits();

        let quic = limits.acquire(peer.clone(), &addr("/ip4/1.1.1.1/udp/1/quic-v1")).await.unwrap();
        assert_eq!(limits.available_fd_permits(), 2);

        let tcp = limits.acquire(peer.clone(), &addr("/ip4/1.1.1.1/tcp/1")).await.unwrap();
        assert_eq!(limits.available_fd_permits(), 1);
        assert_eq!(peer.available_permits(), 6);

        drop(tcp);
        drop(quic);
        assert_eq!(limits.available_fd_permits(), 2);
        assert_eq!(peer.available_permits(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn per_peer_limit_delays_dials() {
        let limits = DialLimits::new(160, 1);
        let peer = limits.peer_permits();
        let address = addr("/ip4/1.1.1.1/udp/1/quic-v1");

        let first = limits.acquire(peer.clone(), &address).await.unwrap();

        let second = limits.acquire(peer.clone(), &address);
        tokio::pin!(second);
        assert!(
            tokio::time::timeout(Duration::from_secs(1), &mut second).await.is_err(),
            "second dial must wait for a permit"
        );

        drop(first);
        assert!(second.await.is_ok());
    }

    #[tokio::test]
    async fn closed_semaphore_is_reported() {
        let limits = DialLimits::new(1, 1);
        let peer = limits.peer_permits();
        peer.close();

        assert!(std::matches!(
            limits.acquire(peer, &addr("/ip4/1.1.1.1/tcp/1")).await,
            Err(Error::DialerClosed)
        ));
    }
}
