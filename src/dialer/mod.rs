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

//! Concurrent peer dialer.
//!
//! [`Dialer::connect()`] returns a connection to a peer, reusing an existing one when the
//! policy allows it and otherwise dialing the known addresses of the peer. All dials to one
//! peer are owned by a single worker task, so concurrent callers share the dials instead of
//! racing each other.

use crate::{
    config::Config,
    dialer::{
        address::AddressBook,
        backoff::DialBackoff,
        black_hole::{BlackHoleDetector, BlackHoleFilter},
        filter::AddressFilter,
        limits::{DialGater, DialLimits},
        ranker::RankerConfig,
        registry::ConnectionRegistry,
        resolver::{DnsResolver, Resolver},
        types::WorkerCommand,
        worker::DialWorker,
    },
    executor::Executor,
    metrics::DialerMetrics,
    transport::{Connection, Transport, TransportSet},
    types::{ConnectionId, RequestId},
    Error, PeerId,
};

use multiaddr::Multiaddr;
use parking_lot::Mutex;
use tokio::sync::{
    mpsc::{channel, Sender},
    oneshot, Semaphore,
};
use tokio_util::sync::CancellationToken;

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

pub use types::DialOptions;

pub mod address;
pub mod backoff;
pub mod black_hole;
pub mod filter;
pub mod limits;
pub mod queue;
pub mod ranker;
pub mod registry;
pub mod resolver;
pub mod types;

mod worker;

/// Logging target for the file.
const LOG_TARGET: &str = "litep2p::dialer";

/// Channel size of a dial worker.
const WORKER_CHANNEL_SIZE: usize = 64;

/// Check if `connection` satisfies the policy of `options`.
pub(crate) fn is_acceptable(connection: &dyn Connection, options: &DialOptions) -> bool {
    if options.force_direct && !connection.is_direct() {
        return false;
    }

    options.allow_transient || !connection.is_transient()
}

/// State shared by the dialer and its workers.
pub(crate) struct DialContext {
    /// Local peer ID.
    pub(crate) local_peer_id: PeerId,

    /// Enabled transports.
    pub(crate) transports: TransportSet,

    /// Known addresses of peers.
    pub(crate) address_book: Arc<dyn AddressBook>,

    /// DNS resolver.
    pub(crate) resolver: Arc<dyn Resolver>,

    /// Address filter.
    pub(crate) filter: AddressFilter,

    /// Black hole filters.
    pub(crate) black_holes: Arc<BlackHoleDetector>,

    /// Dial backoff.
    pub(crate) backoff: Arc<DialBackoff>,

    /// Dial admission limits.
    pub(crate) limits: DialLimits,

    /// Established connections.
    pub(crate) registry: Arc<dyn ConnectionRegistry>,

    /// Dial policy.
    pub(crate) gater: Option<Arc<dyn DialGater>>,

    /// Dialer metrics.
    pub(crate) metrics: Option<DialerMetrics>,

    /// Executor running the workers.
    pub(crate) executor: Arc<dyn Executor>,

    /// Ranker delays.
    pub(crate) ranker: RankerConfig,

    /// Timeout for dialing a public address.
    pub(crate) dial_timeout: Duration,

    /// Timeout for dialing a private address.
    pub(crate) dial_timeout_local: Duration,

    /// Maximum number of DNS resolution steps per request.
    pub(crate) max_resolution_steps: usize,

    /// Whether dials abandoned by a worker that already connected count as black hole failures.
    pub(crate) record_abandoned_dials: bool,

    /// Next connection ID.
    pub(crate) next_connection_id: AtomicUsize,

    /// Cancelled when the dialer is closed.
    pub(crate) shutdown: CancellationToken,
}

impl DialContext {
    /// Get the best existing connection to `peer` that `options` accept.
    pub(crate) fn acceptable_connection(
        &self,
        peer: &PeerId,
        options: &DialOptions,
    ) -> Option<Arc<dyn Connection>> {
        self.registry
            .best_connection(peer)
            .filter(|connection| is_acceptable(connection.as_ref(), options))
    }

    /// Dial `peer` at `address` using `transport`.
    ///
    /// `dialing` is set once the dial was admitted and handed to the transport.
    pub(crate) async fn dial_address(
        &self,
        permits: Arc<Semaphore>,
        transport: Arc<dyn Transport>,
        connection_id: ConnectionId,
        peer: PeerId,
        address: Multiaddr,
        dialing: Arc<AtomicBool>,
    ) -> crate::Result<Box<dyn Connection>> {
        if peer == self.local_peer_id {
            return Err(Error::TriedToDialSelf);
        }

        let _permit = self.limits.acquire(permits, &address).await?;
        dialing.store(true, Ordering::Release);
        let timeout = match address::is_private(&address) {
            true => self.dial_timeout_local,
            false => self.dial_timeout,
        };

        tracing::trace!(
            target: LOG_TARGET,
            ?peer,
            ?address,
            ?connection_id,
            transport = transport.name(),
            "dial address",
        );

        let dial = transport.dial(connection_id, peer, address.clone());
        let result = match tokio::time::timeout(timeout, dial).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        };
        self.black_holes.record_result(&address, result.is_ok());

        let connection = result?;
        let actual = connection.peer();

        if actual != peer {
            tracing::debug!(
                target: LOG_TARGET,
                expected = ?peer,
                ?actual,
                ?address,
                "dialed peer doesn't match the connected peer",
            );

            connection.close();
            return Err(Error::PeerIdMismatch {
                expected: peer,
                actual,
            });
        }

        Ok(connection)
    }
}

/// Worker of a peer and the number of requests using it.
struct WorkerEntry {
    tx: Sender<WorkerCommand>,
    refs: usize,
}

type Workers = Arc<Mutex<HashMap<PeerId, WorkerEntry>>>;

/// Reference to a worker held for the duration of one request.
///
/// A request that is dropped before it was answered is cancelled. The worker is forgotten
/// once the last request referencing it is gone, which stops the worker.
struct WorkerHandle {
    peer: PeerId,
    request_id: RequestId,
    tx: Sender<WorkerCommand>,
    workers: Workers,
    answered: bool,
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if !self.answered {
            let _ = self.tx.try_send(WorkerCommand::Cancel {
                request_id: self.request_id,
            });
        }

        let mut workers = self.workers.lock();
        if let Entry::Occupied(mut entry) = workers.entry(self.peer) {
            if !entry.get().tx.same_channel(&self.tx) {
                return;
            }

            entry.get_mut().refs = entry.get().refs.saturating_sub(1);
            if entry.get().refs == 0 {
                entry.remove();
            }
        }
    }
}

/// Concurrent peer dialer.
pub struct Dialer {
    /// Shared state.
    context: Arc<DialContext>,

    /// Active workers.
    workers: Workers,

    /// Default timeout of [`Dialer::connect()`].
    dial_peer_timeout: Duration,

    /// Next request ID.
    next_request_id: AtomicUsize,
}

impl Dialer {
    /// Create new [`Dialer`].
    ///
    /// Must be called from within a tokio runtime when the default executor is used.
    pub fn new(config: Config, registry: Arc<dyn ConnectionRegistry>) -> crate::Result<Self> {
        let metrics = config
            .metrics_registry
            .as_ref()
            .map(DialerMetrics::new)
            .transpose()?;

        let black_holes = Arc::new(BlackHoleDetector::new(
            config.udp_black_hole.map(|udp| {
                BlackHoleFilter::new(udp, metrics.as_ref().map(|m| m.black_hole_udp.clone()))
            }),
            config.ipv6_black_hole.map(|ipv6| {
                BlackHoleFilter::new(ipv6, metrics.as_ref().map(|m| m.black_hole_ipv6.clone()))
            }),
        ));
        let filter = AddressFilter::new(
            config.transports.clone(),
            black_holes.clone(),
            config.gater.clone(),
            config.listen_addresses,
            config.filter_ipv6_link_local,
        );
        let resolver = config.resolver.unwrap_or_else(|| Arc::new(DnsResolver::new()));
        let backoff = Arc::new(DialBackoff::new(config.backoff));
        let shutdown = CancellationToken::new();

        config.executor.run(Box::pin(backoff.clone().run(shutdown.clone())));

        tracing::debug!(
            target: LOG_TARGET,
            local_peer_id = ?config.local_peer_id,
            transports = config.transports.len(),
            "dialer started",
        );

        Ok(Self {
            context: Arc::new(DialContext {
                local_peer_id: config.local_peer_id,
                transports: config.transports,
                address_book: config.address_book,
                resolver,
                filter,
                black_holes,
                backoff,
                limits: DialLimits::new(
                    config.max_fd_consuming_dials,
                    config.max_parallel_dials_per_peer,
                ),
                registry,
                gater: config.gater,
                metrics,
                executor: config.executor,
                ranker: config.ranker,
                dial_timeout: config.dial_timeout,
                dial_timeout_local: config.dial_timeout_local,
                max_resolution_steps: config.max_resolution_steps,
                record_abandoned_dials: config.record_abandoned_dials,
                next_connection_id: AtomicUsize::new(0usize),
                shutdown,
            }),
            workers: Arc::new(Mutex::new(HashMap::new())),
            dial_peer_timeout: config.dial_peer_timeout,
            next_request_id: AtomicUsize::new(0usize),
        })
    }

    /// Get local peer ID.
    pub fn local_peer_id(&self) -> &PeerId {
        &self.context.local_peer_id
    }

    /// Get the dial backoff.
    pub fn backoff(&self) -> &DialBackoff {
        &self.context.backoff
    }

    /// Get the black hole filters.
    pub fn black_holes(&self) -> &BlackHoleDetector {
        &self.context.black_holes
    }

    /// Number of peers that are being dialed.
    pub fn active_workers(&self) -> usize {
        self.workers.lock().len()
    }

    /// Add `address` to the known addresses of `peer`.
    pub fn add_known_address(&self, peer: PeerId, address: Multiaddr) {
        self.context.address_book.add_addresses(peer, vec![address]);
    }

    /// Register a local listen address so it's never dialed.
    pub fn register_listen_address(&self, address: Multiaddr) {
        self.context.filter.add_listen_address(address);
    }

    /// Check if the dialer has been closed.
    pub fn is_closed(&self) -> bool {
        self.context.shutdown.is_cancelled()
    }

    /// Close the dialer.
    ///
    /// Outstanding and future requests fail with [`Error::DialerClosed`].
    pub fn close(&self) {
        if self.context.shutdown.is_cancelled() {
            return;
        }

        tracing::debug!(target: LOG_TARGET, "close dialer");

        self.context.shutdown.cancel();
        self.workers.lock().clear();
    }

    /// Get connection to `peer`, dialing it if needed.
    pub async fn connect(
        &self,
        peer: PeerId,
        options: DialOptions,
    ) -> crate::Result<Arc<dyn Connection>> {
        if self.is_closed() {
            return Err(Error::DialerClosed);
        }

        if peer == self.context.local_peer_id {
            return Err(Error::TriedToDialSelf);
        }

        if let Some(connection) = self.context.acceptable_connection(&peer, &options) {
            tracing::trace!(
                target: LOG_TARGET,
                ?peer,
                endpoint = ?connection.endpoint(),
                "reuse existing connection",
            );
            return Ok(connection);
        }

        if options.no_dial {
            return match self.context.registry.best_connection(&peer) {
                Some(_) => Err(Error::TransientConnection(peer)),
                None => Err(Error::NoUsableConnection(peer)),
            };
        }

        if let Some(gater) = &self.context.gater {
            if !gater.allow_dial(&peer) {
                tracing::debug!(target: LOG_TARGET, ?peer, "gater disallowed dialing peer");
                return Err(Error::GaterDisallowedConnection(peer));
            }
        }

        let request_id = RequestId::next(&self.next_request_id);
        let timeout = options.timeout.unwrap_or(self.dial_peer_timeout);
        let cancel = options.cancel.clone();
        let (tx, rx) = oneshot::channel();
        let mut handle = self.worker(peer, request_id);

        tracing::debug!(target: LOG_TARGET, ?peer, ?request_id, ?timeout, "connect to peer");

        if handle
            .tx
            .send(WorkerCommand::Dial {
                request_id,
                options,
                tx,
            })
            .await
            .is_err()
        {
            handle.answered = true;
            return Err(self.closed_error());
        }

        tokio::select! {
            result = rx => {
                handle.answered = true;
                result.unwrap_or_else(|_| Err(self.closed_error()))
            }
            _ = cancelled(cancel) => {
                tracing::debug!(target: LOG_TARGET, ?peer, ?request_id, "connect cancelled");
                Err(Error::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                tracing::debug!(target: LOG_TARGET, ?peer, ?request_id, "connect timed out");
                Err(Error::Timeout)
            }
            _ = self.context.shutdown.cancelled() => {
                handle.answered = true;
                Err(Error::DialerClosed)
            }
        }
    }

    /// Get the worker of `peer`, starting one if it doesn't exist.
    fn worker(&self, peer: PeerId, request_id: RequestId) -> WorkerHandle {
        let mut workers = self.workers.lock();
        let entry = workers.entry(peer).or_insert_with(|| {
            tracing::trace!(target: LOG_TARGET, ?peer, "start dial worker");

            let (tx, rx) = channel(WORKER_CHANNEL_SIZE);
            let worker = DialWorker::new(peer, self.context.clone(), rx);
            self.context.executor.run(Box::pin(worker.run()));

            WorkerEntry { tx, refs: 0usize }
        });
        entry.refs += 1;

        WorkerHandle {
            peer,
            request_id,
            tx: entry.tx.clone(),
            workers: self.workers.clone(),
            answered: false,
        }
    }

    fn closed_error(&self) -> Error {
        match self.is_closed() {
            true => Error::DialerClosed,
            false => Error::EssentialTaskClosed,
        }
    }
}

impl Drop for Dialer {
    fn drop(&mut self) {
        self.context.shutdown.cancel();
    }
}

/// Resolves when `token` is cancelled, never if there's no token.
async fn cancelled(token: Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => futures::future::pending().await,
    }
}
