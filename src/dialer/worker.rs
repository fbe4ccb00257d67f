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

//! Per-peer dial worker.
//!
//! A worker owns every dial to one peer. Concurrent requests for the peer are merged so that
//! each address is dialed at most once, and addresses are released according to the delays
//! assigned by the ranker.

use crate::{
    dialer::{
        queue::DialQueue,
        ranker::{self, AddressDelay},
        resolver,
        types::{DialOptions, ResponseSender, WorkerCommand},
        DialContext,
    },
    error::DialError,
    metrics::{MeteredFuturesStream, ScopeGaugeMetric},
    transport::Connection,
    types::{ConnectionId, RequestId},
    utils::futures_stream::FuturesStream,
    Error, PeerId,
};

use futures::{future::BoxFuture, StreamExt};
use multiaddr::Multiaddr;
use smallvec::SmallVec;
use tokio::{
    sync::{mpsc::Receiver, Semaphore},
    time::Instant,
};

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Logging target for the file.
const LOG_TARGET: &str = "litep2p::dialer::worker";

/// Result of resolving the addresses of a request.
type ResolutionResult = (RequestId, Vec<Multiaddr>);

/// Result of dialing an address.
type DialResult = (Multiaddr, crate::Result<Box<dyn Connection>>);

/// State of a tracked address.
#[derive(Debug)]
enum AddressStatus {
    /// Waiting in the dial queue.
    Queued,

    /// Dial is in flight.
    InFlight,

    /// Dial produced a connection.
    Connected(Arc<dyn Connection>),

    /// Dial failed.
    Failed(Error),
}

/// Address tracked by the worker.
#[derive(Debug)]
struct AddressDial {
    /// Status of the address.
    status: AddressStatus,

    /// Requests interested in the outcome of the dial.
    requests: SmallVec<[RequestId; 4]>,

    /// Dial ignores backoff.
    force_direct: bool,

    /// Dial was requested as part of a simultaneous connect.
    simultaneous_connect: bool,

    /// When the address started being tracked.
    created: Instant,

    /// How long the address waited before it was dialed.
    ranking_delay: Duration,

    /// Set once the transport was asked to dial the address.
    dialing: Arc<AtomicBool>,
}

impl AddressDial {
    fn new(request_id: RequestId, options: &DialOptions) -> Self {
        Self {
            status: AddressStatus::Queued,
            requests: SmallVec::from_elem(request_id, 1),
            force_direct: options.force_direct,
            simultaneous_connect: options.simultaneous_connect,
            created: Instant::now(),
            ranking_delay: Duration::ZERO,
            dialing: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Request that is waiting for its addresses to be dialed.
#[derive(Debug)]
struct PendingRequest {
    /// Response channel.
    tx: ResponseSender,

    /// Policy flags.
    options: DialOptions,

    /// Errors of the addresses that have failed so far.
    error: DialError,

    /// Addresses whose outcome is still unknown.
    addresses: HashSet<Multiaddr>,
}

/// Request whose addresses are being resolved.
#[derive(Debug)]
struct ResolvingRequest {
    tx: ResponseSender,
    options: DialOptions,
}

/// Dial worker of one peer.
pub(crate) struct DialWorker {
    /// Peer dialed by the worker.
    peer: PeerId,

    /// Shared dialer state.
    context: Arc<DialContext>,

    /// RX channel for receiving commands from the dialer.
    rx: Receiver<WorkerCommand>,

    /// Pending address resolutions.
    resolutions: FuturesStream<BoxFuture<'static, ResolutionResult>>,

    /// Requests waiting for address resolution.
    resolving: HashMap<RequestId, ResolvingRequest>,

    /// Requests waiting for dial results.
    pending: HashMap<RequestId, PendingRequest>,

    /// Tracked addresses.
    addresses: HashMap<Multiaddr, AddressDial>,

    /// Addresses waiting to be dialed.
    queue: DialQueue,

    /// Raw dials in flight.
    dials: MeteredFuturesStream<BoxFuture<'static, DialResult>>,

    /// Parallel dial permits of the peer.
    permits: Arc<Semaphore>,

    /// When the worker was started, dial delays are relative to it.
    started: Instant,

    /// When the next batch of addresses is released.
    next_dial: Option<Instant>,

    /// Whether any dial of the worker produced a connection.
    connected: bool,

    /// Active worker metric.
    _active: Option<ScopeGaugeMetric>,
}

impl DialWorker {
    /// Create new [`DialWorker`].
    pub(crate) fn new(
        peer: PeerId,
        context: Arc<DialContext>,
        rx: Receiver<WorkerCommand>,
    ) -> Self {
        let metrics = context.metrics.as_ref();

        Self {
            peer,
            rx,
            resolutions: FuturesStream::new(),
            resolving: HashMap::new(),
            pending: HashMap::new(),
            addresses: HashMap::new(),
            queue: DialQueue::new(),
            dials: MeteredFuturesStream::new(
                metrics.map(|metrics| metrics.dials_in_flight.clone()),
            ),
            permits: context.limits.peer_permits(),
            started: Instant::now(),
            next_dial: None,
            connected: false,
            _active: metrics.map(|metrics| ScopeGaugeMetric::new(metrics.active_workers.clone())),
            context,
        }
    }

    /// Respond to `tx`.
    fn respond(
        &self,
        request_id: RequestId,
        tx: ResponseSender,
        result: crate::Result<Arc<dyn Connection>>,
    ) {
        match &result {
            Ok(connection) => tracing::debug!(
                target: LOG_TARGET,
                peer = ?self.peer,
                ?request_id,
                endpoint = ?connection.endpoint(),
                "dial request succeeded",
            ),
            Err(error) => tracing::debug!(
                target: LOG_TARGET,
                peer = ?self.peer,
                ?request_id,
                ?error,
                "dial request failed",
            ),
        }

        let _ = tx.send(result);
    }

    /// Handle dial request.
    fn on_dial_request(
        &mut self,
        request_id: RequestId,
        options: DialOptions,
        tx: ResponseSender,
    ) {
        tracing::trace!(
            target: LOG_TARGET,
            peer = ?self.peer,
            ?request_id,
            ?options,
            "dial request",
        );

        if let Some(connection) = self.context.acceptable_connection(&self.peer, &options) {
            return self.respond(request_id, tx, Ok(connection));
        }

        let addresses = self.context.address_book.addresses(&self.peer);
        if addresses.is_empty() {
            return self.respond(request_id, tx, Err(Error::NoAddresses(self.peer)));
        }

        let dns = self.context.resolver.clone();
        let max_steps = self.context.max_resolution_steps;
        let peer = self.peer;

        self.resolving.insert(request_id, ResolvingRequest { tx, options });
        self.resolutions.push(Box::pin(async move {
            (
                request_id,
                resolver::resolve_addresses(&*dns, peer, addresses, max_steps).await,
            )
        }));
    }

    /// Handle resolved addresses of a request.
    fn on_addresses_resolved(&mut self, request_id: RequestId, addresses: Vec<Multiaddr>) {
        let Some(ResolvingRequest { tx, options }) = self.resolving.remove(&request_id) else {
            tracing::trace!(
                target: LOG_TARGET,
                peer = ?self.peer,
                ?request_id,
                "request cancelled during address resolution",
            );
            return;
        };

        if let Some(connection) = self.context.acceptable_connection(&self.peer, &options) {
            return self.respond(request_id, tx, Ok(connection));
        }

        if addresses.is_empty() {
            return self.respond(request_id, tx, Err(Error::NoAddresses(self.peer)));
        }

        let filtered = self.context.filter.filter(&self.peer, addresses, options.force_direct);
        if filtered.addresses.is_empty() {
            tracing::debug!(
                target: LOG_TARGET,
                peer = ?self.peer,
                ?request_id,
                refused = ?filtered.refused,
                "no good addresses",
            );
            return self.respond(request_id, tx, Err(Error::NoGoodAddresses(self.peer)));
        }

        let ranked = ranker::rank(
            filtered.addresses,
            options.simultaneous_connect,
            &self.context.ranker,
        );

        tracing::trace!(
            target: LOG_TARGET,
            peer = ?self.peer,
            ?request_id,
            ?ranked,
            "addresses ranked",
        );

        let mut error = DialError::new(self.peer);
        for (address, refused) in filtered.refused {
            error.record(address, refused);
        }

        let mut pending = PendingRequest {
            tx,
            options,
            error,
            addresses: HashSet::new(),
        };

        for AddressDelay { address, delay } in ranked {
            let Some(state) = self.addresses.get_mut(&address) else {
                self.addresses
                    .insert(address.clone(), AddressDial::new(request_id, &pending.options));
                self.queue.add(AddressDelay {
                    address: address.clone(),
                    delay,
                });
                pending.addresses.insert(address);
                continue;
            };

            match &state.status {
                AddressStatus::Connected(connection)
                    if super::is_acceptable(connection.as_ref(), &pending.options) =>
                {
                    let connection = connection.clone();
                    for address in &pending.addresses {
                        self.detach(request_id, address);
                    }
                    return self.respond(request_id, pending.tx, Ok(connection));
                }
                AddressStatus::Connected(_) => {
                    pending.error.record(address, Error::TransientConnection(self.peer));
                }
                AddressStatus::Failed(failure) => {
                    pending.error.record(address, failure.clone());
                }
                AddressStatus::Queued => {
                    state.requests.push(request_id);

                    if pending.options.simultaneous_connect && !state.simultaneous_connect {
                        state.simultaneous_connect = true;
                        state.force_direct |= pending.options.force_direct;
                        self.queue.add(AddressDelay {
                            address: address.clone(),
                            delay,
                        });
                    }
                    pending.addresses.insert(address);
                }
                AddressStatus::InFlight => {
                    state.requests.push(request_id);
                    pending.addresses.insert(address);
                }
            }
        }

        if pending.addresses.is_empty() {
            return self.respond(
                request_id,
                pending.tx,
                Err(Error::AllDialsFailed(pending.error)),
            );
        }

        self.pending.insert(request_id, pending);
        self.schedule_next_dial();
    }

    /// Remove `request_id` from the requests attached to `address`.
    fn detach(&mut self, request_id: RequestId, address: &Multiaddr) {
        if let Some(state) = self.addresses.get_mut(address) {
            state.requests.retain(|id| *id != request_id);
        }
    }

    /// Handle cancelled request.
    fn on_cancel(&mut self, request_id: RequestId) {
        if let Some(ResolvingRequest { tx, .. }) = self.resolving.remove(&request_id) {
            return self.respond(request_id, tx, Err(Error::Cancelled));
        }

        if let Some(pending) = self.pending.remove(&request_id) {
            for address in &pending.addresses {
                self.detach(request_id, address);
            }
            self.respond(request_id, pending.tx, Err(Error::Cancelled));
        }
    }

    /// Arm the dial timer for the next queued address.
    fn schedule_next_dial(&mut self) {
        self.next_dial = self.queue.peek_delay().map(|delay| {
            match self.dials.is_empty() && !self.connected {
                true => self.started,
                false => self.started + delay,
            }
        });
    }

    /// Release the next batch of queued addresses.
    fn on_dial_timer(&mut self) {
        for AddressDelay { address, .. } in self.queue.next_batch() {
            let Some(state) = self.addresses.get_mut(&address) else {
                tracing::warn!(
                    target: LOG_TARGET,
                    peer = ?self.peer,
                    ?address,
                    "queued address is not tracked",
                );
                continue;
            };

            if state.requests.is_empty() {
                tracing::trace!(
                    target: LOG_TARGET,
                    peer = ?self.peer,
                    ?address,
                    "no request interested in address, skipping dial",
                );
                self.addresses.remove(&address);
                continue;
            }

            state.ranking_delay = state.created.elapsed();

            if !state.force_direct && self.context.backoff.is_backed_off(&self.peer, &address) {
                tracing::trace!(
                    target: LOG_TARGET,
                    peer = ?self.peer,
                    ?address,
                    "address backed off",
                );
                self.dispatch_error(&address, Error::DialBackoff);
                continue;
            }

            let Some(transport) = self.context.transports.transport_for(&address) else {
                self.dispatch_error(&address, Error::TransportNotSupported(address.clone()));
                continue;
            };

            state.status = AddressStatus::InFlight;

            tracing::trace!(target: LOG_TARGET, peer = ?self.peer, ?address, "dial address");

            if let Some(metrics) = &self.context.metrics {
                metrics.dials_started.inc(1);
            }

            let context = self.context.clone();
            let permits = self.permits.clone();
            let dialing = state.dialing.clone();
            let peer = self.peer;
            let connection_id = ConnectionId::next(&self.context.next_connection_id);

            self.dials.push(Box::pin(async move {
                let result = context
                    .dial_address(
                        permits,
                        transport,
                        connection_id,
                        peer,
                        address.clone(),
                        dialing,
                    )
                    .await;
                (address, result)
            }));
        }

        self.schedule_next_dial();
    }

    /// Handle the result of a raw dial.
    fn on_dial_result(&mut self, address: Multiaddr, result: crate::Result<Box<dyn Connection>>) {
        if let Some(metrics) = &self.context.metrics {
            match result.is_ok() {
                true => metrics.dials_succeeded.inc(1),
                false => metrics.dials_failed.inc(1),
            }
        }

        let connection = match result {
            Ok(connection) => connection,
            Err(error) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    peer = ?self.peer,
                    ?address,
                    ?error,
                    "dial failed",
                );

                if !self.connected && !error.is_local_refusal() {
                    self.context.backoff.add_failure(self.peer, address.clone());
                }

                self.dispatch_error(&address, error);
                return self.schedule_next_dial();
            }
        };

        let connection = match self.context.registry.add_connection(connection) {
            Ok(connection) => connection,
            Err(error) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    peer = ?self.peer,
                    ?address,
                    ?error,
                    "failed to register connection",
                );

                self.dispatch_error(&address, error);
                return self.schedule_next_dial();
            }
        };

        let Some(state) = self.addresses.get_mut(&address) else {
            tracing::warn!(
                target: LOG_TARGET,
                peer = ?self.peer,
                ?address,
                "connection established to untracked address",
            );
            return;
        };

        tracing::debug!(
            target: LOG_TARGET,
            peer = ?self.peer,
            ?address,
            ranking_delay = ?state.ranking_delay,
            "connection established",
        );

        state.status = AddressStatus::Connected(connection.clone());
        let requests = std::mem::take(&mut state.requests);
        let ranking_delay = state.ranking_delay;

        for request_id in requests {
            let Some(pending) = self.pending.get(&request_id) else {
                continue;
            };

            if !super::is_acceptable(connection.as_ref(), &pending.options) {
                tracing::trace!(
                    target: LOG_TARGET,
                    peer = ?self.peer,
                    ?request_id,
                    ?address,
                    "connection not acceptable for request",
                );

                self.fail_request(request_id, &address, Error::TransientConnection(self.peer));
                continue;
            }

            let Some(pending) = self.pending.remove(&request_id) else {
                continue;
            };

            for other in pending.addresses.iter().filter(|other| *other != &address) {
                self.detach(request_id, other);
            }
            self.respond(request_id, pending.tx, Ok(connection.clone()));
        }

        if !self.connected {
            self.connected = true;

            if let Some(metrics) = &self.context.metrics {
                metrics.dial_ranking_delay.set(ranking_delay.as_millis() as u64);
            }
        }

        self.context.backoff.clear(&self.peer);
    }

    /// Record failure of `address` into every request attached to it.
    ///
    /// Requests that have no addresses left are answered.
    fn dispatch_error(&mut self, address: &Multiaddr, error: Error) {
        let Some(state) = self.addresses.get_mut(address) else {
            return;
        };

        let requests = std::mem::take(&mut state.requests);
        let backed_off = std::matches!(error, Error::DialBackoff);
        state.status = AddressStatus::Failed(error.clone());

        // backoff is transient, the next request may dial the address again
        if backed_off {
            self.addresses.remove(address);
        }

        for request_id in requests {
            self.fail_request(request_id, address, error.clone());
        }
    }

    /// Record failure of `address` into request `request_id`.
    ///
    /// The request is answered if it has no addresses left.
    fn fail_request(&mut self, request_id: RequestId, address: &Multiaddr, error: Error) {
        let Some(pending) = self.pending.get_mut(&request_id) else {
            return;
        };

        pending.error.record(address.clone(), error);
        pending.addresses.remove(address);

        if !pending.addresses.is_empty() {
            return;
        }

        let Some(pending) = self.pending.remove(&request_id) else {
            return;
        };

        // another dial may have connected to the peer in the meantime
        let result = match self.context.acceptable_connection(&self.peer, &pending.options) {
            Some(connection) => Ok(connection),
            None => Err(Error::AllDialsFailed(pending.error)),
        };
        self.respond(request_id, pending.tx, result);
    }

    /// Fail all requests with `error`.
    fn fail_all(&mut self, error: Error) {
        for (request_id, request) in std::mem::take(&mut self.resolving) {
            self.respond(request_id, request.tx, Err(error.clone()));
        }

        for (request_id, pending) in std::mem::take(&mut self.pending) {
            self.respond(request_id, pending.tx, Err(error.clone()));
        }
    }

    /// Account for dials that lost the race against a dial that connected.
    ///
    /// Dials of a worker that never connected were abandoned by their callers and say nothing
    /// about the address, neither do dials that were still waiting for admission.
    fn abandon_dials(&mut self) {
        if !self.context.record_abandoned_dials || !self.connected {
            return;
        }

        for (address, state) in &self.addresses {
            if std::matches!(state.status, AddressStatus::InFlight) &&
                state.dialing.load(Ordering::Acquire)
            {
                tracing::trace!(target: LOG_TARGET, peer = ?self.peer, ?address, "dial abandoned");
                self.context.black_holes.record_result(address, false);
            }
        }
    }

    /// Run the event loop of the worker.
    pub(crate) async fn run(mut self) {
        let shutdown = self.context.shutdown.clone();
        let sleep = tokio::time::sleep_until(self.started);
        tokio::pin!(sleep);

        loop {
            if let Some(deadline) = self.next_dial {
                sleep.as_mut().reset(deadline);
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(
                        target: LOG_TARGET,
                        peer = ?self.peer,
                        "dialer closed, stopping worker",
                    );
                    return self.fail_all(Error::DialerClosed);
                }
                command = self.rx.recv() => match command {
                    Some(WorkerCommand::Dial { request_id, options, tx }) =>
                        self.on_dial_request(request_id, options, tx),
                    Some(WorkerCommand::Cancel { request_id }) => self.on_cancel(request_id),
                    None => {
                        tracing::trace!(
                            target: LOG_TARGET,
                            peer = ?self.peer,
                            "no more requests, stopping worker",
                        );

                        self.abandon_dials();
                        return self.fail_all(Error::Cancelled);
                    }
                },
                Some((request_id, addresses)) = self.resolutions.next() =>
                    self.on_addresses_resolved(request_id, addresses),
                Some((address, result)) = self.dials.next() => self.on_dial_result(address, result),
                _ = &mut sleep, if self.next_dial.is_some() => {
                    self.next_dial = None;
                    self.on_dial_timer();
                }
            }
        }
    }
}
