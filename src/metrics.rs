// Copyright 2020 Parity Technologies (UK) Ltd.
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

//! Metrics exposed by the dialer.
//!
//! Contains the traits that are used to define and interact with metrics and
//! [`DialerMetrics`], the set of metrics registered by the dialer.

use crate::{utils::futures_stream::FuturesStream, Error};

use futures::{Stream, StreamExt};

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

pub type MetricCounter = Arc<dyn MetricCounterT>;

pub type MetricGauge = Arc<dyn MetricGaugeT>;

pub type MetricsRegistry = Arc<dyn MetricsRegistryT>;

/// Represents a metric that can only go up.
pub trait MetricCounterT: Send + Sync {
    /// Increment the counter by `value`.
    fn inc(&self, value: u64);
}

/// Represents a metric that can arbitrarily go up and down.
pub trait MetricGaugeT: Send + Sync {
    /// Set the gauge to `value`.
    fn set(&self, value: u64);

    /// Increment the gauge.
    fn inc(&self);

    /// Decrement the gauge.
    fn dec(&self);

    /// Add `value` to the gauge.
    fn add(&self, value: u64);

    /// Subtract `value` from the gauge.
    fn sub(&self, value: u64);
}

impl std::fmt::Debug for dyn MetricCounterT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MetricCounter")
    }
}

impl std::fmt::Debug for dyn MetricGaugeT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MetricGauge")
    }
}

/// A registry for metrics.
pub trait MetricsRegistryT: Send + Sync {
    /// Register a new counter.
    fn register_counter(&self, name: String, help: String) -> Result<MetricCounter, Error>;

    /// Register a new gauge.
    fn register_gauge(&self, name: String, help: String) -> Result<MetricGauge, Error>;
}

/// Metrics registered by the dialer.
#[derive(Debug, Clone)]
pub struct DialerMetrics {
    /// Number of address dials started.
    pub dials_started: MetricCounter,

    /// Number of address dials that produced a connection.
    pub dials_succeeded: MetricCounter,

    /// Number of address dials that failed.
    pub dials_failed: MetricCounter,

    /// Number of address dials currently in flight.
    pub dials_in_flight: MetricGauge,

    /// Number of peers with an active dial worker.
    pub active_workers: MetricGauge,

    /// Ranking delay, in milliseconds, of the address that produced the most recent
    /// first connection of a worker.
    pub dial_ranking_delay: MetricGauge,

    /// State of the UDP black hole filter (0 probing, 1 allowed, 2 blocked).
    pub black_hole_udp: MetricGauge,

    /// State of the IPv6 black hole filter (0 probing, 1 allowed, 2 blocked).
    pub black_hole_ipv6: MetricGauge,
}

impl DialerMetrics {
    /// Register the dialer metrics in `registry`.
    pub fn new(registry: &MetricsRegistry) -> Result<Self, Error> {
        Ok(Self {
            dials_started: registry.register_counter(
                "litep2p_dialer_dials_started".into(),
                "Number of address dials started".into(),
            )?,
            dials_succeeded: registry.register_counter(
                "litep2p_dialer_dials_succeeded".into(),
                "Number of address dials that produced a connection".into(),
            )?,
            dials_failed: registry.register_counter(
                "litep2p_dialer_dials_failed".into(),
                "Number of address dials that failed".into(),
            )?,
            dials_in_flight: registry.register_gauge(
                "litep2p_dialer_dials_in_flight".into(),
                "Number of address dials in flight".into(),
            )?,
            active_workers: registry.register_gauge(
                "litep2p_dialer_active_workers".into(),
                "Number of peers being dialed".into(),
            )?,
            dial_ranking_delay: registry.register_gauge(
                "litep2p_dialer_dial_ranking_delay_ms".into(),
                "Ranking delay of the address that connected first".into(),
            )?,
            black_hole_udp: registry.register_gauge(
                "litep2p_dialer_black_hole_udp_state".into(),
                "State of the UDP black hole filter".into(),
            )?,
            black_hole_ipv6: registry.register_gauge(
                "litep2p_dialer_black_hole_ipv6_state".into(),
                "State of the IPv6 black hole filter".into(),
            )?,
        })
    }
}

/// A scope for metrics that modifies a provided gauge in an RAII fashion.
///
/// The gauge is incremented when constructed and decremented when the object is dropped.
#[derive(Clone)]
pub struct ScopeGaugeMetric {
    inner: MetricGauge,
}

impl ScopeGaugeMetric {
    /// Create a new [`ScopeGaugeMetric`].
    pub fn new(inner: MetricGauge) -> Self {
        inner.inc();
        ScopeGaugeMetric { inner }
    }
}

impl Drop for ScopeGaugeMetric {
    fn drop(&mut self) {
        self.inner.dec();
    }
}

/// Wrapper around [`FuturesStream`] that provides information to the given metric.
#[derive(Default)]
pub struct MeteredFuturesStream<F> {
    stream: FuturesStream<F>,
    metric: Option<MetricGauge>,
}

impl<F> MeteredFuturesStream<F> {
    pub fn new(metric: Option<MetricGauge>) -> Self {
        MeteredFuturesStream {
            stream: FuturesStream::new(),
            metric,
        }
    }

    pub fn push(&mut self, future: F) {
        if let Some(ref metric) = self.metric {
            metric.inc();
        }

        self.stream.push(future);
    }

    /// Number of futures in the stream.
    pub fn len(&self) -> usize {
        self.stream.len()
    }

    /// Returns `true` if the stream is empty.
    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }
}

impl<F: Future> Stream for MeteredFuturesStream<F> {
    type Item = <F as Future>::Output;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let result = self.stream.poll_next_unpin(cx);
        if result.is_ready() {
            if let Some(ref metric) = self.metric {
                metric.dec();
            }
        }
        result
    }
}

impl<F> Drop for MeteredFuturesStream<F> {
    fn drop(&mut self) {
        if let Some(ref metric) = self.metric {
            metric.sub(self.len() as u64);
        }
    }
}
