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

//! Black hole detection for UDP and IPv6.
//!
//! Networks where all UDP or IPv6 traffic is silently dropped are common. Dialing addresses of
//! such a family would only ever time out, so each monitored family keeps a sliding window of
//! recent dial outcomes and stops admitting addresses of the family once the success rate of
//! the window falls below a threshold. Every `n`th request is let through while blocked so the
//! filter notices when the network recovers.

use crate::{dialer::address, metrics::MetricGauge};

use multiaddr::Multiaddr;
use parking_lot::Mutex;

use std::collections::VecDeque;

/// Logging target for the file.
const LOG_TARGET: &str = "litep2p::dialer::black-hole";

/// Default window size.
const DEFAULT_WINDOW_SIZE: usize = 100;

/// Default minimum number of successes in a full window.
const DEFAULT_MIN_SUCCESSES: usize = 5;

/// State of a [`BlackHoleFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlackHoleState {
    /// Not enough outcomes recorded, all dials are allowed.
    Probing,

    /// Enough successes in the window, all dials are allowed.
    Allowed,

    /// Too few successes in the window, dials are refused.
    Blocked,
}

impl BlackHoleState {
    fn as_metric(&self) -> u64 {
        match self {
            BlackHoleState::Probing => 0,
            BlackHoleState::Allowed => 1,
            BlackHoleState::Blocked => 2,
        }
    }
}

/// Configuration of a [`BlackHoleFilter`].
#[derive(Debug, Clone)]
pub struct BlackHoleConfig {
    /// Name of the monitored family, used in logs.
    pub name: &'static str,

    /// Size of the outcome window.
    pub n: usize,

    /// Minimum number of successes in a full window for the family to be allowed.
    pub min_successes: usize,
}

impl BlackHoleConfig {
    /// Default configuration for the UDP filter.
    pub fn udp() -> Self {
        Self {
            name: "UDP",
            n: DEFAULT_WINDOW_SIZE,
            min_successes: DEFAULT_MIN_SUCCESSES,
        }
    }

    /// Default configuration for the IPv6 filter.
    pub fn ipv6() -> Self {
        Self {
            name: "IPv6",
            n: DEFAULT_WINDOW_SIZE,
            min_successes: DEFAULT_MIN_SUCCESSES,
        }
    }
}

#[derive(Debug)]
struct FilterInner {
    /// Outcomes of the most recent dials, oldest first.
    window: VecDeque<bool>,

    /// Number of `true` entries in `window`.
    successes: usize,

    /// Number of admission requests handled.
    requests: usize,

    /// Current state.
    state: BlackHoleState,
}

/// Adaptive gate for one address family.
#[derive(Debug)]
pub struct BlackHoleFilter {
    /// Configuration.
    config: BlackHoleConfig,

    /// Mutable state.
    inner: Mutex<FilterInner>,

    /// State metric, if enabled.
    metric: Option<MetricGauge>,
}

impl BlackHoleFilter {
    /// Create new [`BlackHoleFilter`].
    pub fn new(config: BlackHoleConfig, metric: Option<MetricGauge>) -> Self {
        // a zero-sized window would block on the first admission
        let config = BlackHoleConfig {
            n: config.n.max(1),
            ..config
        };

        if let Some(ref metric) = metric {
            metric.set(BlackHoleState::Probing.as_metric());
        }

        Self {
            inner: Mutex::new(FilterInner {
                window: VecDeque::with_capacity(config.n),
                successes: 0usize,
                requests: 0usize,
                state: BlackHoleState::Probing,
            }),
            config,
            metric,
        }
    }

    /// Get name of the monitored family.
    pub fn name(&self) -> &'static str {
        self.config.name
    }

    /// Get current state.
    pub fn state(&self) -> BlackHoleState {
        self.inner.lock().state
    }

    /// Record outcome of a dial.
    pub fn record(&self, success: bool) {
        let mut inner = self.inner.lock();
        let previous = inner.state;

        if inner.state == BlackHoleState::Blocked && success {
            inner.window.clear();
            inner.successes = 0usize;
            inner.requests = 0usize;
            inner.state = BlackHoleState::Probing;
        } else {
            inner.window.push_back(success);
            if success {
                inner.successes += 1;
            }

            if inner.window.len() > self.config.n {
                if let Some(true) = inner.window.pop_front() {
                    inner.successes -= 1;
                }
            }

            inner.state = if inner.window.len() < self.config.n {
                BlackHoleState::Probing
            } else if inner.successes >= self.config.min_successes {
                BlackHoleState::Allowed
            } else {
                BlackHoleState::Blocked
            };
        }

        if previous != inner.state {
            self.on_state_change(previous, &inner);
        }
    }

    /// Decide whether a dial of the monitored family may proceed.
    pub fn admit(&self) -> BlackHoleState {
        let mut inner = self.inner.lock();
        inner.requests = inner.requests.wrapping_add(1);

        match inner.state {
            BlackHoleState::Allowed => BlackHoleState::Allowed,
            BlackHoleState::Probing => BlackHoleState::Probing,
            BlackHoleState::Blocked if inner.requests % self.config.n == 0 => {
                tracing::trace!(
                    target: LOG_TARGET,
                    family = self.config.name,
                    requests = inner.requests,
                    "probing blocked family",
                );
                BlackHoleState::Probing
            }
            BlackHoleState::Blocked => BlackHoleState::Blocked,
        }
    }

    fn on_state_change(&self, previous: BlackHoleState, inner: &FilterInner) {
        match inner.state {
            BlackHoleState::Blocked => tracing::warn!(
                target: LOG_TARGET,
                family = self.config.name,
                successes = inner.successes,
                window = inner.window.len(),
                "black hole detected, refusing dials",
            ),
            state => tracing::info!(
                target: LOG_TARGET,
                family = self.config.name,
                ?previous,
                ?state,
                successes = inner.successes,
                "black hole filter state changed",
            ),
        }

        if let Some(ref metric) = self.metric {
            metric.set(inner.state.as_metric());
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Vec<bool>, usize, usize) {
        let inner = self.inner.lock();
        (
            inner.window.iter().copied().collect(),
            inner.successes,
            inner.requests,
        )
    }
}

/// Black hole filters for UDP and IPv6 addresses.
///
/// Only public addresses are subject to black hole detection.
#[derive(Debug, Default)]
pub struct BlackHoleDetector {
    /// UDP filter, if enabled.
    udp: Option<BlackHoleFilter>,

    /// IPv6 filter, if enabled.
    ipv6: Option<BlackHoleFilter>,
}

impl BlackHoleDetector {
    /// Create new [`BlackHoleDetector`].
    pub fn new(udp: Option<BlackHoleFilter>, ipv6: Option<BlackHoleFilter>) -> Self {
        Self { udp, ipv6 }
    }

    /// Get UDP filter.
    pub fn udp(&self) -> Option<&BlackHoleFilter> {
        self.udp.as_ref()
    }

    /// Get IPv6 filter.
    pub fn ipv6(&self) -> Option<&BlackHoleFilter> {
        self.ipv6.as_ref()
    }

    /// Filter out addresses of blocked families.
    ///
    /// Each filter handles at most one admission request per call. An address of a family
    /// that is being probed is kept regardless of the state of the other family.
    ///
    /// Returns the kept addresses and the addresses refused because of a black hole.
    pub fn filter_addresses(&self, addresses: Vec<Multiaddr>) -> (Vec<Multiaddr>, Vec<Multiaddr>) {
        let (has_udp, has_ipv6) = addresses
            .iter()
            .filter(|address| address::is_public(address))
            .fold((false, false), |(udp, ipv6), address| {
                (
                    udp || address::is_udp(address),
                    ipv6 || address::is_ip6(address),
                )
            });

        let udp = match (&self.udp, has_udp) {
            (Some(filter), true) => filter.admit(),
            _ => BlackHoleState::Allowed,
        };
        let ipv6 = match (&self.ipv6, has_ipv6) {
            (Some(filter), true) => filter.admit(),
            _ => BlackHoleState::Allowed,
        };

        addresses.into_iter().partition(|address| {
            if !address::is_public(address) {
                return true;
            }

            let is_udp = address::is_udp(address);
            let is_ip6 = address::is_ip6(address);

            if udp == BlackHoleState::Probing && is_udp {
                return true;
            }
            if ipv6 == BlackHoleState::Probing && is_ip6 {
                return true;
            }

            !(udp == BlackHoleState::Blocked && is_udp || ipv6 == BlackHoleState::Blocked && is_ip6)
        })
    }

    /// Record the outcome of a dial to `address`.
    pub fn record_result(&self, address: &Multiaddr, success: bool) {
        if !address::is_public(address) {
            return;
        }

        if let Some(ref filter) = self.udp {
            if address::is_udp(address) {
                filter.record(success);
            }
        }

        if let Some(ref filter) = self.ipv6 {
            if address::is_ip6(address) {
                filter.record(success);
            }
        }
    }
}
