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

//! Dial backoff.
//!
//! Addresses that failed to connect are not dialed again until their backoff window elapses.
//! The window grows quadratically with the number of consecutive failures and is capped.

use crate::PeerId;

use multiaddr::Multiaddr;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use std::{collections::HashMap, sync::Arc, time::Duration};

/// Logging target for the file.
const LOG_TARGET: &str = "litep2p::dialer::backoff";

/// Backoff after the first failure.
const BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Growth coefficient of the backoff.
const BACKOFF_COEFFICIENT: Duration = Duration::from_secs(1);

/// Maximum backoff.
const BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);

/// Backoff timing.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Backoff after the first failure.
    pub base: Duration,

    /// Growth coefficient, multiplied by the square of the number of failures.
    pub coefficient: Duration,

    /// Maximum backoff, also the interval of the cleanup sweep.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: BACKOFF_BASE,
            coefficient: BACKOFF_COEFFICIENT,
            max: BACKOFF_MAX,
        }
    }
}

impl BackoffConfig {
    /// Length of the backoff window after `tries` failures.
    fn backoff_time(&self, tries: u32) -> Duration {
        self.coefficient
            .checked_mul(tries.saturating_mul(tries))
            .and_then(|growth| self.base.checked_add(growth))
            .map_or(self.max, |backoff| std::cmp::min(backoff, self.max))
    }
}

#[derive(Debug, Clone, Copy)]
struct BackoffEntry {
    /// Number of recorded failures.
    tries: u32,

    /// Instant until which the address is not dialed.
    until: Instant,
}

/// Backoff table shared by all dial workers.
#[derive(Debug)]
pub struct DialBackoff {
    /// Timing configuration.
    config: BackoffConfig,

    /// Backoff entries.
    entries: Mutex<HashMap<PeerId, HashMap<Multiaddr, BackoffEntry>>>,
}

impl DialBackoff {
    /// Create new [`DialBackoff`].
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `address` of `peer` is currently backed off.
    pub fn is_backed_off(&self, peer: &PeerId, address: &Multiaddr) -> bool {
        let now = Instant::now();

        self.entries
            .lock()
            .get(peer)
            .and_then(|addresses| addresses.get(address))
            .is_some_and(|entry| now < entry.until)
    }

    /// Record a failed dial of `address`.
    pub fn add_failure(&self, peer: PeerId, address: Multiaddr) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let addresses = entries.entry(peer).or_default();

        match addresses.get_mut(&address) {
            None => {
                tracing::trace!(
                    target: LOG_TARGET,
                    ?peer,
                    ?address,
                    backoff = ?self.config.base,
                    "backing off address",
                );

                addresses.insert(
                    address,
                    BackoffEntry {
                        tries: 1u32,
                        until: now + self.config.base,
                    },
                );
            }
            Some(entry) => {
                let backoff = self.config.backoff_time(entry.tries);

                tracing::trace!(
                    target: LOG_TARGET,
                    ?peer,
                    ?address,
                    tries = entry.tries,
                    ?backoff,
                    "extending address backoff",
                );

                entry.until = std::cmp::max(entry.until, now + backoff);
                entry.tries = entry.tries.saturating_add(1);
            }
        }
    }

    /// Forget all backoffs of `peer`.
    pub fn clear(&self, peer: &PeerId) {
        if self.entries.lock().remove(peer).is_some() {
            tracing::trace!(target: LOG_TARGET, ?peer, "backoff cleared");
        }
    }

    /// Remove peers none of whose entries would still be relevant for another backoff window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();

        entries.retain(|_, addresses| {
            addresses
                .values()
                .any(|entry| now < entry.until + self.config.backoff_time(entry.tries))
        });

        tracing::trace!(
            target: LOG_TARGET,
            removed = before - entries.len(),
            remaining = entries.len(),
            "backoff cleanup",
        );
    }

    /// Run the periodic cleanup sweep until `shutdown` is cancelled.
    pub(crate) async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let period = if self.config.max.is_zero() {
            BACKOFF_MAX
        } else {
            self.config.max
        };
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: LOG_TARGET, "stopping backoff cleanup");
                    return
                }
                _ = interval.tick() => self.cleanup(),
            }
        }
    }

    #[cfg(test)]
    fn entry(&self, peer: &PeerId, address: &Multiaddr) -> Option<BackoffEntry> {
        self.entries.lock().get(peer).and_then(|addresses| addresses.get(address)).copied()
    }

    #[cfg(test)]
    fn peer_count(&self) -> usize {
        self.entries.lock().len()
    }
}
