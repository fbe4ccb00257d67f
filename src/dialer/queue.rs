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

//! Delay-ordered queue of addresses waiting to be dialed.

use crate::dialer::ranker::AddressDelay;

use std::time::Duration;

/// Queue of addresses ordered by ascending dial delay.
///
/// Entries with equal delays keep their insertion order. A worker holds tens of addresses at
/// most so a sorted vector is enough.
#[derive(Debug, Default)]
pub struct DialQueue {
    queue: Vec<AddressDelay>,
}

impl DialQueue {
    /// Create new [`DialQueue`].
    pub fn new() -> Self {
        Self { queue: Vec::new() }
    }

    /// Add `entry` to the queue.
    ///
    /// If the address is already queued with a different delay, the old entry is replaced.
    pub fn add(&mut self, entry: AddressDelay) {
        if let Some(index) = self.queue.iter().position(|queued| queued.address == entry.address) {
            if self.queue[index].delay == entry.delay {
                return;
            }
            self.queue.remove(index);
        }

        let index = self
            .queue
            .iter()
            .position(|queued| queued.delay > entry.delay)
            .unwrap_or(self.queue.len());
        self.queue.insert(index, entry);
    }

    /// Pop all entries sharing the smallest delay.
    pub fn next_batch(&mut self) -> Vec<AddressDelay> {
        let Some(delay) = self.peek_delay() else {
            return Vec::new();
        };

        let count = self.queue.iter().take_while(|entry| entry.delay == delay).count();
        self.queue.drain(..count).collect()
    }

    /// Get the smallest delay in the queue.
    pub fn peek_delay(&self) -> Option<Duration> {
        self.queue.first().map(|entry| entry.delay)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
