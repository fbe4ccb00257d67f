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

use crate::{dialer::resolver::Resolver, Error};

use multiaddr::Multiaddr;
use parking_lot::Mutex;

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Resolver answering from a fixed table.
///
/// Addresses missing from the table fail to resolve.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: Mutex<HashMap<Multiaddr, Vec<Multiaddr>>>,
    calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `address` into `resolved`.
    pub fn insert(&self, address: Multiaddr, resolved: Vec<Multiaddr>) {
        self.entries.lock().insert(address, resolved);
    }

    /// Number of `resolve()` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, address: &Multiaddr) -> crate::Result<Vec<Multiaddr>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().get(address).cloned().ok_or(Error::DnsAddressResolutionFailed)
    }
}
