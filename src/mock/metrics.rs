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

//! In-memory metrics registry.

use crate::{
    metrics::{MetricCounter, MetricCounterT, MetricGauge, MetricGaugeT, MetricsRegistryT},
    Error,
};

use parking_lot::Mutex;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

struct TestCounter(Arc<AtomicU64>);

impl MetricCounterT for TestCounter {
    fn inc(&self, value: u64) {
        self.0.fetch_add(value, Ordering::SeqCst);
    }
}

struct TestGauge(Arc<AtomicU64>);

impl MetricGaugeT for TestGauge {
    fn set(&self, value: u64) {
        self.0.store(value, Ordering::SeqCst);
    }

    fn inc(&self) {
        self.add(1);
    }

    fn dec(&self) {
        self.sub(1);
    }

    fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::SeqCst);
    }

    fn sub(&self, value: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(value))
            });
    }
}

/// Registry that keeps metric values in memory so tests can inspect them.
#[derive(Default)]
pub struct TestRegistry {
    metrics: Mutex<HashMap<String, Arc<AtomicU64>>>,
}

impl TestRegistry {
    /// Create new [`TestRegistry`].
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get current value of metric `name`.
    pub fn value(&self, name: &str) -> Option<u64> {
        self.metrics.lock().get(name).map(|value| value.load(Ordering::SeqCst))
    }

    fn register(&self, name: String) -> Result<Arc<AtomicU64>, Error> {
        let mut metrics = self.metrics.lock();

        if metrics.contains_key(&name) {
            return Err(Error::Other(format!("metric `{name}` already registered")));
        }

        let value = Arc::new(AtomicU64::new(0));
        metrics.insert(name, value.clone());

        Ok(value)
    }
}

impl MetricsRegistryT for TestRegistry {
    fn register_counter(&self, name: String, _help: String) -> Result<MetricCounter, Error> {
        Ok(Arc::new(TestCounter(self.register(name)?)))
    }

    fn register_gauge(&self, name: String, _help: String) -> Result<MetricGauge, Error> {
        Ok(Arc::new(TestGauge(self.register(name)?)))
    }
}
