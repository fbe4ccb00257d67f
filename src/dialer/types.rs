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

//! Dial request types.

use crate::{transport::Connection, types::RequestId};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use std::{sync::Arc, time::Duration};

/// Policy flags of a [`connect()`](`crate::dialer::Dialer::connect`) call.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// Only accept direct connections, relayed connections and proxy transports are ignored.
    ///
    /// Force-direct dials also ignore dial backoff.
    pub force_direct: bool,

    /// Accept an existing transient connection.
    pub allow_transient: bool,

    /// Don't dial, fail unless a usable connection already exists.
    pub no_dial: bool,

    /// Both ends are dialing each other, dial all addresses at once.
    pub simultaneous_connect: bool,

    /// Cancellation token of the caller.
    pub cancel: Option<CancellationToken>,

    /// Timeout of the call, overriding the configured one.
    pub timeout: Option<Duration>,
}

impl DialOptions {
    /// Create new default [`DialOptions`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept direct connections.
    pub fn with_force_direct(mut self, force_direct: bool) -> Self {
        self.force_direct = force_direct;
        self
    }

    /// Accept transient connections.
    pub fn with_allow_transient(mut self, allow_transient: bool) -> Self {
        self.allow_transient = allow_transient;
        self
    }

    /// Fail instead of dialing.
    pub fn with_no_dial(mut self, no_dial: bool) -> Self {
        self.no_dial = no_dial;
        self
    }

    /// Dial all addresses at once.
    pub fn with_simultaneous_connect(mut self, simultaneous_connect: bool) -> Self {
        self.simultaneous_connect = simultaneous_connect;
        self
    }

    /// Cancel the call when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Fail the call with [`Error::Timeout`](`crate::Error::Timeout`) after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Response channel of a dial request.
pub(crate) type ResponseSender = oneshot::Sender<crate::Result<Arc<dyn Connection>>>;

/// Commands sent to a dial worker.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    /// Connect to the worker's peer.
    Dial {
        /// Request ID.
        request_id: RequestId,

        /// Policy flags.
        options: DialOptions,

        /// Response channel.
        tx: ResponseSender,
    },

    /// Caller is no longer interested in the result of the request.
    Cancel {
        /// Request ID.
        request_id: RequestId,
    },
}
