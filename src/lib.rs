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
//! Given a peer and its known addresses, the [`Dialer`] resolves, filters and ranks the
//! addresses and dials them with staggered delays until one produces a connection. Concurrent
//! requests for the same peer share the dials, failed addresses are backed off and address
//! families that look black-holed stop being dialed.

pub use config::{Config, ConfigBuilder};
pub use dialer::{
    address::{AddressBook, MemoryAddressBook},
    backoff::{BackoffConfig, DialBackoff},
    black_hole::{BlackHoleConfig, BlackHoleState},
    limits::DialGater,
    registry::{ConnectionRegistry, MemoryConnectionRegistry},
    resolver::{DnsResolver, Resolver},
    DialOptions, Dialer,
};
pub use error::{DialError, Error};
pub use peer_id::PeerId;
pub use types::{ConnectionId, RequestId};

pub mod config;
pub mod dialer;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod peer_id;
pub mod transport;
pub mod types;

mod utils;

#[cfg(test)]
mod mock;

/// Public result type used by the crate.
pub type Result<T> = std::result::Result<T, error::Error>;
