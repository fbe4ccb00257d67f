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

#![allow(clippy::enum_variant_names)]

//! Errors returned by the dialer.

use crate::peer_id::PeerId;

use multiaddr::Multiaddr;

use std::{
    fmt,
    io::{self, ErrorKind},
};

/// Maximum number of per-address errors kept in a [`DialError`].
const MAX_DIAL_ERRORS: usize = 16;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Tried to dial self")]
    TriedToDialSelf,
    #[error("Dial backoff")]
    DialBackoff,
    #[error("Dial refused because of black hole")]
    BlackHoled,
    #[error("No addresses for `{0}`")]
    NoAddresses(PeerId),
    #[error("No good addresses for `{0}`")]
    NoGoodAddresses(PeerId),
    #[error("All dials failed: {0}")]
    AllDialsFailed(DialError),
    #[error("Dial cancelled")]
    Cancelled,
    #[error("Dialer closed")]
    DialerClosed,
    #[error("Gater disallows connection to `{0}`")]
    GaterDisallowedConnection(PeerId),
    #[error("Only a transient connection to `{0}` exists")]
    TransientConnection(PeerId),
    #[error("No usable connection to `{0}` and dialing not allowed")]
    NoUsableConnection(PeerId),
    #[error("Dialed `{expected}` but connected to `{actual}`")]
    PeerIdMismatch { expected: PeerId, actual: PeerId },
    #[error("Transport not supported: `{0}`")]
    TransportNotSupported(Multiaddr),
    #[error("Operation timed out")]
    Timeout,
    #[error("DNS address resolution failed")]
    DnsAddressResolutionFailed,
    #[error("Transport error: `{0}`")]
    TransportError(String),
    #[error("I/O error: `{0}`")]
    IoError(ErrorKind),
    #[error("Essential task closed")]
    EssentialTaskClosed,
    #[error("Invalid data")]
    InvalidData,
    #[error("Other error occurred: `{0}`")]
    Other(String),
}

impl Error {
    /// Returns `true` if the error was caused by the caller giving up rather than the peer
    /// being unreachable.
    pub fn is_cancelled(&self) -> bool {
        std::matches!(self, Error::Cancelled)
    }

    /// Returns `true` if the error carries no signal about the reachability of the address.
    ///
    /// Such errors are never recorded into dial backoff or the black hole filters.
    pub(crate) fn is_local_refusal(&self) -> bool {
        std::matches!(
            self,
            Error::Cancelled | Error::BlackHoled | Error::DialBackoff | Error::DialerClosed
        )
    }
}

/// Aggregated error for a dial request, one entry per address that was tried.
#[derive(Debug, Clone)]
pub struct DialError {
    /// Peer that was dialed.
    pub peer: PeerId,

    /// Errors of the individual addresses.
    pub errors: Vec<(Multiaddr, Error)>,

    /// Number of address errors that didn't fit into `errors`.
    pub skipped: usize,
}

impl DialError {
    /// Create new empty [`DialError`] for `peer`.
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            errors: Vec::new(),
            skipped: 0usize,
        }
    }

    /// Record failure of `address`.
    pub(crate) fn record(&mut self, address: Multiaddr, error: Error) {
        if self.errors.len() >= MAX_DIAL_ERRORS {
            self.skipped += 1;
            return;
        }

        self.errors.push((address, error));
    }

    /// Total number of addresses that failed.
    pub fn len(&self) -> usize {
        self.errors.len() + self.skipped
    }

    /// Check if no address errors were recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if every recorded address was skipped because of dial backoff.
    pub fn is_backoff_only(&self) -> bool {
        !self.errors.is_empty() &&
            self.errors.iter().all(|(_, error)| std::matches!(error, Error::DialBackoff))
    }
}

impl fmt::Display for DialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to dial {}:", self.peer)?;

        for (address, error) in &self.errors {
            write!(f, "\n  * [{address}] {error}")?;
        }

        if self.skipped > 0 {
            write!(f, "\n    ... skipping {} errors ...", self.skipped)?;
        }

        Ok(())
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        Error::IoError(error.kind())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::EssentialTaskClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::EssentialTaskClosed
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl From<hickory_resolver::ResolveError> for Error {
    fn from(_: hickory_resolver::ResolveError) -> Self {
        Error::DnsAddressResolutionFailed
    }
}
