// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The error hierarchy used across the header-handling and loss-recovery
//! core: wire-visible QUIC errors, a transient "drop this datagram"
//! signal, and a fatal internal-invariant class for programmer errors.

use std::fmt::{self, Display, Formatter};

/// A transport error code that, on the wire, would be carried in a
/// `CONNECTION_CLOSE` frame. Only the two codes this core can itself
/// raise are modeled; frame-level and flow-control codes belong to the
/// layers that actually parse frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuicTransportError {
    VersionNegotiation,
    ProtocolViolation,
}

impl QuicTransportError {
    /// The numeric transport error code, as it would appear on the wire.
    #[must_use]
    pub const fn code(self) -> u64 {
        match self {
            // QUIC has no dedicated "bad version" code; servers that can't
            // negotiate a version respond out-of-band with a Version
            // Negotiation packet instead of a CONNECTION_CLOSE, but callers
            // still need a typed signal to trigger that response.
            Self::VersionNegotiation => 0x01,
            Self::ProtocolViolation => 0x0a,
        }
    }
}

impl Display for QuicTransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionNegotiation => write!(f, "version negotiation required"),
            Self::ProtocolViolation => write!(f, "protocol violation"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Surfaced on the wire as a `CONNECTION_CLOSE`.
    Quic(QuicTransportError),
    /// Drop the datagram, keep the connection: not fatal.
    IgnorePacket,
    /// A programmer error: a precondition this core maintains internally
    /// was violated (double insertion of a packet number, an alarm armed
    /// with nothing outstanding, ...). Callers should treat this as fatal.
    Internal(&'static str),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quic(e) => write!(f, "{e}"),
            Self::IgnorePacket => write!(f, "packet ignored"),
            Self::Internal(msg) => write!(f, "internal invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<QuicTransportError> for Error {
    fn from(e: QuicTransportError) -> Self {
        Self::Quic(e)
    }
}

pub type Res<T> = Result<T, Error>;
