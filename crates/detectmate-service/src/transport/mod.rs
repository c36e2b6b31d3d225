//! Message socket abstraction for the engine and manager channels.
//!
//! The runtime depends only on the [`MessageSocket`] capability and on the
//! two factory traits; the stream-backed implementations in this module cover
//! the ipc and tcp transports. Payloads travel as length-prefixed frames so
//! the byte-stream transports stay message-oriented.

mod dialer;
mod errors;
pub mod frame;
mod listener;
mod socket;
mod stream;
#[cfg(test)]
pub(crate) mod test_utils;

pub use self::errors::SocketError;
pub use self::socket::{
    DialOptions, EngineSocketFactory, ManagerSocketFactory, MessageSocket,
    StreamEngineSocketFactory, StreamManagerSocketFactory,
};

pub(crate) const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

use std::time::Duration;

/// Pause between accept attempts while waiting for a peer.
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
/// Pause between dial attempts for output peers.
pub(crate) const DIAL_BACKOFF: Duration = Duration::from_millis(150);
/// Upper bound for one blocking read slice; close is observed in between.
pub(crate) const READ_SLICE: Duration = Duration::from_millis(25);
