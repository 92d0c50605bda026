// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Correlated request/reply channel for remoted driver calls
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module + `tests/channel.rs` + `tests/config_file.rs`
//!
//! PUBLIC API:
//!   - DatagramTransport trait: tagged, unicast datagrams with learnable sender addresses
//!   - LoopbackBus / LoopbackEndpoint: in-process transport
//!   - UnixEndpoint: unix datagram socket transport (tag carried in a 4-byte header)
//!   - CorrelationTable: fixed-capacity slot ring matching replies to requests
//!   - CallerChannel / WorkerChannel: the two ends of one remoting channel
//!   - KapiConfig: TOML configuration
//!   - Wait enum / IpcError: transport wait behaviour and errors
//!
//! DEPENDENCIES:
//!   - std::sync::mpsc: loopback backend queues
//!   - parking_lot: slot locks and condition variables
//!   - kapi-wire: reply frames
//!   - serde + toml: configuration

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use core::fmt;
use core::time::Duration;
use std::io;

/// Result type returned by transport operations.
pub type Result<T> = core::result::Result<T, IpcError>;

/// Behaviour of a blocking call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Blocking,
    /// Return immediately if no progress can be made.
    NonBlocking,
    /// Block until either the operation completes or the timeout expires.
    Timeout(Duration),
}

impl Wait {
    /// Returns `true` when the caller requested a non-blocking attempt.
    pub const fn is_non_blocking(self) -> bool {
        matches!(self, Self::NonBlocking)
    }

    /// Converts a [`Wait::Timeout`] variant into its [`Duration`].
    pub const fn timeout(self) -> Option<Duration> {
        match self {
            Self::Timeout(duration) => Some(duration),
            Self::Blocking | Self::NonBlocking => None,
        }
    }
}

/// Errors produced by the transport layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpcError {
    /// Operation could not progress without blocking.
    WouldBlock,
    /// The caller exceeded the requested timeout.
    Timeout,
    /// The opposite endpoint disconnected.
    Disconnected,
    /// The peer address has not been learned yet; retry after the worker announces itself.
    NotConnected,
    /// Datagram exceeds the configured maximum.
    TooLarge,
    /// Host socket failure.
    Io(io::ErrorKind),
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldBlock => write!(f, "operation would block"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::Disconnected => write!(f, "peer disconnected"),
            Self::NotConnected => write!(f, "peer address not learned yet"),
            Self::TooLarge => write!(f, "datagram too large"),
            Self::Io(kind) => write!(f, "socket error: {kind}"),
        }
    }
}

impl std::error::Error for IpcError {}

impl From<io::Error> for IpcError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotFound => Self::Disconnected,
            kind => Self::Io(kind),
        }
    }
}

impl IpcError {
    /// True for errors a receive loop should simply retry.
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::WouldBlock | Self::Timeout)
    }
}

/// One received datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram<A> {
    /// Sender address, usable as a reply destination.
    pub from: A,
    /// Correlation tag; opaque to the transport.
    pub tag: u32,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

/// Duplex, message-oriented transport with a per-message tag.
///
/// Ordering between datagrams is not guaranteed.
pub trait DatagramTransport: Send + Sync {
    /// Peer address type.
    type Addr: Clone + Eq + fmt::Debug + Send + Sync;

    /// Sends `payload` tagged with `tag` to `to`.
    fn send_to(&self, to: &Self::Addr, tag: u32, payload: &[u8]) -> Result<()>;

    /// Receives the next datagram.
    fn recv_from(&self, wait: Wait) -> Result<Datagram<Self::Addr>>;

    /// Largest payload accepted by `send_to`.
    fn max_payload(&self) -> usize;
}

mod channel;
mod config;
mod loopback;
mod slots;
mod unix;

pub use channel::{CallerChannel, ChannelError, WorkerChannel, ANNOUNCE_INTERVAL};
pub use config::{ChannelSection, ConfigError, KapiConfig, SocketSection, WorkerSection};
pub use loopback::{LoopbackBus, LoopbackEndpoint, PeerId};
pub use slots::{CorrelationError, CorrelationTable, PendingState, SlotPhase};
pub use unix::UnixEndpoint;
