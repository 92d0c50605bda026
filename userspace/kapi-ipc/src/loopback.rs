// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process datagram bus for host-based testing and embedding
//!
//! OWNERS: @runtime
//!
//! PUBLIC API:
//!   - LoopbackBus::new(): create a bus with a datagram size limit
//!   - LoopbackBus::endpoint(): register a new addressable endpoint
//!   - LoopbackEndpoint: DatagramTransport implementation
//!
//! ERROR CONDITIONS:
//!   - IpcError::Disconnected: destination endpoint dropped or never existed
//!   - IpcError::WouldBlock: nothing queued in non-blocking mode
//!   - IpcError::Timeout: nothing arrived before the timeout
//!   - IpcError::TooLarge: payload above the bus limit
//!
//! DEPENDENCIES:
//!   - std::sync::mpsc: per-endpoint queues
//!   - parking_lot::Mutex: registry and receiver guards

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Datagram, DatagramTransport, IpcError, Result, Wait};

/// Address of a loopback endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

struct BusInner {
    max_payload: usize,
    next_id: AtomicU64,
    peers: Mutex<HashMap<PeerId, Sender<Datagram<PeerId>>>>,
}

/// Shared registry of loopback endpoints.
#[derive(Clone)]
pub struct LoopbackBus {
    inner: Arc<BusInner>,
}

impl LoopbackBus {
    /// Creates an empty bus accepting payloads up to `max_payload` bytes.
    pub fn new(max_payload: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                max_payload,
                next_id: AtomicU64::new(1),
                peers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a fresh endpoint with a unique address.
    pub fn endpoint(&self) -> LoopbackEndpoint {
        let id = PeerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel();
        self.inner.peers.lock().insert(id, tx);
        LoopbackEndpoint { bus: Arc::clone(&self.inner), id, inbox: Mutex::new(rx) }
    }
}

/// One addressable endpoint on a [`LoopbackBus`].
pub struct LoopbackEndpoint {
    bus: Arc<BusInner>,
    id: PeerId,
    inbox: Mutex<Receiver<Datagram<PeerId>>>,
}

impl LoopbackEndpoint {
    /// This endpoint's address.
    pub fn id(&self) -> PeerId {
        self.id
    }
}

impl DatagramTransport for LoopbackEndpoint {
    type Addr = PeerId;

    fn send_to(&self, to: &PeerId, tag: u32, payload: &[u8]) -> Result<()> {
        if payload.len() > self.bus.max_payload {
            return Err(IpcError::TooLarge);
        }
        let peers = self.bus.peers.lock();
        let tx = peers.get(to).ok_or(IpcError::Disconnected)?;
        tx.send(Datagram { from: self.id, tag, payload: payload.to_vec() })
            .map_err(|_| IpcError::Disconnected)
    }

    fn recv_from(&self, wait: Wait) -> Result<Datagram<PeerId>> {
        let receiver = self.inbox.lock();
        let try_recv = |receiver: &Receiver<Datagram<PeerId>>| {
            receiver.try_recv().map_err(|err| match err {
                TryRecvError::Empty => IpcError::WouldBlock,
                TryRecvError::Disconnected => IpcError::Disconnected,
            })
        };
        match wait {
            Wait::Blocking => receiver.recv().map_err(|_| IpcError::Disconnected),
            Wait::NonBlocking => try_recv(&receiver),
            Wait::Timeout(timeout) if timeout.is_zero() => try_recv(&receiver),
            Wait::Timeout(timeout) => receiver.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => IpcError::Timeout,
                RecvTimeoutError::Disconnected => IpcError::Disconnected,
            }),
        }
    }

    fn max_payload(&self) -> usize {
        self.bus.max_payload
    }
}

impl Drop for LoopbackEndpoint {
    fn drop(&mut self) {
        self.bus.peers.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn tagged_unicast() {
        let bus = LoopbackBus::new(64);
        let a = bus.endpoint();
        let b = bus.endpoint();
        a.send_to(&b.id(), 7, b"ping").unwrap();
        let dg = b.recv_from(Wait::Blocking).unwrap();
        assert_eq!(dg, Datagram { from: a.id(), tag: 7, payload: b"ping".to_vec() });
    }

    #[test]
    fn empty_and_timeout() {
        let bus = LoopbackBus::new(64);
        let a = bus.endpoint();
        assert_eq!(a.recv_from(Wait::NonBlocking), Err(IpcError::WouldBlock));
        assert_eq!(
            a.recv_from(Wait::Timeout(Duration::from_millis(5))),
            Err(IpcError::Timeout)
        );
    }

    #[test]
    fn dropped_peer_and_size_limit() {
        let bus = LoopbackBus::new(4);
        let a = bus.endpoint();
        let gone = bus.endpoint().id();
        assert_eq!(a.send_to(&gone, 0, b""), Err(IpcError::Disconnected));
        assert_eq!(a.send_to(&a.id(), 0, b"12345"), Err(IpcError::TooLarge));
        a.send_to(&a.id(), 1, b"1234").unwrap();
        assert_eq!(a.recv_from(Wait::NonBlocking).unwrap().tag, 1);
    }
}
