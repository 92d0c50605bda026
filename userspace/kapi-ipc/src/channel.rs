// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Caller and worker ends of a remoting channel
//!
//! OWNERS: @runtime
//!
//! PUBLIC API:
//!   - CallerChannel::start(): spawn the receive thread over a transport
//!   - CallerChannel::call_sync() / call_async(): reserve a slot, send the tagged request
//!   - CallerChannel::wait_for_peer(): block until the worker announced itself
//!   - WorkerChannel::announce(): startup ping that lets the caller learn the worker address
//!   - WorkerChannel::announce_until(): retry the ping with backoff until the caller is up
//!   - WorkerChannel::serve() / serve_one(): receive, dispatch, reply with the echoed tag
//!
//! ERROR CONDITIONS:
//!   - IpcError::NotConnected: request issued before the worker announced itself (retryable)
//!   - CorrelationError::TableFull: too many calls in flight
//!   - CorrelationError::Timeout: sync reply missed the configured bound
//!   - CorrelationError::TornDown: channel shut down while the call was pending
//!
//! The request payload never carries the correlation id; it travels in the transport tag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use kapi_wire::{Reply, ResultCode};
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::config::ChannelSection;
use crate::slots::{CorrelationError, CorrelationTable};
use crate::{Datagram, DatagramTransport, IpcError, Wait};

/// Receive-loop poll interval; bounds shutdown latency.
const RECV_POLL: Duration = Duration::from_millis(50);

/// Tag of the worker's startup announcement.
const ANNOUNCE_TAG: u32 = 0;

/// How often a serving worker repeats its announcement, so a restarted caller relearns it.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);

const ANNOUNCE_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ANNOUNCE_BACKOFF_MAX: Duration = Duration::from_millis(500);

/// Channel-level failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport rejected the operation.
    #[error("transport error: {0}")]
    Transport(#[from] IpcError),
    /// Slot bookkeeping failed.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    /// Receive thread could not be started.
    #[error("failed to spawn receive thread: {0}")]
    Spawn(#[source] std::io::Error),
}

struct CallerShared<T: DatagramTransport> {
    transport: T,
    table: CorrelationTable,
    peer: Mutex<Option<T::Addr>>,
    peer_learned: Condvar,
    shutdown: AtomicBool,
}

impl<T: DatagramTransport> CallerShared<T> {
    fn on_receive(&self, datagram: Datagram<T::Addr>) {
        let Datagram { from, tag, payload } = datagram;
        if payload.is_empty() {
            let mut peer = self.peer.lock();
            if peer.as_ref() != Some(&from) {
                info!("kapi-ipc: worker announced at {from:?}");
            }
            *peer = Some(from);
            self.peer_learned.notify_all();
            return;
        }
        if self.peer.lock().as_ref().is_some_and(|peer| *peer != from) {
            warn!("kapi-ipc: dropping reply for slot {tag} from unexpected sender {from:?}");
            return;
        }
        let reply = Reply::decode(&payload).unwrap_or_else(|| {
            warn!("kapi-ipc: malformed {}-byte reply for slot {tag}", payload.len());
            Reply::failure(ResultCode::UNKNOWN)
        });
        if let Err(err) = self.table.complete(tag, reply) {
            warn!("kapi-ipc: dropping reply for slot {tag}: {err}");
        }
    }

    fn receive_loop(&self) {
        debug!("kapi-ipc: receive loop started");
        while !self.shutdown.load(Ordering::Acquire) {
            match self.transport.recv_from(Wait::Timeout(RECV_POLL)) {
                Ok(datagram) => self.on_receive(datagram),
                Err(err) if err.is_idle() => {}
                Err(IpcError::Disconnected) => {
                    error!("kapi-ipc: transport disconnected, stopping receive loop");
                    break;
                }
                Err(err) => {
                    error!("kapi-ipc: receive failed: {err}");
                    thread::sleep(RECV_POLL);
                }
            }
        }
        self.table.teardown();
        debug!("kapi-ipc: receive loop stopped");
    }
}

/// Caller end: issues tagged requests and correlates replies on a background thread.
pub struct CallerChannel<T: DatagramTransport + 'static> {
    shared: Arc<CallerShared<T>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    sync_timeout: Option<Duration>,
}

impl<T: DatagramTransport + 'static> CallerChannel<T> {
    /// Starts the receive thread over `transport`.
    pub fn start(transport: T, config: &ChannelSection) -> Result<Self, ChannelError> {
        let shared = Arc::new(CallerShared {
            transport,
            table: CorrelationTable::new(config.ring_capacity)?,
            peer: Mutex::new(None),
            peer_learned: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let rx = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("kapi-rx".to_string())
            .spawn(move || rx.receive_loop())
            .map_err(ChannelError::Spawn)?;
        debug!("kapi-ipc: caller channel started with {} slots", shared.table.capacity());
        Ok(Self {
            shared,
            receiver: Mutex::new(Some(handle)),
            sync_timeout: config.sync_timeout(),
        })
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Correlation table backing this channel.
    pub fn table(&self) -> &CorrelationTable {
        &self.shared.table
    }

    /// Worker address, once announced.
    pub fn peer(&self) -> Option<T::Addr> {
        self.shared.peer.lock().clone()
    }

    /// Blocks until the worker has announced itself.
    pub fn wait_for_peer(&self, wait: Wait) -> Result<T::Addr, ChannelError> {
        let deadline = wait.timeout().map(|timeout| Instant::now() + timeout);
        let mut peer = self.shared.peer.lock();
        loop {
            if let Some(addr) = peer.as_ref() {
                return Ok(addr.clone());
            }
            if wait.is_non_blocking() {
                return Err(IpcError::WouldBlock.into());
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.peer_learned.wait_until(&mut peer, deadline).timed_out()
                        && peer.is_none()
                    {
                        return Err(IpcError::Timeout.into());
                    }
                }
                None => self.shared.peer_learned.wait(&mut peer),
            }
        }
    }

    /// Sends `frame` and blocks for the reply.
    pub fn call_sync(&self, frame: &[u8]) -> Result<Reply, ChannelError> {
        let table = &self.shared.table;
        let id = table.reserve(true)?;
        self.send_reserved(id, frame)?;
        let reply = match self.sync_timeout {
            Some(timeout) => table.wait_timeout(id, timeout)?,
            None => table.wait(id)?,
        };
        debug!("kapi-ipc: slot {id} completed with {}", reply.status);
        Ok(reply)
    }

    /// Sends `frame` without waiting; a failure shows up in [`last_async_failure`].
    ///
    /// [`last_async_failure`]: Self::last_async_failure
    pub fn call_async(&self, frame: &[u8]) -> Result<(), ChannelError> {
        let id = self.shared.table.reserve(false)?;
        self.send_reserved(id, frame)
    }

    /// Most recent async failure; weakly consistent and never cleared.
    pub fn last_async_failure(&self) -> Option<ResultCode> {
        self.shared.table.last_async_failure()
    }

    fn send_reserved(&self, id: u32, frame: &[u8]) -> Result<(), ChannelError> {
        let sent = self
            .peer()
            .ok_or(ChannelError::Transport(IpcError::NotConnected))
            .and_then(|peer| {
                self.shared.table.mark_in_flight(id)?;
                self.shared.transport.send_to(&peer, id, frame)?;
                Ok(())
            });
        if sent.is_err() {
            self.shared.table.take(id);
        }
        sent
    }

    /// Stops the receive thread and releases every pending slot. Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.receiver.lock().take() {
            if handle.join().is_err() {
                error!("kapi-ipc: receive thread panicked");
            }
        }
        self.shared.table.teardown();
    }
}

impl<T: DatagramTransport + 'static> Drop for CallerChannel<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker end: announces itself, then answers each request with the echoed tag.
pub struct WorkerChannel<T: DatagramTransport> {
    transport: T,
    caller: T::Addr,
}

impl<T: DatagramTransport> WorkerChannel<T> {
    /// Wraps `transport`; `caller` receives the startup announcement.
    pub fn new(transport: T, caller: T::Addr) -> Self {
        Self { transport, caller }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends the empty startup datagram.
    pub fn announce(&self) -> crate::Result<()> {
        self.transport.send_to(&self.caller, ANNOUNCE_TAG, &[])?;
        debug!("kapi-ipc: announced to {:?}", self.caller);
        Ok(())
    }

    /// Announces until the caller accepts the datagram or `stop` is set.
    ///
    /// Returns `false` when stopped before any announcement got through.
    pub fn announce_until(&self, stop: &AtomicBool) -> bool {
        let mut backoff = ANNOUNCE_BACKOFF_MIN;
        let mut attempts = 0u32;
        while !stop.load(Ordering::Acquire) {
            match self.announce() {
                Ok(()) => {
                    info!("kapi-ipc: announced to {:?}", self.caller);
                    return true;
                }
                Err(err) => {
                    if attempts == 0 {
                        warn!("kapi-ipc: caller {:?} not reachable ({err}), retrying", self.caller);
                    }
                    attempts += 1;
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(ANNOUNCE_BACKOFF_MAX);
                }
            }
        }
        false
    }

    /// Handles at most one request. Returns `Ok(false)` when nothing arrived within `wait`.
    pub fn serve_one<F>(&self, wait: Wait, handler: &mut F) -> crate::Result<bool>
    where
        F: FnMut(&[u8]) -> Reply,
    {
        let datagram = match self.transport.recv_from(wait) {
            Ok(datagram) => datagram,
            Err(err) if err.is_idle() => return Ok(false),
            Err(err) => return Err(err),
        };
        if datagram.payload.is_empty() {
            debug!("kapi-ipc: ignoring empty datagram from {:?}", datagram.from);
            return Ok(true);
        }
        let reply = handler(&datagram.payload);
        if let Err(err) = self.transport.send_to(&datagram.from, datagram.tag, &reply.encode()) {
            error!("kapi-ipc: reply for slot {} not sent: {err}", datagram.tag);
        }
        Ok(true)
    }

    /// Serves requests until `stop` is set or the transport disconnects.
    ///
    /// The announcement is repeated every [`ANNOUNCE_INTERVAL`]; a caller that is down at that
    /// moment is skipped. Returns the number of datagrams handled.
    pub fn serve<F>(&self, stop: &AtomicBool, mut handler: F) -> crate::Result<u64>
    where
        F: FnMut(&[u8]) -> Reply,
    {
        let mut handled = 0u64;
        let mut announced = Instant::now();
        while !stop.load(Ordering::Acquire) {
            if announced.elapsed() >= ANNOUNCE_INTERVAL {
                if let Err(err) = self.announce() {
                    debug!("kapi-ipc: re-announce to {:?} failed: {err}", self.caller);
                }
                announced = Instant::now();
            }
            match self.serve_one(Wait::Timeout(RECV_POLL), &mut handler) {
                Ok(true) => handled += 1,
                Ok(false) => {}
                Err(IpcError::Disconnected) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(handled)
    }
}
